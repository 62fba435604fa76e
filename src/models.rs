//! Core data models for series reconciliation.
//!
//! This module contains the catalog-side records (series and issues), the
//! local inventory item, the metadata patch produced for it, and the
//! persisted document shape exchanged between the fetch and update stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Type Aliases
// ============================================================================

/// Opaque identifier of a local inventory item (a Calibre book id).
pub type ItemId = i64;

// ============================================================================
// Catalog Models
// ============================================================================

/// A series (Comic Vine "volume") as returned by a catalog search.
/// Immutable once built and shared by every issue fetched from it.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesDescriptor {
    pub name: String,
    pub start_year: Option<i32>,
    pub publisher: String, // Empty when the catalog has no publisher
    pub issue_count: u32,
    pub source_url: Option<String>, // Locator for the full issue list
}

impl SeriesDescriptor {
    /// Descriptor rebuilt from the persisted results document, which only
    /// carries the series name and publisher.
    pub fn named(name: impl Into<String>, publisher: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_year: None,
            publisher: publisher.into(),
            issue_count: 0,
            source_url: None,
        }
    }
}

impl fmt::Display for SeriesDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_year {
            Some(year) => write!(f, "{} ({})", self.name, year)?,
            None => write!(f, "{}", self.name)?,
        }
        if !self.publisher.is_empty() {
            write!(f, ", published by {}", self.publisher)?;
        }
        write!(f, " - {} issues", self.issue_count)
    }
}

/// Position of an issue in its series as the catalog spells it.
///
/// `raw` keeps the catalog's text ("3", "1.5") because title blacklists are
/// built from it; `value` is what ends up in the series index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIssueNumber", into = "String")]
pub struct IssueNumber {
    raw: String,
    value: f64,
}

impl IssueNumber {
    /// Parse a textual issue number. Returns None for non-numeric or
    /// non-finite input.
    pub fn parse(text: &str) -> Option<Self> {
        let raw = text.trim();
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn from_int(n: i64) -> Self {
        Self {
            raw: n.to_string(),
            value: n as f64,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Integer position used as the lookup key (truncated toward zero).
    pub fn truncated(&self) -> i64 {
        self.value.trunc() as i64
    }
}

impl fmt::Display for IssueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Issue numbers arrive as strings from the catalog but may be plain JSON
/// numbers in hand-edited result files.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIssueNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawIssueNumber> for IssueNumber {
    type Error = String;

    fn try_from(raw: RawIssueNumber) -> Result<Self, Self::Error> {
        match raw {
            RawIssueNumber::Int(n) => Ok(IssueNumber::from_int(n)),
            RawIssueNumber::Float(f) => IssueNumber::parse(&f.to_string())
                .ok_or_else(|| format!("invalid issue number: {}", f)),
            RawIssueNumber::Text(s) => {
                IssueNumber::parse(&s).ok_or_else(|| format!("invalid issue number: {:?}", s))
            }
        }
    }
}

impl From<IssueNumber> for String {
    fn from(n: IssueNumber) -> Self {
        n.raw
    }
}

/// A credited person on an issue, before role filtering.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PersonCredit {
    pub name: String,
    #[serde(default)]
    pub role: String,
}

impl PersonCredit {
    /// Only writers and artists are kept as authors. Roles are free text
    /// such as "writer, penciler", so this is a substring test.
    pub fn is_writer_or_artist(&self) -> bool {
        let role = self.role.to_ascii_lowercase();
        role.contains("writer") || role.contains("artist")
    }
}

/// One issue of a series with its authoritative metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct IssueRecord {
    pub title: String, // Empty when the catalog has no issue name
    pub number: IssueNumber,
    pub release_date: String, // ISO date, validated when canonicalizing
    pub synopsis: String,
    pub contributors: Vec<String>, // Writers and artists only, may repeat
    pub series: Arc<SeriesDescriptor>,
}

impl IssueRecord {
    /// Build an issue from raw credits. Credits whose role is neither writer
    /// nor artist are dropped here and cannot be recovered later.
    pub fn new(
        title: impl Into<String>,
        number: IssueNumber,
        release_date: impl Into<String>,
        synopsis: impl Into<String>,
        credits: &[PersonCredit],
        series: Arc<SeriesDescriptor>,
    ) -> Self {
        let contributors = credits
            .iter()
            .filter(|c| c.is_writer_or_artist())
            .map(|c| c.name.clone())
            .collect();
        Self {
            title: title.into(),
            number,
            release_date: release_date.into(),
            synopsis: synopsis.into(),
            contributors,
            series,
        }
    }

    /// Rebuild an issue from the persisted document. The document's credits
    /// were filtered when it was written.
    pub fn from_document(doc: IssueDocument, series: Arc<SeriesDescriptor>) -> Self {
        Self {
            title: doc.name.unwrap_or_default(),
            number: doc.issue_number,
            release_date: doc.cover_date.unwrap_or_default(),
            synopsis: doc.description.unwrap_or_default(),
            contributors: doc.person_credits,
            series,
        }
    }

    pub fn to_document(&self) -> IssueDocument {
        IssueDocument {
            name: Some(self.title.clone()).filter(|t| !t.is_empty()),
            volume: Some(self.series.name.clone()),
            issue_number: self.number.clone(),
            cover_date: Some(self.release_date.clone()).filter(|d| !d.is_empty()),
            description: Some(self.synopsis.clone()).filter(|d| !d.is_empty()),
            person_credits: self.contributors.clone(),
            publisher: self.series.publisher.clone(),
        }
    }
}

impl fmt::Display for IssueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), published on {} - {}",
            self.title,
            self.number,
            self.release_date,
            self.contributors.join(", ")
        )
    }
}

/// Issue as persisted between the fetch and update stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueDocument {
    pub name: Option<String>,
    pub volume: Option<String>,
    pub issue_number: IssueNumber,
    pub cover_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub person_credits: Vec<String>,
    #[serde(default)]
    pub publisher: String,
}

// ============================================================================
// Local Inventory Models
// ============================================================================

/// Item from the local inventory. Read-only input to reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalItem {
    pub id: ItemId,
    pub title: String,
    pub series_name: Option<String>,
    pub series_index_hint: Option<f64>, // None = absent, 0.0 is a real index
    pub author_names: Vec<String>,
}

// ============================================================================
// Output Models
// ============================================================================

/// Field-level update for one local item. Applied as a whole or not at all.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetadataPatch {
    pub title: String,
    pub title_sort: String,
    pub series_name: String,
    pub series_index: f64,
    pub synopsis: String,
    pub authors: Vec<String>,
    pub author_sort: String,
    pub publish_date: NaiveDate,
    pub publisher: String,
}

// ============================================================================
// Tests
// ============================================================================
