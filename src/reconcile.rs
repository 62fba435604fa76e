//! Reconciliation of local items against catalog issues.
//!
//! Each local item is matched to an issue by inferred series index and, on a
//! hit, receives the canonical metadata patch for that issue. The run is a
//! pure fold over the items: no I/O, no shared mutable state.
//!
//! ## Matching rules
//!
//! - Issues are keyed by their number truncated toward zero. When two issues
//!   share a key (3 and 3.5), the later one in input order wins the key.
//! - The volume token in titles is padded to the digit count of the number of
//!   local items (47 items → 2 digits).
//! - Items whose index cannot be inferred, or whose index has no issue, are
//!   reported as unmatched and get no patch. So are items whose issue has a
//!   malformed release date; the rest of the batch is unaffected.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::canonical::{canonicalize, CanonicalizeError};
use crate::index::{resolve_index, IndexSource};
use crate::models::{IssueRecord, ItemId, LocalItem, MetadataPatch};

// ============================================================================
// Outcome Models
// ============================================================================

/// Why an item received no patch.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// No index in the title, hint or first author
    NoIndex,
    /// An index was found but no issue carries it
    NoIssueAtIndex(i64),
    /// The issue exists but its metadata is unusable
    InvalidIssue { index: i64, error: CanonicalizeError },
}

/// Result of reconciling one local item, in input order.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemOutcome {
    Matched {
        id: ItemId,
        title: String,
        index: i64,
        source: IndexSource,
        patch: MetadataPatch,
    },
    Unmatched {
        id: ItemId,
        title: String,
        reason: SkipReason,
    },
}

impl ItemOutcome {
    pub fn id(&self) -> ItemId {
        match self {
            ItemOutcome::Matched { id, .. } | ItemOutcome::Unmatched { id, .. } => *id,
        }
    }

    pub fn patch(&self) -> Option<&MetadataPatch> {
        match self {
            ItemOutcome::Matched { patch, .. } => Some(patch),
            ItemOutcome::Unmatched { .. } => None,
        }
    }
}

/// Per-run counters. Serializable for `--stats` output.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub total_items: usize,
    pub total_issues: usize,
    pub index_collisions: usize, // Issues that replaced an earlier issue's key

    pub matched_by_title: usize,
    pub matched_by_hint: usize,
    pub matched_by_author: usize,

    pub unmatched_no_index: usize,
    pub unmatched_no_issue: usize,
    pub unmatched_invalid_issue: usize,
}

impl ReconcileStats {
    pub fn total_matched(&self) -> usize {
        self.matched_by_title + self.matched_by_hint + self.matched_by_author
    }

    pub fn total_unmatched(&self) -> usize {
        self.unmatched_no_index + self.unmatched_no_issue + self.unmatched_invalid_issue
    }

    /// Match rate as a percentage of local items
    pub fn match_rate(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            100.0 * self.total_matched() as f64 / self.total_items as f64
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Matched { source, .. } => match source {
                IndexSource::Title => self.matched_by_title += 1,
                IndexSource::Hint => self.matched_by_hint += 1,
                IndexSource::Author => self.matched_by_author += 1,
            },
            ItemOutcome::Unmatched { reason, .. } => match reason {
                SkipReason::NoIndex => self.unmatched_no_index += 1,
                SkipReason::NoIssueAtIndex(_) => self.unmatched_no_issue += 1,
                SkipReason::InvalidIssue { .. } => self.unmatched_invalid_issue += 1,
            },
        }
    }
}

/// Outcome of a whole run.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub padding_width: usize,
    pub outcomes: Vec<ItemOutcome>,
    pub stats: ReconcileStats,
}

impl Reconciliation {
    /// `(item id, patch)` pairs for matched items, in input order.
    pub fn patches(&self) -> impl Iterator<Item = (ItemId, &MetadataPatch)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.patch().map(|p| (o.id(), p)))
    }
}

// ============================================================================
// Issue Lookup
// ============================================================================

/// Index → issue lookup, built once per run and read-only afterwards.
pub struct IssueIndex<'a> {
    by_index: FxHashMap<i64, &'a IssueRecord>,
    collisions: usize,
}

impl<'a> IssueIndex<'a> {
    /// Key every issue by its truncated number. Later issues overwrite
    /// earlier ones with the same key.
    pub fn build(issues: &'a [IssueRecord]) -> Self {
        let mut by_index = FxHashMap::default();
        let mut collisions = 0;
        for issue in issues {
            if by_index.insert(issue.number.truncated(), issue).is_some() {
                collisions += 1;
            }
        }
        Self {
            by_index,
            collisions,
        }
    }

    pub fn get(&self, index: i64) -> Option<&'a IssueRecord> {
        self.by_index.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Number of decimal digits in `n` (0 → 1).
pub fn digit_count(n: usize) -> usize {
    n.to_string().len()
}

/// Reconcile one item against the lookup.
pub fn reconcile_item(item: &LocalItem, lookup: &IssueIndex<'_>, padding_width: usize) -> ItemOutcome {
    let unmatched = |reason| ItemOutcome::Unmatched {
        id: item.id,
        title: item.title.clone(),
        reason,
    };

    let Some(resolved) = resolve_index(item) else {
        return unmatched(SkipReason::NoIndex);
    };
    let Some(issue) = lookup.get(resolved.index) else {
        return unmatched(SkipReason::NoIssueAtIndex(resolved.index));
    };

    match canonicalize(issue, padding_width) {
        Ok(patch) => ItemOutcome::Matched {
            id: item.id,
            title: item.title.clone(),
            index: resolved.index,
            source: resolved.source,
            patch,
        },
        Err(error) => unmatched(SkipReason::InvalidIssue {
            index: resolved.index,
            error,
        }),
    }
}

/// Reconcile local items against catalog issues, sequentially.
/// Outcomes are in the order of `items`.
pub fn reconcile(items: &[LocalItem], issues: &[IssueRecord]) -> Reconciliation {
    let lookup = IssueIndex::build(issues);
    let padding_width = digit_count(items.len());

    let outcomes = items
        .iter()
        .map(|item| reconcile_item(item, &lookup, padding_width))
        .collect();

    finish(outcomes, &lookup, issues.len(), padding_width)
}

/// Same as [`reconcile`], with items processed on the rayon pool.
/// Outcomes are collected by input position, so the result is identical.
pub fn reconcile_parallel(items: &[LocalItem], issues: &[IssueRecord]) -> Reconciliation {
    let lookup = IssueIndex::build(issues);
    let padding_width = digit_count(items.len());

    let outcomes = items
        .par_iter()
        .map(|item| reconcile_item(item, &lookup, padding_width))
        .collect();

    finish(outcomes, &lookup, issues.len(), padding_width)
}

fn finish(
    outcomes: Vec<ItemOutcome>,
    lookup: &IssueIndex<'_>,
    total_issues: usize,
    padding_width: usize,
) -> Reconciliation {
    let mut stats = ReconcileStats {
        total_items: outcomes.len(),
        total_issues,
        index_collisions: lookup.collisions(),
        ..Default::default()
    };
    for outcome in &outcomes {
        stats.record(outcome);
    }
    Reconciliation {
        padding_width,
        outcomes,
        stats,
    }
}

// ============================================================================
// Tests
// ============================================================================
