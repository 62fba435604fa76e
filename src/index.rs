//! Series index inference from free-text labels.
//!
//! Local titles encode the position in a series in many ways:
//!     #1 - The Black Company
//!     #02
//!     Dragonlance Vol.3
//!     v1
//! They all share one thing: the first run of digits, optionally preceded by
//! `#`, is the index. There is deliberately no handling of roman numerals or
//! spelled-out numbers ("Volume One" does not match).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::LocalItem;

/// First ASCII digit run, optionally prefixed with `#`. Other Unicode
/// digits are not index digits.
pub static INDEX_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"#?([0-9]+)").unwrap());

/// Where a resolved index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexSource {
    /// Digits found in the item title
    Title,
    /// Series index already stored on the item
    Hint,
    /// Digits found in the first author (index mis-filed as author upstream)
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIndex {
    pub index: i64,
    pub source: IndexSource,
}

/// Extract a series index from a label. Leading zeros are dropped
/// ("#02" → 2). Returns None when there is no digit run, or when the run
/// does not fit in an i64.
pub fn infer(text: &str) -> Option<i64> {
    INDEX_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Resolve the index of a local item, trying in order:
/// 1. the title
/// 2. the existing series index hint, truncated toward zero
/// 3. the first author name
pub fn resolve_index(item: &LocalItem) -> Option<ResolvedIndex> {
    if let Some(index) = infer(&item.title) {
        return Some(ResolvedIndex {
            index,
            source: IndexSource::Title,
        });
    }

    if let Some(hint) = item.series_index_hint.filter(|h| h.is_finite()) {
        return Some(ResolvedIndex {
            index: hint.trunc() as i64,
            source: IndexSource::Hint,
        });
    }

    item.author_names
        .first()
        .and_then(|author| infer(author))
        .map(|index| ResolvedIndex {
            index,
            source: IndexSource::Author,
        })
}
