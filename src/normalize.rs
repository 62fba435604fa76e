//! Shared string normalization for canonical titles, sort keys and series
//! name comparison.
//!
//! CRITICAL: title comparison and sort keys end up written to the library.
//! Changing them changes what gets stored. Run tests after changes.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Leading English article, moved to the end for title sorting.
pub static LEADING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(a|an|the)\s+(\S.*)$").unwrap());

/// Anything that is not a letter, digit or space in an ASCII-folded key
pub static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9 ]+").unwrap());

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Generational suffixes kept after the given names in author sort keys
const AUTHOR_SUFFIXES: &[&str] = &["jr", "jr.", "sr", "sr.", "ii", "iii", "iv"];

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
/// Used to filter out accents during normalization.
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Astérix" → "asterix"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    // Transliterate remaining non-ASCII (Cyrillic, CJK, ...)
    any_ascii(&stripped).to_lowercase()
}

/// Lower-case and drop all whitespace: "Vol. 3" → "vol.3".
/// This is the form issue titles are compared in against blacklist labels.
pub fn compact_lowercase(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Comparison key for series names: ASCII-folded, punctuation dropped,
/// whitespace collapsed. "Astérix & Obélix" → "asterix obelix"
pub fn series_key(name: &str) -> String {
    let folded = fold_to_ascii(name);
    let cleaned = NON_ALNUM.replace_all(&folded, " ");
    MULTI_SPACE.replace_all(cleaned.trim(), " ").to_string()
}

// ============================================================================
// SORT KEYS
// ============================================================================

/// Title sort key: a leading article moves to the end.
/// "The Black Company - Vol. 01" → "Black Company - Vol. 01, The"
pub fn title_sort(title: &str) -> String {
    let title = title.trim();
    match LEADING_ARTICLE.captures(title) {
        Some(caps) => format!("{}, {}", &caps[2], &caps[1]),
        None => title.to_string(),
    }
}

/// Sort form of one author: "Glen Charles Cook" → "Cook, Glen Charles".
/// Names that already contain a comma, or have a single token, are kept.
pub fn author_to_sort(name: &str) -> String {
    let mut tokens: Vec<&str> = name.split_whitespace().collect();
    if name.contains(',') || tokens.len() < 2 {
        return tokens.join(" ");
    }

    let mut suffix: Vec<&str> = Vec::new();
    while tokens.len() > 2 {
        match tokens.last() {
            Some(last) if AUTHOR_SUFFIXES.contains(&last.to_lowercase().as_str()) => {
                suffix.insert(0, *last);
                tokens.pop();
            }
            _ => break,
        }
    }

    let Some(last) = tokens.pop() else {
        return String::new();
    };
    let mut sorted = format!("{}, {}", last, tokens.join(" "));
    if !suffix.is_empty() {
        sorted.push(' ');
        sorted.push_str(&suffix.join(" "));
    }
    sorted
}

/// Sort key for an author list: each author inverted, joined with " & ".
pub fn authors_to_sort(authors: &[String]) -> String {
    authors
        .iter()
        .map(|a| author_to_sort(a))
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(" & ")
}

// ============================================================================
// TESTS
// ============================================================================
