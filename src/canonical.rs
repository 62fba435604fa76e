//! Canonical metadata for a matched issue.
//!
//! Turns an authoritative issue record into the patch written to the local
//! item: canonical display title, padded volume token, copied catalog fields
//! and derived sort keys.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{IssueNumber, IssueRecord, MetadataPatch};
use crate::normalize::{authors_to_sort, compact_lowercase, title_sort};

/// Release dates are plain ISO calendar dates.
pub const RELEASE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalizeError {
    #[error("issue {number}: malformed release date {date:?}")]
    MalformedDate { number: String, date: String },
}

/// Zero-pad the integer part of an issue number to `width` digits.
/// A fractional part is kept as the catalog wrote it: 3 → "03", 1.5 → "01.5".
pub fn pad_index(number: &IssueNumber, width: usize) -> String {
    let value = number.value();
    let sign = if value < 0.0 { "-" } else { "" };
    let int_part = value.trunc().abs() as u64;
    let fraction = number
        .raw()
        .split_once('.')
        .map(|(_, f)| f)
        .filter(|f| !f.is_empty());

    match fraction {
        Some(f) => format!("{}{:0width$}.{}", sign, int_part, f, width = width),
        None => format!("{}{:0width$}", sign, int_part, width = width),
    }
}

/// Titles that only restate the volume number, in compact lowercase form.
/// Built from the unpadded catalog number.
pub fn blacklist_titles(number: &IssueNumber) -> [String; 4] {
    let raw = number.raw();
    [
        format!("vol.{}", raw),
        format!("volume{}", raw),
        format!("vol{}", raw),
        format!("#{}", raw),
    ]
}

/// "<series> - Vol. <padded>" with ": <issue title>" appended unless the
/// issue title is empty or only restates the volume number.
pub fn canonical_title(series_name: &str, issue: &IssueRecord, width: usize) -> String {
    let padded = pad_index(&issue.number, width);
    let compact = compact_lowercase(&issue.title);
    let redundant = compact.is_empty() || blacklist_titles(&issue.number).contains(&compact);

    if redundant {
        format!("{} - Vol. {}", series_name, padded)
    } else {
        format!("{} - Vol. {}: {}", series_name, padded, issue.title)
    }
}

/// Build the metadata patch for one issue. Pure: the same issue and width
/// always give the same patch.
pub fn canonicalize(issue: &IssueRecord, width: usize) -> Result<MetadataPatch, CanonicalizeError> {
    let publish_date = NaiveDate::parse_from_str(issue.release_date.trim(), RELEASE_DATE_FORMAT)
        .map_err(|_| CanonicalizeError::MalformedDate {
            number: issue.number.raw().to_string(),
            date: issue.release_date.clone(),
        })?;

    let series_name = issue.series.name.clone();
    let title = canonical_title(&series_name, issue, width);

    Ok(MetadataPatch {
        title_sort: title_sort(&title),
        title,
        series_name,
        series_index: issue.number.value(),
        synopsis: issue.synopsis.clone(),
        author_sort: authors_to_sort(&issue.contributors),
        authors: issue.contributors.clone(),
        publish_date,
        publisher: issue.series.publisher.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PersonCredit, SeriesDescriptor};
    use std::sync::Arc;

    fn issue(series: &str, title: &str, number: &str, date: &str) -> IssueRecord {
        IssueRecord::new(
            title,
            IssueNumber::parse(number).unwrap(),
            date,
            "A synopsis",
            &[
                PersonCredit { name: "Glen Cook".into(), role: "writer".into() },
                PersonCredit { name: "Ed Itor".into(), role: "editor".into() },
            ],
            Arc::new(SeriesDescriptor::named(series, "Tor")),
        )
    }

    #[test]
    fn test_pad_index() {
        assert_eq!(pad_index(&IssueNumber::from_int(3), 2), "03");
        assert_eq!(pad_index(&IssueNumber::from_int(3), 1), "3");
        assert_eq!(pad_index(&IssueNumber::from_int(123), 2), "123");
        assert_eq!(pad_index(&IssueNumber::parse("02").unwrap(), 1), "2");
        assert_eq!(pad_index(&IssueNumber::parse("1.5").unwrap(), 2), "01.5");
        assert_eq!(pad_index(&IssueNumber::from_int(0), 3), "000");
    }

    #[test]
    fn test_blacklist_title_is_not_repeated() {
        for (title, number) in [("Vol.3", "3"), ("Volume 3", "3"), ("vol 3", "3"), ("#3", "3"), ("VOL. 12", "12")] {
            let i = issue("Dragonlance", title, number, "1984-01-01");
            let patch = canonicalize(&i, 2).unwrap();
            assert_eq!(
                patch.title,
                format!("Dragonlance - Vol. {:0>2}", number),
                "title {:?}",
                title
            );
        }
    }

    #[test]
    fn test_blacklist_uses_unpadded_number() {
        // "Vol.03" only restates issue 3 when the catalog spells it "03"
        let i = issue("Dragonlance", "Vol.03", "3", "1984-01-01");
        assert_eq!(
            canonicalize(&i, 2).unwrap().title,
            "Dragonlance - Vol. 03: Vol.03"
        );
    }

    #[test]
    fn test_empty_title() {
        let i = issue("Series", "", "1", "2000-01-01");
        assert_eq!(canonicalize(&i, 1).unwrap().title, "Series - Vol. 1");
    }

    #[test]
    fn test_named_title_is_suffixed() {
        let i = issue("Series", "Rise of the Fallen", "2", "2000-01-01");
        let patch = canonicalize(&i, 1).unwrap();
        assert!(patch.title.ends_with(": Rise of the Fallen"));
        assert_eq!(patch.title, "Series - Vol. 2: Rise of the Fallen");
    }

    #[test]
    fn test_patch_fields() {
        let i = issue("The Black Company", "Shadows Linger", "2.5", "1984-06-15");
        let patch = canonicalize(&i, 2).unwrap();
        assert_eq!(patch.title, "The Black Company - Vol. 02.5: Shadows Linger");
        assert_eq!(patch.title_sort, "Black Company - Vol. 02.5: Shadows Linger, The");
        assert_eq!(patch.series_name, "The Black Company");
        assert_eq!(patch.series_index, 2.5);
        assert_eq!(patch.synopsis, "A synopsis");
        assert_eq!(patch.authors, vec!["Glen Cook"]);
        assert_eq!(patch.author_sort, "Cook, Glen");
        assert_eq!(patch.publish_date, NaiveDate::from_ymd_opt(1984, 6, 15).unwrap());
        assert_eq!(patch.publisher, "Tor");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let i = issue("Series", "Rise", "7", "2001-02-03");
        assert_eq!(canonicalize(&i, 3), canonicalize(&i, 3));
    }

    #[test]
    fn test_malformed_date() {
        let i = issue("Series", "Rise", "7", "2001-13-45");
        assert_eq!(
            canonicalize(&i, 1),
            Err(CanonicalizeError::MalformedDate {
                number: "7".into(),
                date: "2001-13-45".into()
            })
        );
        let missing = issue("Series", "Rise", "7", "");
        assert!(canonicalize(&missing, 1).is_err());
    }
}
