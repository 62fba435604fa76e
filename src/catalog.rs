//! Remote catalog access (Comic Vine).
//!
//! The catalog is searched for series ("volumes" in Comic Vine terms), then
//! every issue of the chosen series is fetched individually to get its
//! credits and synopsis. Requests are rate limited to one per second and a
//! rate-limit response from the API aborts the whole fetch.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{IssueNumber, IssueRecord, PersonCredit, SeriesDescriptor};
use crate::normalize::series_key;
use crate::persist::write_raw_response;

pub const COMIC_VINE_API_URL: &str = "https://comicvine.gamespot.com/api";

/// Comic Vine answers 420 when the hourly quota is exhausted
const HTTP_RATE_LIMITED_CV: u16 = 420;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// `status_code` of a successful Comic Vine response
const STATUS_OK: i64 = 1;

/// `status_code` Comic Vine sends in the body when the quota is exhausted
const STATUS_RATE_LIMITED: i64 = 107;

/// Search results per page (Comic Vine maximum)
const SEARCH_PAGE_SIZE: usize = 100;

/// Upper bound on search pages, each page costs one request
const MAX_SEARCH_PAGES: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog rate limit reached (HTTP {0})")]
    RateLimited(u16),

    #[error("catalog returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("catalog error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Parse { url: String, message: String },
}

impl CatalogError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CatalogError::RateLimited(_))
    }
}

// ============================================================================
// Issue Range
// ============================================================================

/// Inclusive range of issue numbers to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueRange {
    pub start: i64,
    pub end: i64,
}

impl IssueRange {
    /// Normalize command-line bounds: reversed bounds are swapped and a
    /// single bound means a one-issue range. No bounds → no range.
    pub fn from_bounds(start: Option<i64>, end: Option<i64>) -> Option<Self> {
        match (start, end) {
            (Some(a), Some(b)) => Some(Self {
                start: a.min(b),
                end: a.max(b),
            }),
            (Some(n), None) | (None, Some(n)) => Some(Self { start: n, end: n }),
            (None, None) => None,
        }
    }

    pub fn contains(&self, number: &IssueNumber) -> bool {
        (self.start..=self.end).contains(&number.truncated())
    }
}

// ============================================================================
// Fetcher Interface
// ============================================================================

/// Progress callback: (issues fetched so far, issues planned)
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize);

pub trait CatalogFetcher {
    /// Series whose name matches `name`.
    fn search(&self, name: &str) -> Result<Vec<SeriesDescriptor>, CatalogError>;

    /// Every issue of `series`, optionally restricted to `range`. Issue
    /// contributors are already filtered to writers and artists.
    fn fetch_issues(
        &self,
        series: &Arc<SeriesDescriptor>,
        range: Option<IssueRange>,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<IssueRecord>, CatalogError>;
}

/// Order candidates by name similarity to the search term, best first.
/// Ties keep the catalog's order.
pub fn rank_candidates(term: &str, candidates: &mut [SeriesDescriptor]) {
    let term_key = series_key(term);
    candidates.sort_by_cached_key(|c| {
        let score = strsim::normalized_levenshtein(&term_key, &series_key(&c.name));
        std::cmp::Reverse((score * 1_000_000.0) as i64)
    });
}

// ============================================================================
// Response Models
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    status_code: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    number_of_total_results: usize,
    #[serde(default)]
    results: Value,
}

#[derive(Deserialize)]
struct NamedRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct VolumeSummary {
    name: String,
    start_year: Option<Value>, // String in practice, sometimes null or a number
    publisher: Option<NamedRef>,
    count_of_issues: u32,
    api_detail_url: String,
}

#[derive(Deserialize)]
struct VolumeDetail {
    #[serde(default)]
    issues: Vec<IssueRef>,
}

/// Issue entry inside a volume detail response.
#[derive(Clone, Debug, Deserialize)]
pub struct IssueRef {
    pub api_detail_url: String,
    #[serde(default)]
    pub issue_number: Option<String>,
}

#[derive(Deserialize)]
struct IssueDetail {
    name: Option<String>,
    issue_number: IssueNumber,
    cover_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    person_credits: Vec<PersonCredit>,
}

/// Build a descriptor from one search result. Malformed results yield None.
pub fn parse_volume_summary(value: Value) -> Option<SeriesDescriptor> {
    let summary: VolumeSummary = serde_json::from_value(value).ok()?;
    let start_year = match summary.start_year {
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        _ => None,
    };
    Some(SeriesDescriptor {
        name: summary.name,
        start_year,
        publisher: summary.publisher.and_then(|p| p.name).unwrap_or_default(),
        issue_count: summary.count_of_issues,
        source_url: Some(summary.api_detail_url),
    })
}

/// Issue refs to fetch for a range. Without a range every ref is kept;
/// with one, refs whose number is missing or outside the range are dropped.
pub fn select_issue_refs(refs: Vec<IssueRef>, range: Option<IssueRange>) -> Vec<IssueRef> {
    match range {
        None => refs,
        Some(range) => refs
            .into_iter()
            .filter(|r| {
                r.issue_number
                    .as_deref()
                    .and_then(IssueNumber::parse)
                    .is_some_and(|n| range.contains(&n))
            })
            .collect(),
    }
}

/// Map an envelope's `status_code` to an error. A body-level rate limit is
/// treated like the HTTP one.
fn check_status(envelope: Envelope) -> Result<Envelope, CatalogError> {
    match envelope.status_code {
        STATUS_OK => Ok(envelope),
        STATUS_RATE_LIMITED => Err(CatalogError::RateLimited(HTTP_RATE_LIMITED_CV)),
        code => Err(CatalogError::Api {
            code,
            message: envelope.error,
        }),
    }
}

/// Unparseable issues are skipped; every other error ends the fetch.
fn skip_unparseable(result: Result<IssueRecord, CatalogError>) -> Result<Option<IssueRecord>, CatalogError> {
    match result {
        Ok(issue) => Ok(Some(issue)),
        Err(e @ CatalogError::Parse { .. }) => {
            warn!("Skipping issue: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn parse_issue_detail(value: Value, series: &Arc<SeriesDescriptor>) -> Result<IssueRecord, serde_json::Error> {
    let detail: IssueDetail = serde_json::from_value(value)?;
    Ok(IssueRecord::new(
        detail.name.unwrap_or_default(),
        detail.issue_number,
        detail.cover_date.unwrap_or_default(),
        detail.description.unwrap_or_default(),
        &detail.person_credits,
        Arc::clone(series),
    ))
}

// ============================================================================
// Comic Vine Client
// ============================================================================

pub struct ComicVineClient {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    raw_dump: Option<PathBuf>,
}

impl ComicVineClient {
    pub fn new(api_key: impl Into<String>, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            agent,
            api_key: api_key.into(),
            base_url: COMIC_VINE_API_URL.to_string(),
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            raw_dump: None,
        }
    }

    /// Client configured from the API key and user agent in `config`.
    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        Ok(Self::new(config.api_key()?, config.user_agent()?))
    }

    /// Write every raw response body to `path` (last response wins).
    pub fn with_raw_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw_dump = Some(path.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Block until the rate limiter grants a request slot.
    fn wait_for_slot(&self) {
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!("Rate limiting: waiting {:?}", wait);
            std::thread::sleep(wait);
        }
    }

    fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Envelope, CatalogError> {
        self.wait_for_slot();

        let mut request = self
            .agent
            .get(url)
            .query("api_key", &self.api_key)
            .query("format", "json");
        for (key, value) in params {
            request = request.query(key, value);
        }

        debug!(url = %url, "Querying catalog");

        let body = match request.call() {
            Ok(response) => response.into_string().map_err(|e| CatalogError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?,
            Err(ureq::Error::Status(code, _))
                if code == HTTP_RATE_LIMITED_CV || code == HTTP_TOO_MANY_REQUESTS =>
            {
                return Err(CatalogError::RateLimited(code));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(CatalogError::Http {
                    status: code,
                    url: url.to_string(),
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(CatalogError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                });
            }
        };

        if let Some(path) = &self.raw_dump {
            if let Err(e) = write_raw_response(path, &body) {
                warn!("Could not save raw response: {}", e);
            }
        }

        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| CatalogError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        check_status(envelope)
    }

    fn results<T: DeserializeOwned>(url: &str, envelope: Envelope) -> Result<T, CatalogError> {
        serde_json::from_value(envelope.results).map_err(|e| CatalogError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Issue refs listed on a volume detail page.
    pub fn fetch_issue_refs(&self, volume_url: &str) -> Result<Vec<IssueRef>, CatalogError> {
        let envelope = self.get(volume_url, &[])?;
        let detail: VolumeDetail = Self::results(volume_url, envelope)?;
        Ok(detail.issues)
    }

    /// Full record for one issue.
    pub fn fetch_issue(
        &self,
        issue_url: &str,
        series: &Arc<SeriesDescriptor>,
    ) -> Result<IssueRecord, CatalogError> {
        let envelope = self.get(issue_url, &[])?;
        parse_issue_detail(envelope.results, series).map_err(|e| CatalogError::Parse {
            url: issue_url.to_string(),
            message: e.to_string(),
        })
    }
}

impl CatalogFetcher for ComicVineClient {
    fn search(&self, name: &str) -> Result<Vec<SeriesDescriptor>, CatalogError> {
        let url = format!("{}/volumes/", self.base_url);
        let filter = format!("name:{}", name);
        let limit = SEARCH_PAGE_SIZE.to_string();

        let mut volumes = Vec::new();
        let mut seen = 0;
        for page in 0..MAX_SEARCH_PAGES {
            let offset = (page * SEARCH_PAGE_SIZE).to_string();
            let envelope = self.get(
                &url,
                &[
                    ("filter", filter.as_str()),
                    ("limit", limit.as_str()),
                    ("offset", offset.as_str()),
                ],
            )?;
            let total = envelope.number_of_total_results;
            let results: Vec<Value> = Self::results(&url, envelope)?;
            if results.is_empty() {
                break;
            }
            seen += results.len();
            for value in results {
                match parse_volume_summary(value) {
                    Some(volume) => volumes.push(volume),
                    None => debug!("Skipping malformed search result"),
                }
            }
            if seen >= total {
                break;
            }
        }
        Ok(volumes)
    }

    fn fetch_issues(
        &self,
        series: &Arc<SeriesDescriptor>,
        range: Option<IssueRange>,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<IssueRecord>, CatalogError> {
        let Some(volume_url) = series.source_url.as_deref() else {
            return Ok(Vec::new());
        };

        let refs = select_issue_refs(self.fetch_issue_refs(volume_url)?, range);
        let planned = refs.len();
        let mut issues = Vec::with_capacity(planned);
        for (i, issue_ref) in refs.iter().enumerate() {
            progress(i, planned);
            if let Some(issue) = skip_unparseable(self.fetch_issue(&issue_ref.api_detail_url, series))? {
                issues.push(issue);
            }
        }
        progress(planned, planned);
        Ok(issues)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_range_normalization() {
        assert_eq!(IssueRange::from_bounds(None, None), None);
        assert_eq!(
            IssueRange::from_bounds(Some(10), Some(1)),
            Some(IssueRange { start: 1, end: 10 })
        );
        assert_eq!(
            IssueRange::from_bounds(Some(4), None),
            Some(IssueRange { start: 4, end: 4 })
        );
        assert_eq!(
            IssueRange::from_bounds(None, Some(6)),
            Some(IssueRange { start: 6, end: 6 })
        );
        // Zero is a real bound, not "missing"
        assert_eq!(
            IssueRange::from_bounds(Some(0), Some(2)),
            Some(IssueRange { start: 0, end: 2 })
        );
    }

    #[test]
    fn test_range_contains_truncates() {
        let range = IssueRange { start: 2, end: 3 };
        assert!(range.contains(&IssueNumber::parse("3.5").unwrap()));
        assert!(!range.contains(&IssueNumber::parse("1.9").unwrap()));
        assert!(!range.contains(&IssueNumber::from_int(4)));
    }

    #[test]
    fn test_select_issue_refs() {
        let refs = vec![
            IssueRef { api_detail_url: "u1".into(), issue_number: Some("1".into()) },
            IssueRef { api_detail_url: "u2".into(), issue_number: Some("2".into()) },
            IssueRef { api_detail_url: "ux".into(), issue_number: None },
            IssueRef { api_detail_url: "u5".into(), issue_number: Some("5".into()) },
        ];
        assert_eq!(select_issue_refs(refs.clone(), None).len(), 4);

        let picked = select_issue_refs(refs, IssueRange::from_bounds(Some(2), Some(5)));
        let urls: Vec<&str> = picked.iter().map(|r| r.api_detail_url.as_str()).collect();
        assert_eq!(urls, vec!["u2", "u5"]);
    }

    #[test]
    fn test_parse_volume_summary() {
        let volume = parse_volume_summary(json!({
            "name": "The Black Company",
            "start_year": "2009",
            "publisher": { "name": "Tor" },
            "count_of_issues": 12,
            "api_detail_url": "https://comicvine.gamespot.com/api/volume/4050-1/"
        }))
        .unwrap();
        assert_eq!(volume.name, "The Black Company");
        assert_eq!(volume.start_year, Some(2009));
        assert_eq!(volume.publisher, "Tor");
        assert_eq!(volume.issue_count, 12);
        assert!(volume.source_url.unwrap().ends_with("4050-1/"));
    }

    #[test]
    fn test_parse_volume_summary_tolerates_nulls() {
        let volume = parse_volume_summary(json!({
            "name": "Obscure",
            "start_year": null,
            "publisher": null,
            "count_of_issues": 0,
            "api_detail_url": "u"
        }))
        .unwrap();
        assert_eq!(volume.start_year, None);
        assert_eq!(volume.publisher, "");
    }

    #[test]
    fn test_parse_volume_summary_rejects_incomplete() {
        assert!(parse_volume_summary(json!({ "name": "No url", "count_of_issues": 1 })).is_none());
    }

    #[test]
    fn test_parse_issue_detail_filters_roles() {
        let series = Arc::new(SeriesDescriptor::named("Dragonlance", "DC"));
        let issue = parse_issue_detail(
            json!({
                "name": "Vol.3",
                "issue_number": "3",
                "cover_date": "1989-03-01",
                "description": null,
                "person_credits": [
                    { "name": "Dan Mishkin", "role": "writer" },
                    { "name": "Ron Randall", "role": "penciler, artist" },
                    { "name": "Someone", "role": "letterer" }
                ]
            }),
            &series,
        )
        .unwrap();
        assert_eq!(issue.title, "Vol.3");
        assert_eq!(issue.number.raw(), "3");
        assert_eq!(issue.synopsis, "");
        assert_eq!(issue.contributors, vec!["Dan Mishkin", "Ron Randall"]);
        assert!(Arc::ptr_eq(&issue.series, &series));
    }

    #[test]
    fn test_rank_candidates() {
        let mut candidates = vec![
            SeriesDescriptor::named("Black Company Chronicles Special Edition", ""),
            SeriesDescriptor::named("The Black Company", ""),
            SeriesDescriptor::named("Black Company", ""),
        ];
        rank_candidates("Black Company", &mut candidates);
        assert_eq!(candidates[0].name, "Black Company");
        assert_eq!(candidates[1].name, "The Black Company");
    }

    #[test]
    fn test_unparseable_issues_are_skipped() {
        let series = Arc::new(SeriesDescriptor::named("Dragonlance", "DC"));
        let details = vec![
            json!({ "name": "One", "issue_number": "1", "cover_date": "1988-01-01" }),
            json!({ "name": "Half", "issue_number": "1/2", "cover_date": "1988-02-01" }),
            json!({ "name": "Unnumbered", "issue_number": null, "cover_date": "1988-03-01" }),
            json!({ "name": "Two", "issue_number": "2", "cover_date": "1988-04-01" }),
        ];

        let mut kept = Vec::new();
        for (i, detail) in details.into_iter().enumerate() {
            let result = parse_issue_detail(detail, &series).map_err(|e| CatalogError::Parse {
                url: format!("issue/{}", i),
                message: e.to_string(),
            });
            kept.extend(skip_unparseable(result).unwrap());
        }
        let titles: Vec<&str> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
    }

    #[test]
    fn test_rate_limit_still_ends_fetch() {
        let err = skip_unparseable(Err(CatalogError::RateLimited(420))).unwrap_err();
        assert!(err.is_rate_limit());
    }

    fn envelope(status_code: i64, error: &str) -> Envelope {
        Envelope {
            status_code,
            error: error.into(),
            number_of_total_results: 0,
            results: Value::Null,
        }
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(envelope(1, "OK")).is_ok());
        assert!(check_status(envelope(107, "Rate limit exceeded")).unwrap_err().is_rate_limit());
        assert!(matches!(
            check_status(envelope(100, "Invalid API Key")),
            Err(CatalogError::Api { code: 100, .. })
        ));
    }

    #[test]
    fn test_rate_limit_error() {
        assert!(CatalogError::RateLimited(420).is_rate_limit());
        assert!(!CatalogError::Api { code: 100, message: "Invalid API Key".into() }.is_rate_limit());
    }
}
