//! Results document exchanged between the fetch and update stages.
//!
//! The fetch stage writes one JSON array of issue documents; the update
//! stage reads it back into issue records. Issues of the same series share
//! one descriptor.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::{IssueDocument, IssueRecord, SeriesDescriptor};

/// File name of the results document inside the output directory
pub const RESULTS_FILE: &str = "results.json";

/// File name of the last raw catalog response inside the output directory
pub const RAW_RESPONSE_FILE: &str = "comic_vine_response.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid results document {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Write issues as a pretty-printed results document, creating the parent
/// directory when needed.
pub fn write_results(path: &Path, issues: &[IssueRecord]) -> Result<(), PersistError> {
    let docs: Vec<IssueDocument> = issues.iter().map(IssueRecord::to_document).collect();
    let json = to_pretty_json(&docs).map_err(|source| PersistError::Json {
        path: path.display().to_string(),
        source,
    })?;
    write_file(path, &json)
}

/// Read a results document back into issue records.
///
/// The document must be a JSON array. Entries that do not decode (an
/// `issue_number` such as "1/2" or null) are skipped with a warning.
pub fn read_results(path: &Path) -> Result<Vec<IssueRecord>, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let entries: Vec<Value> = serde_json::from_str(&text).map_err(|source| PersistError::Json {
        path: path.display().to_string(),
        source,
    })?;
    Ok(issues_from_documents(decode_documents(entries)))
}

/// Decode each entry on its own so one bad record only loses itself.
pub fn decode_documents(entries: Vec<Value>) -> Vec<IssueDocument> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let label = entry_label(&entry);
            match serde_json::from_value::<IssueDocument>(entry) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!("Skipping results entry {} ({}): {}", position, label, e);
                    None
                }
            }
        })
        .collect()
}

/// "volume #number" for diagnostics, from whatever the entry carries.
fn entry_label(entry: &Value) -> String {
    let volume = entry.get("volume").and_then(Value::as_str).unwrap_or("?");
    match entry.get("issue_number") {
        Some(Value::String(n)) => format!("{} #{}", volume, n),
        Some(Value::Number(n)) => format!("{} #{}", volume, n),
        _ => format!("{} #?", volume),
    }
}

/// Build issue records, sharing one descriptor per (volume, publisher).
pub fn issues_from_documents(docs: Vec<IssueDocument>) -> Vec<IssueRecord> {
    let mut series: HashMap<(String, String), Arc<SeriesDescriptor>> = HashMap::new();
    docs.into_iter()
        .map(|doc| {
            let key = (doc.volume.clone().unwrap_or_default(), doc.publisher.clone());
            let descriptor = series
                .entry(key)
                .or_insert_with_key(|(name, publisher)| {
                    Arc::new(SeriesDescriptor::named(name.clone(), publisher.clone()))
                })
                .clone();
            IssueRecord::from_document(doc, descriptor)
        })
        .collect()
}

/// Dump a raw catalog response, pretty-printed when it is valid JSON.
/// Overwrites the previous dump.
pub fn write_raw_response(path: &Path, body: &str) -> Result<(), PersistError> {
    let pretty = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| to_pretty_json(&v).ok())
        .unwrap_or_else(|| body.to_string());
    write_file(path, &pretty)
}

/// Pretty JSON with a four-space indent.
pub fn to_pretty_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_file(path: &Path, contents: &str) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)
}
