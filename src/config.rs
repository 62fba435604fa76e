//! Runtime configuration.
//!
//! Loaded once from a JSON file and handed to the catalog client and the
//! library store by value. Keys keep the names used by existing
//! `config.json` files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default directory for results and raw response dumps
pub const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing config value {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(rename = "COMIC_VINE_API_KEY")]
    pub api_key: Option<String>,

    #[serde(rename = "CALIBRE_DB_PATH")]
    pub library_path: Option<PathBuf>,

    /// User agent sent to the catalog API, required by Comic Vine
    #[serde(rename = "UNIQUE_AGENT_ID")]
    pub user_agent: Option<String>,

    #[serde(rename = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load the file if it exists, otherwise start from an empty config so
    /// that command-line flags alone can supply every value.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("COMIC_VINE_API_KEY"))
    }

    pub fn user_agent(&self) -> Result<&str, ConfigError> {
        self.user_agent
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(ConfigError::Missing("UNIQUE_AGENT_ID"))
    }

    pub fn library_path(&self) -> Result<&Path, ConfigError> {
        self.library_path
            .as_deref()
            .ok_or(ConfigError::Missing("CALIBRE_DB_PATH"))
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_OUTPUT_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keys() {
        let config = Config::from_json(
            r#"{
                "COMIC_VINE_API_KEY": "abc123",
                "CALIBRE_DB_PATH": "/books/Calibre Library",
                "UNIQUE_AGENT_ID": "series-reconcile/0.1"
            }"#,
        )
        .unwrap();
        assert_eq!(config.api_key().unwrap(), "abc123");
        assert_eq!(config.library_path().unwrap(), Path::new("/books/Calibre Library"));
        assert_eq!(config.user_agent().unwrap(), "series-reconcile/0.1");
        assert_eq!(config.output_dir(), Path::new("output"));
    }

    #[test]
    fn test_missing_values() {
        let config = Config::from_json(r#"{"COMIC_VINE_API_KEY": ""}"#).unwrap();
        assert!(matches!(config.api_key(), Err(ConfigError::Missing("COMIC_VINE_API_KEY"))));
        assert!(config.library_path().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(DEFAULT_CONFIG_FILE);
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());

        fs::write(&missing, r#"{"OUTPUT_DIR": "/tmp/out"}"#).unwrap();
        let config = Config::load_or_default(&missing).unwrap();
        assert_eq!(config.output_dir(), Path::new("/tmp/out"));

        fs::write(&missing, "not json").unwrap();
        assert!(matches!(Config::load(&missing), Err(ConfigError::Parse { .. })));
    }
}
