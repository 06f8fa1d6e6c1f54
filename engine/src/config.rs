//! Configuration (ambient, not one of the core A–H components).
//!
//! Defaults mirror `settings.py`'s constants: 4 parallel workers, 3
//! retries, and a fixed set of video extensions.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_DOWNLOAD: u8 = 4;
pub const DEFAULT_MAX_RETRY: u8 = 3;
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024 * 1024;
pub const CHECKPOINT_PERCENT: u8 = 10;
pub const STABLE_WINDOW_SECS: u64 = 5;
pub const POLL_INTERVAL_SECS: u64 = 5;

fn default_extensions() -> Vec<String> {
    [
        ".mxf", ".mov", ".mp4", ".avi", ".mkv", ".m4v", ".mpg", ".mpeg", ".wmv", ".flv", ".mts",
        ".m2ts", ".vob", ".3gp", ".webm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source_folders: Vec<PathBuf>,
    #[serde(default)]
    pub destination_folder: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_download")]
    pub max_download: u8,
    #[serde(default = "default_max_retry")]
    pub max_retry: u8,
}

fn default_max_download() -> u8 {
    DEFAULT_MAX_DOWNLOAD
}

fn default_max_retry() -> u8 {
    DEFAULT_MAX_RETRY
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_folders: Vec::new(),
            destination_folder: PathBuf::new(),
            extensions: default_extensions(),
            max_download: DEFAULT_MAX_DOWNLOAD,
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields defaults; a malformed file
    /// is a hard error (unlike the state store, there is no prior durable
    /// value to fall back to).
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::rename(&tmp_path, path).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination_folder.as_os_str().is_empty() {
            return Err(ConfigError::DestinationNotSet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Config::load(&path).expect("defaults on missing file");
        assert_eq!(cfg.max_download, DEFAULT_MAX_DOWNLOAD);
        assert_eq!(cfg.max_retry, DEFAULT_MAX_RETRY);
        assert_eq!(cfg.extensions.len(), 15);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();
        cfg.destination_folder = PathBuf::from("/dest");
        cfg.source_folders.push(PathBuf::from("/src"));
        cfg.save(&path).expect("save");

        let loaded = Config::load(&path).expect("load");
        assert_eq!(loaded.destination_folder, PathBuf::from("/dest"));
        assert_eq!(loaded.source_folders, vec![PathBuf::from("/src")]);
    }

    #[test]
    fn malformed_config_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let result = Config::load(&path);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_empty_destination() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"destination_folder": "/d"}"#;
        let cfg: Config = serde_json::from_str(json).expect("partial parse");
        assert_eq!(cfg.max_download, DEFAULT_MAX_DOWNLOAD);
        assert_eq!(cfg.extensions.len(), 15);
    }
}
