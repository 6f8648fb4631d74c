//! Per-repo configuration loaded from `.codeplane/config.yaml`.
//!
//! Every section and field is optional; missing pieces fall back to
//! defaults so an absent file yields a fully usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::CoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub indexer: IndexerConfig,
    pub index: IndexConfig,
    pub logging: LoggingConfig,
    pub ignore: IgnoreConfig,
    pub integrity: IntegrityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debounce_sec: f64,
    pub poll_interval_sec: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7345,
            debounce_sec: 0.5,
            poll_interval_sec: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub workers: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Override for the `.codeplane/` state directory.
    pub index_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub outputs: Vec<LogOutput>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            outputs: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOutput {
    pub destination: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_format() -> LogFormat {
    LogFormat::Console
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    pub respect_gitignore: bool,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: false,
        }
    }
}

/// Tolerance for lexical/storage document-count drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub drift_abs: u64,
    pub drift_ratio: f64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            drift_abs: 5,
            drift_ratio: 0.10,
        }
    }
}

impl Config {
    /// Load from `<repo>/.codeplane/config.yaml`; a missing file yields
    /// defaults, a malformed file is an error.
    pub fn load(repo_root: &Path) -> Result<Self, CoreError> {
        let path = repo_root.join(".codeplane").join("config.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))
    }

    /// The state directory: configured override or `<repo>/.codeplane`.
    pub fn state_dir(&self, repo_root: &Path) -> PathBuf {
        self.index
            .index_path
            .clone()
            .unwrap_or_else(|| repo_root.join(".codeplane"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.indexer.workers, 1);
        assert!(!config.ignore.respect_gitignore);
        assert_eq!(config.integrity.drift_abs, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cp = dir.path().join(".codeplane");
        std::fs::create_dir_all(&cp).unwrap();
        std::fs::write(
            cp.join("config.yaml"),
            "server:\n  port: 9001\nindexer:\n  workers: 4\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.indexer.workers, 4);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cp = dir.path().join(".codeplane");
        std::fs::create_dir_all(&cp).unwrap();
        std::fs::write(cp.join("config.yaml"), "server: [not a map").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_state_dir_override() {
        let config = Config {
            index: IndexConfig {
                index_path: Some(PathBuf::from("/tmp/elsewhere")),
            },
            ..Config::default()
        };
        assert_eq!(
            config.state_dir(Path::new("/repo")),
            PathBuf::from("/tmp/elsewhere")
        );

        let default = Config::default();
        assert_eq!(
            default.state_dir(Path::new("/repo")),
            PathBuf::from("/repo/.codeplane")
        );
    }
}
