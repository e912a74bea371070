//! Engine configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for evaluation behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of operations running at once (0 = one per CPU)
    pub max_workers: usize,
    /// Keep dispatching independent branches after an operation fails.
    /// When off, in-flight work still finishes but nothing new starts.
    pub keep_going: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            keep_going: true,
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file; absent keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Worker pool size with the CPU default applied
    pub fn resolved_workers(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_workers, 0);
        assert!(config.keep_going);
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn test_explicit_worker_count() {
        let config = EngineConfig {
            max_workers: 3,
            ..Default::default()
        };
        assert_eq!(config.resolved_workers(), 3);
    }

    #[test]
    fn test_from_json_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, r#"{ "maxWorkers": 2 }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_workers, 2);
        assert!(config.keep_going);
    }

    #[test]
    fn test_from_json_file_errors() {
        let temp_dir = TempDir::new().unwrap();

        let missing = temp_dir.path().join("missing.json");
        assert!(matches!(
            EngineConfig::from_json_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let invalid = temp_dir.path().join("invalid.json");
        fs::write(&invalid, "{ keepGoing: ").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&invalid),
            Err(ConfigError::Parse { .. })
        ));
    }
}
