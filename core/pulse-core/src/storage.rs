//! Storage configuration and path management for pulse.
//!
//! Every durable file the agent touches is named here, so tests can point a
//! whole pipeline at a temp directory with [`StorageConfig::with_root`].

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable overriding the data root (default `~/.pulse`).
pub const HOME_ENV: &str = "PULSE_HOME";

const ROOT_DIR_NAME: &str = ".pulse";

/// Central configuration for all pulse storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `PULSE_HOME`, falling back to `~/.pulse`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::with_root(home.join(ROOT_DIR_NAME)))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.json (API key, endpoint, timeouts).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Path to backoff.json (cross-invocation suppression window).
    pub fn backoff_file(&self) -> PathBuf {
        self.root.join("backoff.json")
    }

    /// Path to the advisory lock guarding backoff read-modify-write cycles.
    pub fn backoff_lock_file(&self) -> PathBuf {
        self.root.join("backoff.json.lock")
    }

    /// Path to offline.db (heartbeats awaiting delivery).
    pub fn offline_queue_file(&self) -> PathBuf {
        self.root.join("offline.db")
    }

    /// Path to pulse.log.
    pub fn log_file(&self) -> PathBuf {
        self.root.join("pulse.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_root() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/pulse-test"));
        assert_eq!(config.root(), Path::new("/tmp/pulse-test"));
        assert_eq!(
            config.backoff_file(),
            PathBuf::from("/tmp/pulse-test/backoff.json")
        );
        assert_eq!(
            config.offline_queue_file(),
            PathBuf::from("/tmp/pulse-test/offline.db")
        );
        assert!(config.backoff_lock_file().starts_with(config.root()));
        assert!(config.log_file().starts_with(config.root()));
    }
}
