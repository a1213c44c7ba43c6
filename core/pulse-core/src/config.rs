//! Agent configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, `<root>/config.json`,
//! environment (`PULSE_API_KEY`, `PULSE_API_URL`), then whatever the CLI
//! passes to [`PulseConfig::apply_overrides`].

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::storage::StorageConfig;

pub const API_KEY_ENV: &str = "PULSE_API_KEY";
pub const API_URL_ENV: &str = "PULSE_API_URL";

pub const DEFAULT_API_URL: &str = "https://api.pulse.dev/api/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub timeout_secs: u64,
    pub queue_capacity: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Values supplied on the command line; `None` keeps the loaded value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl PulseConfig {
    /// Loads config.json and applies environment overrides.
    ///
    /// A missing file yields defaults. A malformed file is an error so the
    /// CLI can report it with the config exit code instead of silently
    /// posting to the wrong endpoint.
    pub fn load(storage: &StorageConfig) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(storage)?;
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(storage: &StorageConfig) -> Result<Self, ConfigError> {
        let path = storage.config_file();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::Read { path, source: err }),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|err| ConfigError::Malformed {
            path,
            details: err.to_string(),
        })
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(key) = overrides.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                self.api_key = Some(key.to_string());
            }
        }
        if let Some(url) = overrides.api_url.as_deref().map(str::trim) {
            if !url.is_empty() {
                self.api_url = url.to_string();
            }
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.timeout_secs = timeout;
        }
        self.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("https://") || self.api_url.starts_with("http://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_url",
                details: format!("'{}' is not an http(s) URL", self.api_url),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                details: "must be at least 1 second".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                details: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let config = PulseConfig::load_file(&storage).unwrap();
        assert_eq!(config, PulseConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), r#"{"api_key": "file-key"}"#).unwrap();

        let config = PulseConfig::load_file(&storage).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.config_file(), "{not json").unwrap();

        let err = PulseConfig::load_file(&storage).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn test_env_then_cli_precedence() {
        let mut config = PulseConfig {
            api_key: Some("file-key".to_string()),
            ..PulseConfig::default()
        };
        config.apply_env(|key| match key {
            API_KEY_ENV => Some("env-key".to_string()),
            API_URL_ENV => Some("https://env.example/api".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("env-key"));

        config
            .apply_overrides(&ConfigOverrides {
                api_key: Some("cli-key".to_string()),
                api_url: None,
                timeout_secs: Some(5),
            })
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("cli-key"));
        assert_eq!(config.api_url, "https://env.example/api");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let mut config = PulseConfig::default();
        let result = config.apply_overrides(&ConfigOverrides {
            api_url: Some("ftp://nope".to_string()),
            ..ConfigOverrides::default()
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "api_url", .. })
        ));
    }
}
