//! Runtime configuration.
//!
//! Loaded from YAML (every field defaulted), then overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gaptrack_core::RewriteOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Human-readable durations ("5s", "250ms", "24h").
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("gaptrack.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Upper bounds on every store and cache call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_duration")]
    pub store: Duration,
    #[serde(with = "humantime_duration")]
    pub cache: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(5),
            cache: Duration::from_millis(250),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
    /// Options used by `rewrite_prompt` when a request carries none
    pub rewrite: RewriteOptions,
    /// Register the default rule set when opening
    pub seed_default_rules: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            rewrite: RewriteOptions::default(),
            seed_default_rules: true,
        }
    }
}

impl RuntimeConfig {
    /// In-memory store, cache enabled. Handy for tests and one-off runs.
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Apply `GAPTRACK_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GAPTRACK_STORE_PATH") {
            self.store.backend = StoreBackend::Sqlite;
            self.store.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("GAPTRACK_CACHE_TTL") {
            self.cache.ttl = parse_duration("GAPTRACK_CACHE_TTL", &raw)?;
        }

        if let Some(raw) = lookup("GAPTRACK_STORE_TIMEOUT") {
            self.timeouts.store = parse_duration("GAPTRACK_STORE_TIMEOUT", &raw)?;
        }

        if let Some(raw) = lookup("GAPTRACK_CACHE_ENABLED") {
            self.cache.enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "GAPTRACK_CACHE_ENABLED".to_string(),
                        message: format!("expected a boolean, got '{}'", raw),
                    })
                }
            };
        }

        Ok(())
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
