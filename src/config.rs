//! Configuration for memory observation.
//!
//! This module handles loading and validating the observer configuration
//! from files and the environment. Files may be YAML, JSON or TOML. The
//! environment is read once by the caller that assembles the configuration;
//! observers only ever see the resolved [`ObserverConfig`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable overriding the default sampling interval.
pub const SAMPLING_INTERVAL_ENV: &str = "MEMORY_OBSERVATION_DEFAULT_SAMPLING_INTERVAL";

pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(1);

/// Locations searched when no configuration file is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 4] = [
    "/etc/memcmd/memcmd.yaml",
    "/etc/memcmd/memcmd.yml",
    "./memcmd.yaml",
    "./memcmd.yml",
];

/// Resolved observer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// When false, observation is replaced by a no-op observer.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Period between samples on platforms that sample continuously.
    #[serde(
        default = "default_sampling_interval",
        alias = "sampling-interval",
        with = "humantime_serde"
    )]
    pub sampling_interval: Duration,
}

fn default_enabled() -> bool {
    true
}
fn default_sampling_interval() -> Duration {
    DEFAULT_SAMPLING_INTERVAL
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sampling_interval: default_sampling_interval(),
        }
    }
}

impl ObserverConfig {
    /// Defaults with the environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Applies `MEMORY_OBSERVATION_DEFAULT_SAMPLING_INTERVAL` if it is set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let value = std::env::var(SAMPLING_INTERVAL_ENV).ok();
        self.apply_interval_override(value.as_deref())
    }

    fn apply_interval_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => {
                self.sampling_interval = parse_sampling_interval(v)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Parses a human readable duration such as `1ms`, `500us` or `2s`.
pub fn parse_sampling_interval(value: &str) -> Result<Duration, ConfigError> {
    let interval = humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::InvalidInterval(format!("{:?}: {}", value, e)))?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval(format!(
            "{:?}: must be positive",
            value
        )));
    }
    Ok(interval)
}

/// Validates an effective configuration.
pub fn validate_config(cfg: &ObserverConfig) -> Result<(), ConfigError> {
    if cfg.sampling_interval.is_zero() {
        return Err(ConfigError::InvalidInterval(
            "sampling_interval must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Loads configuration from `path`, or from the first default location that
/// exists. Returns defaults when there is no file.
pub fn load_config(path: Option<&Path>) -> Result<ObserverConfig, ConfigError> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.exists()) {
            Some(p) => p.to_path_buf(),
            None => return Ok(ObserverConfig::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = parse_config(&path, &content)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses configuration text, choosing the format from the file extension.
pub fn parse_config(path: &Path, content: &str) -> Result<ObserverConfig, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        Some("toml") => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
        // Default to YAML
        _ => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid sampling interval {0}")]
    InvalidInterval(String),
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

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
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
