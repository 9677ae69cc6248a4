//! Configuration for the hub core
//!
//! Defaults, a TOML file, or `HUB_*` environment overrides. Durations are
//! written in humantime form (`"7days"`, `"250ms"`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub invitations: InvitationConfig,
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}

/// Client-local session state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Cache key holding the persisted current hub id
    pub current_hub_key: String,

    /// JSON file backing the local cache. In-memory when unset.
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvitationConfig {
    /// Lifetime of a new invitation
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Subscribe to change notifications for the current hub
    pub enabled: bool,

    /// Quiet period used to batch a burst of notifications into one reload
    #[serde(with = "humantime_serde")]
    pub coalesce_window: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_timestamp: bool,

    pub with_target: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            current_hub_key: "current_hub_id".to_string(),
            cache_path: None,
        }
    }
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            coalesce_window: Duration::from_millis(250),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `HUB_<SECTION>_<KEY>`, for example
    /// `HUB_INVITATION_TTL=3days` or `HUB_REALTIME_ENABLED=false`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HUB_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("HUB_SESSION_CURRENT_HUB_KEY") {
            self.session.current_hub_key = key;
        }
        if let Some(path) = lookup("HUB_SESSION_CACHE_PATH") {
            self.session.cache_path = Some(PathBuf::from(path));
        }

        if let Some(ttl) = lookup("HUB_INVITATION_TTL") {
            self.invitations.ttl = parse_duration("HUB_INVITATION_TTL", &ttl)?;
        }

        if let Some(enabled) = lookup("HUB_REALTIME_ENABLED") {
            self.realtime.enabled = parse_bool("HUB_REALTIME_ENABLED", &enabled)?;
        }
        if let Some(window) = lookup("HUB_REALTIME_COALESCE_WINDOW") {
            self.realtime.coalesce_window =
                parse_duration("HUB_REALTIME_COALESCE_WINDOW", &window)?;
        }

        if let Some(level) = lookup("HUB_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(json) = lookup("HUB_LOG_JSON") {
            self.logging.json_format = parse_bool("HUB_LOG_JSON", &json)?;
        }

        Ok(())
    }

    /// Load configuration from a TOML file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.current_hub_key.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "session.current_hub_key must not be empty".to_string(),
            ));
        }

        if self.invitations.ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "invitations.ttl must be greater than 0".to_string(),
            ));
        }

        if self.realtime.coalesce_window > Duration::from_secs(60) {
            return Err(ConfigError::ValidationFailed(
                "realtime.coalesce_window must not exceed 60s".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

fn parse_duration(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    value.parse().map_err(|e: std::str::ParseBoolError| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}
