//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [store]      # key-value backend
//! [session]    # TTL bounds and keep-alive
//! [logging]    # console and file output
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// override of just `[session]`) can be loaded and merged. Use the accessor
/// methods to get a section with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UesmConfig {
    /// Backend selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    /// Session lifecycle settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl UesmConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config with every section present and set to its defaults.
    ///
    /// This is what `uesm config init` writes.
    pub fn with_defaults() -> Self {
        Self {
            store: Some(StoreConfig {
                url: Some(DEFAULT_REDIS_URL.to_string()),
                ..StoreConfig::default()
            }),
            session: Some(SessionSection::default()),
            logging: Some(LoggingConfig::default()),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Merging is per section: a section present in `other` replaces the
    /// whole section here.
    pub fn merge(&mut self, other: UesmConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective `[store]` section.
    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Effective `[session]` section.
    pub fn session(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    /// Effective `[logging]` section.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Check the effective config for out-of-range or inconsistent values.
    pub fn validate(&self) -> Result<()> {
        self.store().validate()?;
        self.session().validate()?;
        self.logging().validate()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// URL written by `config init` for the redis backend.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Which key-value backend holds the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process store. Sessions do not survive a restart.
    #[default]
    Memory,
    /// Shared Redis server.
    Redis,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Redis => write!(f, "redis"),
        }
    }
}

/// Backend selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind.
    pub backend: BackendKind,
    /// Connection URL; required for `redis`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Redis
            && self.url.as_deref().is_none_or(|url| url.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "store.url",
                "required when store.backend is \"redis\"",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle settings.
///
/// ```toml
/// [session]
/// default_ttl_secs = 1800
/// max_ttl_secs = 86400
/// min_ttl_secs = 60
/// renew_on_read = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// TTL applied on create, update and renewal.
    pub default_ttl_secs: u64,
    /// Upper bound for the default TTL.
    pub max_ttl_secs: u64,
    /// Lower bound for the default TTL.
    pub min_ttl_secs: u64,
    /// Whether a read renews the session TTL.
    pub renew_on_read: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: 30 * 60,
            max_ttl_secs: 24 * 60 * 60,
            min_ttl_secs: 60,
            renew_on_read: true,
        }
    }
}

impl SessionSection {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.min_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "session.min_ttl_secs",
                "must be greater than zero",
            ));
        }
        if self.default_ttl_secs < self.min_ttl_secs {
            return Err(ConfigError::invalid(
                "session.default_ttl_secs",
                format!("{} is below min_ttl_secs ({})", self.default_ttl_secs, self.min_ttl_secs),
            ));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(ConfigError::invalid(
                "session.default_ttl_secs",
                format!("{} is above max_ttl_secs ({})", self.default_ttl_secs, self.max_ttl_secs),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the console (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit console logs as JSON.
    pub json: bool,
    /// Directory for daily-rolling JSON log files. No file output when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        let level = self.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.level, LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
