//! Configuration for the session store.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default TTL applied to records and indexes on every write or renewal.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default upper bound for configured TTLs.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lower bound for configured TTLs.
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(60);

/// Configuration for the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// TTL given to records and their index sets on create, update and renew.
    pub default_ttl: Duration,

    /// Largest TTL the deployment allows.
    pub max_ttl: Duration,

    /// Smallest TTL the deployment allows.
    pub min_ttl: Duration,

    /// Whether a plain `get` also renews the record and index TTLs.
    /// When false, `get` behaves like `peek`.
    pub renew_on_read: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            min_ttl: DEFAULT_MIN_TTL,
            renew_on_read: true,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the maximum TTL.
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Set the minimum TTL.
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    /// Enable or disable keep-alive on read.
    pub fn with_renew_on_read(mut self, enabled: bool) -> Self {
        self.renew_on_read = enabled;
        self
    }

    /// Check `0 < min_ttl <= default_ttl <= max_ttl`.
    pub fn validate(&self) -> Result<()> {
        if self.min_ttl.is_zero() {
            return Err(Error::InvalidConfig("min TTL must be positive".into()));
        }
        if self.default_ttl < self.min_ttl {
            return Err(Error::InvalidConfig(format!(
                "default TTL {:?} is below min TTL {:?}",
                self.default_ttl, self.min_ttl
            )));
        }
        if self.default_ttl > self.max_ttl {
            return Err(Error::InvalidConfig(format!(
                "default TTL {:?} exceeds max TTL {:?}",
                self.default_ttl, self.max_ttl
            )));
        }
        Ok(())
    }
}
