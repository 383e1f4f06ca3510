//! Configuration for the page store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of page versions retained per session.
pub const DEFAULT_MAX_VERSIONS: usize = 4;

/// Default timeout applied to every backend call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of compare-and-swap attempts on the tracking record.
pub const DEFAULT_CAS_MAX_ATTEMPTS: u32 = 8;

/// Default initial backoff between compare-and-swap attempts (doubles per attempt).
pub const DEFAULT_CAS_BACKOFF: Duration = Duration::from_millis(1);

/// Configuration for the page store.
#[derive(Debug, Clone)]
pub struct PageStoreConfig {
    /// Maximum number of page versions retained per session, across all pages.
    /// The oldest write is evicted once a session exceeds this.
    pub max_versions: usize,

    /// Timeout for each individual backend call.
    pub op_timeout: Duration,

    /// Compare-and-swap attempts on the tracking record before giving up.
    pub cas_max_attempts: u32,

    /// Backoff before the second attempt; doubled for each further attempt.
    pub cas_backoff: Duration,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self {
            max_versions: DEFAULT_MAX_VERSIONS,
            op_timeout: DEFAULT_OP_TIMEOUT,
            cas_max_attempts: DEFAULT_CAS_MAX_ATTEMPTS,
            cas_backoff: DEFAULT_CAS_BACKOFF,
        }
    }
}

impl PageStoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-session version quota.
    pub fn with_max_versions(mut self, max: usize) -> Self {
        self.max_versions = max;
        self
    }

    /// Set the timeout for backend calls.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the number of compare-and-swap attempts.
    pub fn with_cas_max_attempts(mut self, attempts: u32) -> Self {
        self.cas_max_attempts = attempts;
        self
    }

    /// Set the initial compare-and-swap backoff.
    pub fn with_cas_backoff(mut self, backoff: Duration) -> Self {
        self.cas_backoff = backoff;
        self
    }

    /// Check that the configuration can drive a store.
    pub fn validate(&self) -> Result<()> {
        if self.max_versions == 0 {
            return Err(Error::InvalidArgument(
                "max_versions must be at least 1".to_string(),
            ));
        }
        if self.cas_max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "cas_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.op_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "op_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the `[page_store]` table out of a TOML document.
    ///
    /// Other tables are ignored so the section can live in a host
    /// application's config file. A missing table yields defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(input)?;
        Ok(file.page_store.into())
    }
}

/// Serializable form of [`PageStoreConfig`].
///
/// ```toml
/// [page_store]
/// max_versions = 4
/// op_timeout_ms = 5000
/// cas_max_attempts = 8
/// cas_backoff_ms = 1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageStoreSection {
    /// Maximum number of page versions retained per session.
    pub max_versions: usize,
    /// Backend call timeout in milliseconds.
    pub op_timeout_ms: u64,
    /// Compare-and-swap attempts on the tracking record.
    pub cas_max_attempts: u32,
    /// Initial compare-and-swap backoff in milliseconds.
    pub cas_backoff_ms: u64,
}

impl Default for PageStoreSection {
    fn default() -> Self {
        PageStoreConfig::default().into()
    }
}

impl From<PageStoreSection> for PageStoreConfig {
    fn from(section: PageStoreSection) -> Self {
        Self {
            max_versions: section.max_versions,
            op_timeout: Duration::from_millis(section.op_timeout_ms),
            cas_max_attempts: section.cas_max_attempts,
            cas_backoff: Duration::from_millis(section.cas_backoff_ms),
        }
    }
}

impl From<PageStoreConfig> for PageStoreSection {
    fn from(config: PageStoreConfig) -> Self {
        Self {
            max_versions: config.max_versions,
            op_timeout_ms: config.op_timeout.as_millis() as u64,
            cas_max_attempts: config.cas_max_attempts,
            cas_backoff_ms: config.cas_backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    page_store: PageStoreSection,
}
