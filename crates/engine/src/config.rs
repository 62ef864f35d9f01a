//! Engine configuration via `tempora.toml`
//!
//! Every key has a default, so an empty file is a valid configuration. Values
//! are validated eagerly when loaded; a bad zone or a zero-sized pool is
//! reported at startup rather than on first use.

use crate::error::ConfigError;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tempora_core::{parse_zone, ExistenceStrategy, MergeStrategy};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tempora.toml";

/// Snapshot cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether reads populate and consult the cache
    pub enabled: bool,
    /// Maximum number of cached snapshots
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
        }
    }
}

/// Bounded write pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePoolConfig {
    /// Worker threads
    pub threads: usize,
    /// Maximum queued writes before submission fails
    pub queue_depth: usize,
}

impl Default for WritePoolConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            queue_depth: 1024,
        }
    }
}

/// Backoff for writes that lose a commit race
///
/// A retried write starts over: fresh database time, fresh read of the
/// current facts and a fresh merge. Merge and existence failures are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub attempts: u32,
    /// Wait before the first retry, doubled for each further one
    pub backoff_ms: u64,
    /// Longest wait between retries
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 10,
            backoff_cap_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Fail on the first conflict
    pub fn disabled() -> Self {
        Self {
            attempts: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry`, counted from 0
    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        let wait =
            Duration::from_millis(self.backoff_ms).saturating_mul(2u32.saturating_pow(retry));
        wait.min(Duration::from_millis(self.backoff_cap_ms))
    }
}

/// Engine configuration loaded from `tempora.toml`.
///
/// # Example
///
/// ```toml
/// merge_strategy = "existing-facts"
/// existence_strategy = "strict"
/// default_zone = "+00:00"
///
/// [cache]
/// enabled = true
/// capacity = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default merge strategy for writes
    pub merge_strategy: MergeStrategy,
    /// Default existence strategy for writes
    pub existence_strategy: ExistenceStrategy,
    /// Offset used to normalize dates and zone-less datetimes
    pub default_zone: String,
    /// Snapshot cache
    pub cache: CacheConfig,
    /// Bounded write pool
    pub write_pool: WritePoolConfig,
    /// Conflict retry policy
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::default(),
            existence_strategy: ExistenceStrategy::default(),
            default_zone: "+00:00".to_string(),
            cache: CacheConfig::default(),
            write_pool: WritePoolConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse `default_zone`
    ///
    /// # Errors
    ///
    /// Returns an error if the zone is not a UTC offset.
    pub fn zone(&self) -> Result<FixedOffset, ConfigError> {
        parse_zone(&self.default_zone).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check every value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.zone()?;
        if self.write_pool.threads == 0 {
            return Err(ConfigError::Invalid(
                "write_pool.threads must be at least 1".to_string(),
            ));
        }
        if self.write_pool.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "write_pool.queue_depth must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_cap_ms < self.retry.backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.backoff_cap_ms must not be below retry.backoff_ms".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be at least 1 when the cache is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tempora engine configuration
#
# Merge strategy: "existing-facts" (default) or "no-merge"
#   "existing-facts" = a differing value supersedes the stored version
#   "no-merge"       = a differing value fails the write with a merge conflict
merge_strategy = "existing-facts"

# Existence strategy: "strict" (default), "extend" or "ignore"
#   "strict" = facts outside the entity's existence fail the write
#   "extend" = existence is widened to cover the fact
#   "ignore" = the fact is written, existence is left alone
existence_strategy = "strict"

# Offset used to interpret bare dates and zone-less datetimes
default_zone = "+00:00"

[cache]
enabled = true
capacity = 10000

[write_pool]
threads = 2
queue_depth = 1024

# Retries for writes that lose a commit race to a concurrent write
[retry]
attempts = 3
backoff_ms = 10
backoff_cap_ms = 100
"#
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
