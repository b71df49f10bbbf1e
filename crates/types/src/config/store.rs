//! Store engine configuration: durability, batch limits and scan paging.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Upper bound for `max_batch_operations`.
const MAX_BATCH_OPERATIONS_LIMIT: usize = 65_536;

/// Upper bound for `max_key_len`.
const MAX_KEY_LEN_LIMIT: usize = 65_535;

/// Upper bound for `max_value_len`. Encoded entries carry u32 lengths.
const MAX_VALUE_LEN_LIMIT: usize = u32::MAX as usize - 64;

/// Store configuration.
///
/// # Validation Rules
///
/// - `max_batch_operations` must be 1-65536
/// - `max_key_len` must be 1-65535
/// - `max_value_len` must be >= 1 and fit a u32 length prefix
/// - `max_scan_limit` and `scan_page_size` must be >= 1
///
/// # Example
///
/// ```no_run
/// # use proofkv_types::config::StoreConfig;
/// # use std::time::Duration;
/// let config = StoreConfig::builder()
///     .sync_on_commit(false)
///     .max_batch_operations(256)
///     .slow_commit_threshold(Duration::from_millis(50))
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Fsync the log and node store before a commit returns.
    ///
    /// Disabling trades durability of the latest transactions for throughput.
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
    /// Maximum operations in one batch.
    #[serde(default = "default_max_batch_operations")]
    pub max_batch_operations: usize,
    /// Maximum user key length in bytes.
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
    /// Maximum value length in bytes.
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,
    /// Maximum entries returned by one scan or history call.
    #[serde(default = "default_max_scan_limit")]
    pub max_scan_limit: u64,
    /// Entries a lazy scan loads per read-lock acquisition.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    /// Commits slower than this are logged at warn level.
    #[serde(default = "default_slow_commit_threshold")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub slow_commit_threshold: Duration,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any limit is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_sync_on_commit())] sync_on_commit: bool,
        #[builder(default = default_max_batch_operations())] max_batch_operations: usize,
        #[builder(default = default_max_key_len())] max_key_len: usize,
        #[builder(default = default_max_value_len())] max_value_len: usize,
        #[builder(default = default_max_scan_limit())] max_scan_limit: u64,
        #[builder(default = default_scan_page_size())] scan_page_size: usize,
        #[builder(default = default_slow_commit_threshold())] slow_commit_threshold: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            sync_on_commit,
            max_batch_operations,
            max_key_len,
            max_value_len,
            max_scan_limit,
            scan_page_size,
            slow_commit_threshold,
        };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_operations == 0 || self.max_batch_operations > MAX_BATCH_OPERATIONS_LIMIT
        {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_batch_operations must be 1-{}, got {}",
                    MAX_BATCH_OPERATIONS_LIMIT, self.max_batch_operations
                ),
            });
        }
        if self.max_key_len == 0 || self.max_key_len > MAX_KEY_LEN_LIMIT {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_key_len must be 1-{}, got {}",
                    MAX_KEY_LEN_LIMIT, self.max_key_len
                ),
            });
        }
        if self.max_value_len == 0 || self.max_value_len > MAX_VALUE_LEN_LIMIT {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_value_len must be 1-{}, got {}",
                    MAX_VALUE_LEN_LIMIT, self.max_value_len
                ),
            });
        }
        if self.max_scan_limit == 0 {
            return Err(ConfigError::Validation {
                message: "max_scan_limit must be >= 1".to_string(),
            });
        }
        if self.scan_page_size == 0 {
            return Err(ConfigError::Validation {
                message: "scan_page_size must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: default_sync_on_commit(),
            max_batch_operations: default_max_batch_operations(),
            max_key_len: default_max_key_len(),
            max_value_len: default_max_value_len(),
            max_scan_limit: default_max_scan_limit(),
            scan_page_size: default_scan_page_size(),
            slow_commit_threshold: default_slow_commit_threshold(),
        }
    }
}

fn default_sync_on_commit() -> bool {
    true
}

fn default_max_batch_operations() -> usize {
    1024
}

fn default_max_key_len() -> usize {
    1024
}

fn default_max_value_len() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

fn default_max_scan_limit() -> u64 {
    1000
}

fn default_scan_page_size() -> usize {
    128
}

fn default_slow_commit_threshold() -> Duration {
    Duration::from_millis(500)
}
