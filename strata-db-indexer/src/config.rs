//! Online indexer configuration
//!
//! [`OnlineIndexerConfig`] holds the parameters that are safe to change while
//! a build is running. A [`ConfigLoader`] installed on the builder is invoked
//! before every chunk transaction and may return an updated configuration;
//! this is the recommended way to tune a long build without restarting it.

use crate::error::{IndexerError, Result};
use std::sync::Arc;

/// Default number of records to attempt in a single transaction
pub const DEFAULT_LIMIT: usize = 100;
/// Default transaction write budget in bytes (the final record may overshoot
/// by one entry set)
pub const DEFAULT_WRITE_LIMIT_BYTES: usize = 900_000;
/// Default number of retries for a single range build
pub const DEFAULT_MAX_RETRIES: u32 = 100;
/// Default number of records to process in a single second
pub const DEFAULT_RECORDS_PER_SECOND: usize = 10_000;
/// Default progress log interval; negative disables progress logs
pub const DEFAULT_PROGRESS_LOG_INTERVAL_MILLIS: i64 = -1;
/// Sentinel for "never re-increase the limit after successes"
pub const DO_NOT_RE_INCREASE_LIMIT: i32 = -1;
/// Default lease length for the build session
pub const DEFAULT_LEASE_LENGTH_MILLIS: u64 = 10_000;

/// First retry delay in milliseconds
pub(crate) const INITIAL_DELAY_MILLIS: u64 = 2;
/// Retry delay cap in milliseconds
pub(crate) const MAX_DELAY_MILLIS: u64 = 1_000;

/// Runtime-mutable build parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineIndexerConfig {
    /// Maximum records per transaction; the adaptive limit never exceeds this
    pub max_limit: usize,
    /// Approximate write budget per transaction in bytes
    pub max_write_limit_bytes: usize,
    /// Retry budget for a single range build
    pub max_retries: u32,
    /// Rate-pacing target in records per second
    pub records_per_second: usize,
    /// Minimum millis between progress logs; negative disables them
    pub progress_log_interval_millis: i64,
    /// Consecutive successes before the limit is allowed to grow again;
    /// [`DO_NOT_RE_INCREASE_LIMIT`] keeps it down for good
    pub increase_limit_after: i32,
}

impl Default for OnlineIndexerConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_LIMIT,
            max_write_limit_bytes: DEFAULT_WRITE_LIMIT_BYTES,
            max_retries: DEFAULT_MAX_RETRIES,
            records_per_second: DEFAULT_RECORDS_PER_SECOND,
            progress_log_interval_millis: DEFAULT_PROGRESS_LOG_INTERVAL_MILLIS,
            increase_limit_after: DO_NOT_RE_INCREASE_LIMIT,
        }
    }
}

impl OnlineIndexerConfig {
    /// Set the maximum records per transaction
    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// Set the per-transaction write budget in bytes
    pub fn with_max_write_limit_bytes(mut self, bytes: usize) -> Self {
        self.max_write_limit_bytes = bytes;
        self
    }

    /// Set the retry budget for a single range build
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the rate-pacing target
    pub fn with_records_per_second(mut self, rps: usize) -> Self {
        self.records_per_second = rps;
        self
    }

    /// Set the progress log interval (negative disables, 0 logs every commit)
    pub fn with_progress_log_interval_millis(mut self, millis: i64) -> Self {
        self.progress_log_interval_millis = millis;
        self
    }

    /// Set the success streak needed before the limit re-increases
    pub fn with_increase_limit_after(mut self, successes: i32) -> Self {
        self.increase_limit_after = successes;
        self
    }

    /// Reject configurations the build loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 {
            return Err(IndexerError::InvalidConfig("max_limit must be positive".into()));
        }
        if self.max_retries == 0 {
            return Err(IndexerError::InvalidConfig("max_retries must be positive".into()));
        }
        if self.records_per_second == 0 {
            return Err(IndexerError::InvalidConfig(
                "records_per_second must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Reloads the mutable configuration before each chunk transaction
///
/// Receives the configuration currently in force and returns the one to use
/// for the next transaction.
pub type ConfigLoader = Arc<dyn Fn(&OnlineIndexerConfig) -> OnlineIndexerConfig + Send + Sync>;
