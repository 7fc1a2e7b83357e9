//! Error types for the index builder
//!
//! Storage failures arrive as [`strata_db_core::Error`] and are classified
//! exactly once, in [`IndexerError::disposition`]. The throttled build loop
//! consults nothing else when deciding whether to retry, retry with a smaller
//! chunk, or give up; every other failure kind surfaces to the caller
//! unchanged.

use strata_db_core::IndexState;
use thiserror::Error;

/// Index builder errors
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Error from the underlying store
    #[error("Store error: {0}")]
    Core(#[from] strata_db_core::Error),

    /// A range submitted as unbuilt overlapped an already-built range
    ///
    /// Recovered locally: the idempotent range walk re-consults the missing
    /// ranges and moves on.
    #[error("Range [{begin}, {end}) contains already-built subranges")]
    RangeAlreadyBuilt {
        /// Requested begin bound (display form)
        begin: String,
        /// Requested end bound (display form)
        end: String,
    },

    /// Another worker holds a live build lease on this index
    #[error("Index build session is locked by another worker")]
    SessionLocked,

    /// This worker's build lease was taken over or torn down
    #[error("Index build session lost")]
    SessionLost,

    /// A source-index build's pre-flight checks failed
    #[error("Source index validation failed: {0}")]
    Validation(String),

    /// The retry budget for a single chunk was exhausted
    #[error("Exceeded {attempts} retries building a range: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts consumed
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// A partial build exists with a different build method
    #[error("Index was partially built {existing}; cannot resume {requested}")]
    BuildMethodMismatch {
        /// Method recorded by the earlier build
        existing: String,
        /// Method this invocation was configured with
        requested: String,
    },

    /// The index lifecycle state changed out from under the build
    #[error("Index is in unexpected state {actual} (expected {expected})")]
    StateMismatch {
        /// State the build required
        expected: &'static str,
        /// State actually observed
        actual: IndexState,
    },

    /// The index is disabled and the configured precondition refuses to build
    #[error("Index is disabled")]
    IndexDisabled,

    /// The named index is not declared in the store's schema
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// Invalid builder configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The build was cancelled cooperatively
    #[error("Index build cancelled")]
    Cancelled,
}

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;

/// What the build loop should do with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Back off and retry the same chunk
    RetrySame,
    /// Halve the chunk size, back off, and retry
    RetrySmaller,
    /// Surface to the caller
    Fatal,
}

impl IndexerError {
    pub(crate) fn disposition(&self) -> Disposition {
        match self {
            IndexerError::Core(e) if e.lessens_work() => Disposition::RetrySmaller,
            IndexerError::Core(e) if e.is_retriable() => Disposition::RetrySame,
            _ => Disposition::Fatal,
        }
    }

    /// Numeric code for structured logs (0 when not a store error)
    pub(crate) fn code(&self) -> u16 {
        match self {
            IndexerError::Core(e) => e.code(),
            _ => 0,
        }
    }

    pub(crate) fn range_already_built(
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> IndexerError {
        let display = |bound: Option<&[u8]>, open: &str| match bound {
            Some(b) => b.iter().map(|x| format!("{x:02x}")).collect::<String>(),
            None => open.to_string(),
        };
        IndexerError::RangeAlreadyBuilt {
            begin: display(begin, "-inf"),
            end: display(end, "+inf"),
        }
    }
}
