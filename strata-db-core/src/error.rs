//! Error types for strata-db-core
//!
//! All storage-level failures are normalized into [`Error`]. The retry
//! machinery upstream keys off three questions answered here: is the failure
//! transient ([`Error::is_retriable`]), and would a smaller unit of work
//! plausibly get through ([`Error::lessens_work`]).

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core storage error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Conflict-serializable commit failed because another transaction
    /// modified a key in this transaction's read set
    #[error("Transaction conflict")]
    Conflict,

    /// The transaction accumulated more mutations than the store accepts
    #[error("Transaction too large ({bytes} bytes)")]
    TransactionTooLarge {
        /// Total mutation volume at commit time
        bytes: usize,
    },

    /// A single write exceeded the store's value size limit
    #[error("Write too large")]
    WriteTooLarge,

    /// The transaction outlived the store's transaction deadline
    #[error("Transaction timed out")]
    TransactionTimedOut,

    /// The commit outcome is unknown; it may or may not have been applied
    #[error("Commit result unknown")]
    CommitUnknownResult,

    /// A read version could not be obtained
    #[error("Read version unavailable")]
    ReadVersionUnavailable,

    /// The transaction was already committed or abandoned
    #[error("Transaction is no longer usable")]
    TransactionClosed,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A key failed to decode as a tuple
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether retrying the same work may succeed.
    ///
    /// Note that `CommitUnknownResult` is retriable only when the caller's
    /// work is idempotent, or when duplication is detected by some other
    /// layer (the index builder's range set plays that role).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Conflict
                | Error::CommitUnknownResult
                | Error::ReadVersionUnavailable
                | Error::TransactionTooLarge { .. }
                | Error::WriteTooLarge
                | Error::TransactionTimedOut
        )
    }

    /// Whether the failure signals that a retry should attempt less work
    pub fn lessens_work(&self) -> bool {
        matches!(
            self,
            Error::TransactionTooLarge { .. } | Error::WriteTooLarge | Error::TransactionTimedOut
        )
    }

    /// Stable numeric code, used in structured retry logs
    pub fn code(&self) -> u16 {
        match self {
            Error::Conflict => 1020,
            Error::TransactionTooLarge { .. } => 2101,
            Error::WriteTooLarge => 2103,
            Error::TransactionTimedOut => 1031,
            Error::CommitUnknownResult => 1021,
            Error::ReadVersionUnavailable => 1037,
            Error::TransactionClosed => 2001,
            Error::NotFound(_) => 2404,
            Error::InvalidKey(_) => 2201,
            Error::Serialization(_) => 2202,
            Error::Other(_) => 2000,
        }
    }
}
