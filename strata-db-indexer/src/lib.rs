//! # Strata DB Indexer
//!
//! Online secondary index building for Strata record stores: populate an
//! index concurrently with foreground reads and writes, without taking the
//! store offline. This crate provides:
//!
//! - The [`OnlineIndexer`] orchestrator and its builder
//! - A persistent [`RangeSet`] recording exactly which key ranges have been
//!   reflected into the index
//! - An adaptive throttled retry loop (chunk sizing, backoff, rate pacing)
//! - A cross-worker [`Session`] lease so only one builder spends I/O per
//!   index
//! - Durable build progress tracking
//!
//! ## Design
//!
//! A build advances through the key space in bounded chunks, one store
//! transaction each. Every committed chunk records its interval in the range
//! set and its scanned count in the progress counter, inside the same
//! transaction -- the range set is the checkpoint, and partial progress is
//! never rolled back across chunk boundaries. Workers on different machines
//! coordinate purely through these store-resident structures.
//!
//! Two strategies exist: scanning the record store's primary key space (the
//! default) and scanning a readable idempotent source index. The orchestrator
//! can fall back from the latter to the former when pre-flight validation
//! fails.

mod by_index;
mod by_records;
mod common;
pub mod config;
pub mod error;
pub mod indexer;
pub mod precondition;
pub mod progress;
pub mod range_set;
pub mod session;
mod throttle;

pub use common::{CancelHandle, IndexingMethod};
pub use config::{
    ConfigLoader, OnlineIndexerConfig, DEFAULT_LEASE_LENGTH_MILLIS, DEFAULT_LIMIT,
    DEFAULT_MAX_RETRIES, DEFAULT_PROGRESS_LOG_INTERVAL_MILLIS, DEFAULT_RECORDS_PER_SECOND,
    DEFAULT_WRITE_LIMIT_BYTES, DO_NOT_RE_INCREASE_LIMIT,
};
pub use error::{IndexerError, Result};
pub use indexer::{
    check_any_ongoing_online_index_build, stop_ongoing_online_index_builds, OnlineIndexer,
    OnlineIndexerBuilder, SourceIndexPolicy,
};
pub use precondition::IndexStatePrecondition;
pub use progress::{load_index_build_state, IndexBuildState};
pub use range_set::RangeSet;
pub use session::{check_active_session, end_any_session, Session};
