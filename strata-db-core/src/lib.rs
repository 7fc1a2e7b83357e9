//! # Strata DB Core
//!
//! Core abstractions for Strata: an ordered, transactional key-value store
//! interface, tuple keys and subspaces, and the record store facade with
//! inline secondary index maintenance.
//!
//! Higher layers (notably `strata-db-indexer`) are generic over
//! [`KvDatabase`], so they run unchanged against any conforming backend;
//! [`MemoryKv`] is the in-crate reference backend used by tests and embedded
//! callers.

pub mod error;
pub mod key;
pub mod kv;
pub mod record;
pub mod subspace;

pub use error::{Error, Result};
pub use key::{interpolate_boundaries, strinc, successor, Element, Key, KeyRange};
pub use kv::{
    decode_le64, CommitFault, CommitFaultHook, KeyValue, KvDatabase, KvTransaction, MemoryKv,
    MemoryTransaction, TransactionPriority, VERSIONS_PER_MILLISECOND,
};
pub use record::{
    FieldPlanner, IndexDescriptor, IndexEntry, IndexEntryPlanner, IndexState, Record,
    RecordStore, RecordTypeDef, Schema, StoreSpec,
};
pub use subspace::Subspace;
