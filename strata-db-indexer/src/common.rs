//! State shared across one build
//!
//! [`IndexingCommon`] is owned by the orchestrator and handed to the active
//! strategy as an `Arc` for the duration of a single build. It carries the
//! database handle, the target index, the mutable configuration cell, the
//! session slot, and the cooperative cancellation channel.

use crate::config::{ConfigLoader, OnlineIndexerConfig};
use crate::error::{IndexerError, Result};
use crate::range_set::RangeSet;
use crate::session::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strata_db_core::{IndexDescriptor, KvDatabase, KvTransaction, RecordStore};
use tokio::sync::watch;
use tracing::info;

/// How an index is being built, persisted as the index's build marker
///
/// A partially built range set is only meaningful against the key space it
/// was built over, so resuming with a different method must be refused, not
/// silently merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IndexingMethod {
    /// Scanning the record store's primary key space
    ByRecords,
    /// Scanning the key space of a readable source index
    ByIndex {
        /// Name of the source index
        source_index: String,
    },
}

impl IndexingMethod {
    fn describe(&self) -> String {
        match self {
            IndexingMethod::ByRecords => "by_records".to_string(),
            IndexingMethod::ByIndex { source_index } => format!("by_index({source_index})"),
        }
    }
}

/// Persist the build method, or fail if a different method already started
pub(crate) async fn check_or_write_method<T: KvTransaction>(
    txn: &mut T,
    store: &RecordStore,
    index: &str,
    method: &IndexingMethod,
) -> Result<()> {
    let key = store.spec().index_type_key(index);
    match txn.get(&key).await? {
        Some(bytes) => {
            let existing: IndexingMethod = serde_json::from_slice(&bytes)
                .map_err(|e| strata_db_core::Error::Serialization(e.to_string()))?;
            if existing == *method {
                Ok(())
            } else {
                Err(IndexerError::BuildMethodMismatch {
                    existing: existing.describe(),
                    requested: method.describe(),
                })
            }
        }
        None => {
            txn.set(&key, &serde_json::to_vec(method).expect("method marker serializes"));
            Ok(())
        }
    }
}

/// Cooperative cancellation handle for a running build
///
/// Cancellation between chunks is immediate; within a chunk it takes effect
/// before the next transaction attempt.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

pub(crate) struct IndexingCommon<D: KvDatabase> {
    pub db: Arc<D>,
    pub store: RecordStore,
    pub index: Arc<IndexDescriptor>,
    /// Stored record types the build must scan (synthetic types expanded)
    pub stored_types: Vec<String>,
    pub track_progress: bool,
    pub total_scanned: AtomicU64,
    config: Mutex<OnlineIndexerConfig>,
    config_loader: Option<ConfigLoader>,
    loader_invocations: AtomicU32,
    session: Mutex<Option<Session>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    last_progress_log: Mutex<Option<Instant>>,
}

impl<D: KvDatabase> IndexingCommon<D> {
    pub fn new(
        db: Arc<D>,
        store: RecordStore,
        index: Arc<IndexDescriptor>,
        stored_types: Vec<String>,
        config: OnlineIndexerConfig,
        config_loader: Option<ConfigLoader>,
        track_progress: bool,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        IndexingCommon {
            db,
            store,
            index,
            stored_types,
            track_progress,
            total_scanned: AtomicU64::new(0),
            config: Mutex::new(config),
            config_loader,
            loader_invocations: AtomicU32::new(0),
            session: Mutex::new(None),
            cancel_tx: Arc::new(cancel_tx),
            last_progress_log: Mutex::new(None),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index.name
    }

    /// Run the config loader (when installed) and return the config in force
    pub fn load_config(&self) -> OnlineIndexerConfig {
        let mut config = self.config.lock();
        if let Some(loader) = &self.config_loader {
            self.loader_invocations.fetch_add(1, Ordering::Relaxed);
            *config = loader(&config);
        }
        config.clone()
    }

    /// Current config without consulting the loader
    pub fn config(&self) -> OnlineIndexerConfig {
        self.config.lock().clone()
    }

    pub fn loader_invocations(&self) -> u32 {
        self.loader_invocations.load(Ordering::Relaxed)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { tx: Arc::clone(&self.cancel_tx) }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if *self.cancel_tx.borrow() {
            Err(IndexerError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    /// Range set of the target index
    pub fn range_set(&self) -> RangeSet {
        RangeSet::new(
            self.store
                .spec()
                .index_range_subspace(&self.index.name),
        )
    }

    pub fn lock_key(&self) -> Vec<u8> {
        self.store.spec().index_lock_key(&self.index.name)
    }

    /// Emit an interval-gated progress log after a successful chunk
    pub fn maybe_log_progress(&self, config: &OnlineIndexerConfig, limit: usize) {
        if config.progress_log_interval_millis < 0 {
            return;
        }
        let mut last = self.last_progress_log.lock();
        let due = last.is_none_or(|at| {
            at.elapsed().as_millis() as i64 >= config.progress_log_interval_millis
        });
        if due {
            *last = Some(Instant::now());
            info!(
                index = self.index_name(),
                records_scanned = self.total_scanned.load(Ordering::Relaxed),
                records_per_transaction = limit,
                "online index build progress"
            );
        }
    }
}
