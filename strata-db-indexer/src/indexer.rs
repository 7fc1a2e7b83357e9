//! Online index build orchestration
//!
//! [`OnlineIndexer`] owns the end-to-end `build_index` operation: evaluate
//! the state-precondition gate, acquire the build session, drive the chosen
//! strategy chunk by chunk, and finally promote the index to readable. It is
//! built through [`OnlineIndexerBuilder`], which validates configuration and
//! resolves the target index against the store's schema.
//!
//! One indexer instance builds one index. Parallelism across machines comes
//! from running more instances: the range set keeps them from duplicating
//! work and the session lease keeps all but one of them from wasting I/O.

use crate::by_records::IndexingByRecords;
use crate::by_index::IndexingByIndex;
use crate::common::{CancelHandle, IndexingCommon};
use crate::config::{ConfigLoader, OnlineIndexerConfig, DEFAULT_LEASE_LENGTH_MILLIS};
use crate::error::{IndexerError, Result};
use crate::precondition::{evaluate, GateDecision, IndexStatePrecondition};
use crate::session::{check_active_session, end_any_session, Session};
use crate::throttle::ThrottledRunner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use strata_db_core::{
    IndexState, Key, KeyRange, KvDatabase, KvTransaction, RecordStore, TransactionPriority,
};
use tracing::{info, warn};

/// Policy for building from an existing source index
#[derive(Debug, Clone)]
pub struct SourceIndexPolicy {
    source_index: Option<String>,
    allow_record_scan: bool,
}

impl SourceIndexPolicy {
    /// No source index; build by scanning records
    pub fn inactive() -> Self {
        SourceIndexPolicy { source_index: None, allow_record_scan: true }
    }

    /// Build by scanning the named source index, falling back to a record
    /// scan if the source turns out to be unusable
    pub fn from_source(source_index: impl Into<String>) -> Self {
        SourceIndexPolicy {
            source_index: Some(source_index.into()),
            allow_record_scan: true,
        }
    }

    /// Refuse to fall back: an unusable source surfaces as a validation
    /// error instead
    pub fn forbid_record_scan(mut self) -> Self {
        self.allow_record_scan = false;
        self
    }

    /// The configured source index, if any
    pub fn source_index(&self) -> Option<&str> {
        self.source_index.as_deref()
    }

    /// Whether fallback to a record scan is permitted
    pub fn allow_record_scan(&self) -> bool {
        self.allow_record_scan
    }

    /// Whether a source index is configured
    pub fn is_active(&self) -> bool {
        self.source_index.is_some()
    }
}

/// Builder for [`OnlineIndexer`]
pub struct OnlineIndexerBuilder<D: KvDatabase> {
    db: Option<Arc<D>>,
    store: Option<RecordStore>,
    index_name: Option<String>,
    config: OnlineIndexerConfig,
    config_loader: Option<ConfigLoader>,
    state_precondition: IndexStatePrecondition,
    use_synchronized_session: bool,
    lease_length_millis: u64,
    track_progress: bool,
    source_index_policy: SourceIndexPolicy,
}

impl<D: KvDatabase> Default for OnlineIndexerBuilder<D> {
    fn default() -> Self {
        OnlineIndexerBuilder {
            db: None,
            store: None,
            index_name: None,
            config: OnlineIndexerConfig::default(),
            config_loader: None,
            state_precondition: IndexStatePrecondition::default(),
            use_synchronized_session: true,
            lease_length_millis: DEFAULT_LEASE_LENGTH_MILLIS,
            track_progress: true,
            source_index_policy: SourceIndexPolicy::inactive(),
        }
    }
}

impl<D: KvDatabase> OnlineIndexerBuilder<D> {
    /// Fresh builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database to build against
    pub fn with_database(mut self, db: Arc<D>) -> Self {
        self.db = Some(db);
        self
    }

    /// Set the record store holding the target index
    pub fn with_store(mut self, store: RecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the index to build
    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Set the initial mutable configuration
    pub fn with_config(mut self, config: OnlineIndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a per-transaction configuration loader
    pub fn with_config_loader(mut self, loader: ConfigLoader) -> Self {
        self.config_loader = Some(loader);
        self
    }

    /// Set how the build reacts to the index's current lifecycle state
    pub fn with_state_precondition(mut self, precondition: IndexStatePrecondition) -> Self {
        self.state_precondition = precondition;
        self
    }

    /// Enable or disable the cross-worker build session
    ///
    /// Disabling is permitted but not recommended: racing builders stay
    /// correct (the range set guarantees that) but burn I/O against each
    /// other indefinitely.
    pub fn with_synchronized_session(mut self, use_session: bool) -> Self {
        self.use_synchronized_session = use_session;
        self
    }

    /// Set the session lease length in milliseconds
    pub fn with_lease_length_millis(mut self, millis: u64) -> Self {
        self.lease_length_millis = millis;
        self
    }

    /// Enable or disable the durable scanned-records counter
    pub fn with_track_progress(mut self, track: bool) -> Self {
        self.track_progress = track;
        self
    }

    /// Set the source-index build policy
    pub fn with_source_index_policy(mut self, policy: SourceIndexPolicy) -> Self {
        self.source_index_policy = policy;
        self
    }

    /// Validate and build the indexer
    pub fn build(self) -> Result<OnlineIndexer<D>> {
        let db = self
            .db
            .ok_or_else(|| IndexerError::InvalidConfig("database must be set".into()))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::InvalidConfig("record store must be set".into()))?;
        let index_name = self
            .index_name
            .ok_or_else(|| IndexerError::InvalidConfig("index must be set".into()))?;
        self.config.validate()?;

        let index = store
            .spec()
            .schema
            .index(&index_name)
            .ok_or_else(|| IndexerError::UnknownIndex(index_name.clone()))?
            .clone();
        if let Some(source) = self.source_index_policy.source_index() {
            if source == index.name {
                return Err(IndexerError::InvalidConfig(
                    "an index cannot be its own source".into(),
                ));
            }
        }
        // The build scans stored types; synthetic types contribute their
        // base types instead of themselves.
        let stored_types = store.spec().schema.expand_to_stored_types(&index.record_types);

        let common = Arc::new(IndexingCommon::new(
            db,
            store,
            index,
            stored_types,
            self.config,
            self.config_loader,
            self.track_progress,
        ));
        Ok(OnlineIndexer {
            runner: ThrottledRunner::new(Arc::clone(&common)),
            common,
            state_precondition: self.state_precondition,
            use_synchronized_session: self.use_synchronized_session,
            lease_length_millis: self.lease_length_millis,
            source_index_policy: self.source_index_policy,
            fallback_to_records: false,
        })
    }
}

/// Builds one index online, concurrently with foreground traffic
pub struct OnlineIndexer<D: KvDatabase> {
    common: Arc<IndexingCommon<D>>,
    runner: ThrottledRunner<D>,
    state_precondition: IndexStatePrecondition,
    use_synchronized_session: bool,
    lease_length_millis: u64,
    source_index_policy: SourceIndexPolicy,
    fallback_to_records: bool,
}

impl<D: KvDatabase> OnlineIndexer<D> {
    /// Start configuring an indexer
    pub fn builder() -> OnlineIndexerBuilder<D> {
        OnlineIndexerBuilder::new()
    }

    /// Build the index across multiple transactions
    ///
    /// Evaluates the state precondition, acquires the build session (when
    /// enabled), drives the configured strategy until the range set is fully
    /// built, and marks the index readable. Fails with
    /// [`IndexerError::SessionLocked`] when another worker holds a live
    /// session on the same index.
    pub async fn build_index(&mut self) -> Result<()> {
        match self.build_index_attempt().await {
            Err(IndexerError::Validation(message))
                if self.source_index_policy.is_active()
                    && self.source_index_policy.allow_record_scan()
                    && !self.fallback_to_records =>
            {
                warn!(
                    index = self.common.index_name(),
                    error = %message,
                    "source index unusable; falling back to a record scan"
                );
                self.fallback_to_records = true;
                self.build_index_attempt().await
            }
            other => other,
        }
    }

    async fn build_index_attempt(&mut self) -> Result<()> {
        let common = Arc::clone(&self.common);
        let index_name = common.index.name.clone();

        // Gate: read the lifecycle state and apply the configured
        // precondition in one transaction.
        let decision = {
            let mut txn = common.db.begin(TransactionPriority::Batch).await?;
            let state = common.store.index_state(&mut txn, &index_name).await?;
            let decision = evaluate(self.state_precondition, state)?;
            if let GateDecision::Proceed { clear_first } = decision {
                if state != IndexState::WriteOnly {
                    common
                        .store
                        .set_index_state(&mut txn, &index_name, IndexState::WriteOnly)
                        .await?;
                }
                if clear_first {
                    common.store.clear_index_data(&mut txn, &index_name);
                    txn.clear(&common.store.spec().index_type_key(&index_name));
                }
                txn.commit().await?;
            }
            decision
        };
        match decision {
            GateDecision::AlreadyReadable => {
                info!(index = index_name.as_str(), "index is already readable; nothing to build");
                return Ok(());
            }
            GateDecision::AlreadyBuilding => {
                info!(
                    index = index_name.as_str(),
                    "index is write-only and precondition forbids continuing; \
                     assuming another build is in progress"
                );
                return Ok(());
            }
            GateDecision::Proceed { .. } => {}
        }

        if self.use_synchronized_session {
            let session =
                Session::start(&*common.db, common.lock_key(), self.lease_length_millis).await?;
            common.set_session(Some(session));
        } else {
            warn!(
                index = index_name.as_str(),
                "building without a synchronized session is not recommended; \
                 concurrent builders will duplicate I/O"
            );
        }

        let result = self.run_strategy().await;

        if let Some(session) = common.session() {
            // Harmless when the lease was already lost or stolen.
            let _ = session.end(&*common.db).await;
            common.set_session(None);
        }
        result
    }

    async fn run_strategy(&mut self) -> Result<()> {
        let use_source = self.source_index_policy.is_active() && !self.fallback_to_records;
        if use_source {
            let source = self
                .source_index_policy
                .source_index()
                .expect("active policy has a source")
                .to_string();
            let strategy = IndexingByIndex::new(Arc::clone(&self.common), source);
            strategy.build(&mut self.runner).await?;
        } else {
            let strategy = IndexingByRecords::new(Arc::clone(&self.common));
            strategy.build(&mut self.runner).await?;
        }
        self.mark_readable().await
    }

    async fn mark_readable(&self) -> Result<()> {
        let common = &self.common;
        let index_name = &common.index.name;
        let mut txn = common.db.begin(TransactionPriority::Batch).await?;
        if let Some(session) = common.session() {
            session.verify_and_renew(&mut txn).await?;
        }
        let state = common.store.index_state(&mut txn, index_name).await?;
        if state != IndexState::WriteOnly {
            return Err(IndexerError::StateMismatch { expected: "write_only", actual: state });
        }
        txn.clear(&common.store.spec().index_type_key(index_name));
        common
            .store
            .set_index_state(&mut txn, index_name, IndexState::Readable)
            .await?;
        txn.commit().await?;
        info!(
            index = index_name.as_str(),
            records_scanned = common.total_scanned.load(Ordering::Relaxed),
            "online index build complete; index is readable"
        );
        Ok(())
    }

    /// Promote the index to readable iff its range set is fully built
    ///
    /// Returns whether the store was modified.
    pub async fn mark_readable_if_built(&self) -> Result<bool> {
        let common = &self.common;
        let index_name = &common.index.name;
        let mut txn = common.db.begin(TransactionPriority::Batch).await?;
        if !common.range_set().is_fully_built(&mut txn).await? {
            return Ok(false);
        }
        let state = common.store.index_state(&mut txn, index_name).await?;
        match state {
            IndexState::Readable => Ok(false),
            IndexState::WriteOnly => {
                txn.clear(&common.store.spec().index_type_key(index_name));
                common
                    .store
                    .set_index_state(&mut txn, index_name, IndexState::Readable)
                    .await?;
                txn.commit().await?;
                Ok(true)
            }
            other => Err(IndexerError::StateMismatch { expected: "write_only", actual: other }),
        }
    }

    fn by_records(&self) -> Result<IndexingByRecords<D>> {
        if self.source_index_policy.is_active() && !self.fallback_to_records {
            return Err(IndexerError::InvalidConfig(
                "explicit range operations require the record-scan strategy".into(),
            ));
        }
        Ok(IndexingByRecords::new(Arc::clone(&self.common)))
    }

    /// Build the endpoints of the key space (record-scan mode only)
    ///
    /// See the full-build sequence: this marks everything outside the
    /// store's first and last records as built and returns the interior.
    pub async fn build_endpoints(&mut self) -> Result<Option<KeyRange>> {
        let strategy = self.by_records()?;
        strategy.build_endpoints(&mut self.runner).await
    }

    /// Idempotent throttled build of `[begin, end)` (record-scan mode only)
    ///
    /// Looks for gaps within the given range that have not been built and
    /// builds only those; a second call over the same range does nothing.
    /// Does not take the session or evaluate the state precondition -- that
    /// is [`OnlineIndexer::build_index`]'s job.
    pub async fn build_range(
        &mut self,
        begin: Option<&Key>,
        end: Option<&Key>,
    ) -> Result<()> {
        let strategy = self.by_records()?;
        strategy.build_range(&mut self.runner, begin, end).await
    }

    /// [`OnlineIndexer::build_range`] over raw key bounds, as produced by
    /// [`OnlineIndexer::split_index_build_range`]
    pub async fn build_range_raw(&mut self, range: KeyRange) -> Result<()> {
        let strategy = self.by_records()?;
        strategy.build_range_raw(&mut self.runner, range).await
    }

    /// Non-idempotent single-chunk build of an unbuilt range (record-scan
    /// mode only); see the strategy primitive for the contract
    pub async fn build_unbuilt_range(
        &mut self,
        begin: Option<&Key>,
        end: Option<&Key>,
    ) -> Result<Option<Vec<u8>>> {
        let strategy = self.by_records()?;
        strategy.build_unbuilt_range(&mut self.runner, begin, end).await
    }

    /// Split the remaining build work into up to `max_split` disjoint ranges
    /// for parallel workers (record-scan mode only)
    pub async fn split_index_build_range(
        &self,
        min_split: usize,
        max_split: usize,
    ) -> Result<Vec<KeyRange>> {
        let strategy = self.by_records()?;
        strategy.split_index_build_range(min_split, max_split).await
    }

    /// Clear and rebuild the entire index inside the caller's transaction
    ///
    /// Only suitable for small stores; returns the number of records
    /// scanned.
    pub async fn rebuild_index_transactionally(
        &self,
        txn: &mut D::Transaction,
    ) -> Result<u64> {
        let strategy = self.by_records()?;
        strategy.rebuild_index_transactionally(txn).await
    }

    /// Handle for cooperative cancellation of this build
    pub fn cancel_handle(&self) -> CancelHandle {
        self.common.cancel_handle()
    }

    /// Records scanned by this instance's committed chunks
    pub fn scanned_total(&self) -> u64 {
        self.common.total_scanned.load(Ordering::Relaxed)
    }

    /// Current effective records-per-transaction limit
    pub fn current_limit(&self) -> usize {
        self.runner.current_limit()
    }

    /// Times the config loader has been consulted
    pub fn config_loader_invocations(&self) -> u32 {
        self.common.loader_invocations()
    }
}

/// Administratively stop any ongoing session-based build of `index`
///
/// Deletes the session lease; the current holder's next chunk fails with
/// [`IndexerError::SessionLost`] before writing anything.
pub async fn stop_ongoing_online_index_builds<D: KvDatabase>(
    db: &D,
    store: &RecordStore,
    index: &str,
) -> Result<()> {
    end_any_session(db, &store.spec().index_lock_key(index)).await
}

/// Whether any worker currently holds a live build session on `index`
pub async fn check_any_ongoing_online_index_build<D: KvDatabase>(
    db: &D,
    store: &RecordStore,
    index: &str,
) -> Result<bool> {
    check_active_session(db, &store.spec().index_lock_key(index)).await
}
