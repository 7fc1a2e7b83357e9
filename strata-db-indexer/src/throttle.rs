//! Adaptive, throttled chunk execution
//!
//! Every chunk of build work runs through [`ThrottledRunner::run_chunk`]: one
//! unified retry loop that owns the adaptive records-per-transaction limit,
//! exponential jittered backoff, rate pacing, and the retry budget. Failures
//! are classified once (see [`crate::error`]); there is deliberately no inner
//! store-level retry loop layered under this one.
//!
//! The limit never grows on failure, never exceeds the configured maximum,
//! and never drops below one record per transaction. A chunk that cannot
//! commit even at limit 1 exhausts the retry budget and surfaces
//! `MaxRetriesExceeded` rather than looping forever.

use crate::common::IndexingCommon;
use crate::config::{OnlineIndexerConfig, INITIAL_DELAY_MILLIS, MAX_DELAY_MILLIS};
use crate::error::{Disposition, IndexerError, Result};
use crate::progress;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_db_core::{Error, KvDatabase, KvTransaction, TransactionPriority};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Conflicts in a row before the loop treats them as too much work
const CONFLICT_LESSEN_THRESHOLD: u32 = 3;

/// Work bounds for one chunk transaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkLimits {
    /// Stop after scanning this many records
    pub records: usize,
    /// Stop once this many bytes of index writes have been buffered
    pub bytes: usize,
}

/// Executes chunk closures with adaptive retry
///
/// The closure receives a fresh batch-priority transaction, the limits in
/// force for this attempt, and a counter it must advance by the number of
/// records it scanned. The runner persists the counter delta durably in the
/// same transaction and paces commits against the configured rate.
pub(crate) struct ThrottledRunner<D: KvDatabase> {
    common: Arc<IndexingCommon<D>>,
    limit: usize,
    success_streak: u32,
    consecutive_conflicts: u32,
}

impl<D: KvDatabase> ThrottledRunner<D> {
    pub fn new(common: Arc<IndexingCommon<D>>) -> Self {
        let limit = common.config().max_limit;
        ThrottledRunner {
            common,
            limit,
            success_streak: 0,
            consecutive_conflicts: 0,
        }
    }

    /// Current effective records-per-transaction limit
    pub fn current_limit(&self) -> usize {
        self.limit
    }

    /// Run one chunk to a committed conclusion (or a fatal error)
    pub async fn run_chunk<R, F>(&mut self, operation: &'static str, f: F) -> Result<R>
    where
        R: Send,
        F: for<'a> Fn(&'a mut D::Transaction, ChunkLimits, Arc<AtomicU64>) -> BoxFuture<'a, Result<R>>
            + Send
            + Sync,
    {
        let mut attempts: u32 = 0;
        let mut delay_millis = INITIAL_DELAY_MILLIS;
        loop {
            let config = self.common.load_config();
            self.limit = self.limit.clamp(1, config.max_limit);
            self.common.check_cancelled()?;

            let scanned = Arc::new(AtomicU64::new(0));
            let started = Instant::now();
            match self.attempt(&config, &f, Arc::clone(&scanned)).await {
                Ok(value) => {
                    self.consecutive_conflicts = 0;
                    self.note_success(&config, scanned.load(Ordering::Relaxed), started)
                        .await;
                    return Ok(value);
                }
                Err(err) => {
                    let mut disposition = err.disposition();
                    if matches!(&err, IndexerError::Core(Error::Conflict)) {
                        self.consecutive_conflicts += 1;
                        if self.consecutive_conflicts >= CONFLICT_LESSEN_THRESHOLD {
                            disposition = Disposition::RetrySmaller;
                        }
                    } else {
                        self.consecutive_conflicts = 0;
                    }
                    if disposition == Disposition::Fatal {
                        return Err(err);
                    }

                    attempts += 1;
                    if attempts >= config.max_retries {
                        return Err(IndexerError::MaxRetriesExceeded {
                            attempts,
                            last_error: err.to_string(),
                        });
                    }
                    if disposition == Disposition::RetrySmaller {
                        self.decrease_limit(&err, operation);
                    }
                    debug!(
                        operation,
                        attempt = attempts,
                        error = %err,
                        delay_millis,
                        "retrying chunk"
                    );
                    delay_millis = backoff(delay_millis).await;
                }
            }
        }
    }

    async fn attempt<R, F>(
        &self,
        config: &OnlineIndexerConfig,
        f: &F,
        scanned: Arc<AtomicU64>,
    ) -> Result<R>
    where
        F: for<'a> Fn(&'a mut D::Transaction, ChunkLimits, Arc<AtomicU64>) -> BoxFuture<'a, Result<R>>
            + Send
            + Sync,
    {
        let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
        if let Some(session) = self.common.session() {
            session.verify_and_renew(&mut txn).await?;
        }
        let limits = ChunkLimits {
            records: self.limit,
            bytes: config.max_write_limit_bytes,
        };
        let value = f(&mut txn, limits, Arc::clone(&scanned)).await?;
        let n = scanned.load(Ordering::Relaxed);
        if self.common.track_progress && n > 0 {
            progress::record_scanned(
                &self.common.store,
                &mut txn,
                &self.common.index.name,
                n,
            );
        }
        txn.commit().await?;
        Ok(value)
    }

    async fn note_success(&mut self, config: &OnlineIndexerConfig, n: u64, started: Instant) {
        self.common.total_scanned.fetch_add(n, Ordering::Relaxed);

        if config.increase_limit_after >= 0 && self.limit < config.max_limit {
            self.success_streak += 1;
            if self.success_streak >= config.increase_limit_after as u32 {
                let old_limit = self.limit;
                self.limit = config
                    .max_limit
                    .min((self.limit + 1).max(self.limit * 4 / 3));
                self.success_streak = 0;
                info!(
                    index = self.common.index_name(),
                    old_limit,
                    new_limit = self.limit,
                    "re-increasing records per transaction"
                );
            }
        }

        self.common.maybe_log_progress(config, self.limit);

        // Rate pacing: a chunk of n records must take at least n / rps seconds.
        if n > 0 {
            let floor = Duration::from_secs_f64(n as f64 / config.records_per_second as f64);
            let elapsed = started.elapsed();
            if floor > elapsed {
                sleep(floor - elapsed).await;
            }
        }
    }

    fn decrease_limit(&mut self, err: &IndexerError, operation: &'static str) {
        let old_limit = self.limit;
        self.limit = (self.limit / 2).max(1);
        self.success_streak = 0;
        warn!(
            index = self.common.index_name(),
            operation,
            error_code = err.code(),
            error = %err,
            old_limit,
            new_limit = self.limit,
            "lessening work after retryable failure"
        );
    }
}

/// Sleep a jittered delay and return the next (doubled, capped) delay
async fn backoff(delay_millis: u64) -> u64 {
    let ceiling = delay_millis.max(1);
    let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
    sleep(Duration::from_millis(jittered)).await;
    (delay_millis * 2).min(MAX_DELAY_MILLIS)
}
