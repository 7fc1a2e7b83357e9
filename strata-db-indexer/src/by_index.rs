//! Build strategy: scan a readable source index
//!
//! When an existing index already covers every record the target needs, the
//! build can iterate the source's (usually much denser) key space instead of
//! the whole record store. Each source entry carries its record's primary
//! key; the record is loaded and fed through the target's entry derivation.
//!
//! The target's range set stores **source-index keys** as interval
//! boundaries, so resumption walks the same ordering being scanned. That is
//! also why the build method marker exists: a range set written by one
//! method is gibberish to the other.

use crate::by_records::ChunkOutcome;
use crate::common::{check_or_write_method, IndexingCommon, IndexingMethod};
use crate::error::{IndexerError, Result};
use crate::throttle::{ChunkLimits, ThrottledRunner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_db_core::{
    successor, IndexState, KeyRange, KvDatabase, KvTransaction, TransactionPriority,
};
use tracing::debug;

pub(crate) struct IndexingByIndex<D: KvDatabase> {
    common: Arc<IndexingCommon<D>>,
    source_name: String,
}

impl<D: KvDatabase> IndexingByIndex<D> {
    pub fn new(common: Arc<IndexingCommon<D>>, source_name: String) -> Self {
        IndexingByIndex { common, source_name }
    }

    /// Full build: pre-flight validation, marker, then every missing range
    /// of the source key space
    pub async fn build(&self, runner: &mut ThrottledRunner<D>) -> Result<()> {
        let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
        self.validate(&mut txn).await?;
        check_or_write_method(
            &mut txn,
            &self.common.store,
            &self.common.index.name,
            &IndexingMethod::ByIndex { source_index: self.source_name.clone() },
        )
        .await?;
        txn.commit().await?;

        loop {
            self.common.check_cancelled()?;
            let missing = {
                let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
                self.common
                    .range_set()
                    .missing_ranges(&mut txn, None, None, Some(1))
                    .await?
            };
            let Some(target) = missing.into_iter().next() else {
                return Ok(());
            };
            match self.build_missing_range(runner, target).await {
                Ok(()) => {}
                Err(IndexerError::RangeAlreadyBuilt { .. }) => {
                    debug!(
                        index = self.common.index_name(),
                        "source range built by another worker; re-consulting"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pre-flight checks on the source index
    ///
    /// The source must exist, be idempotent, be readable, and cover every
    /// stored record type the target needs. Any failure is a
    /// [`IndexerError::Validation`], which the orchestrator may convert into
    /// a record-scan fallback.
    async fn validate(&self, txn: &mut D::Transaction) -> Result<()> {
        let schema = &self.common.store.spec().schema;
        let source = schema.index(&self.source_name).ok_or_else(|| {
            IndexerError::Validation(format!("source index {} is not declared", self.source_name))
        })?;
        if !source.idempotent {
            return Err(IndexerError::Validation(format!(
                "source index {} is not idempotent",
                source.name
            )));
        }
        let state = self.common.store.index_state(txn, &source.name).await?;
        if state != IndexState::Readable {
            return Err(IndexerError::Validation(format!(
                "source index {} is {state}, not readable",
                source.name
            )));
        }
        let source_types = schema.expand_to_stored_types(&source.record_types);
        for needed in &self.common.stored_types {
            if !source_types.contains(needed) {
                return Err(IndexerError::Validation(format!(
                    "source index {} does not cover record type {needed}",
                    source.name
                )));
            }
        }
        Ok(())
    }

    async fn build_missing_range(
        &self,
        runner: &mut ThrottledRunner<D>,
        target: KeyRange,
    ) -> Result<()> {
        let mut cursor = target.begin.clone();
        loop {
            self.common.check_cancelled()?;
            let common = Arc::clone(&self.common);
            let source_name = self.source_name.clone();
            let begin = cursor.clone();
            let end = target.end.clone();
            let outcome = runner
                .run_chunk("build_from_source_index", move |txn, limits, scanned| {
                    let common = Arc::clone(&common);
                    let source_name = source_name.clone();
                    let begin = begin.clone();
                    let end = end.clone();
                    Box::pin(async move {
                        source_chunk(&common, &source_name, txn, limits, scanned, begin, end).await
                    })
                })
                .await?;
            if outcome.exhausted {
                return Ok(());
            }
            cursor = outcome.next;
        }
    }
}

/// Chunk body: scan source entries, look up their records, derive target
/// entries, and record the covered source-key interval
async fn source_chunk<D: KvDatabase>(
    common: &IndexingCommon<D>,
    source_name: &str,
    txn: &mut D::Transaction,
    limits: ChunkLimits,
    scanned: Arc<AtomicU64>,
    begin: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
) -> Result<ChunkOutcome> {
    let store = &common.store;
    let range = KeyRange::from_raw(begin.clone(), end.clone());
    let entries = store
        .scan_index(txn, source_name, &range, Some(limits.records))
        .await?;

    let mut write_bytes = 0usize;
    let mut last_key: Option<Vec<u8>> = None;
    let mut stopped_early = false;
    let fetched = entries.len();
    for source_entry in &entries {
        scanned.fetch_add(1, Ordering::Relaxed);
        last_key = Some(source_entry.key.clone());
        match store.load_record_raw(txn, &source_entry.value).await? {
            Some(record) => {
                if common.stored_types.contains(&record.record_type) {
                    for entry in common.index.entries(&record) {
                        write_bytes += store.save_index_entry(txn, &common.index, &entry);
                    }
                }
            }
            None => {
                // A readable idempotent source should not dangle; tolerate
                // the race and keep the scan resumable.
                debug!(
                    index = common.index_name(),
                    source = source_name,
                    "source entry without a base record"
                );
            }
        }
        if write_bytes >= limits.bytes {
            stopped_early = true;
            break;
        }
    }

    let exhausted = !stopped_early && fetched < limits.records;
    let chunk_end = if exhausted {
        end.clone()
    } else {
        Some(successor(
            last_key.as_deref().expect("partial chunk scanned entries"),
        ))
    };

    let overlap = common
        .range_set()
        .insert_range(txn, begin.as_deref(), chunk_end.as_deref())
        .await?;
    if overlap.is_some() {
        return Err(IndexerError::range_already_built(
            begin.as_deref(),
            end.as_deref(),
        ));
    }
    Ok(ChunkOutcome { next: chunk_end, exhausted })
}
