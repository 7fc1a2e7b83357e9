//! Build strategy: scan the record store's primary key space
//!
//! The default strategy. `build_endpoints` first fences off the empty space
//! outside the store's current first and last records, so a workload that
//! appends past the end stops conflicting with the build almost immediately.
//! The interior is then walked in chunks: each chunk scans up to the current
//! record/byte limits, writes the derived entries, and records the covered
//! interval in the range set inside the same transaction.

use crate::common::{check_or_write_method, IndexingCommon, IndexingMethod};
use crate::error::{IndexerError, Result};
use crate::throttle::{ChunkLimits, ThrottledRunner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_db_core::{
    interpolate_boundaries, successor, Error, Key, KeyRange, KvDatabase, KvTransaction,
    TransactionPriority,
};
use tracing::debug;

/// Result of one committed chunk
#[derive(Debug, Clone)]
pub(crate) struct ChunkOutcome {
    /// Where the next chunk should start (meaningful when not exhausted)
    pub next: Option<Vec<u8>>,
    /// Whether the requested range is now fully built
    pub exhausted: bool,
}

pub(crate) struct IndexingByRecords<D: KvDatabase> {
    common: Arc<IndexingCommon<D>>,
}

impl<D: KvDatabase> IndexingByRecords<D> {
    pub fn new(common: Arc<IndexingCommon<D>>) -> Self {
        IndexingByRecords { common }
    }

    /// Full build: marker, endpoints, then every missing interior range
    pub async fn build(&self, runner: &mut ThrottledRunner<D>) -> Result<()> {
        let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
        check_or_write_method(
            &mut txn,
            &self.common.store,
            &self.common.index.name,
            &IndexingMethod::ByRecords,
        )
        .await?;
        txn.commit().await?;

        self.build_endpoints(runner).await?;
        self.build_range_raw(runner, KeyRange::all()).await
    }

    /// Mark the key space outside the store's current records as built
    ///
    /// Returns the interior range still to build, or `None` for an empty
    /// store (which this call marks fully built).
    pub async fn build_endpoints(
        &self,
        runner: &mut ThrottledRunner<D>,
    ) -> Result<Option<KeyRange>> {
        let common = Arc::clone(&self.common);
        runner
            .run_chunk("build_endpoints", move |txn, _limits, _scanned| {
                let common = Arc::clone(&common);
                Box::pin(async move { endpoints_chunk(&common, txn).await })
            })
            .await
    }

    /// Idempotent range build: cover every missing subrange of `[begin, end)`
    pub async fn build_range(
        &self,
        runner: &mut ThrottledRunner<D>,
        begin: Option<&Key>,
        end: Option<&Key>,
    ) -> Result<()> {
        self.build_range_raw(runner, KeyRange::between(begin, end)).await
    }

    pub async fn build_range_raw(
        &self,
        runner: &mut ThrottledRunner<D>,
        domain: KeyRange,
    ) -> Result<()> {
        loop {
            self.common.check_cancelled()?;
            let missing = {
                let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
                self.common
                    .range_set()
                    .missing_ranges(
                        &mut txn,
                        domain.begin.as_deref(),
                        domain.end.as_deref(),
                        Some(1),
                    )
                    .await?
            };
            let Some(target) = missing.into_iter().next() else {
                return Ok(());
            };
            match self.build_missing_range(runner, target).await {
                Ok(()) => {}
                Err(IndexerError::RangeAlreadyBuilt { .. }) => {
                    // Another worker got there first; its commit moved the
                    // missing set, so consult it again.
                    debug!(
                        index = self.common.index_name(),
                        "range built by another worker; re-consulting missing ranges"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn build_missing_range(
        &self,
        runner: &mut ThrottledRunner<D>,
        target: KeyRange,
    ) -> Result<()> {
        let mut cursor = target.begin.clone();
        loop {
            self.common.check_cancelled()?;
            let outcome = self
                .build_unbuilt_range_raw(runner, cursor, target.end.clone())
                .await?;
            if outcome.exhausted {
                return Ok(());
            }
            cursor = outcome.next;
        }
    }

    /// Non-idempotent primitive: build one chunk of a range assumed unbuilt
    ///
    /// Returns `Some(resumption key)` when the range was only partially
    /// covered, `None` once `[begin, end)` is fully built. Fails with
    /// [`IndexerError::RangeAlreadyBuilt`] -- leaving the store untouched --
    /// if any part of the chunk's interval was already recorded as built.
    pub async fn build_unbuilt_range(
        &self,
        runner: &mut ThrottledRunner<D>,
        begin: Option<&Key>,
        end: Option<&Key>,
    ) -> Result<Option<Vec<u8>>> {
        let outcome = self
            .build_unbuilt_range_raw(runner, begin.map(Key::pack), end.map(Key::pack))
            .await?;
        Ok(if outcome.exhausted { None } else { outcome.next })
    }

    async fn build_unbuilt_range_raw(
        &self,
        runner: &mut ThrottledRunner<D>,
        begin: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Result<ChunkOutcome> {
        let common = Arc::clone(&self.common);
        runner
            .run_chunk("build_unbuilt_range", move |txn, limits, scanned| {
                let common = Arc::clone(&common);
                let begin = begin.clone();
                let end = end.clone();
                Box::pin(async move { unbuilt_chunk(&common, txn, limits, scanned, begin, end).await })
            })
            .await
    }

    /// Cover the missing set with up to `max_split` disjoint ranges
    ///
    /// Balances by byte interpolation over the key domain. Returns the single
    /// spanning range when the missing set cannot be split into at least
    /// `min_split` pieces.
    pub async fn split_index_build_range(
        &self,
        min_split: usize,
        max_split: usize,
    ) -> Result<Vec<KeyRange>> {
        if min_split == 0 || max_split < min_split {
            return Err(IndexerError::InvalidConfig(
                "split bounds must satisfy 0 < min_split <= max_split".into(),
            ));
        }
        let mut txn = self.common.db.begin(TransactionPriority::Batch).await?;
        let missing = self
            .common
            .range_set()
            .missing_ranges(&mut txn, None, None, None)
            .await?;
        let Some(first) = missing.first() else {
            return Ok(vec![KeyRange::all()]);
        };
        let span = KeyRange::from_raw(
            first.begin.clone(),
            missing.last().expect("non-empty").end.clone(),
        );

        if missing.len() >= max_split {
            let per = missing.len().div_ceil(max_split);
            return Ok(missing
                .chunks(per)
                .map(|group| {
                    KeyRange::from_raw(
                        group.first().expect("non-empty").begin.clone(),
                        group.last().expect("non-empty").end.clone(),
                    )
                })
                .collect());
        }

        // Clip open ends to the records actually present so interpolation
        // has finite bounds to work with.
        let subspace = self.common.store.spec().records_subspace();
        let (space_begin, space_end) = subspace.range();
        let first_record = txn.scan(&space_begin, &space_end, Some(1), false).await?;
        let last_record = txn.scan(&space_begin, &space_end, Some(1), true).await?;
        let clip_begin = first_record
            .first()
            .and_then(|kv| subspace.unpack_raw(&kv.key))
            .map(<[u8]>::to_vec);
        let clip_end = last_record
            .first()
            .and_then(|kv| subspace.unpack_raw(&kv.key))
            .map(|k| successor(k));

        let per_range = (max_split / missing.len()).max(1);
        let mut out = Vec::new();
        for range in &missing {
            let lo = range.begin.clone().or_else(|| clip_begin.clone());
            let hi = range.end.clone().or_else(|| clip_end.clone());
            let (Some(lo), Some(hi)) = (lo, hi) else {
                out.push(range.clone());
                continue;
            };
            let mut cursor = range.begin.clone();
            for boundary in interpolate_boundaries(&lo, &hi, per_range) {
                out.push(KeyRange::from_raw(cursor, Some(boundary.clone())));
                cursor = Some(boundary);
            }
            out.push(KeyRange::from_raw(cursor, range.end.clone()));
        }
        if out.len() < min_split {
            return Ok(vec![span]);
        }
        Ok(out)
    }

    /// Single-transaction reset-and-rebuild
    ///
    /// Clears the index and rebuilds it from a full scan inside the caller's
    /// transaction. Only suitable for small stores; anything sizable fails
    /// with transaction-too-large.
    pub async fn rebuild_index_transactionally(
        &self,
        txn: &mut D::Transaction,
    ) -> Result<u64> {
        let store = &self.common.store;
        let index = &self.common.index;
        store.clear_index_data(txn, &index.name);
        txn.clear(&store.spec().index_type_key(&index.name));

        let records = store
            .scan_records(txn, &KeyRange::all(), None, None)
            .await?;
        let mut count = 0u64;
        for record in &records {
            count += 1;
            if self.common.stored_types.contains(&record.record_type) {
                for entry in index.entries(record) {
                    store.save_index_entry(txn, index, &entry);
                }
            }
        }
        self.common
            .range_set()
            .insert_if_not_present(txn, None, None)
            .await?;
        if self.common.track_progress {
            crate::progress::record_scanned(store, txn, &index.name, count);
        }
        Ok(count)
    }
}

/// Chunk body for `build_endpoints`
async fn endpoints_chunk<D: KvDatabase>(
    common: &IndexingCommon<D>,
    txn: &mut D::Transaction,
) -> Result<Option<KeyRange>> {
    let subspace = common.store.spec().records_subspace();
    let (space_begin, space_end) = subspace.range();
    let range_set = common.range_set();

    let Some(first) = txn
        .scan(&space_begin, &space_end, Some(1), false)
        .await?
        .into_iter()
        .next()
    else {
        // Empty store: the whole domain is trivially built.
        let _ = range_set.insert_if_not_present(txn, None, None).await?;
        return Ok(None);
    };
    let first_rel = subspace
        .unpack_raw(&first.key)
        .ok_or_else(|| Error::InvalidKey("record key outside store".into()))?
        .to_vec();

    let last = txn
        .scan(&space_begin, &space_end, Some(1), true)
        .await?
        .pop()
        .expect("a first record implies a last record");
    let last_rel = subspace
        .unpack_raw(&last.key)
        .ok_or_else(|| Error::InvalidKey("record key outside store".into()))?;
    let interior_end = successor(last_rel);

    // A resumed build may find these already present; that is fine.
    let _ = range_set
        .insert_if_not_present(txn, None, Some(&first_rel))
        .await?;
    let _ = range_set
        .insert_if_not_present(txn, Some(&interior_end), None)
        .await?;
    Ok(Some(KeyRange::from_raw(Some(first_rel), Some(interior_end))))
}

/// Chunk body for `build_unbuilt_range`
async fn unbuilt_chunk<D: KvDatabase>(
    common: &IndexingCommon<D>,
    txn: &mut D::Transaction,
    limits: ChunkLimits,
    scanned: Arc<AtomicU64>,
    begin: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
) -> Result<ChunkOutcome> {
    let store = &common.store;
    let range = KeyRange::from_raw(begin.clone(), end.clone());
    let records = store
        .scan_records(txn, &range, Some(limits.records), None)
        .await?;

    let mut write_bytes = 0usize;
    let mut last_packed: Option<Vec<u8>> = None;
    let mut stopped_early = false;
    let fetched = records.len();
    for record in &records {
        scanned.fetch_add(1, Ordering::Relaxed);
        if common.stored_types.contains(&record.record_type) {
            for entry in common.index.entries(record) {
                write_bytes += store.save_index_entry(txn, &common.index, &entry);
            }
        }
        last_packed = Some(record.primary_key.pack());
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
            last_packed.as_deref().expect("partial chunk scanned records"),
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
