//! Durable build progress
//!
//! The number of records scanned by committed chunks is kept under the
//! index's `scanned` key, updated with a conflict-free atomic add inside the
//! same transaction as the chunk's range-set insert. Administrative probes
//! and readers therefore never serialize with the build itself.

use crate::error::Result;
use crate::range_set::RangeSet;
use strata_db_core::{
    decode_le64, IndexState, KvDatabase, KvTransaction, RecordStore, TransactionPriority,
};

/// Add `n` scanned records to the durable counter (same transaction as the
/// chunk that scanned them)
pub fn record_scanned<T: KvTransaction>(store: &RecordStore, txn: &mut T, index: &str, n: u64) {
    if n > 0 {
        txn.atomic_add(&store.spec().index_scanned_key(index), n as i64);
    }
}

/// Point-in-time view of an index build
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBuildState {
    /// Records scanned by committed chunks so far
    pub records_scanned: u64,
    /// Current lifecycle state of the index
    pub index_state: IndexState,
    /// Completion percentage when it can be determined
    ///
    /// Key density over the unbuilt ranges is unknowable without scanning
    /// them, so this is `Some(100.0)` once the range set is fully covered
    /// and `None` while the build is still in flight.
    pub percent_complete: Option<f64>,
}

/// Load the current build state for an index
pub async fn load_index_build_state<D: KvDatabase>(
    db: &D,
    store: &RecordStore,
    index: &str,
) -> Result<IndexBuildState> {
    let mut txn = db.begin(TransactionPriority::Default).await?;
    let records_scanned = txn
        .get(&store.spec().index_scanned_key(index))
        .await?
        .as_deref()
        .map(decode_le64)
        .unwrap_or(0)
        .max(0) as u64;
    let index_state = store.index_state(&mut txn, index).await?;
    let range_set = RangeSet::new(store.spec().index_range_subspace(index));
    let percent_complete = if range_set.is_fully_built(&mut txn).await? {
        Some(100.0)
    } else {
        None
    };
    Ok(IndexBuildState { records_scanned, index_state, percent_complete })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_db_core::{FieldPlanner, IndexDescriptor, MemoryKv, Schema, StoreSpec};

    fn store() -> (MemoryKv, RecordStore) {
        let schema = Schema::new().with_index(IndexDescriptor::new(
            "by_name",
            vec!["user".into()],
            Arc::new(FieldPlanner::new("name")),
        ));
        (
            MemoryKv::new(),
            RecordStore::new(Arc::new(StoreSpec::new("test", schema))),
        )
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let (db, store) = store();
        for n in [100u64, 250] {
            let mut txn = db.begin(TransactionPriority::Batch).await.unwrap();
            record_scanned(&store, &mut txn, "by_name", n);
            txn.commit().await.unwrap();
        }
        let state = load_index_build_state(&db, &store, "by_name").await.unwrap();
        assert_eq!(state.records_scanned, 350);
        assert_eq!(state.index_state, IndexState::Disabled);
    }

    #[tokio::test]
    async fn test_zero_is_not_written() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Batch).await.unwrap();
        record_scanned(&store, &mut txn, "by_name", 0);
        txn.commit().await.unwrap();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        assert!(txn
            .get(&store.spec().index_scanned_key("by_name"))
            .await
            .unwrap()
            .is_none());
    }
}
