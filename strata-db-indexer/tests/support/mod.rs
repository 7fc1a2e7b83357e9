//! Shared helpers for the indexer integration tests
#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use strata_db_core::{
    FieldPlanner, IndexDescriptor, IndexState, Key, KeyRange, KvDatabase, KvTransaction,
    MemoryKv, Record, RecordStore, RecordTypeDef, Schema, StoreSpec, TransactionPriority,
};

/// Schema used throughout the integration tests:
///
/// - stored types `user` and `order`
/// - `by_name` over `user` (source index in by-index tests)
/// - `by_email` over `user` (the usual build target)
/// - `by_kind` over both types (coverage-failure target)
/// - `by_name_agg` over `user`, non-idempotent
pub fn test_schema() -> Schema {
    Schema::new()
        .with_record_type(RecordTypeDef::stored("user"))
        .with_record_type(RecordTypeDef::stored("order"))
        .with_index(IndexDescriptor::new(
            "by_name",
            vec!["user".into()],
            Arc::new(FieldPlanner::new("name")),
        ))
        .with_index(IndexDescriptor::new(
            "by_email",
            vec!["user".into()],
            Arc::new(FieldPlanner::new("email")),
        ))
        .with_index(IndexDescriptor::new(
            "by_kind",
            vec!["user".into(), "order".into()],
            Arc::new(FieldPlanner::new("kind")),
        ))
        .with_index(
            IndexDescriptor::new(
                "by_name_agg",
                vec!["user".into()],
                Arc::new(FieldPlanner::new("name")),
            )
            .with_idempotent(false),
        )
}

pub fn test_store() -> (Arc<MemoryKv>, RecordStore) {
    let db = Arc::new(MemoryKv::new());
    let store = RecordStore::new(Arc::new(StoreSpec::new("teststore", test_schema())));
    (db, store)
}

pub fn user_record(id: i64) -> Record {
    Record::new(
        "user",
        Key::from_int(id),
        json!({
            "name": format!("user{id:04}"),
            "email": format!("user{id:04}@example.com"),
            "kind": "person",
        }),
    )
}

pub fn order_record(id: i64) -> Record {
    Record::new("order", Key::from_int(id), json!({ "kind": "purchase" }))
}

pub async fn seed_records(db: &MemoryKv, store: &RecordStore, records: &[Record]) {
    for batch in records.chunks(200) {
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        for record in batch {
            store.save_record(&mut txn, record).await.unwrap();
        }
        txn.commit().await.unwrap();
    }
}

pub async fn seed_users(db: &MemoryKv, store: &RecordStore, count: i64) {
    let records: Vec<Record> = (0..count).map(user_record).collect();
    seed_records(db, store, &records).await;
}

pub async fn set_state(db: &MemoryKv, store: &RecordStore, index: &str, state: IndexState) {
    let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
    store.set_index_state(&mut txn, index, state).await.unwrap();
    txn.commit().await.unwrap();
}

pub async fn current_state(db: &MemoryKv, store: &RecordStore, index: &str) -> IndexState {
    let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
    store.index_state(&mut txn, index).await.unwrap()
}

/// Relative entry keys of an index, in order
pub async fn index_entry_keys(db: &MemoryKv, store: &RecordStore, index: &str) -> Vec<Vec<u8>> {
    let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
    store
        .scan_index(&mut txn, index, &KeyRange::all(), None)
        .await
        .unwrap()
        .into_iter()
        .map(|kv| kv.key)
        .collect()
}

pub async fn count_index_entries(db: &MemoryKv, store: &RecordStore, index: &str) -> usize {
    index_entry_keys(db, store, index).await.len()
}

/// Number of coalesced intervals in an index's range set
pub async fn range_interval_count(db: &MemoryKv, store: &RecordStore, index: &str) -> usize {
    let range_set =
        strata_db_indexer::RangeSet::new(store.spec().index_range_subspace(index));
    let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
    range_set.interval_count(&mut txn).await.unwrap()
}
