//! Building a target index by scanning a readable source index, including
//! pre-flight validation failures, the record-scan fallback, and build
//! method mismatch detection.

mod support;

use std::sync::Arc;
use strata_db_core::{
    IndexState, KvDatabase, KvTransaction, MemoryKv, RecordStore, TransactionPriority,
};
use strata_db_indexer::{
    load_index_build_state, IndexerError, IndexingMethod, OnlineIndexer, OnlineIndexerConfig,
    SourceIndexPolicy,
};
use support::*;

fn fast_config() -> OnlineIndexerConfig {
    OnlineIndexerConfig::default().with_records_per_second(1_000_000)
}

fn indexer_with_policy(
    db: &Arc<MemoryKv>,
    store: &RecordStore,
    index: &str,
    policy: SourceIndexPolicy,
) -> OnlineIndexer<MemoryKv> {
    OnlineIndexer::builder()
        .with_database(Arc::clone(db))
        .with_store(store.clone())
        .with_index(index)
        .with_config(fast_config())
        .with_source_index_policy(policy)
        .build()
        .unwrap()
}

/// Seed users with `by_name` maintained from the start, then promote it to
/// readable so it can serve as a build source.
async fn seed_with_readable_source(db: &Arc<MemoryKv>, store: &RecordStore, count: i64) {
    set_state(db, store, "by_name", IndexState::WriteOnly).await;
    seed_users(db, store, count).await;
    set_state(db, store, "by_name", IndexState::Readable).await;
}

#[tokio::test]
async fn test_build_from_source_index() {
    let (db, store) = test_store();
    seed_with_readable_source(&db, &store, 300).await;

    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("by_name"),
    );
    indexer.build_index().await.unwrap();

    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::Readable);
    assert_eq!(count_index_entries(&db, &store, "by_email").await, 300);
    // One scanned unit per source entry.
    assert_eq!(indexer.scanned_total(), 300);
    let state = load_index_build_state(&*db, &store, "by_email").await.unwrap();
    assert_eq!(state.records_scanned, 300);

    // Entries match what a record-scan build would have produced.
    let (db2, store2) = test_store();
    seed_users(&db2, &store2, 300).await;
    let mut reference = OnlineIndexer::builder()
        .with_database(Arc::clone(&db2))
        .with_store(store2.clone())
        .with_index("by_email")
        .with_config(fast_config())
        .build()
        .unwrap();
    reference.build_index().await.unwrap();
    assert_eq!(
        index_entry_keys(&db, &store, "by_email").await,
        index_entry_keys(&db2, &store2, "by_email").await
    );
}

#[tokio::test]
async fn test_source_not_readable_fails_validation() {
    let (db, store) = test_store();
    set_state(&db, &store, "by_name", IndexState::WriteOnly).await;
    seed_users(&db, &store, 20).await;

    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("by_name").forbid_record_scan(),
    );
    let err = indexer.build_index().await.unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)));
    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::WriteOnly);
}

#[tokio::test]
async fn test_non_idempotent_source_fails_validation() {
    let (db, store) = test_store();
    set_state(&db, &store, "by_name_agg", IndexState::WriteOnly).await;
    seed_users(&db, &store, 20).await;
    set_state(&db, &store, "by_name_agg", IndexState::Readable).await;

    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("by_name_agg").forbid_record_scan(),
    );
    assert!(matches!(
        indexer.build_index().await,
        Err(IndexerError::Validation(_))
    ));
}

#[tokio::test]
async fn test_unknown_source_fails_validation() {
    let (db, store) = test_store();
    seed_users(&db, &store, 5).await;
    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("no_such_index").forbid_record_scan(),
    );
    assert!(matches!(
        indexer.build_index().await,
        Err(IndexerError::Validation(_))
    ));
}

#[tokio::test]
async fn test_type_coverage_failure_falls_back_to_record_scan() {
    let (db, store) = test_store();
    seed_with_readable_source(&db, &store, 100).await;
    let orders: Vec<_> = (1000..1050).map(order_record).collect();
    seed_records(&db, &store, &orders).await;

    // Target covers {user, order}; the source covers only {user}, so the
    // pre-flight fails and the build falls back to scanning records.
    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_kind",
        SourceIndexPolicy::from_source("by_name"),
    );
    indexer.build_index().await.unwrap();

    assert_eq!(current_state(&db, &store, "by_kind").await, IndexState::Readable);
    assert_eq!(count_index_entries(&db, &store, "by_kind").await, 150);
    // The fallback scanned every record in the store.
    assert_eq!(indexer.scanned_total(), 150);
}

#[tokio::test]
async fn test_type_coverage_failure_surfaces_when_fallback_forbidden() {
    let (db, store) = test_store();
    seed_with_readable_source(&db, &store, 10).await;

    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_kind",
        SourceIndexPolicy::from_source("by_name").forbid_record_scan(),
    );
    assert!(matches!(
        indexer.build_index().await,
        Err(IndexerError::Validation(_))
    ));
}

#[tokio::test]
async fn test_build_method_mismatch_detected() {
    let (db, store) = test_store();
    seed_with_readable_source(&db, &store, 50).await;
    set_state(&db, &store, "by_email", IndexState::WriteOnly).await;

    // A previous record-scan build left its marker (and possibly a partial
    // range set keyed by record keys).
    let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
    txn.set(
        &store.spec().index_type_key("by_email"),
        &serde_json::to_vec(&IndexingMethod::ByRecords).unwrap(),
    );
    txn.commit().await.unwrap();

    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("by_name").forbid_record_scan(),
    );
    assert!(matches!(
        indexer.build_index().await,
        Err(IndexerError::BuildMethodMismatch { .. })
    ));
}

#[tokio::test]
async fn test_explicit_range_operations_rejected_in_source_mode() {
    let (db, store) = test_store();
    seed_with_readable_source(&db, &store, 10).await;
    let mut indexer = indexer_with_policy(
        &db,
        &store,
        "by_email",
        SourceIndexPolicy::from_source("by_name"),
    );
    assert!(matches!(
        indexer.build_range(None, None).await,
        Err(IndexerError::InvalidConfig(_))
    ));
    assert!(matches!(
        indexer.split_index_build_range(1, 4).await,
        Err(IndexerError::InvalidConfig(_))
    ));
}
