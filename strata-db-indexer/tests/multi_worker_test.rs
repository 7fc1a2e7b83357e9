//! Cross-worker coordination: lease takeover, lockout, administrative stop,
//! and the permissive no-session mode.

mod support;

use std::sync::Arc;
use std::time::Duration;
use strata_db_core::{IndexState, Key, MemoryKv, RecordStore};
use strata_db_indexer::{
    check_any_ongoing_online_index_build, load_index_build_state,
    stop_ongoing_online_index_builds, IndexStatePrecondition, IndexerError, OnlineIndexer,
    OnlineIndexerConfig, Session,
};
use support::*;

fn fast_config() -> OnlineIndexerConfig {
    OnlineIndexerConfig::default().with_records_per_second(1_000_000)
}

fn indexer_for(db: &Arc<MemoryKv>, store: &RecordStore, index: &str) -> OnlineIndexer<MemoryKv> {
    OnlineIndexer::builder()
        .with_database(Arc::clone(db))
        .with_store(store.clone())
        .with_index(index)
        .with_config(fast_config())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_two_workers_race_without_duplicating_entries() {
    let (db, store) = test_store();
    seed_users(&db, &store, 1000).await;
    set_state(&db, &store, "by_email", IndexState::WriteOnly).await;

    // Worker A holds a short lease and builds the first half before dying
    // without releasing (simulated crash: the session is simply dropped).
    let lock_key = store.spec().index_lock_key("by_email");
    let _crashed = Session::start(&*db, lock_key.clone(), 50).await.unwrap();
    let mut worker_a = indexer_for(&db, &store, "by_email");
    worker_a
        .build_range(None, Some(&Key::from_int(500)))
        .await
        .unwrap();
    assert_eq!(worker_a.scanned_total(), 500);

    // While the lease is live, worker B is locked out.
    let mut worker_b = indexer_for(&db, &store, "by_email");
    assert!(matches!(
        worker_b.build_index().await,
        Err(IndexerError::SessionLocked)
    ));

    // After expiry, B takes over and finishes the rest.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let mut worker_b = indexer_for(&db, &store, "by_email");
    worker_b.build_index().await.unwrap();
    assert_eq!(worker_b.scanned_total(), 500);

    // No key's entries were written twice: one entry per record, and the
    // durable counter saw each record exactly once.
    let state = load_index_build_state(&*db, &store, "by_email").await.unwrap();
    assert_eq!(state.records_scanned, 1000);
    assert_eq!(state.index_state, IndexState::Readable);
    let keys = index_entry_keys(&db, &store, "by_email").await;
    assert_eq!(keys.len(), 1000);
    let mut deduped = keys.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), 1000);
}

#[tokio::test]
async fn test_administrative_stop_aborts_holder() {
    let (db, store) = test_store();
    seed_users(&db, &store, 500).await;

    // Slow the build down with a low rate target so the stop lands mid-run.
    let config = OnlineIndexerConfig::default().with_records_per_second(500);
    let mut indexer = OnlineIndexer::builder()
        .with_database(Arc::clone(&db))
        .with_store(store.clone())
        .with_index("by_email")
        .with_config(config)
        .build()
        .unwrap();

    let db_admin = Arc::clone(&db);
    let store_admin = store.clone();
    let build = tokio::spawn(async move { indexer.build_index().await });

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(check_any_ongoing_online_index_build(&*db_admin, &store_admin, "by_email")
        .await
        .unwrap());
    stop_ongoing_online_index_builds(&*db_admin, &store_admin, "by_email")
        .await
        .unwrap();

    let err = build.await.unwrap().unwrap_err();
    assert!(matches!(err, IndexerError::SessionLost));
    assert!(!check_any_ongoing_online_index_build(&*db_admin, &store_admin, "by_email")
        .await
        .unwrap());

    // Nothing outside the already-committed chunks was written: every
    // committed scan produced exactly one entry.
    let state = load_index_build_state(&*db_admin, &store_admin, "by_email")
        .await
        .unwrap();
    assert!(state.records_scanned < 500);
    assert_eq!(
        count_index_entries(&db_admin, &store_admin, "by_email").await as u64,
        state.records_scanned
    );
    assert_eq!(state.index_state, IndexState::WriteOnly);
}

#[tokio::test]
async fn test_permissive_mode_without_session() {
    let (db, store) = test_store();
    seed_users(&db, &store, 50).await;
    set_state(&db, &store, "by_email", IndexState::WriteOnly).await;

    // The pre-session workflow: caller transitioned the state itself and
    // builds without a lease. Permitted, warned about, still correct.
    let mut indexer = OnlineIndexer::builder()
        .with_database(Arc::clone(&db))
        .with_store(store.clone())
        .with_index("by_email")
        .with_config(fast_config())
        .with_synchronized_session(false)
        .with_state_precondition(IndexStatePrecondition::ErrorIfDisabledContinueIfWriteOnly)
        .build()
        .unwrap();
    indexer.build_index().await.unwrap();
    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::Readable);
    assert_eq!(count_index_entries(&db, &store, "by_email").await, 50);
}

#[tokio::test]
async fn test_error_if_disabled_precondition() {
    let (db, store) = test_store();
    seed_users(&db, &store, 10).await;

    let mut indexer = OnlineIndexer::builder()
        .with_database(Arc::clone(&db))
        .with_store(store.clone())
        .with_index("by_email")
        .with_config(fast_config())
        .with_state_precondition(IndexStatePrecondition::ErrorIfDisabledContinueIfWriteOnly)
        .build()
        .unwrap();
    assert!(matches!(
        indexer.build_index().await,
        Err(IndexerError::IndexDisabled)
    ));
}

#[tokio::test]
async fn test_force_build_rebuilds_readable_index() {
    let (db, store) = test_store();
    seed_users(&db, &store, 100).await;

    let mut indexer = indexer_for(&db, &store, "by_email");
    indexer.build_index().await.unwrap();
    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::Readable);

    // Default precondition: readable means done, even with new data. (The
    // new records' entries still arrive through foreground maintenance.)
    let more: Vec<_> = (100..200).map(user_record).collect();
    seed_records(&db, &store, &more).await;
    let mut again = indexer_for(&db, &store, "by_email");
    again.build_index().await.unwrap();
    assert_eq!(again.scanned_total(), 0);

    // ForceBuild tears it back to write-only, clears, and rebuilds all 200.
    let mut forced = OnlineIndexer::builder()
        .with_database(Arc::clone(&db))
        .with_store(store.clone())
        .with_index("by_email")
        .with_config(fast_config())
        .with_state_precondition(IndexStatePrecondition::ForceBuild)
        .build()
        .unwrap();
    forced.build_index().await.unwrap();
    assert_eq!(forced.scanned_total(), 200);
    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::Readable);
    assert_eq!(count_index_entries(&db, &store, "by_email").await, 200);
}

#[tokio::test]
async fn test_build_if_disabled_skips_write_only() {
    let (db, store) = test_store();
    seed_users(&db, &store, 20).await;
    set_state(&db, &store, "by_email", IndexState::WriteOnly).await;

    // Someone else's build is presumed in progress; this is a no-op.
    let mut indexer = OnlineIndexer::builder()
        .with_database(Arc::clone(&db))
        .with_store(store.clone())
        .with_index("by_email")
        .with_config(fast_config())
        .with_state_precondition(IndexStatePrecondition::BuildIfDisabled)
        .build()
        .unwrap();
    indexer.build_index().await.unwrap();
    assert_eq!(indexer.scanned_total(), 0);
    assert_eq!(current_state(&db, &store, "by_email").await, IndexState::WriteOnly);
}
