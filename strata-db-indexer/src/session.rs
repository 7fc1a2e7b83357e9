//! Build session lease
//!
//! At most one worker should spend I/O building a given index at a time. The
//! lease is a `(session id, expiry version)` record under the index's lock
//! key: a worker acquires it by committing a new record over an absent or
//! expired one, and every subsequent transaction it runs re-reads and renews
//! the record. Because the read is conflict-serializable with competing
//! acquisitions, a stolen lease is always detected before any of the loser's
//! work becomes visible.
//!
//! The lease is a performance shield, not a safety mechanism -- the range set
//! already prevents duplicated index writes. Expiry is denominated in store
//! versions via [`VERSIONS_PER_MILLISECOND`].

use crate::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use strata_db_core::{
    Error, KvDatabase, KvTransaction, TransactionPriority, VERSIONS_PER_MILLISECOND,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    session_id: Uuid,
    expiry_version: i64,
}

impl LeaseRecord {
    fn is_live(&self, read_version: i64) -> bool {
        self.expiry_version > read_version
    }
}

async fn load_lease<T: KvTransaction>(txn: &mut T, lock_key: &[u8]) -> Result<Option<LeaseRecord>> {
    match txn.get(lock_key).await? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).map_err(|e| Error::Serialization(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

/// An acquired build session
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    lock_key: Vec<u8>,
    lease_millis: u64,
}

impl Session {
    /// Acquire the lease, failing with [`IndexerError::SessionLocked`] if a
    /// live lease is held by anyone else
    pub async fn start<D: KvDatabase>(
        db: &D,
        lock_key: Vec<u8>,
        lease_millis: u64,
    ) -> Result<Session> {
        let id = Uuid::new_v4();
        let mut txn = db.begin(TransactionPriority::Batch).await?;
        let read_version = txn.read_version().await?;
        if let Some(existing) = load_lease(&mut txn, &lock_key).await? {
            if existing.is_live(read_version) {
                return Err(IndexerError::SessionLocked);
            }
        }
        let session = Session { id, lock_key, lease_millis };
        session.write_lease(&mut txn, read_version);
        match txn.commit().await {
            Ok(_) => {
                debug!(session_id = %id, "acquired index build session");
                Ok(session)
            }
            // Losing the race to another acquirer presents as a conflict.
            Err(Error::Conflict) => Err(IndexerError::SessionLocked),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-join an existing session by id (e.g. a helper worker sharing a
    /// coordinator's lease)
    ///
    /// Acquires like [`Session::start`], except that a live lease is joined
    /// rather than refused when its persisted id matches `id`. A live lease
    /// under any other id fails with [`IndexerError::SessionLocked`]; an
    /// absent or expired record is claimed under `id`.
    pub async fn join<D: KvDatabase>(
        db: &D,
        lock_key: Vec<u8>,
        id: Uuid,
        lease_millis: u64,
    ) -> Result<Session> {
        let mut txn = db.begin(TransactionPriority::Batch).await?;
        let read_version = txn.read_version().await?;
        if let Some(existing) = load_lease(&mut txn, &lock_key).await? {
            if existing.session_id != id && existing.is_live(read_version) {
                return Err(IndexerError::SessionLocked);
            }
        }
        let session = Session { id, lock_key, lease_millis };
        session.write_lease(&mut txn, read_version);
        match txn.commit().await {
            Ok(_) => Ok(session),
            Err(Error::Conflict) => Err(IndexerError::SessionLocked),
            Err(e) => Err(e.into()),
        }
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Check the lease is still ours and push its expiry forward
    ///
    /// Must run at the top of every transaction executed under this session;
    /// fails with [`IndexerError::SessionLost`] when the record is gone or
    /// owned by someone else.
    pub async fn verify_and_renew<T: KvTransaction>(&self, txn: &mut T) -> Result<()> {
        let read_version = txn.read_version().await?;
        match load_lease(txn, &self.lock_key).await? {
            Some(existing) if existing.session_id == self.id => {
                self.write_lease(txn, read_version);
                Ok(())
            }
            _ => Err(IndexerError::SessionLost),
        }
    }

    fn write_lease<T: KvTransaction>(&self, txn: &mut T, read_version: i64) {
        let record = LeaseRecord {
            session_id: self.id,
            expiry_version: read_version
                + self.lease_millis as i64 * VERSIONS_PER_MILLISECOND,
        };
        txn.set(
            &self.lock_key,
            &serde_json::to_vec(&record).expect("lease record serializes"),
        );
    }

    /// Release the lease if this session still holds it
    pub async fn end<D: KvDatabase>(&self, db: &D) -> Result<()> {
        let mut txn = db.begin(TransactionPriority::Batch).await?;
        if let Some(existing) = load_lease(&mut txn, &self.lock_key).await? {
            if existing.session_id == self.id {
                txn.clear(&self.lock_key);
                txn.commit().await?;
                debug!(session_id = %self.id, "released index build session");
            }
        }
        Ok(())
    }
}

/// Administrative unlock: delete the lease unconditionally
///
/// The current holder's next [`Session::verify_and_renew`] fails with
/// [`IndexerError::SessionLost`].
pub async fn end_any_session<D: KvDatabase>(db: &D, lock_key: &[u8]) -> Result<()> {
    let mut txn = db.begin(TransactionPriority::Default).await?;
    txn.clear(lock_key);
    txn.commit().await?;
    Ok(())
}

/// Read-only probe: is a live lease present?
pub async fn check_active_session<D: KvDatabase>(db: &D, lock_key: &[u8]) -> Result<bool> {
    let mut txn = db.begin(TransactionPriority::Default).await?;
    let read_version = txn.read_version().await?;
    Ok(load_lease(&mut txn, lock_key)
        .await?
        .is_some_and(|lease| lease.is_live(read_version)))
}
