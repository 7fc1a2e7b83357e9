//! Transactional ordered key-value store
//!
//! This module defines the store traits the rest of the workspace builds on,
//! plus [`MemoryKv`], an in-memory reference implementation used by tests and
//! embedded callers.
//!
//! ## Traits
//!
//! - `KvDatabase`: opens transactions at a chosen priority
//! - `KvTransaction`: snapshot reads, ordered scans, buffered mutations,
//!   conflict-free atomic adds, and a conflict-serializable commit
//!
//! ## Semantics
//!
//! Reads observe the committed state as of the transaction's read version,
//! overlaid with the transaction's own mutations. Commit fails with
//! `Error::Conflict` if any key in the transaction's read set was modified by
//! a commit after the read version. Mutations are invisible to other
//! transactions until commit.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

/// Exchange rate between commit versions and wall-clock milliseconds
///
/// Version-denominated deadlines (lease expiries) are computed as
/// `read_version + millis * VERSIONS_PER_MILLISECOND`. Store implementations
/// must advance versions at least this fast while commits are occurring.
pub const VERSIONS_PER_MILLISECOND: i64 = 1_000;

/// Priority class for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPriority {
    /// Normal foreground priority
    #[default]
    Default,
    /// Lowest priority; background work that should yield to foreground load
    Batch,
}

/// A key-value pair returned by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Absolute key bytes
    pub key: Vec<u8>,
    /// Value bytes
    pub value: Vec<u8>,
}

/// One transaction against a [`KvDatabase`]
///
/// Mutating methods buffer locally; nothing is visible to other transactions
/// until [`KvTransaction::commit`] succeeds. A transaction must not be used
/// after `commit` returns (success or failure).
#[async_trait]
pub trait KvTransaction: Send {
    /// Snapshot read of a single key
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ordered scan of `[begin, end)`
    ///
    /// Returns at most `limit` pairs when given; `reverse` yields descending
    /// key order starting from the end of the range.
    async fn scan(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<KeyValue>>;

    /// Buffer a write
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffer a single-key delete
    fn clear(&mut self, key: &[u8]);

    /// Buffer a range delete over `[begin, end)`
    fn clear_range(&mut self, begin: &[u8], end: &[u8]);

    /// Buffer a conflict-free little-endian 64-bit add
    ///
    /// Applied against the latest committed value at commit time; concurrent
    /// adders do not conflict with one another.
    fn atomic_add(&mut self, key: &[u8], delta: i64);

    /// The read version this transaction's snapshot observes
    async fn read_version(&mut self) -> Result<i64>;

    /// Commit, returning the commit version
    async fn commit(&mut self) -> Result<i64>;
}

/// A transactional ordered key-value database
#[async_trait]
pub trait KvDatabase: Send + Sync + 'static {
    /// Concrete transaction type
    type Transaction: KvTransaction;

    /// Open a transaction at the given priority
    async fn begin(&self, priority: TransactionPriority) -> Result<Self::Transaction>;
}

/// Decode a little-endian counter value, zero-extending short values
pub fn decode_le64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    let n = bytes.len().min(8);
    raw[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(raw)
}

// ============================================================================
// MemoryKv
// ============================================================================

/// Outcome of an injected commit fault
pub enum CommitFault {
    /// Abort the commit; nothing is applied
    Fail(Error),
    /// Apply the commit, then report the error anyway
    ///
    /// Models `commit_unknown_result`: the work landed but the caller cannot
    /// know that.
    ApplyThenFail(Error),
}

/// Hook observing commit sequence numbers and optionally injecting faults
pub type CommitFaultHook = Box<dyn Fn(u64) -> Option<CommitFault> + Send + Sync>;

#[derive(Debug, Clone)]
struct Versioned {
    version: i64,
    value: Option<Vec<u8>>,
}

struct MemoryKvInner {
    /// Full MVCC history per key; the last entry is the latest state.
    /// Never pruned -- this store backs tests and embedded use, not
    /// long-lived production data.
    history: BTreeMap<Vec<u8>, Vec<Versioned>>,
    last_commit_version: i64,
    /// Highest read version handed to any transaction; commits must land
    /// strictly above it so open snapshots stay isolated.
    max_read_version: i64,
    epoch: Instant,
    commit_seq: u64,
    max_transaction_bytes: Option<usize>,
    commit_fault: Option<CommitFaultHook>,
}

impl MemoryKvInner {
    fn current_version(&self) -> i64 {
        let elapsed = i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX / 2)
            * VERSIONS_PER_MILLISECOND;
        elapsed.max(self.last_commit_version)
    }

    fn value_at(&self, key: &[u8], version: i64) -> Option<Vec<u8>> {
        let history = self.history.get(key)?;
        history
            .iter()
            .rev()
            .find(|v| v.version <= version)
            .and_then(|v| v.value.clone())
    }

    fn latest_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.history
            .get(key)
            .and_then(|h| h.last())
            .and_then(|v| v.value.clone())
    }
}

/// In-memory [`KvDatabase`] with optimistic conflict detection
///
/// The version clock is coupled to wall-clock time through
/// [`VERSIONS_PER_MILLISECOND`], so version-denominated lease expiries behave
/// in real time. For tests, commits can be made to fail on demand with
/// [`MemoryKv::set_commit_fault`] and a transaction byte budget can be
/// enforced with [`MemoryKv::set_max_transaction_bytes`].
#[derive(Clone)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryKvInner>>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    /// Create an empty store
    pub fn new() -> Self {
        MemoryKv {
            inner: Arc::new(Mutex::new(MemoryKvInner {
                history: BTreeMap::new(),
                last_commit_version: 0,
                max_read_version: 0,
                epoch: Instant::now(),
                commit_seq: 0,
                max_transaction_bytes: None,
                commit_fault: None,
            })),
        }
    }

    /// Enforce `Error::TransactionTooLarge` beyond this mutation volume
    pub fn set_max_transaction_bytes(&self, limit: Option<usize>) {
        self.inner.lock().max_transaction_bytes = limit;
    }

    /// Install a commit fault hook
    ///
    /// The hook observes the 1-based sequence number of each commit that
    /// passed conflict and budget checks, and may inject a failure.
    pub fn set_commit_fault(&self, hook: Option<CommitFaultHook>) {
        self.inner.lock().commit_fault = hook;
    }

    /// Number of live (non-deleted) keys, for test assertions
    pub fn live_key_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .history
            .values()
            .filter(|h| h.last().is_some_and(|v| v.value.is_some()))
            .count()
    }
}

#[async_trait]
impl KvDatabase for MemoryKv {
    type Transaction = MemoryTransaction;

    async fn begin(&self, priority: TransactionPriority) -> Result<Self::Transaction> {
        let read_version = {
            let mut inner = self.inner.lock();
            let version = inner.current_version();
            inner.max_read_version = inner.max_read_version.max(version);
            version
        };
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            read_version,
            ops: Vec::new(),
            read_set: Vec::new(),
            closed: false,
            _priority: priority,
        })
    }
}

#[derive(Debug, Clone)]
enum Op {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(Vec<u8>, Vec<u8>),
    Add(Vec<u8>, i64),
}

impl Op {
    fn mutation_bytes(&self) -> usize {
        match self {
            Op::Set(k, v) => k.len() + v.len(),
            Op::Clear(k) => k.len(),
            Op::ClearRange(b, e) => b.len() + e.len(),
            Op::Add(k, _) => k.len() + 8,
        }
    }
}

/// Transaction handle for [`MemoryKv`]
pub struct MemoryTransaction {
    inner: Arc<Mutex<MemoryKvInner>>,
    read_version: i64,
    ops: Vec<Op>,
    /// Half-open byte ranges this transaction has read
    read_set: Vec<(Vec<u8>, Vec<u8>)>,
    closed: bool,
    _priority: TransactionPriority,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::TransactionClosed)
        } else {
            Ok(())
        }
    }

    /// Resolve the local overlay for a single key, if any op touches it
    fn overlay_for(&self, key: &[u8], snapshot: Option<Vec<u8>>) -> Option<Vec<u8>> {
        let mut current = snapshot;
        for op in &self.ops {
            match op {
                Op::Set(k, v) if k.as_slice() == key => current = Some(v.clone()),
                Op::Clear(k) if k.as_slice() == key => current = None,
                Op::ClearRange(b, e) if key >= b.as_slice() && key < e.as_slice() => {
                    current = None;
                }
                Op::Add(k, delta) if k.as_slice() == key => {
                    let base = current.as_deref().map(decode_le64).unwrap_or(0);
                    current = Some(base.wrapping_add(*delta).to_le_bytes().to_vec());
                }
                _ => {}
            }
        }
        current
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let snapshot = self.inner.lock().value_at(key, self.read_version);
        self.read_set
            .push((key.to_vec(), crate::key::successor(key)));
        Ok(self.overlay_for(key, snapshot))
    }

    async fn scan(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<KeyValue>> {
        self.ensure_open()?;
        if begin >= end || limit == Some(0) {
            return Ok(Vec::new());
        }

        // Committed snapshot within the range, overlaid with local ops.
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        {
            let inner = self.inner.lock();
            for (key, _) in inner
                .history
                .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            {
                merged.insert(key.clone(), inner.value_at(key, self.read_version));
            }
        }
        for op in &self.ops {
            match op {
                Op::Set(k, v) if k.as_slice() >= begin && k.as_slice() < end => {
                    merged.insert(k.clone(), Some(v.clone()));
                }
                Op::Clear(k) if k.as_slice() >= begin && k.as_slice() < end => {
                    merged.insert(k.clone(), None);
                }
                Op::ClearRange(b, e) => {
                    let clear_begin = b.as_slice().max(begin);
                    let clear_end = e.as_slice().min(end);
                    if clear_begin < clear_end {
                        let cleared: Vec<Vec<u8>> = merged
                            .range::<[u8], _>((
                                Bound::Included(clear_begin),
                                Bound::Excluded(clear_end),
                            ))
                            .map(|(k, _)| k.clone())
                            .collect();
                        for k in cleared {
                            merged.insert(k, None);
                        }
                    }
                }
                Op::Add(k, delta) if k.as_slice() >= begin && k.as_slice() < end => {
                    let base = merged
                        .get(k.as_slice())
                        .cloned()
                        .flatten()
                        .as_deref()
                        .map(decode_le64)
                        .unwrap_or(0);
                    merged.insert(k.clone(), Some(base.wrapping_add(*delta).to_le_bytes().to_vec()));
                }
                _ => {}
            }
        }

        let live = merged
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| KeyValue { key, value }));
        let mut results: Vec<KeyValue> = if reverse {
            let mut v: Vec<KeyValue> = live.collect();
            v.reverse();
            v
        } else {
            live.collect()
        };
        let limited = limit.is_some_and(|l| results.len() > l);
        if let Some(l) = limit {
            results.truncate(l);
        }

        // Conflict range: the portion of the range actually observed.
        let (conflict_begin, conflict_end) = if limited {
            let last = &results.last().expect("limited implies non-empty").key;
            if reverse {
                (last.clone(), end.to_vec())
            } else {
                (begin.to_vec(), crate::key::successor(last))
            }
        } else {
            (begin.to_vec(), end.to_vec())
        };
        self.read_set.push((conflict_begin, conflict_end));

        Ok(results)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(Op::Set(key.to_vec(), value.to_vec()));
    }

    fn clear(&mut self, key: &[u8]) {
        self.ops.push(Op::Clear(key.to_vec()));
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) {
        self.ops.push(Op::ClearRange(begin.to_vec(), end.to_vec()));
    }

    fn atomic_add(&mut self, key: &[u8], delta: i64) {
        self.ops.push(Op::Add(key.to_vec(), delta));
    }

    async fn read_version(&mut self) -> Result<i64> {
        self.ensure_open()?;
        Ok(self.read_version)
    }

    async fn commit(&mut self) -> Result<i64> {
        self.ensure_open()?;
        self.closed = true;
        let mut inner = self.inner.lock();

        // Optimistic conflict check: anything in our read set modified after
        // our snapshot fails the commit.
        for (begin, end) in &self.read_set {
            let conflicting = inner
                .history
                .range::<[u8], _>((Bound::Included(begin.as_slice()), Bound::Excluded(end.as_slice())))
                .any(|(_, h)| h.last().is_some_and(|v| v.version > self.read_version));
            if conflicting {
                return Err(Error::Conflict);
            }
        }

        if let Some(budget) = inner.max_transaction_bytes {
            let bytes: usize = self.ops.iter().map(Op::mutation_bytes).sum();
            if bytes > budget {
                return Err(Error::TransactionTooLarge { bytes });
            }
        }

        inner.commit_seq += 1;
        let fault = inner
            .commit_fault
            .as_ref()
            .and_then(|hook| hook(inner.commit_seq));
        if let Some(CommitFault::Fail(err)) = fault {
            return Err(err);
        }

        let version = inner
            .current_version()
            .max(inner.last_commit_version + 1)
            .max(inner.max_read_version + 1);
        for op in self.ops.drain(..) {
            match op {
                Op::Set(key, value) => {
                    inner
                        .history
                        .entry(key)
                        .or_default()
                        .push(Versioned { version, value: Some(value) });
                }
                Op::Clear(key) => {
                    if inner.latest_value(&key).is_some() {
                        inner
                            .history
                            .entry(key)
                            .or_default()
                            .push(Versioned { version, value: None });
                    }
                }
                Op::ClearRange(begin, end) => {
                    let doomed: Vec<Vec<u8>> = inner
                        .history
                        .range::<[u8], _>((
                            Bound::Included(begin.as_slice()),
                            Bound::Excluded(end.as_slice()),
                        ))
                        .filter(|(_, h)| h.last().is_some_and(|v| v.value.is_some()))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in doomed {
                        inner
                            .history
                            .entry(key)
                            .or_default()
                            .push(Versioned { version, value: None });
                    }
                }
                Op::Add(key, delta) => {
                    let base = inner.latest_value(&key).as_deref().map(decode_le64).unwrap_or(0);
                    inner.history.entry(key).or_default().push(Versioned {
                        version,
                        value: Some(base.wrapping_add(delta).to_le_bytes().to_vec()),
                    });
                }
            }
        }
        inner.last_commit_version = version;

        if let Some(CommitFault::ApplyThenFail(err)) = fault {
            return Err(err);
        }
        Ok(version)
    }
}
