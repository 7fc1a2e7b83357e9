//! Persistent set of built key ranges
//!
//! The range set is the builder's durable checkpoint and its safety
//! mechanism: an interval can be recorded as built at most once, so two
//! workers (or one worker retrying after `commit_unknown_result`) can never
//! reflect the same record into the index twice.
//!
//! One store entry per built interval: the key is the interval's begin bound,
//! the value its end bound. Intervals are kept disjoint and maximally
//! coalesced -- inserting an interval that touches its neighbors merges them
//! into a single entry. The empty byte string encodes the open lower end of
//! the domain and a single `0xFF` byte the open upper end; neither collides
//! with a tuple-encoded key.

use crate::error::Result;
use strata_db_core::{successor, Error, KeyRange, KvTransaction, Subspace};

const END_INF: &[u8] = &[0xFF];

fn enc_begin(bound: Option<&[u8]>) -> Vec<u8> {
    bound.map(<[u8]>::to_vec).unwrap_or_default()
}

fn enc_end(bound: Option<&[u8]>) -> Vec<u8> {
    bound.map(<[u8]>::to_vec).unwrap_or_else(|| END_INF.to_vec())
}

fn dec_begin(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_vec())
    }
}

fn dec_end(raw: &[u8]) -> Option<Vec<u8>> {
    if raw == END_INF {
        None
    } else {
        Some(raw.to_vec())
    }
}

enum InsertOutcome {
    Inserted,
    /// Nothing was mutated; carries the first key of the overlap
    Overlap(Vec<u8>),
    /// Empty interval; nothing to do
    Empty,
}

/// The set of already-built intervals for one index
#[derive(Debug, Clone)]
pub struct RangeSet {
    subspace: Subspace,
}

impl RangeSet {
    /// Range set over the given subspace
    pub fn new(subspace: Subspace) -> Self {
        RangeSet { subspace }
    }

    /// Record `[begin, end)` as built if it overlaps nothing
    ///
    /// Returns `true` on success (coalescing with any touching neighbors)
    /// and `false`, with no mutation, if any part of the interval was
    /// already built. An empty interval succeeds trivially.
    pub async fn insert_if_not_present<T: KvTransaction>(
        &self,
        txn: &mut T,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<bool> {
        match self.try_insert(txn, begin, end).await? {
            InsertOutcome::Inserted | InsertOutcome::Empty => Ok(true),
            InsertOutcome::Overlap(_) => Ok(false),
        }
    }

    /// Overlap-reporting variant of [`RangeSet::insert_if_not_present`]
    ///
    /// Returns `None` on success, or `Some(first overlapping key)` with no
    /// mutation when the interval was partly built already.
    pub async fn insert_range<T: KvTransaction>(
        &self,
        txn: &mut T,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        match self.try_insert(txn, begin, end).await? {
            InsertOutcome::Inserted | InsertOutcome::Empty => Ok(None),
            InsertOutcome::Overlap(key) => Ok(Some(key)),
        }
    }

    async fn try_insert<T: KvTransaction>(
        &self,
        txn: &mut T,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<InsertOutcome> {
        let b = enc_begin(begin);
        let e = enc_end(end);
        if b == e {
            return Ok(InsertOutcome::Empty);
        }
        if e != END_INF && b > e {
            return Err(Error::InvalidKey("inverted range".into()).into());
        }

        // Last interval starting at or before b.
        let (space_begin, _) = self.subspace.range();
        let pred = txn
            .scan(&space_begin, &self.subspace.pack_raw(&successor(&b)), Some(1), true)
            .await?
            .pop();
        let mut merge_begin = b.clone();
        if let Some(kv) = &pred {
            let pred_end = &kv.value;
            if pred_end.as_slice() == END_INF || pred_end.as_slice() > b.as_slice() {
                return Ok(InsertOutcome::Overlap(b));
            }
            if pred_end.as_slice() == b.as_slice() {
                // Touching on the left: extend the predecessor instead.
                let pred_begin = self
                    .subspace
                    .unpack_raw(&kv.key)
                    .ok_or_else(|| Error::InvalidKey("range entry outside subspace".into()))?;
                merge_begin = pred_begin.to_vec();
                txn.clear(&kv.key);
            }
        }

        // First interval starting inside (b, e).
        if let Some(kv) = txn
            .scan(
                &self.subspace.pack_raw(&successor(&b)),
                &self.subspace.pack_raw(&e),
                Some(1),
                false,
            )
            .await?
            .into_iter()
            .next()
        {
            let overlap_begin = self
                .subspace
                .unpack_raw(&kv.key)
                .ok_or_else(|| Error::InvalidKey("range entry outside subspace".into()))?;
            return Ok(InsertOutcome::Overlap(overlap_begin.to_vec()));
        }

        // Touching on the right: absorb an interval starting exactly at e.
        let mut merge_end = e.clone();
        if e != END_INF {
            let right_key = self.subspace.pack_raw(&e);
            if let Some(right_end) = txn.get(&right_key).await? {
                merge_end = right_end;
                txn.clear(&right_key);
            }
        }

        txn.set(&self.subspace.pack_raw(&merge_begin), &merge_end);
        Ok(InsertOutcome::Inserted)
    }

    /// Unbuilt ranges within `[domain_begin, domain_end)`, in key order
    ///
    /// Returns at most `limit` ranges when given. An empty result means the
    /// domain is fully built.
    pub async fn missing_ranges<T: KvTransaction>(
        &self,
        txn: &mut T,
        domain_begin: Option<&[u8]>,
        domain_end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<KeyRange>> {
        let lo = enc_begin(domain_begin);
        let hi = enc_end(domain_end);
        if hi != END_INF && lo >= hi {
            return Ok(Vec::new());
        }
        let covered = |cursor: &[u8]| cursor == END_INF || (hi != END_INF && cursor >= hi.as_slice());

        let mut out = Vec::new();
        let mut cursor = lo.clone();

        // An interval starting at or before lo may already cover the front.
        let (space_begin, _) = self.subspace.range();
        if let Some(kv) = txn
            .scan(&space_begin, &self.subspace.pack_raw(&successor(&lo)), Some(1), true)
            .await?
            .pop()
        {
            if kv.value.as_slice() == END_INF || kv.value.as_slice() > cursor.as_slice() {
                cursor = kv.value.clone();
            }
        }

        let entries = txn
            .scan(
                &self.subspace.pack_raw(&successor(&lo)),
                &self.subspace.pack_raw(&hi),
                None,
                false,
            )
            .await?;
        for kv in entries {
            if covered(&cursor) {
                break;
            }
            let begin = self
                .subspace
                .unpack_raw(&kv.key)
                .ok_or_else(|| Error::InvalidKey("range entry outside subspace".into()))?;
            if begin > cursor.as_slice() {
                out.push(KeyRange::from_raw(dec_begin(&cursor), dec_end(begin)));
                if limit.is_some_and(|l| out.len() >= l) {
                    return Ok(out);
                }
            }
            if kv.value.as_slice() == END_INF || kv.value.as_slice() > cursor.as_slice() {
                cursor = kv.value.clone();
            }
        }

        if !covered(&cursor) {
            out.push(KeyRange::from_raw(dec_begin(&cursor), dec_end(&hi)));
        }
        Ok(out)
    }

    /// First unbuilt range over the whole domain, or `None` when fully built
    pub async fn first_missing_range<T: KvTransaction>(
        &self,
        txn: &mut T,
    ) -> Result<Option<KeyRange>> {
        Ok(self
            .missing_ranges(txn, None, None, Some(1))
            .await?
            .into_iter()
            .next())
    }

    /// Whether the whole domain is built
    pub async fn is_fully_built<T: KvTransaction>(&self, txn: &mut T) -> Result<bool> {
        Ok(self.first_missing_range(txn).await?.is_none())
    }

    /// Number of stored intervals (coalescing keeps this small)
    pub async fn interval_count<T: KvTransaction>(&self, txn: &mut T) -> Result<usize> {
        let (begin, end) = self.subspace.range();
        Ok(txn.scan(&begin, &end, None, false).await?.len())
    }
}
