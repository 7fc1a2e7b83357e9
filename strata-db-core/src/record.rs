//! Record store facade
//!
//! Records are typed JSON documents keyed by a tuple primary key. Secondary
//! indexes are declared in a [`Schema`]; every index not in the `Disabled`
//! lifecycle state is maintained inline by foreground writes, which is what
//! lets an online build run while the store keeps taking traffic.
//!
//! ## Persisted layout (under the store root subspace)
//!
//! - `r/<pk>` -- record documents
//! - `index/<name>/e/<entry key>` -- index entries
//! - `index/<name>/range/` -- built-range bookkeeping for online builds
//! - `index/<name>/scanned` -- build progress counter (little-endian 64-bit)
//! - `index/<name>/lock` -- build session lease
//! - `index/<name>/type` -- build method marker
//! - `meta/state/<name>` -- index lifecycle state

use crate::error::{Error, Result};
use crate::key::{Element, Key, KeyRange};
use crate::kv::{KeyValue, KvTransaction};
use crate::subspace::Subspace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Schema types
// ============================================================================

/// A declared record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeDef {
    /// Type name
    pub name: String,
    /// Whether this type is assembled at query time from stored base records
    pub synthetic: bool,
    /// For synthetic types, the stored types it is assembled from
    pub base_types: Vec<String>,
}

impl RecordTypeDef {
    /// A plain stored record type
    pub fn stored(name: impl Into<String>) -> Self {
        RecordTypeDef {
            name: name.into(),
            synthetic: false,
            base_types: Vec::new(),
        }
    }

    /// A synthetic type assembled from the given stored base types
    pub fn synthetic(name: impl Into<String>, base_types: Vec<String>) -> Self {
        RecordTypeDef {
            name: name.into(),
            synthetic: true,
            base_types,
        }
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record type name
    pub record_type: String,
    /// Primary key
    pub primary_key: Key,
    /// Document body
    pub fields: serde_json::Value,
}

impl Record {
    /// Build a record
    pub fn new(record_type: impl Into<String>, primary_key: Key, fields: serde_json::Value) -> Self {
        Record {
            record_type: record_type.into(),
            primary_key,
            fields,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord<'a> {
    #[serde(rename = "type")]
    record_type: std::borrow::Cow<'a, str>,
    fields: serde_json::Value,
}

/// One derived index entry for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Entry key within the index's entry subspace
    pub key: Key,
    /// Entry value; by convention carries the packed primary key so the
    /// record can be recovered from the entry alone
    pub value: Vec<u8>,
}

/// Derives index entries from a record
///
/// Implementations must be pure: the same record always yields the same
/// entry set. Entry keys must make the (entry, record) pair unique, which
/// in practice means appending the primary key elements.
pub trait IndexEntryPlanner: Send + Sync {
    /// Entries for one record
    fn entries(&self, record: &Record) -> Vec<IndexEntry>;
}

/// Stock planner: index a single top-level JSON field
///
/// Entry key is `(field value, ...primary key)`; entry value is the packed
/// primary key. Records without the field produce no entries.
#[derive(Debug, Clone)]
pub struct FieldPlanner {
    /// JSON field to index
    pub field: String,
}

impl FieldPlanner {
    /// Planner over the given field
    pub fn new(field: impl Into<String>) -> Self {
        FieldPlanner { field: field.into() }
    }
}

impl IndexEntryPlanner for FieldPlanner {
    fn entries(&self, record: &Record) -> Vec<IndexEntry> {
        let element = match record.fields.get(&self.field) {
            Some(serde_json::Value::String(s)) => Element::Str(s.clone()),
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(v) => Element::Int(v),
                None => Element::Str(n.to_string()),
            },
            Some(serde_json::Value::Bool(b)) => Element::Int(i64::from(*b)),
            _ => return Vec::new(),
        };
        let key = Key::from_elements(vec![element]).concat(&record.primary_key);
        vec![IndexEntry {
            key,
            value: record.primary_key.pack(),
        }]
    }
}

/// An index declaration, immutable for the duration of a build
#[derive(Clone)]
pub struct IndexDescriptor {
    /// Index name
    pub name: String,
    /// Record types this index covers (may include synthetic types)
    pub record_types: Vec<String>,
    /// Whether re-deriving entries for an already-indexed record is harmless
    pub idempotent: bool,
    /// Whether any covered type is synthetic
    pub synthetic: bool,
    planner: Arc<dyn IndexEntryPlanner>,
}

impl IndexDescriptor {
    /// Declare an index
    pub fn new(
        name: impl Into<String>,
        record_types: Vec<String>,
        planner: Arc<dyn IndexEntryPlanner>,
    ) -> Self {
        IndexDescriptor {
            name: name.into(),
            record_types,
            idempotent: true,
            synthetic: false,
            planner,
        }
    }

    /// Mark the index non-idempotent (e.g. aggregate maintenance)
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Mark the index as covering synthetic types
    pub fn with_synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }

    /// Derive the entries for one record
    pub fn entries(&self, record: &Record) -> Vec<IndexEntry> {
        self.planner.entries(record)
    }
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("name", &self.name)
            .field("record_types", &self.record_types)
            .field("idempotent", &self.idempotent)
            .field("synthetic", &self.synthetic)
            .finish_non_exhaustive()
    }
}

/// Index lifecycle state, persisted per (store, index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Not maintained and not readable
    Disabled,
    /// Maintained by foreground writes; not readable
    WriteOnly,
    /// Fully built and readable
    Readable,
    /// Known bad; requires operator intervention
    Corrupt,
}

impl IndexState {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Disabled => "disabled",
            IndexState::WriteOnly => "write_only",
            IndexState::Readable => "readable",
            IndexState::Corrupt => "corrupt",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record types and index declarations for one store
#[derive(Debug, Clone, Default)]
pub struct Schema {
    record_types: Vec<RecordTypeDef>,
    indexes: Vec<Arc<IndexDescriptor>>,
}

impl Schema {
    /// Empty schema
    pub fn new() -> Self {
        Schema::default()
    }

    /// Add a record type
    pub fn with_record_type(mut self, def: RecordTypeDef) -> Self {
        self.record_types.push(def);
        self
    }

    /// Add an index
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(Arc::new(index));
        self
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Option<&Arc<IndexDescriptor>> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// All declared indexes
    pub fn indexes(&self) -> &[Arc<IndexDescriptor>] {
        &self.indexes
    }

    /// Look up a record type by name
    pub fn record_type(&self, name: &str) -> Option<&RecordTypeDef> {
        self.record_types.iter().find(|t| t.name == name)
    }

    /// Expand a type list to the stored types that actually hold its data
    ///
    /// Synthetic types are replaced by their base types; order is preserved
    /// and duplicates removed.
    pub fn expand_to_stored_types(&self, names: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let expanded: Vec<String> = match self.record_type(name) {
                Some(def) if def.synthetic => def.base_types.clone(),
                _ => vec![name.clone()],
            };
            for t in expanded {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// Whether `index` must be maintained for a record of `record_type`
    pub fn index_applies_to(&self, index: &IndexDescriptor, record_type: &str) -> bool {
        self.expand_to_stored_types(&index.record_types)
            .iter()
            .any(|t| t == record_type)
    }
}

// ============================================================================
// Store layout
// ============================================================================

/// Identity and layout of one record store
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// Store name
    pub name: String,
    /// Schema in force
    pub schema: Schema,
    root: Subspace,
}

impl StoreSpec {
    /// Spec for a named store
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        let root = Subspace::from_label(&name);
        StoreSpec { name, schema, root }
    }

    /// Subspace holding record documents
    pub fn records_subspace(&self) -> Subspace {
        self.root.subspace("r")
    }

    fn index_subspace(&self, index: &str) -> Subspace {
        self.root.subspace("index").subspace(index)
    }

    /// Subspace holding an index's entries
    pub fn index_entries_subspace(&self, index: &str) -> Subspace {
        self.index_subspace(index).subspace("e")
    }

    /// Subspace holding an index's built-range bookkeeping
    pub fn index_range_subspace(&self, index: &str) -> Subspace {
        self.index_subspace(index).subspace("range")
    }

    /// Key of an index's build progress counter
    pub fn index_scanned_key(&self, index: &str) -> Vec<u8> {
        self.index_subspace(index).pack(&Key::from_str("scanned"))
    }

    /// Key of an index's build session lease
    pub fn index_lock_key(&self, index: &str) -> Vec<u8> {
        self.index_subspace(index).pack(&Key::from_str("lock"))
    }

    /// Key of an index's build method marker
    pub fn index_type_key(&self, index: &str) -> Vec<u8> {
        self.index_subspace(index).pack(&Key::from_str("type"))
    }

    /// Key of an index's lifecycle state
    pub fn index_state_key(&self, index: &str) -> Vec<u8> {
        self.root
            .subspace("meta")
            .subspace("state")
            .pack(&Key::from_str(index))
    }
}

// ============================================================================
// Record store operations
// ============================================================================

/// Cheap handle for record and index operations against one store
///
/// Holds no transaction; every operation takes the live transaction it should
/// run in, so a single handle serves any number of transactions.
#[derive(Debug, Clone)]
pub struct RecordStore {
    spec: Arc<StoreSpec>,
}

impl RecordStore {
    /// Handle over a store spec
    pub fn new(spec: Arc<StoreSpec>) -> Self {
        RecordStore { spec }
    }

    /// The store spec
    pub fn spec(&self) -> &Arc<StoreSpec> {
        &self.spec
    }

    /// Save a record, maintaining every non-disabled index
    ///
    /// An overwrite retracts the previous version's index entries before the
    /// new version's are written, so indexes never hold entries for record
    /// states that no longer exist.
    pub async fn save_record<T: KvTransaction>(&self, txn: &mut T, record: &Record) -> Result<()> {
        let record_key = self.spec.records_subspace().pack(&record.primary_key);
        if let Some(existing_bytes) = txn.get(&record_key).await? {
            let existing = self.decode_record(&record.primary_key.pack(), &existing_bytes)?;
            self.retract_index_entries(txn, &existing).await?;
        }

        let body = serde_json::to_vec(&StoredRecord {
            record_type: std::borrow::Cow::Borrowed(&record.record_type),
            fields: record.fields.clone(),
        })?;
        txn.set(&record_key, &body);

        for index in self.spec.schema.indexes() {
            if !self.spec.schema.index_applies_to(index, &record.record_type) {
                continue;
            }
            if self.index_state(txn, &index.name).await? == IndexState::Disabled {
                continue;
            }
            for entry in index.entries(record) {
                self.save_index_entry(txn, index, &entry);
            }
        }
        Ok(())
    }

    /// Load a record by primary key
    pub async fn load_record<T: KvTransaction>(
        &self,
        txn: &mut T,
        primary_key: &Key,
    ) -> Result<Option<Record>> {
        self.load_record_raw(txn, &primary_key.pack()).await
    }

    /// Load a record by packed primary key bytes
    pub async fn load_record_raw<T: KvTransaction>(
        &self,
        txn: &mut T,
        packed_key: &[u8],
    ) -> Result<Option<Record>> {
        let abs = self.spec.records_subspace().pack_raw(packed_key);
        match txn.get(&abs).await? {
            Some(bytes) => Ok(Some(self.decode_record(packed_key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a record, retracting its index entries
    pub async fn delete_record<T: KvTransaction>(
        &self,
        txn: &mut T,
        primary_key: &Key,
    ) -> Result<bool> {
        let record_key = self.spec.records_subspace().pack(primary_key);
        match txn.get(&record_key).await? {
            Some(bytes) => {
                let existing = self.decode_record(&primary_key.pack(), &bytes)?;
                self.retract_index_entries(txn, &existing).await?;
                txn.clear(&record_key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Scan records in primary key order
    ///
    /// `range` is relative to the record key space. `limit` bounds the number
    /// of records scanned (not the number surviving the type filter), which
    /// is the contract chunked builds rely on.
    pub async fn scan_records<T: KvTransaction>(
        &self,
        txn: &mut T,
        range: &KeyRange,
        limit: Option<usize>,
        record_types: Option<&[String]>,
    ) -> Result<Vec<Record>> {
        let raw = self.scan_records_raw(txn, range, limit).await?;
        let mut out = Vec::with_capacity(raw.len());
        for kv in raw {
            let rel = self
                .spec
                .records_subspace()
                .unpack_raw(&kv.key)
                .ok_or_else(|| Error::InvalidKey("record key outside store".into()))?;
            let record = self.decode_record(rel, &kv.value)?;
            if record_types.is_none_or(|ts| ts.iter().any(|t| *t == record.record_type)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Scan raw record key-value pairs (absolute keys)
    pub async fn scan_records_raw<T: KvTransaction>(
        &self,
        txn: &mut T,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        let subspace = self.spec.records_subspace();
        let (domain_begin, domain_end) = subspace.range();
        let begin = match &range.begin {
            Some(b) => subspace.pack_raw(b),
            None => domain_begin,
        };
        let end = match &range.end {
            Some(e) => subspace.pack_raw(e),
            None => domain_end,
        };
        txn.scan(&begin, &end, limit, false).await
    }

    fn decode_record(&self, packed_key: &[u8], bytes: &[u8]) -> Result<Record> {
        let stored: StoredRecord<'_> = serde_json::from_slice(bytes)?;
        Ok(Record {
            record_type: stored.record_type.into_owned(),
            primary_key: Key::unpack(packed_key)?,
            fields: stored.fields,
        })
    }

    async fn retract_index_entries<T: KvTransaction>(
        &self,
        txn: &mut T,
        record: &Record,
    ) -> Result<()> {
        for index in self.spec.schema.indexes() {
            if !self.spec.schema.index_applies_to(index, &record.record_type) {
                continue;
            }
            if self.index_state(txn, &index.name).await? == IndexState::Disabled {
                continue;
            }
            let entries = self.spec.index_entries_subspace(&index.name);
            for entry in index.entries(record) {
                txn.clear(&entries.pack(&entry.key));
            }
        }
        Ok(())
    }

    /// Write one index entry, returning the mutation size in bytes
    pub fn save_index_entry<T: KvTransaction>(
        &self,
        txn: &mut T,
        index: &IndexDescriptor,
        entry: &IndexEntry,
    ) -> usize {
        let abs = self.spec.index_entries_subspace(&index.name).pack(&entry.key);
        let bytes = abs.len() + entry.value.len();
        txn.set(&abs, &entry.value);
        bytes
    }

    /// Scan an index's entries; keys are relative to the entry subspace
    pub async fn scan_index<T: KvTransaction>(
        &self,
        txn: &mut T,
        index: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        let subspace = self.spec.index_entries_subspace(index);
        let (domain_begin, domain_end) = subspace.range();
        let begin = match &range.begin {
            Some(b) => subspace.pack_raw(b),
            None => domain_begin,
        };
        let end = match &range.end {
            Some(e) => subspace.pack_raw(e),
            None => domain_end,
        };
        let raw = txn.scan(&begin, &end, limit, false).await?;
        raw.into_iter()
            .map(|kv| {
                let rel = subspace
                    .unpack_raw(&kv.key)
                    .ok_or_else(|| Error::InvalidKey("entry key outside index".into()))?
                    .to_vec();
                Ok(KeyValue { key: rel, value: kv.value })
            })
            .collect()
    }

    /// Current lifecycle state of an index (`Disabled` when unset)
    pub async fn index_state<T: KvTransaction>(&self, txn: &mut T, index: &str) -> Result<IndexState> {
        match txn.get(&self.spec.index_state_key(index)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(IndexState::Disabled),
        }
    }

    /// Set an index's lifecycle state, returning the previous state
    pub async fn set_index_state<T: KvTransaction>(
        &self,
        txn: &mut T,
        index: &str,
        state: IndexState,
    ) -> Result<IndexState> {
        let previous = self.index_state(txn, index).await?;
        txn.set(&self.spec.index_state_key(index), &serde_json::to_vec(&state)?);
        Ok(previous)
    }

    /// Delete an index's entries, built-range bookkeeping, and progress
    /// counter (the lease and build method marker survive)
    pub fn clear_index_data<T: KvTransaction>(&self, txn: &mut T, index: &str) {
        let (e_begin, e_end) = self.spec.index_entries_subspace(index).range();
        txn.clear_range(&e_begin, &e_end);
        let (r_begin, r_end) = self.spec.index_range_subspace(index).range();
        txn.clear_range(&r_begin, &r_end);
        txn.clear(&self.spec.index_scanned_key(index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvDatabase, MemoryKv, TransactionPriority};
    use serde_json::json;

    fn schema_with_index() -> Schema {
        Schema::new()
            .with_record_type(RecordTypeDef::stored("user"))
            .with_index(IndexDescriptor::new(
                "by_name",
                vec!["user".into()],
                Arc::new(FieldPlanner::new("name")),
            ))
    }

    fn store() -> (MemoryKv, RecordStore) {
        let db = MemoryKv::new();
        let spec = Arc::new(StoreSpec::new("test", schema_with_index()));
        (db, RecordStore::new(spec))
    }

    fn user(id: i64, name: &str) -> Record {
        Record::new("user", Key::from_int(id), json!({ "name": name }))
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store.save_record(&mut txn, &user(1, "ada")).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        let loaded = store
            .load_record(&mut txn, &Key::from_int(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.record_type, "user");
        assert_eq!(loaded.fields["name"], "ada");
    }

    #[tokio::test]
    async fn test_disabled_index_not_maintained() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store.save_record(&mut txn, &user(1, "ada")).await.unwrap();
        let entries = store
            .scan_index(&mut txn, "by_name", &KeyRange::all(), None)
            .await
            .unwrap();
        assert!(entries.is_empty());
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_only_index_maintained_and_retracted() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store
            .set_index_state(&mut txn, "by_name", IndexState::WriteOnly)
            .await
            .unwrap();
        store.save_record(&mut txn, &user(1, "ada")).await.unwrap();
        txn.commit().await.unwrap();

        // Overwrite replaces the old entry.
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store.save_record(&mut txn, &user(1, "grace")).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        let entries = store
            .scan_index(&mut txn, "by_name", &KeyRange::all(), None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let key = Key::unpack(&entries[0].key).unwrap();
        assert_eq!(key.elements()[0], Element::Str("grace".into()));
        assert_eq!(entries[0].value, Key::from_int(1).pack());

        // Delete retracts.
        store.delete_record(&mut txn, &Key::from_int(1)).await.unwrap();
        let entries = store
            .scan_index(&mut txn, "by_name", &KeyRange::all(), None)
            .await
            .unwrap();
        assert!(entries.is_empty());
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_records_limit_and_filter() {
        let db = MemoryKv::new();
        let schema = Schema::new()
            .with_record_type(RecordTypeDef::stored("user"))
            .with_record_type(RecordTypeDef::stored("order"));
        let store = RecordStore::new(Arc::new(StoreSpec::new("test", schema)));

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        for i in 0..4 {
            let ty = if i % 2 == 0 { "user" } else { "order" };
            store
                .save_record(&mut txn, &Record::new(ty, Key::from_int(i), json!({})))
                .await
                .unwrap();
        }
        txn.commit().await.unwrap();

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        let filter = vec!["user".to_string()];
        let users = store
            .scan_records(&mut txn, &KeyRange::all(), None, Some(&filter))
            .await
            .unwrap();
        assert_eq!(users.len(), 2);

        // Limit applies to records scanned, not records matched.
        let limited = store
            .scan_records(&mut txn, &KeyRange::all(), Some(2), Some(&filter))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_expand_synthetic_types() {
        let schema = Schema::new()
            .with_record_type(RecordTypeDef::stored("a"))
            .with_record_type(RecordTypeDef::stored("b"))
            .with_record_type(RecordTypeDef::synthetic("joined", vec!["a".into(), "b".into()]));
        let expanded = schema.expand_to_stored_types(&["joined".into(), "a".into()]);
        assert_eq!(expanded, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_set_index_state_returns_previous() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        assert_eq!(
            store.index_state(&mut txn, "by_name").await.unwrap(),
            IndexState::Disabled
        );
        let prev = store
            .set_index_state(&mut txn, "by_name", IndexState::WriteOnly)
            .await
            .unwrap();
        assert_eq!(prev, IndexState::Disabled);
        let prev = store
            .set_index_state(&mut txn, "by_name", IndexState::Readable)
            .await
            .unwrap();
        assert_eq!(prev, IndexState::WriteOnly);
    }

    #[tokio::test]
    async fn test_clear_index_data() {
        let (db, store) = store();
        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store
            .set_index_state(&mut txn, "by_name", IndexState::WriteOnly)
            .await
            .unwrap();
        store.save_record(&mut txn, &user(1, "ada")).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        store.clear_index_data(&mut txn, "by_name");
        txn.commit().await.unwrap();

        let mut txn = db.begin(TransactionPriority::Default).await.unwrap();
        let entries = store
            .scan_index(&mut txn, "by_name", &KeyRange::all(), None)
            .await
            .unwrap();
        assert!(entries.is_empty());
        // The record itself is untouched.
        assert!(store
            .load_record(&mut txn, &Key::from_int(1))
            .await
            .unwrap()
            .is_some());
    }
}
