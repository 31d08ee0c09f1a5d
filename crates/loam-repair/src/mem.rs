//! In-memory catalog.
//!
//! A small but faithful implementation of the catalog seams: real key
//! generation (dotted paths, multikey fan-out, sparse indexes), ordered
//! encoded entries, unique-constraint enforcement, and injectable faults so
//! tests can manufacture exactly the inconsistencies the engine repairs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;
use loam_error::{LoamError, Result};
use loam_keyenc::EncodingPool;
use loam_types::{get_path, Document, EncodingVersion, IndexKey, Namespace, RecordId, Value};
use parking_lot::Mutex;

use crate::catalog::{
    Catalog, Collection, GeneratedKeys, IndexCursor, IndexEntry, KeyCandidates, SecondaryIndex,
};

/// Index definition for [`MemCollection::create_index`].
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    /// Dotted field paths, in key order.
    pub fields: Vec<String>,
    pub unique: bool,
    /// Sparse indexes skip documents where every indexed field is absent.
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|&f| f.to_owned()).collect(),
            unique: false,
            sparse: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// Root of the in-memory catalog.
#[derive(Debug, Default)]
pub struct MemCatalog {
    collections: HashMap<Namespace, MemCollection>,
    refuses_writes: bool,
}

impl MemCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the catalog answer as a node that cannot accept writes.
    pub fn set_refuses_writes(&mut self, refuses: bool) {
        self.refuses_writes = refuses;
    }

    pub fn create_collection(&mut self, ns: Namespace) -> &mut MemCollection {
        self.collections
            .entry(ns.clone())
            .or_insert_with(|| MemCollection::new(ns))
    }

    pub fn collection_mut(&mut self, ns: &Namespace) -> Option<&mut MemCollection> {
        self.collections.get_mut(ns)
    }
}

impl Catalog for MemCatalog {
    type Collection = MemCollection;

    fn collection(&self, ns: &Namespace) -> Option<&MemCollection> {
        self.collections.get(ns)
    }

    fn can_accept_writes(&self, _ns: &Namespace) -> bool {
        !self.refuses_writes
    }
}

/// One collection: documents, a primary-key index, and secondary indexes.
#[derive(Debug)]
pub struct MemCollection {
    ns: Namespace,
    docs: HashMap<RecordId, Document>,
    primary: BTreeMap<Value, RecordId>,
    indexes: Vec<MemIndex>,
    next_locator: i64,
    pool: EncodingPool,
}

impl MemCollection {
    fn new(ns: Namespace) -> Self {
        Self {
            ns,
            docs: HashMap::new(),
            primary: BTreeMap::new(),
            indexes: Vec::new(),
            next_locator: 1,
            pool: EncodingPool::new(),
        }
    }

    /// Add an index and backfill it from the documents already present.
    pub fn create_index(&mut self, spec: IndexSpec) -> Result<()> {
        let prefix = format!("idx/{}/{}/", self.ns, spec.name).into_bytes();
        let index = MemIndex::new(spec, prefix, EncodingVersion::default());
        for (&locator, document) in &self.docs {
            let generated = index.generate_keys(document)?;
            for key in &generated.keys {
                let bytes =
                    self.pool
                        .encode_prefixed(index.prefix(), index.encoding_version(), key);
                index.insert_entry(bytes, locator)?;
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Store a document and maintain every index, exactly like a normal
    /// write path would.
    pub fn insert_document(&mut self, document: Document) -> Result<RecordId> {
        let pk = document
            .get("_id")
            .cloned()
            .ok_or_else(|| LoamError::storage("document is missing an _id field"))?;
        if self.primary.contains_key(&pk) {
            return Err(LoamError::DuplicateKey(format!("_id: {pk}")));
        }

        let locator = RecordId::new(self.next_locator);
        self.next_locator += 1;

        for index in &self.indexes {
            let generated = index.generate_keys(&document)?;
            for key in &generated.keys {
                let bytes =
                    self.pool
                        .encode_prefixed(index.prefix(), index.encoding_version(), key);
                index.insert_entry(bytes, locator)?;
            }
        }
        self.primary.insert(pk, locator);
        self.docs.insert(locator, document);
        Ok(locator)
    }

    /// Fault injector: delete the document and its primary-key entry but
    /// leave every secondary-index entry behind, orphaned.
    pub fn orphan_document(&mut self, primary_key: &Value) -> Option<RecordId> {
        let locator = self.primary.remove(primary_key)?;
        self.docs.remove(&locator);
        Some(locator)
    }

    /// Fault injector: drop one secondary-index entry while the document
    /// stays in place. Returns whether the entry was present.
    pub fn drop_index_entry(
        &mut self,
        index_name: &str,
        key: &IndexKey,
        locator: RecordId,
    ) -> bool {
        let Some(index) = self.indexes.iter().find(|idx| idx.name() == index_name) else {
            return false;
        };
        let bytes = self
            .pool
            .encode_prefixed(index.prefix(), index.encoding_version(), key);
        index.remove_raw(bytes, locator)
    }
}

impl Collection for MemCollection {
    type Index = MemIndex;

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn index(&self, name: &str) -> Option<&MemIndex> {
        self.indexes.iter().find(|idx| idx.name() == name)
    }

    fn lookup_primary(&self, primary_key: &Value) -> Result<Option<RecordId>> {
        Ok(self.primary.get(primary_key).copied())
    }

    fn fetch(&self, locator: RecordId) -> Option<Document> {
        self.docs.get(&locator).cloned()
    }
}

/// An ordered in-memory secondary index.
#[derive(Debug)]
pub struct MemIndex {
    spec: IndexSpec,
    prefix: Vec<u8>,
    version: EncodingVersion,
    entries: Mutex<BTreeSet<(Vec<u8>, RecordId)>>,
    injected_conflicts: AtomicU32,
}

impl MemIndex {
    fn new(spec: IndexSpec, prefix: Vec<u8>, version: EncodingVersion) -> Self {
        Self {
            spec,
            prefix,
            version,
            entries: Mutex::new(BTreeSet::new()),
            injected_conflicts: AtomicU32::new(0),
        }
    }

    /// Current number of entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Make the next `n` entry mutations fail with a write conflict before
    /// succeeding.
    pub fn inject_write_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn consume_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Remove an entry without the conflict-injection gate.
    fn remove_raw(&self, encoded_key: &[u8], locator: RecordId) -> bool {
        self.entries.lock().remove(&(encoded_key.to_vec(), locator))
    }
}

impl SecondaryIndex for MemIndex {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn encoding_version(&self) -> EncodingVersion {
        self.version
    }

    fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn generate_keys(&self, document: &Document) -> Result<GeneratedKeys> {
        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(self.spec.fields.len());
        let mut multikey_paths = Vec::new();
        let mut any_present = false;

        for field in &self.spec.fields {
            match get_path(document, field) {
                Some(Value::Array(items)) => {
                    any_present = true;
                    multikey_paths.push(field.clone());
                    if items.is_empty() {
                        columns.push(vec![Value::Null]);
                    } else {
                        columns.push(items.clone());
                    }
                }
                Some(value) => {
                    any_present = true;
                    columns.push(vec![value.clone()]);
                }
                None => columns.push(vec![Value::Null]),
            }
        }

        if self.spec.sparse && !any_present {
            return Ok(GeneratedKeys::default());
        }

        // Cartesian product across columns; array columns fan out per
        // element.
        let mut acc: Vec<Vec<Value>> = vec![Vec::with_capacity(columns.len())];
        for column in &columns {
            acc = acc
                .iter()
                .flat_map(|prefix| {
                    column.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push(value.clone());
                        next
                    })
                })
                .collect();
        }

        let mut keys: Vec<IndexKey> = acc.into_iter().map(IndexKey::new).collect();
        keys.sort();
        keys.dedup();
        Ok(GeneratedKeys {
            keys: KeyCandidates::from_vec(keys),
            multikey_paths,
        })
    }

    fn cursor(&self) -> Box<dyn IndexCursor + '_> {
        let snapshot: Vec<(Vec<u8>, RecordId)> = self.entries.lock().iter().cloned().collect();
        Box::new(MemCursor {
            entries: snapshot,
            pos: 0,
        })
    }

    fn insert_entry(&self, encoded_key: &[u8], locator: RecordId) -> Result<()> {
        if self.consume_injected_conflict() {
            return Err(LoamError::write_conflict("injected"));
        }
        let mut entries = self.entries.lock();
        if self.spec.unique
            && entries
                .iter()
                .any(|(key, loc)| key == encoded_key && *loc != locator)
        {
            return Err(LoamError::DuplicateKey(self.spec.name.clone()));
        }
        entries.insert((encoded_key.to_vec(), locator));
        Ok(())
    }

    fn remove_entry(&self, encoded_key: &[u8], locator: RecordId) -> Result<()> {
        if self.consume_injected_conflict() {
            return Err(LoamError::write_conflict("injected"));
        }
        self.remove_raw(encoded_key, locator);
        Ok(())
    }
}

struct MemCursor {
    entries: Vec<(Vec<u8>, RecordId)>,
    pos: usize,
}

impl MemCursor {
    fn entry_at(&self, pos: usize) -> Option<IndexEntry> {
        self.entries.get(pos).map(|(key, locator)| IndexEntry {
            key: key.clone(),
            locator: *locator,
        })
    }
}

impl IndexCursor for MemCursor {
    fn seek(&mut self, encoded_key: &[u8]) -> Option<IndexEntry> {
        self.pos = self
            .entries
            .partition_point(|(key, _)| key.as_slice() < encoded_key);
        self.entry_at(self.pos)
    }

    fn next(&mut self) -> Option<IndexEntry> {
        self.pos += 1;
        self.entry_at(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> Document {
        serde_json::from_str(json).unwrap()
    }

    fn indexed_collection(fields: &[&str]) -> MemCollection {
        let mut coll = MemCollection::new(Namespace::new("app", "users"));
        coll.create_index(IndexSpec::new("idx_t", fields)).unwrap();
        coll
    }

    // === Test: scalar fields generate exactly one key ===
    #[test]
    fn test_scalar_key_generation() {
        let coll = indexed_collection(&["a", "b"]);
        let index = coll.index("idx_t").unwrap();
        let generated = index.generate_keys(&doc(r#"{"a":1,"b":"x"}"#)).unwrap();
        assert_eq!(generated.keys.len(), 1);
        assert_eq!(
            generated.keys[0],
            IndexKey::new(vec![Value::Int(1), Value::String("x".to_owned())])
        );
        assert!(generated.multikey_paths.is_empty());
    }

    // === Test: a missing field indexes as Null ===
    #[test]
    fn test_missing_field_is_null() {
        let coll = indexed_collection(&["a", "b"]);
        let index = coll.index("idx_t").unwrap();
        let generated = index.generate_keys(&doc(r#"{"a":1}"#)).unwrap();
        assert_eq!(
            generated.keys[0],
            IndexKey::new(vec![Value::Int(1), Value::Null])
        );
    }

    // === Test: an array field fans out one key per distinct element ===
    #[test]
    fn test_multikey_fan_out() {
        let coll = indexed_collection(&["tags"]);
        let index = coll.index("idx_t").unwrap();
        let generated = index
            .generate_keys(&doc(r#"{"tags":["a","b","a"]}"#))
            .unwrap();
        assert_eq!(generated.keys.len(), 2);
        assert_eq!(generated.multikey_paths, vec!["tags".to_owned()]);
    }

    // === Test: dotted paths traverse nested documents ===
    #[test]
    fn test_dotted_path() {
        let coll = indexed_collection(&["addr.city"]);
        let index = coll.index("idx_t").unwrap();
        let generated = index
            .generate_keys(&doc(r#"{"addr":{"city":"rome"}}"#))
            .unwrap();
        assert_eq!(
            generated.keys[0],
            IndexKey::new(vec![Value::String("rome".to_owned())])
        );
    }

    // === Test: sparse index skips fully-absent documents ===
    #[test]
    fn test_sparse_skips_absent() {
        let mut coll = MemCollection::new(Namespace::new("app", "users"));
        coll.create_index(IndexSpec::new("idx_s", &["opt"]).sparse())
            .unwrap();
        let index = coll.index("idx_s").unwrap();
        assert!(index.generate_keys(&doc(r#"{"x":1}"#)).unwrap().keys.is_empty());
        assert_eq!(
            index.generate_keys(&doc(r#"{"opt":1}"#)).unwrap().keys.len(),
            1
        );
    }

    // === Test: insert_document maintains entries, injectors break them ===
    #[test]
    fn test_document_writes_and_injectors() {
        let mut coll = indexed_collection(&["a"]);
        let loc = coll.insert_document(doc(r#"{"_id":1,"a":10}"#)).unwrap();
        assert_eq!(coll.index("idx_t").unwrap().entry_count(), 1);

        assert!(coll.drop_index_entry("idx_t", &IndexKey::new(vec![Value::Int(10)]), loc));
        assert_eq!(coll.index("idx_t").unwrap().entry_count(), 0);
        assert!(coll.fetch(loc).is_some());

        let loc2 = coll.insert_document(doc(r#"{"_id":2,"a":20}"#)).unwrap();
        assert_eq!(coll.orphan_document(&Value::Int(2)), Some(loc2));
        assert!(coll.fetch(loc2).is_none());
        assert_eq!(coll.index("idx_t").unwrap().entry_count(), 1);
    }

    // === Test: unique index rejects a second locator under the same key ===
    #[test]
    fn test_unique_constraint() {
        let mut coll = MemCollection::new(Namespace::new("app", "users"));
        coll.create_index(IndexSpec::new("idx_u", &["email"]).unique())
            .unwrap();
        coll.insert_document(doc(r#"{"_id":1,"email":"a@x"}"#))
            .unwrap();
        let err = coll
            .insert_document(doc(r#"{"_id":2,"email":"a@x"}"#))
            .unwrap_err();
        assert_eq!(err.code(), "DuplicateKey");
    }

    // === Test: cursor seek lands on the first entry >= the probe ===
    #[test]
    fn test_cursor_seek() {
        let mut coll = indexed_collection(&["a"]);
        let mut pool = EncodingPool::new();
        for (id, a) in [(1, 10), (2, 20), (3, 20)] {
            coll.insert_document(doc(&format!(r#"{{"_id":{id},"a":{a}}}"#)))
                .unwrap();
        }
        let index = coll.index("idx_t").unwrap();
        let probe = pool
            .encode_prefixed(
                index.prefix(),
                index.encoding_version(),
                &IndexKey::new(vec![Value::Int(20)]),
            )
            .to_vec();

        let mut cursor = index.cursor();
        let first = cursor.seek(&probe).unwrap();
        assert_eq!(first.key, probe);
        assert_eq!(first.locator, RecordId::new(2));
        let second = cursor.next().unwrap();
        assert_eq!(second.locator, RecordId::new(3));
        assert!(cursor.next().is_none());
    }

    // === Test: create_index backfills documents inserted earlier ===
    #[test]
    fn test_create_index_backfills() {
        let mut coll = MemCollection::new(Namespace::new("app", "users"));
        coll.insert_document(doc(r#"{"_id":1,"a":10}"#)).unwrap();
        coll.insert_document(doc(r#"{"_id":2,"a":20}"#)).unwrap();
        coll.create_index(IndexSpec::new("idx_late", &["a"]))
            .unwrap();
        assert_eq!(coll.index("idx_late").unwrap().entry_count(), 2);
    }
}
