//! In-memory stores using `DashMap`.
//!
//! Data is lost on process restart. Both stores count write operations so
//! callers can observe write amplification (e.g. tracking buffer flushes).

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use super::{BlobStore, Document, DocumentStore, Filter};
use crate::Result;

#[derive(Debug, Default)]
struct Collection {
    // Tombstoned slots keep insertion order stable without reindexing.
    slots: Vec<Option<(Option<String>, Document)>>,
    by_key: FxHashMap<String, usize>,
    writes: usize,
}

impl Collection {
    fn live(&self) -> impl Iterator<Item = &(Option<String>, Document)> {
        self.slots.iter().flatten()
    }
}

/// In-memory document store.
///
/// Thread-safe; each collection is guarded by its `DashMap` shard, which
/// gives per-document (and per-call) atomicity.
///
/// # Example
///
/// ```rust
/// use mlvault::storage::{DocumentStore, MemoryDocumentStore};
/// use serde_json::json;
///
/// let store = MemoryDocumentStore::new();
/// store.upsert("meta", "models/iris", json!({"kind": "model.blob"}))?;
/// assert!(store.get("meta", "models/iris")?.is_some());
/// # Ok::<(), mlvault::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, Collection>,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    /// Create a new empty document store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write calls (upsert, remove, `insert_many`, `delete_many`) served so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of live documents in a collection.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |c| c.live().count())
    }

    /// Number of write calls that touched one collection.
    #[must_use]
    pub fn collection_writes(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.writes)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert(&self, collection: &str, key: &str, doc: Document) -> Result<()> {
        self.record_write();
        let mut coll = self.collections.entry(collection.to_string()).or_default();
        coll.writes += 1;
        let existing = coll.by_key.get(key).copied();
        if let Some(idx) = existing {
            coll.slots[idx] = Some((Some(key.to_string()), doc));
        } else {
            let idx = coll.slots.len();
            coll.slots.push(Some((Some(key.to_string()), doc)));
            coll.by_key.insert(key.to_string(), idx);
        }
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        Ok(self.collections.get(collection).and_then(|coll| {
            coll.by_key
                .get(key)
                .and_then(|&idx| coll.slots[idx].as_ref().map(|(_, doc)| doc.clone()))
        }))
    }

    fn remove(&self, collection: &str, key: &str) -> Result<bool> {
        self.record_write();
        let Some(mut coll) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        coll.writes += 1;
        match coll.by_key.remove(key) {
            Some(idx) => {
                coll.slots[idx] = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        self.record_write();
        let count = docs.len();
        let mut coll = self.collections.entry(collection.to_string()).or_default();
        coll.writes += 1;
        coll.slots.extend(docs.into_iter().map(|doc| Some((None, doc))));
        Ok(count)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self.collections.get(collection).map_or_else(Vec::new, |coll| {
            coll.live()
                .filter(|(_, doc)| filter.matches(doc))
                .map(|(_, doc)| doc.clone())
                .collect()
        }))
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.record_write();
        let Some(mut coll) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let coll = &mut *coll;
        coll.writes += 1;
        let mut removed = 0;
        for slot in &mut coll.slots {
            let matched = slot.as_ref().is_some_and(|(_, doc)| filter.matches(doc));
            if matched {
                if let Some((Some(key), _)) = slot.take() {
                    coll.by_key.remove(&key);
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn drop_collection(&self, collection: &str) -> Result<bool> {
        self.record_write();
        Ok(self.collections.remove(collection).is_some())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.contains_key(collection))
    }

    fn keys(&self, collection: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .collections
            .get(collection)
            .map_or_else(Vec::new, |coll| coll.by_key.keys().cloned().collect());
        keys.sort();
        Ok(keys)
    }
}

/// In-memory blob store.
///
/// # Example
///
/// ```rust
/// use mlvault::storage::{BlobStore, MemoryBlobStore};
///
/// let store = MemoryBlobStore::new();
/// store.put("hello", b"world".to_vec())?;
/// assert_eq!(store.get("hello")?, Some(b"world".to_vec()));
/// # Ok::<(), mlvault::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create a new in-memory blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: DashMap::with_capacity(capacity),
        }
    }

    /// Get the number of blobs in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Clear all blobs.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.store.insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains_key(key))
    }
}
