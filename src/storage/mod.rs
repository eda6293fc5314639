//! Storage collaborators
//!
//! The registry persists everything through two narrow interfaces:
//! - [`DocumentStore`]: named collections of JSON documents with per-document
//!   atomic upsert and filtered scans (metadata, frame rows, changesets,
//!   event logs)
//! - [`BlobStore`]: opaque byte payloads by key (model snapshots, raw blobs)
//!
//! Both are synchronous and `Send + Sync`. The in-memory implementations are
//! backed by `DashMap` and are what tests and demos use.
//!
//! # Example
//!
//! ```rust
//! use mlvault::storage::{DocumentStore, Filter, MemoryDocumentStore};
//! use serde_json::json;
//!
//! let store = MemoryDocumentStore::new();
//! store.insert_many("events", vec![json!({"run": 1}), json!({"run": 2})])?;
//! let rows = store.find("events", &Filter::new().eq("run", 2))?;
//! assert_eq!(rows.len(), 1);
//! # Ok::<(), mlvault::Error>(())
//! ```

#[cfg(feature = "compression")]
mod compressed;
mod memory;

#[cfg(feature = "compression")]
pub use compressed::{CompressedBlobStore, Compression, DEFAULT_ZSTD_LEVEL};
pub use memory::{MemoryBlobStore, MemoryDocumentStore};

use serde_json::Value;

use crate::Result;

/// A stored document. Always a JSON object in practice.
pub type Document = Value;

/// Document store with per-document atomicity and nothing more.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document stored under `key`.
    fn upsert(&self, collection: &str, key: &str, doc: Document) -> Result<()>;

    /// Fetch the document stored under `key`.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Remove the document stored under `key`. Returns whether it existed.
    fn remove(&self, collection: &str, key: &str) -> Result<bool>;

    /// Append unkeyed documents in one write.
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<usize>;

    /// All documents matching `filter`, in insertion order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Delete all documents matching `filter`. Returns the number removed.
    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Drop a whole collection. Returns whether it existed.
    fn drop_collection(&self, collection: &str) -> Result<bool>;

    /// Check if a collection exists.
    fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Keys of all keyed documents in a collection, sorted.
    fn keys(&self, collection: &str) -> Result<Vec<String>>;
}

/// Blob store for opaque payloads.
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, overwriting any existing value.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch bytes by key. Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Condition on one document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value
    Eq(Value),
    /// Field equals any of the values
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Self::Eq(expected) => values_equal(actual, expected),
            Self::In(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
        }
    }
}

/// Conjunction of field conditions. An empty filter matches everything.
///
/// Field names may use dots to reach into nested objects (`value.format`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    /// Filter matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Condition::Eq(value.into())));
        self
    }

    /// Require `field` to be one of `values`.
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.into(), Condition::In(values)));
        self
    }

    /// Add an arbitrary condition.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((field.into(), condition));
        self
    }

    /// Check if the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(lookup(doc, field)))
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, part| current.get(part))
}

// 1 and 1.0 are the same run number regardless of how they were encoded.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
