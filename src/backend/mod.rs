//! Backend registry and dispatch
//!
//! A backend owns the physical representation of one kind of object. The
//! registry is an ordered list of `(predicate, handler)` registrations:
//! resolution by object walks them in registration order and the first
//! predicate that accepts the [`Candidate`] wins.
//!
//! ```text
//! Candidate { object_type, kind, name, hints }
//!     │
//!     ├── registration 1: predicate? ──no──┐
//!     ├── registration 2: predicate? ──yes─┴──> handler
//!     └── default handler (if any) ──> else Error::UnsupportedObject
//! ```

mod builtin;
mod experiment;

pub use builtin::{
    BlobBackend, FrameBackend, JsonBackend, ModelBackend, RecordsBackend, BLOB_KIND, FRAME_KIND,
    JSON_KIND, MODEL_KIND, RECORDS_KIND,
};
pub use experiment::{ExperimentBackend, TRACKER_KIND};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::metadata::Metadata;
use crate::object::{Object, ObjectType};
use crate::storage::{BlobStore, DocumentStore, Filter};
use crate::{Error, Result};

/// What a predicate sees when deciding whether a backend owns an object.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Runtime type of the object, if there is one (absent on reads)
    pub object_type: Option<ObjectType>,
    /// Kind declared by the caller or recorded in metadata
    pub kind: Option<&'a str>,
    /// Name the object is addressed by
    pub name: &'a str,
    /// Caller-supplied hints
    pub hints: &'a Hints,
}

impl<'a> Candidate<'a> {
    /// Candidate for an object about to be written.
    #[must_use]
    pub fn for_object(obj: &Object, name: &'a str, hints: &'a Hints) -> Self {
        Self {
            object_type: Some(obj.object_type()),
            kind: None,
            name,
            hints,
        }
    }

    /// Set the declared kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: &'a str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Accept if the object is of `object_type`, or, when there is no
    /// object, if the declared kind is `kind`.
    #[must_use]
    pub fn is(&self, object_type: ObjectType, kind: &str) -> bool {
        match self.object_type {
            Some(actual) => actual == object_type,
            None => self.kind == Some(kind),
        }
    }
}

/// How a put combines with existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Add rows; rows with an existing index are replaced
    Append,
    /// Discard existing content first
    Replace,
    /// Merge non-null cells into existing rows
    Upsert,
    /// Remove the rows whose index appears in the object
    Remove,
}

const MODE_HINT: &str = "mode";

/// Free-form keyword hints passed through dispatch to the handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints(Map<String, Value>);

impl Hints {
    /// No hints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hint.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a hint.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set the write mode.
    #[must_use]
    pub fn with_mode(self, mode: WriteMode) -> Self {
        let value = match mode {
            WriteMode::Append => "append",
            WriteMode::Replace => "replace",
            WriteMode::Upsert => "upsert",
            WriteMode::Remove => "remove",
        };
        self.with(MODE_HINT, value)
    }

    /// The write mode, if one was given and is valid.
    #[must_use]
    pub fn mode(&self) -> Option<WriteMode> {
        self.0
            .get(MODE_HINT)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Where a backend keeps the content of `meta` in the document or blob store.
#[must_use]
pub fn content_key(meta: &Metadata) -> String {
    format!("{}.{}{}", meta.bucket(), meta.prefix(), meta.name())
}

/// Handler contract for one kind of object.
///
/// `get`, `put` and `drop` operate on content only; the calling store owns
/// the metadata record and saves it once after a successful `put`. The
/// domain actions default to [`Error::NotImplemented`].
pub trait Backend: Send + Sync {
    /// Kind tag recorded in metadata.
    fn kind(&self) -> &str;

    /// Whether this backend accepts the candidate.
    fn supports(&self, candidate: &Candidate<'_>) -> bool;

    /// Write the content of `obj` and update `meta` (`content_ref`, attributes).
    ///
    /// # Errors
    ///
    /// Returns an error if the object has the wrong shape or the store fails.
    fn put(&self, obj: &Object, meta: &mut Metadata, hints: &Hints) -> Result<()>;

    /// Read the content of `meta`, restricted by `filter` where that makes sense.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the content is missing.
    fn get(&self, meta: &Metadata, filter: &Filter, hints: &Hints) -> Result<Object>;

    /// Delete the content of `meta`. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn drop(&self, meta: &Metadata) -> Result<bool>;

    /// Train the stored object on `x` (and `y`), returning the fitted object.
    ///
    /// # Errors
    ///
    /// `Error::NotImplemented` unless the backend provides it.
    fn fit(&self, _meta: &Metadata, _x: &Object, _y: Option<&Object>) -> Result<Object> {
        Err(not_implemented(self.kind(), "fit"))
    }

    /// Predict with the stored object.
    ///
    /// # Errors
    ///
    /// `Error::NotImplemented` unless the backend provides it.
    fn predict(&self, _meta: &Metadata, _x: &Object) -> Result<Object> {
        Err(not_implemented(self.kind(), "predict"))
    }

    /// Score the stored object against `x` and `y`.
    ///
    /// # Errors
    ///
    /// `Error::NotImplemented` unless the backend provides it.
    fn score(&self, _meta: &Metadata, _x: &Object, _y: &Object) -> Result<f64> {
        Err(not_implemented(self.kind(), "score"))
    }

    /// Transform `x` with the stored object.
    ///
    /// # Errors
    ///
    /// `Error::NotImplemented` unless the backend provides it.
    fn transform(&self, _meta: &Metadata, _x: &Object) -> Result<Object> {
        Err(not_implemented(self.kind(), "transform"))
    }
}

fn not_implemented(kind: &str, action: &'static str) -> Error {
    Error::NotImplemented {
        kind: kind.to_string(),
        action,
    }
}

/// Predicate over a [`Candidate`].
pub type Predicate = Arc<dyn Fn(&Candidate<'_>) -> bool + Send + Sync>;

struct Registration {
    kind: String,
    predicate: Option<Predicate>,
    handler: Arc<dyn Backend>,
}

impl Registration {
    fn accepts(&self, candidate: &Candidate<'_>) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(candidate),
            None => self.handler.supports(candidate),
        }
    }
}

/// Ordered registry of backends.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use mlvault::backend::{BackendRegistry, BlobBackend, Candidate, Hints};
/// use mlvault::object::Object;
/// use mlvault::storage::MemoryBlobStore;
///
/// let mut registry = BackendRegistry::new();
/// registry.register("blob.bytes", Arc::new(BlobBackend::new(Arc::new(MemoryBlobStore::new()))));
///
/// let hints = Hints::new();
/// let obj = Object::Bytes(vec![1, 2, 3]);
/// let handler = registry.resolve_by_object(&Candidate::for_object(&obj, "raw", &hints))?;
/// assert_eq!(handler.kind(), "blob.bytes");
/// # Ok::<(), mlvault::Error>(())
/// ```
#[derive(Default)]
pub struct BackendRegistry {
    registrations: Vec<Registration>,
    default: Option<Arc<dyn Backend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl BackendRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend, in dispatch order.
    #[must_use]
    pub fn with_builtins(docs: &Arc<dyn DocumentStore>, blobs: &Arc<dyn BlobStore>) -> Self {
        let mut registry = Self::new();
        registry.register(
            builtin::FRAME_KIND,
            Arc::new(FrameBackend::new(Arc::clone(docs))),
        );
        registry.register(
            builtin::RECORDS_KIND,
            Arc::new(RecordsBackend::new(Arc::clone(docs))),
        );
        registry.register(
            builtin::JSON_KIND,
            Arc::new(JsonBackend::new(Arc::clone(docs))),
        );
        registry.register(
            builtin::MODEL_KIND,
            Arc::new(ModelBackend::new(Arc::clone(blobs))),
        );
        registry.register(
            builtin::BLOB_KIND,
            Arc::new(BlobBackend::new(Arc::clone(blobs))),
        );
        registry.register(
            experiment::TRACKER_KIND,
            Arc::new(ExperimentBackend::new(Arc::clone(docs))),
        );
        registry
    }

    /// Register a handler using its own `supports` as the predicate.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn Backend>) {
        self.push(kind.into(), None, handler);
    }

    /// Register a handler under an explicit predicate.
    pub fn register_with<F>(&mut self, kind: impl Into<String>, predicate: F, handler: Arc<dyn Backend>)
    where
        F: Fn(&Candidate<'_>) -> bool + Send + Sync + 'static,
    {
        self.push(kind.into(), Some(Arc::new(predicate)), handler);
    }

    fn push(&mut self, kind: String, predicate: Option<Predicate>, handler: Arc<dyn Backend>) {
        debug!(kind = %kind, position = self.registrations.len(), "registered backend");
        self.registrations.push(Registration {
            kind,
            predicate,
            handler,
        });
    }

    /// Handler used when no predicate matches.
    pub fn set_default(&mut self, handler: Arc<dyn Backend>) {
        self.default = Some(handler);
    }

    /// Registered kinds in dispatch order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.kind.as_str()).collect()
    }

    /// The first handler registered under `kind`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no handler has that kind.
    pub fn resolve_by_kind(&self, kind: &str) -> Result<Arc<dyn Backend>> {
        self.registrations
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| Error::NotFound(format!("backend kind '{kind}'")))
    }

    /// The first handler whose predicate accepts `candidate`, else the default.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedObject` if nothing matches and there is no default.
    pub fn resolve_by_object(&self, candidate: &Candidate<'_>) -> Result<Arc<dyn Backend>> {
        if let Some(registration) = self.registrations.iter().find(|r| r.accepts(candidate)) {
            return Ok(Arc::clone(&registration.handler));
        }
        self.default.clone().ok_or_else(|| Error::UnsupportedObject {
            name: candidate.name.to_string(),
            object_type: candidate
                .object_type
                .map_or_else(|| "unknown".to_string(), |t| t.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use serde_json::json;

    fn builtins() -> BackendRegistry {
        let docs: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        BackendRegistry::with_builtins(&docs, &blobs)
    }

    #[test]
    fn test_builtin_dispatch_by_object_type() {
        let registry = builtins();
        let hints = Hints::new();
        let cases = [
            (Object::Frame(crate::frame::Frame::new()), "dataset.frame"),
            (Object::Records(vec![]), "dataset.records"),
            (Object::Json(json!({})), "dataset.json"),
            (Object::Bytes(vec![]), "blob.bytes"),
        ];
        for (obj, kind) in cases {
            let handler = registry
                .resolve_by_object(&Candidate::for_object(&obj, "x", &hints))
                .unwrap();
            assert_eq!(handler.kind(), kind);
        }
    }

    #[test]
    fn test_resolve_by_kind_unknown() {
        let err = builtins().resolve_by_kind("model.keras").err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_hints_mode() {
        let hints = Hints::new().with_mode(WriteMode::Upsert).with("other", 1);
        assert_eq!(hints.mode(), Some(WriteMode::Upsert));
        assert_eq!(Hints::new().with("mode", "bogus").mode(), None);
        assert_eq!(hints.get("other"), Some(&json!(1)));
    }

    #[test]
    fn test_candidate_kind_only() {
        let hints = Hints::new();
        let candidate = Candidate {
            object_type: None,
            kind: Some("blob.bytes"),
            name: "x",
            hints: &hints,
        };
        assert!(candidate.is(ObjectType::Bytes, "blob.bytes"));
        assert!(!candidate.is(ObjectType::Json, "dataset.json"));
    }
}
