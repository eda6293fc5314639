//! Object stores
//!
//! [`ObjectStore`] is the narrow interface every store layer implements. The
//! [`BaseStore`] binds names to backends and metadata; versioning and
//! revisioning are wrappers around another `ObjectStore`:
//!
//! ```text
//! Registry.models   = Versioned<BaseStore("models/")>
//! Registry.datasets = Revisioned<Versioned<BaseStore("data/")>>
//! ```

mod options;

pub use options::{GetOptions, PutOptions};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, BackendRegistry, Candidate};
use crate::metadata::{Metadata, MetadataRegistry};
use crate::object::Object;
use crate::storage::{BlobStore, DocumentStore};
use crate::Result;

/// Put/get/drop by name plus access to the metadata record.
pub trait ObjectStore: Send + Sync {
    /// Store prefix, e.g. `models/`.
    fn prefix(&self) -> &str;

    /// Store `obj` under `name`; creates or updates its metadata record.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedObject` if no backend accepts the object,
    /// or any backend or storage error.
    fn put(&self, obj: &Object, name: &str, opts: &PutOptions) -> Result<Metadata>;

    /// Fetch the object stored under `name`; `Ok(None)` if the name is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if a selector in `opts` does not resolve or storage fails.
    fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Object>>;

    /// Remove the object and its metadata record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn drop(&self, name: &str) -> Result<bool>;

    /// The metadata record of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn metadata(&self, name: &str) -> Result<Option<Metadata>>;

    /// Save a modified metadata record.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn update_metadata(&self, meta: &mut Metadata) -> Result<()>;

    /// Names in this store, optionally filtered by a `*` glob.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    fn list(&self, pattern: Option<&str>) -> Result<Vec<String>>;
}

/// Handles shared by every store of a registry.
#[derive(Clone)]
pub struct StoreContext {
    /// Bucket all stores write into
    pub bucket: String,
    /// Document store for metadata, rows and logs
    pub docs: Arc<dyn DocumentStore>,
    /// Blob store for model payloads and bytes
    pub blobs: Arc<dyn BlobStore>,
    /// Backend dispatch table
    pub backends: Arc<BackendRegistry>,
}

impl StoreContext {
    /// Context with the built-in backends registered.
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        docs: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let backends = Arc::new(BackendRegistry::with_builtins(&docs, &blobs));
        Self {
            bucket: bucket.into(),
            docs,
            blobs,
            backends,
        }
    }

    /// Replace the backend registry.
    #[must_use]
    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Arc::new(backends);
        self
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("bucket", &self.bucket)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

/// Store that dispatches content to backends and keeps metadata.
#[derive(Debug, Clone)]
pub struct BaseStore {
    ctx: StoreContext,
    registry: MetadataRegistry,
}

impl BaseStore {
    /// Create a store for `prefix` within the context's bucket.
    #[must_use]
    pub fn new(ctx: StoreContext, prefix: impl Into<String>) -> Self {
        let registry = MetadataRegistry::new(Arc::clone(&ctx.docs), ctx.bucket.clone(), prefix);
        Self { ctx, registry }
    }

    /// The metadata registry backing this store.
    #[must_use]
    pub const fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// The shared context.
    #[must_use]
    pub const fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// Handler and metadata of a stored object, for domain actions.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the name or its kind is unknown.
    pub fn handler(&self, name: &str) -> Result<(Arc<dyn Backend>, Metadata)> {
        let meta = self
            .registry
            .get(name)?
            .ok_or_else(|| crate::Error::NotFound(format!("{}{name}", self.registry.prefix())))?;
        let backend = self.ctx.backends.resolve_by_kind(&meta.kind)?;
        Ok((backend, meta))
    }

    fn resolve(&self, obj: &Object, name: &str, opts: &PutOptions) -> Result<Arc<dyn Backend>> {
        let candidate = Candidate::for_object(obj, name, &opts.hints);
        match opts.kind.as_deref() {
            Some(kind) => {
                let backend = self.ctx.backends.resolve_by_kind(kind)?;
                if backend.supports(&candidate.with_kind(kind)) {
                    Ok(backend)
                } else {
                    Err(crate::Error::UnsupportedObject {
                        name: name.to_string(),
                        object_type: obj.object_type().to_string(),
                    })
                }
            }
            None => self.ctx.backends.resolve_by_object(&candidate),
        }
    }
}

impl ObjectStore for BaseStore {
    fn prefix(&self) -> &str {
        self.registry.prefix()
    }

    fn put(&self, obj: &Object, name: &str, opts: &PutOptions) -> Result<Metadata> {
        let backend = self.resolve(obj, name, opts)?;
        let mut meta = match self.registry.get(name)? {
            Some(existing) if existing.kind == backend.kind() => existing,
            Some(mut existing) => {
                // Content of the previous kind would be orphaned otherwise.
                if let Ok(previous) = self.ctx.backends.resolve_by_kind(&existing.kind) {
                    Backend::drop(&*previous, &existing)?;
                }
                info!(name, from = %existing.kind, to = backend.kind(), "object changed kind");
                existing.kind = backend.kind().to_string();
                existing.content_ref = None;
                existing
            }
            None => self.registry.make(name, backend.kind()),
        };
        if let Some(attributes) = &opts.attributes {
            meta.attributes.extra.extend(attributes.extra.clone());
            if attributes.tracking.is_some() {
                meta.attributes.tracking.clone_from(&attributes.tracking);
            }
        }
        backend.put(obj, &mut meta, &opts.hints)?;
        self.registry.save(&mut meta)?;
        debug!(prefix = self.registry.prefix(), name, kind = %meta.kind, "put object");
        Ok(meta)
    }

    fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Object>> {
        let Some(meta) = self.registry.get(name)? else {
            return Ok(None);
        };
        let backend = self.ctx.backends.resolve_by_kind(&meta.kind)?;
        backend.get(&meta, &opts.filter, &opts.hints).map(Some)
    }

    fn drop(&self, name: &str) -> Result<bool> {
        let Some(meta) = self.registry.get(name)? else {
            return Ok(false);
        };
        if let Ok(backend) = self.ctx.backends.resolve_by_kind(&meta.kind) {
            Backend::drop(&*backend, &meta)?;
        }
        self.registry.drop(name)
    }

    fn metadata(&self, name: &str) -> Result<Option<Metadata>> {
        self.registry.get(name)
    }

    fn update_metadata(&self, meta: &mut Metadata) -> Result<()> {
        self.registry.save(meta)
    }

    fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        self.registry.list(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Hints, WriteMode};
    use crate::frame::Frame;
    use crate::object::ModelBlob;
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use crate::Error;
    use serde_json::json;

    fn store(prefix: &str) -> BaseStore {
        let ctx = StoreContext::new(
            "test",
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        BaseStore::new(ctx, prefix)
    }

    #[test]
    fn test_put_creates_exactly_one_record() {
        let s = store("data/");
        let frame = Frame::from_json_rows([(0, json!({"a": 1}))]).unwrap();
        let first = s.put(&frame.clone().into(), "f", &PutOptions::new()).unwrap();
        let second = s.put(&frame.into(), "f", &PutOptions::new()).unwrap();
        assert_eq!(s.list(None).unwrap(), vec!["f"]);
        assert_eq!(first.created(), second.created());
        assert!(second.modified() > first.modified());
        assert_eq!(second.kind, "dataset.frame");
    }

    #[test]
    fn test_get_unknown_is_none() {
        assert!(store("data/").get("nope", &GetOptions::new()).unwrap().is_none());
        assert!(!store("data/").drop("nope").unwrap());
    }

    #[test]
    fn test_explicit_kind_must_support_object() {
        let s = store("data/");
        let opts = PutOptions::new().kind("model.blob");
        let err = s.put(&Object::Json(json!(1)), "x", &opts).unwrap_err();
        assert!(matches!(err, Error::UnsupportedObject { .. }));
    }

    #[test]
    fn test_kind_change_drops_old_content() {
        let s = store("data/");
        s.put(&Object::Bytes(vec![1]), "x", &PutOptions::new()).unwrap();
        let meta = s.put(&Object::Json(json!({"v": 1})), "x", &PutOptions::new()).unwrap();
        assert_eq!(meta.kind, "dataset.json");
        assert!(!s.context().blobs.exists("test.data/x").unwrap());
        assert_eq!(s.get("x", &GetOptions::new()).unwrap(), Some(Object::Json(json!({"v": 1}))));
    }

    #[test]
    fn test_put_merges_caller_attributes() {
        let s = store("models/");
        let mut attributes = crate::metadata::Attributes::default();
        attributes.extra.insert("owner".into(), json!("alice"));
        let model = ModelBlob::new("onnx", vec![0]);
        let meta = s
            .put(&model.into(), "m", &PutOptions::new().attributes(attributes))
            .unwrap();
        assert_eq!(meta.attributes.extra["owner"], json!("alice"));
        assert_eq!(meta.attributes.extra["framework"], json!("onnx"));
    }

    #[test]
    fn test_filtered_get_and_drop() {
        let s = store("data/");
        let frame = Frame::from_json_rows([(0, json!({"k": 1})), (1, json!({"k": 2}))]).unwrap();
        let opts = PutOptions::new().hints(Hints::new().with_mode(WriteMode::Replace));
        s.put(&frame.into(), "f", &opts).unwrap();
        let got = s
            .get("f", &GetOptions::new().filter(crate::storage::Filter::new().eq("k", 2)))
            .unwrap()
            .and_then(Object::into_frame)
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(s.drop("f").unwrap());
        assert!(!s.context().docs.collection_exists("test.data/f").unwrap());
    }

    #[test]
    fn test_handler_for_domain_actions() {
        let s = store("models/");
        s.put(&ModelBlob::new("sklearn", vec![]).into(), "m", &PutOptions::new())
            .unwrap();
        let (backend, meta) = s.handler("m").unwrap();
        let err = backend.predict(&meta, &Object::Json(json!([]))).unwrap_err();
        assert!(matches!(err, Error::NotImplemented { .. }));
        assert!(s.handler("missing").err().unwrap().is_not_found());
    }
}
