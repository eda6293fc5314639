//! Built-in backends for frames, records, JSON documents, models and raw bytes.

use std::sync::Arc;

use serde_json::Value;

use super::{content_key, Backend, Candidate, Hints, WriteMode};
use crate::frame::{Frame, RowId};
use crate::metadata::Metadata;
use crate::object::{ModelBlob, Object, ObjectType};
use crate::storage::{BlobStore, DocumentStore, Filter};
use crate::{Error, Result};

/// Kind of row-indexed frames.
pub const FRAME_KIND: &str = "dataset.frame";
/// Kind of appended record sets.
pub const RECORDS_KIND: &str = "dataset.records";
/// Kind of single JSON documents.
pub const JSON_KIND: &str = "dataset.json";
/// Kind of serialized models.
pub const MODEL_KIND: &str = "model.blob";
/// Kind of opaque bytes.
pub const BLOB_KIND: &str = "blob.bytes";

const JSON_KEY: &str = "document";

fn wrong_shape(kind: &str, obj: &Object) -> Error {
    Error::InvalidInput(format!("{kind} cannot store a {} object", obj.object_type()))
}

fn missing(meta: &Metadata) -> Error {
    Error::NotFound(format!("content of '{}{}'", meta.prefix(), meta.name()))
}

/// Frames stored as one document per row, keyed by row index.
pub struct FrameBackend {
    docs: Arc<dyn DocumentStore>,
}

impl FrameBackend {
    /// Create a frame backend over a document store.
    #[must_use]
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    fn row_key(id: &RowId) -> String {
        match id {
            RowId::Int(v) => format!("i:{v}"),
            RowId::Str(v) => format!("s:{v}"),
        }
    }

    fn upsert_rows(&self, collection: &str, frame: &Frame) -> Result<()> {
        for (id, doc) in frame.ids().zip(frame.to_documents()) {
            self.docs.upsert(collection, &Self::row_key(id), doc)?;
        }
        Ok(())
    }

    fn merge_rows(&self, collection: &str, frame: &Frame) -> Result<()> {
        for (id, incoming) in frame.ids().zip(frame.to_documents()) {
            let key = Self::row_key(id);
            let merged = match (self.docs.get(collection, &key)?, incoming) {
                (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                    for (column, value) in incoming {
                        if !value.is_null() {
                            existing.insert(column, value);
                        }
                    }
                    Value::Object(existing)
                }
                (_, incoming) => incoming,
            };
            self.docs.upsert(collection, &key, merged)?;
        }
        Ok(())
    }
}

impl Backend for FrameBackend {
    fn kind(&self) -> &str {
        FRAME_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Frame, FRAME_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, hints: &Hints) -> Result<()> {
        let frame = obj.as_frame().ok_or_else(|| wrong_shape(FRAME_KIND, obj))?;
        let collection = content_key(meta);
        match hints.mode().unwrap_or(WriteMode::Append) {
            WriteMode::Append => self.upsert_rows(&collection, frame)?,
            WriteMode::Replace => {
                self.docs.drop_collection(&collection)?;
                self.upsert_rows(&collection, frame)?;
            }
            WriteMode::Upsert => self.merge_rows(&collection, frame)?,
            WriteMode::Remove => {
                for id in frame.ids() {
                    self.docs.remove(&collection, &Self::row_key(id))?;
                }
            }
        }
        meta.content_ref = Some(collection);
        Ok(())
    }

    fn get(&self, meta: &Metadata, filter: &Filter, _hints: &Hints) -> Result<Object> {
        let docs = self.docs.find(&content_key(meta), filter)?;
        Ok(Object::Frame(Frame::from_documents(docs)?))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.docs.drop_collection(&content_key(meta))
    }
}

/// Raw JSON documents appended with one bulk insert per put.
pub struct RecordsBackend {
    docs: Arc<dyn DocumentStore>,
}

impl RecordsBackend {
    /// Create a records backend over a document store.
    #[must_use]
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

impl Backend for RecordsBackend {
    fn kind(&self) -> &str {
        RECORDS_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Records, RECORDS_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, hints: &Hints) -> Result<()> {
        let records = obj.as_records().ok_or_else(|| wrong_shape(RECORDS_KIND, obj))?;
        let collection = content_key(meta);
        match hints.mode().unwrap_or(WriteMode::Append) {
            WriteMode::Append => {}
            WriteMode::Replace => {
                self.docs.drop_collection(&collection)?;
            }
            mode => {
                return Err(Error::InvalidInput(format!(
                    "{RECORDS_KIND} does not support {mode:?} writes"
                )))
            }
        }
        if !records.is_empty() {
            self.docs.insert_many(&collection, records.to_vec())?;
        }
        meta.content_ref = Some(collection);
        Ok(())
    }

    fn get(&self, meta: &Metadata, filter: &Filter, _hints: &Hints) -> Result<Object> {
        Ok(Object::Records(self.docs.find(&content_key(meta), filter)?))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.docs.drop_collection(&content_key(meta))
    }
}

/// A single JSON document.
pub struct JsonBackend {
    docs: Arc<dyn DocumentStore>,
}

impl JsonBackend {
    /// Create a JSON backend over a document store.
    #[must_use]
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

impl Backend for JsonBackend {
    fn kind(&self) -> &str {
        JSON_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Json, JSON_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, _hints: &Hints) -> Result<()> {
        let Object::Json(value) = obj else {
            return Err(wrong_shape(JSON_KIND, obj));
        };
        let collection = content_key(meta);
        self.docs.upsert(&collection, JSON_KEY, value.clone())?;
        meta.content_ref = Some(collection);
        Ok(())
    }

    fn get(&self, meta: &Metadata, _filter: &Filter, _hints: &Hints) -> Result<Object> {
        self.docs
            .get(&content_key(meta), JSON_KEY)?
            .map(Object::Json)
            .ok_or_else(|| missing(meta))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.docs.drop_collection(&content_key(meta))
    }
}

/// Framework-tagged model payloads in the blob store.
///
/// The framework tag is also recorded as the `framework` attribute so it can
/// be inspected without loading the payload.
pub struct ModelBackend {
    blobs: Arc<dyn BlobStore>,
}

impl ModelBackend {
    /// Create a model backend over a blob store.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

impl Backend for ModelBackend {
    fn kind(&self) -> &str {
        MODEL_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Model, MODEL_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, _hints: &Hints) -> Result<()> {
        let model = obj.as_model().ok_or_else(|| wrong_shape(MODEL_KIND, obj))?;
        let key = content_key(meta);
        self.blobs.put(&key, serde_json::to_vec(model)?)?;
        meta.attributes
            .extra
            .insert("framework".to_string(), Value::from(model.framework.as_str()));
        meta.content_ref = Some(key);
        Ok(())
    }

    fn get(&self, meta: &Metadata, _filter: &Filter, _hints: &Hints) -> Result<Object> {
        let bytes = self.blobs.get(&content_key(meta))?.ok_or_else(|| missing(meta))?;
        let model: ModelBlob = serde_json::from_slice(&bytes)?;
        Ok(Object::Model(model))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.blobs.delete(&content_key(meta))
    }
}

/// Opaque bytes in the blob store.
pub struct BlobBackend {
    blobs: Arc<dyn BlobStore>,
}

impl BlobBackend {
    /// Create a blob backend over a blob store.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

impl Backend for BlobBackend {
    fn kind(&self) -> &str {
        BLOB_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Bytes, BLOB_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, _hints: &Hints) -> Result<()> {
        let Object::Bytes(bytes) = obj else {
            return Err(wrong_shape(BLOB_KIND, obj));
        };
        let key = content_key(meta);
        self.blobs.put(&key, bytes.clone())?;
        meta.content_ref = Some(key);
        Ok(())
    }

    fn get(&self, meta: &Metadata, _filter: &Filter, _hints: &Hints) -> Result<Object> {
        self.blobs
            .get(&content_key(meta))?
            .map(Object::Bytes)
            .ok_or_else(|| missing(meta))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.blobs.delete(&content_key(meta))
    }
}
