//! Metadata registry: CRUD over records scoped to one `(bucket, prefix)`.

use std::sync::Arc;

use tracing::debug;

use super::Metadata;
use crate::storage::DocumentStore;
use crate::Result;

/// Metadata records of one store, persisted in `{bucket}.metadata`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use mlvault::metadata::MetadataRegistry;
/// use mlvault::storage::MemoryDocumentStore;
///
/// let registry = MetadataRegistry::new(Arc::new(MemoryDocumentStore::new()), "default", "models/");
/// let mut meta = registry.make("iris", "model.blob");
/// registry.save(&mut meta)?;
/// assert_eq!(registry.list(None)?, vec!["iris".to_string()]);
/// # Ok::<(), mlvault::Error>(())
/// ```
#[derive(Clone)]
pub struct MetadataRegistry {
    docs: Arc<dyn DocumentStore>,
    bucket: String,
    prefix: String,
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl MetadataRegistry {
    /// Create a registry for `(bucket, prefix)`.
    #[must_use]
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            docs,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Get the bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn collection(&self) -> String {
        format!("{}.metadata", self.bucket)
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// A new unsaved record in this registry's scope.
    #[must_use]
    pub fn make(&self, name: &str, kind: &str) -> Metadata {
        Metadata::new(&self.bucket, &self.prefix, name, kind)
    }

    /// Fetch the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document does not deserialize.
    pub fn get(&self, name: &str) -> Result<Option<Metadata>> {
        self.docs
            .get(&self.collection(), &self.key(name))?
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .transpose()
    }

    /// Check if a record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the document store fails.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.docs.get(&self.collection(), &self.key(name))?.is_some())
    }

    /// Upsert the record, advancing its `modified` timestamp.
    ///
    /// Read-modify-write without a version check: concurrent saves of the same
    /// name are last-writer-wins.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the document store fails.
    pub fn save(&self, meta: &mut Metadata) -> Result<()> {
        meta.touch();
        let doc = serde_json::to_value(&*meta)?;
        self.docs.upsert(&self.collection(), &self.key(meta.name()), doc)?;
        debug!(bucket = %self.bucket, prefix = %self.prefix, name = meta.name(), kind = %meta.kind, "saved metadata");
        Ok(())
    }

    /// Remove the record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the document store fails.
    pub fn drop(&self, name: &str) -> Result<bool> {
        self.docs.remove(&self.collection(), &self.key(name))
    }

    /// Names in this scope, optionally filtered by a `*` glob pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the document store fails.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .docs
            .keys(&self.collection())?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|name| pattern.map_or(true, |p| glob_match(p, name)))
            .collect())
    }
}

/// Match `text` against a pattern where `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}
