//! Content-addressed object versioning
//!
//! [`Versioned`] wraps another store. Every put of a versioned name stores
//! the object twice: under the logical name (so plain reads stay cheap) and
//! as an immutable snapshot under `versions/{name}/{ref}`. The commit list,
//! tag table and parent tree live in the logical record's
//! `attributes.versions` block.
//!
//! ```text
//! put(m, "clf", tag="v1")   commits: [c1]       tags: {latest: c1, v1: c1}
//! put(m, "clf")             commits: [c1, c2]   tags: {latest: c2, v1: c1}
//!                           tree:    {c1: None, c2: c1}
//!
//! get("clf")     -> logical object (== c2)
//! get("clf^")    -> c1
//! get("clf@v1")  -> c1
//! ```

mod pointer;

pub use pointer::Pointer;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::metadata::{Commit, Metadata, VersionsBlock, LATEST_TAG};
use crate::object::Object;
use crate::store::{GetOptions, ObjectStore, PutOptions};
use crate::{Error, Result};

/// Names under this prefix hold commit snapshots.
pub const VERSIONS_PREFIX: &str = "versions/";

/// Names under this prefix are never versioned.
pub const TOOLS_PREFIX: &str = "tools/";

/// Commit ref of a record saved at `modified`.
#[must_use]
pub fn commit_ref(name: &str, modified: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(modified.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hex::encode(hasher.finalize())
}

/// Store wrapper adding a commit graph to every put.
#[derive(Debug, Clone)]
pub struct Versioned<S> {
    inner: S,
    enabled: bool,
}

impl<S: ObjectStore> Versioned<S> {
    /// Version every put into `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            enabled: true,
        }
    }

    /// Wrap `inner`, versioning only when `enabled`.
    #[must_use]
    pub const fn with_enabled(inner: S, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Whether puts to this store create commits.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn applies(&self, name: &str) -> bool {
        self.enabled && !name.starts_with(TOOLS_PREFIX) && !name.starts_with(VERSIONS_PREFIX)
    }

    fn versions_of(&self, name: &str) -> Result<Option<VersionsBlock>> {
        Ok(self
            .inner
            .metadata(name)?
            .and_then(|meta| meta.attributes.versions)
            .filter(|versions| !versions.commits.is_empty()))
    }

    /// Every commit of `name` as a pointer, in creation order.
    ///
    /// Commits carrying tags other than `latest` appear once per tag as
    /// `name@tag`; the untagged head appears as `name@latest`; other untagged
    /// commits as `name@{ref}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn revisions(&self, name: &str) -> Result<Vec<String>> {
        let Some(versions) = self.versions_of(name)? else {
            return Ok(Vec::new());
        };
        let head = versions.tags.get(LATEST_TAG);
        let mut pointers = Vec::new();
        for commit in &versions.commits {
            let tags: Vec<&str> = versions
                .tags_of(&commit.reference)
                .into_iter()
                .filter(|tag| *tag != LATEST_TAG)
                .collect();
            if !tags.is_empty() {
                pointers.extend(tags.into_iter().map(|tag| format!("{name}@{tag}")));
            } else if head == Some(&commit.reference) {
                pointers.push(format!("{name}@{LATEST_TAG}"));
            } else {
                pointers.push(format!("{name}@{}", commit.reference));
            }
        }
        Ok(pointers)
    }

    /// Metadata of the snapshot a pointer resolves to.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownTag` / `Error::UnknownCommit` if the pointer does
    /// not resolve.
    pub fn version_metadata(&self, name: &str, opts: &GetOptions) -> Result<Option<Metadata>> {
        let pointer = Pointer::parse(name);
        match self.versions_of(pointer.name)? {
            Some(versions) => {
                let commit = resolve(&versions, &pointer, opts)?;
                self.inner.metadata(&commit.name)
            }
            None => self.inner.metadata(pointer.name),
        }
    }

    /// Commit refs from the pointed-to commit (latest by default) back to the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer does not resolve.
    pub fn lineage(&self, name: &str) -> Result<Vec<String>> {
        let pointer = Pointer::parse(name);
        let Some(versions) = self.versions_of(pointer.name)? else {
            return Ok(Vec::new());
        };
        let start = resolve(&versions, &pointer, &GetOptions::new())?;
        let mut refs = vec![start.reference.clone()];
        let mut current = start.reference.as_str();
        while let Some(Some(parent)) = versions.tree.get(current) {
            // A caller-supplied ref could close a cycle.
            if refs.contains(parent) {
                break;
            }
            refs.push(parent.clone());
            current = parent;
        }
        Ok(refs)
    }
}

/// Resolve a pointer plus get options to one commit.
fn resolve<'v>(
    versions: &'v VersionsBlock,
    pointer: &Pointer<'_>,
    opts: &GetOptions,
) -> Result<&'v Commit> {
    let name = pointer.name;
    if let Some(tag) = pointer.tag.or(opts.tag.as_deref()) {
        let reference = versions
            .tags
            .get(tag)
            .map(String::as_str)
            .or_else(|| versions.commit(tag).map(|c| c.reference.as_str()))
            .ok_or_else(|| Error::UnknownTag {
                name: name.to_string(),
                tag: tag.to_string(),
            })?;
        let mut commit = find_commit(versions, name, reference)?;
        for _ in 0..pointer.parents {
            match versions.tree.get(&commit.reference) {
                Some(Some(parent)) => commit = find_commit(versions, name, parent)?,
                _ => break,
            }
        }
        return Ok(commit);
    }
    if let Some(reference) = &opts.commit {
        return find_commit(versions, name, reference);
    }
    let version = if pointer.parents > 0 {
        -i64::try_from(pointer.parents + 1).unwrap_or(i64::MAX)
    } else {
        opts.version
    };
    let count = i64::try_from(versions.commits.len()).unwrap_or(i64::MAX);
    let index = if version >= 0 {
        version.min(count - 1)
    } else {
        (count + version).max(0)
    };
    usize::try_from(index)
        .ok()
        .and_then(|i| versions.commits.get(i))
        .ok_or_else(|| Error::NotFound(format!("version {version} of '{name}'")))
}

fn find_commit<'v>(versions: &'v VersionsBlock, name: &str, reference: &str) -> Result<&'v Commit> {
    versions.commit(reference).ok_or_else(|| Error::UnknownCommit {
        name: name.to_string(),
        commit: reference.to_string(),
    })
}

impl<S: ObjectStore> ObjectStore for Versioned<S> {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn put(&self, obj: &Object, name: &str, opts: &PutOptions) -> Result<Metadata> {
        if opts.noversion || !self.applies(name) {
            return self.inner.put(obj, name, opts);
        }
        if let Some(reference) = &opts.commit {
            if self
                .versions_of(name)?
                .is_some_and(|v| v.commit(reference).is_some())
            {
                return Err(Error::InvalidInput(format!(
                    "commit '{reference}' already exists for '{name}'"
                )));
            }
        }
        let mut meta = self.inner.put(obj, name, opts)?;
        let mut versions = meta.attributes.versions.take().unwrap_or_default();
        let reference = opts
            .commit
            .clone()
            .unwrap_or_else(|| commit_ref(name, meta.modified()));
        let physical = format!("{VERSIONS_PREFIX}{name}/{reference}");

        let snapshot = PutOptions {
            kind: Some(meta.kind.clone()),
            attributes: Some(meta.attributes.without_versions()),
            ..PutOptions::new().append(false).noversion()
        };
        self.inner.put(obj, &physical, &snapshot)?;

        let parent = versions
            .tags
            .get(&opts.previous)
            .cloned()
            .or_else(|| versions.commit(&opts.previous).map(|c| c.reference.clone()));
        versions.commits.push(Commit {
            name: physical,
            reference: reference.clone(),
        });
        versions.tree.insert(reference.clone(), parent);
        versions.tags.insert(LATEST_TAG.to_string(), reference.clone());
        if let Some(tag) = &opts.tag {
            versions.tags.insert(tag.clone(), reference.clone());
            debug!(name, tag = %tag, commit = %reference, "moved tag");
        }
        meta.attributes.versions = Some(versions);
        self.inner.update_metadata(&mut meta)?;
        info!(prefix = self.inner.prefix(), name, commit = %reference, "created commit");
        Ok(meta)
    }

    fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Object>> {
        let pointer = Pointer::parse(name);
        let versions = if self.enabled {
            self.versions_of(pointer.name)?
        } else {
            None
        };
        let plain = GetOptions {
            tag: None,
            commit: None,
            version: -1,
            ..opts.clone()
        };
        match versions {
            Some(versions) if pointer.is_relative() || !opts.is_latest_version() => {
                let commit = resolve(&versions, &pointer, opts)?;
                self.inner.get(&commit.name, &plain)
            }
            _ => self.inner.get(pointer.name, &plain),
        }
    }

    fn drop(&self, name: &str) -> Result<bool> {
        // Snapshots stay: other tags and lineage may still point at them.
        self.inner.drop(name)
    }

    fn metadata(&self, name: &str) -> Result<Option<Metadata>> {
        self.inner.metadata(name)
    }

    fn update_metadata(&self, meta: &mut Metadata) -> Result<()> {
        self.inner.update_metadata(meta)
    }

    fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .inner
            .list(pattern)?
            .into_iter()
            .filter(|name| !name.starts_with(VERSIONS_PREFIX))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ModelBlob;
    use crate::store::{BaseStore, StoreContext};
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use std::sync::Arc;

    fn models() -> Versioned<BaseStore> {
        let ctx = StoreContext::new(
            "test",
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        Versioned::new(BaseStore::new(ctx, "models/"))
    }

    fn model(n: u8) -> Object {
        ModelBlob::new("sklearn", vec![n]).into()
    }

    fn payload(obj: Option<Object>) -> u8 {
        obj.and_then(|o| o.as_model().map(|m| m.payload[0])).unwrap()
    }

    #[test]
    fn test_commit_ref_is_sha256_hex() {
        let r = commit_ref("m", Utc::now());
        assert_eq!(r.len(), 64);
        assert!(r.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_commit_graph_shape() {
        let store = models();
        let first = store.put(&model(1), "m", &PutOptions::new().tag("v1")).unwrap();
        let second = store.put(&model(2), "m", &PutOptions::new()).unwrap();
        let v1 = first.attributes.versions.unwrap();
        let v2 = second.attributes.versions.unwrap();

        let (c1, c2) = (&v2.commits[0].reference, &v2.commits[1].reference);
        assert_eq!(v1.commits.len(), 1);
        assert_eq!(v2.commits[1].name, format!("versions/m/{c2}"));
        assert_eq!(v2.tree[c1], None);
        assert_eq!(v2.tree[c2].as_deref(), Some(c1.as_str()));
        assert_eq!(v2.tags["latest"], *c2);
        assert_eq!(v2.tags["v1"], *c1);
    }

    #[test]
    fn test_snapshot_has_no_versions_block() {
        let store = models();
        store.put(&model(1), "m", &PutOptions::new()).unwrap();
        let snap = store.version_metadata("m", &GetOptions::new().version(0)).unwrap().unwrap();
        assert!(snap.attributes.versions.is_none());
        assert_eq!(snap.attributes.extra["framework"], "sklearn");
        assert!(snap.name().starts_with(VERSIONS_PREFIX));
    }

    #[test]
    fn test_pointer_resolution() {
        let store = models();
        for (n, tag) in [(1, Some("a")), (2, None), (3, Some("c"))] {
            let opts = tag.map_or_else(PutOptions::new, |t| PutOptions::new().tag(t));
            store.put(&model(n), "m", &opts).unwrap();
        }
        let get = |name: &str| payload(store.get(name, &GetOptions::new()).unwrap());
        assert_eq!(get("m"), 3);
        assert_eq!(get("m^"), 2);
        assert_eq!(get("m^^"), 1);
        assert_eq!(get("m^^^^^^"), 1);
        assert_eq!(get("m@a"), 1);
        assert_eq!(get("m@c^"), 2);
        assert_eq!(payload(store.get("m", &GetOptions::new().version(0)).unwrap()), 1);
        assert_eq!(payload(store.get("m", &GetOptions::new().version(-2)).unwrap()), 2);
    }

    #[test]
    fn test_unknown_tag_and_commit() {
        let store = models();
        store.put(&model(1), "m", &PutOptions::new()).unwrap();
        let err = store.get("m@nope", &GetOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownTag { .. }));
        let err = store.get("m", &GetOptions::new().commit("deadbeef")).unwrap_err();
        assert!(matches!(err, Error::UnknownCommit { .. }));
        assert!(store.get("other@v1", &GetOptions::new()).unwrap().is_none());
    }

    #[test]
    fn test_caller_commit_and_previous() {
        let store = models();
        store.put(&model(1), "m", &PutOptions::new().commit("base")).unwrap();
        store.put(&model(2), "m", &PutOptions::new().commit("left")).unwrap();
        let meta = store
            .put(&model(3), "m", &PutOptions::new().commit("right").previous("base"))
            .unwrap();
        let versions = meta.attributes.versions.unwrap();
        assert_eq!(versions.tree["right"].as_deref(), Some("base"));
        assert_eq!(store.lineage("m").unwrap(), vec!["right", "base"]);
        assert_eq!(store.lineage("m@left").unwrap(), vec!["left", "base"]);

        let err = store.put(&model(4), "m", &PutOptions::new().commit("left")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_noversion_tools_and_disabled() {
        let store = models();
        let meta = store.put(&model(1), "m", &PutOptions::new().noversion()).unwrap();
        assert!(meta.attributes.versions.is_none());
        let meta = store.put(&model(1), "tools/helper", &PutOptions::new()).unwrap();
        assert!(meta.attributes.versions.is_none());

        let plain = Versioned::with_enabled(models().inner().clone(), false);
        let meta = plain.put(&model(1), "x", &PutOptions::new()).unwrap();
        assert!(meta.attributes.versions.is_none());
        assert_eq!(payload(plain.get("x^", &GetOptions::new()).unwrap()), 1);
    }

    #[test]
    fn test_drop_keeps_snapshots_and_list_hides_them() {
        let store = models();
        store.put(&model(1), "m", &PutOptions::new()).unwrap();
        let physical = store.version_metadata("m", &GetOptions::new()).unwrap().unwrap();
        assert_eq!(store.list(None).unwrap(), vec!["m"]);
        assert!(store.drop("m").unwrap());
        assert!(store.list(None).unwrap().is_empty());
        assert!(store.inner().metadata(physical.name()).unwrap().is_some());
    }
}
