//! Row-level dataset revisions
//!
//! [`Revisioned`] wraps another store and keeps, for every revisioned frame,
//! an append-only log of changesets next to a materialized live copy:
//!
//! ```text
//! data/sales                live frame, upserted on every put
//! data/.revisions/sales     changesets: rows + _delete_ + _revision_
//! attributes.revisions      {seq, name, changes: [{dt, seq, tags, delete}]}
//! ```
//!
//! Reads at the latest revision hit the live frame. Older revisions are
//! rebuilt by replaying changesets `0..=k`, merging each by row index with
//! non-null cells overriding, and dropping rows flagged as deleted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{Hints, WriteMode};
use crate::frame::{Frame, Row};
use crate::metadata::{ChangeEntry, Metadata, RevisionsBlock};
use crate::object::Object;
use crate::storage::Filter;
use crate::store::{GetOptions, ObjectStore, PutOptions};
use crate::{Error, Result};

/// Column flagging a row as deleted.
pub const DELETE_FIELD: &str = "_delete_";

/// Column holding the sequence of the changeset that wrote a row.
pub const REVISION_FIELD: &str = "_revision_";

/// Names under this prefix hold changeset logs.
pub const CHANGES_PREFIX: &str = ".revisions/";

const RECORDS_KIND: &str = "dataset.records";

/// Which revision of a dataset to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSelector {
    /// Position in the change list; negative counts back from the latest
    Index(i64),
    /// Latest changeset recorded at or before this time
    At(DateTime<Utc>),
    /// First changeset carrying this tag
    Tag(String),
}

impl From<i64> for RevisionSelector {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

impl From<i32> for RevisionSelector {
    fn from(index: i32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl From<DateTime<Utc>> for RevisionSelector {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::At(dt)
    }
}

impl From<&str> for RevisionSelector {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.to_string())
    }
}

impl From<String> for RevisionSelector {
    fn from(tag: String) -> Self {
        Self::Tag(tag)
    }
}

fn is_deleted(row: &Row) -> bool {
    row.get(DELETE_FIELD) == Some(&Value::Bool(true))
}

/// Store wrapper adding changeset revisions to frames.
#[derive(Debug, Clone)]
pub struct Revisioned<S> {
    inner: S,
}

impl<S: ObjectStore> Revisioned<S> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Change list of a dataset; empty if it is not revisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn revisions(&self, name: &str) -> Result<Vec<ChangeEntry>> {
        Ok(self
            .inner
            .metadata(name)?
            .and_then(|meta| meta.attributes.revisions)
            .map(|block| block.changes)
            .unwrap_or_default())
    }

    fn write_changeset(&self, block_name: &str, changeset: &Frame, replace: bool) -> Result<()> {
        let opts = PutOptions::new().kind(RECORDS_KIND).append(!replace).noversion();
        self.inner
            .put(&Object::Records(changeset.to_documents()), block_name, &opts)?;
        Ok(())
    }

    fn put_base(
        &self,
        frame: &Frame,
        name: &str,
        opts: &PutOptions,
        entry: ChangeEntry,
    ) -> Result<Metadata> {
        let block_name = format!("{CHANGES_PREFIX}{name}");
        let changeset = mark(frame, 0, opts.delete);
        self.write_changeset(&block_name, &changeset, true)?;

        let mut live = changeset;
        live.retain(|_, row| !is_deleted(row));
        live.drop_columns(&[DELETE_FIELD, REVISION_FIELD]);
        let live_opts = PutOptions {
            tag: None,
            hints: opts.hints.clone().with_mode(WriteMode::Replace),
            ..opts.clone()
        };
        let mut meta = self.inner.put(&Object::Frame(live), name, &live_opts)?;
        meta.attributes.revisions = Some(RevisionsBlock {
            seq: 0,
            name: block_name,
            changes: vec![entry],
        });
        Ok(meta)
    }

    fn put_delta(
        &self,
        frame: &Frame,
        name: &str,
        opts: &PutOptions,
        mut block: RevisionsBlock,
        mut entry: ChangeEntry,
    ) -> Result<Metadata> {
        let seq = block.seq + 1;
        let changeset = mark(frame, seq, opts.delete);
        self.write_changeset(&block.name, &changeset, false)?;

        let mut upserts = changeset.clone();
        upserts.retain(|_, row| !is_deleted(row));
        upserts.drop_columns(&[DELETE_FIELD, REVISION_FIELD]);
        let mut removals = changeset;
        removals.retain(|_, row| is_deleted(row));

        let live_opts = PutOptions {
            tag: None,
            noversion: true,
            hints: opts.hints.clone().with_mode(WriteMode::Upsert),
            ..opts.clone()
        };
        let mut meta = self.inner.put(&Object::Frame(upserts), name, &live_opts)?;
        if !removals.is_empty() {
            let remove_opts = PutOptions {
                kind: Some(meta.kind.clone()),
                hints: Hints::new().with_mode(WriteMode::Remove),
                ..PutOptions::new().noversion()
            };
            meta = self.inner.put(&Object::Frame(removals), name, &remove_opts)?;
        }
        if !opts.noversion && meta.attributes.versions.is_some() {
            meta = self.commit_live(name, &meta, opts)?;
        }
        entry.seq = seq;
        block.seq = seq;
        block.changes.push(entry);
        meta.attributes.revisions = Some(block);
        Ok(meta)
    }

    /// Rewrite the materialized live frame through the inner store so a
    /// versioned dataset commits the whole dataset, not the delta.
    fn commit_live(&self, name: &str, meta: &Metadata, opts: &PutOptions) -> Result<Metadata> {
        let live = self
            .inner
            .get(name, &GetOptions::new())?
            .and_then(Object::into_frame)
            .unwrap_or_default();
        let commit_opts = PutOptions {
            kind: Some(meta.kind.clone()),
            tag: None,
            hints: opts.hints.clone().with_mode(WriteMode::Replace),
            ..opts.clone()
        };
        self.inner.put(&Object::Frame(live), name, &commit_opts)
    }

    fn load_changesets(&self, block: &RevisionsBlock, through: u64) -> Result<BTreeMap<u64, Frame>> {
        let filter = Filter::new().is_in(REVISION_FIELD, 0..=through);
        let docs = match self.inner.get(&block.name, &GetOptions::new().filter(filter))? {
            Some(Object::Records(docs)) => docs,
            Some(other) => {
                return Err(Error::StorageError(format!(
                    "changeset log '{}' holds a {} object",
                    block.name,
                    other.object_type()
                )))
            }
            None => Vec::new(),
        };
        let mut grouped: BTreeMap<u64, Vec<Value>> = BTreeMap::new();
        for doc in docs {
            let seq = doc
                .get(REVISION_FIELD)
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::StorageError(format!("changeset row lacks '{REVISION_FIELD}'")))?;
            grouped.entry(seq).or_default().push(doc);
        }
        grouped
            .into_iter()
            .map(|(seq, docs)| Frame::from_documents(docs).map(|frame| (seq, frame)))
            .collect()
    }

    /// Rebuild the dataset as of changeset `target`.
    fn replay(&self, block: &RevisionsBlock, target: u64, trace: bool) -> Result<Frame> {
        let mut state = Frame::new();
        for changeset in self.load_changesets(block, target)?.values() {
            state.merge_override(changeset);
            if !trace {
                state.retain(|_, row| !is_deleted(row));
            }
        }
        if !trace {
            state.drop_columns(&[DELETE_FIELD, REVISION_FIELD]);
        }
        Ok(state)
    }
}

/// Copy of `frame` stamped with `seq` and deletion flags.
fn mark(frame: &Frame, seq: u64, delete_all: bool) -> Frame {
    let mut changeset = frame.clone();
    if delete_all {
        changeset.set_column(DELETE_FIELD, &Value::Bool(true));
    } else {
        changeset.fill_column(DELETE_FIELD, &Value::Bool(false));
    }
    changeset.set_column(REVISION_FIELD, &Value::from(seq));
    changeset
}

/// Sequence number a selector resolves to.
fn resolve(block: &RevisionsBlock, name: &str, selector: &RevisionSelector) -> Result<u64> {
    let changes = &block.changes;
    let found = match selector {
        RevisionSelector::Index(index) => {
            let count = i64::try_from(changes.len()).unwrap_or(i64::MAX);
            let position = if *index >= 0 {
                (*index).min(count - 1)
            } else {
                (count + index).max(0)
            };
            usize::try_from(position)
                .ok()
                .and_then(|p| changes.get(p))
                .map(|c| c.seq)
        }
        RevisionSelector::At(dt) => Some(
            changes
                .iter()
                .filter(|c| c.dt <= *dt)
                .max_by_key(|c| (c.dt, c.seq))
                .map_or(block.seq, |c| c.seq),
        ),
        RevisionSelector::Tag(tag) => {
            return changes
                .iter()
                .find(|c| c.tags.iter().any(|t| t == tag))
                .map(|c| c.seq)
                .ok_or_else(|| Error::UnknownTag {
                    name: name.to_string(),
                    tag: tag.clone(),
                })
        }
    };
    found.ok_or_else(|| Error::NotFound(format!("revision {selector:?} of '{name}'")))
}

impl<S: ObjectStore> ObjectStore for Revisioned<S> {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn put(&self, obj: &Object, name: &str, opts: &PutOptions) -> Result<Metadata> {
        let Some(frame) = obj.as_frame() else {
            return self.inner.put(obj, name, opts);
        };
        let block = self
            .inner
            .metadata(name)?
            .and_then(|meta| meta.attributes.revisions);
        if !opts.revisions.unwrap_or(block.is_some()) {
            return self.inner.put(obj, name, opts);
        }
        let entry = ChangeEntry {
            dt: opts.revision_dt.unwrap_or_else(Utc::now),
            seq: 0,
            tags: opts.tag.iter().cloned().collect(),
            delete: opts.delete,
        };
        let mut meta = match block {
            Some(block) if !opts.is_replace() => self.put_delta(frame, name, opts, block, entry)?,
            _ => self.put_base(frame, name, opts, entry)?,
        };
        self.inner.update_metadata(&mut meta)?;
        if let Some(block) = &meta.attributes.revisions {
            info!(prefix = self.inner.prefix(), name, seq = block.seq, rows = frame.len(), "recorded changeset");
        }
        Ok(meta)
    }

    fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Object>> {
        let Some(block) = self
            .inner
            .metadata(name)?
            .and_then(|meta| meta.attributes.revisions)
        else {
            return self.inner.get(name, opts);
        };
        if let Some(seq) = opts.changeset {
            if seq > block.seq {
                return Err(Error::NotFound(format!("changeset {seq} of '{name}'")));
            }
            let mut rows = self
                .load_changesets(&block, seq)?
                .remove(&seq)
                .unwrap_or_default();
            if !opts.trace_revisions {
                rows.drop_columns(&[DELETE_FIELD, REVISION_FIELD]);
            }
            return Ok(Some(Object::Frame(rows)));
        }
        let target = match &opts.revision {
            Some(selector) => resolve(&block, name, selector)?,
            None => block.seq,
        };
        if target == block.seq && !opts.trace_revisions {
            return self.inner.get(name, opts);
        }
        debug!(name, target, latest = block.seq, "replaying changesets");
        let mut frame = self.replay(&block, target, opts.trace_revisions)?;
        if !opts.filter.is_empty() {
            frame.retain(|_, row| opts.filter.matches(&Value::Object(row.clone())));
        }
        Ok(Some(Object::Frame(frame)))
    }

    fn drop(&self, name: &str) -> Result<bool> {
        if let Some(block) = self
            .inner
            .metadata(name)?
            .and_then(|meta| meta.attributes.revisions)
        {
            self.inner.drop(&block.name)?;
        }
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
            .filter(|name| !name.starts_with(CHANGES_PREFIX))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BaseStore, StoreContext};
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn datasets() -> Revisioned<BaseStore> {
        let ctx = StoreContext::new(
            "test",
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        Revisioned::new(BaseStore::new(ctx, "data/"))
    }

    fn frame(rows: Vec<(i64, Value)>) -> Frame {
        Frame::from_json_rows(rows).unwrap()
    }

    fn read(store: &Revisioned<BaseStore>, opts: &GetOptions) -> Frame {
        store.get("x", opts).unwrap().and_then(Object::into_frame).unwrap()
    }

    #[test]
    fn test_base_put_initializes_block() {
        let store = datasets();
        let meta = store
            .put(&frame(vec![(0, json!({"a": 1}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        let block = meta.attributes.revisions.unwrap();
        assert_eq!(block.seq, 0);
        assert_eq!(block.name, ".revisions/x");
        assert_eq!(block.changes.len(), 1);
        assert_eq!(store.list(None).unwrap(), vec!["x"]);
    }

    #[test]
    fn test_unrevisioned_frame_passes_through() {
        let store = datasets();
        let meta = store.put(&frame(vec![(0, json!({"a": 1}))]).into(), "x", &PutOptions::new()).unwrap();
        assert!(meta.attributes.revisions.is_none());
        assert!(store.revisions("x").unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_reinsert() {
        let store = datasets();
        store
            .put(&frame(vec![(0, json!({"v": 1})), (1, json!({"v": 2}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        store
            .put(&frame(vec![(1, json!({}))]).into(), "x", &PutOptions::new().delete(true))
            .unwrap();
        store
            .put(&frame(vec![(1, json!({"v": 5}))]).into(), "x", &PutOptions::new())
            .unwrap();

        assert_eq!(read(&store, &GetOptions::new().revision(1)), frame(vec![(0, json!({"v": 1}))]));
        let latest = frame(vec![(0, json!({"v": 1})), (1, json!({"v": 5}))]);
        assert_eq!(read(&store, &GetOptions::new()), latest);
        assert_eq!(read(&store, &GetOptions::new().revision(2)), latest);

        let traced = read(&store, &GetOptions::new().revision(1).trace_revisions(true));
        assert_eq!(traced.value(1, DELETE_FIELD), Some(&json!(true)));
        assert_eq!(traced.value(1, REVISION_FIELD), Some(&json!(1)));
    }

    #[test]
    fn test_per_row_delete_column() {
        let store = datasets();
        store
            .put(&frame(vec![(0, json!({"v": 1})), (1, json!({"v": 2}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        let delta = frame(vec![(0, json!({"v": 9, "_delete_": false})), (1, json!({"_delete_": true}))]);
        store.put(&delta.into(), "x", &PutOptions::new()).unwrap();
        assert_eq!(read(&store, &GetOptions::new()), frame(vec![(0, json!({"v": 9}))]));
    }

    #[test]
    fn test_selectors() {
        let store = datasets();
        let t0 = Utc::now() - Duration::hours(3);
        for (seq, offset) in [(0i64, 0), (1, 1), (2, 2)] {
            let opts = PutOptions::new()
                .revisions(true)
                .tag(format!("r{seq}"))
                .revision_dt(t0 + Duration::hours(offset));
            store.put(&frame(vec![(seq, json!({"v": seq}))]).into(), "x", &opts).unwrap();
        }
        let rows = |sel: RevisionSelector| read(&store, &GetOptions::new().revision(sel)).len();
        assert_eq!(rows(RevisionSelector::Index(0)), 1);
        assert_eq!(rows(RevisionSelector::Index(-2)), 2);
        assert_eq!(rows(RevisionSelector::Index(-10)), 1);
        assert_eq!(rows(RevisionSelector::Index(10)), 3);
        assert_eq!(rows((t0 + Duration::minutes(90)).into()), 2);
        assert_eq!(rows((t0 - Duration::hours(1)).into()), 3);
        assert_eq!(rows("r1".into()), 2);
        let err = store.get("x", &GetOptions::new().revision("nope")).unwrap_err();
        assert!(matches!(err, Error::UnknownTag { .. }));
    }

    #[test]
    fn test_repeated_tag_resolves_to_first_changeset() {
        let store = datasets();
        for seq in 0..3_i64 {
            let opts = PutOptions::new().revisions(true).tag("nightly");
            store.put(&frame(vec![(seq, json!({"v": seq}))]).into(), "x", &opts).unwrap();
        }
        let block = store.metadata("x").unwrap().unwrap().attributes.revisions.unwrap();
        assert_eq!(resolve(&block, "x", &"nightly".into()).unwrap(), 0);
        assert_eq!(read(&store, &GetOptions::new().revision("nightly")).len(), 1);
    }

    #[test]
    fn test_changeset_read() {
        let store = datasets();
        store
            .put(&frame(vec![(0, json!({"v": 1}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        store
            .put(&frame(vec![(7, json!({"v": 7}))]).into(), "x", &PutOptions::new())
            .unwrap();
        let only = read(&store, &GetOptions::new().changeset(1));
        assert_eq!(only, frame(vec![(7, json!({"v": 7}))]));
        assert!(store.get("x", &GetOptions::new().changeset(5)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_replace_restarts_revisions() {
        let store = datasets();
        store
            .put(&frame(vec![(0, json!({"v": 1}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        store.put(&frame(vec![(1, json!({"v": 2}))]).into(), "x", &PutOptions::new()).unwrap();
        let meta = store
            .put(&frame(vec![(5, json!({"v": 5}))]).into(), "x", &PutOptions::new().append(false))
            .unwrap();
        assert_eq!(meta.attributes.revisions.unwrap().seq, 0);
        assert_eq!(read(&store, &GetOptions::new()), frame(vec![(5, json!({"v": 5}))]));
        assert_eq!(read(&store, &GetOptions::new().revision(0)), frame(vec![(5, json!({"v": 5}))]));
    }

    #[test]
    fn test_drop_removes_changesets() {
        let store = datasets();
        store
            .put(&frame(vec![(0, json!({"v": 1}))]).into(), "x", &PutOptions::new().revisions(true))
            .unwrap();
        assert!(store.drop("x").unwrap());
        assert!(store.inner().metadata(".revisions/x").unwrap().is_none());
    }
}
