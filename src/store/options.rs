//! Options for store puts and gets.
//!
//! One options type per direction is shared by every store layer; each layer
//! reads the fields it understands and passes the rest through.

use chrono::{DateTime, Utc};

use crate::backend::{Hints, WriteMode};
use crate::metadata::{Attributes, LATEST_TAG};
use crate::revision::RevisionSelector;
use crate::storage::Filter;

/// Options for [`ObjectStore::put`](super::ObjectStore::put).
#[derive(Debug, Clone, PartialEq)]
pub struct PutOptions {
    /// Explicit backend kind; otherwise dispatch by object type
    pub kind: Option<String>,
    /// Caller attributes merged into the metadata record
    pub attributes: Option<Attributes>,
    /// Hints passed to the backend
    pub hints: Hints,
    /// Version tag, or revision tag for revisioned datasets
    pub tag: Option<String>,
    /// Caller-supplied commit ref
    pub commit: Option<String>,
    /// Tag or ref the new commit descends from
    pub previous: String,
    /// Skip versioning for this put
    pub noversion: bool,
    /// Enable (or disable) revisioning; unset keeps the dataset's current mode
    pub revisions: Option<bool>,
    /// Mark every row of the incoming frame as deleted
    pub delete: bool,
    /// Timestamp recorded for the changeset instead of now
    pub revision_dt: Option<DateTime<Utc>>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            kind: None,
            attributes: None,
            hints: Hints::new(),
            tag: None,
            commit: None,
            previous: LATEST_TAG.to_string(),
            noversion: false,
            revisions: None,
            delete: false,
            revision_dt: None,
        }
    }
}

impl PutOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the backend registered under `kind`.
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Merge `attributes` into the record.
    #[must_use]
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Replace the backend hints.
    #[must_use]
    pub fn hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    /// Append to (`true`) or replace (`false`) existing content.
    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        let mode = if append {
            WriteMode::Append
        } else {
            WriteMode::Replace
        };
        self.hints = self.hints.with_mode(mode);
        self
    }

    /// Tag the new version or revision.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Use `commit` as the commit ref instead of a content hash.
    #[must_use]
    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Parent of the new commit (tag or ref).
    #[must_use]
    pub fn previous(mut self, previous: impl Into<String>) -> Self {
        self.previous = previous.into();
        self
    }

    /// Store without creating a commit.
    #[must_use]
    pub const fn noversion(mut self) -> Self {
        self.noversion = true;
        self
    }

    /// Turn revisioning on or off.
    #[must_use]
    pub const fn revisions(mut self, enabled: bool) -> Self {
        self.revisions = Some(enabled);
        self
    }

    /// Record the incoming rows as deleted.
    #[must_use]
    pub const fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Timestamp of the changeset.
    #[must_use]
    pub const fn revision_dt(mut self, dt: DateTime<Utc>) -> Self {
        self.revision_dt = Some(dt);
        self
    }

    /// True if the hints ask to replace existing content.
    #[must_use]
    pub fn is_replace(&self) -> bool {
        self.hints.mode() == Some(WriteMode::Replace)
    }
}

/// Options for [`ObjectStore::get`](super::ObjectStore::get).
#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    /// Version tag
    pub tag: Option<String>,
    /// Commit ref
    pub commit: Option<String>,
    /// Commit index: negative counts back from the latest, clamped to the oldest
    pub version: i64,
    /// Dataset revision; latest when unset
    pub revision: Option<RevisionSelector>,
    /// Return only the rows of one changeset
    pub changeset: Option<u64>,
    /// Keep deleted rows and the `_delete_`/`_revision_` columns
    pub trace_revisions: bool,
    /// Row filter for dataset backends
    pub filter: Filter,
    /// Hints passed to the backend
    pub hints: Hints,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            tag: None,
            commit: None,
            version: -1,
            revision: None,
            changeset: None,
            trace_revisions: false,
            filter: Filter::new(),
            hints: Hints::new(),
        }
    }
}

impl GetOptions {
    /// Latest content, no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve through a version tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Resolve a specific commit.
    #[must_use]
    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Resolve by commit index.
    #[must_use]
    pub const fn version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Read a dataset revision.
    #[must_use]
    pub fn revision(mut self, revision: impl Into<RevisionSelector>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Read the rows of a single changeset.
    #[must_use]
    pub const fn changeset(mut self, seq: u64) -> Self {
        self.changeset = Some(seq);
        self
    }

    /// Keep deletion markers in replayed revisions.
    #[must_use]
    pub const fn trace_revisions(mut self, trace: bool) -> Self {
        self.trace_revisions = trace;
        self
    }

    /// Restrict the rows returned.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Replace the backend hints.
    #[must_use]
    pub fn hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    /// True if no version selector is set.
    #[must_use]
    pub fn is_latest_version(&self) -> bool {
        self.tag.is_none() && self.commit.is_none() && self.version == -1
    }
}
