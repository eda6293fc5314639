//! Metadata records
//!
//! Every stored object has exactly one [`Metadata`] record, identified by
//! `(bucket, prefix, name)`. Subsystems extend a record through its
//! [`Attributes`]: typed blocks for versioning, revisions and tracking, plus a
//! free-form residual map for callers. All of it serializes into the single
//! `attributes` document field:
//!
//! ```text
//! attributes.versions  = {tags: {name: ref}, commits: [{name, ref}], tree: {ref: parent}}
//! attributes.revisions = {seq, name, changes: [{dt, seq, tags, delete}]}
//! attributes.tracking  = {label: experiment, ..., dataset?}
//! attributes.<other>   = caller-defined
//! ```

mod registry;

pub use registry::MetadataRegistry;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The reserved tag that always points at the most recent commit.
pub const LATEST_TAG: &str = "latest";

/// Metadata record of one stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    bucket: String,
    prefix: String,
    name: String,
    /// Handler tag of the backend that owns the object
    pub kind: String,
    /// Extension point shared by all subsystems
    #[serde(default)]
    pub attributes: Attributes,
    /// Pointer into the document or blob store, if the object has content
    #[serde(default)]
    pub content_ref: Option<String>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Metadata {
    /// Create a fresh record with empty attributes.
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            name: name.into(),
            kind: kind.into(),
            attributes: Attributes::default(),
            content_ref: None,
            created: now,
            modified: now,
        }
    }

    /// Get the bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the store prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get the object name (without prefix).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the creation timestamp. Never changes after the first put.
    #[must_use]
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Get the timestamp of the last save.
    #[must_use]
    pub const fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Advance `modified` to now, strictly past its previous value.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.modified = if now > self.modified {
            now
        } else {
            self.modified + Duration::nanoseconds(1)
        };
    }
}

/// Typed view of the `attributes` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    /// Commit graph of a versioned object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<VersionsBlock>,
    /// Changeset log of a revisioned dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<RevisionsBlock>,
    /// Experiment links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingBlock>,
    /// Caller-defined attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attributes {
    /// Copy of these attributes without the versions block.
    #[must_use]
    pub fn without_versions(&self) -> Self {
        Self {
            versions: None,
            ..self.clone()
        }
    }
}

/// One entry of a commit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Physical storage key of the snapshot
    pub name: String,
    /// Commit ref (content hash or caller-supplied id)
    #[serde(rename = "ref")]
    pub reference: String,
}

/// `attributes.versions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionsBlock {
    /// Symbolic name to commit ref
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Commits in creation order
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// Commit ref to parent ref
    #[serde(default)]
    pub tree: BTreeMap<String, Option<String>>,
}

impl VersionsBlock {
    /// Commit with the given ref.
    #[must_use]
    pub fn commit(&self, reference: &str) -> Option<&Commit> {
        self.commits.iter().find(|c| c.reference == reference)
    }

    /// Tags pointing at `reference`, sorted.
    #[must_use]
    pub fn tags_of(&self, reference: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|(_, r)| r.as_str() == reference)
            .map(|(tag, _)| tag.as_str())
            .collect()
    }
}

/// One entry of a dataset's change list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// When the changeset was recorded
    pub dt: DateTime<Utc>,
    /// Changeset sequence number
    pub seq: u64,
    /// Tags identifying this revision
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the whole changeset was a bulk delete
    #[serde(default)]
    pub delete: bool,
}

/// `attributes.revisions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionsBlock {
    /// Most recent changeset sequence
    pub seq: u64,
    /// Name of the changeset collection
    pub name: String,
    /// Change list in sequence order
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
}

/// `attributes.tracking`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingBlock {
    /// Event log dataset of an experiment record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Runtime label to experiment name
    #[serde(flatten)]
    pub labels: BTreeMap<String, String>,
}

impl TrackingBlock {
    /// Link `label` to `experiment`, replacing any previous link.
    pub fn link(&mut self, label: impl Into<String>, experiment: impl Into<String>) {
        self.labels.insert(label.into(), experiment.into());
    }

    /// Experiment linked under `label`.
    #[must_use]
    pub fn experiment(&self, label: &str) -> Option<&str> {
        self.labels.get(label).map(String::as_str)
    }
}
