//! Backend for persisted experiment tracker specs.

use std::sync::Arc;

use super::{content_key, Backend, Candidate, Hints};
use crate::experiment::event_dataset;
use crate::metadata::Metadata;
use crate::object::{Object, ObjectType, TrackerSpec};
use crate::storage::{DocumentStore, Filter};
use crate::{Error, Result};

/// Kind of stored tracker specs.
pub const TRACKER_KIND: &str = "experiment.tracker";

const SPEC_KEY: &str = "spec";

/// Stores [`TrackerSpec`]s and links the record to the experiment's event log.
pub struct ExperimentBackend {
    docs: Arc<dyn DocumentStore>,
}

impl ExperimentBackend {
    /// Create an experiment backend over a document store.
    #[must_use]
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

impl Backend for ExperimentBackend {
    fn kind(&self) -> &str {
        TRACKER_KIND
    }

    fn supports(&self, candidate: &Candidate<'_>) -> bool {
        candidate.is(ObjectType::Tracker, TRACKER_KIND)
    }

    fn put(&self, obj: &Object, meta: &mut Metadata, _hints: &Hints) -> Result<()> {
        let Object::Tracker(spec) = obj else {
            return Err(Error::InvalidInput(format!(
                "{TRACKER_KIND} cannot store a {} object",
                obj.object_type()
            )));
        };
        let collection = content_key(meta);
        self.docs
            .upsert(&collection, SPEC_KEY, serde_json::to_value(spec)?)?;
        meta.attributes
            .tracking
            .get_or_insert_with(Default::default)
            .dataset = Some(event_dataset(&spec.experiment));
        meta.content_ref = Some(collection);
        Ok(())
    }

    fn get(&self, meta: &Metadata, _filter: &Filter, _hints: &Hints) -> Result<Object> {
        let doc = self
            .docs
            .get(&content_key(meta), SPEC_KEY)?
            .ok_or_else(|| Error::NotFound(format!("tracker spec of '{}'", meta.name())))?;
        let spec: TrackerSpec = serde_json::from_value(doc)?;
        Ok(Object::Tracker(spec))
    }

    fn drop(&self, meta: &Metadata) -> Result<bool> {
        self.docs.drop_collection(&content_key(meta))
    }
}
