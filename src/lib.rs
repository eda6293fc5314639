//! # mlvault: Shared Artifact Registry for ML Workloads
//!
//! **Version**: 0.1.0
//!
//! mlvault stores datasets, trained models and experiment logs under uniform
//! names, keeps a metadata record per object and lets pluggable backends
//! interpret the stored content by the object's declared kind.
//!
//! ## Subsystems
//!
//! - **Backend dispatch**: ordered `(predicate, handler)` registry ([`backend`])
//! - **Versioning**: commit graph with mutable tags and `name^` / `name@tag`
//!   pointers ([`versioning`])
//! - **Revisions**: row-level changesets with deletion semantics ([`revision`])
//! - **Experiment tracking**: buffered, append-only event log with a background
//!   profiler and derived statistics ([`experiment`])
//!
//! ```text
//! Registry
//!   ├── models   = Versioned<BaseStore("models/")>
//!   └── datasets = Revisioned<Versioned<BaseStore("data/")>>
//!                      │
//!                      └── StoreContext { bucket, DocumentStore, BlobStore, BackendRegistry }
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use mlvault::object::ModelBlob;
//! use mlvault::store::{GetOptions, ObjectStore, PutOptions};
//! use mlvault::Registry;
//!
//! let registry = Registry::builder().build()?;
//! let models = registry.models();
//!
//! models.put(&ModelBlob::new("sklearn", vec![1]).into(), "churn", &PutOptions::new().tag("v1"))?;
//! models.put(&ModelBlob::new("sklearn", vec![2]).into(), "churn", &PutOptions::new())?;
//!
//! let previous = models.get("churn^", &GetOptions::new())?;
//! let tagged = models.get("churn@v1", &GetOptions::new())?;
//! assert_eq!(previous, tagged);
//! # Ok::<(), mlvault::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod config;
pub mod error;
pub mod experiment;
pub mod frame;
pub mod logging;
pub mod metadata;
pub mod object;
pub mod revision;
pub mod storage;
pub mod store;
pub mod versioning;

pub use error::{Error, Result};

use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, BackendRegistry};
use crate::config::RegistryConfig;
use crate::experiment::{experiment_name, Tracker, TrackerStores};
use crate::metadata::Metadata;
use crate::object::{Object, TrackerProvider, TrackerSpec};
use crate::revision::Revisioned;
use crate::storage::{BlobStore, DocumentStore, MemoryBlobStore, MemoryDocumentStore};
use crate::store::{BaseStore, GetOptions, ObjectStore, PutOptions, StoreContext};
use crate::versioning::Versioned;

/// Prefix of the models store.
pub const MODELS_PREFIX: &str = "models/";

/// Prefix of the datasets store.
pub const DATASETS_PREFIX: &str = "data/";

/// Models store: every put creates a commit.
pub type ModelStore = Versioned<BaseStore>;

/// Datasets store: row revisions on top of optional versioning.
pub type DatasetStore = Revisioned<Versioned<BaseStore>>;

/// Registry instance
///
/// Owns the configuration and the stores; there is no global state, so
/// several registries (e.g. one per bucket) can live side by side.
pub struct Registry {
    config: RegistryConfig,
    ctx: StoreContext,
    models: Arc<ModelStore>,
    datasets: Arc<DatasetStore>,
}

impl Registry {
    /// Create a new registry builder
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Shared store context.
    #[must_use]
    pub const fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// The models store.
    #[must_use]
    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    /// The datasets store.
    #[must_use]
    pub fn datasets(&self) -> &DatasetStore {
        &self.datasets
    }

    /// Handler and metadata of a stored model, for `fit`/`predict`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the model or its kind is unknown.
    pub fn model_handler(&self, name: &str) -> Result<(Arc<dyn Backend>, Metadata)> {
        self.models.inner().handler(name)
    }

    fn tracker_stores(&self) -> TrackerStores {
        let models: Arc<dyn ObjectStore> = self.models.clone();
        let datasets: Arc<dyn ObjectStore> = self.datasets.clone();
        TrackerStores { models, datasets }
    }

    /// Tracker for experiment `name`, creating its stored tracker spec on first use.
    ///
    /// An existing tracker spec with the same provider is reused; otherwise a
    /// new version of it is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker spec cannot be read or stored.
    pub fn experiment(&self, name: &str, provider: TrackerProvider) -> Result<Tracker> {
        let spec = match self.stored_spec(name)? {
            Some(spec) if spec.provider == provider => spec,
            _ => {
                let mut spec = TrackerSpec::new(name, provider);
                spec.max_buffer = self.config.tracking.max_buffer;
                spec.profile_interval_ms = self.config.tracking.profile_interval_ms;
                self.models
                    .put(&spec.clone().into(), &experiment_name(name), &PutOptions::new())?;
                info!(experiment = name, ?provider, "created experiment");
                spec
            }
        };
        Ok(Tracker::new(spec, self.tracker_stores(), &self.config))
    }

    /// Tracker restored from a stored spec; `None` if the experiment is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker spec cannot be read.
    pub fn get_experiment(&self, name: &str) -> Result<Option<Tracker>> {
        Ok(self
            .stored_spec(name)?
            .map(|spec| Tracker::new(spec, self.tracker_stores(), &self.config)))
    }

    fn stored_spec(&self, name: &str) -> Result<Option<TrackerSpec>> {
        match self.models.get(&experiment_name(name), &GetOptions::new())? {
            Some(Object::Tracker(spec)) => Ok(Some(spec)),
            Some(other) => Err(Error::InvalidInput(format!(
                "'{}' holds a {} object, not a tracker",
                experiment_name(name),
                other.object_type()
            ))),
            None => Ok(None),
        }
    }

    /// Names of all stored experiments.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be listed.
    pub fn list_experiments(&self) -> Result<Vec<String>> {
        let prefix = experiment_name("");
        Ok(self
            .models
            .list(Some(&format!("{prefix}*")))?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("bucket", &self.ctx.bucket)
            .field("backends", &self.ctx.backends)
            .finish_non_exhaustive()
    }
}

/// Registry builder
#[derive(Default)]
pub struct RegistryBuilder {
    config: Option<RegistryConfig>,
    docs: Option<Arc<dyn DocumentStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    backends: Vec<(String, Arc<dyn Backend>)>,
}

impl RegistryBuilder {
    /// Set the configuration (default: [`RegistryConfig::default`])
    #[must_use]
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document store (default: in-memory)
    #[must_use]
    pub fn document_store(mut self, docs: Arc<dyn DocumentStore>) -> Self {
        self.docs = Some(docs);
        self
    }

    /// Set the blob store (default: in-memory)
    #[must_use]
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Register an additional backend after the built-in ones
    #[must_use]
    pub fn backend(mut self, kind: impl Into<String>, handler: Arc<dyn Backend>) -> Self {
        self.backends.push((kind.into(), handler));
        self
    }

    /// Build the registry
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid
    pub fn build(self) -> Result<Registry> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let docs = self
            .docs
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()));
        let blobs = self.blobs.unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));

        let mut backends = BackendRegistry::with_builtins(&docs, &blobs);
        for (kind, handler) in self.backends {
            backends.register(kind, handler);
        }
        let ctx = StoreContext::new(config.bucket.clone(), docs, blobs).with_backends(backends);

        let versioned = |prefix: &str| config.versioned_prefixes.iter().any(|p| p == prefix);
        let models = Versioned::with_enabled(
            BaseStore::new(ctx.clone(), MODELS_PREFIX),
            versioned(MODELS_PREFIX),
        );
        let datasets = Revisioned::new(Versioned::with_enabled(
            BaseStore::new(ctx.clone(), DATASETS_PREFIX),
            versioned(DATASETS_PREFIX),
        ));
        info!(bucket = %config.bucket, "registry ready");
        Ok(Registry {
            config,
            ctx,
            models: Arc::new(models),
            datasets: Arc::new(datasets),
        })
    }
}
