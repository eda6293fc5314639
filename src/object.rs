//! Objects the registry stores
//!
//! Instead of inspecting arbitrary runtime types, every stored value is one
//! variant of [`Object`]; backends decide what they accept by looking at its
//! [`ObjectType`] descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frame::Frame;

/// A value that can be put into and retrieved from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Object {
    /// Row-indexed table
    Frame(Frame),
    /// Raw JSON documents, appended in bulk
    Records(Vec<Value>),
    /// A single JSON document
    Json(Value),
    /// Serialized model from some ML framework
    Model(ModelBlob),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// Stored experiment tracker configuration
    Tracker(TrackerSpec),
}

impl Object {
    /// Runtime type descriptor used for backend dispatch.
    #[must_use]
    pub const fn object_type(&self) -> ObjectType {
        match self {
            Self::Frame(_) => ObjectType::Frame,
            Self::Records(_) => ObjectType::Records,
            Self::Json(_) => ObjectType::Json,
            Self::Model(_) => ObjectType::Model,
            Self::Bytes(_) => ObjectType::Bytes,
            Self::Tracker(_) => ObjectType::Tracker,
        }
    }

    /// The frame, if this is one.
    #[must_use]
    pub const fn as_frame(&self) -> Option<&Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Consume into a frame, if this is one.
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// The records, if this is a record set.
    #[must_use]
    pub fn as_records(&self) -> Option<&[Value]> {
        match self {
            Self::Records(records) => Some(records),
            _ => None,
        }
    }

    /// The model, if this is one.
    #[must_use]
    pub const fn as_model(&self) -> Option<&ModelBlob> {
        match self {
            Self::Model(model) => Some(model),
            _ => None,
        }
    }
}

impl From<Frame> for Object {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<ModelBlob> for Object {
    fn from(model: ModelBlob) -> Self {
        Self::Model(model)
    }
}

impl From<TrackerSpec> for Object {
    fn from(spec: TrackerSpec) -> Self {
        Self::Tracker(spec)
    }
}

/// Runtime type descriptor of an [`Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// [`Object::Frame`]
    Frame,
    /// [`Object::Records`]
    Records,
    /// [`Object::Json`]
    Json,
    /// [`Object::Model`]
    Model,
    /// [`Object::Bytes`]
    Bytes,
    /// [`Object::Tracker`]
    Tracker,
}

impl ObjectType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Records => "records",
            Self::Json => "json",
            Self::Model => "model",
            Self::Bytes => "bytes",
            Self::Tracker => "tracker",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trained model as produced by an external framework adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBlob {
    /// Framework tag, e.g. `sklearn`, `onnx`
    pub framework: String,
    /// Serialized model bytes
    pub payload: Vec<u8>,
    /// Hyperparameters or other descriptive data
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ModelBlob {
    /// Create a model blob without parameters.
    #[must_use]
    pub fn new(framework: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            framework: framework.into(),
            payload,
            params: Map::new(),
        }
    }

    /// Attach a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Which tracker implementation an experiment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerProvider {
    /// Buffered event log
    #[default]
    Simple,
    /// Event log plus background system profiling
    Profiling,
}

/// Persisted configuration of an experiment tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSpec {
    /// Experiment name
    pub experiment: String,
    /// Tracker implementation
    #[serde(default)]
    pub provider: TrackerProvider,
    /// Buffered events before a bulk write is forced
    pub max_buffer: usize,
    /// Profiler sampling interval in milliseconds
    pub profile_interval_ms: u64,
}

impl TrackerSpec {
    /// Spec with the given provider and default buffering.
    #[must_use]
    pub fn new(experiment: impl Into<String>, provider: TrackerProvider) -> Self {
        let defaults = crate::config::TrackingConfig::default();
        Self {
            experiment: experiment.into(),
            provider,
            max_buffer: defaults.max_buffer,
            profile_interval_ms: defaults.profile_interval_ms,
        }
    }
}
