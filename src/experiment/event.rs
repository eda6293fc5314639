//! Tracking events - rows of an experiment's append-only log

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::Document;
use crate::Result;

/// Fields every event row carries; extra fields may not reuse these names.
pub const CORE_FIELDS: [&str; 9] = [
    "experiment",
    "run",
    "step",
    "event",
    "key",
    "value",
    "dt",
    "node",
    "userid",
];

/// Event type of a log row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Run started
    Start,
    /// Run stopped
    Stop,
    /// Numeric metric
    Metric,
    /// Hyperparameter
    Param,
    /// Artifact reference or literal
    Artifact,
    /// Host information
    System,
    /// Background profiler sample
    Profile,
    /// Logged input data
    Data,
    /// Caller-defined event
    Custom(String),
}

impl EventKind {
    /// Name as stored in the `event` column.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Metric => "metric",
            Self::Param => "param",
            Self::Artifact => "artifact",
            Self::System => "system",
            Self::Profile => "profile",
            Self::Data => "data",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "metric" => Self::Metric,
            "param" => Self::Param,
            "artifact" => Self::Artifact,
            "system" => Self::System,
            "profile" => Self::Profile,
            "data" => Self::Data,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    experiment: String,
    run: u64,
    #[serde(default)]
    step: Option<u64>,
    event: EventKind,
    key: String,
    #[serde(default)]
    value: Value,
    dt: DateTime<Utc>,
    node: String,
    userid: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TrackingEvent {
    /// Get the experiment name.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Get the run number.
    #[must_use]
    pub const fn run(&self) -> u64 {
        self.run
    }

    /// Get the step, if one was set.
    #[must_use]
    pub const fn step(&self) -> Option<u64> {
        self.step
    }

    /// Get the event type.
    #[must_use]
    pub const fn event(&self) -> &EventKind {
        &self.event
    }

    /// Get the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Value as a number, if it is one.
    #[must_use]
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Get the timestamp.
    #[must_use]
    pub const fn dt(&self) -> DateTime<Utc> {
        self.dt
    }

    /// Get the node the event was logged on.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Get the user that logged the event.
    #[must_use]
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// Get the extra fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Row as stored in the event log.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_document(&self) -> Result<Document> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a stored row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the row lacks core fields.
    pub fn from_document(doc: Document) -> Result<Self> {
        Ok(serde_json::from_value(doc)?)
    }
}

/// Provenance shared by every event of one tracker; the single place events
/// are constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStamp {
    experiment: String,
    node: String,
    userid: String,
}

impl EventStamp {
    /// Create a stamp.
    #[must_use]
    pub fn new(
        experiment: impl Into<String>,
        node: impl Into<String>,
        userid: impl Into<String>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            node: node.into(),
            userid: userid.into(),
        }
    }

    /// Get the experiment name.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Build an event timestamped now.
    #[must_use]
    pub fn stamp(
        &self,
        run: u64,
        step: Option<u64>,
        event: EventKind,
        key: impl Into<String>,
        value: Value,
        extra: &Map<String, Value>,
    ) -> TrackingEvent {
        TrackingEvent {
            experiment: self.experiment.clone(),
            run,
            step,
            event,
            key: key.into(),
            value,
            dt: Utc::now(),
            node: self.node.clone(),
            userid: self.userid.clone(),
            extra: extra.clone(),
        }
    }
}
