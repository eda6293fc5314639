//! Experiment tracking
//!
//! A [`Tracker`] records an append-only event log per experiment. Events are
//! buffered in memory and written to a regular dataset in the datasets store
//! (`.experiments/{name}`) as one bulk insert per flush.
//!
//! ## Event log
//!
//! ```text
//! experiment | run | step | event  | key  | value | dt | node | userid | ...extra
//! -----------+-----+------+--------+------+-------+----+------+--------+---------
//! churn      |   1 |      | start  |start | null  | .. | ..   | ..     |
//! churn      |   1 |    0 | metric | acc  | 0.91  | .. | ..   | ..     |
//! churn      |   1 |      | stop   | stop | null  | .. | ..   | ..     |
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use mlvault::experiment::DataQuery;
//! use mlvault::object::TrackerProvider;
//! use mlvault::Registry;
//!
//! let registry = Registry::builder().build()?;
//! let exp = registry.experiment("churn", TrackerProvider::Simple)?;
//!
//! exp.start()?;
//! exp.log_metric("acc", 0.91)?;
//! exp.stop()?;
//!
//! let events = exp.data(&DataQuery::new())?;
//! assert_eq!(events.len(), 3);
//! # Ok::<(), mlvault::Error>(())
//! ```

mod artifact;
mod event;
mod profiler;
mod query;
mod run;
mod sink;
mod statistics;
mod tracker;

pub use artifact::{Artifact, ArtifactFormat, ArtifactValue, RestoredArtifact, ARTIFACTS_PREFIX};
pub use event::{EventKind, EventStamp, TrackingEvent, CORE_FIELDS};
pub use profiler::{BackgroundProfiler, SysinfoSampler, SystemSampler};
pub use query::{DataQuery, Selector};
pub use run::RunStatus;
pub use sink::EventSink;
pub use statistics::{default_slot_size, Describe, ExperimentStatistics, Grouping, StatsRow, TimeBin};
pub use tracker::{RunGuard, Tracker, TrackerStores, DEFAULT_TRACKING_LABEL};

/// Prefix of every experiment event log in the datasets store.
pub const EXPERIMENTS_PREFIX: &str = ".experiments/";

/// Name of the models-store record holding an experiment's tracker spec.
#[must_use]
pub fn experiment_name(name: &str) -> String {
    format!("experiments/{name}")
}

/// Name of the dataset holding an experiment's event log.
#[must_use]
pub fn event_dataset(name: &str) -> String {
    format!("{EXPERIMENTS_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(event_dataset("churn"), ".experiments/churn");
        assert_eq!(experiment_name("churn"), "experiments/churn");
    }
}
