//! Event log queries

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::EventKind;
use crate::storage::{Document, Filter};

/// A field constraint: everything, one value, or any of several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selector<T> {
    /// No constraint
    #[default]
    All,
    /// Exactly this value
    One(T),
    /// Any of these values
    Many(Vec<T>),
}

impl<T> Selector<T> {
    fn map<U>(&self, f: impl Fn(&T) -> U) -> Selector<U> {
        match self {
            Self::All => Selector::All,
            Self::One(v) => Selector::One(f(v)),
            Self::Many(vs) => Selector::Many(vs.iter().map(f).collect()),
        }
    }
}

impl<T: Into<Value> + Clone> Selector<T> {
    fn apply(&self, filter: Filter, field: &str) -> Filter {
        match self {
            Self::All => filter,
            Self::One(v) => filter.eq(field, v.clone()),
            Self::Many(vs) => filter.is_in(field, vs.iter().cloned()),
        }
    }
}

/// What [`Tracker::data`](super::Tracker::data) returns.
///
/// Runs are selected by number; zero and negative numbers are relative to
/// the latest run (`-1` is the latest, `-2` the one before) and clamp to run 1.
/// A new query selects the latest run and everything within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQuery {
    /// Experiment name(s)
    pub experiment: Selector<String>,
    /// Run number(s), possibly relative
    pub run: Selector<i64>,
    /// Event type(s)
    pub event: Selector<EventKind>,
    /// Step(s)
    pub step: Selector<u64>,
    /// Key(s)
    pub key: Selector<String>,
    /// Only events at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Only events at or before this time
    pub end: Option<DateTime<Utc>>,
}

impl Default for DataQuery {
    fn default() -> Self {
        Self {
            experiment: Selector::All,
            run: Selector::One(-1),
            event: Selector::All,
            step: Selector::All,
            key: Selector::All,
            since: None,
            end: None,
        }
    }
}

impl DataQuery {
    /// Latest run, every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one experiment.
    #[must_use]
    pub fn experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment = Selector::One(name.into());
        self
    }

    /// Select one run.
    #[must_use]
    pub fn run(mut self, run: i64) -> Self {
        self.run = Selector::One(run);
        self
    }

    /// Select several runs.
    #[must_use]
    pub fn runs(mut self, runs: impl IntoIterator<Item = i64>) -> Self {
        self.run = Selector::Many(runs.into_iter().collect());
        self
    }

    /// Select every run.
    #[must_use]
    pub fn all_runs(mut self) -> Self {
        self.run = Selector::All;
        self
    }

    /// Select one event type.
    #[must_use]
    pub fn event(mut self, event: impl Into<EventKind>) -> Self {
        self.event = Selector::One(event.into());
        self
    }

    /// Select several event types.
    #[must_use]
    pub fn events<E: Into<EventKind>>(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.event = Selector::Many(events.into_iter().map(Into::into).collect());
        self
    }

    /// Select one step.
    #[must_use]
    pub fn step(mut self, step: u64) -> Self {
        self.step = Selector::One(step);
        self
    }

    /// Select several steps.
    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = u64>) -> Self {
        self.step = Selector::Many(steps.into_iter().collect());
        self
    }

    /// Select one key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Selector::One(key.into());
        self
    }

    /// Select several keys.
    #[must_use]
    pub fn keys<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.key = Selector::Many(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Only events at or after `since`.
    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Only events at or before `end`.
    #[must_use]
    pub const fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Absolute run numbers given the latest run.
    #[must_use]
    pub fn resolve_runs(&self, latest: u64) -> Selector<u64> {
        self.run.map(|&run| absolute_run(run, latest))
    }

    /// Document filter for the field selectors, runs resolved against `latest`.
    #[must_use]
    pub fn to_filter(&self, latest: u64) -> Filter {
        let filter = self.experiment.apply(Filter::new(), "experiment");
        let filter = self.resolve_runs(latest).apply(filter, "run");
        let filter = self
            .event
            .map(|event| event.as_str().to_string())
            .apply(filter, "event");
        let filter = self.step.apply(filter, "step");
        self.key.apply(filter, "key")
    }

    /// Check the time bounds against an event timestamp.
    #[must_use]
    pub fn in_window(&self, dt: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| dt >= since) && self.end.map_or(true, |end| dt <= end)
    }

    /// Field selectors and time bounds against a stored row.
    #[must_use]
    pub fn matches(&self, doc: &Document, latest: u64) -> bool {
        if !self.to_filter(latest).matches(doc) {
            return false;
        }
        if self.since.is_none() && self.end.is_none() {
            return true;
        }
        doc.get("dt")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_some_and(|dt| self.in_window(dt.with_timezone(&Utc)))
    }
}

fn absolute_run(run: i64, latest: u64) -> u64 {
    if run > 0 {
        run.unsigned_abs()
    } else {
        let back = run.unsigned_abs().saturating_sub(1);
        latest.saturating_sub(back).max(1)
    }
}
