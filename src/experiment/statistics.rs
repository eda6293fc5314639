//! Statistics over an experiment's event log
//!
//! Read-only: every computation re-reads the log through
//! [`Tracker::data`](super::Tracker::data) and can be repeated at any time.
//!
//! Performance statistics partition the selected events, ordered by time,
//! into equal-count bins (default: 10% of the events per bin):
//!
//! ```text
//! events   e e e e | e e e e | e e e e | e e
//! bins     [  b0  ] [  b1   ] [  b2   ] [b3]
//! duration  last.dt - first.dt of each bin
//! rate      count / duration * tp_unit
//! ```

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{DataQuery, EventKind, Selector, Tracker, TrackingEvent};
use crate::config::StatsOptions;
use crate::Result;

/// Whether metric statistics are computed per run or across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    /// One row per `(run, key)`
    ByRun,
    /// One row per key
    #[default]
    All,
}

/// Descriptive statistics of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Describe {
    /// Sample size
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation (0 for a single value)
    pub std: f64,
    /// Smallest value
    pub min: f64,
    /// `(p, value)` pairs, linearly interpolated
    pub percentiles: Vec<(f64, f64)>,
    /// Largest value
    pub max: f64,
}

impl Describe {
    /// Describe `values`; `None` for an empty sample. NaNs are ignored.
    #[must_use]
    pub fn from_values(values: &[f64], percentiles: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let std = if sorted.len() > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Some(Self {
            count: sorted.len(),
            mean,
            std,
            min: sorted[0],
            percentiles: percentiles
                .iter()
                .map(|&p| (p, interpolate(&sorted, p)))
                .collect(),
            max: sorted[sorted.len() - 1],
        })
    }

    /// Value at percentile `p`, if it was computed.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(q, _)| (q - p).abs() < 1e-9)
            .map(|(_, v)| *v)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let position = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// One row of statistics, keyed by `(event, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    /// Event type, or the statistic for performance rows
    pub event: String,
    /// Metric key, or what the sample is made of for performance rows
    pub key: String,
    /// Run, for per-run rows
    pub run: Option<u64>,
    /// The statistics
    pub describe: Describe,
}

/// A time bin of events.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBin {
    /// Timestamp of the first event
    pub start: DateTime<Utc>,
    /// Timestamp of the last event
    pub end: DateTime<Utc>,
    /// Events in the bin
    pub count: usize,
}

impl TimeBin {
    /// Seconds between the first and last event.
    #[must_use]
    pub fn duration(&self) -> f64 {
        seconds(self.start, self.end)
    }

    /// Events per `tp_unit` seconds; `None` for a zero-length bin.
    #[must_use]
    pub fn rate(&self, tp_unit: f64) -> Option<f64> {
        let duration = self.duration();
        (duration > 0.0).then(|| self.count as f64 / duration * tp_unit)
    }
}

fn seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .num_microseconds()
        .map_or(f64::MAX, |us| us as f64 / 1e6)
}

/// Statistics engine bound to one tracker.
#[derive(Debug)]
pub struct ExperimentStatistics<'a> {
    tracker: &'a Tracker,
    options: StatsOptions,
}

impl<'a> ExperimentStatistics<'a> {
    /// Engine reading `tracker` with the given defaults.
    #[must_use]
    pub const fn new(tracker: &'a Tracker, options: StatsOptions) -> Self {
        Self { tracker, options }
    }

    /// Defaults in use.
    #[must_use]
    pub const fn options(&self) -> &StatsOptions {
        &self.options
    }

    fn describe(&self, values: &[f64]) -> Option<Describe> {
        Describe::from_values(values, &self.options.percentiles)
    }

    /// Statistics of numeric values per metric key, per run or across runs.
    ///
    /// Without an event selector the query is restricted to `metric` events.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn metrics(&self, query: &DataQuery, grouping: Grouping) -> Result<Vec<StatsRow>> {
        let mut query = query.clone();
        if query.event == Selector::All {
            query.event = Selector::One(EventKind::Metric);
        }
        let mut groups: BTreeMap<(String, String, Option<u64>), Vec<f64>> = BTreeMap::new();
        for event in self.tracker.data(&query)? {
            let Some(value) = event.numeric_value() else {
                continue;
            };
            let run = match grouping {
                Grouping::ByRun => Some(event.run()),
                Grouping::All => None,
            };
            groups
                .entry((event.event().to_string(), event.key().to_string(), run))
                .or_default()
                .push(value);
        }
        let groups: Vec<_> = groups.into_iter().collect();
        Ok(groups
            .into_par_iter()
            .filter_map(|((event, key, run), values)| {
                self.describe(&values).map(|describe| StatsRow {
                    event,
                    key,
                    run,
                    describe,
                })
            })
            .collect())
    }

    /// Duration in seconds of each run, from its first to its last time event.
    /// Runs with fewer than two time events are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn run_durations(&self, query: &DataQuery) -> Result<Vec<(u64, f64)>> {
        let mut query = query.clone();
        query.event = Selector::Many(
            self.options
                .time_events
                .iter()
                .map(|e| EventKind::from(e.as_str()))
                .collect(),
        );
        let mut runs: BTreeMap<u64, Vec<DateTime<Utc>>> = BTreeMap::new();
        for event in self.tracker.data(&query)? {
            runs.entry(event.run()).or_default().push(event.dt());
        }
        Ok(runs
            .into_iter()
            .filter(|(_, times)| times.len() >= 2)
            .filter_map(|(run, times)| {
                let first = times.iter().min()?;
                let last = times.iter().max()?;
                Some((run, seconds(*first, *last)))
            })
            .collect())
    }

    /// Statistics of run durations across the selected runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn latency(&self, query: &DataQuery) -> Result<Option<StatsRow>> {
        let durations: Vec<f64> = self.run_durations(query)?.into_iter().map(|(_, d)| d).collect();
        Ok(self.row("latency", "run", &durations))
    }

    /// Equal-count time bins of the selected events; `slots` is the number
    /// of bins, capped at one event per bin.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn bins(&self, query: &DataQuery, slots: Option<usize>) -> Result<Vec<TimeBin>> {
        let events = self.tracker.data(query)?;
        Ok(partition(&events, slots))
    }

    /// Statistics of bin durations.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn group_latency(&self, query: &DataQuery, slots: Option<usize>) -> Result<Option<StatsRow>> {
        let durations: Vec<f64> = self.bins(query, slots)?.iter().map(TimeBin::duration).collect();
        Ok(self.row("group_latency", "bin", &durations))
    }

    /// Statistics of per-bin event rates, in events per `tp_unit` seconds
    /// (default from the options). Zero-length bins are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn throughput(
        &self,
        query: &DataQuery,
        tp_unit: Option<f64>,
        slots: Option<usize>,
    ) -> Result<Option<StatsRow>> {
        let unit = tp_unit.unwrap_or(self.options.tp_unit);
        let rates: Vec<f64> = self
            .bins(query, slots)?
            .iter()
            .filter_map(|bin| bin.rate(unit))
            .collect();
        Ok(self.row("throughput", "bin", &rates))
    }

    /// Statistics of per-bin rates relative to `nominal` events per `tp_unit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn utilization(
        &self,
        query: &DataQuery,
        nominal: f64,
        slots: Option<usize>,
    ) -> Result<Option<StatsRow>> {
        if nominal <= 0.0 {
            return Err(crate::Error::InvalidInput(format!(
                "nominal throughput must be positive, got {nominal}"
            )));
        }
        let unit = self.options.tp_unit;
        let ratios: Vec<f64> = self
            .bins(query, slots)?
            .iter()
            .filter_map(|bin| bin.rate(unit))
            .map(|rate| rate / nominal)
            .collect();
        Ok(self.row("utilization", "bin", &ratios))
    }

    /// Metric statistics plus latency, and with `perf_stats` the bin
    /// statistics; utilization when a nominal rate is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn summary(
        &self,
        query: &DataQuery,
        perf_stats: bool,
        nominal: Option<f64>,
    ) -> Result<Vec<StatsRow>> {
        let mut rows = self.metrics(query, Grouping::All)?;
        rows.extend(self.latency(query)?);
        if perf_stats {
            rows.extend(self.group_latency(query, None)?);
            rows.extend(self.throughput(query, None, None)?);
            if let Some(nominal) = nominal {
                rows.extend(self.utilization(query, nominal, None)?);
            }
        }
        Ok(rows)
    }

    fn row(&self, event: &str, key: &str, values: &[f64]) -> Option<StatsRow> {
        self.describe(values).map(|describe| StatsRow {
            event: event.to_string(),
            key: key.to_string(),
            run: None,
            describe,
        })
    }
}

/// Default bin size: 10% of the events, at least one.
#[must_use]
pub fn default_slot_size(events: usize) -> usize {
    events.div_ceil(10).max(1)
}

/// Event counts per bin: `slots` equal-count bins (sizes differ by at most
/// one), or bins of [`default_slot_size`] events when unset.
fn bin_sizes(events: usize, slots: Option<usize>) -> Vec<usize> {
    match slots {
        Some(n) => {
            let n = n.clamp(1, events.max(1));
            (0..n).map(|i| events / n + usize::from(i < events % n)).collect()
        }
        None => {
            let size = default_slot_size(events);
            (0..events.div_ceil(size))
                .map(|i| size.min(events - i * size))
                .collect()
        }
    }
}

fn partition(events: &[TrackingEvent], slots: Option<usize>) -> Vec<TimeBin> {
    let mut rest = events;
    bin_sizes(events.len(), slots)
        .into_iter()
        .filter_map(|size| {
            let (chunk, tail) = rest.split_at(size);
            rest = tail;
            let start = chunk.iter().map(TrackingEvent::dt).min()?;
            let end = chunk.iter().map(TrackingEvent::dt).max()?;
            Some(TimeBin {
                start,
                end,
                count: chunk.len(),
            })
        })
        .collect()
}
