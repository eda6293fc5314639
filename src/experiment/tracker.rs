//! Tracking provider
//!
//! ## Run lifecycle
//!
//! ```text
//! PENDING ──start()──> STARTED ──stop()──> STOPPED
//!                         ▲
//!            active_run() reuses a STARTED latest run,
//!            otherwise allocates latest_run + 1
//! ```
//!
//! Every logging call goes through [`EventStamp::stamp`] and into the
//! [`EventSink`] buffer. `start()` and `stop()` write through immediately.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::artifact::{restore_artifact, store_artifact};
use super::{
    event_dataset, Artifact, ArtifactValue, BackgroundProfiler, DataQuery, EventKind, EventSink,
    EventStamp, ExperimentStatistics, RestoredArtifact, RunStatus, SysinfoSampler, SystemSampler,
    TrackingEvent, CORE_FIELDS,
};
use crate::config::{RegistryConfig, StatsOptions};
use crate::frame::Frame;
use crate::metadata::Metadata;
use crate::object::{Object, TrackerProvider, TrackerSpec};
use crate::storage::Filter;
use crate::store::{GetOptions, ObjectStore};
use crate::{Error, Result};

/// Label used by [`Tracker::track`] when the caller gives none.
pub const DEFAULT_TRACKING_LABEL: &str = "default";

/// Stores a tracker reads from and writes to.
#[derive(Clone)]
pub struct TrackerStores {
    /// Models store: tracked objects and model artifacts
    pub models: Arc<dyn ObjectStore>,
    /// Datasets store: the event log and dataset artifacts
    pub datasets: Arc<dyn ObjectStore>,
}

impl fmt::Debug for TrackerStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerStores")
            .field("models", &self.models.prefix())
            .field("datasets", &self.datasets.prefix())
            .finish()
    }
}

type SamplerFactory = Box<dyn Fn() -> Box<dyn SystemSampler> + Send + Sync>;

#[derive(Debug, Default)]
struct RunState {
    run: Option<u64>,
    step: Option<u64>,
    extra: Map<String, Value>,
}

/// Experiment tracker: run lifecycle, buffered event logging and the read API.
pub struct Tracker {
    spec: TrackerSpec,
    stamp: EventStamp,
    stores: TrackerStores,
    sink: Arc<EventSink>,
    state: Mutex<RunState>,
    profiler: Mutex<Option<BackgroundProfiler>>,
    sampler: SamplerFactory,
    stats: StatsOptions,
}

impl Tracker {
    /// Tracker for `spec`, stamping events with the configured node and user.
    #[must_use]
    pub fn new(spec: TrackerSpec, stores: TrackerStores, config: &RegistryConfig) -> Self {
        let sink = Arc::new(EventSink::new(
            Arc::clone(&stores.datasets),
            event_dataset(&spec.experiment),
            spec.max_buffer,
        ));
        let metrics = config.tracking.profile_metrics.clone();
        Self {
            stamp: EventStamp::new(spec.experiment.clone(), config.node.clone(), config.userid.clone()),
            spec,
            stores,
            sink,
            state: Mutex::new(RunState::default()),
            profiler: Mutex::new(None),
            sampler: Box::new(move || Box::new(SysinfoSampler::new(&metrics))),
            stats: config.stats.clone(),
        }
    }

    /// Replace the system sampler used by the profiler.
    #[must_use]
    pub fn with_sampler<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SystemSampler> + Send + Sync + 'static,
    {
        self.sampler = Box::new(factory);
        self
    }

    /// Experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.experiment
    }

    /// Persisted tracker configuration.
    #[must_use]
    pub const fn spec(&self) -> &TrackerSpec {
        &self.spec
    }

    /// Name of the event log dataset.
    #[must_use]
    pub fn dataset(&self) -> &str {
        self.sink.dataset()
    }

    fn state(&self) -> Result<MutexGuard<'_, RunState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned("tracker run state"))
    }

    fn profiler(&self) -> Result<MutexGuard<'_, Option<BackgroundProfiler>>> {
        self.profiler.lock().map_err(|_| Error::LockPoisoned("tracker profiler"))
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    /// Start a new run numbered `latest_run() + 1` and return it.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read or written.
    pub fn start(&self) -> Result<u64> {
        let run = self.latest_run()? + 1;
        let extra = {
            let mut state = self.state()?;
            state.run = Some(run);
            state.step = None;
            state.extra.clone()
        };
        self.sink
            .push(self.stamp.stamp(run, None, EventKind::Start, "start", Value::Null, &extra))?;
        self.sink.flush()?;
        info!(experiment = self.name(), run, "started run");
        if self.spec.provider == TrackerProvider::Profiling {
            self.start_profiler(run)?;
        }
        Ok(run)
    }

    fn start_profiler(&self, run: u64) -> Result<()> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(experiment = self.name(), run, "no tokio runtime, profiling disabled for this run");
            return Ok(());
        };
        let profiler = BackgroundProfiler::spawn(
            &runtime,
            Arc::clone(&self.sink),
            self.stamp.clone(),
            run,
            Duration::from_millis(self.spec.profile_interval_ms),
            (self.sampler)(),
        );
        if let Some(previous) = self.profiler()?.replace(profiler) {
            previous.stop();
        }
        Ok(())
    }

    /// Stop the active run: emit `stop` and flush the buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` if no run is active, or a storage error.
    pub fn stop(&self) -> Result<()> {
        let (run, step, extra) = {
            let state = self.state()?;
            let run = state
                .run
                .ok_or_else(|| Error::NoActiveRun(self.name().to_string()))?;
            (run, state.step, state.extra.clone())
        };
        if let Some(profiler) = self.profiler()?.take() {
            profiler.stop();
            info!(experiment = self.name(), run, "stopped background profiler");
        }
        self.sink
            .push(self.stamp.stamp(run, step, EventKind::Stop, "stop", Value::Null, &extra))?;
        self.sink.flush()?;
        self.state()?.run = None;
        info!(experiment = self.name(), run, "stopped run");
        Ok(())
    }

    /// The active run; reuses a started latest run, otherwise starts one.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read or written.
    pub fn active_run(&self) -> Result<u64> {
        if let Some(run) = self.state()?.run {
            return Ok(run);
        }
        let latest = self.latest_run()?;
        if latest > 0 && self.status(latest)?.is_started() {
            self.state()?.run = Some(latest);
            debug!(experiment = self.name(), run = latest, "resumed started run");
            return Ok(latest);
        }
        self.start()
    }

    /// Scoped run: stopped when the guard is finished or dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot be started.
    pub fn use_run(&self) -> Result<RunGuard<'_>> {
        let run = self.active_run()?;
        Ok(RunGuard {
            tracker: self,
            run,
            finished: false,
        })
    }

    /// Run currently held by this tracker, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn current_run(&self) -> Result<Option<u64>> {
        Ok(self.state()?.run)
    }

    /// Highest run number recorded for this experiment, 0 if none.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn latest_run(&self) -> Result<u64> {
        Ok(self
            .lifecycle_events(None)?
            .iter()
            .filter(|e| *e.event() == EventKind::Start)
            .map(TrackingEvent::run)
            .max()
            .unwrap_or(0))
    }

    /// Lifecycle status of `run`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn status(&self, run: u64) -> Result<RunStatus> {
        let events = self.lifecycle_events(Some(run))?;
        Ok(RunStatus::from_events(events.iter().map(TrackingEvent::event)))
    }

    fn lifecycle_events(&self, run: Option<u64>) -> Result<Vec<TrackingEvent>> {
        let mut filter = Filter::new().is_in("event", ["start", "stop"]);
        if let Some(run) = run {
            filter = filter.eq("run", run);
        }
        let mut events = self
            .read_log(&filter)?
            .into_iter()
            .map(TrackingEvent::from_document)
            .collect::<Result<Vec<_>>>()?;
        for event in self.sink.buffered()? {
            if filter.matches(&event.to_document()?) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Set the step stamped onto subsequent events.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn set_step(&self, step: u64) -> Result<()> {
        self.state()?.step = Some(step);
        Ok(())
    }

    // ========================================================================
    // Logging
    // ========================================================================

    /// Log an event of any type in the active run.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`, or a storage error from
    /// a triggered flush.
    pub fn log_event(
        &self,
        event: impl Into<EventKind>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let (run, step, extra) = self.require_run()?;
        self.sink
            .push(self.stamp.stamp(run, step, event.into(), key, value.into(), &extra))
    }

    fn require_run(&self) -> Result<(u64, Option<u64>, Map<String, Value>)> {
        let state = self.state()?;
        let run = state
            .run
            .ok_or_else(|| Error::NoActiveRun(self.name().to_string()))?;
        Ok((run, state.step, state.extra.clone()))
    }

    /// Log a numeric metric.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`.
    pub fn log_metric(&self, key: impl Into<String>, value: f64) -> Result<()> {
        self.log_event(EventKind::Metric, key, value)
    }

    /// Log a parameter.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`.
    pub fn log_param(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.log_event(EventKind::Param, key, value)
    }

    /// Log an artifact; objects are stored in the registry and referenced.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`, or an error storing the object.
    pub fn log_artifact<'a>(&self, key: &str, artifact: impl Into<Artifact<'a>>) -> Result<()> {
        self.log_stored(EventKind::Artifact, key, &artifact.into())
    }

    /// Log input data, stored the same way as an artifact.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`, or an error storing the object.
    pub fn log_data<'a>(&self, key: &str, data: impl Into<Artifact<'a>>) -> Result<()> {
        self.log_stored(EventKind::Data, key, &data.into())
    }

    fn log_stored(&self, event: EventKind, key: &str, artifact: &Artifact<'_>) -> Result<()> {
        self.require_run()?;
        let value = store_artifact(key, artifact, self.stores.models.as_ref(), self.stores.datasets.as_ref())?;
        self.log_event(event, key, serde_json::to_value(value)?)
    }

    /// Log platform information under event `system`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoActiveRun` before `start()`.
    pub fn log_system(&self) -> Result<()> {
        let info = json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "mlvault": env!("CARGO_PKG_VERSION"),
        });
        self.log_event(EventKind::System, "system", info)
    }

    /// Merge fields into every subsequent event.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a field reuses a core event field.
    pub fn log_extra<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let fields: Vec<(String, Value)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if let Some((key, _)) = fields.iter().find(|(k, _)| CORE_FIELDS.contains(&k.as_str())) {
            return Err(Error::InvalidInput(format!(
                "extra field '{key}' clashes with a core event field"
            )));
        }
        self.state()?.extra.extend(fields);
        Ok(())
    }

    /// Stop adding extra fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn clear_extra(&self) -> Result<()> {
        self.state()?.extra.clear();
        Ok(())
    }

    /// Write buffered events now. Returns how many were written.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn flush(&self) -> Result<usize> {
        self.sink.flush()
    }

    // ========================================================================
    // Read API
    // ========================================================================

    fn read_log(&self, filter: &Filter) -> Result<Vec<Value>> {
        let opts = GetOptions::new().filter(filter.clone());
        match self.stores.datasets.get(self.dataset(), &opts)? {
            None => Ok(Vec::new()),
            Some(Object::Records(rows)) => Ok(rows),
            Some(other) => Err(Error::InvalidInput(format!(
                "event log '{}' holds a {} object",
                self.dataset(),
                other.object_type()
            ))),
        }
    }

    /// Events matching `query`, stored and buffered, sorted by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn data(&self, query: &DataQuery) -> Result<Vec<TrackingEvent>> {
        let latest = self.latest_run()?;
        let mut events = Vec::new();
        for doc in self.read_log(&query.to_filter(latest))? {
            let event = TrackingEvent::from_document(doc)?;
            if query.in_window(event.dt()) {
                events.push(event);
            }
        }
        for event in self.sink.buffered()? {
            if query.matches(&event.to_document()?, latest) {
                events.push(event);
            }
        }
        events.sort_by_key(TrackingEvent::dt);
        Ok(events)
    }

    /// [`data`](Self::data) as a frame indexed `0..n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be read.
    pub fn data_frame(&self, query: &DataQuery) -> Result<Frame> {
        let rows = self
            .data(query)?
            .iter()
            .map(TrackingEvent::to_document)
            .collect::<Result<Vec<_>>>()?;
        Frame::from_json_rows((0_i64..).zip(rows))
    }

    /// Artifacts and data logged under `key` in `run` (relative runs allowed).
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced object is missing or cannot be decoded.
    pub fn restore_artifacts(&self, key: &str, run: i64) -> Result<Vec<RestoredArtifact>> {
        let query = DataQuery::new()
            .run(run)
            .events([EventKind::Artifact, EventKind::Data])
            .key(key);
        self.data(&query)?
            .into_iter()
            .map(|event| {
                let value: ArtifactValue = serde_json::from_value(event.value().clone())?;
                restore_artifact(&value, self.stores.models.as_ref(), self.stores.datasets.as_ref())
            })
            .collect()
    }

    /// Statistics over this experiment's events.
    #[must_use]
    pub fn stats(&self) -> ExperimentStatistics<'_> {
        ExperimentStatistics::new(self, self.stats.clone())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop the whole event log. Requires `force`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` without `force`, or a storage error.
    pub fn clear(&self, force: bool) -> Result<bool> {
        if !force {
            return Err(Error::InvalidInput(format!(
                "clearing experiment '{}' deletes its event log, pass force=true",
                self.name()
            )));
        }
        self.sink.clear()?;
        let dropped = ObjectStore::drop(&*self.stores.datasets, self.dataset())?;
        info!(experiment = self.name(), "cleared event log");
        Ok(dropped)
    }

    /// Link an object in the models store to this experiment under `label`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the object does not exist.
    pub fn track(&self, name: &str, label: Option<&str>) -> Result<Metadata> {
        let mut meta = self
            .stores
            .models
            .metadata(name)?
            .ok_or_else(|| Error::NotFound(format!("{}{name}", self.stores.models.prefix())))?;
        let label = label.unwrap_or(DEFAULT_TRACKING_LABEL);
        meta.attributes
            .tracking
            .get_or_insert_with(Default::default)
            .link(label, self.name());
        self.stores.models.update_metadata(&mut meta)?;
        debug!(experiment = self.name(), name, label, "tracking object");
        Ok(meta)
    }

    /// Check if a background profiler is attached to the active run.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a logging thread panicked.
    pub fn is_profiling(&self) -> Result<bool> {
        Ok(self
            .profiler()?
            .as_ref()
            .is_some_and(BackgroundProfiler::is_running))
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("spec", &self.spec)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Err(e) = self.sink.flush() {
            warn!(experiment = self.name(), error = %e, "failed to flush events on drop");
        }
    }
}

/// A run scoped to a block. Stops the run when finished or dropped.
#[derive(Debug)]
pub struct RunGuard<'a> {
    tracker: &'a Tracker,
    run: u64,
    finished: bool,
}

impl RunGuard<'_> {
    /// The run number.
    #[must_use]
    pub const fn run(&self) -> u64 {
        self.run
    }

    /// Stop the run, reporting errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop event cannot be written.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.tracker.stop()
    }
}

impl std::ops::Deref for RunGuard<'_> {
    type Target = Tracker;

    fn deref(&self) -> &Tracker {
        self.tracker
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.tracker.stop() {
            warn!(experiment = self.tracker.name(), run = self.run, error = %e, "failed to stop run");
        }
    }
}
