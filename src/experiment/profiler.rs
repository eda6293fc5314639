//! Background system profiler
//!
//! One tokio task per profiled run samples the host at a fixed interval and
//! pushes `profile` events into the run's event buffer. The task is bound to
//! a [`CancellationToken`]: `stop()` and drop cancel it, and the loop exits
//! at its next await point.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use sysinfo::{Disks, System};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventKind, EventSink, EventStamp};
use crate::Result;

/// Source of system metrics.
pub trait SystemSampler: Send {
    /// Take one sample, metric name to value.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    fn sample(&mut self) -> Result<Map<String, Value>>;
}

/// Samples CPU, memory and disk usage through `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    disks: Option<Disks>,
    cpu: bool,
    memory: bool,
}

impl SysinfoSampler {
    /// Sampler for the named metric groups (`cpu`, `memory`, `disk`).
    #[must_use]
    pub fn new<S: AsRef<str>>(metrics: &[S]) -> Self {
        let wants = |name: &str| metrics.iter().any(|m| m.as_ref() == name);
        Self {
            system: System::new(),
            disks: wants("disk").then(Disks::new_with_refreshed_list),
            cpu: wants("cpu"),
            memory: wants("memory"),
        }
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&mut self) -> Result<Map<String, Value>> {
        let mut sample = Map::new();
        if self.cpu {
            self.system.refresh_cpu();
            sample.insert(
                "cpu_percent".into(),
                Value::from(f64::from(self.system.global_cpu_info().cpu_usage())),
            );
        }
        if self.memory {
            self.system.refresh_memory();
            let used = self.system.used_memory();
            let total = self.system.total_memory();
            sample.insert("memory_used".into(), Value::from(used));
            sample.insert("memory_total".into(), Value::from(total));
            sample.insert("memory_percent".into(), Value::from(percent(used, total)));
        }
        if let Some(disks) = self.disks.as_mut() {
            disks.refresh();
            let (total, available) = disks.list().iter().fold((0_u64, 0_u64), |(t, a), disk| {
                (t + disk.total_space(), a + disk.available_space())
            });
            let used = total.saturating_sub(available);
            sample.insert("disk_used".into(), Value::from(used));
            sample.insert("disk_total".into(), Value::from(total));
            sample.insert("disk_percent".into(), Value::from(percent(used, total)));
        }
        Ok(sample)
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Handle to a running profiler task.
#[derive(Debug)]
pub struct BackgroundProfiler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundProfiler {
    /// Spawn the sampling loop for `run` on `runtime`.
    #[must_use]
    pub fn spawn(
        runtime: &Handle,
        sink: Arc<EventSink>,
        stamp: EventStamp,
        run: u64,
        interval: Duration,
        mut sampler: Box<dyn SystemSampler>,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = record_sample(sampler.as_mut(), &sink, &stamp, run) {
                            warn!(experiment = stamp.experiment(), run, error = %e, "profiler sample failed");
                        }
                    }
                }
            }
            debug!(experiment = stamp.experiment(), run, "profiler loop exited");
        });
        info!(run, interval_ms = interval.as_millis(), "started background profiler");
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancel the sampling loop.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Check if the loop has neither been cancelled nor finished.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "profiler task did not exit cleanly");
            }
        }
    }
}

impl Drop for BackgroundProfiler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn record_sample(
    sampler: &mut dyn SystemSampler,
    sink: &EventSink,
    stamp: &EventStamp,
    run: u64,
) -> Result<()> {
    let extra = Map::new();
    for (key, value) in sampler.sample()? {
        sink.push(stamp.stamp(run, None, EventKind::Profile, key, value, &extra))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use crate::store::{BaseStore, ObjectStore, StoreContext};
    use crate::Error;
    use serde_json::json;

    struct Counter(u64);

    impl SystemSampler for Counter {
        fn sample(&mut self) -> Result<Map<String, Value>> {
            self.0 += 1;
            if self.0 == 2 {
                return Err(Error::Other("sensor unavailable".into()));
            }
            let mut sample = Map::new();
            sample.insert("ticks".into(), json!(self.0));
            Ok(sample)
        }
    }

    fn sink() -> Arc<EventSink> {
        let ctx = StoreContext::new(
            "test",
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let datasets: Arc<dyn ObjectStore> = Arc::new(BaseStore::new(ctx, "data/"));
        Arc::new(EventSink::new(datasets, ".experiments/exp", 10_000))
    }

    #[tokio::test]
    async fn test_profiler_samples_until_cancelled() {
        let sink = sink();
        let profiler = BackgroundProfiler::spawn(
            &Handle::current(),
            Arc::clone(&sink),
            EventStamp::new("exp", "node", "user"),
            1,
            Duration::from_millis(5),
            Box::new(Counter(0)),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(profiler.is_running());
        profiler.shutdown().await;

        let events = sink.buffered().unwrap();
        // The second sample fails; the loop logs it and keeps going.
        assert!(events.len() >= 2);
        assert!(events.iter().all(|e| *e.event() == EventKind::Profile && e.run() == 1));
        assert!(events.iter().all(|e| e.value() != &json!(2)));

        let settled = sink.buffered().unwrap().len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.buffered().unwrap().len(), settled);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let sink = sink();
        let profiler = BackgroundProfiler::spawn(
            &Handle::current(),
            Arc::clone(&sink),
            EventStamp::new("exp", "node", "user"),
            1,
            Duration::from_millis(5),
            Box::new(Counter(0)),
        );
        let token = profiler.token.clone();
        drop(profiler);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sysinfo_sampler_selects_groups() {
        let mut sampler = SysinfoSampler::new(&["memory"]);
        let sample = sampler.sample().unwrap();
        assert!(sample.contains_key("memory_total"));
        assert!(!sample.contains_key("cpu_percent"));
        assert!(!sample.contains_key("disk_total"));
    }

    #[test]
    fn test_percent() {
        assert!((percent(1, 4) - 25.0).abs() < f64::EPSILON);
        assert!(percent(1, 0).abs() < f64::EPSILON);
    }
}
