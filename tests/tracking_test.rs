//! Experiment tracking through the registry

use std::sync::Arc;
use std::time::Duration;

use mlvault::config::RegistryConfig;
use mlvault::experiment::{DataQuery, EventKind, RunStatus, SystemSampler};
use mlvault::object::{ModelBlob, Object, TrackerProvider};
use mlvault::storage::MemoryDocumentStore;
use mlvault::store::{ObjectStore, PutOptions};
use mlvault::{Error, Registry};
use serde_json::{json, Map, Value};

fn registry_with(max_buffer: usize) -> (Arc<MemoryDocumentStore>, Registry) {
    let docs = Arc::new(MemoryDocumentStore::new());
    let mut config = RegistryConfig::default();
    config.bucket = "test".into();
    config.tracking.max_buffer = max_buffer;
    config.tracking.profile_interval_ms = 5;
    let registry = Registry::builder()
        .config(config)
        .document_store(docs.clone())
        .build()
        .unwrap();
    (docs, registry)
}

// =============================================================================
// Run lifecycle
// =============================================================================

#[test]
fn test_start_metric_stop() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    exp.start().unwrap();
    exp.log_metric("acc", 0.9).unwrap();
    exp.stop().unwrap();

    let events = exp.data(&DataQuery::new()).unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.event().as_str()).collect();
    assert_eq!(kinds, vec!["start", "metric", "stop"]);
    assert!(events.iter().all(|e| e.run() == 1));
    assert_eq!(events[1].numeric_value(), Some(0.9));
}

#[test]
fn test_scoped_runs_are_numbered_consecutively() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    let mut runs = Vec::new();
    for i in 0..5 {
        let run = exp.use_run().unwrap();
        run.log_param("fold", i).unwrap();
        runs.push(run.run());
    }
    assert_eq!(runs, vec![1, 2, 3, 4, 5]);
    assert_eq!(exp.latest_run().unwrap(), 5);
    assert!((1..=5).all(|r| exp.status(r).unwrap() == RunStatus::Stopped));
}

#[test]
fn test_logging_without_run_fails_immediately() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    assert!(matches!(exp.log_metric("acc", 1.0), Err(Error::NoActiveRun(_))));
    assert!(matches!(exp.log_param("lr", 0.1), Err(Error::NoActiveRun(_))));
    assert!(matches!(exp.stop(), Err(Error::NoActiveRun(_))));
    assert!(exp.data(&DataQuery::new().all_runs()).unwrap().is_empty());
}

#[test]
fn test_restored_tracker_continues_numbering() {
    let (_, registry) = registry_with(10);
    {
        let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
        exp.use_run().unwrap().finish().unwrap();
    }
    let exp = registry.get_experiment("exp").unwrap().unwrap();
    assert_eq!(exp.start().unwrap(), 2);
    exp.stop().unwrap();
}

// =============================================================================
// Flushing
// =============================================================================

#[test]
fn test_flush_write_count_is_bounded() {
    for (m, t) in [(1_usize, 1_usize), (7, 3), (10, 10), (25, 4), (3, 50)] {
        let (docs, registry) = registry_with(t);
        let name = format!("flush-{m}-{t}");
        let exp = registry.experiment(&name, TrackerProvider::Simple).unwrap();
        let collection = format!("test.data/.experiments/{name}");

        exp.start().unwrap();
        let after_start = docs.collection_writes(&collection);
        for i in 0..m {
            exp.log_metric("loss", 1.0 / (i as f64 + 1.0)).unwrap();
        }
        exp.stop().unwrap();

        let writes = docs.collection_writes(&collection) - after_start;
        assert!(writes <= m.div_ceil(t), "m={m} t={t} writes={writes}");
        let metrics = exp.data(&DataQuery::new().event(EventKind::Metric)).unwrap();
        assert_eq!(metrics.len(), m);
    }
}

#[test]
fn test_buffered_events_are_visible_before_flush() {
    let (docs, registry) = registry_with(100);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    exp.start().unwrap();
    let before = docs.collection_writes("test.data/.experiments/exp");
    exp.log_metric("acc", 0.5).unwrap();
    assert_eq!(docs.collection_writes("test.data/.experiments/exp"), before);
    assert_eq!(exp.data(&DataQuery::new().key("acc")).unwrap().len(), 1);
    assert_eq!(exp.flush().unwrap(), 1);
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_query_selectors() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    for run in 1..=3_u64 {
        exp.start().unwrap();
        for step in 0..4 {
            exp.set_step(step).unwrap();
            exp.log_metric("loss", (run * 10 + step) as f64).unwrap();
        }
        exp.stop().unwrap();
    }

    let latest = exp.data(&DataQuery::new().event(EventKind::Metric)).unwrap();
    assert!(latest.iter().all(|e| e.run() == 3));
    assert_eq!(latest.len(), 4);

    let previous = exp.data(&DataQuery::new().run(-2).event(EventKind::Metric)).unwrap();
    assert!(previous.iter().all(|e| e.run() == 2));

    let picked = exp
        .data(&DataQuery::new().runs([1, 3]).steps([0, 3]).key("loss"))
        .unwrap();
    let values: Vec<f64> = picked.iter().filter_map(|e| e.numeric_value()).collect();
    assert_eq!(values, vec![10.0, 13.0, 30.0, 33.0]);

    let everything = exp.data(&DataQuery::new().all_runs()).unwrap();
    assert_eq!(everything.len(), 3 * 6);
    assert!(everything.windows(2).all(|w| w[0].dt() <= w[1].dt()));
}

#[test]
fn test_time_window() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    exp.start().unwrap();
    exp.log_metric("a", 1.0).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let cut = chrono::Utc::now();
    std::thread::sleep(Duration::from_millis(5));
    exp.log_metric("b", 2.0).unwrap();
    exp.stop().unwrap();

    let before = exp.data(&DataQuery::new().end(cut)).unwrap();
    assert_eq!(before.len(), 2);
    let after = exp.data(&DataQuery::new().since(cut)).unwrap();
    let keys: Vec<&str> = after.iter().map(|e| e.key()).collect();
    assert_eq!(keys, vec!["b", "stop"]);
}

// =============================================================================
// Artifacts and linking
// =============================================================================

#[test]
fn test_model_artifact_reference() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    let model = Object::from(ModelBlob::new("sklearn", vec![4, 2]));
    let run = exp.use_run().unwrap();
    run.log_artifact("clf", &model).unwrap();
    run.finish().unwrap();

    let events = exp.data(&DataQuery::new().event(EventKind::Artifact)).unwrap();
    assert_eq!(events[0].value()["format"], json!("model"));
    let stored = events[0].value()["data"].as_str().unwrap().to_string();
    assert!(registry.models().metadata(&stored).unwrap().is_some());
    // Artifacts are stored without creating commits.
    assert!(registry.models().revisions(&stored).unwrap().is_empty());
}

#[test]
fn test_track_links_object_to_experiment() {
    let (_, registry) = registry_with(10);
    let exp = registry.experiment("exp", TrackerProvider::Simple).unwrap();
    registry
        .models()
        .put(&ModelBlob::new("onnx", vec![]).into(), "clf", &PutOptions::new())
        .unwrap();
    exp.track("clf", None).unwrap();
    let meta = registry.models().metadata("clf").unwrap().unwrap();
    assert_eq!(meta.attributes.tracking.unwrap().experiment("default"), Some("exp"));

    let spec = registry.models().metadata("experiments/exp").unwrap().unwrap();
    let tracking = spec.attributes.tracking.unwrap();
    assert_eq!(tracking.dataset.as_deref(), Some(".experiments/exp"));
}

// =============================================================================
// Background profiler
// =============================================================================

struct FixedSampler;

impl SystemSampler for FixedSampler {
    fn sample(&mut self) -> mlvault::Result<Map<String, Value>> {
        let mut sample = Map::new();
        sample.insert("cpu_percent".into(), json!(12.5));
        Ok(sample)
    }
}

#[tokio::test]
async fn test_profiler_runs_for_the_active_run() {
    let (_, registry) = registry_with(10);
    let exp = registry
        .experiment("prof", TrackerProvider::Profiling)
        .unwrap()
        .with_sampler(|| Box::new(FixedSampler));

    exp.start().unwrap();
    assert!(exp.is_profiling().unwrap());
    tokio::time::sleep(Duration::from_millis(40)).await;
    exp.stop().unwrap();
    assert!(!exp.is_profiling().unwrap());

    let samples = exp.data(&DataQuery::new().event(EventKind::Profile)).unwrap();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|e| e.run() == 1 && e.key() == "cpu_percent"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let after = exp.data(&DataQuery::new().event(EventKind::Profile)).unwrap();
    assert_eq!(after.len(), samples.len());
}
