//! Dataset revisions through the registry's datasets store

use chrono::{Duration, Utc};
use mlvault::config::RegistryConfig;
use mlvault::frame::Frame;
use mlvault::object::Object;
use mlvault::revision::{RevisionSelector, DELETE_FIELD};
use mlvault::store::{GetOptions, ObjectStore, PutOptions};
use mlvault::{DatasetStore, Registry};
use serde_json::json;

fn read(store: &DatasetStore, name: &str, opts: &GetOptions) -> Frame {
    store
        .get(name, opts)
        .unwrap()
        .and_then(Object::into_frame)
        .expect("dataset should be a frame")
}

fn rows(range: std::ops::Range<i64>, label: &str) -> Frame {
    Frame::from_json_rows(range.map(|i| (i, json!({"v": i, "src": label})))).unwrap()
}

// =============================================================================
// Overlapping changesets
// =============================================================================

#[test]
fn test_overlapping_update_merges_by_index() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    let df_a = rows(0..10, "a");
    let df_b = rows(5..10, "b");

    datasets
        .put(&df_a.clone().into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets.put(&df_b.clone().into(), "x", &PutOptions::new()).unwrap();

    let got = read(datasets, "x", &GetOptions::new());
    assert_eq!(got.len(), 10);
    for i in 0..5 {
        assert_eq!(got.row(i), df_a.row(i));
    }
    for i in 5..10 {
        assert_eq!(got.row(i), df_b.row(i));
    }
}

#[test]
fn test_revisions_are_monotonic() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..3, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets.put(&rows(3..6, "b").into(), "x", &PutOptions::new()).unwrap();
    datasets
        .put(&rows(0..2, "c").into(), "x", &PutOptions::new().delete(true))
        .unwrap();

    assert_eq!(read(datasets, "x", &GetOptions::new().revision(0)).len(), 3);
    assert_eq!(read(datasets, "x", &GetOptions::new().revision(1)).len(), 6);
    assert_eq!(read(datasets, "x", &GetOptions::new().revision(2)).len(), 4);

    let traced = read(datasets, "x", &GetOptions::new().revision(2).trace_revisions(true));
    assert_eq!(traced.len(), 6);
    assert_eq!(traced.value(0, DELETE_FIELD), Some(&json!(true)));
}

#[test]
fn test_replay_is_idempotent() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..4, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets.put(&rows(2..6, "b").into(), "x", &PutOptions::new()).unwrap();

    for k in 0..2_i64 {
        let first = read(datasets, "x", &GetOptions::new().revision(k));
        let second = read(datasets, "x", &GetOptions::new().revision(k));
        assert_eq!(first, second);
    }
    let replayed = read(datasets, "x", &GetOptions::new().revision(-1));
    let live = read(datasets, "x", &GetOptions::new());
    assert_eq!(replayed, live);
}

// =============================================================================
// Selectors and bookkeeping
// =============================================================================

#[test]
fn test_revision_by_time_and_tag() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    let t0 = Utc::now() - Duration::days(2);
    datasets
        .put(
            &rows(0..1, "a").into(),
            "x",
            &PutOptions::new().revisions(true).revision_dt(t0).tag("initial"),
        )
        .unwrap();
    datasets
        .put(
            &rows(1..2, "b").into(),
            "x",
            &PutOptions::new().revision_dt(t0 + Duration::days(1)),
        )
        .unwrap();

    let at = GetOptions::new().revision(RevisionSelector::At(t0 + Duration::hours(1)));
    assert_eq!(read(datasets, "x", &at).len(), 1);
    assert_eq!(read(datasets, "x", &GetOptions::new().revision("initial")).len(), 1);

    let changes = datasets.revisions("x").unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].tags, vec!["initial".to_string()]);
    assert_eq!(changes[1].seq, 1);
}

#[test]
fn test_filtered_revision_read() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..4, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets.put(&rows(4..6, "b").into(), "x", &PutOptions::new()).unwrap();

    let opts = GetOptions::new()
        .revision(0)
        .filter(mlvault::storage::Filter::new().eq("v", 2));
    let got = read(datasets, "x", &opts);
    assert_eq!(got.len(), 1);
    assert_eq!(got.value(2, "src"), Some(&json!("a")));
}

#[test]
fn test_changesets_are_hidden_from_listing() {
    let registry = Registry::builder().build().unwrap();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..2, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    assert_eq!(datasets.list(None).unwrap(), vec!["x"]);
    assert!(datasets.drop("x").unwrap());
    assert!(datasets.get("x", &GetOptions::new()).unwrap().is_none());
}

// =============================================================================
// Revisioned datasets under versioning
// =============================================================================

fn versioned_registry() -> Registry {
    let mut config = RegistryConfig::default();
    config.versioned_prefixes = vec!["models/".to_string(), "data/".to_string()];
    Registry::builder().config(config).build().unwrap()
}

#[test]
fn test_versioned_commits_hold_the_whole_dataset() {
    let registry = versioned_registry();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..10, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets.put(&rows(5..6, "b").into(), "x", &PutOptions::new()).unwrap();
    datasets.put(&rows(6..7, "c").into(), "x", &PutOptions::new()).unwrap();

    assert_eq!(datasets.inner().revisions("x").unwrap().len(), 3);
    assert_eq!(datasets.revisions("x").unwrap().len(), 3);
    assert_eq!(read(datasets, "x", &GetOptions::new()).len(), 10);

    let parent = read(datasets, "x^", &GetOptions::new());
    assert_eq!(parent.len(), 10);
    assert_eq!(parent.value(5, "src"), Some(&json!("b")));
    assert_eq!(parent.value(6, "src"), Some(&json!("a")));

    let first = read(datasets, "x", &GetOptions::new().version(0));
    assert_eq!(first, rows(0..10, "a"));
}

#[test]
fn test_versioned_commit_after_delete() {
    let registry = versioned_registry();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..4, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets
        .put(&rows(0..1, "a").into(), "x", &PutOptions::new().delete(true))
        .unwrap();

    assert_eq!(datasets.inner().revisions("x").unwrap().len(), 2);
    let head = read(datasets, "x", &GetOptions::new().version(-1));
    assert_eq!(head.len(), 3);
    assert!(head.row(0).is_none());
    assert_eq!(read(datasets, "x^", &GetOptions::new()).len(), 4);
}

#[test]
fn test_noversion_delta_takes_no_commit() {
    let registry = versioned_registry();
    let datasets = registry.datasets();
    datasets
        .put(&rows(0..4, "a").into(), "x", &PutOptions::new().revisions(true))
        .unwrap();
    datasets
        .put(&rows(4..5, "b").into(), "x", &PutOptions::new().noversion())
        .unwrap();

    assert_eq!(datasets.inner().revisions("x").unwrap().len(), 1);
    assert_eq!(datasets.revisions("x").unwrap().len(), 2);
    assert_eq!(read(datasets, "x", &GetOptions::new()).len(), 5);
}
