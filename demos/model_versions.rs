//! Model Versions Example
//!
//! Stores several versions of a model, moves a tag, walks the commit graph
//! and keeps a revisioned dataset alongside.
//!
//! Run with: cargo run --example model_versions

use mlvault::frame::Frame;
use mlvault::object::{ModelBlob, Object};
use mlvault::store::{GetOptions, ObjectStore, PutOptions};
use mlvault::Registry;
use serde_json::json;

fn describe(obj: Option<Object>) -> String {
    match obj {
        Some(Object::Model(m)) => format!("{} {:?}", m.framework, m.params),
        Some(other) => format!("{other:?}"),
        None => "<missing>".to_string(),
    }
}

fn main() -> anyhow::Result<()> {
    mlvault::logging::init_tracing();
    println!("=== mlvault Model Versions ===\n");

    let registry = Registry::builder().build()?;
    let models = registry.models();

    // -------------------------------------------------------------------------
    // 1. Three versions, the first tagged
    // -------------------------------------------------------------------------
    println!("1. Storing versions...");
    for (i, tag) in [(1, Some("v1")), (2, None), (3, None)] {
        let model: Object = ModelBlob::new("sklearn", vec![i]).with_param("C", f64::from(i)).into();
        let opts = tag.map_or_else(PutOptions::new, |t| PutOptions::new().tag(t));
        models.put(&model, "churn", &opts)?;
    }
    for pointer in models.revisions("churn")? {
        println!("   {pointer}");
    }

    // -------------------------------------------------------------------------
    // 2. Pointers
    // -------------------------------------------------------------------------
    println!("\n2. Resolving pointers...");
    for pointer in ["churn", "churn^", "churn^^", "churn@v1"] {
        println!("   {pointer:10} -> {}", describe(models.get(pointer, &GetOptions::new())?));
    }
    models.put(&ModelBlob::new("sklearn", vec![4]).into(), "churn", &PutOptions::new().tag("v1"))?;
    println!("   churn@v1 after retag -> {}", describe(models.get("churn@v1", &GetOptions::new())?));

    // -------------------------------------------------------------------------
    // 3. Dataset revisions
    // -------------------------------------------------------------------------
    println!("\n3. Dataset revisions...");
    let datasets = registry.datasets();
    let base = Frame::from_json_rows((0..6_i64).map(|i| (i, json!({"customer": i, "score": 0.5}))))?;
    datasets.put(&base.into(), "scores", &PutOptions::new().revisions(true).tag("baseline"))?;
    let update = Frame::from_json_rows((3..6_i64).map(|i| (i, json!({"score": 0.9}))))?;
    datasets.put(&update.into(), "scores", &PutOptions::new())?;
    let removed = Frame::from_json_rows([(0_i64, json!({}))])?;
    datasets.put(&removed.into(), "scores", &PutOptions::new().delete(true))?;

    for change in datasets.revisions("scores")? {
        let frame = datasets
            .get("scores", &GetOptions::new().revision(i64::try_from(change.seq)?))?
            .and_then(Object::into_frame)
            .unwrap_or_default();
        println!("   revision {} ({:?}): {} rows", change.seq, change.tags, frame.len());
    }

    println!("\n=== Done ===");
    Ok(())
}
