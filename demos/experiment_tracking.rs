//! Experiment Tracking Example
//!
//! Logs a small hyperparameter sweep with a profiling tracker, links the best
//! model to the experiment and prints summary statistics.
//!
//! Run with: cargo run --example experiment_tracking

use std::time::Duration;

use mlvault::config::RegistryConfig;
use mlvault::experiment::{DataQuery, EventKind, Grouping};
use mlvault::object::{ModelBlob, Object, TrackerProvider};
use mlvault::store::{ObjectStore, PutOptions};
use mlvault::Registry;
use rand::Rng;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mlvault::logging::init_tracing();
    println!("=== mlvault Experiment Tracking ===\n");

    let mut config = RegistryConfig::default();
    config.tracking.profile_interval_ms = 50;
    config.tracking.profile_metrics = vec!["cpu".into(), "memory".into()];
    let registry = Registry::builder().config(config).build()?;
    let exp = registry.experiment("sweep", TrackerProvider::Profiling)?;
    let mut rng = rand::thread_rng();

    // -------------------------------------------------------------------------
    // 1. One run per learning rate
    // -------------------------------------------------------------------------
    println!("1. Running sweep...");
    let mut best: Option<(f64, Object)> = None;
    for lr in [0.1, 0.01, 0.001] {
        let run = exp.use_run()?;
        run.log_param("lr", lr)?;
        run.log_system()?;
        let mut loss = 1.0;
        for epoch in 0..20 {
            run.set_step(epoch)?;
            loss *= 1.0 - lr * rng.gen_range(1.0..5.0);
            run.log_metric("loss", loss)?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let model: Object = ModelBlob::new("demo", vec![0; 16]).with_param("lr", lr).into();
        run.log_artifact("model", &model)?;
        println!("   run {} lr={lr} final loss={loss:.4}", run.run());
        if best.as_ref().map_or(true, |(l, _)| loss < *l) {
            best = Some((loss, model));
        }
        run.finish()?;
    }

    // -------------------------------------------------------------------------
    // 2. Promote the best model and link it to the experiment
    // -------------------------------------------------------------------------
    println!("\n2. Promoting best model...");
    if let Some((loss, model)) = best {
        registry
            .models()
            .put(&model, "sweep-best", &PutOptions::new().tag("prod"))?;
        exp.track("sweep-best", Some("training"))?;
        println!("   sweep-best@prod loss={loss:.4}");
    }

    // -------------------------------------------------------------------------
    // 3. Read back and summarize
    // -------------------------------------------------------------------------
    println!("\n3. Statistics...");
    let all = DataQuery::new().all_runs();
    let profile = exp.data(&all.clone().event(EventKind::Profile))?;
    println!("   {} profiler samples", profile.len());
    for row in exp.stats().metrics(&all, Grouping::ByRun)? {
        println!(
            "   run {:?} {}: mean={:.4} min={:.4} max={:.4}",
            row.run, row.key, row.describe.mean, row.describe.min, row.describe.max
        );
    }
    if let Some(latency) = exp.stats().latency(&all)? {
        println!("   run latency mean={:.3}s", latency.describe.mean);
    }
    let restored = exp.restore_artifacts("model", -1)?;
    println!("   restored {} artifact(s) from the latest run", restored.len());

    println!("\n=== Done ===");
    Ok(())
}
