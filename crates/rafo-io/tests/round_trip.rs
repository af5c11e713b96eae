//! End-to-end: CSV -> pipeline with disk cache -> JSON -> deserialize.

use std::fmt::Write as _;
use std::fs;
use std::time::Duration;

use rafo_ged::{CacheKey, GedConfig, MatrixCache, TimeoutPolicy};
use rafo_io::{DatasetReader, DiskCache, ExperimentName, ResultWriter};
use rafo_pipeline::{ForestParams, ModelOrchestrator, PipelineConfig};
use tempfile::TempDir;

/// Three well separated classes over two features, 60 rows.
fn write_dataset(dir: &TempDir) -> std::path::PathBuf {
    let mut csv = String::from("width,height,kind\n");
    for i in 0..60 {
        let class = i % 3;
        let jitter = (i / 3) as f64 * 0.01;
        let name = ["a", "b", "c"][class];
        writeln!(csv, "{},{},{}", class as f64 * 3.0 + jitter, 1.0 - jitter, name).unwrap();
    }
    let path = dir.path().join("toy.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_dataset("toy")
        .with_forest(ForestParams::new().with_n_trees(6).with_max_depth(2))
        .with_ged(
            GedConfig::new()
                .with_timeout(Duration::from_secs(2))
                .with_timeout_policy(TimeoutPolicy::BestSoFar),
        )
}

#[test]
fn run_writes_artifacts_and_reuses_disk_cache() {
    let dir = TempDir::new().unwrap();
    let dataset = DatasetReader::new(&write_dataset(&dir)).read().unwrap();
    assert_eq!(dataset.n_samples(), 60);
    assert_eq!(dataset.class_names(), &["a", "b", "c"]);

    let mut cache = DiskCache::new(&dir.path().join("cache"));
    let first = ModelOrchestrator::train(
        dataset.features(),
        dataset.labels(),
        dataset.feature_names(),
        config(),
        &mut cache,
    )
    .unwrap();
    assert!(cache.path(&CacheKey::new("toy", 6)).unwrap().exists());
    assert!(cache.get(&CacheKey::new("toy", 6)).unwrap().is_some());

    let experiment = ExperimentName::new("toy_run").unwrap();
    let writer = ResultWriter::new(&dir.path().join("out"), experiment).unwrap();
    let trees_path = writer.write_run(first.result()).unwrap();
    let distance_path = writer.write_distance(first.result().matrix()).unwrap();
    let dot_path = writer.write_dot(0, &first.result().graphs()[0]).unwrap();

    let trees: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trees_path).unwrap()).unwrap();
    assert_eq!(trees["experiment"], "toy_run");
    assert_eq!(trees["n_trees"], 6);
    assert!(trees["distance_matrix_seconds"].is_number());
    assert_eq!(trees["matrix_from_cache"], false);
    let entries = trees["trees"].as_array().unwrap();
    assert_eq!(entries.len(), 6);
    for entry in entries {
        assert!(entry["n_leaves"].as_u64().unwrap() >= 1);
        assert!(entry["depth"].as_u64().unwrap() <= 2);
        assert!(entry["importances"].as_object().unwrap().contains_key("width"));
        assert!(entry["accuracy"].as_f64().unwrap() > 0.0);
    }

    let distance: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&distance_path).unwrap()).unwrap();
    assert_eq!(distance["rows"].as_array().unwrap().len(), 6);
    assert!(fs::read_to_string(&dot_path).unwrap().starts_with("digraph Tree {"));

    // Same key, so the second run never computes a distance.
    let second = ModelOrchestrator::train(
        dataset.features(),
        dataset.labels(),
        dataset.feature_names(),
        config(),
        &mut cache,
    )
    .unwrap();
    assert!(second.result().matrix_from_cache());
    assert_eq!(second.result().matrix(), first.result().matrix());
}
