//! End-to-end: raw events -> enrichment -> training -> bundle -> scoring

use std::fs;
use std::io::Write;

use logfusion::config::Config;
use logfusion::features;
use logfusion::io::{CsvFile, JsonLinesFile, RecordSink, RecordSource};
use logfusion::ml::storage::{BOOSTER_FILE, ISOLATION_FILE, METADATA_FILE, SCALER_FILE};
use logfusion::ml::{MLPipeline, ModelStore};
use logfusion::{FeatureTable, Value};
use tempfile::TempDir;

/// Routine logins during office hours with an occasional brute-force burst
/// in the middle of the night
fn write_events(path: &std::path::Path) {
    let mut file = fs::File::create(path).unwrap();
    for i in 0..400 {
        let line = if i % 25 == 24 {
            serde_json::json!({
                "@timestamp": format!("2024-03-16T03:{:02}:00Z", i % 60),
                "hostname": "bastion",
                "process": "sshd",
                "message": format!(
                    "Failed password for invalid user admin{} from 203.0.113.{} port {} ssh2 \
                     after repeated authentication failures on /etc/ssh/sshd_config (attempt {})",
                    i, i % 250, 40000 + i, i
                ),
                "embedding": [9.0, 8.5, 9.5],
            })
        } else {
            serde_json::json!({
                "@timestamp": format!("2024-03-{:02}T{:02}:15:00Z", 11 + i % 5, 9 + i % 8),
                "hostname": "bastion",
                "process": "sshd",
                "message": format!("Accepted publickey for deploy from 10.0.0.{} port 22", i % 20),
                "embedding": [1.0, 0.0, 0.5],
            })
        };
        writeln!(file, "{}", line).unwrap();
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.isolation.n_estimators = 60;
    config.boosting.n_estimators = 15;
    config.boosting.min_samples_leaf = 2;
    config
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let v: Vec<f64> = values.collect();
    v.iter().sum::<f64>() / v.len() as f64
}

#[test]
fn test_train_save_load_predict() {
    let temp = TempDir::new().unwrap();
    let events = temp.path().join("events.jsonl");
    let model_dir = temp.path().join("models");
    write_events(&events);

    let raw = JsonLinesFile::new(&events).read().unwrap();
    assert_eq!(raw.len(), 400);
    let mut table = features::enrich_table(&raw);

    let config = config();
    let mut trainer = MLPipeline::new(config.ml()).unwrap();
    trainer.train(&mut table).unwrap();
    assert!(trainer.is_supervised());
    trainer.save(&model_dir).unwrap();

    for file in [ISOLATION_FILE, SCALER_FILE, BOOSTER_FILE, METADATA_FILE] {
        assert!(model_dir.join(file).exists(), "{} not written", file);
    }
    assert!(!ModelStore::new(&model_dir).load().is_empty());

    // score a fresh copy, without the label column training added
    let fresh = features::enrich_table(&raw);
    let mut scorer = MLPipeline::load(config.ml(), &model_dir).unwrap();
    assert!(scorer.is_supervised());
    let scored = scorer.predict_table(&fresh).unwrap();

    let out = temp.path().join("scored.csv");
    CsvFile::new(&out).write(&scored).unwrap();
    let back = CsvFile::new(&out).read().unwrap();
    assert_eq!(back.len(), 400);
    for column in ["iso_score", "lgbm_score", "adwin_flag", "fusion_score", "is_anomaly"] {
        assert!(back.has_column(column), "missing {}", column);
    }

    let fusion: Vec<f64> = scored
        .column("fusion_score")
        .map(|v| v.and_then(Value::as_f64).unwrap())
        .collect();
    let attack = mean((0..400).filter(|i| i % 25 == 24).map(|i| fusion[i]));
    let routine = mean((0..400).filter(|i| i % 25 != 24).map(|i| fusion[i]));
    assert!(attack > routine, "attack {} <= routine {}", attack, routine);
}

#[test]
fn test_unlabeled_training_without_auto_label() {
    let temp = TempDir::new().unwrap();
    let events = temp.path().join("events.jsonl");
    let model_dir = temp.path().join("models");
    write_events(&events);

    let mut config = config();
    config.pipeline.auto_label = false;

    let mut table = features::enrich_table(&JsonLinesFile::new(&events).read().unwrap());
    let mut pipeline = MLPipeline::new(config.ml()).unwrap();
    let metrics = pipeline.train(&mut table).unwrap();
    assert!(metrics.is_skipped());
    pipeline.save(&model_dir).unwrap();

    // no booster on disk, but the feature list survives in the metadata
    assert!(!model_dir.join(BOOSTER_FILE).exists());
    let mut restored = MLPipeline::load(config.ml(), &model_dir).unwrap();
    assert_eq!(restored.feature_columns(), pipeline.feature_columns());

    let batch = restored.predict(&table).unwrap();
    assert!(batch.lgbm_score.iter().all(|&s| s == 0.0));
    assert!(batch.iso_score.iter().all(|s| (0.0..=1.0).contains(s)));
}

#[test]
fn test_scores_only_comparable_within_a_batch() {
    let temp = TempDir::new().unwrap();
    let events = temp.path().join("events.jsonl");
    write_events(&events);
    let table = features::enrich_table(&JsonLinesFile::new(&events).read().unwrap());

    let config = config();
    let mut pipeline = MLPipeline::new(config.ml()).unwrap();
    pipeline.train(&mut table.clone()).unwrap();

    // the same routine row scores differently depending on what it is batched with
    let routine_only: FeatureTable = table.select_rows(&[0, 1, 2, 3]);
    let mixed: FeatureTable = table.select_rows(&[0, 1, 2, 24]);
    let a = pipeline.predict(&routine_only).unwrap();
    let b = pipeline.predict(&mixed).unwrap();
    assert!(b.iso_score[3] > 0.99);
    assert_ne!(a.iso_score[0].to_bits(), b.iso_score[0].to_bits());
}
