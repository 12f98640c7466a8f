//! Anomaly scoring engine
//!
//! Fuses an unsupervised isolation forest, a boosted-tree classifier refined
//! on (pseudo-)labels and a streaming drift detector into one per-row
//! anomaly score.
//!
//! # Example
//! ```ignore
//! use logfusion::ml::{MLConfig, MLPipeline};
//!
//! let mut pipeline = MLPipeline::new(MLConfig::default())?;
//! let metrics = pipeline.train(&mut training_table)?;
//! pipeline.save("models")?;
//!
//! let scored = pipeline.predict_table(&new_table)?;
//! ```

pub mod drift;
pub mod frame;
pub mod fusion;
pub mod labeling;
pub mod models;
pub mod normalization;
pub mod refiner;
pub mod scaler;
pub mod storage;
pub mod validation;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};
use crate::table::{FeatureTable, Value};

pub use drift::{DriftConfig, DriftMonitor};
pub use frame::{FeatureFrame, FeatureMatrix, EXCLUDED_COLUMNS};
pub use fusion::{FusedScore, FusionEngine, FusionWeights};
pub use labeling::{AutoLabeler, LABEL_COLUMN};
pub use models::{BoosterDump, BoostingConfig, GradientBoostClassifier, IsolationConfig, IsolationForest};
pub use refiner::{BoostedScorer, ProbabilityScorer, SupervisedRefiner, TrainingMetrics};
pub use scaler::Scaler;
pub use storage::{Artifact, BoosterMeta, ModelBundle, ModelStore, TrainingMetadata};
pub use validation::{TimeSeriesSplit, ValidationConfig};

/// Output column names added by [`MLPipeline::predict_table`]
pub const ISO_SCORE_COLUMN: &str = "iso_score";
pub const LGBM_SCORE_COLUMN: &str = "lgbm_score";
pub const ADWIN_FLAG_COLUMN: &str = "adwin_flag";
pub const FUSION_SCORE_COLUMN: &str = "fusion_score";
pub const IS_ANOMALY_COLUMN: &str = "is_anomaly";

/// Training behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Derive labels from isolation scores when the table has none
    pub auto_label: bool,
    /// Normalized isolation score at or above which a row is labeled anomalous
    pub label_threshold: f64,
    /// Seed for every random choice in training
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_label: true,
            label_threshold: 0.8,
            seed: 42,
        }
    }
}

/// Everything a pipeline instance is tuned by
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MLConfig {
    pub pipeline: PipelineConfig,
    pub fusion: FusionWeights,
    pub isolation: IsolationConfig,
    pub boosting: BoostingConfig,
    pub validation: ValidationConfig,
    pub drift: DriftConfig,
}

/// Per-row signals of one scoring call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredBatch {
    pub iso_score: Vec<f64>,
    pub lgbm_score: Vec<f64>,
    pub adwin_flag: Vec<u8>,
    pub fusion_score: Vec<f64>,
    pub is_anomaly: Vec<bool>,
}

impl ScoredBatch {
    pub fn len(&self) -> usize {
        self.iso_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iso_score.is_empty()
    }

    pub fn anomalies(&self) -> usize {
        self.is_anomaly.iter().filter(|&&a| a).count()
    }

    pub fn drift_detections(&self) -> usize {
        self.adwin_flag.iter().filter(|&&f| f == 1).count()
    }

    /// Copy of `table` with the five score columns appended
    pub fn apply(&self, table: &FeatureTable) -> FeatureTable {
        let mut out = table.clone();
        out.set_column(ISO_SCORE_COLUMN, self.iso_score.iter().copied());
        out.set_column(LGBM_SCORE_COLUMN, self.lgbm_score.iter().copied());
        // whole-number values serialize as integers, so flags read 0/1
        out.set_column(ADWIN_FLAG_COLUMN, self.adwin_flag.iter().map(|&f| f64::from(f)));
        out.set_column(FUSION_SCORE_COLUMN, self.fusion_score.iter().copied());
        out.set_column(
            IS_ANOMALY_COLUMN,
            self.is_anomaly.iter().map(|&a| if a { 1.0 } else { 0.0 }),
        );
        out
    }
}

/// Training and scoring pipeline. Each instance owns its models and a drift
/// monitor that starts cold and is never rewound.
#[derive(Debug, Clone)]
pub struct MLPipeline {
    config: MLConfig,
    /// `None` scores with identity scaling
    scaler: Option<Scaler>,
    forest: IsolationForest,
    refiner: SupervisedRefiner,
    drift: DriftMonitor,
    fusion: FusionEngine,
    labeler: AutoLabeler,
    feature_columns: Option<Vec<String>>,
    metadata: Option<TrainingMetadata>,
}

impl MLPipeline {
    pub fn new(config: MLConfig) -> Result<Self> {
        let fusion = FusionEngine::new(config.fusion)?;
        config.drift.validate()?;
        let seed = config.pipeline.seed;
        Ok(Self {
            scaler: None,
            forest: IsolationForest::new(&config.isolation, seed),
            refiner: SupervisedRefiner::new(config.boosting.clone(), config.validation.clone(), seed),
            drift: DriftMonitor::new(config.drift.clone()),
            fusion,
            labeler: AutoLabeler::new(config.pipeline.label_threshold),
            feature_columns: None,
            metadata: None,
            config,
        })
    }

    pub fn config(&self) -> &MLConfig {
        &self.config
    }

    /// Whether the isolation forest can score
    pub fn is_trained(&self) -> bool {
        self.forest.is_trained()
    }

    /// Whether a boosted-tree model contributes to the fused score
    pub fn is_supervised(&self) -> bool {
        self.refiner.is_trained()
    }

    pub fn feature_columns(&self) -> Option<&[String]> {
        self.feature_columns.as_deref()
    }

    pub fn metadata(&self) -> Option<&TrainingMetadata> {
        self.metadata.as_ref()
    }

    pub fn refiner(&self) -> &SupervisedRefiner {
        &self.refiner
    }

    pub fn drift_monitor(&self) -> &DriftMonitor {
        &self.drift
    }

    /// Train on `table`. When the table has no label column and
    /// auto-labeling is on, a `label` column is written into it.
    pub fn train(&mut self, table: &mut FeatureTable) -> Result<TrainingMetrics> {
        if table.is_empty() {
            return Err(FusionError::EmptyTable);
        }
        info!("Starting training on {} rows", table.len());

        let columns = FeatureFrame::infer_columns(table);
        debug!("Feature columns: {:?}", columns);
        let matrix = FeatureFrame::prepare(table, Some(&columns));

        let mut scaler = Scaler::new();
        let scaled = scaler.fit_transform(&matrix);

        info!("Training isolation forest ({} features)", columns.len());
        self.forest = IsolationForest::new(&self.config.isolation, self.config.pipeline.seed);
        self.forest.fit(&scaled)?;
        self.scaler = Some(scaler);
        self.feature_columns = Some(columns.clone());
        self.refiner.clear();

        let labels = if table.has_column(LABEL_COLUMN) {
            Some(Self::read_labels(table))
        } else if self.config.pipeline.auto_label {
            let iso = self.forest.score(&scaled)?;
            self.labeler.label(table, &iso);
            Some(self.labeler.labels(&iso))
        } else {
            None
        };

        let (metrics, positives) = match labels {
            Some(labels) => {
                let positives = labels.iter().filter(|&&l| l == 1.0).count();
                (self.refiner.train(&scaled, &labels)?, positives)
            }
            None => {
                info!("No labels available, supervised refinement skipped");
                (TrainingMetrics::skipped(), 0)
            }
        };

        self.metadata = Some(TrainingMetadata::new(metrics, columns, table.len(), positives));
        info!(
            "Training complete (supervised: {})",
            if self.refiner.is_trained() { "yes" } else { "no" }
        );
        Ok(metrics)
    }

    /// Supplied labels, anything but a value >= 0.5 counting as normal
    fn read_labels(table: &FeatureTable) -> Vec<f64> {
        table
            .column(LABEL_COLUMN)
            .map(|v| match v.and_then(Value::as_f64) {
                Some(l) if l >= 0.5 => 1.0,
                _ => 0.0,
            })
            .collect()
    }

    /// Score every row. Feature columns absent from `table` are imputed as
    /// zero. Isolation and supervised scores are min-max normalized over this
    /// batch, so they are not comparable across calls.
    pub fn predict(&mut self, table: &FeatureTable) -> Result<ScoredBatch> {
        if table.is_empty() {
            return Err(FusionError::EmptyTable);
        }
        if !self.forest.is_trained() {
            return Err(FusionError::NotTrained("isolation forest"));
        }
        info!("Scoring {} rows", table.len());

        let matrix = FeatureFrame::prepare(table, self.feature_columns.as_deref());
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(&matrix)?,
            None => matrix,
        };

        let iso_score = self.forest.score(&scaled)?;
        let lgbm_score = if self.refiner.is_trained() {
            normalization::min_max(&self.refiner.predict(&scaled)?)
        } else {
            vec![0.0; scaled.n_rows()]
        };
        let adwin_flag = self.drift.update_many(&iso_score);

        let fused = self.fusion.fuse_batch(&iso_score, &lgbm_score, &adwin_flag)?;
        let batch = ScoredBatch {
            iso_score,
            lgbm_score,
            adwin_flag,
            fusion_score: fused.iter().map(|f| f.score).collect(),
            is_anomaly: fused.iter().map(|f| f.is_anomaly).collect(),
        };

        info!(
            "Scoring complete: {} anomalies, {} drift detections",
            batch.anomalies(),
            batch.drift_detections()
        );
        Ok(batch)
    }

    /// [`predict`](Self::predict) and append the score columns to a copy of
    /// the table
    pub fn predict_table(&mut self, table: &FeatureTable) -> Result<FeatureTable> {
        let batch = self.predict(table)?;
        Ok(batch.apply(table))
    }

    /// Snapshot of the trained state as a bundle
    pub fn to_bundle(&self) -> ModelBundle {
        let booster = self.refiner.scorer().map(BoostedScorer::dump);
        let booster_meta = booster.as_ref().map(|dump| BoosterMeta {
            feature_columns: dump.feature_names().to_vec(),
        });

        ModelBundle {
            isolation: Some(self.forest.clone()).filter(IsolationForest::is_trained).into(),
            scaler: self.scaler.clone().filter(Scaler::is_fitted).into(),
            booster: booster.into(),
            booster_meta: booster_meta.into(),
            metadata: self.metadata.clone().into(),
        }
    }

    /// Rebuild a pipeline from whatever a bundle holds
    pub fn from_bundle(config: MLConfig, bundle: ModelBundle) -> Result<Self> {
        let mut pipeline = Self::new(config)?;
        let feature_columns = bundle.feature_columns();

        if let Some(forest) = bundle.isolation.into_option() {
            pipeline.forest = forest;
        } else {
            warn!("Bundle has no usable isolation forest; pipeline cannot score");
        }

        pipeline.scaler = bundle.scaler.into_option();
        if pipeline.scaler.is_none() {
            info!("Bundle has no scaler, scoring with identity scaling");
        }

        if let Some(dump) = bundle.booster.into_option() {
            match &feature_columns {
                Some(columns) if columns.as_slice() != dump.feature_names() => {
                    warn!("Booster columns disagree with bundle metadata, ignoring booster");
                }
                _ => pipeline.refiner = pipeline.refiner.with_scorer(BoostedScorer::Restored(dump)),
            }
        }

        pipeline.feature_columns = feature_columns;
        pipeline.metadata = bundle.metadata.into_option();
        Ok(pipeline)
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        ModelStore::new(dir).save(&self.to_bundle())
    }

    /// Load a pipeline; missing or corrupt artifacts degrade it instead of
    /// failing
    pub fn load<P: AsRef<Path>>(config: MLConfig, dir: P) -> Result<Self> {
        Self::from_bundle(config, ModelStore::new(dir).load())
    }
}
