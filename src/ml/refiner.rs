//! Supervised refinement
//!
//! Trains the boosted-tree classifier on (pseudo-)labels with negative
//! undersampling and time-ordered cross-validation, and exposes the deployed
//! model through one scorer contract whether it was just trained or reloaded
//! from a bundle.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::frame::FeatureMatrix;
use super::models::{BoosterDump, BoostingConfig, GradientBoostClassifier};
use super::validation::{self, TimeSeriesSplit, ValidationConfig};
use crate::error::{FusionError, Result};

/// Anything that maps a feature matrix to per-row anomaly probabilities
pub trait ProbabilityScorer {
    /// Ordered columns the model was trained on
    fn feature_names(&self) -> &[String];

    /// Probability per row; fails on a column mismatch
    fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>>;
}

impl ProbabilityScorer for GradientBoostClassifier {
    fn feature_names(&self) -> &[String] {
        GradientBoostClassifier::feature_names(self)
    }

    fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        GradientBoostClassifier::predict_proba(self, data)
    }
}

impl ProbabilityScorer for BoosterDump {
    fn feature_names(&self) -> &[String] {
        BoosterDump::feature_names(self)
    }

    fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        BoosterDump::predict_proba(self, data)
    }
}

/// The deployed boosted-tree model
#[derive(Debug, Clone, PartialEq)]
pub enum BoostedScorer {
    /// Trained in this process
    Trained(GradientBoostClassifier),
    /// Restored from a model bundle
    Restored(BoosterDump),
}

impl BoostedScorer {
    /// Portable form for persistence
    pub fn dump(&self) -> BoosterDump {
        match self {
            BoostedScorer::Trained(model) => model.dump(),
            BoostedScorer::Restored(dump) => dump.clone(),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            BoostedScorer::Trained(_) => "trained",
            BoostedScorer::Restored(_) => "restored",
        }
    }
}

impl ProbabilityScorer for BoostedScorer {
    fn feature_names(&self) -> &[String] {
        match self {
            BoostedScorer::Trained(model) => ProbabilityScorer::feature_names(model),
            BoostedScorer::Restored(dump) => ProbabilityScorer::feature_names(dump),
        }
    }

    fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        match self {
            BoostedScorer::Trained(model) => ProbabilityScorer::predict_proba(model, data),
            BoostedScorer::Restored(dump) => ProbabilityScorer::predict_proba(dump, data),
        }
    }
}

/// Cross-validation summary; both fields are null when the supervised stage
/// was skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub cv_auc_mean: Option<f64>,
    pub cv_pr_mean: Option<f64>,
}

impl TrainingMetrics {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self) -> bool {
        self.cv_auc_mean.is_none() && self.cv_pr_mean.is_none()
    }
}

/// Per-fold diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub auc: Option<f64>,
    pub average_precision: Option<f64>,
}

/// Boosted-tree refiner
#[derive(Debug, Clone)]
pub struct SupervisedRefiner {
    boosting: BoostingConfig,
    validation: ValidationConfig,
    seed: u64,
    scorer: Option<BoostedScorer>,
    folds: Vec<FoldMetrics>,
}

impl SupervisedRefiner {
    pub fn new(boosting: BoostingConfig, validation: ValidationConfig, seed: u64) -> Self {
        Self {
            boosting,
            validation,
            seed,
            scorer: None,
            folds: Vec::new(),
        }
    }

    /// Install a previously trained or restored model
    pub fn with_scorer(mut self, scorer: BoostedScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn is_trained(&self) -> bool {
        self.scorer.is_some()
    }

    pub fn scorer(&self) -> Option<&BoostedScorer> {
        self.scorer.as_ref()
    }

    /// Training columns of the deployed model
    pub fn feature_names(&self) -> Option<&[String]> {
        self.scorer.as_ref().map(|s| s.feature_names())
    }

    /// Diagnostics of the last cross-validation run
    pub fn fold_metrics(&self) -> &[FoldMetrics] {
        &self.folds
    }

    pub fn clear(&mut self) {
        self.scorer = None;
        self.folds.clear();
    }

    /// Row order of the balanced training set: every positive plus at most
    /// `negative_ratio` negatives per positive, shuffled with the fixed seed
    pub fn balance(&self, labels: &[f64]) -> Vec<usize> {
        let (positives, negatives): (Vec<usize>, Vec<usize>) =
            (0..labels.len()).partition(|&i| labels[i] >= 0.5);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let keep = negatives
            .len()
            .min(positives.len().saturating_mul(self.validation.negative_ratio));

        let mut order: Vec<usize> = index::sample(&mut rng, negatives.len(), keep)
            .into_iter()
            .map(|i| negatives[i])
            .collect();
        order.extend_from_slice(&positives);
        order.shuffle(&mut rng);
        order
    }

    /// Train on a scaled matrix and binary labels. Skips (returning null
    /// metrics and leaving no model) when there is no positive example.
    pub fn train(&mut self, data: &FeatureMatrix, labels: &[f64]) -> Result<TrainingMetrics> {
        if data.n_rows() != labels.len() {
            return Err(FusionError::InvalidDimension {
                expected: data.n_rows(),
                got: labels.len(),
            });
        }

        self.clear();

        let positives = labels.iter().filter(|&&l| l >= 0.5).count();
        if positives == 0 {
            warn!("No anomalies among labels, supervised refinement skipped");
            return Ok(TrainingMetrics::skipped());
        }

        let order = self.balance(labels);
        let x = data.select_rows(&order);
        let y: Vec<f64> = order.iter().map(|&i| labels[i]).collect();
        info!(
            "Balanced set: {} rows ({} positive)",
            y.len(),
            positives
        );

        let metrics = self.cross_validate(&x, &y)?;

        info!("Training final boosted-tree model on {} rows", y.len());
        let mut model = GradientBoostClassifier::new(self.boosting.clone());
        model.fit(&x, &y)?;
        self.scorer = Some(BoostedScorer::Trained(model));

        Ok(metrics)
    }

    /// Time-ordered k-fold CV on the balanced set. Metrics are diagnostic
    /// only and do not influence the deployed model.
    fn cross_validate(&mut self, x: &FeatureMatrix, y: &[f64]) -> Result<TrainingMetrics> {
        let splitter = TimeSeriesSplit::new(self.validation.n_splits);
        let folds = splitter.split(y.len());
        if folds.is_empty() {
            warn!(
                "Only {} balanced rows, too few for {}-fold validation",
                y.len(),
                splitter.n_splits()
            );
            return Ok(TrainingMetrics::default());
        }

        info!("Running {}-fold time-ordered CV", folds.len());
        let mut aucs = Vec::with_capacity(folds.len());
        let mut prs = Vec::with_capacity(folds.len());

        for (k, fold) in folds.iter().enumerate() {
            let train_idx: Vec<usize> = fold.train.clone().collect();
            let val_idx: Vec<usize> = fold.validation.clone().collect();

            let mut model = GradientBoostClassifier::new(self.boosting.clone());
            model.fit(&x.select_rows(&train_idx), &y[fold.train.clone()])?;

            let y_val = &y[fold.validation.clone()];
            let y_pred = model.predict_proba(&x.select_rows(&val_idx))?;

            let auc = validation::roc_auc(y_val, &y_pred);
            let pr = validation::average_precision(y_val, &y_pred);
            match (auc, pr) {
                (Some(auc), Some(pr)) => {
                    debug!("Fold {}: AUC {:.4}, PR {:.4}", k, auc, pr);
                    aucs.push(auc);
                    prs.push(pr);
                }
                _ => warn!("Fold {} validation slice holds a single class, not scored", k),
            }

            self.folds.push(FoldMetrics {
                fold: k,
                train_rows: train_idx.len(),
                validation_rows: val_idx.len(),
                auc,
                average_precision: pr,
            });
        }

        let metrics = TrainingMetrics {
            cv_auc_mean: validation::mean(&aucs),
            cv_pr_mean: validation::mean(&prs),
        };
        if let (Some(auc), Some(pr)) = (metrics.cv_auc_mean, metrics.cv_pr_mean) {
            info!("CV-AUC = {:.4}", auc);
            info!("CV-PR  = {:.4}", pr);
        }
        Ok(metrics)
    }

    /// Raw probability per row from the deployed model
    pub fn predict(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        let scorer = self
            .scorer
            .as_ref()
            .ok_or(FusionError::NotTrained("supervised refiner"))?;
        scorer.predict_proba(data)
    }
}
