//! Gradient Boosting binary classifier
//!
//! Implements a pure Rust gradient boosted tree classifier trained on
//! binary cross-entropy, used to refine anomaly scores once labels exist.
//!
//! # Algorithm
//! 1. Initialize every margin with the log-odds of the positive rate
//! 2. For each boosting round:
//!    - Compute gradient and hessian of the logistic loss
//!    - Grow a depth-limited regression tree on binned features,
//!      choosing splits by second-order gain
//!    - Update margins with the shrunken leaf values
//!
//! # Usage
//! ```ignore
//! use logfusion::ml::models::{BoostingConfig, GradientBoostClassifier};
//!
//! let mut model = GradientBoostClassifier::new(BoostingConfig::default());
//! model.fit(&matrix, &labels)?;
//! let probabilities = model.predict_proba(&matrix)?;
//! ```

mod dump;

pub use dump::{BoosterDump, DumpNode, DumpTree};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BoostingConfig;
use crate::error::{FusionError, Result};
use crate::ml::frame::FeatureMatrix;

/// Probabilities are clipped away from 0/1 before taking log-odds
const PROB_CLIP: f64 = 1e-15;

/// Splits must improve the objective by more than this
const MIN_GAIN: f64 = 1e-12;

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Reject a matrix whose columns differ from the training columns, in
/// content or in order
pub(crate) fn check_columns(expected: &[String], data: &FeatureMatrix) -> Result<()> {
    if expected != data.columns() {
        return Err(FusionError::ColumnMismatch {
            expected: expected.to_vec(),
            got: data.columns().to_vec(),
        });
    }
    Ok(())
}

/// Node of a regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Split {
        feature_idx: usize,
        /// Samples with value <= threshold go left
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f64,
    },
}

/// A single boosted regression tree (leaf values already shrunk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature_idx).copied().unwrap_or(0.0);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Per-feature candidate thresholds and the bin each training row falls in
struct BinnedFeatures {
    thresholds: Vec<Vec<f64>>,
    /// `bins[row * n_features + feature]`
    bins: Vec<u16>,
    n_features: usize,
}

impl BinnedFeatures {
    fn new(data: &FeatureMatrix, max_bins: usize) -> Self {
        let n_features = data.n_cols();
        let max_bins = max_bins.clamp(2, u16::MAX as usize);

        let thresholds: Vec<Vec<f64>> = (0..n_features)
            .map(|f| {
                let mut values: Vec<f64> = data.column_values(f).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                // The largest value never separates anything
                values.pop();
                if values.len() >= max_bins {
                    let n = values.len();
                    let mut picked: Vec<f64> = (1..max_bins)
                        .map(|k| values[(k * n / max_bins).min(n - 1)])
                        .collect();
                    picked.dedup();
                    picked
                } else {
                    values
                }
            })
            .collect();

        let mut bins = Vec::with_capacity(data.n_rows() * n_features);
        for row in data.rows() {
            for (f, &v) in row.iter().enumerate() {
                // first threshold >= v, or one past the end
                let b = thresholds[f].partition_point(|&t| t < v);
                bins.push(b as u16);
            }
        }

        Self {
            thresholds,
            bins,
            n_features,
        }
    }

    #[inline]
    fn bin(&self, row: usize, feature: usize) -> usize {
        self.bins[row * self.n_features + feature] as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GradStats {
    grad: f64,
    hess: f64,
    count: usize,
}

impl GradStats {
    fn add(&mut self, g: f64, h: f64) {
        self.grad += g;
        self.hess += h;
        self.count += 1;
    }

    fn sub(self, other: GradStats) -> GradStats {
        GradStats {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

struct CandidateSplit {
    feature_idx: usize,
    bin: usize,
    gain: f64,
}

/// Gradient boosted tree binary classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostClassifier {
    config: BoostingConfig,
    trees: Vec<RegressionTree>,
    /// Initial margin (log-odds of the positive rate)
    base_score: f64,
    /// Ordered training columns
    feature_names: Vec<String>,
    /// Accumulated split gain per feature
    feature_importance: Vec<f64>,
    trained: bool,
}

impl GradientBoostClassifier {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            feature_names: Vec::new(),
            feature_importance: Vec::new(),
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn config(&self) -> &BoostingConfig {
        &self.config
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Train on labeled data (1.0 = anomaly, 0.0 = normal)
    pub fn fit(&mut self, data: &FeatureMatrix, labels: &[f64]) -> Result<()> {
        if data.is_empty() {
            return Err(FusionError::EmptyTable);
        }
        if data.n_rows() != labels.len() {
            return Err(FusionError::InvalidDimension {
                expected: data.n_rows(),
                got: labels.len(),
            });
        }

        let n = data.n_rows();
        let positive_rate = labels.iter().sum::<f64>() / n as f64;
        let p = positive_rate.clamp(PROB_CLIP, 1.0 - PROB_CLIP);

        self.base_score = (p / (1.0 - p)).ln();
        self.trees.clear();
        self.feature_names = data.columns().to_vec();
        self.feature_importance = vec![0.0; data.n_cols()];

        let binned = BinnedFeatures::new(data, self.config.max_bins);
        let mut margins = vec![self.base_score; n];
        let rows: Vec<usize> = (0..n).collect();

        for _ in 0..self.config.n_estimators {
            let (grads, hess): (Vec<f64>, Vec<f64>) = margins
                .iter()
                .zip(labels)
                .map(|(&m, &y)| {
                    let p = sigmoid(m);
                    (p - y, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            let root = self.build_node(&binned, &grads, &hess, rows.clone(), 0);
            let tree = RegressionTree { root };

            for (i, m) in margins.iter_mut().enumerate() {
                *m += tree.predict(data.row(i));
            }
            self.trees.push(tree);
        }

        self.trained = true;
        debug!(
            "Boosted {} trees on {} rows x {} features (base score {:.4})",
            self.trees.len(),
            n,
            data.n_cols(),
            self.base_score
        );
        Ok(())
    }

    fn leaf_value(&self, stats: GradStats) -> f64 {
        -stats.grad / (stats.hess + self.config.l2_regularization) * self.config.learning_rate
    }

    fn score_term(&self, stats: GradStats) -> f64 {
        stats.grad * stats.grad / (stats.hess + self.config.l2_regularization)
    }

    fn build_node(
        &mut self,
        binned: &BinnedFeatures,
        grads: &[f64],
        hess: &[f64],
        rows: Vec<usize>,
        depth: usize,
    ) -> TreeNode {
        let mut total = GradStats::default();
        for &r in &rows {
            total.add(grads[r], hess[r]);
        }

        let leaf = TreeNode::Leaf {
            value: self.leaf_value(total),
        };

        if depth >= self.config.max_depth || rows.len() < 2 * self.config.min_samples_leaf.max(1) {
            return leaf;
        }

        let Some(best) = self.find_split(binned, grads, hess, &rows, total) else {
            return leaf;
        };

        self.feature_importance[best.feature_idx] += best.gain;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| binned.bin(r, best.feature_idx) <= best.bin);

        let left = self.build_node(binned, grads, hess, left_rows, depth + 1);
        let right = self.build_node(binned, grads, hess, right_rows, depth + 1);

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: binned.thresholds[best.feature_idx][best.bin],
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Best histogram split over all features, if any improves the loss
    fn find_split(
        &self,
        binned: &BinnedFeatures,
        grads: &[f64],
        hess: &[f64],
        rows: &[usize],
        total: GradStats,
    ) -> Option<CandidateSplit> {
        let parent_score = self.score_term(total);
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut best: Option<CandidateSplit> = None;

        for (feature_idx, thresholds) in binned.thresholds.iter().enumerate() {
            if thresholds.is_empty() {
                continue;
            }

            let mut histogram = vec![GradStats::default(); thresholds.len() + 1];
            for &r in rows {
                histogram[binned.bin(r, feature_idx)].add(grads[r], hess[r]);
            }

            let mut left = GradStats::default();
            for (bin, stats) in histogram.iter().take(thresholds.len()).enumerate() {
                left.grad += stats.grad;
                left.hess += stats.hess;
                left.count += stats.count;

                let right = total.sub(left);
                if left.count < min_leaf || right.count < min_leaf {
                    continue;
                }
                if left.hess < self.config.min_child_weight
                    || right.hess < self.config.min_child_weight
                {
                    continue;
                }

                let gain = self.score_term(left) + self.score_term(right) - parent_score;
                let improves = best.as_ref().map_or(true, |b| gain > b.gain);
                if gain > MIN_GAIN && improves {
                    best = Some(CandidateSplit {
                        feature_idx,
                        bin,
                        gain,
                    });
                }
            }
        }

        best
    }

    /// Raw margin (log-odds) for one row
    fn predict_margin(&self, row: &[f64]) -> f64 {
        let mut margin = self.base_score;
        for tree in &self.trees {
            margin += tree.predict(row);
        }
        margin
    }

    /// Anomaly probability per row; columns must match training columns
    pub fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        if !self.trained {
            return Err(FusionError::NotTrained("gradient boost classifier"));
        }
        check_columns(&self.feature_names, data)?;
        Ok(data
            .rows()
            .map(|row| sigmoid(self.predict_margin(row)))
            .collect())
    }

    /// Feature importance (accumulated split gain) by column name
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.feature_importance.iter().copied())
            .collect()
    }

    /// Get top N important features
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let mut indexed = self.feature_importance();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(n);
        indexed
    }

    /// Flatten into the portable dump format
    pub fn dump(&self) -> BoosterDump {
        BoosterDump::from_parts(
            self.base_score,
            self.feature_names.clone(),
            self.trees.iter().map(|t| DumpTree::flatten(&t.root)).collect(),
        )
    }
}

impl Default for GradientBoostClassifier {
    fn default() -> Self {
        Self::new(BoostingConfig::default())
    }
}
