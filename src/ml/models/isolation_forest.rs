//! Seeded isolation forest
//!
//! Outliers take fewer random splits to isolate, so their mean path length
//! across the trees is short. `score` turns that into a per-batch [0, 1]
//! value where 1 is the most isolated row of the batch.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::IsolationConfig;
use crate::error::{FusionError, Result};
use crate::ml::frame::FeatureMatrix;
use crate::ml::normalization;

/// Decision offset for automatic contamination
const AUTO_OFFSET: f64 = -0.5;

/// Isolation Forest model for anomaly detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Individual isolation trees
    trees: Vec<IsolationTree>,
    /// Number of trees
    num_trees: usize,
    /// Requested sample size for each tree
    max_samples: usize,
    /// Sample size actually drawn at fit time
    sample_size: usize,
    /// Average path length normalization factor, c(sample_size)
    avg_path_length: f64,
    /// Subtracted from the raw score to form the decision function
    offset: f64,
    /// Width of the training matrix
    n_features: usize,
    /// Training column names, in matrix order
    feature_names: Vec<String>,
    seed: u64,
    trained: bool,
}

impl IsolationForest {
    pub fn new(config: &IsolationConfig, seed: u64) -> Self {
        Self {
            trees: Vec::new(),
            num_trees: config.n_estimators,
            max_samples: config.max_samples,
            sample_size: 0,
            avg_path_length: 0.0,
            offset: AUTO_OFFSET,
            n_features: 0,
            feature_names: Vec::new(),
            seed,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Calculate average path length for normalization (c(n) function)
    pub(crate) fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + 0.577_215_664_901_532_9) - 2.0 * (n - 1.0) / n
            }
        }
    }

    /// Train the ensemble. Trees are built in parallel, each from its own
    /// seed drawn up front, so the result depends only on the seed and data.
    pub fn fit(&mut self, data: &FeatureMatrix) -> Result<()> {
        if data.is_empty() {
            return Err(FusionError::EmptyTable);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_rows = data.n_rows();
        let n_features = data.n_cols();
        let sample_size = self.max_samples.min(n_rows).max(1);
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let tree_seeds: Vec<u64> = (0..self.num_trees).map(|_| rng.next_u64()).collect();

        self.trees = tree_seeds
            .into_par_iter()
            .map(|tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                // Sample without replacement
                let sample = index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsolationTree::build(data, sample, n_features, max_depth, &mut rng)
            })
            .collect();

        self.sample_size = sample_size;
        self.avg_path_length = Self::average_path_length(sample_size);
        self.n_features = n_features;
        self.feature_names = data.columns().to_vec();
        self.trained = true;

        debug!(
            "Isolation forest fit: {} trees, sample size {}, {} features",
            self.trees.len(),
            sample_size,
            n_features
        );
        Ok(())
    }

    fn check(&self, data: &FeatureMatrix) -> Result<()> {
        if !self.trained {
            return Err(FusionError::NotTrained("isolation forest"));
        }
        if data.n_cols() != self.n_features {
            return Err(FusionError::InvalidDimension {
                expected: self.n_features,
                got: data.n_cols(),
            });
        }
        Ok(())
    }

    /// Score a single sample: 2^(-E[h(x)] / c(sample_size)), in (0, 1]
    fn score_sample(&self, sample: &[f64]) -> f64 {
        if self.trees.is_empty() || self.avg_path_length == 0.0 {
            return 0.5;
        }

        let total_path_length: f64 = self.trees.iter().map(|tree| tree.path_length(sample)).sum();
        let avg_path = total_path_length / self.trees.len() as f64;

        2.0_f64.powf(-avg_path / self.avg_path_length)
    }

    /// Raw isolation score per row (higher = more anomalous)
    pub fn score_samples(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        self.check(data)?;
        Ok(data.rows().map(|row| self.score_sample(row)).collect())
    }

    /// Offset-shifted raw output; lower = more anomalous, negative = outlier
    pub fn decision_function(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| -s - self.offset)
            .collect())
    }

    /// Batch-normalized anomaly score in [0, 1], higher = more anomalous.
    /// Only comparable within the same call.
    pub fn score(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        let raw = self.decision_function(data)?;
        Ok(normalization::inverted_min_max(&raw))
    }
}

/// A single isolation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    /// Build an isolation tree from the sampled row indices
    fn build<R: Rng>(
        data: &FeatureMatrix,
        sample: Vec<usize>,
        n_features: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let root = Self::build_node(data, sample, n_features, 0, max_depth, rng);
        Self { root }
    }

    fn build_node<R: Rng>(
        data: &FeatureMatrix,
        rows: Vec<usize>,
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Option<Box<IsolationNode>> {
        if rows.is_empty() {
            return None;
        }

        if depth >= max_depth || rows.len() <= 1 || n_features == 0 {
            return Some(Box::new(IsolationNode::Leaf { size: rows.len() }));
        }

        let feature_idx = rng.random_range(0..n_features);

        let (min_val, max_val) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &r| {
            let v = data.get(r, feature_idx);
            (lo.min(v), hi.max(v))
        });

        // If all values are the same, make a leaf
        if max_val - min_val <= f64::EPSILON * max_val.abs().max(1.0) {
            return Some(Box::new(IsolationNode::Leaf { size: rows.len() }));
        }

        let split_value = rng.random_range(min_val..max_val);

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| data.get(r, feature_idx) < split_value);

        let left = Self::build_node(data, left_rows, n_features, depth + 1, max_depth, rng);
        let right = Self::build_node(data, right_rows, n_features, depth + 1, max_depth, rng);

        Some(Box::new(IsolationNode::Internal {
            feature_idx,
            split_value,
            left,
            right,
        }))
    }

    /// Calculate path length for a sample
    fn path_length(&self, sample: &[f64]) -> f64 {
        match &self.root {
            None => 0.0,
            Some(node) => Self::node_path_length(node, sample, 0),
        }
    }

    fn node_path_length(node: &IsolationNode, sample: &[f64], depth: usize) -> f64 {
        match node {
            IsolationNode::Leaf { size } => {
                // Expected remaining depth for leaves holding several samples
                depth as f64 + IsolationForest::average_path_length(*size)
            }
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let val = sample.get(*feature_idx).copied().unwrap_or(0.0);
                let next_node = if val < *split_value { left } else { right };

                match next_node {
                    Some(n) => Self::node_path_length(n, sample, depth + 1),
                    None => depth as f64 + 1.0,
                }
            }
        }
    }
}

/// Node in an isolation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature_idx: usize,
        split_value: f64,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    Leaf {
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n_estimators: usize, max_samples: usize) -> IsolationConfig {
        IsolationConfig {
            n_estimators,
            max_samples,
        }
    }

    /// 200 rows clustered around 50, plus one far outlier at the end
    fn clustered_with_outlier() -> FeatureMatrix {
        let mut rows: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let v = 50.0 + (i % 21) as f64 - 10.0;
                vec![v, 100.0 - v, (i % 7) as f64]
            })
            .collect();
        rows.push(vec![500.0, -400.0, 90.0]);
        let cols = vec!["a".into(), "b".into(), "c".into()];
        FeatureMatrix::from_rows(cols, rows)
    }

    #[test]
    fn test_isolation_forest_creation() {
        let forest = IsolationForest::new(&IsolationConfig::default(), 42);
        assert!(!forest.is_trained());
        assert_eq!(forest.num_trees(), 0);
    }

    #[test]
    fn test_isolation_forest_training() {
        let mut forest = IsolationForest::new(&config(10, 32), 42);
        forest.fit(&clustered_with_outlier()).unwrap();

        assert!(forest.is_trained());
        assert_eq!(forest.num_trees(), 10);
        assert_eq!(forest.n_features(), 3);
    }

    #[test]
    fn test_scores_in_unit_interval_and_outlier_highest() {
        let data = clustered_with_outlier();
        let mut forest = IsolationForest::new(&config(100, 64), 7);
        forest.fit(&data).unwrap();

        let scores = forest.score(&data).unwrap();
        assert_eq!(scores.len(), data.n_rows());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let outlier = scores[200];
        assert!(scores[..200].iter().all(|&s| s < outlier));
    }

    #[test]
    fn test_decision_function_sign() {
        let data = clustered_with_outlier();
        let mut forest = IsolationForest::new(&config(100, 64), 7);
        forest.fit(&data).unwrap();
        let raw = forest.decision_function(&data).unwrap();
        assert!(raw[200] < 0.0);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let data = clustered_with_outlier();
        let mut a = IsolationForest::new(&config(50, 64), 42);
        let mut b = IsolationForest::new(&config(50, 64), 42);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.score(&data).unwrap(), b.score(&data).unwrap());
    }

    #[test]
    fn test_constant_batch_yields_constant_scores() {
        let rows = vec![vec![1.0, 1.0]; 20];
        let data = FeatureMatrix::from_rows(vec!["x".into(), "y".into()], rows);
        let mut forest = IsolationForest::new(&config(10, 16), 42);
        forest.fit(&data).unwrap();

        let scores = forest.score(&data).unwrap();
        assert!(scores.iter().all(|s| s.is_finite() && *s == scores[0]));
    }

    #[test]
    fn test_rejects_wrong_width() {
        let mut forest = IsolationForest::new(&config(5, 16), 42);
        forest.fit(&clustered_with_outlier()).unwrap();
        let narrow = FeatureMatrix::from_rows(vec!["a".into()], vec![vec![1.0]]);
        assert!(forest.score(&narrow).is_err());
    }

    #[test]
    fn test_empty_fit_is_error() {
        let mut forest = IsolationForest::new(&config(5, 16), 42);
        let empty = FeatureMatrix::from_rows(vec!["a".into()], Vec::new());
        assert!(matches!(forest.fit(&empty), Err(FusionError::EmptyTable)));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(IsolationForest::average_path_length(1), 0.0);
        assert_eq!(IsolationForest::average_path_length(2), 1.0);

        let c_10 = IsolationForest::average_path_length(10);
        let c_100 = IsolationForest::average_path_length(100);
        assert!(c_100 > c_10, "c(100)={} should be > c(10)={}", c_100, c_10);
    }
}
