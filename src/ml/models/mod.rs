//! ML models behind the scoring engine
//!
//! Provides the tree ensembles used by the pipeline.

pub mod gradient_boost;
pub mod isolation_forest;

pub use gradient_boost::{BoosterDump, GradientBoostClassifier};
pub use isolation_forest::IsolationForest;

use serde::{Deserialize, Serialize};

/// Isolation forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Number of trees
    pub n_estimators: usize,
    /// Rows drawn (without replacement) for each tree
    pub max_samples: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
        }
    }
}

/// Gradient boosting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Minimum rows in each leaf
    pub min_samples_leaf: usize,
    /// Minimum hessian sum in each leaf
    pub min_child_weight: f64,
    /// L2 penalty on leaf values
    pub l2_regularization: f64,
    /// Maximum candidate thresholds per feature
    pub max_bins: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 20,
            min_child_weight: 1e-3,
            l2_regularization: 0.0,
            max_bins: 64,
        }
    }
}
