//! Feature standardization
//!
//! Per-column z-score scaling, fit once on training data and reused verbatim
//! at inference.

use serde::{Deserialize, Serialize};

use super::frame::FeatureMatrix;
use crate::error::{FusionError, Result};

/// Scales below this are treated as zero variance
const MIN_SCALE: f64 = 1e-12;

/// Running column statistics (Welford's online algorithm)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ColumnStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl ColumnStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Unbiased (n - 1) standard deviation
    fn std(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Standard scaler state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    means: Vec<f64>,
    scales: Vec<f64>,
    feature_names: Vec<String>,
    fitted: bool,
}

impl Scaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Learn per-column mean and scale, then standardize `matrix`
    pub fn fit_transform(&mut self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let mut stats = vec![ColumnStats::default(); matrix.n_cols()];
        for row in matrix.rows() {
            for (s, &v) in stats.iter_mut().zip(row) {
                s.update(v);
            }
        }

        self.means = stats.iter().map(|s| s.mean).collect();
        // zero-variance columns keep unit scale so output stays finite
        self.scales = stats
            .iter()
            .map(|s| {
                let std = s.std();
                if std.is_finite() && std > MIN_SCALE {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        self.feature_names = matrix.columns().to_vec();
        self.fitted = true;

        self.apply(matrix)
    }

    /// Standardize with previously learned statistics
    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        if !self.fitted {
            return Err(FusionError::NotTrained("scaler"));
        }
        if matrix.n_cols() != self.means.len() {
            return Err(FusionError::InvalidDimension {
                expected: self.means.len(),
                got: matrix.n_cols(),
            });
        }
        Ok(self.apply(matrix))
    }

    fn apply(&self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let mut out = matrix.clone();
        let n = self.means.len();
        if n == 0 {
            return out;
        }
        for (i, v) in out.data_mut().iter_mut().enumerate() {
            let c = i % n;
            *v = (*v - self.means[c]) / self.scales[c];
        }
        out
    }
}
