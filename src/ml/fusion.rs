//! Score fusion
//!
//! Linear blend of the three detector signals into one anomaly score:
//!
//! ```text
//! fusion = w_iso * iso_score + w_sup * lgbm_score + w_drift * adwin_flag
//! ```
//!
//! A row is anomalous when the fused score reaches the decision threshold.

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Fusion weights and decision threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub isolation: f64,
    pub supervised: f64,
    pub drift: f64,
    /// Inclusive cut on the fused score
    pub decision_threshold: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            isolation: 0.4,
            supervised: 0.5,
            drift: 0.1,
            decision_threshold: 0.5,
        }
    }
}

impl FusionWeights {
    /// Weights must be finite, non-negative and sum to one
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("isolation", self.isolation),
            ("supervised", self.supervised),
            ("drift", self.drift),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "fusion weight {} must be a non-negative number, got {}",
                    name, w
                )));
            }
        }

        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(FusionError::InvalidConfig(format!(
                "fusion weights must sum to 1, got {}",
                sum
            )));
        }

        if !self.decision_threshold.is_finite() {
            return Err(FusionError::InvalidConfig(
                "decision threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-row fused output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    pub score: f64,
    pub is_anomaly: bool,
}

/// Applies validated fusion weights
#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    weights: FusionWeights,
}

impl FusionEngine {
    pub fn new(weights: FusionWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    /// Fuse one row's signals
    pub fn fuse(&self, iso: f64, supervised: f64, drift_flag: u8) -> FusedScore {
        let w = &self.weights;
        let score = w.isolation * iso + w.supervised * supervised + w.drift * f64::from(drift_flag);
        FusedScore {
            score,
            is_anomaly: score >= w.decision_threshold,
        }
    }

    /// Fuse aligned per-row signals
    pub fn fuse_batch(&self, iso: &[f64], supervised: &[f64], drift_flags: &[u8]) -> Result<Vec<FusedScore>> {
        if supervised.len() != iso.len() {
            return Err(FusionError::InvalidDimension {
                expected: iso.len(),
                got: supervised.len(),
            });
        }
        if drift_flags.len() != iso.len() {
            return Err(FusionError::InvalidDimension {
                expected: iso.len(),
                got: drift_flags.len(),
            });
        }

        Ok(iso
            .iter()
            .zip(supervised)
            .zip(drift_flags)
            .map(|((&i, &s), &d)| self.fuse(i, s, d))
            .collect())
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_signals_high() {
        let fused = FusionEngine::default().fuse(1.0, 1.0, 1);
        assert!((fused.score - 1.0).abs() < 1e-12);
        assert!(fused.is_anomaly);
    }

    #[test]
    fn test_all_signals_low() {
        let fused = FusionEngine::default().fuse(0.0, 0.0, 0);
        assert_eq!(fused.score, 0.0);
        assert!(!fused.is_anomaly);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let engine = FusionEngine::new(FusionWeights {
            isolation: 1.0,
            supervised: 0.0,
            drift: 0.0,
            decision_threshold: 0.5,
        })
        .unwrap();
        assert!(engine.fuse(0.5, 0.0, 0).is_anomaly);
        assert!(!engine.fuse(0.49, 0.0, 0).is_anomaly);
    }

    #[test]
    fn test_isolation_only_row() {
        // supervised contribution absent, drift off: 0.4 * 0.9 = 0.36
        let fused = FusionEngine::default().fuse(0.9, 0.0, 0);
        assert!((fused.score - 0.36).abs() < 1e-12);
        assert!(!fused.is_anomaly);
    }

    #[test]
    fn test_weights_validation() {
        assert!(FusionWeights::default().validate().is_ok());

        let bad_sum = FusionWeights {
            isolation: 0.5,
            ..Default::default()
        };
        assert!(matches!(bad_sum.validate(), Err(FusionError::InvalidConfig(_))));

        let negative = FusionWeights {
            isolation: 1.1,
            supervised: -0.2,
            drift: 0.1,
            decision_threshold: 0.5,
        };
        assert!(negative.validate().is_err());

        let nan = FusionWeights {
            drift: f64::NAN,
            ..Default::default()
        };
        assert!(FusionEngine::new(nan).is_err());
    }

    #[test]
    fn test_fuse_batch_length_mismatch() {
        let engine = FusionEngine::default();
        assert!(engine.fuse_batch(&[0.1, 0.2], &[0.1], &[0, 0]).is_err());
        assert_eq!(engine.fuse_batch(&[0.1], &[0.2], &[1]).unwrap().len(), 1);
    }
}
