//! Time-ordered cross-validation and ranking metrics

use std::cmp::Ordering;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Cross-validation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of time-ordered folds
    pub n_splits: usize,
    /// Negatives kept per positive when balancing
    pub negative_ratio: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            n_splits: 5,
            negative_ratio: 4,
        }
    }
}

/// One train/validation split. Training rows always precede validation rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// Expanding-window splitter: fold k trains on every row before its
/// validation slice, never on rows after it
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSplit {
    n_splits: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits: n_splits.max(2),
        }
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Folds over `n_rows` rows; empty when there are too few rows to give
    /// every fold at least one validation row
    pub fn split(&self, n_rows: usize) -> Vec<Fold> {
        let n_folds = self.n_splits + 1;
        if n_rows < n_folds {
            return Vec::new();
        }
        let test_size = n_rows / n_folds;
        let first_test = n_rows - self.n_splits * test_size;

        (0..self.n_splits)
            .map(|k| {
                let start = first_test + k * test_size;
                Fold {
                    train: 0..start,
                    validation: start..start + test_size,
                }
            })
            .collect()
    }
}

fn by_score_desc(a: &(f64, f64), b: &(f64, f64)) -> Ordering {
    b.0.total_cmp(&a.0)
}

/// Area under the ROC curve, ties counted as half. `None` unless both
/// classes are present.
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }
    let n_pos = labels.iter().filter(|&&y| y >= 0.5).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Mann-Whitney U with average ranks for ties
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let positives = pairs[i..=j].iter().filter(|p| p.1 >= 0.5).count();
        rank_sum_pos += avg_rank * positives as f64;
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Average precision: sum over distinct thresholds of
/// (recall step) x precision. `None` when there are no positives.
pub fn average_precision(labels: &[f64], scores: &[f64]) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }
    let total_pos = labels.iter().filter(|&&y| y >= 0.5).count();
    if total_pos == 0 {
        return None;
    }

    let mut pairs: Vec<(f64, f64)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(by_score_desc);

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let threshold = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == threshold {
            if pairs[i].1 >= 0.5 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let precision = tp as f64 / (tp + fp) as f64;
        let recall = tp as f64 / total_pos as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }

    Some(ap)
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
