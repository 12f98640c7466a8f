//! Auto-labeling
//!
//! Turns unsupervised isolation scores into pseudo ground truth when a
//! training table arrives without labels.

use tracing::info;

use crate::table::FeatureTable;

/// Column holding binary labels
pub const LABEL_COLUMN: &str = "label";

/// Marks rows whose normalized isolation score reaches a threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoLabeler {
    threshold: f64,
}

impl AutoLabeler {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 1.0 where `score >= threshold`, else 0.0
    pub fn labels(&self, scores: &[f64]) -> Vec<f64> {
        scores
            .iter()
            .map(|&s| if s >= self.threshold { 1.0 } else { 0.0 })
            .collect()
    }

    /// Write the label column into `table` and return how many rows were
    /// labeled anomalous
    pub fn label(&self, table: &mut FeatureTable, scores: &[f64]) -> usize {
        let labels = self.labels(scores);
        let anomalies = labels.iter().filter(|&&l| l == 1.0).count();
        table.set_column(LABEL_COLUMN, labels);

        info!(
            "Auto-labeling with threshold {}: {} anomalies",
            self.threshold, anomalies
        );
        anomalies
    }
}

impl Default for AutoLabeler {
    fn default() -> Self {
        Self::new(0.8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Record, Value};

    const SCORES: [f64; 4] = [0.1, 0.9, 0.85, 0.2];

    fn table(n: usize) -> FeatureTable {
        FeatureTable::new(vec![Record::new(); n])
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(AutoLabeler::default().threshold(), 0.8);
        assert_eq!(AutoLabeler::default().labels(&SCORES), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_threshold_above_one_labels_nothing() {
        assert!(AutoLabeler::new(1.1).labels(&SCORES).iter().all(|&l| l == 0.0));
    }

    #[test]
    fn test_threshold_zero_labels_everything() {
        assert!(AutoLabeler::new(0.0).labels(&SCORES).iter().all(|&l| l == 1.0));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        assert_eq!(AutoLabeler::new(0.85).labels(&[0.85]), vec![1.0]);
    }

    #[test]
    fn test_label_writes_column() {
        let mut t = table(4);
        let count = AutoLabeler::default().label(&mut t, &SCORES);
        assert_eq!(count, 2);

        let labels: Vec<_> = t.column(LABEL_COLUMN).map(|v| v.cloned()).collect();
        assert_eq!(
            labels,
            vec![
                Some(Value::Number(0.0)),
                Some(Value::Number(1.0)),
                Some(Value::Number(1.0)),
                Some(Value::Number(0.0)),
            ]
        );
    }
}
