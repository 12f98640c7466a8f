//! Streaming drift detection (ADWIN)
//!
//! Adaptive windowing over a scalar stream. The window is kept as an
//! exponential histogram: level `i` holds buckets summarizing `2^i` values,
//! at most `max_buckets` per level. Every `clock` updates the window is
//! scanned for a cut point where the older and newer halves have
//! significantly different means; if one is found the oldest buckets are
//! dropped and drift is reported for that update.
//!
//! The detector is stateful and order-sensitive. It is never rewound; a
//! fresh instance starts cold.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FusionError, Result};

/// ADWIN configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Confidence parameter; smaller is less sensitive
    pub delta: f64,
    /// Cut points are checked every `clock` updates
    pub clock: u64,
    /// Buckets per histogram level before two are merged
    pub max_buckets: usize,
    /// Minimum size of each sub-window at a cut
    pub min_window_length: usize,
    /// Updates before the first check
    pub grace_period: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            delta: 0.002,
            clock: 32,
            max_buckets: 5,
            min_window_length: 5,
            grace_period: 10,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(FusionError::InvalidConfig(format!(
                "drift delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if self.max_buckets < 1 {
            return Err(FusionError::InvalidConfig(
                "drift max_buckets must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of `2^level` consecutive values
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bucket {
    total: f64,
    /// Sum of squared deviations from the bucket mean
    variance: f64,
}

/// Drift monitor state
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    config: DriftConfig,
    /// `levels[i]` holds buckets of size 2^i, oldest first
    levels: Vec<VecDeque<Bucket>>,
    width: usize,
    total: f64,
    /// Sum of squared deviations over the whole window
    variance: f64,
    tick: u64,
    detections: u64,
    drift_detected: bool,
}

impl DriftMonitor {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            levels: vec![VecDeque::new()],
            width: 0,
            total: 0.0,
            variance: 0.0,
            tick: 0,
            detections: 0,
            drift_detected: false,
        }
    }

    /// Values currently in the window
    pub fn width(&self) -> usize {
        self.width
    }

    /// Mean of the current window
    pub fn estimation(&self) -> f64 {
        if self.width == 0 {
            0.0
        } else {
            self.total / self.width as f64
        }
    }

    /// Whether the last update detected drift
    pub fn drift_detected(&self) -> bool {
        self.drift_detected
    }

    /// Drifts detected since construction
    pub fn detections(&self) -> u64 {
        self.detections
    }

    /// Ingest one value; returns whether drift was detected at this step
    pub fn update(&mut self, value: f64) -> bool {
        self.tick += 1;
        self.insert(value);
        self.drift_detected = self.detect_change();
        if self.drift_detected {
            self.detections += 1;
            debug!(
                "Drift detected at tick {}; window shrunk to {} (mean {:.4})",
                self.tick,
                self.width,
                self.estimation()
            );
        }
        self.drift_detected
    }

    /// Feed a batch in order and return one 0/1 flag per value
    pub fn update_many(&mut self, values: &[f64]) -> Vec<u8> {
        values.iter().map(|&v| u8::from(self.update(v))).collect()
    }

    fn bucket_size(level: usize) -> usize {
        1 << level
    }

    fn insert(&mut self, value: f64) {
        if self.width > 0 {
            let mean = self.total / self.width as f64;
            let n = self.width as f64;
            self.variance += n * (value - mean) * (value - mean) / (n + 1.0);
        }
        self.width += 1;
        self.total += value;

        self.levels[0].push_back(Bucket {
            total: value,
            variance: 0.0,
        });
        self.compress();
    }

    /// Merge the two oldest buckets of any over-full level into the next
    fn compress(&mut self) {
        let mut level = 0;
        while level < self.levels.len() {
            if self.levels[level].len() <= self.config.max_buckets {
                break;
            }
            let (Some(a), Some(b)) = (self.levels[level].pop_front(), self.levels[level].pop_front())
            else {
                break;
            };

            let n = Self::bucket_size(level) as f64;
            let mean_a = a.total / n;
            let mean_b = b.total / n;
            let merged = Bucket {
                total: a.total + b.total,
                variance: a.variance + b.variance + n * n * (mean_a - mean_b).powi(2) / (2.0 * n),
            };

            if level + 1 == self.levels.len() {
                self.levels.push(VecDeque::new());
            }
            self.levels[level + 1].push_back(merged);
            level += 1;
        }
    }

    fn detect_change(&mut self) -> bool {
        if self.tick % self.config.clock.max(1) != 0 || self.width <= self.config.grace_period {
            return false;
        }

        let mut detected = false;
        while self.find_cut() {
            detected = true;
            self.delete_oldest();
            if self.width <= self.config.min_window_length {
                break;
            }
        }
        detected
    }

    /// Scan cut points from the oldest bucket forwards
    fn find_cut(&self) -> bool {
        let min_len = self.config.min_window_length as f64;
        let mut n0 = 0.0;
        let mut u0 = 0.0;
        let mut n1 = self.width as f64;
        let mut u1 = self.total;

        // newest-level-0 bucket is never moved into the old side
        let last_level = 0;
        let last_index = self.levels[0].len().saturating_sub(1);

        for level in (0..self.levels.len()).rev() {
            let size = Self::bucket_size(level) as f64;
            for (k, bucket) in self.levels[level].iter().enumerate() {
                if level == last_level && k == last_index {
                    return false;
                }
                n0 += size;
                n1 -= size;
                u0 += bucket.total;
                u1 -= bucket.total;

                if n0 >= min_len && n1 >= min_len {
                    let diff = (u0 / n0 - u1 / n1).abs();
                    if self.is_significant(n0, n1, diff) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Hoeffding-style bound with the window variance
    fn is_significant(&self, n0: f64, n1: f64, diff: f64) -> bool {
        let width = self.width as f64;
        let min_len = self.config.min_window_length as f64;
        let delta_prime = (2.0 * width.ln() / self.config.delta).ln();
        let m_recip = 1.0 / (n0 - min_len + 1.0) + 1.0 / (n1 - min_len + 1.0);
        let variance = self.variance / width;
        let epsilon = (2.0 * m_recip * variance * delta_prime).sqrt() + 2.0 / 3.0 * delta_prime * m_recip;
        diff > epsilon
    }

    /// Drop the oldest bucket from the window
    fn delete_oldest(&mut self) {
        let Some(level) = self.levels.iter().rposition(|l| !l.is_empty()) else {
            return;
        };
        let Some(bucket) = self.levels[level].pop_front() else {
            return;
        };

        let n = Self::bucket_size(level);
        self.width -= n.min(self.width);
        self.total -= bucket.total;

        if self.width == 0 {
            self.total = 0.0;
            self.variance = 0.0;
        } else {
            let nf = n as f64;
            let w = self.width as f64;
            let bucket_mean = bucket.total / nf;
            let window_mean = self.total / w;
            self.variance -= bucket.variance + nf * w * (bucket_mean - window_mean).powi(2) / (nf + w);
            self.variance = self.variance.max(0.0);
        }

        while self.levels.len() > 1 && self.levels.last().is_some_and(VecDeque::is_empty) {
            self.levels.pop();
        }
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic wobble so the window has non-zero variance
    fn wobble(i: usize) -> f64 {
        ((i * 37) % 11) as f64 / 100.0
    }

    #[test]
    fn test_config_validation() {
        assert!(DriftConfig::default().validate().is_ok());
        for config in [
            DriftConfig { max_buckets: 0, ..Default::default() },
            DriftConfig { delta: 0.0, ..Default::default() },
            DriftConfig { delta: 1.0, ..Default::default() },
            DriftConfig { delta: f64::NAN, ..Default::default() },
        ] {
            assert!(matches!(config.validate(), Err(FusionError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_stationary_stream_no_drift() {
        let mut monitor = DriftMonitor::default();
        let flags: Vec<bool> = (0..2000).map(|i| monitor.update(0.3 + wobble(i))).collect();
        assert!(flags.iter().all(|f| !f));
        assert_eq!(monitor.detections(), 0);
        assert_eq!(monitor.width(), 2000);
    }

    #[test]
    fn test_constant_stream_no_drift() {
        let mut monitor = DriftMonitor::default();
        assert!(monitor.update_many(&vec![0.5; 1000]).iter().all(|&f| f == 0));
    }

    #[test]
    fn test_mean_shift_detected() {
        let mut monitor = DriftMonitor::default();
        let before: Vec<bool> = (0..1000).map(|i| monitor.update(0.2 + wobble(i))).collect();
        assert!(before.iter().all(|f| !f));

        let after: Vec<bool> = (0..1000).map(|i| monitor.update(0.8 + wobble(i))).collect();
        let first = after.iter().position(|&f| f).expect("drift should be flagged");
        assert!(first < 200, "detected only after {} values", first);

        // window shrinks towards the new regime
        assert!(monitor.width() < 2000);
        assert!(monitor.estimation() > 0.5);
    }

    #[test]
    fn test_flags_only_on_clock_ticks() {
        let mut monitor = DriftMonitor::default();
        let mut values: Vec<f64> = vec![0.0; 500];
        values.extend(vec![1.0; 500]);
        let flags = monitor.update_many(&values);
        for (i, &f) in flags.iter().enumerate() {
            if f == 1 {
                assert_eq!((i + 1) % 32, 0);
            }
        }
        assert!(flags.iter().any(|&f| f == 1));
    }

    #[test]
    fn test_histogram_bounded() {
        let mut monitor = DriftMonitor::default();
        for i in 0..10_000 {
            monitor.update(wobble(i));
        }
        let buckets: usize = monitor.levels.iter().map(VecDeque::len).sum();
        assert!(monitor.levels.iter().all(|l| l.len() <= 5));
        // logarithmic in the window width
        assert!(buckets <= 5 * 15);
        assert_eq!(monitor.width(), 10_000);
    }

    #[test]
    fn test_fresh_instance_is_cold() {
        let monitor = DriftMonitor::default();
        assert_eq!(monitor.width(), 0);
        assert!(!monitor.drift_detected());
        assert_eq!(monitor.estimation(), 0.0);
    }
}
