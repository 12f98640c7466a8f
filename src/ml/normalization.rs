//! Batch-relative score normalization
//!
//! Scores normalized here are only comparable within one scoring call: the
//! min and max are taken over the batch being scored.

/// Added to the range so an all-equal batch divides safely
pub const BATCH_EPSILON: f64 = 1e-9;

/// `(v - min) / (max - min + eps)`; an empty batch yields an empty vector
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let (lo, hi) = bounds(values);
    values
        .iter()
        .map(|v| (v - lo) / (hi - lo + BATCH_EPSILON))
        .collect()
}

/// `1 - min_max(v)`, for raw scores where lower means more anomalous
pub fn inverted_min_max(values: &[f64]) -> Vec<f64> {
    min_max(values).into_iter().map(|v| 1.0 - v).collect()
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_range() {
        let out = min_max(&[2.0, 4.0, 3.0]);
        assert!(out[0].abs() < 1e-12);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_constant_batch_collapses() {
        let out = min_max(&[0.3, 0.3, 0.3]);
        assert!(out.iter().all(|&v| v == 0.0));
        let inv = inverted_min_max(&[0.3, 0.3]);
        assert!(inv.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_inverted_ordering() {
        let out = inverted_min_max(&[-0.2, 0.1, 0.05]);
        assert!(out[0] > out[2] && out[2] > out[1]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(min_max(&[]).is_empty());
    }
}
