//! Classification scores.

use serde::{Deserialize, Serialize};

/// Binary F1 score of class code 1.
///
/// Returns 0.0 when there are no true positives, false positives or false
/// negatives to score.
#[must_use]
pub fn f1_score(truth: &[u32], predicted: &[u32]) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t == 1, p == 1) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let denominator = 2 * tp + fp + fn_;
    if denominator == 0 {
        0.0
    } else {
        (2 * tp) as f64 / denominator as f64
    }
}

/// Train and test scores of one fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub train_score: f64,
    pub test_score: f64,
}

impl TrainMetrics {
    /// `|train - test|`.
    #[must_use]
    pub fn gap(&self) -> f64 {
        (self.train_score - self.test_score).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction_scores_one() {
        assert_eq!(f1_score(&[0, 1, 1], &[0, 1, 1]), 1.0);
    }

    #[test]
    fn mixed_prediction() {
        // tp=1 fp=1 fn=1 -> 2/4
        assert_eq!(f1_score(&[1, 1, 0, 0], &[1, 0, 1, 0]), 0.5);
    }

    #[test]
    fn undefined_score_is_zero() {
        assert_eq!(f1_score(&[0, 0], &[0, 0]), 0.0);
        assert_eq!(f1_score(&[], &[]), 0.0);
    }

    #[test]
    fn gap_is_symmetric() {
        let m = TrainMetrics {
            train_score: 0.8,
            test_score: 0.9,
        };
        assert!((m.gap() - 0.1).abs() < 1e-12);
    }
}
