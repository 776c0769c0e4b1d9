//! # k-Nearest-Neighbours Imputer
//!
//! Fills NaN entries with the mean of that column over the `k` nearest
//! training rows that have the column present. Distances use the
//! NaN-aware euclidean metric over the coordinates both rows share,
//! scaled up by `total / shared`.
//!
//! The imputer is fitted once on training data and reused unchanged for
//! test and serving data.

use crate::Matrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnImputer {
    k: usize,
    donors: Matrix,
    /// Per-column mean over the fitted data (0 when the column was all NaN).
    fallback: Vec<f64>,
}

impl KnnImputer {
    #[must_use]
    pub fn fit(data: &Matrix, k: usize) -> Self {
        let fallback = (0..data.cols())
            .map(|col| {
                let present: Vec<f64> = (0..data.rows())
                    .map(|row| data.get(row, col))
                    .filter(|v| !v.is_nan())
                    .collect();
                if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            })
            .collect();
        Self {
            k: k.max(1),
            donors: data.clone(),
            fallback,
        }
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.donors.cols()
    }

    /// Fill every NaN in `data`. Rows without NaN are copied unchanged.
    #[must_use]
    pub fn transform(&self, data: &Matrix) -> Matrix {
        let mut out = data.clone();
        for row in 0..data.rows() {
            let values = data.row(row);
            if !values.iter().any(|v| v.is_nan()) {
                continue;
            }
            let distances = self.distances(values);
            for col in 0..data.cols() {
                if values[col].is_nan() {
                    out.set(row, col, self.fill(&distances, col));
                }
            }
        }
        out
    }

    /// Distance from `values` to every donor; `None` when nothing is shared.
    fn distances(&self, values: &[f64]) -> Vec<Option<f64>> {
        let total = values.len() as f64;
        (0..self.donors.rows())
            .map(|d| {
                let donor = self.donors.row(d);
                let mut sum = 0.0;
                let mut shared = 0usize;
                for (a, b) in values.iter().zip(donor) {
                    if !a.is_nan() && !b.is_nan() {
                        sum += (a - b) * (a - b);
                        shared += 1;
                    }
                }
                (shared > 0).then(|| (total / shared as f64 * sum).sqrt())
            })
            .collect()
    }

    fn fill(&self, distances: &[Option<f64>], col: usize) -> f64 {
        let mut candidates: Vec<(f64, f64)> = distances
            .iter()
            .enumerate()
            .filter_map(|(d, dist)| {
                let value = self.donors.get(d, col);
                match dist {
                    Some(dist) if !value.is_nan() => Some((*dist, value)),
                    _ => None,
                }
            })
            .collect();
        if candidates.is_empty() {
            return self.fallback.get(col).copied().unwrap_or(0.0);
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        let take = candidates.len().min(self.k);
        candidates[..take].iter().map(|(_, v)| v).sum::<f64>() / take as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_from_nearest_rows() {
        let train = Matrix::new(
            4,
            2,
            vec![
                0.0, 10.0, //
                0.1, 12.0, //
                5.0, 50.0, //
                5.1, 52.0,
            ],
        )
        .expect("matrix");
        let imputer = KnnImputer::fit(&train, 2);

        let query = Matrix::new(1, 2, vec![0.05, f64::NAN]).expect("matrix");
        let filled = imputer.transform(&query);
        assert!((filled.get(0, 1) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn complete_rows_are_untouched() {
        let train = Matrix::new(2, 1, vec![1.0, 3.0]).expect("matrix");
        let imputer = KnnImputer::fit(&train, 7);
        let query = Matrix::new(1, 1, vec![9.0]).expect("matrix");
        assert_eq!(imputer.transform(&query), query);
    }

    #[test]
    fn no_shared_coordinates_uses_column_mean() {
        let train = Matrix::new(2, 2, vec![1.0, f64::NAN, 3.0, f64::NAN]).expect("matrix");
        let imputer = KnnImputer::fit(&train, 1);
        let query = Matrix::new(1, 2, vec![f64::NAN, 4.0]).expect("matrix");
        let filled = imputer.transform(&query);
        assert!((filled.get(0, 0) - 2.0).abs() < 1e-9);
        assert!(!filled.has_missing());
    }
}
