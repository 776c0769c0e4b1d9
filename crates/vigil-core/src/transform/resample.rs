//! # Class-Imbalance Resampling
//!
//! `MinorityOversampler` adds synthetic rows to every class smaller than the
//! largest one. Each synthetic row lies on the segment between a real row
//! and one of its nearest same-class neighbours. The RNG is seeded, so the
//! output is reproducible.

use crate::{LabeledMatrix, VigilError, primitives};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Rebalances a labelled dataset.
pub trait Resampler {
    fn resample(&self, data: &LabeledMatrix) -> Result<LabeledMatrix, VigilError>;
}

/// Pass-through resampler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResampling;

impl Resampler for NoResampling {
    fn resample(&self, data: &LabeledMatrix) -> Result<LabeledMatrix, VigilError> {
        Ok(data.clone())
    }
}

/// Seeded synthetic oversampling of minority classes.
#[derive(Debug, Clone, Copy)]
pub struct MinorityOversampler {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl MinorityOversampler {
    #[must_use]
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }

    /// Indices of the `k` nearest rows to `row` among `members` (excluding itself).
    fn neighbours(&self, data: &LabeledMatrix, row: usize, members: &[usize]) -> Vec<usize> {
        let origin = data.features.row(row);
        let mut ranked: Vec<(f64, usize)> = members
            .iter()
            .filter(|&&m| m != row)
            .map(|&m| {
                let d: f64 = origin
                    .iter()
                    .zip(data.features.row(m))
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (d, m)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked
            .into_iter()
            .take(self.k_neighbors.max(1))
            .map(|(_, m)| m)
            .collect()
    }
}

impl Resampler for MinorityOversampler {
    fn resample(&self, data: &LabeledMatrix) -> Result<LabeledMatrix, VigilError> {
        if data.features.has_missing() {
            return Err(VigilError::DataQualityError(
                "cannot resample data with missing values".to_string(),
            ));
        }
        let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, &label) in data.labels.iter().enumerate() {
            by_class.entry(label).or_default().push(i);
        }
        let Some(majority) = by_class.values().map(Vec::len).max() else {
            return Ok(data.clone());
        };

        let budget = data.len().saturating_mul(primitives::MAX_RESAMPLE_FACTOR);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = data.clone();
        let mut added = 0usize;

        for (&label, members) in &by_class {
            let wanted = (majority - members.len()).min(budget - added);
            for _ in 0..wanted {
                let base = members[rng.gen_range(0..members.len())];
                let neighbours = self.neighbours(data, base, members);
                let row: Vec<f64> = if neighbours.is_empty() {
                    data.features.row(base).to_vec()
                } else {
                    let other = neighbours[rng.gen_range(0..neighbours.len())];
                    let gap: f64 = rng.r#gen::<f64>();
                    data.features
                        .row(base)
                        .iter()
                        .zip(data.features.row(other))
                        .map(|(a, b)| a + gap * (b - a))
                        .collect()
                };
                out.features.push_row(&row)?;
                out.labels.push(label);
            }
            added += wanted;
        }

        tracing::debug!(
            before = data.len(),
            after = out.len(),
            classes = by_class.len(),
            "resampled"
        );
        Ok(out)
    }
}
