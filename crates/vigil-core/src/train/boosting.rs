//! # Gradient Boosting
//!
//! Binary logistic boosting over depth-limited regression trees.
//!
//! - Split candidates are per-feature quantiles of the training data
//!   (at most `MAX_BINS` thresholds), fixed once per fit
//! - Leaf weight is `-G / (H + lambda)`, scaled by the learning rate
//! - A split is taken only if its gain exceeds `MIN_SPLIT_GAIN` and both
//!   children carry at least `MIN_CHILD_WEIGHT` hessian
//! - `value <= threshold` and NaN go left

use super::{Classifier, Learner};
use crate::{Hyperparams, LabeledMatrix, Matrix, VigilError};
use serde::{Deserialize, Serialize};

const MAX_BINS: usize = 32;
const LAMBDA: f64 = 1.0;
const MIN_CHILD_WEIGHT: f64 = 1.0;
const MIN_SPLIT_GAIN: f64 = 1e-6;
const PROBABILITY_CLIP: f64 = 1e-6;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// MODEL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn score(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf(value)) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    at = if v.is_nan() || v <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }
}

/// A fitted boosted-tree ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
}

impl BoostedTrees {
    /// An ensemble without trees that scores every row with `logit`.
    #[must_use]
    pub fn constant(logit: f64) -> Self {
        Self {
            base_score: logit,
            learning_rate: 0.0,
            trees: Vec::new(),
        }
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn margin(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.score(row)).sum::<f64>()
    }

    /// Probability of class 1 per row.
    #[must_use]
    pub fn predict_proba(&self, x: &Matrix) -> Vec<f64> {
        (0..x.rows()).map(|r| sigmoid(self.margin(x.row(r)))).collect()
    }
}

impl Classifier for BoostedTrees {
    fn predict(&self, x: &Matrix) -> Vec<u32> {
        self.predict_proba(x)
            .into_iter()
            .map(|p| u32::from(p >= 0.5))
            .collect()
    }
}

// =============================================================================
// LEARNER
// =============================================================================

/// Binary gradient-boosting learner.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientBoosting;

/// Pre-binned training features shared by every tree of one fit.
struct Binned {
    cols: usize,
    thresholds: Vec<Vec<f64>>,
    /// Row-major bin index; bin `b` means `value <= thresholds[f][b]`
    /// (or above every threshold when `b == thresholds[f].len()`).
    bins: Vec<u16>,
}

impl Binned {
    fn new(x: &Matrix) -> Self {
        let cols = x.cols();
        let thresholds: Vec<Vec<f64>> = (0..cols)
            .map(|f| {
                let mut values: Vec<f64> = (0..x.rows())
                    .map(|r| x.get(r, f))
                    .filter(|v| !v.is_nan())
                    .collect();
                values.sort_by(f64::total_cmp);
                values.dedup();
                // the largest value never splits anything off
                values.pop();
                if values.len() <= MAX_BINS {
                    values
                } else {
                    let mut picked: Vec<f64> = (1..=MAX_BINS)
                        .map(|q| values[q * (values.len() - 1) / MAX_BINS])
                        .collect();
                    picked.dedup();
                    picked
                }
            })
            .collect();

        let mut bins = Vec::with_capacity(x.rows() * cols);
        for r in 0..x.rows() {
            for (f, cuts) in thresholds.iter().enumerate() {
                let v = x.get(r, f);
                let b = if v.is_nan() {
                    0
                } else {
                    cuts.partition_point(|t| *t < v)
                };
                bins.push(b as u16);
            }
        }
        Self {
            cols,
            thresholds,
            bins,
        }
    }

    fn bin(&self, row: usize, feature: usize) -> usize {
        self.bins[row * self.cols + feature] as usize
    }
}

struct Grower<'a> {
    binned: &'a Binned,
    grad: &'a [f64],
    hess: &'a [f64],
    max_depth: usize,
    nodes: Vec<Node>,
}

fn leaf_weight(g: f64, h: f64) -> f64 {
    -g / (h + LAMBDA)
}

fn structure_score(g: f64, h: f64) -> f64 {
    g * g / (h + LAMBDA)
}

impl Grower<'_> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf(leaf_weight(g, h)));

        if depth >= self.max_depth {
            return id;
        }
        let Some((feature, cut)) = self.best_split(rows, g, h) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.binned.bin(r, feature) <= cut);
        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold: self.binned.thresholds[feature][cut],
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<(usize, usize)> {
        let parent = structure_score(g, h);
        let mut best: Option<(f64, usize, usize)> = None;

        for (feature, cuts) in self.binned.thresholds.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let mut hist_g = vec![0.0; cuts.len() + 1];
            let mut hist_h = vec![0.0; cuts.len() + 1];
            for &r in rows {
                let b = self.binned.bin(r, feature);
                hist_g[b] += self.grad[r];
                hist_h[b] += self.hess[r];
            }
            let (mut gl, mut hl) = (0.0, 0.0);
            for cut in 0..cuts.len() {
                gl += hist_g[cut];
                hl += hist_h[cut];
                let (gr, hr) = (g - gl, h - hl);
                if hl < MIN_CHILD_WEIGHT || hr < MIN_CHILD_WEIGHT {
                    continue;
                }
                let gain = 0.5 * (structure_score(gl, hl) + structure_score(gr, hr) - parent);
                if gain > MIN_SPLIT_GAIN && best.is_none_or(|(b, _, _)| gain > b) {
                    best = Some((gain, feature, cut));
                }
            }
        }
        best.map(|(_, feature, cut)| (feature, cut))
    }
}

impl Learner for GradientBoosting {
    type Model = BoostedTrees;

    fn fit(&self, data: &LabeledMatrix, params: &Hyperparams) -> Result<BoostedTrees, VigilError> {
        if data.is_empty() {
            return Err(VigilError::DataQualityError(
                "cannot train on an empty dataset".to_string(),
            ));
        }
        if let Some(bad) = data.labels.iter().find(|&&l| l > 1) {
            return Err(VigilError::DataQualityError(format!(
                "binary learner got class code {}",
                bad
            )));
        }
        let y: Vec<f64> = data.labels.iter().map(|&l| f64::from(l)).collect();
        let mean = (y.iter().sum::<f64>() / y.len() as f64)
            .clamp(PROBABILITY_CLIP, 1.0 - PROBABILITY_CLIP);

        let mut model = BoostedTrees {
            base_score: (mean / (1.0 - mean)).ln(),
            learning_rate: params.learning_rate,
            trees: Vec::with_capacity(params.n_estimators),
        };
        let binned = Binned::new(&data.features);
        let all_rows: Vec<usize> = (0..data.len()).collect();
        let mut margins = vec![model.base_score; data.len()];

        for _ in 0..params.n_estimators {
            let (grad, hess): (Vec<f64>, Vec<f64>) = margins
                .iter()
                .zip(&y)
                .map(|(m, t)| {
                    let p = sigmoid(*m);
                    (p - t, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();
            let mut grower = Grower {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                max_depth: params.max_depth,
                nodes: Vec::new(),
            };
            grower.grow(&all_rows, 0);
            let tree = Tree {
                nodes: grower.nodes,
            };
            for (r, margin) in margins.iter_mut().enumerate() {
                *margin += params.learning_rate * tree.score(data.features.row(r));
            }
            model.trees.push(tree);
        }
        Ok(model)
    }
}
