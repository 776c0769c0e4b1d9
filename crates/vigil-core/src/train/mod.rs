//! # Train Stage
//!
//! Hyperparameter search, final refit and the quality gate.
//!
//! ## Search
//!
//! Every grid combination is scored by stratified k-fold cross-validated F1.
//! The comparison is strict (`>`), so among equally scoring combinations the
//! first one in grid order wins. Grid order therefore decides ties and is
//! part of the run's reproducibility contract.
//!
//! ## Quality gate
//!
//! The refitted model must reach `expected_score` on the test split and its
//! train/test score gap must not exceed `overfitting_threshold`.

pub mod boosting;
pub mod metrics;

pub use boosting::{BoostedTrees, GradientBoosting};
pub use metrics::{TrainMetrics, f1_score};

use crate::storage::{ArtifactStore, StageKind, TrainingArtifact, TransformationArtifact};
use crate::{
    Hyperparams, LabeledMatrix, Matrix, TrainerConfig, VigilError, load_object, primitives,
    save_object,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// TRAITS
// =============================================================================

/// A fitted model mapping feature rows to class codes.
pub trait Classifier {
    fn predict(&self, x: &Matrix) -> Vec<u32>;
}

/// Fits a [`Classifier`] for one hyperparameter set.
pub trait Learner {
    type Model: Classifier + Serialize + DeserializeOwned + Clone + std::fmt::Debug;

    fn fit(&self, data: &LabeledMatrix, params: &Hyperparams) -> Result<Self::Model, VigilError>;
}

impl<L: Learner + ?Sized> Learner for &L {
    type Model = L::Model;

    fn fit(&self, data: &LabeledMatrix, params: &Hyperparams) -> Result<Self::Model, VigilError> {
        (**self).fit(data, params)
    }
}

/// Score a model on labelled data.
pub fn score<C: Classifier + ?Sized>(model: &C, data: &LabeledMatrix) -> f64 {
    f1_score(&data.labels, &model.predict(&data.features))
}

// =============================================================================
// SEARCH
// =============================================================================

/// Stratified fold assignment: the i-th row of each class goes to fold `i % k`.
#[must_use]
pub fn stratified_folds(labels: &[u32], k: usize) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut folds = vec![Vec::new(); k];
    let mut seen = std::collections::BTreeMap::<u32, usize>::new();
    for (row, label) in labels.iter().enumerate() {
        let position = seen.entry(*label).or_insert(0);
        folds[*position % k].push(row);
        *position += 1;
    }
    folds
}

/// Mean F1 over `k` stratified folds.
pub fn cross_validate<L: Learner + ?Sized>(
    learner: &L,
    data: &LabeledMatrix,
    params: &Hyperparams,
    k: usize,
) -> Result<f64, VigilError> {
    let folds = stratified_folds(&data.labels, k);
    let mut total = 0.0;
    for (i, held_out) in folds.iter().enumerate() {
        let fit_rows: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect();
        if held_out.is_empty() || fit_rows.is_empty() {
            return Err(VigilError::DataQualityError(format!(
                "fold {} of {} is empty",
                i, k
            )));
        }
        let model = learner.fit(&data.take_rows(&fit_rows), params)?;
        total += score(&model, &data.take_rows(held_out));
    }
    Ok(total / folds.len() as f64)
}

/// Pick the best grid combination, or the fallback when search cannot run.
pub fn search<L: Learner + ?Sized>(
    learner: &L,
    data: &LabeledMatrix,
    config: &TrainerConfig,
) -> Hyperparams {
    let combinations = config.grid.combinations();
    if combinations.is_empty() {
        tracing::info!(params = %config.fallback, "empty search grid, using fallback");
        return config.fallback.clone();
    }

    let mut best: Option<(f64, &Hyperparams)> = None;
    for params in &combinations {
        match cross_validate(learner, data, params, config.cv_folds) {
            Ok(cv) => {
                tracing::debug!(%params, cv_score = cv, "scored combination");
                if best.is_none_or(|(b, _)| cv > b) {
                    best = Some((cv, params));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, params = %config.fallback, "cross-validation failed, using fallback");
                return config.fallback.clone();
            }
        }
    }
    match best {
        Some((cv, params)) => {
            tracing::info!(%params, cv_score = cv, "selected hyperparameters");
            params.clone()
        }
        None => config.fallback.clone(),
    }
}

// =============================================================================
// TRAINING
// =============================================================================

/// A refitted model with its scores.
#[derive(Debug, Clone)]
pub struct TrainOutcome<M> {
    pub model: M,
    pub metrics: TrainMetrics,
    pub params: Hyperparams,
}

/// Search, refit on the full training split, and score both splits.
pub fn train<L: Learner + ?Sized>(
    learner: &L,
    train: &LabeledMatrix,
    test: &LabeledMatrix,
    config: &TrainerConfig,
) -> Result<TrainOutcome<L::Model>, VigilError> {
    let params = search(learner, train, config);
    let model = learner.fit(train, &params)?;
    let metrics = TrainMetrics {
        train_score: score(&model, train),
        test_score: score(&model, test),
    };
    Ok(TrainOutcome {
        model,
        metrics,
        params,
    })
}

/// Fail with `QualityGateError` when the model misses either threshold.
pub fn quality_gate(metrics: &TrainMetrics, config: &TrainerConfig) -> Result<(), VigilError> {
    if metrics.test_score < config.expected_score {
        return Err(VigilError::QualityGateError(format!(
            "test score {:.4} is below expected {:.4}",
            metrics.test_score, config.expected_score
        )));
    }
    if metrics.gap() > config.overfitting_threshold {
        return Err(VigilError::QualityGateError(format!(
            "train/test gap {:.4} exceeds overfitting threshold {:.4}",
            metrics.gap(),
            config.overfitting_threshold
        )));
    }
    Ok(())
}

// =============================================================================
// STAGE
// =============================================================================

/// The trained model and its stage record.
#[derive(Debug, Clone)]
pub struct TrainingOutput<M> {
    pub artifact: TrainingArtifact,
    pub model: M,
}

/// Run the train stage.
pub fn run<L: Learner + ?Sized>(
    learner: &L,
    config: &TrainerConfig,
    store: &ArtifactStore,
) -> Result<TrainingOutput<L::Model>, VigilError> {
    let input: TransformationArtifact = store.read(StageKind::Training)?;
    let train_data: LabeledMatrix = load_object(&input.train_path)?;
    let test_data: LabeledMatrix = load_object(&input.test_path)?;

    let outcome = train(learner, &train_data, &test_data, config)?;
    tracing::info!(
        run_id = %store.run().run_id,
        train_score = outcome.metrics.train_score,
        test_score = outcome.metrics.test_score,
        params = %outcome.params,
        "trained model"
    );
    quality_gate(&outcome.metrics, config)?;

    let model_path = store
        .stage_dir(StageKind::Training)?
        .join(primitives::MODEL_FILE_NAME);
    save_object(&model_path, &outcome.model)?;

    let artifact = TrainingArtifact {
        model_path,
        train_score: outcome.metrics.train_score,
        test_score: outcome.metrics.test_score,
        params: outcome.params,
    };
    store.write(artifact.clone())?;
    Ok(TrainingOutput {
        artifact,
        model: outcome.model,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SearchGrid;

    fn gated(expected: f64, overfit: f64) -> TrainerConfig {
        TrainerConfig {
            expected_score: expected,
            overfitting_threshold: overfit,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn gate_accepts_good_model() {
        let metrics = TrainMetrics {
            train_score: 0.85,
            test_score: 0.82,
        };
        assert!(quality_gate(&metrics, &gated(0.7, 0.1)).is_ok());
    }

    #[test]
    fn gate_rejects_low_score_and_overfit() {
        let low = TrainMetrics {
            train_score: 0.65,
            test_score: 0.6,
        };
        assert!(matches!(
            quality_gate(&low, &gated(0.7, 0.1)),
            Err(VigilError::QualityGateError(_))
        ));
        let overfit = TrainMetrics {
            train_score: 1.0,
            test_score: 0.75,
        };
        assert!(matches!(
            quality_gate(&overfit, &gated(0.7, 0.1)),
            Err(VigilError::QualityGateError(_))
        ));
    }

    #[test]
    fn folds_are_stratified() {
        let labels = [0, 0, 0, 1, 1, 1, 0, 1];
        let folds = stratified_folds(&labels, 2);
        for fold in &folds {
            let ones = fold.iter().filter(|&&r| labels[r] == 1).count();
            assert_eq!(ones, 2);
        }
    }

    #[test]
    fn zero_folds_means_one_fold() {
        let folds = stratified_folds(&[0, 1, 1], 0);
        assert_eq!(folds, vec![vec![0, 1, 2]]);
    }

    /// Learner whose model predicts class 1 iff `n_estimators` is even.
    struct ParityLearner;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Parity(bool);

    impl Classifier for Parity {
        fn predict(&self, x: &Matrix) -> Vec<u32> {
            vec![u32::from(self.0); x.rows()]
        }
    }

    impl Learner for ParityLearner {
        type Model = Parity;

        fn fit(&self, _: &LabeledMatrix, params: &Hyperparams) -> Result<Parity, VigilError> {
            Ok(Parity(params.n_estimators % 2 == 0))
        }
    }

    fn positives(rows: usize) -> LabeledMatrix {
        LabeledMatrix::new(Matrix::new(rows, 1, vec![0.0; rows]).expect("m"), vec![1; rows])
            .expect("labeled")
    }

    #[test]
    fn first_best_combination_wins_ties() {
        let config = TrainerConfig {
            grid: SearchGrid {
                max_depth: vec![1, 2],
                learning_rate: vec![0.1],
                n_estimators: vec![1, 2, 4],
            },
            ..TrainerConfig::default()
        };
        let params = search(&ParityLearner, &positives(6), &config);
        assert_eq!(params.n_estimators, 2);
        assert_eq!(params.max_depth, 1);
    }

    #[test]
    fn fallback_when_grid_empty_or_cv_impossible() {
        let mut config = TrainerConfig {
            grid: SearchGrid {
                max_depth: vec![],
                learning_rate: vec![0.1],
                n_estimators: vec![2],
            },
            ..TrainerConfig::default()
        };
        assert_eq!(search(&ParityLearner, &positives(6), &config), config.fallback);

        config.grid.max_depth = vec![1];
        config.cv_folds = 10;
        assert_eq!(search(&ParityLearner, &positives(3), &config), config.fallback);
    }
}
