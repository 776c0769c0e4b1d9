//! # Pipeline Configuration
//!
//! Typed configuration for one pipeline run. Every section has defaults, so
//! a partial TOML document (or none at all) yields a usable config. File
//! loading lives in the app layer; this module only defines the shape and
//! validates ranges.

use crate::VigilError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub ingestion: IngestionConfig,
    pub validation: ValidationConfig,
    pub transform: TransformConfig,
    pub trainer: TrainerConfig,
}

impl PipelineConfig {
    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), VigilError> {
        let v = &self.validation;
        if !(0.0..=1.0).contains(&v.missing_threshold) {
            return Err(VigilError::ConfigError(format!(
                "validation.missing_threshold must be in [0, 1], got {}",
                v.missing_threshold
            )));
        }
        let i = &self.ingestion;
        if !(i.test_size > 0.0 && i.test_size < 1.0) {
            return Err(VigilError::ConfigError(format!(
                "ingestion.test_size must be in (0, 1), got {}",
                i.test_size
            )));
        }
        if i.target_column.is_empty() {
            return Err(VigilError::ConfigError(
                "ingestion.target_column must not be empty".to_string(),
            ));
        }
        if self.transform.knn_neighbors == 0 {
            return Err(VigilError::ConfigError(
                "transform.knn_neighbors must be at least 1".to_string(),
            ));
        }
        self.trainer.validate()
    }
}

/// Filesystem roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent of every run's artifact directory.
    pub artifact_root: PathBuf,
    /// Root of the versioned model registry.
    pub registry_root: PathBuf,
    /// Root read by the filesystem data source.
    pub data_root: PathBuf,
    /// Output directory for batch predictions.
    pub prediction_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("artifact"),
            registry_root: PathBuf::from("saved_models"),
            data_root: PathBuf::from("data"),
            prediction_dir: PathBuf::from("prediction"),
        }
    }
}

/// Where raw rows come from and how they are split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub database: String,
    pub collection: String,
    /// Fraction of rows held out as the test split.
    pub test_size: f64,
    pub split_seed: u64,
    /// Raw string that denotes a missing value.
    pub missing_marker: String,
    pub target_column: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            database: "HealthCare".to_string(),
            collection: "Thyroid".to_string(),
            test_size: 0.2,
            split_seed: 42,
            missing_marker: "?".to_string(),
            target_column: "binaryClass".to_string(),
        }
    }
}

/// Data-validation gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Columns whose null fraction exceeds this are dropped.
    pub missing_threshold: f64,
    /// Collection (in the ingestion database) holding the reference dataset.
    pub reference_collection: String,
    /// Columns removed from every dataset before gating.
    pub excluded_columns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            missing_threshold: 0.2,
            reference_collection: "reference".to_string(),
            excluded_columns: [
                "TSH measured",
                "T3 measured",
                "TT4 measured",
                "T4U measured",
                "FTI measured",
                "TBG measured",
                "referral source",
                "query on thyroxine",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

/// Transform-stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub knn_neighbors: usize,
    /// Numeric column clamped at `age_max` and median-filled.
    pub age_column: String,
    pub age_max: f64,
    /// Categorical column recoded F/M -> 0/1 and mode-filled.
    pub sex_column: String,
    pub resample_seed: u64,
    pub resample_neighbors: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            knn_neighbors: 7,
            age_column: "age".to_string(),
            age_max: 94.0,
            sex_column: "sex".to_string(),
            resample_seed: 42,
            resample_neighbors: 5,
        }
    }
}

/// Hyperparameters of the boosted-tree learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub n_estimators: usize,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            max_depth: 4,
            learning_rate: 0.05,
            n_estimators: 300,
        }
    }
}

impl std::fmt::Display for Hyperparams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "max_depth={} learning_rate={} n_estimators={}",
            self.max_depth, self.learning_rate, self.n_estimators
        )
    }
}

/// Discrete search grid. Iterated learning_rate-major, n_estimators-minor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchGrid {
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub n_estimators: Vec<usize>,
}

impl Default for SearchGrid {
    fn default() -> Self {
        Self {
            max_depth: (2..10).collect(),
            learning_rate: vec![0.01, 0.03, 0.05],
            n_estimators: vec![100, 200, 300],
        }
    }
}

impl SearchGrid {
    /// All combinations in search order.
    #[must_use]
    pub fn combinations(&self) -> Vec<Hyperparams> {
        let mut out = Vec::with_capacity(
            self.learning_rate.len() * self.max_depth.len() * self.n_estimators.len(),
        );
        for &learning_rate in &self.learning_rate {
            for &max_depth in &self.max_depth {
                for &n_estimators in &self.n_estimators {
                    out.push(Hyperparams {
                        max_depth,
                        learning_rate,
                        n_estimators,
                    });
                }
            }
        }
        out
    }
}

/// Training quality gate and search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Minimum acceptable test-set score.
    pub expected_score: f64,
    /// Maximum acceptable |train - test| score gap.
    pub overfitting_threshold: f64,
    pub cv_folds: usize,
    pub grid: SearchGrid,
    /// Used when the grid is empty or cross-validation cannot run.
    pub fallback: Hyperparams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            expected_score: 0.7,
            overfitting_threshold: 0.1,
            cv_folds: 3,
            grid: SearchGrid::default(),
            fallback: Hyperparams::default(),
        }
    }
}

impl TrainerConfig {
    fn validate(&self) -> Result<(), VigilError> {
        if !(0.0..=1.0).contains(&self.expected_score) {
            return Err(VigilError::ConfigError(format!(
                "trainer.expected_score must be in [0, 1], got {}",
                self.expected_score
            )));
        }
        if !(0.0..=1.0).contains(&self.overfitting_threshold) {
            return Err(VigilError::ConfigError(format!(
                "trainer.overfitting_threshold must be in [0, 1], got {}",
                self.overfitting_threshold
            )));
        }
        if self.cv_folds < 2 {
            return Err(VigilError::ConfigError(format!(
                "trainer.cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if self.fallback.n_estimators == 0 || self.fallback.max_depth == 0 {
            return Err(VigilError::ConfigError(
                "trainer.fallback needs max_depth and n_estimators >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut config = PipelineConfig::default();
        config.validation.missing_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(VigilError::ConfigError(_))
        ));
    }

    #[test]
    fn single_fold_rejected() {
        let mut config = PipelineConfig::default();
        config.trainer.cv_folds = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn grid_order_is_learning_rate_major() {
        let grid = SearchGrid {
            max_depth: vec![2, 3],
            learning_rate: vec![0.1, 0.2],
            n_estimators: vec![10],
        };
        let combos = grid.combinations();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].learning_rate, 0.1);
        assert_eq!(combos[0].max_depth, 2);
        assert_eq!(combos[1].max_depth, 3);
        assert_eq!(combos[2].learning_rate, 0.2);
    }
}
