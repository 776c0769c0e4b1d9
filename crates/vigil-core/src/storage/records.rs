//! # Stage Records
//!
//! One immutable record per pipeline stage, describing where that stage put
//! its outputs and which scores it measured. Records are written once and
//! read by downstream stages through [`super::ArtifactStore::read`].

use crate::Hyperparams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// STAGE KIND
// =============================================================================

/// The six artifact-producing stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Ingestion,
    Validation,
    Transformation,
    Training,
    Evaluation,
    Pusher,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 6] = [
        StageKind::Ingestion,
        StageKind::Validation,
        StageKind::Transformation,
        StageKind::Training,
        StageKind::Evaluation,
        StageKind::Pusher,
    ];

    /// Directory and record key of the stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Ingestion => "data_ingestion",
            StageKind::Validation => "data_validation",
            StageKind::Transformation => "data_transformation",
            StageKind::Training => "model_trainer",
            StageKind::Evaluation => "model_evaluation",
            StageKind::Pusher => "model_pusher",
        }
    }

    /// Check if this stage runs strictly before `other`.
    #[must_use]
    pub fn runs_before(&self, other: StageKind) -> bool {
        *self < other
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Output of the ingestion stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionArtifact {
    pub feature_store_path: PathBuf,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub train_rows: u64,
    pub test_rows: u64,
}

/// Output of the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationArtifact {
    pub report_path: PathBuf,
    pub valid_train_path: PathBuf,
    pub valid_test_path: PathBuf,
}

/// Output of the transformation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationArtifact {
    pub transformer_path: PathBuf,
    pub target_encoder_path: PathBuf,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub feature_names: Vec<String>,
}

/// Output of the training stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub model_path: PathBuf,
    pub train_score: f64,
    pub test_score: f64,
    pub params: Hyperparams,
}

/// Output of the evaluation stage. Only written for accepted challengers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationArtifact {
    pub champion_version: Option<u64>,
    pub challenger_score: f64,
    pub champion_score: Option<f64>,
    /// `challenger - champion`; `None` in the bootstrap case.
    pub improvement: Option<f64>,
}

/// Output of the pusher stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherArtifact {
    pub version: u64,
    pub version_dir: PathBuf,
    pub model_digest: String,
    pub transformer_digest: String,
    pub target_encoder_digest: String,
}

/// Any stage record, as stored in the run database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageArtifact {
    Ingestion(IngestionArtifact),
    Validation(ValidationArtifact),
    Transformation(TransformationArtifact),
    Training(TrainingArtifact),
    Evaluation(EvaluationArtifact),
    Pusher(PusherArtifact),
}

impl StageArtifact {
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            StageArtifact::Ingestion(_) => StageKind::Ingestion,
            StageArtifact::Validation(_) => StageKind::Validation,
            StageArtifact::Transformation(_) => StageKind::Transformation,
            StageArtifact::Training(_) => StageKind::Training,
            StageArtifact::Evaluation(_) => StageKind::Evaluation,
            StageArtifact::Pusher(_) => StageKind::Pusher,
        }
    }
}

/// A concrete record type bound to the stage that produces it.
pub trait StageRecord: Sized {
    /// The producing stage.
    const STAGE: StageKind;

    fn wrap(self) -> StageArtifact;

    fn unwrap_from(artifact: StageArtifact) -> Option<Self>;
}

macro_rules! stage_record {
    ($ty:ident, $variant:ident) => {
        impl StageRecord for $ty {
            const STAGE: StageKind = StageKind::$variant;

            fn wrap(self) -> StageArtifact {
                StageArtifact::$variant(self)
            }

            fn unwrap_from(artifact: StageArtifact) -> Option<Self> {
                match artifact {
                    StageArtifact::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

stage_record!(IngestionArtifact, Ingestion);
stage_record!(ValidationArtifact, Validation);
stage_record!(TransformationArtifact, Transformation);
stage_record!(TrainingArtifact, Training);
stage_record!(EvaluationArtifact, Evaluation);
stage_record!(PusherArtifact, Pusher);
