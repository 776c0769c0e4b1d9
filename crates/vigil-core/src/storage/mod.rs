//! # Storage
//!
//! Run-scoped persistence: the per-run artifact directory with its redb
//! record store, and the typed stage records kept in it.

pub mod artifact_store;
pub mod records;

pub use artifact_store::{ArtifactStore, PipelineRun, RunStatus};
pub use records::{
    EvaluationArtifact, IngestionArtifact, PusherArtifact, StageArtifact, StageKind, StageRecord,
    TrainingArtifact, TransformationArtifact, ValidationArtifact,
};
