//! # vigil-core
//!
//! The training and promotion pipeline for Vigil - THE LOGIC.
//!
//! This crate sequences one pipeline run through
//! `Ingest -> Validate -> Transform -> Train -> Evaluate -> Publish`,
//! gating each transition and persisting every stage's output in a run-owned
//! artifact directory. Models are promoted into a monotonically versioned
//! registry only when they strictly beat the current champion.
//!
//! ## Architectural Constraints
//!
//! - Every collaborator (data source, learner, resampler, registry) is
//!   passed in explicitly; there are no module-level singletons
//! - A stage reads only the artifacts of stages that ran before it
//! - The registry publish is the only mutation shared between runs
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod evaluation;
pub mod formats;
pub mod frame;
pub mod ingestion;
pub mod primitives;
pub mod pusher;
pub mod registry;
pub mod serving;
pub mod source;
pub mod storage;
pub mod system;
pub mod train;
pub mod transform;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Cell, DType, Record, VigilError};

// =============================================================================
// RE-EXPORTS: Data & Configuration
// =============================================================================

pub use config::{
    Hyperparams, IngestionConfig, PathsConfig, PipelineConfig, SearchGrid, TrainerConfig,
    TransformConfig, ValidationConfig,
};
pub use frame::{Column, Frame, LabeledMatrix, Matrix};
pub use source::{DataSource, JsonDirSource};

// =============================================================================
// RE-EXPORTS: Formats & Storage
// =============================================================================

pub use formats::{
    ObjectHeader, load_object, object_from_bytes, object_to_bytes, save_object, write_document,
};
pub use storage::{
    ArtifactStore, EvaluationArtifact, IngestionArtifact, PipelineRun, PusherArtifact,
    RunStatus, StageArtifact, StageKind, StageRecord, TrainingArtifact, TransformationArtifact,
    ValidationArtifact,
};

// =============================================================================
// RE-EXPORTS: Stages
// =============================================================================

pub use evaluation::{Decision, EvaluationGate, decide};
pub use ingestion::{IngestionOutput, split_train_test};
pub use registry::{BundleDigest, Component, ModelBundle, ModelRegistry, RegistryVersion};
pub use train::{
    BoostedTrees, Classifier, GradientBoosting, Learner, TrainMetrics, TrainOutcome, f1_score,
};
pub use transform::{
    KnnImputer, MinorityOversampler, NoResampling, Resampler, TargetEncoder, TransformState,
};
pub use validation::{ColumnDrift, Finding, GateOutcome, ValidationGate, ValidationReport};

// =============================================================================
// RE-EXPORTS: System & Serving
// =============================================================================

pub use serving::{BatchOutput, Predictor, predict_file};
pub use system::{Orchestrator, PipelineState, RunOutcome};
