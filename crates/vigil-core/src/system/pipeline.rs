//! # Pipeline Orchestration
//!
//! A run moves through strictly ordered states:
//!
//! | State | Stage record | Fails with |
//! |-------|--------------|------------|
//! | Ingest | `data_ingestion` | `DataQualityError`, `IoError` |
//! | Validate | `data_validation` | `SchemaError`, `DataQualityError` |
//! | Transform | `data_transformation` | `SchemaError`, `UnknownLabel` |
//! | Train | `model_trainer` | `QualityGateError` |
//! | Evaluate | `model_evaluation` | `RegressionError`, `RegistryCorruptionError` |
//! | Publish | `model_pusher` | `VersionConflict`, `IoError` |
//! | Done | - | - |
//!
//! Any stage error moves the run straight to `Failed`. There is no partial
//! continuation and no retry at this level; the error is wrapped with the
//! stage name and run id and recorded in the run's artifact store. No model
//! is published on any failure path because publishing is the last stage.

use crate::evaluation::{self, EvaluationOutput};
use crate::registry::{ModelRegistry, RegistryVersion};
use crate::storage::{ArtifactStore, PipelineRun, RunStatus, StageKind};
use crate::train::{GradientBoosting, Learner};
use crate::transform::{MinorityOversampler, Resampler};
use crate::{
    DataSource, JsonDirSource, PipelineConfig, VigilError, ingestion, pusher, train, transform,
    validation,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// STATE MACHINE
// =============================================================================

/// States of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Ingest,
    Validate,
    Transform,
    Train,
    Evaluate,
    Publish,
    Done,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Ingest => "Ingest",
            PipelineState::Validate => "Validate",
            PipelineState::Transform => "Transform",
            PipelineState::Train => "Train",
            PipelineState::Evaluate => "Evaluate",
            PipelineState::Publish => "Publish",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
        }
    }

    /// The state reached when this state's stage succeeds.
    ///
    /// Terminal states map to themselves.
    #[must_use]
    pub fn next(&self) -> PipelineState {
        match self {
            PipelineState::Ingest => PipelineState::Validate,
            PipelineState::Validate => PipelineState::Transform,
            PipelineState::Transform => PipelineState::Train,
            PipelineState::Train => PipelineState::Evaluate,
            PipelineState::Evaluate => PipelineState::Publish,
            PipelineState::Publish | PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// The stage executed in this state.
    #[must_use]
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            PipelineState::Ingest => Some(StageKind::Ingestion),
            PipelineState::Validate => Some(StageKind::Validation),
            PipelineState::Transform => Some(StageKind::Transformation),
            PipelineState::Train => Some(StageKind::Training),
            PipelineState::Evaluate => Some(StageKind::Evaluation),
            PipelineState::Publish => Some(StageKind::Pusher),
            PipelineState::Done | PipelineState::Failed => None,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// RUN OUTCOME
// =============================================================================

/// Result of one orchestrated run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: PipelineRun,
    /// `Done` or `Failed`.
    pub state: PipelineState,
    /// Every state entered, in order, ending with `state`.
    pub trail: Vec<PipelineState>,
    /// The wrapped stage error when `state` is `Failed`.
    pub error: Option<VigilError>,
    /// The version published when `state` is `Done`.
    pub version: Option<RegistryVersion>,
}

impl RunOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// Hand-off between the evaluate and publish states.
struct RunContext<M> {
    accepted: Option<EvaluationOutput<M>>,
    version: Option<RegistryVersion>,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives pipeline runs with explicitly injected collaborators.
#[derive(Debug)]
pub struct Orchestrator<S, L, R> {
    config: PipelineConfig,
    source: S,
    learner: L,
    resampler: R,
    registry: ModelRegistry,
}

impl Orchestrator<JsonDirSource, GradientBoosting, MinorityOversampler> {
    /// Orchestrator with the filesystem source, boosted trees and
    /// minority oversampling, all configured from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, VigilError> {
        let source = JsonDirSource::new(&config.paths.data_root);
        let resampler = MinorityOversampler::new(
            config.transform.resample_neighbors,
            config.transform.resample_seed,
        );
        Self::new(config, source, GradientBoosting, resampler)
    }
}

impl<S: DataSource, L: Learner, R: Resampler> Orchestrator<S, L, R> {
    pub fn new(
        config: PipelineConfig,
        source: S,
        learner: L,
        resampler: R,
    ) -> Result<Self, VigilError> {
        config.validate()?;
        let registry = ModelRegistry::new(&config.paths.registry_root);
        Ok(Self {
            config,
            source,
            learner,
            resampler,
            registry,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Execute one run to `Done` or `Failed`.
    ///
    /// Returns `Err` when the run directory cannot be created or the final
    /// status cannot be recorded in it; every stage failure is otherwise
    /// reported through [`RunOutcome`].
    pub fn run(&self) -> Result<RunOutcome, VigilError> {
        let store = ArtifactStore::create(&self.config.paths.artifact_root)?;
        let run = store.run().clone();
        let mut ctx = RunContext {
            accepted: None,
            version: None,
        };
        let mut state = PipelineState::Ingest;
        let mut trail = vec![state];

        while !state.is_terminal() {
            if let Err(e) = record_status(&store, state, None) {
                tracing::warn!(run_id = %run.run_id, %state, error = %e, "could not record run status");
            }
            tracing::info!(run_id = %run.run_id, %state, "entering state");

            if let Err(error) = self.step(state, &store, &mut ctx) {
                let stage = state.stage().map_or("pipeline", |s| s.name());
                let error = VigilError::StageFailed {
                    stage,
                    run_id: run.run_id.clone(),
                    source: Box::new(error),
                };
                tracing::error!(run_id = %run.run_id, stage, error = %error, "run failed");
                trail.push(PipelineState::Failed);
                record_status(&store, PipelineState::Failed, Some(error.to_string())).map_err(
                    |e| {
                        VigilError::IoError(format!(
                            "could not record failure of run {} ({}): {}",
                            run.run_id, error, e
                        ))
                    },
                )?;
                return Ok(RunOutcome {
                    run,
                    state: PipelineState::Failed,
                    trail,
                    error: Some(error),
                    version: None,
                });
            }
            state = state.next();
            trail.push(state);
        }

        record_status(&store, state, None)?;
        tracing::info!(run_id = %run.run_id, version = ?ctx.version.map(|v| v.get()), "run complete");
        Ok(RunOutcome {
            run,
            state,
            trail,
            error: None,
            version: ctx.version,
        })
    }

    fn step(
        &self,
        state: PipelineState,
        store: &ArtifactStore,
        ctx: &mut RunContext<L::Model>,
    ) -> Result<(), VigilError> {
        let config = &self.config;
        let target = config.ingestion.target_column.as_str();
        match state {
            PipelineState::Ingest => {
                ingestion::run(&self.source, &config.ingestion, store)?;
            }
            PipelineState::Validate => {
                validation::run(&self.source, &config.ingestion, &config.validation, store)?;
            }
            PipelineState::Transform => {
                transform::run(&config.transform, target, &self.resampler, store)?;
            }
            PipelineState::Train => {
                train::run(&self.learner, &config.trainer, store)?;
            }
            PipelineState::Evaluate => {
                ctx.accepted = Some(evaluation::run::<L::Model>(&self.registry, target, store)?);
            }
            PipelineState::Publish => {
                let accepted =
                    ctx.accepted
                        .take()
                        .ok_or(VigilError::ArtifactOrderViolation {
                            reader: StageKind::Pusher.name(),
                            producer: StageKind::Evaluation.name(),
                        })?;
                let pushed = pusher::run(&self.registry, &accepted, store)?;
                ctx.version = Some(RegistryVersion(pushed.version));
            }
            PipelineState::Done | PipelineState::Failed => {}
        }
        Ok(())
    }
}

fn record_status(
    store: &ArtifactStore,
    state: PipelineState,
    error: Option<String>,
) -> Result<(), VigilError> {
    store.set_status(&RunStatus {
        state: state.name().to_string(),
        error,
    })
}
