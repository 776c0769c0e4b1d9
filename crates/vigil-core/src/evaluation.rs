//! # Evaluation Gate
//!
//! Champion-challenger comparison. The freshly trained bundle (challenger)
//! and the latest published bundle (champion) are both run end-to-end on the
//! same held-out rows, each through its own fitted transformer and encoder,
//! so each model sees exactly the feature set it was fitted on.
//!
//! Promotion rule: accept iff `challenger > champion` strictly. Equal scores
//! are rejected. An empty registry accepts without comparing.

use crate::registry::{ModelBundle, ModelRegistry, RegistryVersion};
use crate::storage::{
    ArtifactStore, EvaluationArtifact, IngestionArtifact, StageKind, TrainingArtifact,
    TransformationArtifact,
};
use crate::train::{Classifier, TrainMetrics, f1_score};
use crate::transform::split_target;
use crate::{Frame, VigilError, load_object};
use serde::de::DeserializeOwned;

/// Promotion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

/// Strict comparison; `None` (no champion) is always `Accepted`.
#[must_use]
pub fn decide(challenger: f64, champion: Option<f64>) -> Decision {
    match champion {
        None => Decision::Accepted,
        Some(champion) if challenger > champion => Decision::Accepted,
        Some(_) => Decision::Rejected,
    }
}

/// Decision plus the scores it was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub decision: Decision,
    pub champion_version: Option<RegistryVersion>,
    pub challenger_score: f64,
    pub champion_score: Option<f64>,
}

impl Verdict {
    /// `challenger - champion`, when there was a champion.
    #[must_use]
    pub fn improvement(&self) -> Option<f64> {
        self.champion_score.map(|c| self.challenger_score - c)
    }
}

/// Score a bundle end-to-end on labelled raw rows.
pub fn score_bundle<M: Classifier>(
    bundle: &ModelBundle<M>,
    held_out: &Frame,
    target_column: &str,
) -> Result<f64, VigilError> {
    let (features, labels) = split_target(held_out, target_column)?;
    let truth = bundle.target_encoder.encode_all(&labels)?;
    let x = bundle.transformer.apply(&features)?;
    Ok(f1_score(&truth, &bundle.model.predict(&x)))
}

/// Compares a challenger against the registry's latest bundle.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationGate<'a> {
    registry: &'a ModelRegistry,
    target_column: &'a str,
}

impl<'a> EvaluationGate<'a> {
    #[must_use]
    pub fn new(registry: &'a ModelRegistry, target_column: &'a str) -> Self {
        Self {
            registry,
            target_column,
        }
    }

    pub fn evaluate<M: Classifier + DeserializeOwned>(
        &self,
        challenger: &ModelBundle<M>,
        challenger_metrics: &TrainMetrics,
        held_out: &Frame,
    ) -> Result<Verdict, VigilError> {
        let Some(champion_version) = self.registry.latest_version()? else {
            tracing::info!(
                test_score = challenger_metrics.test_score,
                "registry empty, accepting first model"
            );
            return Ok(Verdict {
                decision: Decision::Accepted,
                champion_version: None,
                challenger_score: challenger_metrics.test_score,
                champion_score: None,
            });
        };

        let champion: ModelBundle<M> = self.registry.load_bundle(champion_version)?;
        let champion_score = score_bundle(&champion, held_out, self.target_column)?;
        let challenger_score = score_bundle(challenger, held_out, self.target_column)?;
        let decision = decide(challenger_score, Some(champion_score));

        tracing::info!(
            champion_version = champion_version.get(),
            champion_score,
            challenger_score,
            trained_test_score = challenger_metrics.test_score,
            ?decision,
            "compared challenger with champion"
        );
        Ok(Verdict {
            decision,
            champion_version: Some(champion_version),
            challenger_score,
            champion_score: Some(champion_score),
        })
    }
}

/// Accepted challenger ready to publish.
#[derive(Debug, Clone)]
pub struct EvaluationOutput<M> {
    pub artifact: EvaluationArtifact,
    pub bundle: ModelBundle<M>,
}

/// Run the evaluation stage. A rejected challenger fails with `RegressionError`.
pub fn run<M: Classifier + DeserializeOwned>(
    registry: &ModelRegistry,
    target_column: &str,
    store: &ArtifactStore,
) -> Result<EvaluationOutput<M>, VigilError> {
    let ingestion: IngestionArtifact = store.read(StageKind::Evaluation)?;
    let transformation: TransformationArtifact = store.read(StageKind::Evaluation)?;
    let training: TrainingArtifact = store.read(StageKind::Evaluation)?;

    let held_out: Frame = load_object(&ingestion.test_path)?;
    let bundle = ModelBundle {
        model: load_object::<M>(&training.model_path)?,
        transformer: load_object(&transformation.transformer_path)?,
        target_encoder: load_object(&transformation.target_encoder_path)?,
    };
    let metrics = TrainMetrics {
        train_score: training.train_score,
        test_score: training.test_score,
    };

    let verdict = EvaluationGate::new(registry, target_column).evaluate(&bundle, &metrics, &held_out)?;
    if verdict.decision == Decision::Rejected {
        return Err(VigilError::RegressionError {
            challenger: verdict.challenger_score,
            champion: verdict.champion_score.unwrap_or_default(),
        });
    }

    let artifact = EvaluationArtifact {
        champion_version: verdict.champion_version.map(|v| v.get()),
        challenger_score: verdict.challenger_score,
        champion_score: verdict.champion_score,
        improvement: verdict.improvement(),
    };
    store.write(artifact.clone())?;
    Ok(EvaluationOutput { artifact, bundle })
}
