//! # Pusher
//!
//! Publishes an accepted bundle to the registry and records the new version
//! with the digests of what was written.
//!
//! The bundle is published exactly one version above the champion it was
//! evaluated against. If another run published in between, the evaluation is
//! stale and the publish fails with `VersionConflict`.

use crate::VigilError;
use crate::evaluation::EvaluationOutput;
use crate::registry::{ModelRegistry, RegistryVersion};
use crate::storage::{ArtifactStore, EvaluationArtifact, PusherArtifact, StageKind};
use serde::Serialize;

/// The version an accepted evaluation may publish as.
#[must_use]
pub fn target_version(evaluation: &EvaluationArtifact) -> RegistryVersion {
    evaluation
        .champion_version
        .map_or(RegistryVersion(0), |v| RegistryVersion(v).next())
}

/// Run the pusher stage.
pub fn run<M: Serialize>(
    registry: &ModelRegistry,
    accepted: &EvaluationOutput<M>,
    store: &ArtifactStore,
) -> Result<PusherArtifact, VigilError> {
    // lineage check: only an accepted evaluation may be pushed
    let _: EvaluationArtifact = store.read(StageKind::Pusher)?;

    let version = registry.publish_at(&accepted.bundle, target_version(&accepted.artifact))?;
    let digest = registry.digest(version)?;

    tracing::info!(
        run_id = %store.run().run_id,
        version = version.get(),
        improvement = ?accepted.artifact.improvement,
        model_digest = %digest.model,
        "pushed model"
    );

    let artifact = PusherArtifact {
        version: version.get(),
        version_dir: registry.version_dir(version),
        model_digest: digest.model,
        transformer_digest: digest.transformer,
        target_encoder_digest: digest.target_encoder,
    };
    store.write(artifact.clone())?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelBundle;
    use crate::transform::{TargetEncoder, TransformState};
    use crate::{Frame, Record, TransformConfig};

    fn bundle(tag: u32) -> ModelBundle<u32> {
        let records: Vec<Record> =
            serde_json::from_value(serde_json::json!([{"x": 1.0}, {"x": 2.0}])).expect("records");
        let frame = Frame::from_records(&records, "?").expect("frame");
        ModelBundle {
            model: tag,
            transformer: TransformState::fit(&frame, &TransformConfig::default()).expect("fit"),
            target_encoder: TargetEncoder::fit(&["N", "P"]).expect("encoder"),
        }
    }

    fn accepted(
        artifact_root: &std::path::Path,
        tag: u32,
        champion_version: Option<u64>,
        challenger_score: f64,
    ) -> (ArtifactStore, EvaluationOutput<u32>) {
        let store = ArtifactStore::create(artifact_root).expect("store");
        let artifact = EvaluationArtifact {
            champion_version,
            challenger_score,
            champion_score: champion_version.map(|_| 0.80),
            improvement: champion_version.map(|_| challenger_score - 0.80),
        };
        store.write(artifact.clone()).expect("write evaluation");
        (
            store,
            EvaluationOutput {
                artifact,
                bundle: bundle(tag),
            },
        )
    }

    #[test]
    fn bootstrap_publishes_version_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path().join("registry"));
        let (store, output) = accepted(&dir.path().join("artifact"), 1, None, 0.9);

        let pushed = run(&registry, &output, &store).expect("push");
        assert_eq!(pushed.version, 0);
        assert_eq!(pushed.model_digest.len(), 64);
    }

    #[test]
    fn stale_evaluation_cannot_publish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact_root = dir.path().join("artifact");
        let registry = ModelRegistry::new(dir.path().join("registry"));
        registry.publish(&bundle(0)).expect("champion");

        // both runs beat v0; the weaker one finishes last
        let (store_a, strong) = accepted(&artifact_root, 1, Some(0), 0.95);
        let (store_b, weak) = accepted(&artifact_root, 2, Some(0), 0.85);

        assert_eq!(run(&registry, &strong, &store_a).expect("push a").version, 1);
        assert!(matches!(
            run(&registry, &weak, &store_b),
            Err(VigilError::VersionConflict {
                requested: 1,
                latest: 1
            })
        ));
        assert_eq!(registry.latest_version().expect("latest"), Some(RegistryVersion(1)));
        let served: ModelBundle<u32> = registry.load_bundle(RegistryVersion(1)).expect("load");
        assert_eq!(served.model, 1);
    }
}
