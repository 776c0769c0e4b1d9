//! # Pipeline Scenario Tests
//!
//! End-to-end runs over a synthetic thyroid-like dataset written to a
//! temporary data root.
//!
//! ## Scenarios
//! - S1: Bootstrap publish into an empty registry
//! - S2: Champion-challenger rejection
//! - S3: Gate failures (schema, quality) end the run without publishing

use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;
use vigil_core::{
    BoostedTrees, GradientBoosting, Hyperparams, JsonDirSource, LabeledMatrix, Learner,
    MinorityOversampler, Orchestrator, PipelineConfig, PipelineState, Predictor, Record,
    RegistryVersion, SearchGrid, StageArtifact, VigilError,
};

// =============================================================================
// FIXTURES
// =============================================================================

/// One synthetic row. Class `P` iff TSH > 5; TBG is almost always missing.
fn row(i: usize) -> Value {
    let tsh = (i % 10) as f64 + 0.5;
    let age: Value = if i % 29 == 0 {
        json!("?")
    } else {
        json!((20 + i % 60).to_string())
    };
    let tbg = if i % 20 == 0 { "1.5" } else { "?" };
    let sex = if i % 2 == 0 { "F" } else { "M" };
    let thyroxine = if i % 3 == 0 { "t" } else { "f" };
    let class = if tsh > 5.0 { "P" } else { "N" };
    json!({
        "age": age,
        "sex": sex,
        "on thyroxine": thyroxine,
        "TSH measured": "t",
        "TSH": tsh.to_string(),
        "T3": format!("{:.1}", 1.0 + (i % 7) as f64 * 0.1),
        "TBG": tbg,
        "referral source": "other",
        "binaryClass": class,
    })
}

fn write_collection(root: &Path, name: &str, rows: &[Value]) {
    let dir = root.join("HealthCare");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(
        dir.join(format!("{}.json", name)),
        serde_json::to_vec(rows).expect("json"),
    )
    .expect("write collection");
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        let rows: Vec<Value> = (0..120).map(row).collect();
        write_collection(&ws.data_root(), "Thyroid", &rows);
        write_collection(&ws.data_root(), "reference", &rows[..40]);
        ws
    }

    fn data_root(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.artifact_root = self.dir.path().join("artifact");
        config.paths.registry_root = self.dir.path().join("saved_models");
        config.paths.data_root = self.data_root();
        config.trainer.grid = SearchGrid {
            max_depth: vec![1, 2],
            learning_rate: vec![0.3],
            n_estimators: vec![10],
        };
        config
    }
}

/// Learner whose every model scores each row with the same logit.
struct ConstantLearner(f64);

impl Learner for ConstantLearner {
    type Model = BoostedTrees;

    fn fit(&self, _: &LabeledMatrix, _: &Hyperparams) -> Result<BoostedTrees, VigilError> {
        Ok(BoostedTrees::constant(self.0))
    }
}

fn constant_orchestrator(
    config: PipelineConfig,
    logit: f64,
) -> Orchestrator<JsonDirSource, ConstantLearner, MinorityOversampler> {
    let source = JsonDirSource::new(&config.paths.data_root);
    let resampler = MinorityOversampler::new(5, 42);
    Orchestrator::new(config, source, ConstantLearner(logit), resampler).expect("orchestrator")
}

fn stage_names(outcome_dir: &Path) -> Vec<&'static str> {
    vigil_core::ArtifactStore::open(outcome_dir)
        .expect("open run")
        .records()
        .expect("records")
        .iter()
        .map(|r| r.stage().name())
        .collect()
}

// =============================================================================
// S1: BOOTSTRAP
// =============================================================================

mod s1_bootstrap {
    use super::*;

    /// S1.1: Empty registry, good model -> Done, version 0 published.
    #[test]
    fn first_run_publishes_version_zero() {
        let ws = Workspace::new();
        let orchestrator = Orchestrator::from_config(ws.config()).expect("orchestrator");
        let outcome = orchestrator.run().expect("run");

        assert!(outcome.succeeded(), "run failed: {:?}", outcome.error);
        assert_eq!(outcome.version, Some(RegistryVersion(0)));
        assert_eq!(outcome.trail.last(), Some(&PipelineState::Done));
        assert_eq!(
            orchestrator.registry().versions().expect("versions"),
            vec![RegistryVersion(0)]
        );
        assert_eq!(
            stage_names(&outcome.run.artifact_dir),
            vec![
                "data_ingestion",
                "data_validation",
                "data_transformation",
                "model_trainer",
                "model_evaluation",
                "model_pusher"
            ]
        );
    }

    /// S1.2: The bootstrap evaluation records no champion.
    #[test]
    fn bootstrap_records_no_champion() {
        let ws = Workspace::new();
        let outcome = Orchestrator::from_config(ws.config())
            .expect("orchestrator")
            .run()
            .expect("run");
        let records = vigil_core::ArtifactStore::open(&outcome.run.artifact_dir)
            .expect("open")
            .records()
            .expect("records");
        let evaluation = records
            .iter()
            .find_map(|r| match r {
                StageArtifact::Evaluation(e) => Some(e.clone()),
                _ => None,
            })
            .expect("evaluation record");
        assert_eq!(evaluation.champion_version, None);
        assert_eq!(evaluation.improvement, None);
    }

    /// S1.3: The sparse TBG column is dropped and reported.
    #[test]
    fn sparse_column_reported_under_drop_key() {
        let ws = Workspace::new();
        let outcome = Orchestrator::from_config(ws.config())
            .expect("orchestrator")
            .run()
            .expect("run");
        let report_path = outcome
            .run
            .artifact_dir
            .join("data_validation")
            .join("report.json");
        let report: Value =
            serde_json::from_slice(&std::fs::read(report_path).expect("report")).expect("json");

        assert_eq!(report["train.dropped_columns"], json!(["TBG"]));
        assert_eq!(report["reference.dropped_columns"], json!(["TBG"]));
        assert_eq!(report["train.missing_columns"], json!([]));
        assert!(report["test.data_drift"].is_object());
        assert!(
            report["train.excluded_columns"]
                .as_array()
                .expect("excluded")
                .contains(&json!("referral source"))
        );
    }

    /// S1.4: The published bundle serves predictions.
    #[test]
    fn published_bundle_serves_predictions() {
        let ws = Workspace::new();
        let config = ws.config();
        let orchestrator = Orchestrator::from_config(config.clone()).expect("orchestrator");
        assert!(orchestrator.run().expect("run").succeeded());

        let predictor: Predictor<BoostedTrees> =
            Predictor::latest(orchestrator.registry(), "?").expect("predictor");
        let high: Record = serde_json::from_value(row(9)).expect("record");
        let low: Record = serde_json::from_value(row(1)).expect("record");
        assert_eq!(predictor.predict(&high).expect("predict"), "P");
        assert_eq!(predictor.predict(&low).expect("predict"), "N");
        assert!(!predictor.feature_names().contains(&"TBG".to_string()));
    }
}

// =============================================================================
// S2: CHAMPION-CHALLENGER
// =============================================================================

mod s2_champion_challenger {
    use super::*;

    fn publish_champion(ws: &Workspace) {
        let outcome = Orchestrator::from_config(ws.config())
            .expect("orchestrator")
            .run()
            .expect("run");
        assert!(outcome.succeeded(), "champion run failed: {:?}", outcome.error);
    }

    /// S2.1: A weaker challenger is rejected and nothing is published.
    #[test]
    fn weaker_challenger_rejected() {
        let ws = Workspace::new();
        publish_champion(&ws);

        let mut config = ws.config();
        config.trainer.expected_score = 0.5;
        let orchestrator = constant_orchestrator(config, 5.0);
        let outcome = orchestrator.run().expect("run");

        assert_eq!(outcome.state, PipelineState::Failed);
        assert_eq!(
            outcome.trail[outcome.trail.len() - 2..],
            [PipelineState::Evaluate, PipelineState::Failed]
        );
        let error = outcome.error.expect("error");
        assert!(matches!(
            error,
            VigilError::StageFailed {
                stage: "model_evaluation",
                ..
            }
        ));
        assert!(matches!(
            error.root_cause(),
            VigilError::RegressionError { challenger, champion } if challenger < champion
        ));
        assert_eq!(
            orchestrator.registry().versions().expect("versions"),
            vec![RegistryVersion(0)]
        );
    }

    /// S2.2: Retraining an identical model ties the champion and is rejected.
    #[test]
    fn equal_challenger_rejected() {
        let ws = Workspace::new();
        publish_champion(&ws);

        let orchestrator = Orchestrator::from_config(ws.config()).expect("orchestrator");
        let outcome = orchestrator.run().expect("run");
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(
            outcome.error.as_ref().map(VigilError::root_cause),
            Some(VigilError::RegressionError { .. })
        ));
        assert_eq!(orchestrator.registry().latest_version().expect("latest"), Some(RegistryVersion(0)));

        let status = vigil_core::ArtifactStore::open(&outcome.run.artifact_dir)
            .expect("open")
            .status()
            .expect("status")
            .expect("present");
        assert_eq!(status.state, "Failed");
        assert!(status.error.expect("error").contains("Regression"));
    }

    /// S2.3: A rejected run keeps the records of the stages that succeeded.
    #[test]
    fn rejected_run_has_no_pusher_record() {
        let ws = Workspace::new();
        publish_champion(&ws);

        let mut config = ws.config();
        config.trainer.expected_score = 0.5;
        let outcome = constant_orchestrator(config, 5.0).run().expect("run");
        let stages = stage_names(&outcome.run.artifact_dir);
        assert_eq!(stages.last(), Some(&"model_trainer"));
    }

    /// S2.4: The weaker challenger does not change what is served.
    #[test]
    fn champion_keeps_serving() {
        let ws = Workspace::new();
        publish_champion(&ws);
        let before = std::fs::read(
            ws.dir
                .path()
                .join("saved_models/0/model/model.pkl"),
        )
        .expect("model");

        let mut config = ws.config();
        config.trainer.expected_score = 0.5;
        let _ = constant_orchestrator(config, 5.0).run().expect("run");

        let after = std::fs::read(
            ws.dir
                .path()
                .join("saved_models/0/model/model.pkl"),
        )
        .expect("model");
        assert_eq!(before, after);
    }
}

// =============================================================================
// S3: GATE FAILURES
// =============================================================================

mod s3_gate_failures {
    use super::*;

    /// S3.1: A reference column absent from the data fails validation after the report is written.
    #[test]
    fn missing_reference_column_is_schema_error() {
        let ws = Workspace::new();
        let mut reference: Vec<Value> = (0..40).map(row).collect();
        for r in &mut reference {
            r["FTI"] = json!("100");
        }
        write_collection(&ws.data_root(), "reference", &reference);

        let orchestrator = Orchestrator::from_config(ws.config()).expect("orchestrator");
        let outcome = orchestrator.run().expect("run");

        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(
            outcome.error.as_ref().map(VigilError::root_cause),
            Some(VigilError::SchemaError(cols)) if cols == &vec!["FTI".to_string()]
        ));
        let report_path = outcome
            .run
            .artifact_dir
            .join("data_validation")
            .join("report.json");
        let report: Value =
            serde_json::from_slice(&std::fs::read(report_path).expect("report")).expect("json");
        assert_eq!(report["train.missing_columns"], json!(["FTI"]));
        assert!(report.get("train.data_drift").is_none());
        assert!(orchestrator.registry().versions().expect("versions").is_empty());
    }

    /// S3.2: A model below the expected score fails the train stage.
    #[test]
    fn low_score_fails_quality_gate() {
        let ws = Workspace::new();
        let orchestrator = constant_orchestrator(ws.config(), -5.0);
        let outcome = orchestrator.run().expect("run");

        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(
            outcome.error,
            Some(VigilError::StageFailed {
                stage: "model_trainer",
                ..
            })
        ));
        assert!(orchestrator.registry().versions().expect("versions").is_empty());
    }

    /// S3.3: An empty source collection fails ingestion.
    #[test]
    fn empty_source_fails_ingestion() {
        let ws = Workspace::new();
        write_collection(&ws.data_root(), "Thyroid", &[]);
        let outcome = Orchestrator::from_config(ws.config())
            .expect("orchestrator")
            .run()
            .expect("run");
        assert_eq!(outcome.trail, vec![PipelineState::Ingest, PipelineState::Failed]);
        assert!(matches!(
            outcome.error.as_ref().map(VigilError::root_cause),
            Some(VigilError::DataQualityError(_))
        ));
    }

    /// S3.4: A corrupted registry fails evaluation rather than being overwritten.
    #[test]
    fn corrupted_registry_fails_evaluation() {
        let ws = Workspace::new();
        std::fs::create_dir_all(ws.dir.path().join("saved_models").join("v1")).expect("mkdir");
        let outcome = Orchestrator::from_config(ws.config())
            .expect("orchestrator")
            .run()
            .expect("run");
        assert!(matches!(
            outcome.error.as_ref().map(VigilError::root_cause),
            Some(VigilError::RegistryCorruptionError(_))
        ));
        assert!(
            ws.dir
                .path()
                .join("saved_models")
                .join("v1")
                .read_dir()
                .expect("read_dir")
                .next()
                .is_none()
        );
    }
}

#[test]
fn gradient_boosting_is_the_default_learner() {
    let ws = Workspace::new();
    let orchestrator = Orchestrator::from_config(ws.config()).expect("orchestrator");
    let _: &Orchestrator<JsonDirSource, GradientBoosting, MinorityOversampler> = &orchestrator;
    assert_eq!(orchestrator.config().ingestion.target_column, "binaryClass");
}
