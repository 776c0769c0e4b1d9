//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use std::path::{Path, PathBuf};
use vigil_core::{
    ArtifactStore, BoostedTrees, JsonDirSource, ModelRegistry, Orchestrator, PipelineConfig,
    Predictor, Record, RegistryVersion, RunOutcome, StageArtifact, ValidationGate, VigilError,
    predict_file, validation::load_reference,
};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of a batch prediction input (100 MB).
const MAX_PREDICT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Canonicalize an input path and check it is a regular file within the size limit.
fn validate_input_file(path: &Path, max_size: u64) -> Result<PathBuf, VigilError> {
    let canonical = path.canonicalize().map_err(|e| {
        VigilError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(VigilError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    let len = std::fs::metadata(&canonical)?.len();
    if len > max_size {
        return Err(VigilError::DataQualityError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            len, max_size
        )));
    }
    Ok(canonical)
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// TRAIN COMMAND
// =============================================================================

/// Run the pipeline once. Exit code 1 when the run fails.
pub fn cmd_train(config: PipelineConfig, json_mode: bool) -> Result<i32, VigilError> {
    let orchestrator = Orchestrator::from_config(config)?;
    let outcome = orchestrator.run()?;
    print_outcome(&outcome, json_mode);
    Ok(if outcome.succeeded() { 0 } else { 1 })
}

fn print_outcome(outcome: &RunOutcome, json_mode: bool) {
    let trail: Vec<&str> = outcome.trail.iter().map(|s| s.name()).collect();
    let error = outcome.error.as_ref().map(ToString::to_string);
    let version = outcome.version.map(|v| v.get());

    if json_mode {
        print_json(&serde_json::json!({
            "run_id": outcome.run.run_id,
            "artifact_dir": outcome.run.artifact_dir.to_string_lossy(),
            "state": outcome.state.name(),
            "trail": trail,
            "version": version,
            "error": error,
        }));
        return;
    }

    println!("Run {}", outcome.run.run_id);
    println!("==================");
    println!("Artifacts: {}", outcome.run.artifact_dir.display());
    println!("States:    {}", trail.join(" -> "));
    match (version, error) {
        (Some(v), _) => println!("Published: version {}", v),
        (None, Some(e)) => println!("Failed:    {}", e),
        (None, None) => println!("Published: nothing"),
    }
}

// =============================================================================
// PREDICT COMMANDS
// =============================================================================

fn latest_predictor(config: &PipelineConfig) -> Result<Predictor<BoostedTrees>, VigilError> {
    let registry = ModelRegistry::new(&config.paths.registry_root);
    Predictor::latest(&registry, &config.ingestion.missing_marker)
}

/// Predict one raw record given as a JSON object.
pub fn cmd_predict_record(
    config: &PipelineConfig,
    json_mode: bool,
    record: &str,
) -> Result<(), VigilError> {
    let record: Record = serde_json::from_str(record)
        .map_err(|e| VigilError::InvalidRecord(format!("record is not a JSON object: {}", e)))?;
    let predictor = latest_predictor(config)?;
    let label = predictor.predict(&record)?;

    if json_mode {
        print_json(&serde_json::json!({
            "version": predictor.version().get(),
            "prediction": label,
        }));
    } else {
        println!("{}", label);
    }
    Ok(())
}

/// Predict every record of a JSON array file into the prediction directory.
pub fn cmd_predict_file(
    config: &PipelineConfig,
    json_mode: bool,
    input: &Path,
) -> Result<(), VigilError> {
    let input = validate_input_file(input, MAX_PREDICT_FILE_SIZE)?;
    let predictor = latest_predictor(config)?;
    let source = JsonDirSource::new(&config.paths.data_root);
    let (reference, _) = load_reference(&source, &config.ingestion, &config.validation)?;

    let out = predict_file(
        &predictor,
        &input,
        &reference,
        &ValidationGate::new(config.validation.missing_threshold),
        &config.validation.excluded_columns,
        &config.paths.prediction_dir,
    )?;

    if json_mode {
        print_json(&serde_json::json!({
            "version": predictor.version().get(),
            "rows": out.rows,
            "output": out.output_path.to_string_lossy(),
            "report": out.report_path.to_string_lossy(),
        }));
    } else {
        println!("Predicted {} rows with version {}", out.rows, predictor.version());
        println!("Output: {}", out.output_path.display());
        println!("Report: {}", out.report_path.display());
    }
    Ok(())
}

// =============================================================================
// REGISTRY COMMANDS
// =============================================================================

/// List published versions, oldest first.
pub fn cmd_registry_list(config: &PipelineConfig, json_mode: bool) -> Result<(), VigilError> {
    let registry = ModelRegistry::new(&config.paths.registry_root);
    let versions: Vec<u64> = registry.versions()?.iter().map(|v| v.get()).collect();

    if json_mode {
        print_json(&serde_json::json!({ "versions": versions }));
        return Ok(());
    }
    if versions.is_empty() {
        println!("No published versions in {}", registry.root().display());
    }
    for v in versions {
        println!("{}", v);
    }
    Ok(())
}

/// Show the newest published version.
pub fn cmd_registry_latest(config: &PipelineConfig, json_mode: bool) -> Result<(), VigilError> {
    let registry = ModelRegistry::new(&config.paths.registry_root);
    let latest = registry.latest_version()?.ok_or(VigilError::NoPublishedModel)?;
    cmd_registry_show(config, json_mode, latest.get())
}

/// Show the member digests of one version.
pub fn cmd_registry_show(
    config: &PipelineConfig,
    json_mode: bool,
    version: u64,
) -> Result<(), VigilError> {
    let registry = ModelRegistry::new(&config.paths.registry_root);
    let digest = registry.digest(RegistryVersion(version))?;

    if json_mode {
        let value = serde_json::to_value(&digest)
            .map_err(|e| VigilError::SerializationError(e.to_string()))?;
        print_json(&value);
        return Ok(());
    }

    println!("Version {}", digest.version);
    println!("==================");
    println!("Directory:      {}", registry.version_dir(digest.version).display());
    println!("Model:          {}", digest.model);
    println!("Transformer:    {}", digest.transformer);
    println!("Target encoder: {}", digest.target_encoder);
    Ok(())
}

// =============================================================================
// RUNS COMMAND
// =============================================================================

/// Print a run's stage records and status.
pub fn cmd_runs_show(
    config: &PipelineConfig,
    json_mode: bool,
    run_id: &str,
) -> Result<(), VigilError> {
    if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
        return Err(VigilError::ConfigError(format!("invalid run id '{}'", run_id)));
    }
    let store = ArtifactStore::open(&config.paths.artifact_root.join(run_id))?;
    let records = store.records()?;
    let status = store.status()?;

    if json_mode {
        let records: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                Ok(serde_json::json!({
                    "stage": r.stage().name(),
                    "record": serde_json::to_value(r)
                        .map_err(|e| VigilError::SerializationError(e.to_string()))?,
                }))
            })
            .collect::<Result<_, VigilError>>()?;
        print_json(&serde_json::json!({
            "run_id": store.run().run_id,
            "started_at": store.run().started_at,
            "state": status.as_ref().map(|s| s.state.clone()),
            "error": status.as_ref().and_then(|s| s.error.clone()),
            "records": records,
        }));
        return Ok(());
    }

    println!("Run {}", store.run().run_id);
    println!("==================");
    println!("Started: {}", store.run().started_at);
    match &status {
        Some(s) => println!("State:   {}", s.state),
        None => println!("State:   unknown"),
    }
    if let Some(error) = status.as_ref().and_then(|s| s.error.as_deref()) {
        println!("Error:   {}", error);
    }
    println!();
    for record in &records {
        println!("{:<22} {}", record.stage().name(), describe(record));
    }
    Ok(())
}

fn describe(record: &StageArtifact) -> String {
    match record {
        StageArtifact::Ingestion(a) => format!("train={} test={}", a.train_rows, a.test_rows),
        StageArtifact::Validation(a) => format!("report={}", a.report_path.display()),
        StageArtifact::Transformation(a) => format!("features={}", a.feature_names.len()),
        StageArtifact::Training(a) => format!(
            "train_f1={:.4} test_f1={:.4} ({})",
            a.train_score, a.test_score, a.params
        ),
        StageArtifact::Evaluation(a) => match (a.champion_version, a.champion_score) {
            (Some(v), Some(s)) => format!(
                "challenger={:.4} champion v{}={:.4}",
                a.challenger_score, v, s
            ),
            _ => format!("challenger={:.4} (bootstrap)", a.challenger_score),
        },
        StageArtifact::Pusher(a) => format!("version={} dir={}", a.version, a.version_dir.display()),
    }
}
