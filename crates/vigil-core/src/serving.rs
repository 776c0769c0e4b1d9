//! # Serving
//!
//! Online and batch prediction from the latest published bundle:
//! raw record -> fitted transformer -> classifier -> decoded label.

use crate::registry::{ModelBundle, ModelRegistry, RegistryVersion};
use crate::train::Classifier;
use crate::validation::{ValidationGate, gate_dataset};
use crate::{Frame, Record, VigilError, primitives, write_document};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// File name of the validation report written next to batch predictions.
pub const BATCH_REPORT_FILE_NAME: &str = "validation_report.json";

/// A loaded bundle ready to answer predictions.
#[derive(Debug, Clone)]
pub struct Predictor<M> {
    version: RegistryVersion,
    bundle: ModelBundle<M>,
    missing_marker: String,
}

impl<M: Classifier + DeserializeOwned> Predictor<M> {
    /// Load the newest published bundle.
    pub fn latest(registry: &ModelRegistry, missing_marker: &str) -> Result<Self, VigilError> {
        let (version, bundle) = registry
            .load_latest()?
            .ok_or(VigilError::NoPublishedModel)?;
        tracing::info!(version = version.get(), "loaded model for serving");
        Ok(Self::from_bundle(version, bundle, missing_marker))
    }
}

impl<M: Classifier> Predictor<M> {
    #[must_use]
    pub fn from_bundle(version: RegistryVersion, bundle: ModelBundle<M>, missing_marker: &str) -> Self {
        Self {
            version,
            bundle,
            missing_marker: missing_marker.to_string(),
        }
    }

    #[must_use]
    pub fn version(&self) -> RegistryVersion {
        self.version
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        self.bundle.transformer.feature_names()
    }

    /// Encoded class code per row.
    pub fn predict_codes(&self, frame: &Frame) -> Result<Vec<u32>, VigilError> {
        let x = self.bundle.transformer.apply(frame)?;
        Ok(self.bundle.model.predict(&x))
    }

    /// Decoded label per row.
    pub fn predict_frame(&self, frame: &Frame) -> Result<Vec<String>, VigilError> {
        self.predict_codes(frame)?
            .into_iter()
            .map(|code| self.bundle.target_encoder.decode(code).map(str::to_string))
            .collect()
    }

    /// Label for a single raw record.
    pub fn predict(&self, record: &Record) -> Result<String, VigilError> {
        let frame = Frame::from_records(std::slice::from_ref(record), &self.missing_marker)?;
        self.predict_frame(&frame)?
            .pop()
            .ok_or_else(|| VigilError::InvalidRecord("record produced no prediction".to_string()))
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Files written by a batch prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    pub output_path: PathBuf,
    pub report_path: PathBuf,
    pub rows: usize,
}

/// Predict every record of a JSON array file.
///
/// Writes `output_dir/validation_report.json` (input gated against
/// `reference`) and `output_dir/<stem><timestamp>.json`, where every input
/// row gains a `prediction` code and a decoded `cat_pred` label.
pub fn predict_file<M: Classifier>(
    predictor: &Predictor<M>,
    input: &Path,
    reference: &Frame,
    gate: &ValidationGate,
    excluded_columns: &[String],
    output_dir: &Path,
) -> Result<BatchOutput, VigilError> {
    let bytes = std::fs::read(input)
        .map_err(|e| VigilError::IoError(format!("{}: {}", input.display(), e)))?;
    let records: Vec<Record> = serde_json::from_slice(&bytes)
        .map_err(|e| VigilError::SerializationError(format!("{}: {}", input.display(), e)))?;
    if records.is_empty() {
        return Err(VigilError::DataQualityError(format!(
            "{} holds no records",
            input.display()
        )));
    }
    let frame = Frame::from_records(&records, &predictor.missing_marker)?;

    let outcome = gate_dataset(gate, reference, &frame, excluded_columns, "prediction");
    let report_path = output_dir.join(BATCH_REPORT_FILE_NAME);
    write_document(&report_path, &outcome.report)?;

    let codes = predictor.predict_codes(&frame)?;
    let rows: Vec<Record> = records
        .into_iter()
        .zip(codes)
        .map(|(mut row, code)| -> Result<Record, VigilError> {
            let label = predictor.bundle.target_encoder.decode(code)?;
            row.insert("prediction".to_string(), serde_json::Value::from(code));
            row.insert("cat_pred".to_string(), serde_json::Value::from(label));
            Ok(row)
        })
        .collect::<Result<_, VigilError>>()?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prediction".to_string());
    let stamp = chrono::Utc::now().format(primitives::RUN_ID_FORMAT);
    let output_path = output_dir.join(format!("{}{}.json", stem, stamp));
    write_document(&output_path, &rows)?;

    tracing::info!(
        version = predictor.version.get(),
        rows = rows.len(),
        output = %output_path.display(),
        "wrote batch predictions"
    );
    Ok(BatchOutput {
        output_path,
        report_path,
        rows: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::BoostedTrees;
    use crate::transform::{TargetEncoder, TransformState};
    use crate::TransformConfig;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(value).expect("records")
    }

    fn predictor(logit: f64) -> Predictor<BoostedTrees> {
        let train = Frame::from_records(&records(json!([{"x": 1}, {"x": 2}])), "?").expect("frame");
        Predictor::from_bundle(
            RegistryVersion(3),
            ModelBundle {
                model: BoostedTrees::constant(logit),
                transformer: TransformState::fit(&train, &TransformConfig::default())
                    .expect("fit"),
                target_encoder: TargetEncoder::fit(&["N", "P"]).expect("encoder"),
            },
            "?",
        )
    }

    #[test]
    fn single_record_is_decoded() {
        let record = records(json!([{"x": "5", "unused": "z"}])).remove(0);
        assert_eq!(predictor(4.0).predict(&record).expect("predict"), "P");
        assert_eq!(predictor(-4.0).predict(&record).expect("predict"), "N");
    }

    #[test]
    fn missing_feature_is_schema_error() {
        let record = records(json!([{"y": 1}])).remove(0);
        assert!(matches!(
            predictor(1.0).predict(&record),
            Err(VigilError::SchemaError(_))
        ));
    }

    #[test]
    fn empty_registry_has_nothing_to_serve() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        assert!(matches!(
            Predictor::<BoostedTrees>::latest(&registry, "?"),
            Err(VigilError::NoPublishedModel)
        ));
    }

    #[test]
    fn batch_file_gets_prediction_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("incoming.json");
        std::fs::write(&input, r#"[{"x": 1}, {"x": "?"}]"#).expect("write");
        let reference =
            Frame::from_records(&records(json!([{"x": 1}, {"x": 3}])), "?").expect("frame");

        let out = predict_file(
            &predictor(2.0),
            &input,
            &reference,
            &ValidationGate::new(0.9),
            &[],
            &dir.path().join("prediction"),
        )
        .expect("batch");
        assert_eq!(out.rows, 2);
        assert!(out.report_path.is_file());

        let written: Vec<Record> =
            serde_json::from_slice(&std::fs::read(&out.output_path).expect("read")).expect("json");
        assert_eq!(written[0]["prediction"], json!(1));
        assert_eq!(written[1]["cat_pred"], json!("P"));
        assert!(
            out.output_path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("incoming"))
        );
    }
}
