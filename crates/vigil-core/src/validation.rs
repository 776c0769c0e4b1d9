//! # Validation Gate
//!
//! Compares a candidate dataset against a reference dataset and produces a
//! [`ValidationReport`]. Three checks run in a fixed order:
//!
//! 1. **drop-high-missingness columns**: columns whose null fraction exceeds
//!    the threshold are removed. A columnless result ends the pass.
//! 2. **schema completeness**: every reference column must be present.
//! 3. **drift**: only when step 2 passed. Per reference column, compares the
//!    declared type and the distinct-value count. These are structural
//!    heuristics, not statistical tests.
//!
//! Each check returns its finding as a value; the gate assembles them into
//! the report. Inputs are never modified.

use crate::storage::{ArtifactStore, IngestionArtifact, StageKind, ValidationArtifact};
use crate::{
    DataSource, Frame, IngestionConfig, ValidationConfig, VigilError, load_object, primitives,
    save_object, write_document,
};
use serde::Serialize;
use serde::ser::SerializeMap;
use std::collections::BTreeMap;

// =============================================================================
// REPORT
// =============================================================================

/// Drift verdict for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDrift {
    pub same_type: bool,
    pub same_cardinality: bool,
}

impl ColumnDrift {
    #[must_use]
    pub fn is_drifted(&self) -> bool {
        !(self.same_type && self.same_cardinality)
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Finding {
    DroppedColumns(Vec<String>),
    ExcludedColumns(Vec<String>),
    MissingColumns(Vec<String>),
    DataDrift(BTreeMap<String, ColumnDrift>),
}

/// Ordered mapping from check key to finding.
///
/// Keys are stable strings of the form `<label>.<check>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    entries: Vec<(String, Finding)>,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the finding of one executed check. A later entry with the same
    /// key replaces the earlier one.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, finding: Finding) -> Self {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, finding));
        self
    }

    /// Concatenate two reports.
    #[must_use]
    pub fn merge(self, other: ValidationReport) -> Self {
        other
            .entries
            .into_iter()
            .fold(self, |report, (k, f)| report.with(k, f))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Finding> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of every `MissingColumns` finding, in first-seen order.
    #[must_use]
    pub fn missing_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, finding) in &self.entries {
            if let Finding::MissingColumns(cols) = finding {
                for col in cols {
                    if !out.contains(col) {
                        out.push(col.clone());
                    }
                }
            }
        }
        out
    }
}

impl Serialize for ValidationReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, finding) in &self.entries {
            map.serialize_entry(key, finding)?;
        }
        map.end()
    }
}

// =============================================================================
// GATE
// =============================================================================

/// Result of gating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    /// The candidate without high-missingness columns; `None` if none survived.
    pub cleaned: Option<Frame>,
    /// True when every reference column is present in the cleaned candidate.
    pub columns_ok: bool,
    pub report: ValidationReport,
}

/// Reference-versus-candidate data gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationGate {
    missing_threshold: f64,
}

impl ValidationGate {
    #[must_use]
    pub fn new(missing_threshold: f64) -> Self {
        Self { missing_threshold }
    }

    #[must_use]
    pub fn missing_threshold(&self) -> f64 {
        self.missing_threshold
    }

    /// Step 1: remove columns whose null fraction exceeds the threshold.
    #[must_use]
    pub fn drop_sparse_columns(&self, frame: &Frame) -> (Frame, Vec<String>) {
        let dropped: Vec<String> = frame
            .columns()
            .iter()
            .filter(|c| c.null_fraction() > self.missing_threshold)
            .map(|c| c.name.clone())
            .collect();
        (frame.without_columns(&dropped), dropped)
    }

    /// Step 2: reference columns absent from the candidate.
    #[must_use]
    pub fn missing_columns(reference: &Frame, candidate: &Frame) -> Vec<String> {
        reference
            .columns()
            .iter()
            .filter(|c| !candidate.has_column(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Step 3: per-column type and cardinality comparison.
    #[must_use]
    pub fn drift(reference: &Frame, candidate: &Frame) -> BTreeMap<String, ColumnDrift> {
        reference
            .columns()
            .iter()
            .filter_map(|base| {
                candidate.column(&base.name).map(|current| {
                    (
                        base.name.clone(),
                        ColumnDrift {
                            same_type: base.dtype() == current.dtype(),
                            same_cardinality: base.cardinality() == current.cardinality(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Run all checks for `candidate`, keying findings under `label`.
    #[must_use]
    pub fn validate(&self, reference: &Frame, candidate: &Frame, label: &str) -> GateOutcome {
        let (cleaned, dropped) = self.drop_sparse_columns(candidate);
        let report = ValidationReport::new().with(
            format!("{}.dropped_columns", label),
            Finding::DroppedColumns(dropped),
        );

        if cleaned.is_columnless() {
            tracing::warn!(label, "every column exceeded the missing threshold");
            return GateOutcome {
                cleaned: None,
                columns_ok: false,
                report,
            };
        }

        let missing = Self::missing_columns(reference, &cleaned);
        let columns_ok = missing.is_empty();
        let mut report = report.with(
            format!("{}.missing_columns", label),
            Finding::MissingColumns(missing),
        );

        if columns_ok {
            let drift = Self::drift(reference, &cleaned);
            let drifted = drift.values().filter(|d| d.is_drifted()).count();
            if drifted > 0 {
                tracing::warn!(label, drifted, "structural drift detected");
            }
            report = report.with(format!("{}.data_drift", label), Finding::DataDrift(drift));
        }

        GateOutcome {
            cleaned: Some(cleaned),
            columns_ok,
            report,
        }
    }
}

// =============================================================================
// STAGE
// =============================================================================

/// Frames that passed validation.
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub artifact: ValidationArtifact,
    pub train: Frame,
    pub test: Frame,
}

/// Remove the configured excluded columns, reporting which were present.
fn exclude(frame: &Frame, excluded: &[String]) -> (Frame, Vec<String>) {
    let present: Vec<String> = excluded
        .iter()
        .filter(|c| frame.has_column(c))
        .cloned()
        .collect();
    (frame.without_columns(&present), present)
}

/// Load the reference dataset, cleaned of sparse and then excluded columns.
pub fn load_reference<S: DataSource + ?Sized>(
    source: &S,
    ingestion: &IngestionConfig,
    config: &ValidationConfig,
) -> Result<(Frame, ValidationReport), VigilError> {
    let records = source.fetch(&ingestion.database, &config.reference_collection)?;
    if records.is_empty() {
        return Err(VigilError::DataQualityError(format!(
            "reference collection {} is empty",
            config.reference_collection
        )));
    }
    let raw = Frame::from_records(&records, &ingestion.missing_marker)?;
    let (kept, dropped) = ValidationGate::new(config.missing_threshold).drop_sparse_columns(&raw);
    let (reference, excluded) = exclude(&kept, &config.excluded_columns);
    let report = ValidationReport::new()
        .with("reference.dropped_columns", Finding::DroppedColumns(dropped))
        .with(
            "reference.excluded_columns",
            Finding::ExcludedColumns(excluded),
        );
    Ok((reference, report))
}

/// Gate one labelled dataset against the reference.
///
/// Sparse columns are dropped first; excluded columns are removed from
/// whatever survives the gate.
pub fn gate_dataset(
    gate: &ValidationGate,
    reference: &Frame,
    candidate: &Frame,
    excluded_columns: &[String],
    label: &str,
) -> GateOutcome {
    let outcome = gate.validate(reference, candidate, label);
    let (cleaned, excluded) = match outcome.cleaned {
        Some(cleaned) => {
            let (cleaned, excluded) = exclude(&cleaned, excluded_columns);
            ((!cleaned.is_columnless()).then_some(cleaned), excluded)
        }
        None => (None, Vec::new()),
    };
    GateOutcome {
        cleaned,
        columns_ok: outcome.columns_ok,
        report: outcome.report.with(
            format!("{}.excluded_columns", label),
            Finding::ExcludedColumns(excluded),
        ),
    }
}

/// Run the validation stage.
///
/// The report is written before any failure is raised.
pub fn run<S: DataSource + ?Sized>(
    source: &S,
    ingestion: &IngestionConfig,
    config: &ValidationConfig,
    store: &ArtifactStore,
) -> Result<ValidationOutput, VigilError> {
    let input: IngestionArtifact = store.read(StageKind::Validation)?;
    let train: Frame = load_object(&input.train_path)?;
    let test: Frame = load_object(&input.test_path)?;

    let gate = ValidationGate::new(config.missing_threshold);
    let (reference, reference_report) = load_reference(source, ingestion, config)?;

    let train_outcome = gate_dataset(&gate, &reference, &train, &config.excluded_columns, "train");
    let test_outcome = gate_dataset(&gate, &reference, &test, &config.excluded_columns, "test");

    let report = reference_report
        .merge(train_outcome.report)
        .merge(test_outcome.report);

    let dir = store.stage_dir(StageKind::Validation)?;
    let report_path = dir.join(primitives::REPORT_FILE_NAME);
    write_document(&report_path, &report)?;
    tracing::info!(
        run_id = %store.run().run_id,
        checks = report.len(),
        path = %report_path.display(),
        "wrote validation report"
    );

    if reference.is_columnless() {
        return Err(VigilError::DataQualityError(
            "every reference column exceeded the missing threshold".to_string(),
        ));
    }
    let (Some(train), Some(test)) = (train_outcome.cleaned, test_outcome.cleaned) else {
        return Err(VigilError::DataQualityError(
            "every column exceeded the missing threshold".to_string(),
        ));
    };
    let missing = report.missing_columns();
    if !missing.is_empty() {
        return Err(VigilError::SchemaError(missing));
    }

    let valid_train_path = dir.join(primitives::TRAIN_FILE_NAME);
    let valid_test_path = dir.join(primitives::TEST_FILE_NAME);
    save_object(&valid_train_path, &train)?;
    save_object(&valid_test_path, &test)?;

    let artifact = ValidationArtifact {
        report_path,
        valid_train_path,
        valid_test_path,
    };
    store.write(artifact.clone())?;
    Ok(ValidationOutput {
        artifact,
        train,
        test,
    })
}

// =============================================================================
// TESTS
// =============================================================================
