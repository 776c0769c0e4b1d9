//! # Core Type Definitions
//!
//! This module contains the leaf types shared by every pipeline stage:
//! - Cell values and their declared column types (`Cell`, `DType`)
//! - Raw source rows (`Record`)
//! - Error types (`VigilError`)
//!
//! ## Error Taxonomy
//!
//! Stage-local failures are typed values, never panics. The orchestrator
//! wraps them in [`VigilError::StageFailed`] with the stage name and run id
//! and treats every one of them as fatal for the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// RECORDS & CELLS
// =============================================================================

/// One raw row as delivered by a [`crate::source::DataSource`].
///
/// Key order is preserved (serde_json `preserve_order`), so the first
/// record seen fixes the column order of the resulting frame.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A single tabular value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Cell {
    /// Null, absent, or the configured missing marker.
    #[default]
    Missing,
    /// A numeric value.
    Number(f64),
    /// A categorical / free-text value.
    Text(String),
}

impl Cell {
    /// Check if the cell is missing.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Get the numeric value, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the cell as a label string (used for target columns).
    #[must_use]
    pub fn as_label(&self) -> Option<String> {
        match self {
            Cell::Missing => None,
            Cell::Number(n) => Some(n.to_string()),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// Convert back to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Missing => serde_json::Value::Null,
            Cell::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Declared type of a column, derived from its non-missing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// Every non-missing cell is numeric.
    Number,
    /// At least one non-missing cell is text.
    Text,
    /// Every cell is missing.
    Empty,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::Number => write!(f, "number"),
            DType::Text => write!(f, "text"),
            DType::Empty => write!(f, "empty"),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Vigil pipeline.
///
/// - No silent failures
/// - Use `Result<T, VigilError>` for fallible operations
/// - Every variant is fatal for the run that raised it; retries belong to
///   the external scheduler
#[derive(Debug, Error)]
pub enum VigilError {
    /// Required columns are missing from a dataset.
    #[error("Schema error: missing columns {0:?}")]
    SchemaError(Vec<String>),

    /// The dataset is unusable (e.g. every column dropped, no rows).
    #[error("Data quality error: {0}")]
    DataQualityError(String),

    /// The trained model missed a quality threshold.
    #[error("Quality gate failed: {0}")]
    QualityGateError(String),

    /// The challenger is not strictly better than the champion.
    #[error("Regression: challenger score {challenger} does not exceed champion score {champion}")]
    RegressionError {
        /// Score of the freshly trained bundle.
        challenger: f64,
        /// Score of the latest published bundle.
        champion: f64,
    },

    /// The registry directory holds something that is not a valid version.
    #[error("Registry corruption: {0}")]
    RegistryCorruptionError(String),

    /// A version was requested for publishing that does not exceed the latest.
    #[error("Version conflict: version {requested} is not above latest {latest}")]
    VersionConflict {
        /// The version the caller asked for.
        requested: u64,
        /// The latest version currently published.
        latest: u64,
    },

    /// The registry has no published version to serve.
    #[error("No published model in registry")]
    NoPublishedModel,

    /// A label not seen at fit time reached a target encoder.
    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    /// A raw record could not be interpreted.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A stage tried to read an artifact of a stage that did not run before it.
    #[error("Stage {reader} cannot read artifact of stage {producer}")]
    ArtifactOrderViolation {
        /// The stage doing the read.
        reader: &'static str,
        /// The stage whose artifact was requested.
        producer: &'static str,
    },

    /// Configuration values are out of range or inconsistent.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A stage failed; carries the run context of the original error.
    #[error("Stage {stage} failed in run {run_id}: {source}")]
    StageFailed {
        /// Name of the failing stage.
        stage: &'static str,
        /// The run the stage belonged to.
        run_id: String,
        /// The originating error.
        #[source]
        source: Box<VigilError>,
    },
}

impl From<std::io::Error> for VigilError {
    fn from(e: std::io::Error) -> Self {
        VigilError::IoError(e.to_string())
    }
}

impl VigilError {
    /// Get the innermost error, looking through stage context wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &VigilError {
        match self {
            VigilError::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_label_rendering() {
        assert_eq!(Cell::Text("P".into()).as_label().as_deref(), Some("P"));
        assert_eq!(Cell::Number(1.0).as_label().as_deref(), Some("1"));
        assert_eq!(Cell::Missing.as_label(), None);
    }

    #[test]
    fn nan_cell_becomes_json_null() {
        assert_eq!(Cell::Number(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn root_cause_unwraps_stage_context() {
        let err = VigilError::StageFailed {
            stage: "model_trainer",
            run_id: "01012026__000000".into(),
            source: Box::new(VigilError::QualityGateError("low".into())),
        };
        assert!(matches!(err.root_cause(), VigilError::QualityGateError(_)));
        assert!(err.to_string().contains("model_trainer"));
    }
}
