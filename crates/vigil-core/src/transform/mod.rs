//! # Transform Stage
//!
//! Turns validated frames into dense numeric matrices. The fitted pieces
//! (`TransformState`, `TargetEncoder`) are fitted once on the training split
//! and reused unchanged for the test split and for serving.
//!
//! Sequence applied by [`TransformState::apply`]:
//! 1. project onto the fitted feature set (order-preserving)
//! 2. recode `f`/`t` to 0/1 and the sex column's `F`/`M` to 0/1
//! 3. coerce every remaining text cell to a number, or missing
//! 4. clamp the age column at `age_max`, fill it with the fitted median;
//!    fill the sex column with the fitted mode
//! 5. k-nearest-neighbours imputation of all remaining gaps

pub mod encoder;
pub mod imputer;
pub mod resample;

pub use encoder::TargetEncoder;
pub use imputer::KnnImputer;
pub use resample::{MinorityOversampler, NoResampling, Resampler};

use crate::storage::{ArtifactStore, StageKind, TransformationArtifact, ValidationArtifact};
use crate::{
    Cell, Frame, LabeledMatrix, Matrix, TransformConfig, VigilError, load_object, primitives,
    save_object,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// RECODING
// =============================================================================

fn recode(frame: &Frame, sex_column: &str) -> Frame {
    frame.map_cells(
        |_| true,
        |column, cell| match cell {
            Cell::Text(s) if column == sex_column && s == "F" => Cell::Number(0.0),
            Cell::Text(s) if column == sex_column && s == "M" => Cell::Number(1.0),
            Cell::Text(s) if s == "f" => Cell::Number(0.0),
            Cell::Text(s) if s == "t" => Cell::Number(1.0),
            other => other.clone(),
        },
    )
}

fn coerce_numeric(frame: &Frame) -> Frame {
    let coerced = frame.map_cells(
        |_| true,
        |_, cell| match cell {
            Cell::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Cell::Number)
                .unwrap_or(Cell::Missing),
            other => other.clone(),
        },
    );
    let lost: usize = frame
        .columns()
        .iter()
        .map(|c| {
            c.cells
                .iter()
                .filter(|cell| matches!(cell, Cell::Text(s) if s.trim().parse::<f64>().is_err()))
                .count()
        })
        .sum();
    if lost > 0 {
        tracing::warn!(cells = lost, "non-numeric cells coerced to missing");
    }
    coerced
}

fn present_numbers(frame: &Frame, column: &str) -> Vec<f64> {
    frame
        .column(column)
        .map(|c| c.cells.iter().filter_map(Cell::as_number).collect())
        .unwrap_or_default()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Most frequent value; ties resolve to the smallest value.
fn mode(mut values: Vec<f64>) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < values.len() {
        let run = values[i..].iter().take_while(|v| **v == values[i]).count();
        if best.is_none_or(|(_, n)| run > n) {
            best = Some((values[i], run));
        }
        i += run;
    }
    best.map(|(v, _)| v)
}

// =============================================================================
// TRANSFORM STATE
// =============================================================================

/// Statistics of the two specially handled columns, fitted on training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClampStats {
    pub age_column: String,
    pub age_max: f64,
    pub age_median: Option<f64>,
    pub sex_column: String,
    pub sex_mode: Option<f64>,
}

/// Everything needed to turn a raw feature frame into a model input matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    feature_names: Vec<String>,
    clamp: ClampStats,
    imputer: KnnImputer,
}

impl TransformState {
    /// Fit on the training features (target column already removed).
    pub fn fit(features: &Frame, config: &TransformConfig) -> Result<Self, VigilError> {
        if features.is_columnless() || features.row_count() == 0 {
            return Err(VigilError::DataQualityError(
                "cannot fit a transformer on an empty frame".to_string(),
            ));
        }
        let numeric = coerce_numeric(&recode(features, &config.sex_column));

        let ages: Vec<f64> = present_numbers(&numeric, &config.age_column)
            .into_iter()
            .filter(|a| *a <= config.age_max)
            .collect();
        let clamp = ClampStats {
            age_column: config.age_column.clone(),
            age_max: config.age_max,
            age_median: median(ages),
            sex_column: config.sex_column.clone(),
            sex_mode: mode(present_numbers(&numeric, &config.sex_column)),
        };

        let mut state = Self {
            feature_names: features.column_names(),
            clamp,
            imputer: KnnImputer::fit(&Matrix::with_cols(0), config.knn_neighbors),
        };
        let filled = state.to_matrix(&state.fill_special(&numeric))?;
        state.imputer = KnnImputer::fit(&filled, config.knn_neighbors);

        tracing::debug!(
            features = state.feature_names.len(),
            age_median = ?state.clamp.age_median,
            sex_mode = ?state.clamp.sex_mode,
            "fitted transformer"
        );
        Ok(state)
    }

    /// Feature names seen at fit time, in model input order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[must_use]
    pub fn clamp_stats(&self) -> &ClampStats {
        &self.clamp
    }

    /// Transform a frame into a dense matrix without missing values.
    ///
    /// Extra columns are ignored; a missing fitted feature is a `SchemaError`.
    pub fn apply(&self, frame: &Frame) -> Result<Matrix, VigilError> {
        let selected = frame.select(&self.feature_names)?;
        let numeric = coerce_numeric(&recode(&selected, &self.clamp.sex_column));
        let filled = self.to_matrix(&self.fill_special(&numeric))?;
        Ok(self.imputer.transform(&filled))
    }

    fn fill_special(&self, frame: &Frame) -> Frame {
        let c = &self.clamp;
        frame.map_cells(
            |name| name == c.age_column || name == c.sex_column,
            |name, cell| {
                if name == c.age_column {
                    match cell {
                        Cell::Number(age) if *age <= c.age_max => cell.clone(),
                        _ => c.age_median.map(Cell::Number).unwrap_or(Cell::Missing),
                    }
                } else {
                    match cell {
                        Cell::Missing => c.sex_mode.map(Cell::Number).unwrap_or(Cell::Missing),
                        other => other.clone(),
                    }
                }
            },
        )
    }

    fn to_matrix(&self, frame: &Frame) -> Result<Matrix, VigilError> {
        let cols = frame.column_count();
        let mut data = Vec::with_capacity(frame.row_count() * cols);
        for row in 0..frame.row_count() {
            for column in frame.columns() {
                data.push(column.cells[row].as_number().unwrap_or(f64::NAN));
            }
        }
        Matrix::new(frame.row_count(), cols, data)
    }
}

/// Split a frame into features and raw target labels.
pub fn split_target(frame: &Frame, target: &str) -> Result<(Frame, Vec<String>), VigilError> {
    let column = frame
        .column(target)
        .ok_or_else(|| VigilError::SchemaError(vec![target.to_string()]))?;
    let labels = column
        .cells
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.as_label().ok_or_else(|| {
                VigilError::InvalidRecord(format!("row {} has no {} label", row, target))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((frame.without_columns(&[target.to_string()]), labels))
}

// =============================================================================
// STAGE
// =============================================================================

/// Fitted objects and matrices produced by the transform stage.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub artifact: TransformationArtifact,
    pub state: TransformState,
    pub encoder: TargetEncoder,
    pub train: LabeledMatrix,
    pub test: LabeledMatrix,
}

/// Run the transform stage.
pub fn run<R: Resampler + ?Sized>(
    config: &TransformConfig,
    target_column: &str,
    resampler: &R,
    store: &ArtifactStore,
) -> Result<TransformOutput, VigilError> {
    let input: ValidationArtifact = store.read(StageKind::Transformation)?;
    let train: Frame = load_object(&input.valid_train_path)?;
    let test: Frame = load_object(&input.valid_test_path)?;

    let (train_x, train_labels) = split_target(&train, target_column)?;
    let (test_x, test_labels) = split_target(&test, target_column)?;

    let encoder = TargetEncoder::fit(&train_labels)?;
    let state = TransformState::fit(&train_x, config)?;

    let train = resampler.resample(&LabeledMatrix::new(
        state.apply(&train_x)?,
        encoder.encode_all(&train_labels)?,
    )?)?;
    let test = resampler.resample(&LabeledMatrix::new(
        state.apply(&test_x)?,
        encoder.encode_all(&test_labels)?,
    )?)?;

    let dir = store.stage_dir(StageKind::Transformation)?;
    let transformer_path = dir.join(primitives::TRANSFORMER_FILE_NAME);
    let target_encoder_path = dir.join(primitives::TARGET_ENCODER_FILE_NAME);
    let train_path = dir.join(primitives::TRAIN_FILE_NAME);
    let test_path = dir.join(primitives::TEST_FILE_NAME);
    save_object(&transformer_path, &state)?;
    save_object(&target_encoder_path, &encoder)?;
    save_object(&train_path, &train)?;
    save_object(&test_path, &test)?;

    tracing::info!(
        run_id = %store.run().run_id,
        features = state.feature_names().len(),
        train_rows = train.len(),
        test_rows = test.len(),
        classes = encoder.classes().len(),
        "transformed datasets"
    );

    let artifact = TransformationArtifact {
        transformer_path,
        target_encoder_path,
        train_path,
        test_path,
        feature_names: state.feature_names().to_vec(),
    };
    store.write(artifact.clone())?;
    Ok(TransformOutput {
        artifact,
        state,
        encoder,
        train,
        test,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(rows: serde_json::Value) -> Frame {
        let records: Vec<crate::Record> = serde_json::from_value(rows).expect("records");
        Frame::from_records(&records, "?").expect("frame")
    }

    fn training() -> Frame {
        frame(json!([
            {"age": 30, "sex": "F", "on thyroxine": "f", "TSH": 1.0},
            {"age": 40, "sex": "M", "on thyroxine": "t", "TSH": 2.0},
            {"age": 50, "sex": "F", "on thyroxine": "f", "TSH": "?"},
            {"age": 455, "sex": "?", "on thyroxine": "f", "TSH": 3.0}
        ]))
    }

    #[test]
    fn clamp_stats_are_fitted_on_training_data() {
        let state = TransformState::fit(&training(), &TransformConfig::default()).expect("fit");
        assert_eq!(state.clamp_stats().age_median, Some(40.0));
        assert_eq!(state.clamp_stats().sex_mode, Some(0.0));
    }

    #[test]
    fn output_has_no_missing_values() {
        let state = TransformState::fit(&training(), &TransformConfig::default()).expect("fit");
        let matrix = state.apply(&training()).expect("apply");
        assert_eq!(matrix.rows(), 4);
        assert_eq!(matrix.cols(), 4);
        assert!(!matrix.has_missing());
        // age 455 is clamped to the fitted median
        assert_eq!(matrix.get(3, 0), 40.0);
        // missing sex becomes the mode
        assert_eq!(matrix.get(3, 1), 0.0);
    }

    #[test]
    fn serving_frame_is_projected_onto_fitted_features() {
        let state = TransformState::fit(&training(), &TransformConfig::default()).expect("fit");
        let serving = frame(json!([
            {"extra": 1, "TSH": 2.5, "on thyroxine": "t", "sex": "M", "age": 33}
        ]));
        let matrix = state.apply(&serving).expect("apply");
        assert_eq!(matrix.row(0), &[33.0, 1.0, 1.0, 2.5]);

        let incomplete = frame(json!([{"age": 33}]));
        assert!(matches!(
            state.apply(&incomplete),
            Err(VigilError::SchemaError(_))
        ));
    }

    #[test]
    fn target_split_requires_labels() {
        let data = frame(json!([{"x": 1, "y": "P"}, {"x": 2, "y": "?"}]));
        assert!(matches!(
            split_target(&data, "y"),
            Err(VigilError::InvalidRecord(_))
        ));
        assert!(matches!(
            split_target(&data, "z"),
            Err(VigilError::SchemaError(_))
        ));
    }

    #[test]
    fn median_and_mode() {
        assert_eq!(median(vec![3.0, 1.0, 2.0, 4.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
        assert_eq!(mode(vec![1.0, 0.0, 1.0, 0.0]), Some(0.0));
        assert_eq!(mode(vec![1.0, 1.0, 0.0]), Some(1.0));
    }
}
