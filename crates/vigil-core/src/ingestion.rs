//! # Ingestion
//!
//! Pulls raw rows from the [`DataSource`], normalizes missing markers,
//! persists the feature store and a seeded train/test split.

use crate::storage::{ArtifactStore, IngestionArtifact, StageKind};
use crate::{DataSource, Frame, IngestionConfig, VigilError, primitives, save_object};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Frames produced by ingestion, plus the record written for them.
#[derive(Debug, Clone)]
pub struct IngestionOutput {
    pub artifact: IngestionArtifact,
    pub train: Frame,
    pub test: Frame,
}

/// Shuffle rows with a seeded RNG and split off `test_size` of them.
///
/// The test split has `ceil(rows * test_size)` rows. Both splits must be
/// non-empty.
pub fn split_train_test(
    frame: &Frame,
    test_size: f64,
    seed: u64,
) -> Result<(Frame, Frame), VigilError> {
    let rows = frame.row_count();
    let test_rows = (rows as f64 * test_size).ceil() as usize;
    if test_rows == 0 || test_rows >= rows {
        return Err(VigilError::DataQualityError(format!(
            "cannot split {} rows with test_size {}",
            rows, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(test_rows);
    Ok((frame.take_rows(train_idx), frame.take_rows(test_idx)))
}

/// Run the ingestion stage and record its artifact.
pub fn run<S: DataSource + ?Sized>(
    source: &S,
    config: &IngestionConfig,
    store: &ArtifactStore,
) -> Result<IngestionOutput, VigilError> {
    let records = source.fetch(&config.database, &config.collection)?;
    if records.is_empty() {
        return Err(VigilError::DataQualityError(format!(
            "collection {}.{} is empty",
            config.database, config.collection
        )));
    }
    let frame = Frame::from_records(&records, &config.missing_marker)?;

    let dir = store.stage_dir(StageKind::Ingestion)?;
    let feature_store_path = dir.join(primitives::FEATURE_STORE_FILE_NAME);
    save_object(&feature_store_path, &frame)?;

    let (train, test) = split_train_test(&frame, config.test_size, config.split_seed)?;
    let train_path = dir.join(primitives::TRAIN_FILE_NAME);
    let test_path = dir.join(primitives::TEST_FILE_NAME);
    save_object(&train_path, &train)?;
    save_object(&test_path, &test)?;

    tracing::info!(
        run_id = %store.run().run_id,
        rows = frame.row_count(),
        columns = frame.column_count(),
        train_rows = train.row_count(),
        test_rows = test.row_count(),
        "ingested dataset"
    );

    let artifact = IngestionArtifact {
        feature_store_path,
        train_path,
        test_path,
        train_rows: train.row_count() as u64,
        test_rows: test.row_count() as u64,
    };
    store.write(artifact.clone())?;
    Ok(IngestionOutput {
        artifact,
        train,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cell, Column};

    fn numbered(rows: usize) -> Frame {
        Frame::new(vec![Column::new(
            "id",
            (0..rows).map(|i| Cell::Number(i as f64)).collect(),
        )])
        .expect("frame")
    }

    #[test]
    fn split_sizes_and_disjointness() {
        let (train, test) = split_train_test(&numbered(10), 0.2, 42).expect("split");
        assert_eq!(train.row_count(), 8);
        assert_eq!(test.row_count(), 2);

        let mut ids: Vec<i64> = train
            .column("id")
            .into_iter()
            .chain(test.column("id"))
            .flat_map(|c| c.cells.iter().filter_map(|x| x.as_number()))
            .map(|n| n as i64)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn split_is_deterministic_for_a_seed() {
        let a = split_train_test(&numbered(20), 0.2, 7).expect("a");
        let b = split_train_test(&numbered(20), 0.2, 7).expect("b");
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn single_row_cannot_be_split() {
        assert!(matches!(
            split_train_test(&numbered(1), 0.2, 42),
            Err(VigilError::DataQualityError(_))
        ));
    }
}
