//! # Raw Data Source
//!
//! The pipeline pulls raw rows through the [`DataSource`] capability and
//! knows nothing about the storage engine behind it.

use crate::{Record, VigilError};
use std::path::{Path, PathBuf};

/// Read-only provider of raw tabular rows.
pub trait DataSource {
    /// Fetch every row of `collection` in `database`.
    fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, VigilError>;
}

/// Filesystem source reading `root/<database>/<collection>.json`.
///
/// Each file holds a JSON array of flat objects.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, database: &str, collection: &str) -> PathBuf {
        self.root.join(database).join(format!("{}.json", collection))
    }
}

impl DataSource for JsonDirSource {
    fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, VigilError> {
        let path = self.collection_path(database, collection);
        let bytes = std::fs::read(&path)
            .map_err(|e| VigilError::IoError(format!("{}: {}", path.display(), e)))?;
        let records: Vec<Record> = serde_json::from_slice(&bytes).map_err(|e| {
            VigilError::SerializationError(format!("{}: {}", path.display(), e))
        })?;
        tracing::debug!(database, collection, rows = records.len(), "fetched collection");
        Ok(records)
    }
}

impl<S: DataSource + ?Sized> DataSource for &S {
    fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, VigilError> {
        (**self).fetch(database, collection)
    }
}
