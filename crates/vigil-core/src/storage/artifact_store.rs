//! # Artifact Store
//!
//! Every pipeline run owns one directory `artifact_root/<run_id>/`, created
//! exclusively at run start and never reused. Stage outputs live in
//! per-stage sub-directories; stage records and the run status live in a
//! redb database (`run.redb`) at the root of the run directory.
//!
//! The store enforces artifact lineage: a stage may only read the record of
//! a stage that ran strictly before it in the same run.

use super::records::{StageArtifact, StageKind, StageRecord};
use crate::formats::{object_from_bytes, object_to_bytes};
use crate::{VigilError, primitives};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Table for stage records: stage name -> serialized `StageArtifact`.
const STAGE_ARTIFACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("stage_artifacts");

/// Table for run status: key -> text value (`run_id`, `started_at`, `state`, `error`).
const RUN_STATUS: TableDefinition<&str, &str> = TableDefinition::new("run_status");

/// Upper bound on `-N` suffixes tried when run ids collide.
const MAX_RUN_ID_SUFFIX: u32 = 1000;

fn db_err(e: impl std::fmt::Display) -> VigilError {
    VigilError::IoError(e.to_string())
}

// =============================================================================
// PIPELINE RUN
// =============================================================================

/// Identity of one pipeline run. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Timestamp-derived id (`%m%d%Y__%H%M%S`, optionally `-N` suffixed).
    pub run_id: String,
    /// Directory exclusively owned by this run.
    pub artifact_dir: PathBuf,
    /// RFC 3339 start time (UTC).
    pub started_at: String,
}

/// Terminal or in-progress status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: String,
    pub error: Option<String>,
}

// =============================================================================
// ARTIFACT STORE
// =============================================================================

/// Run-scoped artifact namespace.
pub struct ArtifactStore {
    run: PipelineRun,
    db: Database,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Create a fresh run directory under `artifact_root`.
    ///
    /// The directory is created with `create_dir`, so two runs started in the
    /// same second get distinct `-1`, `-2`, ... suffixed ids.
    pub fn create(artifact_root: &Path) -> Result<Self, VigilError> {
        std::fs::create_dir_all(artifact_root)?;
        let now = chrono::Utc::now();
        let base = now.format(primitives::RUN_ID_FORMAT).to_string();

        let mut suffix = 0u32;
        let (run_id, artifact_dir) = loop {
            let candidate = if suffix == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, suffix)
            };
            let dir = artifact_root.join(&candidate);
            match std::fs::create_dir(&dir) {
                Ok(()) => break (candidate, dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    suffix += 1;
                    if suffix > MAX_RUN_ID_SUFFIX {
                        return Err(VigilError::IoError(format!(
                            "could not allocate a run directory for {}",
                            base
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        let run = PipelineRun {
            run_id,
            artifact_dir,
            started_at: now.to_rfc3339(),
        };
        let db = Database::create(run.artifact_dir.join(primitives::RUN_DB_NAME)).map_err(db_err)?;

        {
            let write_txn = db.begin_write().map_err(db_err)?;
            let _ = write_txn.open_table(STAGE_ARTIFACTS).map_err(db_err)?;
            {
                let mut status = write_txn.open_table(RUN_STATUS).map_err(db_err)?;
                status.insert("run_id", run.run_id.as_str()).map_err(db_err)?;
                status
                    .insert("started_at", run.started_at.as_str())
                    .map_err(db_err)?;
            }
            write_txn.commit().map_err(db_err)?;
        }

        tracing::info!(run_id = %run.run_id, dir = %run.artifact_dir.display(), "created run");
        Ok(Self { run, db })
    }

    /// Open an existing run directory (read-mostly; used for inspection).
    pub fn open(run_dir: &Path) -> Result<Self, VigilError> {
        let db_path = run_dir.join(primitives::RUN_DB_NAME);
        if !db_path.is_file() {
            return Err(VigilError::IoError(format!(
                "{} is not a run directory",
                run_dir.display()
            )));
        }
        let db = Database::open(&db_path).map_err(db_err)?;

        let (run_id, started_at) = {
            let read_txn = db.begin_read().map_err(db_err)?;
            let table = read_txn.open_table(RUN_STATUS).map_err(db_err)?;
            let run_id = table
                .get("run_id")
                .map_err(db_err)?
                .map(|v| v.value().to_string())
                .unwrap_or_default();
            let started_at = table
                .get("started_at")
                .map_err(db_err)?
                .map(|v| v.value().to_string())
                .unwrap_or_default();
            (run_id, started_at)
        };

        Ok(Self {
            run: PipelineRun {
                run_id,
                artifact_dir: run_dir.to_path_buf(),
                started_at,
            },
            db,
        })
    }

    #[must_use]
    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// Output directory of `stage`, created on first use.
    pub fn stage_dir(&self, stage: StageKind) -> Result<PathBuf, VigilError> {
        let dir = self.run.artifact_dir.join(stage.name());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Record a stage's output. Each stage writes its record exactly once.
    pub fn write<T: StageRecord>(&self, record: T) -> Result<(), VigilError> {
        let key = T::STAGE.name();
        let bytes = object_to_bytes(&record.wrap())?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(STAGE_ARTIFACTS).map_err(db_err)?;
            if table.get(key).map_err(db_err)?.is_some() {
                return Err(VigilError::IoError(format!(
                    "stage {} already recorded in run {}",
                    key, self.run.run_id
                )));
            }
            table.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        tracing::debug!(run_id = %self.run.run_id, stage = key, "recorded stage artifact");
        Ok(())
    }

    /// Read the record of stage `T::STAGE` on behalf of `reader`.
    ///
    /// Fails with `ArtifactOrderViolation` unless the producer runs strictly
    /// before `reader` and has already recorded its output in this run.
    pub fn read<T: StageRecord>(&self, reader: StageKind) -> Result<T, VigilError> {
        let violation = || VigilError::ArtifactOrderViolation {
            reader: reader.name(),
            producer: T::STAGE.name(),
        };
        if !T::STAGE.runs_before(reader) {
            return Err(violation());
        }
        let artifact = self.get(T::STAGE)?.ok_or_else(violation)?;
        T::unwrap_from(artifact).ok_or_else(|| {
            VigilError::SerializationError(format!(
                "record under {} has the wrong type",
                T::STAGE.name()
            ))
        })
    }

    /// All recorded stage artifacts, in stage order.
    pub fn records(&self) -> Result<Vec<StageArtifact>, VigilError> {
        let mut out = Vec::new();
        for stage in StageKind::ALL {
            if let Some(artifact) = self.get(stage)? {
                out.push(artifact);
            }
        }
        Ok(out)
    }

    fn get(&self, stage: StageKind) -> Result<Option<StageArtifact>, VigilError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(STAGE_ARTIFACTS).map_err(db_err)?;
        let bytes = table
            .get(stage.name())
            .map_err(db_err)?
            .map(|v| v.value().to_vec());
        bytes.map(|b| object_from_bytes(&b)).transpose()
    }

    /// Persist the run's current status.
    pub fn set_status(&self, status: &RunStatus) -> Result<(), VigilError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(RUN_STATUS).map_err(db_err)?;
            table.insert("state", status.state.as_str()).map_err(db_err)?;
            match &status.error {
                Some(error) => {
                    table.insert("error", error.as_str()).map_err(db_err)?;
                }
                None => {
                    table.remove("error").map_err(db_err)?;
                }
            }
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// The last persisted status, if any.
    pub fn status(&self) -> Result<Option<RunStatus>, VigilError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RUN_STATUS).map_err(db_err)?;
        let state = table
            .get("state")
            .map_err(db_err)?
            .map(|v| v.value().to_string());
        let error = table
            .get("error")
            .map_err(db_err)?
            .map(|v| v.value().to_string());
        Ok(state.map(|state| RunStatus { state, error }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
