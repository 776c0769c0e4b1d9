//! # Model Registry
//!
//! Append-only store of published model bundles:
//!
//! ```text
//! registry_root/
//!   .publish.lock
//!   0/model/model.pkl
//!   0/transformer/knn_imputer.pkl
//!   0/target_encoder/target_encoder.pkl
//!   1/...
//! ```
//!
//! ## Invariants
//!
//! - Every non-hidden entry of the root is a canonical non-negative integer
//!   (`0`, `1`, ... without leading zeros); anything else is corruption
//! - A published version is never rewritten or renumbered
//! - Readers never observe a version with only some bundle members: all
//!   members are written to a hidden staging directory, fsynced, and the
//!   staging directory is renamed to the version name in one step
//! - Publishers are serialized by an exclusive lock on `.publish.lock`, so
//!   "compute next version and write it" cannot race between runs

use crate::transform::{TargetEncoder, TransformState};
use crate::{VigilError, load_object, primitives, save_object};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

// =============================================================================
// VERSIONS & COMPONENTS
// =============================================================================

/// A published version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistryVersion(pub u64);

impl RegistryVersion {
    /// Parse a directory name. Only canonical decimal integers are accepted.
    pub fn parse(name: &str) -> Result<Self, VigilError> {
        let canonical = !name.is_empty()
            && name.bytes().all(|b| b.is_ascii_digit())
            && (name == "0" || !name.starts_with('0'));
        if !canonical {
            return Err(VigilError::RegistryCorruptionError(format!(
                "'{}' is not a version directory",
                name
            )));
        }
        name.parse::<u64>().map(RegistryVersion).map_err(|_| {
            VigilError::RegistryCorruptionError(format!("version '{}' is out of range", name))
        })
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(&self) -> RegistryVersion {
        RegistryVersion(self.0 + 1)
    }
}

impl std::fmt::Display for RegistryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A member of a model bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Model,
    Transformer,
    TargetEncoder,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::Model,
        Component::Transformer,
        Component::TargetEncoder,
    ];

    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Component::Model => primitives::MODEL_DIR_NAME,
            Component::Transformer => primitives::TRANSFORMER_DIR_NAME,
            Component::TargetEncoder => primitives::TARGET_ENCODER_DIR_NAME,
        }
    }

    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            Component::Model => primitives::MODEL_FILE_NAME,
            Component::Transformer => primitives::TRANSFORMER_FILE_NAME,
            Component::TargetEncoder => primitives::TARGET_ENCODER_FILE_NAME,
        }
    }

    fn relative(&self) -> PathBuf {
        Path::new(self.dir_name()).join(self.file_name())
    }
}

// =============================================================================
// BUNDLE
// =============================================================================

/// Classifier, transformer and target encoder, always published together.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle<M> {
    pub model: M,
    pub transformer: TransformState,
    pub target_encoder: TargetEncoder,
}

/// BLAKE3 digests of a published bundle's members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDigest {
    pub version: RegistryVersion,
    pub model: String,
    pub transformer: String,
    pub target_encoder: String,
}

// =============================================================================
// PUBLISH LOCK
// =============================================================================

/// Exclusive advisory lock held for the duration of a publish.
struct PublishLock {
    file: File,
}

impl PublishLock {
    fn acquire(root: &Path) -> Result<Self, VigilError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(primitives::PUBLISH_LOCK_NAME))?;
        file.lock()?;
        Ok(Self { file })
    }
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<(), VigilError> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<(), VigilError> {
    Ok(())
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Filesystem-backed versioned model registry.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All published versions, ascending. A missing root is an empty registry.
    pub fn versions(&self) -> Result<Vec<RegistryVersion>, VigilError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                VigilError::RegistryCorruptionError(format!(
                    "non UTF-8 entry {:?} in registry",
                    entry.file_name()
                ))
            })?;
            if name.starts_with('.') {
                continue;
            }
            let version = RegistryVersion::parse(name)?;
            if !entry.file_type()?.is_dir() {
                return Err(VigilError::RegistryCorruptionError(format!(
                    "version {} is not a directory",
                    name
                )));
            }
            versions.push(version);
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest published version, or `None` for an empty registry.
    pub fn latest_version(&self) -> Result<Option<RegistryVersion>, VigilError> {
        Ok(self.versions()?.last().copied())
    }

    /// `latest + 1`, or 0 for an empty registry.
    pub fn next_version(&self) -> Result<RegistryVersion, VigilError> {
        Ok(self
            .latest_version()?
            .map_or(RegistryVersion(0), |v| v.next()))
    }

    #[must_use]
    pub fn version_dir(&self, version: RegistryVersion) -> PathBuf {
        self.root.join(version.to_string())
    }

    /// Path of `component` within `version`, published or not.
    #[must_use]
    pub fn resolve(&self, component: Component, version: RegistryVersion) -> PathBuf {
        self.version_dir(version).join(component.relative())
    }

    /// Publish `bundle` as the next version.
    pub fn publish<M: Serialize>(
        &self,
        bundle: &ModelBundle<M>,
    ) -> Result<RegistryVersion, VigilError> {
        self.publish_locked(bundle, None)
    }

    /// Publish `bundle` as exactly `version`, which must exceed the latest.
    pub fn publish_at<M: Serialize>(
        &self,
        bundle: &ModelBundle<M>,
        version: RegistryVersion,
    ) -> Result<RegistryVersion, VigilError> {
        self.publish_locked(bundle, Some(version))
    }

    fn publish_locked<M: Serialize>(
        &self,
        bundle: &ModelBundle<M>,
        requested: Option<RegistryVersion>,
    ) -> Result<RegistryVersion, VigilError> {
        std::fs::create_dir_all(&self.root)?;
        let _lock = PublishLock::acquire(&self.root)?;
        self.remove_orphaned_staging()?;

        let latest = self.latest_version()?;
        let version = match (requested, latest) {
            (Some(v), Some(l)) if v <= l => {
                return Err(VigilError::VersionConflict {
                    requested: v.get(),
                    latest: l.get(),
                });
            }
            (Some(v), _) => v,
            (None, Some(l)) => l.next(),
            (None, None) => RegistryVersion(0),
        };

        let staging = self.root.join(format!(
            "{}{}-{}",
            primitives::STAGING_PREFIX,
            version,
            std::process::id()
        ));
        let result = self.stage_and_commit(bundle, &staging, version);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result?;

        tracing::info!(version = version.get(), root = %self.root.display(), "published model bundle");
        Ok(version)
    }

    fn stage_and_commit<M: Serialize>(
        &self,
        bundle: &ModelBundle<M>,
        staging: &Path,
        version: RegistryVersion,
    ) -> Result<(), VigilError> {
        std::fs::create_dir(staging)?;
        save_object(&staging.join(Component::Model.relative()), &bundle.model)?;
        save_object(
            &staging.join(Component::Transformer.relative()),
            &bundle.transformer,
        )?;
        save_object(
            &staging.join(Component::TargetEncoder.relative()),
            &bundle.target_encoder,
        )?;
        for component in Component::ALL {
            sync_dir(&staging.join(component.dir_name()))?;
        }
        sync_dir(staging)?;

        let target = self.version_dir(version);
        if target.exists() {
            return Err(VigilError::RegistryCorruptionError(format!(
                "version directory {} already exists",
                target.display()
            )));
        }
        std::fs::rename(staging, &target)?;
        sync_dir(&self.root)
    }

    /// Delete staging directories left behind by interrupted publishers.
    ///
    /// Only called while holding the publish lock.
    fn remove_orphaned_staging(&self) -> Result<(), VigilError> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let orphaned = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(primitives::STAGING_PREFIX));
            if orphaned && entry.file_type()?.is_dir() {
                tracing::warn!(path = %entry.path().display(), "removing orphaned staging directory");
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    fn member_path(
        &self,
        component: Component,
        version: RegistryVersion,
    ) -> Result<PathBuf, VigilError> {
        let dir = self.version_dir(version);
        if !dir.is_dir() {
            return Err(VigilError::IoError(format!(
                "version {} is not published",
                version
            )));
        }
        let path = self.resolve(component, version);
        if !path.is_file() {
            return Err(VigilError::RegistryCorruptionError(format!(
                "version {} is missing its {} member",
                version,
                component.dir_name()
            )));
        }
        Ok(path)
    }

    /// Load all three members of `version`.
    pub fn load_bundle<M: DeserializeOwned>(
        &self,
        version: RegistryVersion,
    ) -> Result<ModelBundle<M>, VigilError> {
        let model_path = self.member_path(Component::Model, version)?;
        let transformer_path = self.member_path(Component::Transformer, version)?;
        let encoder_path = self.member_path(Component::TargetEncoder, version)?;
        Ok(ModelBundle {
            model: load_object(&model_path)?,
            transformer: load_object(&transformer_path)?,
            target_encoder: load_object(&encoder_path)?,
        })
    }

    /// The latest bundle, or `None` for an empty registry.
    pub fn load_latest<M: DeserializeOwned>(
        &self,
    ) -> Result<Option<(RegistryVersion, ModelBundle<M>)>, VigilError> {
        match self.latest_version()? {
            Some(version) => Ok(Some((version, self.load_bundle(version)?))),
            None => Ok(None),
        }
    }

    /// BLAKE3 digests of the members of `version`.
    pub fn digest(&self, version: RegistryVersion) -> Result<BundleDigest, VigilError> {
        let hash = |component: Component| -> Result<String, VigilError> {
            let bytes = std::fs::read(self.member_path(component, version)?)?;
            Ok(blake3::hash(&bytes).to_hex().to_string())
        };
        Ok(BundleDigest {
            version,
            model: hash(Component::Model)?,
            transformer: hash(Component::Transformer)?,
            target_encoder: hash(Component::TargetEncoder)?,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Frame, TransformConfig};

    fn bundle(tag: u32) -> ModelBundle<u32> {
        let records: Vec<crate::Record> =
            serde_json::from_value(serde_json::json!([{"x": 1.0}, {"x": 2.0}])).expect("records");
        let frame = Frame::from_records(&records, "?").expect("frame");
        ModelBundle {
            model: tag,
            transformer: TransformState::fit(&frame, &TransformConfig::default()).expect("fit"),
            target_encoder: TargetEncoder::fit(&["N", "P"]).expect("encoder"),
        }
    }

    #[test]
    fn empty_registry_starts_at_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path().join("absent"));
        assert_eq!(registry.latest_version().expect("latest"), None);
        assert_eq!(registry.next_version().expect("next"), RegistryVersion(0));
    }

    #[test]
    fn sequential_publishes_are_dense() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        for i in 0..3 {
            let v = registry.publish(&bundle(i)).expect("publish");
            assert_eq!(v, RegistryVersion(u64::from(i)));
            assert_eq!(registry.latest_version().expect("latest"), Some(v));
        }
        assert_eq!(
            registry.versions().expect("versions"),
            vec![RegistryVersion(0), RegistryVersion(1), RegistryVersion(2)]
        );
        let loaded: ModelBundle<u32> = registry.load_bundle(RegistryVersion(1)).expect("load");
        assert_eq!(loaded, bundle(1));
    }

    #[test]
    fn layout_matches_fixed_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        registry.publish(&bundle(0)).expect("publish");
        assert!(dir.path().join("0/model/model.pkl").is_file());
        assert!(dir.path().join("0/transformer/knn_imputer.pkl").is_file());
        assert!(dir.path().join("0/target_encoder/target_encoder.pkl").is_file());
    }

    #[test]
    fn non_numeric_entry_is_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("latest")).expect("mkdir");
        let registry = ModelRegistry::new(dir.path());
        assert!(matches!(
            registry.latest_version(),
            Err(VigilError::RegistryCorruptionError(_))
        ));
    }

    #[test]
    fn non_canonical_names_rejected() {
        assert!(RegistryVersion::parse("007").is_err());
        assert!(RegistryVersion::parse("+1").is_err());
        assert!(RegistryVersion::parse("").is_err());
        assert_eq!(RegistryVersion::parse("0").expect("zero"), RegistryVersion(0));
        assert_eq!(RegistryVersion::parse("12").expect("twelve"), RegistryVersion(12));
    }

    #[test]
    fn hidden_entries_are_ignored_and_orphans_cleaned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orphan = dir.path().join(".staging-0-999");
        std::fs::create_dir_all(orphan.join("model")).expect("mkdir");
        let registry = ModelRegistry::new(dir.path());
        assert_eq!(registry.latest_version().expect("latest"), None);

        registry.publish(&bundle(0)).expect("publish");
        assert!(!orphan.exists());
        assert!(dir.path().join(primitives::PUBLISH_LOCK_NAME).exists());
        assert_eq!(registry.versions().expect("versions").len(), 1);
    }

    #[test]
    fn publish_at_requires_increasing_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        registry
            .publish_at(&bundle(0), RegistryVersion(5))
            .expect("publish 5");
        assert!(matches!(
            registry.publish_at(&bundle(1), RegistryVersion(5)),
            Err(VigilError::VersionConflict {
                requested: 5,
                latest: 5
            })
        ));
        assert_eq!(registry.publish(&bundle(2)).expect("next"), RegistryVersion(6));
    }

    #[test]
    fn partial_bundle_is_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        registry.publish(&bundle(0)).expect("publish");
        std::fs::remove_file(registry.resolve(Component::TargetEncoder, RegistryVersion(0)))
            .expect("remove");
        assert!(matches!(
            registry.load_bundle::<u32>(RegistryVersion(0)),
            Err(VigilError::RegistryCorruptionError(_))
        ));
    }

    #[test]
    fn digest_is_stable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ModelRegistry::new(dir.path());
        registry.publish(&bundle(0)).expect("publish");
        let a = registry.digest(RegistryVersion(0)).expect("digest");
        let b = registry.digest(RegistryVersion(0)).expect("digest");
        assert_eq!(a, b);
        assert_eq!(a.model.len(), 64);
    }

    #[test]
    fn concurrent_publishers_get_distinct_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let root = root.clone();
                std::thread::spawn(move || {
                    ModelRegistry::new(root)
                        .publish(&bundle(i))
                        .expect("publish")
                })
            })
            .collect();
        let mut versions: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().expect("join").get())
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, vec![0, 1, 2, 3]);
    }
}
