//! # Fixed Primitives
//!
//! Hardcoded constants for the Vigil pipeline.
//!
//! These values define on-disk layouts and wire formats. Changing any of
//! them breaks compatibility with existing registries and run directories.

/// Magic bytes for the Vigil object format header.
///
/// - File Header = Magic Bytes ("VGIL") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"VGIL";

/// Current object format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum size of a persisted object (256 MB).
///
/// Validated before any deserialization is attempted.
pub const MAX_OBJECT_SIZE: usize = 256 * 1024 * 1024;

// =============================================================================
// REGISTRY LAYOUT
// =============================================================================

/// Sub-directory holding the trained classifier.
pub const MODEL_DIR_NAME: &str = "model";

/// Sub-directory holding the fitted transformer (imputer state).
pub const TRANSFORMER_DIR_NAME: &str = "transformer";

/// Sub-directory holding the fitted target encoder.
pub const TARGET_ENCODER_DIR_NAME: &str = "target_encoder";

/// File name of the classifier inside [`MODEL_DIR_NAME`].
pub const MODEL_FILE_NAME: &str = "model.pkl";

/// File name of the transformer inside [`TRANSFORMER_DIR_NAME`].
pub const TRANSFORMER_FILE_NAME: &str = "knn_imputer.pkl";

/// File name of the target encoder inside [`TARGET_ENCODER_DIR_NAME`].
pub const TARGET_ENCODER_FILE_NAME: &str = "target_encoder.pkl";

/// Lock file serializing publishers. Dot-prefixed, so listings skip it.
pub const PUBLISH_LOCK_NAME: &str = ".publish.lock";

/// Prefix of staging directories used while publishing.
pub const STAGING_PREFIX: &str = ".staging-";

// =============================================================================
// RUN LAYOUT
// =============================================================================

/// Timestamp format of run ids (`%m%d%Y__%H%M%S`).
pub const RUN_ID_FORMAT: &str = "%m%d%Y__%H%M%S";

/// Per-run key-value database holding stage records.
pub const RUN_DB_NAME: &str = "run.redb";

/// Dataset file names inside stage directories.
pub const FEATURE_STORE_FILE_NAME: &str = "feature_store.bin";
pub const TRAIN_FILE_NAME: &str = "train.bin";
pub const TEST_FILE_NAME: &str = "test.bin";

/// Validation report file name.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Upper bound on synthetic rows a resampler may add, as a multiple of the input.
pub const MAX_RESAMPLE_FACTOR: usize = 10;
