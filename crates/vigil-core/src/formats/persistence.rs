//! # Persistence Format
//!
//! Binary serialization for fitted objects (models, encoders, transformers)
//! and datasets.
//!
//! Format: Header (5 bytes) + postcard-serialized payload.
//! - 4 bytes: Magic ("VGIL")
//! - 1 byte: Version
//!
//! ## Limits
//!
//! The size limit and the header are checked before any payload decoding,
//! so corrupted or oversized files fail fast with `SerializationError`.
//!
//! ## Writes
//!
//! File writes go to a sibling temp file, are fsynced, then renamed over
//! the destination. A reader sees either the old file or the new one.

use crate::{VigilError, primitives};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every persisted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl ObjectHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(VigilError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(VigilError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VigilError> {
        if bytes.len() < HEADER_LEN {
            return Err(VigilError::SerializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BYTE CODEC
// =============================================================================

/// Serialize an object to bytes (header + payload). No file I/O.
pub fn object_to_bytes<T: Serialize>(object: &T) -> Result<Vec<u8>, VigilError> {
    let payload =
        postcard::to_stdvec(object).map_err(|e| VigilError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&ObjectHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize an object from bytes. No file I/O.
pub fn object_from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, VigilError> {
    if bytes.len() < HEADER_LEN {
        return Err(VigilError::SerializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_LEN
        )));
    }
    if bytes.len() > primitives::MAX_OBJECT_SIZE {
        return Err(VigilError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            primitives::MAX_OBJECT_SIZE
        )));
    }

    let header = ObjectHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        VigilError::SerializationError(format!("Failed to deserialize object: {}", e))
    })
}

// =============================================================================
// FILE I/O
// =============================================================================

/// Persist an object at `path`, creating parent directories.
pub fn save_object<T: Serialize>(path: &Path, object: &T) -> Result<(), VigilError> {
    let bytes = object_to_bytes(object)?;
    write_atomic(path, &bytes)
}

/// Load an object previously written by [`save_object`].
pub fn load_object<T: DeserializeOwned>(path: &Path) -> Result<T, VigilError> {
    let bytes = std::fs::read(path)
        .map_err(|e| VigilError::IoError(format!("{}: {}", path.display(), e)))?;
    object_from_bytes(&bytes)
}

/// Write a structured document as pretty-printed JSON.
pub fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), VigilError> {
    let mut bytes = serde_json::to_vec_pretty(document)
        .map_err(|e| VigilError::SerializationError(e.to_string()))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), VigilError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(VigilError::IoError(format!("{}: {}", path.display(), e)));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        weights: Vec<f64>,
    }

    fn sample() -> Sample {
        Sample {
            name: "imputer".to_string(),
            weights: vec![0.25, f64::MAX, -1.5],
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = ObjectHeader::new();
        let restored = ObjectHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let bytes1 = object_to_bytes(&sample()).expect("serialize");
        let restored: Sample = object_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = object_to_bytes(&restored).expect("reserialize");
        assert_eq!(restored, sample());
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(object_from_bytes::<Sample>(&bytes).is_err());
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = object_to_bytes(&sample()).expect("serialize");
        let result = object_from_bytes::<Sample>(&bytes[..bytes.len() - 4]);
        assert!(matches!(result, Err(VigilError::SerializationError(_))));
    }

    #[test]
    fn file_roundtrip_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("obj.pkl");
        save_object(&path, &sample()).expect("save");
        let loaded: Sample = load_object(&path).expect("load");
        assert_eq!(loaded, sample());

        let entries: Vec<_> = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn document_is_readable_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        write_document(&path, &serde_json::json!({"train.dropped_columns": ["x"]}))
            .expect("write");
        let text = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["train.dropped_columns"][0], "x");
    }
}
