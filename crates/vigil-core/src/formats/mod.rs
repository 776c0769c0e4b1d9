//! # Formats
//!
//! On-disk encodings: the binary object format and the JSON report sink.

pub mod persistence;

pub use persistence::{
    ObjectHeader, load_object, object_from_bytes, object_to_bytes, save_object, write_document,
};
