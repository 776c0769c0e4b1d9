//! # Vigil Library
//!
//! Library interface for the Vigil binary. Exposes the CLI definition and
//! configuration loading for integration tests.

pub mod cli;
pub mod config;
