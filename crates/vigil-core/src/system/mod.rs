//! # System Module
//!
//! The pipeline state machine and the orchestrator that drives one run
//! through it.

mod pipeline;

pub use pipeline::*;
