//! # mprep Common Library
//!
//! Shared code for the manifest preprocessing pipeline:
//! - Manifest domain model (rows, orders, raw previews)
//! - Column-transform formula engine
//! - Pipeline stage derivation
//! - Progress event types and bus
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod formula;
pub mod manifest;
pub mod stage;

pub use error::{Error, Result};
pub use stage::PipelineStage;
