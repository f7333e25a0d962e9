//! Client-side orchestration for the manifest preprocessing pipeline.
//!
//! Everything stateful lives behind the [`backend::BackendApi`] seam;
//! this crate supplies the formula-driven standardization flow, the
//! resumable AI cleanup pool, match review, and pricing on top of it.

pub mod backend;
pub mod checkpoint;
pub mod cleanup;
pub mod pricing;
pub mod review;
pub mod standardize;

pub use backend::{BackendApi, BackendError, HttpBackend};
pub use cleanup::{CleanupParams, CleanupPool, PoolHandle, RunOutcome, RunState};
