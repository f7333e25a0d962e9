//! Backend API seam
//!
//! All persistence and AI work happens server-side; this trait is the
//! complete surface the pipeline drives. Production uses [`HttpBackend`];
//! tests script an in-memory fake.

use async_trait::async_trait;
use thiserror::Error;

use mprep_common::manifest::{ManifestRow, OrderSummary};

mod http;
pub mod types;

pub use http::HttpBackend;
pub use types::*;

/// Errors surfaced by backend calls.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTTP 404: order or row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 409: the operation conflicts with current state, e.g. clearing
    /// a manifest that already has inventory items.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// HTTP 429/503: the backend asked us to back off.
    #[error("Backend busy (HTTP {0}), retry later")]
    Busy(u16),

    /// Any other non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// 2xx body that did not decode as the expected shape.
    #[error("Invalid response payload: {0}")]
    Parse(String),
}

impl From<BackendError> for mprep_common::Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(message) => mprep_common::Error::NotFound(message),
            BackendError::Conflict(message) => mprep_common::Error::InvalidInput(message),
            other => mprep_common::Error::Internal(other.to_string()),
        }
    }
}

/// The backend operations the pipeline consumes, one method per route.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn fetch_order(&self, order_id: i64) -> Result<OrderSummary, BackendError>;

    async fn fetch_rows(&self, order_id: i64) -> Result<Vec<ManifestRow>, BackendError>;

    /// AI formula proposals for the order's raw headers. Purely additive;
    /// touches no committed rows.
    async fn suggest_formulas(
        &self,
        order_id: i64,
        template: Option<&str>,
    ) -> Result<Vec<FormulaSuggestion>, BackendError>;

    /// Evaluate formulas server-side over the full manifest, replacing any
    /// previously committed rows.
    async fn commit_standardize(
        &self,
        order_id: i64,
        formulas: &FormulaSet,
        save_template: bool,
    ) -> Result<CommitOutcome, BackendError>;

    /// Delete all committed rows. Returns how many went away.
    async fn clear_manifest_rows(&self, order_id: i64) -> Result<u64, BackendError>;

    /// Run the AI cleanup pass over rows `[offset, offset + batch_size)`.
    async fn ai_cleanup_batch(
        &self,
        order_id: i64,
        offset: u64,
        batch_size: u64,
        model: Option<&str>,
    ) -> Result<CleanupBatchOutcome, BackendError>;

    async fn cleanup_status(&self, order_id: i64) -> Result<CleanupStatus, BackendError>;

    /// Roll back every AI cleanup artifact plus downstream matching and
    /// pricing data.
    async fn cancel_cleanup(&self, order_id: i64) -> Result<CancelOutcome, BackendError>;

    async fn run_matching(&self, order_id: i64, use_ai: bool)
        -> Result<MatchRunOutcome, BackendError>;

    async fn get_match_results(&self, order_id: i64) -> Result<MatchResults, BackendError>;

    async fn review_matches(
        &self,
        order_id: i64,
        decisions: &[RowDecision],
    ) -> Result<ReviewOutcome, BackendError>;

    /// Clear matching results plus downstream pricing. Returns rows
    /// affected.
    async fn undo_matching(&self, order_id: i64) -> Result<u64, BackendError>;

    async fn update_pricing(
        &self,
        order_id: i64,
        updates: &[PriceUpdate],
    ) -> Result<u64, BackendError>;

    /// Clear draft prices order-wide. Finalized rows are untouched.
    async fn clear_pricing(&self, order_id: i64) -> Result<u64, BackendError>;

    async fn finalize_rows(
        &self,
        order_id: i64,
        rows: &[FinalizeRow],
    ) -> Result<FinalizeOutcome, BackendError>;

    async fn list_models(&self) -> Result<ModelCatalog, BackendError>;
}
