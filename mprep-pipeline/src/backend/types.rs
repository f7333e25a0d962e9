//! Wire types for the backend API
//!
//! Request/response payloads for the contracts in [`super::BackendApi`].
//! Everything derives serde both ways; response shapes are
//! `#[serde(default)]` tolerant.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Target column key -> formula text. One formula per target per order.
pub type FormulaSet = BTreeMap<String, String>;

/// One AI-proposed formula for a standardization target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FormulaSuggestion {
    pub target: String,
    pub formula: String,
    pub reasoning: String,
}

/// Result of committing standardization formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CommitOutcome {
    pub rows_created: u64,
    /// Set when `save_template` was requested and the backend stored one.
    pub template_id: Option<i64>,
}

/// Server-side timing breakdown for one cleanup batch, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatchTiming {
    pub api_call_ms: u64,
    pub parse_ms: u64,
    pub save_ms: u64,
    pub total_ms: u64,
}

/// Result of one `ai_cleanup_batch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CleanupBatchOutcome {
    /// Rows the AI pass looked at in this batch.
    pub rows_processed: u64,
    /// Rows whose suggestions parsed and were persisted. Can be lower than
    /// `rows_processed`; partial success is normal.
    pub rows_saved: u64,
    /// Total committed rows in the order, constant across batches.
    pub total_rows: u64,
    /// False once `offset + batch_size` reached the end.
    pub has_more: bool,
    pub timing: BatchTiming,
    /// Per-row parse or save complaints, already counted out of
    /// `rows_saved`.
    pub errors: Vec<String>,
}

/// Snapshot from the cleanup status route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CleanupStatus {
    pub total_rows: u64,
    pub rows_with_ai: u64,
    pub in_progress: bool,
}

impl CleanupStatus {
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            (self.rows_with_ai as f64 / self.total_rows as f64) * 100.0
        }
    }
}

/// Result of a server-side cleanup rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CancelOutcome {
    pub rows_cleared: u64,
}

/// Summary returned when a matching run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MatchRunOutcome {
    pub rows_processed: u64,
    pub matched: u64,
    pub uncertain: u64,
    pub new_product: u64,
}

/// Per-status row counts for the review screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MatchSummary {
    pub matched: u64,
    pub uncertain: u64,
    pub new_product: u64,
    pub pending: u64,
}

/// Rows plus summary from the match results route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MatchResults {
    pub rows: Vec<mprep_common::manifest::ManifestRow>,
    pub summary: MatchSummary,
}

/// Reviewer action on one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Link the row to the chosen product.
    Accept,
    /// Link and also push the row's AI content into the catalog record.
    AcceptUpdate,
    /// No match; the row becomes a new product.
    Reject,
}

/// One submitted review decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDecision {
    pub row_id: i64,
    pub action: DecisionAction,
    /// Present for accept/accept-update, absent for reject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
}

/// Counts returned after review submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReviewOutcome {
    pub confirmed: u64,
    pub rejected: u64,
    pub updated: u64,
}

/// One pricing write. `proposed_price: None` clears the row's draft price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub row_id: i64,
    pub proposed_price: Option<Decimal>,
}

/// Frozen field snapshot sent at finalization, built from the
/// effective-value fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRow {
    pub row_id: i64,
    pub title: String,
    pub brand: String,
    pub model: String,
    pub category: String,
    pub condition: String,
    pub search_tags: String,
    pub batch_flag: bool,
    pub final_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FinalizeOutcome {
    pub rows_finalized: u64,
}

/// One entry of the AI model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    pub default: bool,
}

/// Models the backend will accept for cleanup runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelCatalog {
    pub models: Vec<ModelInfo>,
}

impl ModelCatalog {
    pub fn default_model(&self) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|m| m.default)
            .or_else(|| self.models.first())
    }
}
