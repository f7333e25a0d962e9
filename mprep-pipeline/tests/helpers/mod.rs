//! Shared test fixtures: a scriptable in-memory backend plus row builders.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mprep_common::manifest::{
    ManifestPreview, ManifestRow, MatchCandidate, OrderSummary, RawRow,
};
use mprep_pipeline::backend::{
    BackendApi, BackendError, CancelOutcome, CleanupBatchOutcome, CleanupStatus, CommitOutcome,
    DecisionAction, FinalizeOutcome, FinalizeRow, FormulaSet, FormulaSuggestion, MatchResults,
    MatchRunOutcome, MatchSummary, ModelCatalog, ModelInfo, PriceUpdate, ReviewOutcome,
    RowDecision,
};

/// Scriptable [`BackendApi`] double. Every mutating call is recorded so
/// tests can assert on exactly what the flows sent.
pub struct MockBackend {
    order: Mutex<OrderSummary>,
    rows: Mutex<Vec<ManifestRow>>,
    total_rows: u64,
    batch_delay: Option<Duration>,
    fetch_order_delay_once: Mutex<Option<Duration>>,
    fail_offsets: HashSet<u64>,
    rollback_fails: AtomicBool,
    pricing_fails: AtomicBool,

    pub claimed: Mutex<Vec<u64>>,
    pub commit_calls: Mutex<Vec<(FormulaSet, bool)>>,
    pub clear_manifest_calls: AtomicU64,
    pub review_calls: Mutex<Vec<Vec<RowDecision>>>,
    pub undo_calls: AtomicU64,
    pub pricing_calls: Mutex<Vec<Vec<PriceUpdate>>>,
    pub clear_pricing_calls: AtomicU64,
    pub finalize_calls: Mutex<Vec<Vec<FinalizeRow>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(OrderSummary::default()),
            rows: Mutex::new(Vec::new()),
            total_rows: 0,
            batch_delay: None,
            fetch_order_delay_once: Mutex::new(None),
            fail_offsets: HashSet::new(),
            rollback_fails: AtomicBool::new(false),
            pricing_fails: AtomicBool::new(false),
            claimed: Mutex::new(Vec::new()),
            commit_calls: Mutex::new(Vec::new()),
            clear_manifest_calls: AtomicU64::new(0),
            review_calls: Mutex::new(Vec::new()),
            undo_calls: AtomicU64::new(0),
            pricing_calls: Mutex::new(Vec::new()),
            clear_pricing_calls: AtomicU64::new(0),
            finalize_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_order(self, order: OrderSummary) -> Self {
        *self.order.lock().unwrap() = order;
        self
    }

    pub fn with_rows(self, rows: Vec<ManifestRow>) -> Self {
        *self.rows.lock().unwrap() = rows;
        self
    }

    /// Manifest length the cleanup batch route reports.
    pub fn with_total_rows(mut self, total: u64) -> Self {
        self.total_rows = total;
        self
    }

    /// Sleep inside every `ai_cleanup_batch`, to hold batches in flight.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    /// Delay only the next `fetch_order`, to interleave two callers.
    pub fn delay_next_fetch_order(self, delay: Duration) -> Self {
        *self.fetch_order_delay_once.lock().unwrap() = Some(delay);
        self
    }

    /// Make the batch at this offset fail with an HTTP 500.
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_offsets.insert(offset);
        self
    }

    pub fn fail_rollback(self) -> Self {
        self.rollback_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_rollback_fails(&self, fails: bool) {
        self.rollback_fails.store(fails, Ordering::SeqCst);
    }

    pub fn fail_pricing(self, fails: bool) -> Self {
        self.pricing_fails.store(fails, Ordering::SeqCst);
        self
    }

    pub fn set_pricing_fails(&self, fails: bool) {
        self.pricing_fails.store(fails, Ordering::SeqCst);
    }

    pub fn claimed_sorted(&self) -> Vec<u64> {
        let mut claimed = self.claimed.lock().unwrap().clone();
        claimed.sort_unstable();
        claimed
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn fetch_order(&self, _order_id: i64) -> Result<OrderSummary, BackendError> {
        let delay = self.fetch_order_delay_once.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.order.lock().unwrap().clone())
    }

    async fn fetch_rows(&self, _order_id: i64) -> Result<Vec<ManifestRow>, BackendError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn suggest_formulas(
        &self,
        _order_id: i64,
        _template: Option<&str>,
    ) -> Result<Vec<FormulaSuggestion>, BackendError> {
        Ok(vec![FormulaSuggestion {
            target: "description".to_string(),
            formula: "TITLE([Product Description])".to_string(),
            reasoning: "direct header match".to_string(),
        }])
    }

    async fn commit_standardize(
        &self,
        _order_id: i64,
        formulas: &FormulaSet,
        save_template: bool,
    ) -> Result<CommitOutcome, BackendError> {
        self.commit_calls
            .lock()
            .unwrap()
            .push((formulas.clone(), save_template));
        let rows_created = u64::from(self.order.lock().unwrap().row_count);
        Ok(CommitOutcome {
            rows_created,
            template_id: save_template.then_some(7),
        })
    }

    async fn clear_manifest_rows(&self, _order_id: i64) -> Result<u64, BackendError> {
        self.clear_manifest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(u64::from(self.order.lock().unwrap().row_count))
    }

    async fn ai_cleanup_batch(
        &self,
        _order_id: i64,
        offset: u64,
        batch_size: u64,
        _model: Option<&str>,
    ) -> Result<CleanupBatchOutcome, BackendError> {
        if let Some(delay) = self.batch_delay {
            tokio::time::sleep(delay).await;
        }
        self.claimed.lock().unwrap().push(offset);
        if self.fail_offsets.contains(&offset) {
            return Err(BackendError::Api {
                status: 500,
                message: "model call exploded".to_string(),
            });
        }
        let total = self.total_rows;
        let end = (offset + batch_size).min(total);
        let processed = end.saturating_sub(offset.min(total));
        Ok(CleanupBatchOutcome {
            rows_processed: processed,
            rows_saved: processed,
            total_rows: total,
            has_more: end < total,
            timing: Default::default(),
            errors: Vec::new(),
        })
    }

    async fn cleanup_status(&self, _order_id: i64) -> Result<CleanupStatus, BackendError> {
        Ok(CleanupStatus {
            total_rows: self.total_rows,
            rows_with_ai: 0,
            in_progress: false,
        })
    }

    async fn cancel_cleanup(&self, _order_id: i64) -> Result<CancelOutcome, BackendError> {
        if self.rollback_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 500,
                message: "rollback refused".to_string(),
            });
        }
        Ok(CancelOutcome {
            rows_cleared: self.total_rows,
        })
    }

    async fn run_matching(
        &self,
        _order_id: i64,
        _use_ai: bool,
    ) -> Result<MatchRunOutcome, BackendError> {
        Ok(MatchRunOutcome {
            rows_processed: self.rows.lock().unwrap().len() as u64,
            matched: 0,
            uncertain: 0,
            new_product: 0,
        })
    }

    async fn get_match_results(&self, _order_id: i64) -> Result<MatchResults, BackendError> {
        let rows = self.rows.lock().unwrap().clone();
        let summary = MatchSummary {
            pending: rows.len() as u64,
            ..Default::default()
        };
        Ok(MatchResults { rows, summary })
    }

    async fn review_matches(
        &self,
        _order_id: i64,
        decisions: &[RowDecision],
    ) -> Result<ReviewOutcome, BackendError> {
        self.review_calls.lock().unwrap().push(decisions.to_vec());
        let mut outcome = ReviewOutcome::default();
        for decision in decisions {
            match decision.action {
                DecisionAction::Accept => outcome.confirmed += 1,
                DecisionAction::AcceptUpdate => {
                    outcome.confirmed += 1;
                    outcome.updated += 1;
                }
                DecisionAction::Reject => outcome.rejected += 1,
            }
        }
        Ok(outcome)
    }

    async fn undo_matching(&self, _order_id: i64) -> Result<u64, BackendError> {
        self.undo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().unwrap().len() as u64)
    }

    async fn update_pricing(
        &self,
        _order_id: i64,
        updates: &[PriceUpdate],
    ) -> Result<u64, BackendError> {
        if self.pricing_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 500,
                message: "pricing write refused".to_string(),
            });
        }
        self.pricing_calls.lock().unwrap().push(updates.to_vec());
        Ok(updates.len() as u64)
    }

    async fn clear_pricing(&self, _order_id: i64) -> Result<u64, BackendError> {
        self.clear_pricing_calls.fetch_add(1, Ordering::SeqCst);
        let cleared = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.proposed_price.is_some())
            .count();
        Ok(cleared as u64)
    }

    async fn finalize_rows(
        &self,
        _order_id: i64,
        rows: &[FinalizeRow],
    ) -> Result<FinalizeOutcome, BackendError> {
        self.finalize_calls.lock().unwrap().push(rows.to_vec());
        Ok(FinalizeOutcome {
            rows_finalized: rows.len() as u64,
        })
    }

    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        Ok(ModelCatalog {
            models: vec![
                ModelInfo {
                    id: "fast-v1".to_string(),
                    label: "Fast".to_string(),
                    default: true,
                },
                ModelInfo {
                    id: "thorough-v1".to_string(),
                    label: "Thorough".to_string(),
                    default: false,
                },
            ],
        })
    }
}

pub fn order_summary(id: i64, row_count: u32, item_count: u32) -> OrderSummary {
    OrderSummary {
        id,
        order_number: format!("PO-{:04}", id),
        item_count,
        row_count,
        manifest_preview: None,
    }
}

pub fn preview_with_headers(headers: &[&str], sample: Vec<BTreeMap<String, String>>) -> ManifestPreview {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let signature = mprep_common::manifest::header_signature(&headers);
    let rows = sample
        .into_iter()
        .enumerate()
        .map(|(i, values)| RawRow {
            row_number: i as u32 + 1,
            values,
        })
        .collect();
    ManifestPreview {
        headers,
        row_count: 0,
        signature,
        template_id: None,
        template_name: String::new(),
        rows,
    }
}

pub fn committed_row(id: i64, row_number: u32, description: &str, retail: &str) -> ManifestRow {
    ManifestRow {
        id,
        row_number,
        quantity: 1,
        description: description.to_string(),
        retail_value: retail.to_string(),
        ..Default::default()
    }
}

pub fn candidate(product_id: i64, title: &str, score: f64) -> MatchCandidate {
    MatchCandidate {
        product_id,
        product_title: title.to_string(),
        score,
        match_type: "embedding".to_string(),
    }
}
