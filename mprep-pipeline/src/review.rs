//! Match review
//!
//! Matching itself runs server-side. This module buffers the reviewer's
//! per-row decisions locally, fills in defaults from each row's candidate
//! list, and submits everything in one call. Defaults are resolved against
//! rows fetched at submit time, not whatever the reviewer last saw.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use mprep_common::events::{EventBus, PipelineEvent};
use mprep_common::manifest::{ManifestRow, MatchCandidate};
use mprep_common::stage::PipelineStage;
use mprep_common::{Error, Result};

use crate::backend::{
    BackendApi, DecisionAction, MatchResults, MatchRunOutcome, ReviewOutcome, RowDecision,
};
use crate::standardize::cascade_list;

/// A reviewer's call on one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Link the row to this product.
    Accept { product_id: i64 },
    /// Link and push the row's AI content into the catalog record.
    AcceptUpdate { product_id: i64 },
    /// No match; the row becomes a new product.
    RejectNew,
}

impl Decision {
    fn into_row_decision(self, row_id: i64) -> RowDecision {
        match self {
            Decision::Accept { product_id } => RowDecision {
                row_id,
                action: DecisionAction::Accept,
                product_id: Some(product_id),
            },
            Decision::AcceptUpdate { product_id } => RowDecision {
                row_id,
                action: DecisionAction::AcceptUpdate,
                product_id: Some(product_id),
            },
            Decision::RejectNew => RowDecision {
                row_id,
                action: DecisionAction::Reject,
                product_id: None,
            },
        }
    }
}

/// Highest-scoring candidate. Ties keep the earliest entry, which
/// preserves the server's score-descending ordering.
pub fn top_candidate(candidates: &[MatchCandidate]) -> Option<&MatchCandidate> {
    let mut best: Option<&MatchCandidate> = None;
    for candidate in candidates {
        match best {
            None => best = Some(candidate),
            Some(current) if candidate.score > current.score => best = Some(candidate),
            Some(_) => {}
        }
    }
    best
}

/// Client-side decision buffer for one order's review pass.
#[derive(Debug, Default)]
pub struct ReviewSession {
    decisions: BTreeMap<i64, Decision>,
}

impl ReviewSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, row_id: i64, decision: Decision) {
        self.decisions.insert(row_id, decision);
    }

    /// Remove an explicit decision, returning the row to the default
    /// resolution path.
    pub fn undo(&mut self, row_id: i64) -> Option<Decision> {
        self.decisions.remove(&row_id)
    }

    pub fn decision(&self, row_id: i64) -> Option<Decision> {
        self.decisions.get(&row_id).copied()
    }

    pub fn is_decided(&self, row_id: i64) -> bool {
        self.decisions.contains_key(&row_id)
    }

    pub fn decided_count(&self) -> usize {
        self.decisions.len()
    }

    pub fn clear(&mut self) {
        self.decisions.clear();
    }

    /// Record `Accept(top candidate)` on every undecided row with match
    /// activity. Existing decisions are never overwritten, so a second
    /// call changes nothing.
    pub fn accept_all(&mut self, rows: &[ManifestRow]) -> usize {
        let mut added = 0;
        for row in rows {
            if !row.has_match_activity() || self.decisions.contains_key(&row.id) {
                continue;
            }
            let accepted = top_candidate(&row.match_candidates)
                .map(|top| top.product_id)
                .or(row.matched_product_id);
            if let Some(product_id) = accepted {
                self.decisions.insert(row.id, Decision::Accept { product_id });
                added += 1;
            }
        }
        added
    }

    /// Build the complete submit list. An explicit decision wins; an
    /// undecided row takes its top candidate when the score clears the
    /// floor, else keeps an already-linked product, else rejects into a
    /// new product.
    pub fn resolve(&self, rows: &[ManifestRow], confidence_floor: f64) -> Vec<RowDecision> {
        rows.iter()
            .map(|row| {
                if let Some(decision) = self.decisions.get(&row.id) {
                    return decision.into_row_decision(row.id);
                }
                let default = match top_candidate(&row.match_candidates) {
                    Some(top) if top.score >= confidence_floor => Decision::Accept {
                        product_id: top.product_id,
                    },
                    _ => match row.matched_product_id {
                        Some(product_id) => Decision::Accept { product_id },
                        None => Decision::RejectNew,
                    },
                };
                default.into_row_decision(row.id)
            })
            .collect()
    }
}

/// Drives matching and review against the backend.
pub struct ReviewFlow {
    backend: Arc<dyn BackendApi>,
    events: EventBus,
    confidence_floor: f64,
}

impl ReviewFlow {
    pub fn new(backend: Arc<dyn BackendApi>, events: EventBus, confidence_floor: f64) -> Self {
        Self {
            backend,
            events,
            confidence_floor,
        }
    }

    /// Kick off the server-side matching pass.
    pub async fn run_matching(&self, order_id: i64, use_ai: bool) -> Result<MatchRunOutcome> {
        let outcome = self.backend.run_matching(order_id, use_ai).await?;
        tracing::info!(
            order_id,
            rows_processed = outcome.rows_processed,
            matched = outcome.matched,
            uncertain = outcome.uncertain,
            new_product = outcome.new_product,
            "Matching pass finished"
        );
        Ok(outcome)
    }

    pub async fn results(&self, order_id: i64) -> Result<MatchResults> {
        Ok(self.backend.get_match_results(order_id).await?)
    }

    /// Resolve every row against fresh results and submit the full list.
    /// The session's buffer clears only after the backend accepts it.
    pub async fn submit(
        &self,
        order_id: i64,
        session: &mut ReviewSession,
    ) -> Result<ReviewOutcome> {
        let results = self.backend.get_match_results(order_id).await?;
        if results.rows.is_empty() {
            return Err(Error::InvalidInput(format!(
                "order {} has no rows to review",
                order_id
            )));
        }
        let decisions = session.resolve(&results.rows, self.confidence_floor);
        let outcome = self.backend.review_matches(order_id, &decisions).await?;
        session.clear();
        tracing::info!(
            order_id,
            confirmed = outcome.confirmed,
            rejected = outcome.rejected,
            updated = outcome.updated,
            "Review submitted"
        );
        self.events.emit(PipelineEvent::ReviewSubmitted {
            order_id,
            confirmed: outcome.confirmed,
            rejected: outcome.rejected,
            updated: outcome.updated,
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }

    /// Clear matching results plus downstream pricing.
    pub async fn undo_matching(&self, order_id: i64, confirm_destructive: bool) -> Result<u64> {
        if !confirm_destructive {
            return Err(Error::InvalidInput(format!(
                "undoing matching discards {}",
                cascade_list(PipelineStage::Matching)
            )));
        }
        let affected = self.backend.undo_matching(order_id).await?;
        tracing::info!(order_id, rows_affected = affected, "Matching undone");
        Ok(affected)
    }
}
