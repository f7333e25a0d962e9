//! Pricing engine
//!
//! Draft prices land in bulk (percent of retail) or per row (manual
//! edits, debounced into coalesced writes). Finalize freezes a row's
//! content snapshot and price; finalized rows drop out of every later
//! bulk operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use mprep_common::events::{EventBus, PipelineEvent};
use mprep_common::manifest::ManifestRow;
use mprep_common::{Error, Result};

use crate::backend::{BackendApi, FinalizeOutcome, FinalizeRow, PriceUpdate};

/// Quiet period before buffered manual edits flush.
pub const AUTOSAVE_QUIET_MS: u64 = 300;

/// Which rows a bulk pricing call touches. Finalized rows are always
/// excluded, even from an explicit row list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceTarget {
    All,
    /// Rows with neither a draft nor a final price.
    Unpriced,
    Rows(Vec<i64>),
}

/// Counts from a bulk percent-of-retail pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkPriceOutcome {
    pub updated: u64,
    /// Rows left untouched because their retail value was empty or
    /// unparsable.
    pub skipped: u64,
}

fn target_rows<'a>(rows: &'a [ManifestRow], target: &PriceTarget) -> Vec<&'a ManifestRow> {
    rows.iter()
        .filter(|row| !row.is_finalized())
        .filter(|row| match target {
            PriceTarget::All => true,
            PriceTarget::Unpriced => row.effective_price().is_none(),
            PriceTarget::Rows(ids) => ids.contains(&row.id),
        })
        .collect()
}

fn percent_price(retail: Decimal, percent: Decimal) -> Decimal {
    // round_dp is banker's rounding, matching how the server rounds money.
    (retail * percent / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Frozen field snapshot for one row, built from the effective-value
/// fallbacks. `None` when the row has no price yet.
pub fn finalize_snapshot(row: &ManifestRow) -> Option<FinalizeRow> {
    let final_price = row.effective_price()?;
    Some(FinalizeRow {
        row_id: row.id,
        title: row.effective_title().to_string(),
        brand: row.effective_brand().to_string(),
        model: row.effective_model().to_string(),
        category: row.effective_category().to_string(),
        condition: row.effective_condition().to_string(),
        search_tags: row.search_tags.clone(),
        batch_flag: row.batch_flag,
        final_price,
    })
}

/// Bulk pricing and finalization against the backend. Targets resolve
/// against a fresh row snapshot at call time.
pub struct PricingFlow {
    backend: Arc<dyn BackendApi>,
    events: EventBus,
}

impl PricingFlow {
    pub fn new(backend: Arc<dyn BackendApi>, events: EventBus) -> Self {
        Self { backend, events }
    }

    /// Propose `retail × percent ÷ 100` (bankers-rounded to cents) on the
    /// targeted rows, one bulk write. Rows without a parsable retail value
    /// are counted as skipped and left untouched.
    pub async fn percent_of_retail(
        &self,
        order_id: i64,
        target: &PriceTarget,
        percent: Decimal,
    ) -> Result<BulkPriceOutcome> {
        if percent < Decimal::ZERO {
            return Err(Error::InvalidInput(
                "percent must be zero or positive".to_string(),
            ));
        }
        let rows = self.backend.fetch_rows(order_id).await?;
        let targeted = target_rows(&rows, target);

        let mut updates = Vec::new();
        let mut skipped = 0u64;
        for row in &targeted {
            match row.retail_decimal() {
                Some(retail) => updates.push(PriceUpdate {
                    row_id: row.id,
                    proposed_price: Some(percent_price(retail, percent)),
                }),
                None => skipped += 1,
            }
        }
        if updates.is_empty() {
            return Ok(BulkPriceOutcome { updated: 0, skipped });
        }

        let updated = self.backend.update_pricing(order_id, &updates).await?;
        tracing::info!(order_id, updated, skipped, percent = %percent, "Bulk pricing applied");
        self.events.emit(PipelineEvent::PricingUpdated {
            order_id,
            rows_updated: updated,
            timestamp: Utc::now(),
        });
        Ok(BulkPriceOutcome { updated, skipped })
    }

    /// Clear draft prices. `All` uses the order-wide route; any other
    /// target writes explicit nulls to the rows that have a draft.
    pub async fn clear(
        &self,
        order_id: i64,
        target: &PriceTarget,
        confirm_destructive: bool,
    ) -> Result<u64> {
        if !confirm_destructive {
            return Err(Error::InvalidInput(
                "clearing discards the draft prices on the targeted rows".to_string(),
            ));
        }
        let cleared = match target {
            PriceTarget::All => self.backend.clear_pricing(order_id).await?,
            _ => {
                let rows = self.backend.fetch_rows(order_id).await?;
                let updates: Vec<PriceUpdate> = target_rows(&rows, target)
                    .into_iter()
                    .filter(|row| row.proposed_price.is_some())
                    .map(|row| PriceUpdate {
                        row_id: row.id,
                        proposed_price: None,
                    })
                    .collect();
                if updates.is_empty() {
                    0
                } else {
                    self.backend.update_pricing(order_id, &updates).await?
                }
            }
        };
        tracing::info!(order_id, cleared, "Draft prices cleared");
        self.events.emit(PipelineEvent::PricingUpdated {
            order_id,
            rows_updated: cleared,
            timestamp: Utc::now(),
        });
        Ok(cleared)
    }

    /// Freeze the targeted rows. Every one must carry an effective price;
    /// otherwise the error names the offending manifest row numbers and
    /// nothing is sent.
    pub async fn finalize(
        &self,
        order_id: i64,
        target: &PriceTarget,
        confirm: bool,
    ) -> Result<FinalizeOutcome> {
        if !confirm {
            return Err(Error::InvalidInput(
                "finalizing freezes row content and prices for check-in".to_string(),
            ));
        }
        let rows = self.backend.fetch_rows(order_id).await?;
        let targeted = target_rows(&rows, target);
        if targeted.is_empty() {
            return Err(Error::InvalidInput(format!(
                "order {} has no rows left to finalize",
                order_id
            )));
        }

        let unpriced: Vec<String> = targeted
            .iter()
            .filter(|row| row.effective_price().is_none())
            .map(|row| row.row_number.to_string())
            .collect();
        if !unpriced.is_empty() {
            return Err(Error::InvalidInput(format!(
                "rows without a price cannot be finalized: {}",
                unpriced.join(", ")
            )));
        }

        let snapshots: Vec<FinalizeRow> = targeted
            .iter()
            .filter_map(|row| finalize_snapshot(row))
            .collect();
        let outcome = self.backend.finalize_rows(order_id, &snapshots).await?;
        tracing::info!(order_id, rows_finalized = outcome.rows_finalized, "Rows finalized");
        self.events.emit(PipelineEvent::RowsFinalized {
            order_id,
            rows_finalized: outcome.rows_finalized,
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }
}

struct AutosaveInner {
    /// Latest buffered value per row; newer edits replace older ones.
    pending: tokio::sync::Mutex<HashMap<i64, Option<Decimal>>>,
    /// Bumped on every edit; a timer only flushes when its generation is
    /// still the newest, which is what makes the timer a quiet period.
    generation: AtomicU64,
}

/// Debounced manual price edits. Each edit restarts a quiet timer;
/// when the timer survives the quiet period, everything pending flushes
/// as one `update_pricing` call with the newest value per row.
#[derive(Clone)]
pub struct PriceAutosave {
    backend: Arc<dyn BackendApi>,
    events: EventBus,
    order_id: i64,
    quiet: Duration,
    inner: Arc<AutosaveInner>,
}

impl PriceAutosave {
    pub fn new(backend: Arc<dyn BackendApi>, events: EventBus, order_id: i64) -> Self {
        Self {
            backend,
            events,
            order_id,
            quiet: Duration::from_millis(AUTOSAVE_QUIET_MS),
            inner: Arc::new(AutosaveInner {
                pending: tokio::sync::Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Buffer one edit and restart the quiet timer. `None` queues a
    /// draft-price clear for the row.
    pub async fn set_price(&self, row_id: i64, price: Option<Decimal>) {
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(row_id, price);
        }
        let my_generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let autosave = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(autosave.quiet).await;
            if autosave.inner.generation.load(Ordering::SeqCst) != my_generation {
                // A newer edit restarted the timer; its task will flush.
                return;
            }
            if let Err(e) = autosave.flush_now().await {
                tracing::warn!(
                    order_id = autosave.order_id,
                    error = %e,
                    "Price autosave flush failed, edits kept buffered"
                );
            }
        });
    }

    /// Push everything pending in one call, regardless of the timer.
    /// Returns the server's updated-row count, 0 when nothing was pending.
    pub async fn flush_now(&self) -> Result<u64> {
        let drained: Vec<PriceUpdate> = {
            let mut pending = self.inner.pending.lock().await;
            pending
                .drain()
                .map(|(row_id, proposed_price)| PriceUpdate {
                    row_id,
                    proposed_price,
                })
                .collect()
        };
        if drained.is_empty() {
            return Ok(0);
        }

        match self.backend.update_pricing(self.order_id, &drained).await {
            Ok(updated) => {
                tracing::debug!(
                    order_id = self.order_id,
                    rows = drained.len(),
                    updated,
                    "Autosave flushed"
                );
                self.events.emit(PipelineEvent::PricingUpdated {
                    order_id: self.order_id,
                    rows_updated: updated,
                    timestamp: Utc::now(),
                });
                Ok(updated)
            }
            Err(e) => {
                // Re-buffer without clobbering edits made during the call.
                let mut pending = self.inner.pending.lock().await;
                for update in drained {
                    pending.entry(update.row_id).or_insert(update.proposed_price);
                }
                Err(e.into())
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}
