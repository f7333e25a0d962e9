//! Cleanup worker loop
//!
//! Each worker repeatedly claims the next batch range off a shared atomic
//! counter and asks the backend to process it. Stop conditions (pause,
//! cancel, first error, batch cap, end of manifest) are only checked
//! between batches: an in-flight request is always allowed to finish.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mprep_common::events::{EventBus, PipelineEvent};

use crate::backend::BackendApi;

use super::progress::Shared;

pub(crate) struct WorkerContext {
    pub(crate) worker_id: usize,
    pub(crate) run_id: Uuid,
    pub(crate) order_id: i64,
    pub(crate) batch_size: u64,
    pub(crate) workers: usize,
    pub(crate) model: Option<String>,
    pub(crate) max_batches: Option<u64>,
    pub(crate) backend: Arc<dyn BackendApi>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) stop: CancellationToken,
    pub(crate) events: EventBus,
}

pub(crate) async fn run_worker(ctx: WorkerContext) {
    tracing::debug!(worker = ctx.worker_id, order_id = ctx.order_id, "Worker started");
    loop {
        if ctx.stop.is_cancelled() {
            break;
        }

        if let Some(cap) = ctx.max_batches {
            // fetch_add makes the cap exact under concurrency: each claim
            // consumes one slot before any offset is taken.
            if ctx.shared.batches_claimed.fetch_add(1, Ordering::SeqCst) >= cap {
                tracing::debug!(worker = ctx.worker_id, cap, "Batch cap reached");
                break;
            }
        }

        let offset = ctx.shared.next_offset.fetch_add(ctx.batch_size, Ordering::SeqCst);
        if let Some(total) = ctx.shared.total() {
            if offset >= total {
                break;
            }
        }

        let started = Instant::now();
        match ctx
            .backend
            .ai_cleanup_batch(ctx.order_id, offset, ctx.batch_size, ctx.model.as_deref())
            .await
        {
            Ok(outcome) => {
                ctx.shared.record_batch(&outcome, started.elapsed());
                tracing::debug!(
                    worker = ctx.worker_id,
                    offset,
                    api_call_ms = outcome.timing.api_call_ms,
                    parse_ms = outcome.timing.parse_ms,
                    save_ms = outcome.timing.save_ms,
                    "Batch timing"
                );
                for complaint in &outcome.errors {
                    tracing::warn!(
                        worker = ctx.worker_id,
                        offset,
                        error = %complaint,
                        "Row skipped inside batch"
                    );
                }
                ctx.events.emit(PipelineEvent::CleanupBatchCompleted {
                    run_id: ctx.run_id,
                    order_id: ctx.order_id,
                    offset,
                    requested: ctx.batch_size,
                    processed: outcome.rows_processed,
                    saved: outcome.rows_saved,
                    total_rows: ctx.shared.total(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    eta_secs: ctx.shared.eta_secs(ctx.batch_size, ctx.workers),
                    timestamp: Utc::now(),
                });
                if !outcome.has_more {
                    tracing::debug!(worker = ctx.worker_id, offset, "End of manifest observed");
                    break;
                }
            }
            Err(e) => {
                let message = e.to_string();
                // Failed ranges are not retried; the derived stage gate
                // surfaces the gap and a later run can redo the stage.
                if ctx.shared.note_error(&message) {
                    tracing::error!(
                        worker = ctx.worker_id,
                        order_id = ctx.order_id,
                        offset,
                        error = %message,
                        "Batch failed, pausing the run"
                    );
                } else {
                    tracing::warn!(
                        worker = ctx.worker_id,
                        offset,
                        error = %message,
                        "Batch failed after the run was already stopping"
                    );
                }
                ctx.stop.cancel();
                break;
            }
        }
    }
    tracing::debug!(worker = ctx.worker_id, "Worker stopped");
}
