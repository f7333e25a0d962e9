//! Resumable AI cleanup engine
//!
//! Drives the backend's batch cleanup route with a small pool of identical
//! workers. A shared atomic offset counter hands out non-overlapping batch
//! ranges; a CancellationToken stops claiming (never an in-flight request);
//! a per-order checkpoint makes pause/resume survive process restarts.
//!
//! Cancel is the only transition that touches server state: it rolls back
//! every AI artifact (plus downstream matching and pricing), and local
//! state resets only after that rollback is acknowledged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mprep_common::config::MAX_CONCURRENCY;
use mprep_common::events::{EventBus, PipelineEvent};
use mprep_common::{Error, Result};

use crate::backend::BackendApi;
use crate::checkpoint::{Checkpoint, CheckpointStore};

mod progress;
mod worker;

pub use progress::{CleanupProgress, RunState};

/// Knobs for one pool. Batch size and concurrency are clamped at
/// construction, not here.
#[derive(Debug, Clone)]
pub struct CleanupParams {
    pub order_id: i64,
    pub batch_size: u64,
    pub concurrency: usize,
    /// AI model id, backend default when `None`.
    pub model: Option<String>,
    /// Stop after this many claimed batches, parking like a manual pause.
    pub max_batches: Option<u64>,
}

impl CleanupParams {
    pub fn new(order_id: i64) -> Self {
        Self {
            order_id,
            batch_size: 10,
            concurrency: 4,
            model: None,
            max_batches: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// End of manifest observed; checkpoint removed.
    Completed { rows_processed: u64, rows_saved: u64 },
    /// Parked with a checkpoint. `error` carries the first worker failure
    /// when that is what stopped the run.
    Paused { next_offset: u64, error: Option<String> },
    /// Server rolled the stage back; local state is idle again.
    Cancelled { rows_cleared: u64 },
}

struct Control {
    token: Mutex<CancellationToken>,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
}

impl Control {
    fn stop_workers(&self) {
        if let Ok(token) = self.token.lock() {
            token.cancel();
        }
    }
}

/// Cloneable remote control for a running pool, safe to use from a Ctrl-C
/// handler or another task.
#[derive(Clone)]
pub struct PoolHandle {
    control: Arc<Control>,
}

impl PoolHandle {
    /// Stop claiming and park with a checkpoint. In-flight batches finish.
    pub fn pause(&self) {
        self.control.pause_requested.store(true, Ordering::SeqCst);
        self.control.stop_workers();
    }

    /// Stop claiming and roll the stage back once workers settle.
    pub fn cancel(&self) {
        self.control.cancel_requested.store(true, Ordering::SeqCst);
        self.control.stop_workers();
    }
}

/// The worker pool. One instance per order; `run()` may be called again
/// after a pause to resume from the checkpoint.
pub struct CleanupPool {
    backend: Arc<dyn BackendApi>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: EventBus,
    params: CleanupParams,
    shared: Arc<progress::Shared>,
    control: Arc<Control>,
}

impl CleanupPool {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: EventBus,
        mut params: CleanupParams,
    ) -> Self {
        params.batch_size = params.batch_size.max(1);
        params.concurrency = params.concurrency.clamp(1, MAX_CONCURRENCY);
        Self {
            backend,
            checkpoints,
            events,
            params,
            shared: Arc::new(progress::Shared::new()),
            control: Arc::new(Control {
                token: Mutex::new(CancellationToken::new()),
                pause_requested: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn progress(&self) -> CleanupProgress {
        self.shared
            .snapshot(self.params.batch_size, self.params.concurrency)
    }

    /// Drive one run to a terminal state: completed, paused, or cancelled.
    /// Resuming is just calling this again; the checkpoint decides where
    /// claiming starts.
    pub async fn run(&self) -> Result<RunOutcome> {
        if self.shared.state() == RunState::Running {
            return Err(Error::InvalidInput(
                "a cleanup run is already active for this pool".to_string(),
            ));
        }

        self.control.pause_requested.store(false, Ordering::SeqCst);
        self.control.cancel_requested.store(false, Ordering::SeqCst);
        self.shared.clear_error();
        self.shared.batches_claimed.store(0, Ordering::SeqCst);

        let token = CancellationToken::new();
        if let Ok(mut guard) = self.control.token.lock() {
            *guard = token.clone();
        }

        let order_id = self.params.order_id;
        let start_offset = self
            .checkpoints
            .load(order_id)?
            .map(|c| c.offset)
            .unwrap_or(0);
        if start_offset == 0 {
            // Fresh run, not a resume: counters describe this pass over
            // the order.
            self.shared.reset();
        }
        self.shared.next_offset.store(start_offset, Ordering::SeqCst);
        self.shared.set_state(RunState::Running);

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(
            order_id,
            run_id = %run_id,
            resumed_from = start_offset,
            workers = self.params.concurrency,
            batch_size = self.params.batch_size,
            "Cleanup run starting"
        );
        self.events.emit(PipelineEvent::CleanupStarted {
            run_id,
            order_id,
            resumed_from: start_offset,
            workers: self.params.concurrency,
            timestamp: Utc::now(),
        });

        let mut handles = Vec::with_capacity(self.params.concurrency);
        for worker_id in 0..self.params.concurrency {
            let ctx = worker::WorkerContext {
                worker_id,
                run_id,
                order_id,
                batch_size: self.params.batch_size,
                workers: self.params.concurrency,
                model: self.params.model.clone(),
                max_batches: self.params.max_batches,
                backend: Arc::clone(&self.backend),
                shared: Arc::clone(&self.shared),
                stop: token.clone(),
                events: self.events.clone(),
            };
            handles.push(tokio::spawn(worker::run_worker(ctx)));
        }

        // All-settled join: every worker gets to finish its in-flight
        // batch before the terminal state is decided.
        for result in futures::future::join_all(handles).await {
            if let Err(join_error) = result {
                self.shared
                    .note_error(&format!("worker panicked: {}", join_error));
            }
        }

        if self.control.cancel_requested.load(Ordering::SeqCst) {
            return self.finish_cancelled().await;
        }

        let exhausted = self
            .shared
            .total()
            .map_or(false, |total| self.shared.next_unclaimed() >= total);
        let clean = self.shared.error().is_none()
            && !self.control.pause_requested.load(Ordering::SeqCst);

        if exhausted && clean {
            self.checkpoints.clear(order_id)?;
            self.shared.set_state(RunState::Done);
            let rows_processed = self.shared.rows_processed.load(Ordering::Relaxed);
            let rows_saved = self.shared.rows_saved.load(Ordering::Relaxed);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::info!(order_id, rows_processed, rows_saved, elapsed_ms, "Cleanup run completed");
            self.events.emit(PipelineEvent::CleanupCompleted {
                run_id,
                order_id,
                rows_processed,
                rows_saved,
                elapsed_ms,
                timestamp: Utc::now(),
            });
            Ok(RunOutcome::Completed { rows_processed, rows_saved })
        } else {
            let next_offset = self.shared.next_unclaimed();
            self.checkpoints.save(order_id, &Checkpoint::at(next_offset))?;
            self.shared.set_state(RunState::Paused);
            let error = self.shared.error();
            match &error {
                Some(message) => tracing::warn!(
                    order_id,
                    next_offset,
                    error = %message,
                    "Cleanup run paused by a worker error"
                ),
                None => tracing::info!(order_id, next_offset, "Cleanup run paused"),
            }
            self.events.emit(PipelineEvent::CleanupPaused {
                run_id,
                order_id,
                next_offset,
                error: error.clone(),
                timestamp: Utc::now(),
            });
            Ok(RunOutcome::Paused { next_offset, error })
        }
    }

    /// Roll back the stage when no run is active (e.g. `cleanup cancel`
    /// from the CLI against a paused order).
    pub async fn cancel(&self) -> Result<u64> {
        if self.shared.state() == RunState::Running {
            return Err(Error::InvalidInput(
                "cancel the active run through its handle".to_string(),
            ));
        }
        self.rollback().await
    }

    async fn finish_cancelled(&self) -> Result<RunOutcome> {
        match self.rollback().await {
            Ok(rows_cleared) => Ok(RunOutcome::Cancelled { rows_cleared }),
            Err(e) => {
                // Keep the run recoverable: checkpoint stays, state parks.
                let next_offset = self.shared.next_unclaimed();
                self.checkpoints
                    .save(self.params.order_id, &Checkpoint::at(next_offset))?;
                self.shared.set_state(RunState::Paused);
                Err(e)
            }
        }
    }

    async fn rollback(&self) -> Result<u64> {
        let order_id = self.params.order_id;
        let outcome = self
            .backend
            .cancel_cleanup(order_id)
            .await
            .map_err(|e| Error::Internal(format!("cleanup rollback failed: {}", e)))?;
        self.checkpoints.clear(order_id)?;
        self.shared.reset();
        tracing::info!(order_id, rows_cleared = outcome.rows_cleared, "Cleanup cancelled and rolled back");
        self.events.emit(PipelineEvent::CleanupCancelled {
            order_id,
            rows_cleared: outcome.rows_cleared,
            timestamp: Utc::now(),
        });
        Ok(outcome.rows_cleared)
    }
}
