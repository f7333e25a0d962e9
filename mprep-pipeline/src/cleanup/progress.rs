//! Shared cleanup run state
//!
//! One [`Shared`] instance is cloned into every worker. Counters describe
//! the order being cleaned, not a single run: pause and resume keep
//! accumulating into the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::CleanupBatchOutcome;

/// Observable pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has started, or a cancel rolled everything back.
    Idle,
    Running,
    /// Parked with a checkpoint: manual pause, batch cap, or first error.
    Paused,
    /// Every row processed; checkpoint removed.
    Done,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Done => "done",
        };
        f.write_str(label)
    }
}

/// Point-in-time progress snapshot for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupProgress {
    pub state: RunState,
    pub next_offset: u64,
    pub rows_processed: u64,
    pub rows_saved: u64,
    pub total_rows: Option<u64>,
    pub percent: Option<f64>,
    pub eta_secs: Option<u64>,
    pub error: Option<String>,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<RunState>,
    /// Claim counter: the single source of truth for which offset a worker
    /// requests next.
    pub(crate) next_offset: AtomicU64,
    /// Batches claimed this run, gating `max_batches`.
    pub(crate) batches_claimed: AtomicU64,
    pub(crate) rows_processed: AtomicU64,
    pub(crate) rows_saved: AtomicU64,
    total_rows: Mutex<Option<u64>>,
    first_error: Mutex<Option<String>>,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            next_offset: AtomicU64::new(0),
            batches_claimed: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            rows_saved: AtomicU64::new(0),
            total_rows: Mutex::new(None),
            first_error: Mutex::new(None),
            latency_total_ms: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: RunState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Idle)
    }

    pub(crate) fn total(&self) -> Option<u64> {
        self.total_rows.lock().ok().and_then(|t| *t)
    }

    /// Record the order size the first time a response reveals it.
    pub(crate) fn set_total(&self, total: u64) {
        if let Ok(mut guard) = self.total_rows.lock() {
            guard.get_or_insert(total);
        }
    }

    /// Fold one batch response into the counters.
    pub(crate) fn record_batch(&self, outcome: &CleanupBatchOutcome, elapsed: Duration) {
        self.set_total(outcome.total_rows);
        self.rows_processed
            .fetch_add(outcome.rows_processed, Ordering::Relaxed);
        self.rows_saved
            .fetch_add(outcome.rows_saved, Ordering::Relaxed);
        self.latency_total_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a worker error. Returns true for the first one, which owns
    /// the pause.
    pub(crate) fn note_error(&self, message: &str) -> bool {
        match self.first_error.lock() {
            Ok(mut guard) => {
                if guard.is_none() {
                    *guard = Some(message.to_string());
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }

    pub(crate) fn error(&self) -> Option<String> {
        self.first_error.lock().ok().and_then(|e| e.clone())
    }

    /// Next offset no run has claimed, clamped to the order size once it
    /// is known. This is the value a checkpoint stores.
    pub(crate) fn next_unclaimed(&self) -> u64 {
        let raw = self.next_offset.load(Ordering::SeqCst);
        match self.total() {
            Some(total) => raw.min(total),
            None => raw,
        }
    }

    /// Seconds to completion from mean batch latency, assuming `workers`
    /// keep claiming in parallel.
    pub(crate) fn eta_secs(&self, batch_size: u64, workers: usize) -> Option<u64> {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 || batch_size == 0 {
            return None;
        }
        let total = self.total()?;
        let remaining = total.saturating_sub(self.next_unclaimed());
        if remaining == 0 {
            return Some(0);
        }
        let batches_left = (remaining + batch_size - 1) / batch_size;
        let mean_ms = self.latency_total_ms.load(Ordering::Relaxed) / samples;
        Some(mean_ms * batches_left / workers.max(1) as u64 / 1000)
    }

    /// Wipe everything back to idle. Only valid after the server
    /// acknowledged a rollback.
    pub(crate) fn reset(&self) {
        self.set_state(RunState::Idle);
        self.next_offset.store(0, Ordering::SeqCst);
        self.batches_claimed.store(0, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::Relaxed);
        self.rows_saved.store(0, Ordering::Relaxed);
        self.latency_total_ms.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.total_rows.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.first_error.lock() {
            *guard = None;
        }
    }

    pub(crate) fn clear_error(&self) {
        if let Ok(mut guard) = self.first_error.lock() {
            *guard = None;
        }
    }

    pub(crate) fn snapshot(&self, batch_size: u64, workers: usize) -> CleanupProgress {
        let total = self.total();
        // Percent tracks the claim position, not this-process row counts,
        // so a resumed run reports where it actually is in the manifest.
        let position = self.next_unclaimed();
        let percent = total.and_then(|t| {
            if t == 0 {
                None
            } else {
                Some((position as f64 / t as f64) * 100.0)
            }
        });
        CleanupProgress {
            state: self.state(),
            next_offset: position,
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
            rows_saved: self.rows_saved.load(Ordering::Relaxed),
            total_rows: total,
            percent,
            eta_secs: self.eta_secs(batch_size, workers),
            error: self.error(),
        }
    }
}
