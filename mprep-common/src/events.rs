//! Pipeline event bus
//!
//! Broadcast channel for progress events. Long operations (the AI cleanup
//! pool in particular) emit as they go; the CLI subscribes to render
//! progress lines. Events are fire-and-forget: emitting with no
//! subscribers is not an error, and a slow subscriber only lags itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Progress events emitted by pipeline operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A cleanup run started (fresh or resumed from a checkpoint).
    CleanupStarted {
        run_id: Uuid,
        order_id: i64,
        resumed_from: u64,
        workers: usize,
        timestamp: DateTime<Utc>,
    },
    /// One claimed batch finished server-side.
    CleanupBatchCompleted {
        run_id: Uuid,
        order_id: i64,
        offset: u64,
        requested: u64,
        processed: u64,
        saved: u64,
        total_rows: Option<u64>,
        elapsed_ms: u64,
        eta_secs: Option<u64>,
        timestamp: DateTime<Utc>,
    },
    /// The run parked with a checkpoint (manual pause, batch cap, or first
    /// worker error).
    CleanupPaused {
        run_id: Uuid,
        order_id: i64,
        next_offset: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Every row was processed; the checkpoint is gone.
    CleanupCompleted {
        run_id: Uuid,
        order_id: i64,
        rows_processed: u64,
        rows_saved: u64,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Server acknowledged rollback; local state reset.
    CleanupCancelled {
        order_id: i64,
        rows_cleared: u64,
        timestamp: DateTime<Utc>,
    },
    /// Standardization commit created rows (replacing any prior set).
    StandardizeCommitted {
        order_id: i64,
        rows_created: u64,
        timestamp: DateTime<Utc>,
    },
    /// Match review decisions were submitted.
    ReviewSubmitted {
        order_id: i64,
        confirmed: u64,
        rejected: u64,
        updated: u64,
        timestamp: DateTime<Utc>,
    },
    /// Bulk or manual pricing landed on the server.
    PricingUpdated {
        order_id: i64,
        rows_updated: u64,
        timestamp: DateTime<Utc>,
    },
    /// Rows were finalized and their listed fields frozen.
    RowsFinalized {
        order_id: i64,
        rows_finalized: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per
    /// subscriber before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Succeeds whether or not anyone is listening.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
