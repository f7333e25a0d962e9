//! Integration tests for the cleanup worker pool: offset tiling,
//! pause/resume through checkpoints, error handling, and cancel rollback.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use mprep_common::events::{EventBus, PipelineEvent};
use mprep_pipeline::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use mprep_pipeline::cleanup::{CleanupParams, CleanupPool, RunOutcome, RunState};

use helpers::MockBackend;

fn params(order_id: i64, batch_size: u64, concurrency: usize) -> CleanupParams {
    CleanupParams {
        order_id,
        batch_size,
        concurrency,
        model: None,
        max_batches: None,
    }
}

fn pool_with(
    backend: Arc<MockBackend>,
    store: Arc<MemoryCheckpointStore>,
    params: CleanupParams,
) -> CleanupPool {
    CleanupPool::new(backend, store, EventBus::default(), params)
}

#[tokio::test]
async fn workers_tile_the_manifest_without_overlap() {
    let backend = Arc::new(MockBackend::new().with_total_rows(40));
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params(1, 10, 4));

    let outcome = pool.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            rows_processed: 40,
            rows_saved: 40,
        }
    );
    assert_eq!(backend.claimed_sorted(), vec![0, 10, 20, 30]);
    assert_eq!(store.load(1).unwrap(), None);
    assert_eq!(pool.state(), RunState::Done);
}

#[tokio::test]
async fn short_final_batch_completes_exactly() {
    let backend = Arc::new(MockBackend::new().with_total_rows(35));
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params(2, 10, 4));

    let outcome = pool.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            rows_processed: 35,
            rows_saved: 35,
        }
    );
    // Nobody asks the backend for a range past the end of the manifest.
    assert_eq!(backend.claimed_sorted(), vec![0, 10, 20, 30]);
}

#[tokio::test]
async fn batch_cap_parks_the_run_with_a_checkpoint() {
    let backend = Arc::new(MockBackend::new().with_total_rows(100));
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut params = params(3, 10, 4);
    params.max_batches = Some(3);
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params);

    let outcome = pool.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Paused {
            next_offset: 30,
            error: None,
        }
    );
    assert_eq!(backend.claimed_sorted(), vec![0, 10, 20]);
    assert_eq!(store.load(3).unwrap().map(|c| c.offset), Some(30));
    assert_eq!(pool.state(), RunState::Paused);
}

#[tokio::test]
async fn resume_starts_from_the_checkpoint() {
    let backend = Arc::new(MockBackend::new().with_total_rows(40));
    let store = Arc::new(MemoryCheckpointStore::new());
    store.save(4, &Checkpoint::at(20)).unwrap();
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params(4, 10, 2));

    let outcome = pool.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            rows_processed: 20,
            rows_saved: 20,
        }
    );
    assert_eq!(backend.claimed_sorted(), vec![20, 30]);
    assert_eq!(store.load(4).unwrap(), None);
}

#[tokio::test]
async fn pause_then_resume_accumulates_counters() {
    let backend = Arc::new(MockBackend::new().with_total_rows(40));
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut params = params(5, 10, 2);
    params.max_batches = Some(2);
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params);

    let first = pool.run().await.unwrap();
    assert_eq!(
        first,
        RunOutcome::Paused {
            next_offset: 20,
            error: None,
        }
    );

    // Same pool, cap applies per run: the second pass claims the rest and
    // the processed counters carry across the pause.
    let second = pool.run().await.unwrap();
    assert_eq!(
        second,
        RunOutcome::Completed {
            rows_processed: 40,
            rows_saved: 40,
        }
    );
    assert_eq!(backend.claimed_sorted(), vec![0, 10, 20, 30]);
}

#[tokio::test]
async fn rerun_after_completion_counts_from_zero() {
    let backend = Arc::new(MockBackend::new().with_total_rows(40));
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params(6, 10, 2));

    pool.run().await.unwrap();
    let second = pool.run().await.unwrap();

    // No checkpoint left behind, so the second run is fresh: counters
    // describe that pass alone instead of doubling up.
    assert_eq!(
        second,
        RunOutcome::Completed {
            rows_processed: 40,
            rows_saved: 40,
        }
    );
    assert_eq!(backend.claimed.lock().unwrap().len(), 8);
}

#[tokio::test]
async fn first_backend_error_pauses_the_whole_pool() {
    let backend = Arc::new(MockBackend::new().with_total_rows(200).fail_at(10));
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = pool_with(Arc::clone(&backend), Arc::clone(&store), params(7, 10, 2));

    let outcome = pool.run().await.unwrap();

    match outcome {
        RunOutcome::Paused { error: Some(message), .. } => {
            assert!(message.contains("model call exploded"), "got: {}", message);
        }
        other => panic!("expected an error pause, got {:?}", other),
    }
    assert_eq!(pool.state(), RunState::Paused);
    assert!(store.load(7).unwrap().is_some());
    assert!(pool.progress().error.is_some());
}

#[tokio::test]
async fn cancel_mid_run_rolls_back_and_clears_state() {
    let backend = Arc::new(
        MockBackend::new()
            .with_total_rows(10_000)
            .with_batch_delay(Duration::from_millis(20)),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = Arc::new(pool_with(
        Arc::clone(&backend),
        Arc::clone(&store),
        params(8, 10, 2),
    ));
    let handle = pool.handle();

    let run = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled { rows_cleared: 10_000 });
    assert_eq!(store.load(8).unwrap(), None);
    assert_eq!(pool.state(), RunState::Idle);
}

#[tokio::test]
async fn failed_rollback_keeps_the_run_recoverable() {
    let backend = Arc::new(
        MockBackend::new()
            .with_total_rows(10_000)
            .with_batch_delay(Duration::from_millis(20))
            .fail_rollback(),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = Arc::new(pool_with(
        Arc::clone(&backend),
        Arc::clone(&store),
        params(9, 10, 2),
    ));
    let handle = pool.handle();

    let run = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    // The server refused the rollback: nothing local may reset.
    let error = run.await.unwrap().unwrap_err();
    assert!(error.to_string().contains("rollback failed"));
    assert_eq!(pool.state(), RunState::Paused);
    assert!(store.load(9).unwrap().is_some());

    // Once the server accepts, an explicit cancel finishes the job.
    backend.set_rollback_fails(false);
    let cleared = pool.cancel().await.unwrap();
    assert_eq!(cleared, 10_000);
    assert_eq!(store.load(9).unwrap(), None);
    assert_eq!(pool.state(), RunState::Idle);
}

#[tokio::test]
async fn a_run_emits_started_batches_and_completed() {
    let backend = Arc::new(MockBackend::new().with_total_rows(20));
    let store = Arc::new(MemoryCheckpointStore::new());
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let pool = CleanupPool::new(backend, store, events.clone(), params(10, 10, 2));

    pool.run().await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            PipelineEvent::CleanupStarted { resumed_from, .. } => {
                assert_eq!(resumed_from, 0);
                "started"
            }
            PipelineEvent::CleanupBatchCompleted { processed, .. } => {
                assert_eq!(processed, 10);
                "batch"
            }
            PipelineEvent::CleanupCompleted { rows_processed, .. } => {
                assert_eq!(rows_processed, 20);
                "completed"
            }
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["started", "batch", "batch", "completed"]);
}

#[tokio::test]
async fn pause_handle_parks_between_batches() {
    let backend = Arc::new(
        MockBackend::new()
            .with_total_rows(10_000)
            .with_batch_delay(Duration::from_millis(20)),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let pool = Arc::new(pool_with(
        Arc::clone(&backend),
        Arc::clone(&store),
        params(11, 10, 2),
    ));
    let handle = pool.handle();

    let run = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.pause();

    let outcome = run.await.unwrap().unwrap();
    match outcome {
        RunOutcome::Paused {
            next_offset,
            error: None,
        } => {
            assert!(next_offset > 0);
            assert_eq!(store.load(11).unwrap().map(|c| c.offset), Some(next_offset));
        }
        other => panic!("expected a clean pause, got {:?}", other),
    }
    assert_eq!(pool.state(), RunState::Paused);
}
