//! Tests for the checkpoint policy.

use super::super::progress::*;
use super::SHARD;
use crate::transport::{
    CheckpointError, CheckpointPosition, MemoryCheckpointStore, SequenceNumber, ShardCheckpointer,
};

fn tracker(every: u32) -> (MemoryCheckpointStore, ProgressTracker<ShardCheckpointer>) {
    let store = MemoryCheckpointStore::new();
    let (checkpointer, resume) = store.acquire(SHARD, "worker-1");
    let mut tracker = ProgressTracker::new(SHARD, checkpointer, every);
    tracker.initialize(resume);
    (store, tracker)
}

#[tokio::test]
async fn test_checkpoint_after_each_batch() {
    let (store, mut tracker) = tracker(1);

    tracker.record_processed(SequenceNumber(9));
    let outcome = tracker.batch_completed().await;

    let position = CheckpointPosition::At(SequenceNumber(9));
    assert_eq!(outcome, CheckpointOutcome::Saved(position));
    assert_eq!(store.position(SHARD), Some(position));
    assert_eq!(tracker.committed(), Some(position));
}

#[tokio::test]
async fn test_checkpoint_every_k_batches() {
    let (store, mut tracker) = tracker(3);

    for seq in 0..2 {
        tracker.record_processed(SequenceNumber(seq));
        assert_eq!(tracker.batch_completed().await, CheckpointOutcome::NotDue);
    }
    tracker.record_processed(SequenceNumber(2));
    assert!(matches!(
        tracker.batch_completed().await,
        CheckpointOutcome::Saved(_)
    ));
    assert_eq!(store.commits(SHARD), 1);
}

#[tokio::test]
async fn test_nothing_processed_means_no_checkpoint() {
    let (store, mut tracker) = tracker(1);

    assert_eq!(
        tracker.batch_completed().await,
        CheckpointOutcome::NothingToCommit
    );
    assert_eq!(
        tracker.shutdown_requested().await,
        CheckpointOutcome::NothingToCommit
    );
    assert_eq!(store.commits(SHARD), 0);
}

#[tokio::test]
async fn test_unchanged_position_is_not_recommitted() {
    let (store, mut tracker) = tracker(1);
    tracker.record_processed(SequenceNumber(4));
    tracker.batch_completed().await;

    assert_eq!(
        tracker.shutdown_requested().await,
        CheckpointOutcome::NothingToCommit
    );
    assert_eq!(store.commits(SHARD), 1);
}

#[tokio::test]
async fn test_ownership_lost_is_swallowed_and_stops_checkpointing() {
    let (store, mut tracker) = tracker(1);
    store.transfer_lease(SHARD, "worker-2");

    tracker.record_processed(SequenceNumber(1));
    let outcome = tracker.batch_completed().await;

    assert_eq!(outcome, CheckpointOutcome::OwnershipLost);
    assert!(outcome.stops_shard());
    assert!(!tracker.is_lease_held());

    // No further attempts once the lease is gone.
    tracker.record_processed(SequenceNumber(2));
    assert_eq!(
        tracker.batch_completed().await,
        CheckpointOutcome::OwnershipLost
    );
    assert_eq!(tracker.stats().attempts, 1);
    assert_eq!(store.position(SHARD), None);
}

#[tokio::test]
async fn test_throttled_checkpoint_is_skipped_not_retried() {
    let (store, mut tracker) = tracker(1);
    store.inject_failure(SHARD, CheckpointError::RateLimited { shard: SHARD });

    tracker.record_processed(SequenceNumber(1));
    assert_eq!(tracker.batch_completed().await, CheckpointOutcome::Throttled);
    assert_eq!(store.commits(SHARD), 0);
    assert!(tracker.is_lease_held());

    // The next cycle commits the newer position.
    tracker.record_processed(SequenceNumber(2));
    assert_eq!(
        tracker.batch_completed().await,
        CheckpointOutcome::Saved(CheckpointPosition::At(SequenceNumber(2)))
    );
    assert_eq!(tracker.stats().throttled, 1);
}

#[tokio::test]
async fn test_persistence_failure_is_logged_not_raised() {
    let (store, mut tracker) = tracker(1);
    store.inject_failure(
        SHARD,
        CheckpointError::Persistence {
            shard: SHARD,
            reason: "table missing".to_string(),
        },
    );

    tracker.record_processed(SequenceNumber(1));
    let outcome = tracker.batch_completed().await;

    assert_eq!(outcome, CheckpointOutcome::PersistenceFailed);
    assert!(!outcome.stops_shard());
    assert_eq!(tracker.stats().persistence_failures, 1);
}

#[tokio::test]
async fn test_shard_end_is_always_attempted() {
    let (store, mut tracker) = tracker(1);

    assert_eq!(
        tracker.shard_ended().await,
        CheckpointOutcome::Saved(CheckpointPosition::ShardEnd)
    );
    assert_eq!(store.position(SHARD), Some(CheckpointPosition::ShardEnd));
}

#[tokio::test]
async fn test_failed_shard_end_is_not_retried() {
    let (store, mut tracker) = tracker(1);
    store.inject_failure(SHARD, CheckpointError::RateLimited { shard: SHARD });

    assert_eq!(tracker.shard_ended().await, CheckpointOutcome::Throttled);
    assert_eq!(tracker.stats().attempts, 1);
    assert_eq!(store.position(SHARD), None);
}

#[tokio::test]
async fn test_resume_position_is_not_recommitted() {
    let store = MemoryCheckpointStore::new();
    let (first, _) = store.acquire(SHARD, "worker-1");
    let mut tracker = ProgressTracker::new(SHARD, first, 1);
    tracker.record_processed(SequenceNumber(7));
    tracker.batch_completed().await;

    let (second, resume) = store.acquire(SHARD, "worker-2");
    let mut tracker = ProgressTracker::new(SHARD, second, 1);
    tracker.initialize(resume);

    assert_eq!(tracker.processed(), Some(SequenceNumber(7)));
    assert_eq!(
        tracker.shutdown_requested().await,
        CheckpointOutcome::NothingToCommit
    );
}
