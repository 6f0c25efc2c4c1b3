//! Checkpoint policy for one shard.
//!
//! Every checkpoint failure is turned into a [`CheckpointOutcome`] here;
//! none of them ever stops the consumer except by telling it the lease is
//! gone.

use crate::transport::{CheckpointError, CheckpointPosition, Checkpointer, SequenceNumber, ShardId};

/// What a checkpoint request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The position was persisted.
    Saved(CheckpointPosition),
    /// Not enough batches since the last checkpoint.
    NotDue,
    /// No new position to persist.
    NothingToCommit,
    /// Another consumer owns the shard; stop processing it.
    OwnershipLost,
    /// The store throttled the request; it is not retried.
    Throttled,
    /// The store failed; needs someone to look at it.
    PersistenceFailed,
}

impl CheckpointOutcome {
    /// Whether the consumer should stop reading the shard.
    pub const fn stops_shard(&self) -> bool {
        matches!(self, Self::OwnershipLost)
    }
}

/// Checkpoint counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    /// Checkpoints sent to the store
    pub attempts: u64,
    /// Checkpoints persisted
    pub saved: u64,
    /// Checkpoints the store throttled
    pub throttled: u64,
    /// Checkpoints the store failed to persist
    pub persistence_failures: u64,
    /// Checkpoints refused because the lease moved
    pub ownership_lost: u64,
}

/// Tracks how far a shard has been processed and when to checkpoint it.
pub struct ProgressTracker<C: Checkpointer> {
    shard: ShardId,
    checkpointer: C,
    every_batches: u32,
    batches_since_checkpoint: u32,
    processed: Option<SequenceNumber>,
    committed: Option<CheckpointPosition>,
    lease_held: bool,
    stats: ProgressStats,
}

impl<C: Checkpointer> ProgressTracker<C> {
    /// Checkpoint through `checkpointer` after every `every_batches` batches.
    pub fn new(shard: ShardId, checkpointer: C, every_batches: u32) -> Self {
        Self {
            shard,
            checkpointer,
            every_batches: every_batches.max(1),
            batches_since_checkpoint: 0,
            processed: None,
            committed: None,
            lease_held: true,
            stats: ProgressStats::default(),
        }
    }

    /// Start tracking from the position the store last persisted.
    pub fn initialize(&mut self, resume_from: Option<CheckpointPosition>) {
        self.committed = resume_from;
        if let Some(CheckpointPosition::At(seq)) = resume_from {
            self.processed = Some(seq);
        }
        match resume_from {
            Some(position) => {
                tracing::info!(shard_id = %self.shard, resume_from = %position, "Initializing shard")
            }
            None => tracing::info!(shard_id = %self.shard, "Initializing shard from the start"),
        }
    }

    /// Note that every record up to `sequence` has been applied.
    pub fn record_processed(&mut self, sequence: SequenceNumber) {
        self.processed = self.processed.max(Some(sequence));
    }

    /// A batch has been fully applied; checkpoint if one is due.
    pub async fn batch_completed(&mut self) -> CheckpointOutcome {
        self.batches_since_checkpoint += 1;
        if self.batches_since_checkpoint < self.every_batches {
            return CheckpointOutcome::NotDue;
        }
        self.batches_since_checkpoint = 0;
        self.commit_processed("batch").await
    }

    /// The shard was read to its end. Always attempts a `ShardEnd` checkpoint.
    pub async fn shard_ended(&mut self) -> CheckpointOutcome {
        tracing::info!(shard_id = %self.shard, "Shard ended");
        let outcome = self.attempt(CheckpointPosition::ShardEnd, "shard end").await;
        if !matches!(outcome, CheckpointOutcome::Saved(_)) {
            tracing::error!(shard_id = %self.shard, ?outcome, "Giving up on shard end checkpoint");
        }
        outcome
    }

    /// The consumer is being stopped; persist what was processed.
    pub async fn shutdown_requested(&mut self) -> CheckpointOutcome {
        tracing::info!(shard_id = %self.shard, "Shutdown requested");
        self.commit_processed("shutdown").await
    }

    /// The lease was taken away; no further checkpoints are attempted.
    pub fn lease_lost(&mut self) {
        if self.lease_held {
            tracing::info!(shard_id = %self.shard, "Lease lost, not checkpointing");
        }
        self.lease_held = false;
    }

    /// Whether this consumer still believes it owns the shard.
    pub fn is_lease_held(&self) -> bool {
        self.lease_held
    }

    /// Highest sequence number applied so far.
    pub fn processed(&self) -> Option<SequenceNumber> {
        self.processed
    }

    /// Last position known to be persisted.
    pub fn committed(&self) -> Option<CheckpointPosition> {
        self.committed
    }

    /// Counters so far.
    pub fn stats(&self) -> ProgressStats {
        self.stats
    }

    async fn commit_processed(&mut self, reason: &'static str) -> CheckpointOutcome {
        if !self.lease_held {
            return CheckpointOutcome::OwnershipLost;
        }
        let Some(sequence) = self.processed else {
            return CheckpointOutcome::NothingToCommit;
        };
        let position = CheckpointPosition::At(sequence);
        if self.committed == Some(position) {
            return CheckpointOutcome::NothingToCommit;
        }
        self.attempt(position, reason).await
    }

    async fn attempt(&mut self, position: CheckpointPosition, reason: &'static str) -> CheckpointOutcome {
        self.stats.attempts += 1;
        match self.checkpointer.checkpoint(position).await {
            Ok(()) => {
                self.committed = Some(position);
                self.stats.saved += 1;
                tracing::info!(shard_id = %self.shard, %position, reason, "Checkpoint saved");
                CheckpointOutcome::Saved(position)
            }
            Err(CheckpointError::OwnershipLost { .. }) => {
                self.stats.ownership_lost += 1;
                self.lease_lost();
                CheckpointOutcome::OwnershipLost
            }
            Err(err @ CheckpointError::RateLimited { .. }) => {
                self.stats.throttled += 1;
                tracing::warn!(shard_id = %self.shard, %position, error = %err, "Checkpoint throttled, skipping");
                CheckpointOutcome::Throttled
            }
            Err(err @ CheckpointError::Persistence { .. }) => {
                self.stats.persistence_failures += 1;
                tracing::error!(
                    shard_id = %self.shard,
                    %position,
                    error = %err,
                    "Checkpoint store failed; check its configuration and availability"
                );
                CheckpointOutcome::PersistenceFailed
            }
        }
    }
}
