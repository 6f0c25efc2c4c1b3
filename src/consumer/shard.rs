//! Processing loop for one leased shard.

use tokio_util::sync::CancellationToken;

use super::demux::{DemuxStats, FrameDemultiplexer};
use super::progress::{CheckpointOutcome, ProgressStats, ProgressTracker};
use crate::config::ConsumerConfig;
use crate::streaming::{SinkFactory, StreamError, StreamResult};
use crate::transport::{CheckpointPosition, Checkpointer, Record, RecordFeed, ShardId};

/// Why a shard consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardExit {
    /// The shard was retired and read to its end.
    ShardEnded,
    /// Another consumer took over the shard.
    LeaseLost,
    /// The consumer was asked to stop.
    Shutdown,
    /// Another shard failed; nothing was closed or checkpointed.
    Halted,
}

/// Summary of one shard consumer's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    /// The shard consumed
    pub shard: ShardId,
    /// Why the consumer stopped
    pub exit: ShardExit,
    /// Batches applied
    pub batches: u64,
    /// Sinks still open when the consumer stopped and closed by it.
    pub closed_on_exit: usize,
    /// Sinks left open because closing on exit is disabled.
    pub left_open: usize,
    /// Demultiplexer counters
    pub demux: DemuxStats,
    /// Checkpoint counters
    pub progress: ProgressStats,
}

/// Reads one shard batch by batch, reassembles calls and checkpoints progress.
///
/// Batches of a shard are applied one after another on the consumer's own
/// task; different shards run on different consumers.
pub struct ShardConsumer<F: SinkFactory, C: Checkpointer> {
    shard: ShardId,
    demux: FrameDemultiplexer<F>,
    progress: ProgressTracker<C>,
    max_batch_records: usize,
    close_sinks_on_exit: bool,
    halt: CancellationToken,
    batches: u64,
}

impl<F: SinkFactory, C: Checkpointer> ShardConsumer<F, C> {
    /// Create a consumer for `shard`.
    pub fn new(shard: ShardId, factory: F, checkpointer: C, config: &ConsumerConfig) -> Self {
        Self {
            shard,
            demux: FrameDemultiplexer::new(
                shard,
                factory,
                config.frame_size,
                config.retired_call_capacity,
            ),
            progress: ProgressTracker::new(shard, checkpointer, config.checkpoint_every_batches),
            max_batch_records: config.max_batch_records.max(1),
            close_sinks_on_exit: config.close_sinks_on_shutdown,
            halt: CancellationToken::new(),
            batches: 0,
        }
    }

    /// Also reject records whose key hashes to another of `shard_count` shards.
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.demux = self.demux.with_shard_count(shard_count);
        self
    }

    /// Stop without closing sinks or checkpointing once `halt` fires.
    ///
    /// Checked ahead of the graceful cancellation token, so a consumer that
    /// sees both never winds down cleanly.
    pub fn with_halt(mut self, halt: CancellationToken) -> Self {
        self.halt = halt;
        self
    }

    /// Resume from the last persisted position.
    pub fn initialize(&mut self, resume_from: Option<CheckpointPosition>) {
        self.progress.initialize(resume_from);
    }

    /// The shard being consumed.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// The demultiplexer, for inspection.
    pub fn demux(&self) -> &FrameDemultiplexer<F> {
        &self.demux
    }

    /// The checkpoint tracker, for inspection.
    pub fn progress(&self) -> &ProgressTracker<C> {
        &self.progress
    }

    /// Apply one batch, then checkpoint if due.
    ///
    /// Returns `Err` only for failures the shard cannot continue after.
    pub async fn process_batch(&mut self, records: &[Record]) -> StreamResult<CheckpointOutcome> {
        let report = self.demux.process_batch(records)?;
        if let Some(sequence) = report.last_sequence {
            self.progress.record_processed(sequence);
        }
        self.batches += 1;
        tracing::debug!(
            shard_id = %self.shard,
            records = report.records,
            closed = report.closed_calls.len(),
            "Batch processed"
        );
        Ok(self.progress.batch_completed().await)
    }

    /// Consume `feed` until the shard ends, the lease is lost or `cancel` fires.
    ///
    /// An `Err` is returned as soon as a batch fails unrecoverably; nothing is
    /// closed or checkpointed on that path, nor after the halt token fires.
    pub async fn run<R: RecordFeed>(
        mut self,
        mut feed: R,
        cancel: CancellationToken,
    ) -> StreamResult<ShardReport> {
        if feed.shard_id() != self.shard {
            return Err(StreamError::protocol(
                self.shard,
                format!("handed the feed for {}", feed.shard_id()),
            ));
        }

        let halt = self.halt.clone();
        let exit = loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => break ShardExit::Halted,
                _ = cancel.cancelled() => break ShardExit::Shutdown,
                batch = feed.next_batch(self.max_batch_records) => match batch {
                    Some(records) => {
                        if records.is_empty() {
                            continue;
                        }
                        match self.process_batch(&records).await {
                            Ok(outcome) if outcome.stops_shard() || !self.progress.is_lease_held() => {
                                break ShardExit::LeaseLost;
                            }
                            Ok(_) => {}
                            Err(err) if err.is_fatal() => return Err(err),
                            Err(err) => {
                                tracing::warn!(shard_id = %self.shard, error = %err, "Batch failed, continuing");
                            }
                        }
                    }
                    None => break ShardExit::ShardEnded,
                },
            }
        };

        // A halt that raced the graceful token wins.
        let exit = if halt.is_cancelled() { ShardExit::Halted } else { exit };
        if exit == ShardExit::Halted {
            tracing::warn!(shard_id = %self.shard, "Halted, skipping cleanup");
            return Ok(self.report(exit, 0, self.demux.active_count()));
        }

        let (closed_on_exit, left_open) = if self.close_sinks_on_exit {
            (self.demux.close_all(), 0)
        } else {
            (0, self.demux.active_count())
        };
        if left_open > 0 {
            tracing::warn!(shard_id = %self.shard, left_open, "Leaving streams open");
        }

        match exit {
            ShardExit::ShardEnded => {
                self.progress.shard_ended().await;
            }
            ShardExit::Shutdown => {
                self.progress.shutdown_requested().await;
            }
            ShardExit::LeaseLost | ShardExit::Halted => {}
        }

        let report = self.report(exit, closed_on_exit, left_open);
        tracing::info!(
            shard_id = %self.shard,
            exit = ?report.exit,
            batches = report.batches,
            records = report.demux.records,
            bytes = report.demux.bytes,
            "Shard consumer stopped"
        );
        Ok(report)
    }

    fn report(&self, exit: ShardExit, closed_on_exit: usize, left_open: usize) -> ShardReport {
        ShardReport {
            shard: self.shard,
            exit,
            batches: self.batches,
            closed_on_exit,
            left_open,
            demux: self.demux.stats(),
            progress: self.progress.stats(),
        }
    }
}
