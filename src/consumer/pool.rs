//! One consumer task per shard, stopped together when any of them fails.

use std::collections::HashMap;

use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::shard::{ShardConsumer, ShardReport};
use crate::config::ConsumerConfig;
use crate::error::{RelayError, RelayResult};
use crate::observability::shard_span;
use crate::streaming::{SinkFactory, StreamResult};
use crate::transport::{MemoryChannel, MemoryCheckpointStore, ShardId};

/// The running shard consumers of one process.
pub struct ConsumerPool {
    tasks: JoinSet<StreamResult<ShardReport>>,
    shards: HashMap<Id, ShardId>,
    cancel: CancellationToken,
    halt: CancellationToken,
}

impl ConsumerPool {
    /// Lease every shard of `channel` for `owner` and start consuming them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(
        channel: &MemoryChannel,
        store: &MemoryCheckpointStore,
        factory: F,
        config: &ConsumerConfig,
        owner: &str,
        cancel: CancellationToken,
    ) -> RelayResult<Self>
    where
        F: SinkFactory + Clone + 'static,
        F::Sink: 'static,
    {
        config.validate()?;

        let halt = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut shards = HashMap::new();
        for shard in channel.shard_ids() {
            let feed = channel.open_shard(shard)?;
            let (checkpointer, resume_from) = store.acquire(shard, owner);

            let mut consumer = ShardConsumer::new(shard, factory.clone(), checkpointer, config)
                .with_shard_count(channel.shard_count())
                .with_halt(halt.clone());
            consumer.initialize(resume_from);

            let handle = tasks.spawn(
                consumer
                    .run(feed, cancel.clone())
                    .instrument(shard_span(shard)),
            );
            shards.insert(handle.id(), shard);
        }

        tracing::info!(stream = %channel.name(), shards = shards.len(), owner, "Consumers started");
        Ok(Self {
            tasks,
            shards,
            cancel,
            halt,
        })
    }

    /// Number of shard consumers still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every shard consumer has finished.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every shard consumer.
    ///
    /// The first consumer to fail halts all the others and its error is
    /// returned straight away, without waiting for anything to wind down.
    /// Halted consumers neither close their sinks nor checkpoint.
    pub async fn join(mut self) -> RelayResult<Vec<ShardReport>> {
        let mut reports = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let failure = match joined {
                Ok((_, Ok(report))) => {
                    reports.push(report);
                    continue;
                }
                Ok((id, Err(source))) => RelayError::Fatal {
                    shard: self.shard_of(id),
                    source,
                },
                Err(err) => RelayError::TaskPanicked {
                    shard: self.shard_of(err.id()),
                    reason: err.to_string(),
                },
            };

            tracing::error!(error = %failure, "Unrecoverable consumer failure, stopping everything");
            // Halt before the graceful token so no survivor winds down cleanly.
            self.halt.cancel();
            self.tasks.abort_all();
            self.cancel.cancel();
            return Err(failure);
        }

        reports.sort_by_key(|r| r.shard);
        Ok(reports)
    }

    fn shard_of(&self, id: Id) -> ShardId {
        // Every spawned task is registered in `start`.
        self.shards.get(&id).copied().unwrap_or(ShardId(u32::MAX))
    }
}
