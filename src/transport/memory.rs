//! In-process partitioned channel.
//!
//! Each shard is an unbounded, ordered queue. Sequence numbers are assigned
//! under the same lock that enqueues the record, so a shard's sequence order
//! is exactly its delivery order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    PartitionedProducer, Record, RecordFeed, SendAck, SequenceNumber, ShardId, TransportError,
    shard_for_key,
};
use crate::frame::CallId;

struct ShardInput {
    sender: Option<mpsc::UnboundedSender<Record>>,
    next_sequence: u64,
}

struct ShardQueue {
    id: ShardId,
    input: Mutex<ShardInput>,
    output: Mutex<Option<mpsc::UnboundedReceiver<Record>>>,
    accepted: AtomicU64,
}

impl ShardQueue {
    fn new(id: ShardId) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            id,
            input: Mutex::new(ShardInput {
                sender: Some(sender),
                next_sequence: 0,
            }),
            output: Mutex::new(Some(receiver)),
            accepted: AtomicU64::new(0),
        }
    }
}

/// A named stream of `shard_count` ordered shards living in this process.
///
/// Shared between producers and the consumer side behind an `Arc`.
pub struct MemoryChannel {
    name: String,
    shards: Vec<ShardQueue>,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Create a stream with `shard_count` shards (at least one).
    pub fn new(name: impl Into<String>, shard_count: u32) -> Self {
        let shards = (0..shard_count.max(1)).map(|i| ShardQueue::new(ShardId(i))).collect();
        Self {
            name: name.into(),
            shards,
            closed: AtomicBool::new(false),
        }
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of shards.
    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// All shard identifiers, in order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.iter().map(|s| s.id).collect()
    }

    /// The shard that owns `partition_key`.
    pub fn shard_for_key(&self, partition_key: &str) -> ShardId {
        shard_for_key(partition_key, self.shard_count())
    }

    /// Records accepted so far by `shard`.
    pub fn accepted(&self, shard: ShardId) -> u64 {
        self.queue(shard)
            .map(|q| q.accepted.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Lease the read side of `shard`. Only one feed per shard is ever handed out.
    pub fn open_shard(&self, shard: ShardId) -> Result<ShardFeed, TransportError> {
        let queue = self.queue(shard).ok_or(TransportError::UnknownShard { shard })?;
        let receiver = queue
            .output
            .lock()
            .take()
            .ok_or(TransportError::AlreadyLeased { shard })?;
        Ok(ShardFeed { shard, receiver })
    }

    /// Stop accepting records on `shard`. Its feed ends once drained.
    pub fn retire_shard(&self, shard: ShardId) -> Result<(), TransportError> {
        let queue = self.queue(shard).ok_or(TransportError::UnknownShard { shard })?;
        queue.input.lock().sender = None;
        tracing::info!(stream = %self.name, shard_id = %shard, "Shard retired");
        Ok(())
    }

    /// Stop accepting records on every shard.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for queue in &self.shards {
            queue.input.lock().sender = None;
        }
        tracing::info!(stream = %self.name, "Stream closed");
    }

    fn queue(&self, shard: ShardId) -> Option<&ShardQueue> {
        self.shards.get(shard.0 as usize)
    }

    fn enqueue(&self, partition_key: &CallId, payload: Vec<u8>) -> Result<SendAck, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::StreamClosed {
                stream: self.name.clone(),
            });
        }

        let shard = self.shard_for_key(partition_key.as_str());
        let queue = self.queue(shard).ok_or(TransportError::UnknownShard { shard })?;

        let mut input = queue.input.lock();
        let sequence = SequenceNumber(input.next_sequence);
        let sender = input
            .sender
            .as_ref()
            .ok_or(TransportError::ShardRetired { shard })?;

        sender
            .send(Record {
                shard,
                sequence,
                partition_key: partition_key.clone(),
                payload,
            })
            .map_err(|_| TransportError::Rejected(format!("{shard} has no reader")))?;

        input.next_sequence += 1;
        queue.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(SendAck { shard, sequence })
    }
}

impl PartitionedProducer for MemoryChannel {
    async fn send(&self, partition_key: &CallId, payload: Vec<u8>) -> Result<SendAck, TransportError> {
        self.enqueue(partition_key, payload)
    }
}

/// The leased read side of one shard.
pub struct ShardFeed {
    shard: ShardId,
    receiver: mpsc::UnboundedReceiver<Record>,
}

impl RecordFeed for ShardFeed {
    fn shard_id(&self) -> ShardId {
        self.shard
    }

    async fn next_batch(&mut self, max_records: usize) -> Option<Vec<Record>> {
        let first = self.receiver.recv().await?;
        let limit = max_records.max(1);

        let mut batch = Vec::with_capacity(limit.min(64));
        batch.push(first);
        while batch.len() < limit {
            match self.receiver.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_keep_send_order_within_a_shard() {
        let channel = MemoryChannel::new("calls", 1);
        let key = CallId::from("A");
        for i in 0..5u8 {
            channel.send(&key, vec![i]).await.unwrap();
        }
        channel.close();

        let mut feed = channel.open_shard(ShardId(0)).unwrap();
        let batch = feed.next_batch(10).await.unwrap();
        let payloads: Vec<u8> = batch.iter().map(|r| r.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
        let sequences: Vec<u64> = batch.iter().map(|r| r.sequence.0).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

        assert!(feed.next_batch(10).await.is_none());
    }

    #[tokio::test]
    async fn test_batches_respect_the_record_limit() {
        let channel = MemoryChannel::new("calls", 1);
        let key = CallId::from("A");
        for _ in 0..7 {
            channel.send(&key, vec![1]).await.unwrap();
        }
        let mut feed = channel.open_shard(ShardId(0)).unwrap();
        assert_eq!(feed.next_batch(3).await.unwrap().len(), 3);
        assert_eq!(feed.next_batch(3).await.unwrap().len(), 3);
        assert_eq!(feed.next_batch(3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_keys_land_on_their_owning_shard() {
        let channel = MemoryChannel::new("calls", 4);
        let key = CallId::from("some-call");
        let ack = channel.send(&key, vec![0; 4]).await.unwrap();
        assert_eq!(ack.shard, channel.shard_for_key("some-call"));
        assert_eq!(channel.accepted(ack.shard), 1);
    }

    #[tokio::test]
    async fn test_retired_shard_rejects_sends_and_drains() {
        let channel = MemoryChannel::new("calls", 1);
        let key = CallId::from("A");
        channel.send(&key, vec![9]).await.unwrap();
        channel.retire_shard(ShardId(0)).unwrap();

        let err = channel.send(&key, vec![9]).await.unwrap_err();
        assert_eq!(err, TransportError::ShardRetired { shard: ShardId(0) });

        let mut feed = channel.open_shard(ShardId(0)).unwrap();
        assert_eq!(feed.next_batch(10).await.unwrap().len(), 1);
        assert!(feed.next_batch(10).await.is_none());
    }

    #[test]
    fn test_shard_is_leased_once() {
        let channel = MemoryChannel::new("calls", 2);
        assert!(channel.open_shard(ShardId(1)).is_ok());
        assert_eq!(
            channel.open_shard(ShardId(1)).err(),
            Some(TransportError::AlreadyLeased { shard: ShardId(1) })
        );
        assert_eq!(
            channel.open_shard(ShardId(5)).err(),
            Some(TransportError::UnknownShard { shard: ShardId(5) })
        );
    }

    #[tokio::test]
    async fn test_closed_stream_rejects_sends() {
        let channel = MemoryChannel::new("calls", 2);
        channel.close();
        let err = channel.send(&CallId::from("A"), vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed { .. }));
    }
}
