//! Interfaces of the partitioned, ordered message channel and its checkpoint
//! store, plus an in-process implementation of both.
//!
//! The channel groups records by partition key. Every key maps to exactly one
//! shard, and records within a shard are delivered in send order, each tagged
//! with a sequence number that only the checkpoint store cares about.
//!
//! # Example
//!
//! ```rust,ignore
//! use call_relay::transport::{MemoryChannel, PartitionedProducer};
//!
//! let channel = MemoryChannel::new("calls", 2);
//! channel.send(&"call-a".into(), vec![0u8; 320]).await?;
//! let mut feed = channel.open_shard(channel.shard_for_key("call-a"))?;
//! let batch = feed.next_batch(100).await;
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::frame::CallId;

pub use checkpoint::{MemoryCheckpointStore, ShardCheckpointer};
pub use error::{CheckpointError, TransportError};
pub use memory::{MemoryChannel, ShardFeed};

/// Identifier of one shard of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{:06}", self.0)
    }
}

/// Position of a record within its shard. Strictly increasing per shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a consumer's progress through a shard stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointPosition {
    /// Everything up to and including this record is processed.
    At(SequenceNumber),
    /// The shard has been read to its end.
    ShardEnd,
}

impl fmt::Display for CheckpointPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(seq) => write!(f, "{seq}"),
            Self::ShardEnd => f.write_str("SHARD_END"),
        }
    }
}

/// One record as delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The shard the record was read from.
    pub shard: ShardId,
    /// Assigned by the channel when the record was accepted.
    pub sequence: SequenceNumber,
    /// The call the payload belongs to.
    pub partition_key: CallId,
    /// Frame bytes; empty marks the end of the call.
    pub payload: Vec<u8>,
}

/// Acknowledgement for an accepted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAck {
    /// Shard the record landed on.
    pub shard: ShardId,
    /// Sequence number it was given.
    pub sequence: SequenceNumber,
}

/// Write side of the channel.
pub trait PartitionedProducer: Send + Sync {
    /// Append `payload` to the shard owning `partition_key`.
    fn send(
        &self,
        partition_key: &CallId,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<SendAck, TransportError>> + Send;
}

/// Read side of one leased shard.
pub trait RecordFeed: Send {
    /// The shard this feed reads.
    fn shard_id(&self) -> ShardId;

    /// Wait for the next batch of at most `max_records` records.
    ///
    /// Returns `None` once the shard has been retired and fully drained.
    fn next_batch(&mut self, max_records: usize) -> impl Future<Output = Option<Vec<Record>>> + Send;
}

/// Persists consumer progress for one shard.
pub trait Checkpointer: Send + Sync {
    /// Record that everything up to `position` has been processed.
    fn checkpoint(
        &self,
        position: CheckpointPosition,
    ) -> impl Future<Output = Result<(), CheckpointError>> + Send;
}

/// Map a partition key onto one of `shard_count` shards.
///
/// Stable for the lifetime of the process, which is all an in-process channel
/// needs.
pub fn shard_for_key(partition_key: &str, shard_count: u32) -> ShardId {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    partition_key.hash(&mut hasher);
    ShardId((hasher.finish() % u64::from(shard_count.max(1))) as u32)
}
