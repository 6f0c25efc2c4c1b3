//! Error types for the partitioned channel and the checkpoint store.

use super::ShardId;

/// Failures reported by the partitioned channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stream has been closed; nothing more can be sent.
    #[error("Stream '{stream}' is closed")]
    StreamClosed {
        /// Name of the stream
        stream: String,
    },

    /// The shard owning the key has been retired.
    #[error("Shard {shard} is retired")]
    ShardRetired {
        /// The retired shard
        shard: ShardId,
    },

    /// The shard does not exist on this stream.
    #[error("Unknown shard {shard}")]
    UnknownShard {
        /// The shard asked for
        shard: ShardId,
    },

    /// The shard's feed is already leased to another reader.
    #[error("Shard {shard} is already leased")]
    AlreadyLeased {
        /// The leased shard
        shard: ShardId,
    },

    /// The transport refused the record.
    #[error("Record rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether a later attempt might succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Failures reported by a checkpoint attempt.
///
/// These map one-to-one onto the outcomes a checkpoint store can report
/// besides success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    /// This consumer no longer owns the shard; another one tracks progress now.
    #[error("Lease on shard {shard} is held by another consumer")]
    OwnershipLost {
        /// Shard whose lease moved
        shard: ShardId,
    },

    /// The store throttled the request.
    #[error("Checkpoint for shard {shard} was throttled")]
    RateLimited {
        /// Shard being checkpointed
        shard: ShardId,
    },

    /// The store itself is unavailable or misconfigured.
    #[error("Checkpoint store failure for shard {shard}: {reason}")]
    Persistence {
        /// Shard being checkpointed
        shard: ShardId,
        /// What the store reported
        reason: String,
    },
}

impl CheckpointError {
    /// The shard the failed checkpoint was for.
    pub const fn shard(&self) -> ShardId {
        match self {
            Self::OwnershipLost { shard }
            | Self::RateLimited { shard }
            | Self::Persistence { shard, .. } => *shard,
        }
    }
}
