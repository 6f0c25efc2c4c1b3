//! Error types for streaming operations.

use crate::frame::CallId;
use crate::transport::{ShardId, TransportError};

/// Streaming-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reading an asset or touching the filesystem failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The partitioned channel refused an operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Opening, writing or closing a call's sink failed
    #[error("Sink {operation} failed for call {call_id}: {source}")]
    Sink {
        /// Call whose sink failed
        call_id: CallId,
        /// `open`, `append` or `close`
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The feed broke an ordering or ownership guarantee the consumer relies on
    #[error("Protocol violation on {shard}: {details}")]
    Protocol {
        /// Shard whose feed misbehaved
        shard: ShardId,
        /// What went wrong
        details: String,
    },

    /// Stream configuration errors
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// No asset could be selected for a new call
    #[error("Asset catalog is empty")]
    EmptyCatalog,
}

impl StreamError {
    /// Create a sink error
    pub fn sink(call_id: CallId, operation: &'static str, source: std::io::Error) -> Self {
        Self::Sink {
            call_id,
            operation,
            source,
        }
    }

    /// Create a protocol violation error
    pub fn protocol(shard: ShardId, details: impl Into<String>) -> Self {
        Self::Protocol {
            shard,
            details: details.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Sink { .. } => true,
            Self::Transport(err) => err.is_transient(),
            Self::Protocol { .. } | Self::InvalidConfig(_) | Self::EmptyCatalog => false,
        }
    }

    /// Check if this is a fatal error that should terminate the stream
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;
