//! Error types and result utilities for the relay as a whole.

use thiserror::Error;

use crate::streaming::StreamError;
use crate::transport::{ShardId, TransportError};

/// Process exit status after an unrecoverable consumer failure.
pub const FATAL_EXIT_CODE: i32 = 70;

/// Process exit status for invalid configuration or arguments.
pub const CONFIG_EXIT_CODE: i32 = 1;

/// Convenience type alias for results that may contain RelayError
pub type RelayResult<T> = Result<T, RelayError>;

/// Error types that can stop the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The configuration or command line could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A streaming operation outside any shard failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The channel refused an operation during setup.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A shard consumer hit an error it cannot recover from.
    ///
    /// Everything else is cancelled when this is raised; no cleanup runs.
    #[error("Fatal error on {shard}: {source}")]
    Fatal {
        /// Shard whose consumer failed
        shard: ShardId,
        /// What it failed with
        #[source]
        source: StreamError,
    },

    /// A shard consumer task panicked or was aborted.
    #[error("Consumer task for {shard} failed: {reason}")]
    TaskPanicked {
        /// Shard whose consumer task died
        shard: ShardId,
        /// Panic or abort message
        reason: String,
    },
}

impl RelayError {
    /// Whether the process must stop without cleanup.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::TaskPanicked { .. })
    }

    /// Exit status the binary should terminate with.
    pub const fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            FATAL_EXIT_CODE
        } else {
            CONFIG_EXIT_CODE
        }
    }
}
