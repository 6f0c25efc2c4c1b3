//! Frames and call identifiers shared by the producer and consumer sides.
//!
//! A frame is a chunk of raw audio bytes sent with the identifier of its call
//! as the partition key. Frames carry no sequence number: ordering is whatever
//! the partitioned channel delivers for that key.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Size in bytes of a full frame: 20 ms of 8 kHz, 16-bit mono PCM.
pub const FRAME_SIZE: usize = 320;

/// Opaque identifier of one call. Doubles as the partition key on the channel.
///
/// Cloning is cheap; the underlying string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(Arc<str>);

impl CallId {
    /// Generate a fresh, globally unique call identifier.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Wrap an existing identifier, e.g. a partition key read off the channel.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// How a payload length is interpreted against the configured frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Zero-length payload: the call is over.
    EndOfCall,
    /// Exactly one frame's worth of bytes.
    Full,
    /// Any other length. Still carried through, but worth a diagnostic.
    Short(usize),
}

impl FrameKind {
    /// Classify a payload length.
    pub const fn classify(len: usize, frame_size: usize) -> Self {
        if len == 0 {
            Self::EndOfCall
        } else if len == frame_size {
            Self::Full
        } else {
            Self::Short(len)
        }
    }
}
