//! Core traits for streaming call audio.

use super::error::StreamResult;
use crate::frame::CallId;
use std::future::Future;

/// Result of one read from a [`FrameSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// Up to one frame of bytes. May be shorter than a full frame.
    Chunk(Vec<u8>),
    /// Nothing ready yet; try again shortly.
    Pending,
    /// The asset has been read to its end.
    Exhausted,
}

/// A finite source of audio bytes read one frame at a time.
///
/// Sources are responsible only for producing bytes; pacing and tagging the
/// bytes with a call identifier happen further up.
pub trait FrameSource: Send {
    /// Read the next chunk of at most one frame.
    ///
    /// Short chunks are returned as-is, never padded.
    fn next_frame(&mut self) -> impl Future<Output = StreamResult<FrameRead>> + Send;

    /// Human readable name of the underlying asset.
    fn name(&self) -> &str;

    /// Get streaming metrics for this source.
    fn metrics(&self) -> SourceMetrics {
        SourceMetrics::default()
    }
}

/// Metrics for monitoring frame sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetrics {
    /// Non-empty chunks returned
    pub chunks_delivered: u64,
    /// Bytes across those chunks
    pub bytes_delivered: u64,
    /// Chunks shorter than a full frame
    pub short_chunks: u64,
    /// Reads that found nothing ready
    pub pending_reads: u64,
}

/// Append-only destination for one call's reassembled bytes.
///
/// Writes are synchronous: the consumer never suspends while handling a record.
pub trait FrameSink: Send {
    /// Append `bytes` after everything written so far.
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Flush and release the sink.
    fn close(self) -> std::io::Result<()>
    where
        Self: Sized;

    /// Total bytes appended so far.
    fn bytes_written(&self) -> u64;
}

/// Creates one sink per call.
pub trait SinkFactory: Send + Sync {
    /// The sink type produced.
    type Sink: FrameSink;

    /// Open a fresh sink for `call_id`.
    fn open(&self, call_id: &CallId) -> std::io::Result<Self::Sink>;
}
