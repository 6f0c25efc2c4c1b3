//! Reader-backed frame source.

use crate::streaming::{
    error::{StreamError, StreamResult},
    traits::{FrameRead, FrameSource, SourceMetrics},
};
use futures::Stream;
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A frame source reading raw bytes from any async reader.
///
/// Each call to [`FrameSource::next_frame`] issues exactly one read of at most
/// `frame_size` bytes. Whatever that read returns is handed on unchanged, so
/// a short read near the end of an asset produces a short chunk.
pub struct ReaderSource<R> {
    reader: R,
    name: String,
    buffer: Vec<u8>,
    frame_size: usize,
    metrics: SourceMetrics,
    exhausted: bool,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap `reader`, reading up to `frame_size` bytes per frame.
    pub fn new(reader: R, name: impl Into<String>, frame_size: usize) -> Self {
        Self {
            reader,
            name: name.into(),
            buffer: vec![0u8; frame_size],
            frame_size,
            metrics: SourceMetrics::default(),
            exhausted: false,
        }
    }

    /// Check if we've reached the end of the reader.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Turn the source into a stream of reads, ending after exhaustion.
    ///
    /// Pending reads are yielded as [`FrameRead::Pending`] so the consumer of
    /// the stream decides how to wait.
    pub fn into_stream(self) -> impl Stream<Item = StreamResult<FrameRead>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut source = state?;
            match source.next_frame().await {
                Ok(FrameRead::Exhausted) => None,
                Ok(read) => Some((Ok(read), Some(source))),
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl ReaderSource<tokio::fs::File> {
    /// Open a file as a frame source.
    pub async fn open_file(path: impl AsRef<Path>, frame_size: usize) -> StreamResult<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(file, name, frame_size))
    }
}

impl<R> FrameSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_frame(&mut self) -> StreamResult<FrameRead> {
        if self.exhausted {
            return Ok(FrameRead::Exhausted);
        }

        match self.reader.read(&mut self.buffer).await {
            Ok(0) => {
                self.exhausted = true;
                Ok(FrameRead::Exhausted)
            }
            Ok(read) => {
                self.metrics.chunks_delivered += 1;
                self.metrics.bytes_delivered += read as u64;
                if read != self.frame_size {
                    self.metrics.short_chunks += 1;
                }
                Ok(FrameRead::Chunk(self.buffer[..read].to_vec()))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                self.metrics.pending_reads += 1;
                Ok(FrameRead::Pending)
            }
            Err(err) => {
                self.exhausted = true;
                Err(StreamError::Io(err))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> SourceMetrics {
        self.metrics.clone()
    }
}
