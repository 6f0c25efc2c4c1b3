//! Per-call output sinks.
//!
//! [`FileSinkFactory`] writes each call to its own file; [`MemorySinkFactory`]
//! keeps everything in memory and can be told to fail, which is what the
//! consumer tests drive.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ConsumerConfig;
use crate::frame::CallId;
use crate::streaming::{FrameSink, SinkFactory};

/// Opens `<output_dir>/<prefix><call id>.<extension>` for every new call.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    output_dir: PathBuf,
    prefix: String,
    extension: String,
}

impl FileSinkFactory {
    /// Create a factory writing into `output_dir`.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// Factory using the naming scheme from `config`.
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(
            config.output_dir.clone(),
            config.file_prefix.clone(),
            config.file_extension.clone(),
        )
    }

    /// Directory files are created in.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the output for `call_id` goes.
    ///
    /// Ids that could escape the output directory are rejected.
    pub fn path_for(&self, call_id: &CallId) -> io::Result<PathBuf> {
        let id = call_id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("call id '{id}' cannot be used as a file name"),
            ));
        }

        let file_name = if self.extension.is_empty() {
            format!("{}{}", self.prefix, id)
        } else {
            format!("{}{}.{}", self.prefix, id, self.extension)
        };
        Ok(self.output_dir.join(file_name))
    }
}

impl SinkFactory for FileSinkFactory {
    type Sink = FileSink;

    fn open(&self, call_id: &CallId) -> io::Result<FileSink> {
        let path = self.path_for(call_id)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        tracing::debug!(call_id = %call_id, path = %path.display(), "Opened call file");
        Ok(FileSink {
            writer: BufWriter::new(file),
            path,
            written: 0,
        })
    }
}

/// Buffered file holding one call.
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl FileSink {
    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for FileSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

/// What a [`MemorySinkFactory`] has seen for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CallRecording {
    bytes: Vec<u8>,
    closed: bool,
    opens: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    calls: HashMap<CallId, CallRecording>,
    failing_opens: u32,
    failing_writes: u32,
    failing_closes: u32,
}

/// In-memory sinks sharing one table, with injectable failures.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySinkFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().failing_opens += count;
    }

    /// Make the next `count` appends fail, whichever call they belong to.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().failing_writes += count;
    }

    /// Make the next `count` closes fail.
    pub fn fail_next_closes(&self, count: u32) {
        self.state.lock().failing_closes += count;
    }

    /// Bytes received so far for `call_id`.
    pub fn contents(&self, call_id: &CallId) -> Option<Vec<u8>> {
        self.state.lock().calls.get(call_id).map(|c| c.bytes.clone())
    }

    /// Whether the sink for `call_id` has been closed.
    pub fn is_closed(&self, call_id: &CallId) -> bool {
        self.state.lock().calls.get(call_id).is_some_and(|c| c.closed)
    }

    /// How often a sink was opened for `call_id`.
    pub fn opens(&self, call_id: &CallId) -> u32 {
        self.state.lock().calls.get(call_id).map_or(0, |c| c.opens)
    }

    /// Every call a sink was opened for, sorted.
    pub fn call_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.state.lock().calls.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}

impl SinkFactory for MemorySinkFactory {
    type Sink = MemorySink;

    fn open(&self, call_id: &CallId) -> io::Result<MemorySink> {
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(io::Error::other("injected open failure"));
        }

        let recording = state.calls.entry(call_id.clone()).or_default();
        recording.bytes.clear();
        recording.closed = false;
        recording.opens += 1;
        Ok(MemorySink {
            state: Arc::clone(&self.state),
            call_id: call_id.clone(),
            written: 0,
        })
    }
}

/// One call's sink inside a [`MemorySinkFactory`].
#[derive(Debug)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    call_id: CallId,
    written: u64,
}

impl FrameSink for MemorySink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::other("injected write failure"));
        }
        if let Some(recording) = state.calls.get_mut(&self.call_id) {
            recording.bytes.extend_from_slice(bytes);
        }
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.failing_closes > 0 {
            state.failing_closes -= 1;
            return Err(io::Error::other("injected close failure"));
        }
        if let Some(recording) = state.calls.get_mut(&self.call_id) {
            recording.closed = true;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}
