//! Tests for the producer side.
//!
//! This module holds the test doubles shared by the sibling test files: a
//! producer that records every frame it is handed and a source that plays a
//! fixed script of reads.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::error::{StreamError, StreamResult};
use super::traits::{FrameRead, FrameSource};
use crate::frame::CallId;
use crate::transport::{PartitionedProducer, SendAck, SequenceNumber, ShardId, TransportError};

// Include test modules from sibling files
mod emitter_tests;

/// One frame as seen by [`RecordingProducer`].
#[derive(Debug, Clone)]
pub(crate) struct SentFrame {
    pub call_id: CallId,
    pub payload: Vec<u8>,
    pub at: Instant,
}

/// Producer that keeps every frame and can be told to refuse some.
#[derive(Debug, Default)]
pub(crate) struct RecordingProducer {
    sent: Mutex<Vec<SentFrame>>,
    failing_sends: Mutex<u32>,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` sends.
    pub fn fail_next(&self, count: u32) {
        *self.failing_sends.lock() += count;
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    pub fn frames_for(&self, call_id: &CallId) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|s| &s.call_id == call_id)
            .map(|s| s.payload.clone())
            .collect()
    }

    /// Distinct call ids in the order they first appeared.
    pub fn call_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = Vec::new();
        for sent in self.sent.lock().iter() {
            if !ids.contains(&sent.call_id) {
                ids.push(sent.call_id.clone());
            }
        }
        ids
    }

    pub fn end_markers(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.payload.is_empty())
            .count()
    }
}

impl PartitionedProducer for RecordingProducer {
    async fn send(&self, partition_key: &CallId, payload: Vec<u8>) -> Result<SendAck, TransportError> {
        {
            let mut failing = self.failing_sends.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::Rejected("scripted failure".to_string()));
            }
        }

        let mut sent = self.sent.lock();
        let sequence = SequenceNumber(sent.len() as u64);
        sent.push(SentFrame {
            call_id: partition_key.clone(),
            payload,
            at: Instant::now(),
        });
        Ok(SendAck {
            shard: ShardId(0),
            sequence,
        })
    }
}

/// One step of a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Chunk(Vec<u8>),
    /// A chunk that takes `Duration` to read.
    Slow(Duration, Vec<u8>),
    Pending,
    Fail(io::ErrorKind),
}

/// Source that replays a fixed list of reads, then reports exhaustion.
#[derive(Debug)]
pub(crate) struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// `count` full frames, each filled with its index.
    pub fn frames(count: usize, frame_size: usize) -> Self {
        Self::new((0..count).map(|i| Step::Chunk(vec![i as u8; frame_size])))
    }
}

impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> StreamResult<FrameRead> {
        match self.steps.pop_front() {
            None => Ok(FrameRead::Exhausted),
            Some(Step::Chunk(bytes)) => Ok(FrameRead::Chunk(bytes)),
            Some(Step::Slow(delay, bytes)) => {
                tokio::time::sleep(delay).await;
                Ok(FrameRead::Chunk(bytes))
            }
            Some(Step::Pending) => Ok(FrameRead::Pending),
            Some(Step::Fail(kind)) => Err(StreamError::Io(io::Error::new(kind, "scripted read failure"))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
