//! Tests for the consumer side.
//!
//! This module holds helpers shared by the sibling test files.

use std::collections::VecDeque;

use crate::frame::CallId;
use crate::transport::{Record, RecordFeed, SequenceNumber, ShardId};

mod progress_tests;
mod shard_tests;

pub(crate) const SHARD: ShardId = ShardId(0);

/// Builds records for one shard with increasing sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct RecordBuilder {
    next_sequence: u64,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&mut self, call_id: &str, payload: Vec<u8>) -> Record {
        let sequence = SequenceNumber(self.next_sequence);
        self.next_sequence += 1;
        Record {
            shard: SHARD,
            sequence,
            partition_key: CallId::from(call_id),
            payload,
        }
    }

    pub fn end(&mut self, call_id: &str) -> Record {
        self.data(call_id, Vec::new())
    }
}

/// Feed handing out fixed batches, then either ending or waiting forever.
pub(crate) struct ScriptedFeed {
    shard: ShardId,
    batches: VecDeque<Vec<Record>>,
    ends: bool,
}

impl ScriptedFeed {
    /// Feed that reports the shard ended after the last batch.
    pub fn ending(batches: Vec<Vec<Record>>) -> Self {
        Self {
            shard: SHARD,
            batches: batches.into(),
            ends: true,
        }
    }

    /// Feed that never ends after the last batch.
    pub fn open(batches: Vec<Vec<Record>>) -> Self {
        Self {
            ends: false,
            ..Self::ending(batches)
        }
    }
}

impl RecordFeed for ScriptedFeed {
    fn shard_id(&self) -> ShardId {
        self.shard
    }

    async fn next_batch(&mut self, _max_records: usize) -> Option<Vec<Record>> {
        if let Some(batch) = self.batches.pop_front() {
            return Some(batch);
        }
        if !self.ends {
            std::future::pending::<()>().await;
        }
        None
    }
}
