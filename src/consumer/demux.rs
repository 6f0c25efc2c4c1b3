//! Reassembly of interleaved call frames into one sink per call.
//!
//! A demultiplexer belongs to exactly one shard and is driven by that shard's
//! task alone, so its call table needs no locking. Records are applied in the
//! order they arrive; nothing is buffered or reordered.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::frame::{CallId, FrameKind};
use crate::streaming::{FrameSink, SinkFactory, StreamError, StreamResult};
use crate::transport::{Record, SequenceNumber, ShardId, shard_for_key};

/// Why a record was not written anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sink for a new call could not be opened; the next frame retries.
    OpenFailed,
    /// The call's sink refused the bytes; the call stays open.
    WriteFailed,
    /// The call was already closed.
    AfterClose,
    /// End marker for a call that never sent data.
    EndOfUnknownCall,
    /// Repeated end marker for a call that is already closed.
    EndOfClosedCall,
}

/// What processing one record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Payload appended to the call's sink.
    Appended {
        /// This record opened the sink.
        opened: bool,
        /// The payload length was not a full frame.
        anomalous: bool,
    },
    /// End marker: the call's sink was released.
    Closed {
        /// Bytes the call wrote in total.
        bytes: u64,
        /// The sink flushed and closed without error.
        clean: bool,
    },
    /// The record was logged and discarded.
    Dropped(DropReason),
}

/// Counters kept by a [`FrameDemultiplexer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Records processed
    pub records: u64,
    /// Payload bytes written to sinks
    pub bytes: u64,
    /// Frames written whose length was not a full frame
    pub anomalous_frames: u64,
    /// Sinks opened
    pub streams_opened: u64,
    /// Sinks released, by end marker or on exit
    pub streams_closed: u64,
    /// Sink opens that failed
    pub open_failures: u64,
    /// Appends that failed
    pub write_failures: u64,
    /// Closes that failed
    pub close_failures: u64,
    /// Frames for calls that were already closed
    pub dropped_after_close: u64,
    /// Records whose sequence number did not advance
    pub out_of_order: u64,
}

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records in the batch.
    pub records: usize,
    /// Highest sequence number seen in the batch.
    pub last_sequence: Option<SequenceNumber>,
    /// Calls whose end marker was in the batch and whose sink was released.
    pub closed_calls: Vec<CallId>,
}

/// Bounded memory of closed calls, oldest forgotten first.
#[derive(Debug)]
struct RetiredCalls {
    order: VecDeque<CallId>,
    members: HashSet<CallId>,
    capacity: usize,
}

impl RetiredCalls {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    fn insert(&mut self, call_id: CallId) {
        if self.capacity == 0 || self.members.contains(&call_id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(call_id.clone());
        self.order.push_back(call_id);
    }

    fn contains(&self, call_id: &CallId) -> bool {
        self.members.contains(call_id)
    }
}

/// Routes one shard's records to per-call sinks.
pub struct FrameDemultiplexer<F: SinkFactory> {
    shard: ShardId,
    factory: F,
    frame_size: usize,
    shard_count: Option<u32>,
    streams: HashMap<CallId, F::Sink>,
    retired: RetiredCalls,
    last_sequence: Option<SequenceNumber>,
    stats: DemuxStats,
}

impl<F: SinkFactory> FrameDemultiplexer<F> {
    /// Create a demultiplexer for `shard`.
    ///
    /// `retired_capacity` bounds how many closed call ids are remembered so
    /// late frames for them are dropped instead of reopening the call.
    pub fn new(shard: ShardId, factory: F, frame_size: usize, retired_capacity: usize) -> Self {
        Self {
            shard,
            factory,
            frame_size,
            shard_count: None,
            streams: HashMap::new(),
            retired: RetiredCalls::new(retired_capacity),
            last_sequence: None,
            stats: DemuxStats::default(),
        }
    }

    /// Also reject records whose key does not hash to this shard.
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    /// The shard this demultiplexer serves.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Counters so far.
    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Number of calls with an open sink.
    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    /// Whether `call_id` has an open sink.
    pub fn is_active(&self, call_id: &CallId) -> bool {
        self.streams.contains_key(call_id)
    }

    /// Calls with an open sink, in no particular order.
    pub fn active_calls(&self) -> Vec<CallId> {
        self.streams.keys().cloned().collect()
    }

    /// Apply every record of a batch in order.
    ///
    /// Per-record sink failures are logged and absorbed. An `Err` means the
    /// feed itself is broken and the shard must not continue.
    pub fn process_batch(&mut self, records: &[Record]) -> StreamResult<BatchReport> {
        let mut report = BatchReport {
            records: records.len(),
            ..BatchReport::default()
        };

        for record in records {
            if let RecordOutcome::Closed { .. } = self.process_record(record)? {
                report.closed_calls.push(record.partition_key.clone());
            }
            report.last_sequence = report.last_sequence.max(Some(record.sequence));
        }
        Ok(report)
    }

    /// Apply one record.
    pub fn process_record(&mut self, record: &Record) -> StreamResult<RecordOutcome> {
        self.check_ownership(record)?;

        if let Some(prev) = self.last_sequence {
            if record.sequence <= prev {
                tracing::warn!(
                    shard_id = %self.shard,
                    call_id = %record.partition_key,
                    sequence = %record.sequence,
                    previous = %prev,
                    "Record redelivered or out of order"
                );
                self.stats.out_of_order += 1;
            }
        }
        self.last_sequence = self.last_sequence.max(Some(record.sequence));
        self.stats.records += 1;

        let call_id = &record.partition_key;
        match FrameKind::classify(record.payload.len(), self.frame_size) {
            FrameKind::EndOfCall => Ok(self.end_call(call_id)),
            kind => Ok(self.append(call_id, &record.payload, kind != FrameKind::Full)),
        }
    }

    /// Close every open sink, as on a graceful stop. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        let open: Vec<(CallId, F::Sink)> = self.streams.drain().collect();
        let count = open.len();
        for (call_id, sink) in open {
            self.release(&call_id, sink);
        }
        if count > 0 {
            tracing::info!(shard_id = %self.shard, closed = count, "Closed open streams");
        }
        count
    }

    fn check_ownership(&self, record: &Record) -> StreamResult<()> {
        if record.shard != self.shard {
            return Err(StreamError::protocol(
                self.shard,
                format!(
                    "record {} for call {} was delivered from {}",
                    record.sequence, record.partition_key, record.shard
                ),
            ));
        }
        if let Some(count) = self.shard_count {
            let owner = shard_for_key(record.partition_key.as_str(), count);
            if owner != self.shard {
                return Err(StreamError::protocol(
                    self.shard,
                    format!("call {} belongs to {}", record.partition_key, owner),
                ));
            }
        }
        Ok(())
    }

    fn append(&mut self, call_id: &CallId, payload: &[u8], anomalous: bool) -> RecordOutcome {
        if self.retired.contains(call_id) {
            tracing::warn!(shard_id = %self.shard, call_id = %call_id, len = payload.len(), "Frame after end of call dropped");
            self.stats.dropped_after_close += 1;
            return RecordOutcome::Dropped(DropReason::AfterClose);
        }

        let mut opened = false;
        let sink = match self.streams.entry(call_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.factory.open(call_id) {
                Ok(sink) => {
                    opened = true;
                    self.stats.streams_opened += 1;
                    tracing::info!(shard_id = %self.shard, call_id = %call_id, "New stream");
                    entry.insert(sink)
                }
                Err(source) => {
                    let err = StreamError::sink(call_id.clone(), "open", source);
                    tracing::error!(shard_id = %self.shard, call_id = %call_id, error = %err, "Frame dropped");
                    self.stats.open_failures += 1;
                    return RecordOutcome::Dropped(DropReason::OpenFailed);
                }
            },
        };

        if let Err(source) = sink.append(payload) {
            let err = StreamError::sink(call_id.clone(), "append", source);
            tracing::error!(shard_id = %self.shard, call_id = %call_id, len = payload.len(), error = %err, "Frame dropped");
            self.stats.write_failures += 1;
            return RecordOutcome::Dropped(DropReason::WriteFailed);
        }

        if anomalous {
            tracing::warn!(
                shard_id = %self.shard,
                call_id = %call_id,
                len = payload.len(),
                expected = self.frame_size,
                "Anomalous frame length"
            );
            self.stats.anomalous_frames += 1;
        } else {
            tracing::debug!(shard_id = %self.shard, call_id = %call_id, len = payload.len(), "Frame appended");
        }
        self.stats.bytes += payload.len() as u64;
        RecordOutcome::Appended { opened, anomalous }
    }

    fn end_call(&mut self, call_id: &CallId) -> RecordOutcome {
        if let Some(sink) = self.streams.remove(call_id) {
            let bytes = sink.bytes_written();
            let clean = self.release(call_id, sink);
            return RecordOutcome::Closed { bytes, clean };
        }

        if self.retired.contains(call_id) {
            tracing::debug!(shard_id = %self.shard, call_id = %call_id, "Repeated end of call ignored");
            RecordOutcome::Dropped(DropReason::EndOfClosedCall)
        } else {
            tracing::warn!(shard_id = %self.shard, call_id = %call_id, "End of call for unknown stream");
            RecordOutcome::Dropped(DropReason::EndOfUnknownCall)
        }
    }

    /// Close `sink` and retire its call. Returns whether the close succeeded.
    fn release(&mut self, call_id: &CallId, sink: F::Sink) -> bool {
        let bytes = sink.bytes_written();
        self.retired.insert(call_id.clone());
        self.stats.streams_closed += 1;

        match sink.close() {
            Ok(()) => {
                tracing::info!(shard_id = %self.shard, call_id = %call_id, bytes, "End stream");
                true
            }
            Err(source) => {
                let err = StreamError::sink(call_id.clone(), "close", source);
                tracing::error!(shard_id = %self.shard, call_id = %call_id, bytes, error = %err, "Stream ended uncleanly");
                self.stats.close_failures += 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retired_calls_forget_oldest() {
        let mut retired = RetiredCalls::new(2);
        retired.insert(CallId::from("a"));
        retired.insert(CallId::from("b"));
        retired.insert(CallId::from("a"));
        retired.insert(CallId::from("c"));

        assert!(!retired.contains(&CallId::from("a")));
        assert!(retired.contains(&CallId::from("b")));
        assert!(retired.contains(&CallId::from("c")));
    }

    #[test]
    fn test_zero_capacity_remembers_nothing() {
        let mut retired = RetiredCalls::new(0);
        retired.insert(CallId::from("a"));
        assert!(!retired.contains(&CallId::from("a")));
    }
}
