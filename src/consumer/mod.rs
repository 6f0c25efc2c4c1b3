//! Consumer side of the relay: reassembling calls from the shards.
//!
//! Every shard gets its own [`ShardConsumer`], which owns a
//! [`FrameDemultiplexer`] mapping call ids to open sinks and a
//! [`ProgressTracker`] deciding when to checkpoint. A zero-length record ends
//! its call: the sink is flushed, released and the id is never reopened.
//!
//! Out-of-order or duplicated delivery within a call corrupts that call's
//! output; the consumer relies on the channel's per-key ordering.

pub mod demux;
pub mod pool;
pub mod progress;
pub mod shard;
pub mod sink;

pub use demux::{BatchReport, DemuxStats, DropReason, FrameDemultiplexer, RecordOutcome};
pub use pool::ConsumerPool;
pub use progress::{CheckpointOutcome, ProgressStats, ProgressTracker};
pub use shard::{ShardConsumer, ShardExit, ShardReport};
pub use sink::{FileSink, FileSinkFactory, MemorySink, MemorySinkFactory};

#[cfg(test)]
mod tests;
