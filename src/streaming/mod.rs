//! Producer side of the relay: reading recordings and emitting paced frames.
//!
//! A fixed pool of call slots each draws a recording from the asset catalog,
//! splits it into frames and sends one frame per pacing interval onto the
//! partitioned channel, keyed by the call's id. When a recording runs out the
//! slot sends a zero-length end marker and starts a new call.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use call_relay::config::ProducerConfig;
//! use call_relay::streaming::{AssetCatalog, CallSupervisor};
//! use call_relay::transport::MemoryChannel;
//! use tokio_util::sync::CancellationToken;
//!
//! let channel = Arc::new(MemoryChannel::new("calls", 2));
//! let catalog = Arc::new(AssetCatalog::builtin());
//! let pool = CallSupervisor::start(channel, catalog, &ProducerConfig::default(), CancellationToken::new())?;
//! // ...
//! let reports = pool.shutdown().await;
//! ```

pub mod emitter;
pub mod error;
pub mod pacer;
pub mod sources;
pub mod supervisor;
pub mod traits;

// Re-export main types for convenience
pub use emitter::{CallEmitter, CallSummary};
pub use error::{StreamError, StreamResult};
pub use pacer::{PaceOutcome, Pacer, PacerConfig, PacerStats};
pub use sources::{Asset, AssetCatalog, ReaderSource, SignalType, ToneSpec};
pub use supervisor::{ActiveCalls, CallSupervisor, SlotReport};
pub use traits::{FrameRead, FrameSink, FrameSource, SinkFactory, SourceMetrics};

#[cfg(test)]
mod tests;
