// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::box_collection)] // Warns on boxed `Vec`, `String`, etc.
#![warn(clippy::vec_box)] // Avoids using `Vec<Box<T>>` when unnecessary
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![warn(clippy::unwrap_used)] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_safety_doc)] // Docs for `unsafe` functions
#![allow(clippy::too_many_arguments)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![warn(missing_docs)]

//! # call_relay
//!
//! Streams recorded call audio through a partitioned, ordered channel in
//! real time and reassembles every call on the other side.
//!
//! ## Overview
//!
//! The **producer** keeps a fixed pool of simulated calls going. Each call
//! reads a recording from the asset catalog in frames of [`FRAME_SIZE`] bytes
//! (20 ms of 8 kHz, 16-bit mono audio) and sends one frame every 20 ms, keyed
//! by the call's id. A zero-length frame marks the end of the call.
//!
//! The **consumer** leases every shard of the channel, routes each record to
//! the sink of its call, closes the sink on the end marker and checkpoints its
//! progress after every batch. A failure it cannot classify stops the whole
//! process with a distinct exit status.
//!
//! ## Modules
//!
//! - [`frame`]: call ids and frame classification
//! - [`transport`]: channel and checkpoint interfaces, plus an in-process implementation
//! - [`streaming`]: frame sources, pacing, call emitters and the call pool
//! - [`consumer`]: sinks, demultiplexing, checkpoint policy and the shard pool
//! - [`config`]: serde-backed configuration
//! - [`observability`]: logging setup
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use call_relay::config::RelayConfig;
//! use call_relay::consumer::{ConsumerPool, FileSinkFactory};
//! use call_relay::streaming::{AssetCatalog, CallSupervisor};
//! use call_relay::transport::{MemoryChannel, MemoryCheckpointStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RelayConfig::default();
//! let channel = Arc::new(MemoryChannel::new(&config.stream_name, config.shard_count));
//! let store = MemoryCheckpointStore::new();
//! let cancel = CancellationToken::new();
//!
//! let consumers = ConsumerPool::start(
//!     &channel,
//!     &store,
//!     FileSinkFactory::from_config(&config.consumer),
//!     &config.consumer,
//!     "worker-1",
//!     cancel.clone(),
//! )?;
//! let calls = CallSupervisor::start(
//!     channel.clone(),
//!     Arc::new(AssetCatalog::builtin()),
//!     &config.producer,
//!     cancel.child_token(),
//! )?;
//! ```
//!
//! ## Error Handling
//!
//! Errors are layered: [`transport::TransportError`] and
//! [`transport::CheckpointError`] come from the channel and the checkpoint
//! store, [`streaming::StreamError`] covers everything a stream or shard can
//! hit, and [`RelayError`] is what stops the process.

pub mod config;
pub mod consumer;
mod error;
pub mod frame;
pub mod observability;
pub mod streaming;
pub mod transport;

pub use crate::error::{CONFIG_EXIT_CODE, FATAL_EXIT_CODE, RelayError, RelayResult};
pub use crate::frame::{CallId, FRAME_SIZE, FrameKind};
pub use crate::streaming::{StreamError, StreamResult};
