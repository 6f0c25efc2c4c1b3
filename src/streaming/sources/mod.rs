//! Frame source implementations.

pub mod catalog;
pub mod file;
pub mod generator;

// Re-export main source types
pub use catalog::{Asset, AssetCatalog, AssetReader};
pub use file::ReaderSource;
pub use generator::{SignalType, ToneSpec};
