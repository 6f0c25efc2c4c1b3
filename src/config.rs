//! Configuration for the producer pool, the consumer and the stream they share.
//!
//! Every section implements [`Default`] with the values the relay was tuned
//! for, and can be loaded from JSON where any missing field falls back to
//! that default.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::FRAME_SIZE;
use crate::streaming::StreamError;
use crate::streaming::pacer::PacerConfig;

/// Default number of concurrently active calls.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default emission cadence: one frame every 20 ms.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Default pause before retrying a source that had nothing ready.
pub const DEFAULT_WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(10);

/// A cloud-style region name such as `us-east-1` or `ap-southeast-2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Validate and wrap a region name.
    ///
    /// Accepts lowercase dash-separated names made of a two-letter area, one
    /// or more words, and a trailing number.
    pub fn parse(name: &str) -> Result<Self, StreamError> {
        let parts: Vec<&str> = name.split('-').collect();
        let valid = parts.len() >= 3
            && parts[0].len() == 2
            && parts[..parts.len() - 1]
                .iter()
                .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_lowercase()))
            && parts[parts.len() - 1]
                .bytes()
                .all(|b| b.is_ascii_digit())
            && !parts[parts.len() - 1].is_empty();

        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(StreamError::InvalidConfig(format!(
                "{name} is not a valid region"
            )))
        }
    }

    /// The region name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Region {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Region {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.0
    }
}

/// Configuration of the call-producing side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Number of calls kept active at all times
    pub pool_size: usize,

    /// Bytes per frame
    pub frame_size: usize,

    /// Target time between two frames of one call
    pub frame_interval_ms: u64,

    /// Pause before re-reading a source that had nothing ready
    pub would_block_backoff_ms: u64,

    /// Pause between the end of one call and the first frame of the next in the same slot
    pub inter_call_gap_ms: u64,

    /// Directory of audio assets; the built-in tones are used when unset
    pub asset_dir: Option<PathBuf>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            frame_size: FRAME_SIZE,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            would_block_backoff_ms: DEFAULT_WOULD_BLOCK_BACKOFF.as_millis() as u64,
            inter_call_gap_ms: 1000,
            asset_dir: None,
        }
    }
}

impl ProducerConfig {
    /// Back-to-back calls with no pause between them.
    pub fn continuous(pool_size: usize) -> Self {
        Self {
            pool_size,
            inter_call_gap_ms: 0,
            ..Self::default()
        }
    }

    /// Pacer settings derived from this configuration.
    pub fn pacer(&self) -> PacerConfig {
        PacerConfig {
            interval: Duration::from_millis(self.frame_interval_ms),
            backoff: Duration::from_millis(self.would_block_backoff_ms),
        }
    }

    /// Pause between consecutive calls of one slot.
    pub fn inter_call_gap(&self) -> Duration {
        Duration::from_millis(self.inter_call_gap_ms)
    }

    /// Check the configuration for values the producer cannot work with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.pool_size == 0 {
            return Err(StreamError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.frame_size == 0 {
            return Err(StreamError::InvalidConfig(
                "frame_size must be at least 1".to_string(),
            ));
        }
        if self.frame_interval_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "frame_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the reassembling consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Directory reassembled calls are written to
    pub output_dir: PathBuf,

    /// File name prefix; the call id follows it
    pub file_prefix: String,

    /// File extension, without the dot
    pub file_extension: String,

    /// Bytes per full frame; other non-zero lengths are flagged as anomalous
    pub frame_size: usize,

    /// Upper bound on records handed to the demultiplexer at once
    pub max_batch_records: usize,

    /// Checkpoint after this many processed batches
    pub checkpoint_every_batches: u32,

    /// Close still-open sinks when a shard stops gracefully
    pub close_sinks_on_shutdown: bool,

    /// How many closed call ids are remembered to refuse reopening them
    pub retired_call_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir(),
            file_prefix: "call".to_string(),
            file_extension: "wav".to_string(),
            frame_size: FRAME_SIZE,
            max_batch_records: 100,
            checkpoint_every_batches: 1,
            close_sinks_on_shutdown: true,
            retired_call_capacity: 10_000,
        }
    }
}

impl ConsumerConfig {
    /// Defaults, writing into `output_dir`.
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Check the configuration for values the consumer cannot work with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.frame_size == 0 {
            return Err(StreamError::InvalidConfig(
                "frame_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_records == 0 {
            return Err(StreamError::InvalidConfig(
                "max_batch_records must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_every_batches == 0 {
            return Err(StreamError::InvalidConfig(
                "checkpoint_every_batches must be at least 1".to_string(),
            ));
        }
        if self.file_prefix.contains(['/', '\\']) || self.file_extension.contains(['/', '\\']) {
            return Err(StreamError::InvalidConfig(
                "file_prefix and file_extension must not contain path separators".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration: the stream plus both sides of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Name of the partitioned stream
    pub stream_name: String,

    /// Region the stream lives in
    pub region: Region,

    /// Number of shards of the stream
    pub shard_count: u32,

    /// Producer settings
    pub producer: ProducerConfig,

    /// Consumer settings
    pub consumer: ConsumerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_name: "call-audio".to_string(),
            region: Region("us-east-1".to_string()),
            shard_count: 2,
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, StreamError> {
        serde_json::from_str(text).map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.stream_name.trim().is_empty() {
            return Err(StreamError::InvalidConfig(
                "stream_name must not be empty".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(StreamError::InvalidConfig(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.producer.frame_size != self.consumer.frame_size {
            return Err(StreamError::InvalidConfig(format!(
                "producer frame_size {} differs from consumer frame_size {}",
                self.producer.frame_size, self.consumer.frame_size
            )));
        }
        self.producer.validate()?;
        self.consumer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.producer.pool_size, 10);
        assert_eq!(config.producer.pacer().interval, Duration::from_millis(20));
        assert_eq!(config.producer.pacer().backoff, Duration::from_millis(10));
        assert_eq!(config.consumer.frame_size, 320);
    }

    #[test]
    fn test_region_validation() {
        for ok in ["us-east-1", "eu-west-2", "ap-southeast-1", "us-gov-west-1"] {
            assert!(Region::parse(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "useast1", "us-east", "US-EAST-1", "usa-east-1", "us--1", "us-east-x"] {
            assert!(Region::parse(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = RelayConfig::from_json_str(
            r#"{ "stream_name": "calls", "region": "eu-west-1", "producer": { "pool_size": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.stream_name, "calls");
        assert_eq!(config.region.as_str(), "eu-west-1");
        assert_eq!(config.producer.pool_size, 3);
        assert_eq!(config.producer.frame_interval_ms, 20);
        assert_eq!(config.consumer.max_batch_records, 100);
    }

    #[test]
    fn test_invalid_region_in_json_is_rejected() {
        let err = RelayConfig::from_json_str(r#"{ "region": "nowhere" }"#).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }

    #[test]
    fn test_validation_rejects_unusable_values() {
        let mut config = RelayConfig::default();
        config.producer.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.consumer.frame_size = 160;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.consumer.file_prefix = "../call".to_string();
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.shard_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_continuous_preset_has_no_gap() {
        let config = ProducerConfig::continuous(4);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.inter_call_gap(), Duration::ZERO);
    }
}
