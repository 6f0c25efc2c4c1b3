//! # call-relay
//!
//! Runs the call producer pool and the shard consumers in one process over
//! an in-process partitioned channel.
//!
//! ## Usage
//!
//! ```bash
//! # Ten concurrent calls, reassembled into /tmp/call<id>.wav
//! call-relay call-audio us-east-1
//!
//! # Stream recordings from a directory for a minute, JSON logs
//! call-relay call-audio eu-west-1 --asset-dir ./recordings --run-for-secs 60 --log-format json
//! ```
//!
//! Ctrl-C stops the producers, lets the consumers drain what was sent and
//! closes every call. An unrecoverable consumer failure exits with status 70
//! straight away.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use call_relay::config::{Region, RelayConfig};
use call_relay::consumer::{ConsumerPool, FileSinkFactory};
use call_relay::observability::{LogFormat, init_logging};
use call_relay::streaming::{AssetCatalog, CallSupervisor};
use call_relay::transport::{MemoryChannel, MemoryCheckpointStore};
use call_relay::{FATAL_EXIT_CODE, RelayError, RelayResult};

// ============================================================================
// CLI Arguments
// ============================================================================

/// Real-time call audio relay.
#[derive(Debug, Parser)]
#[command(name = "call-relay")]
#[command(about = "Streams call recordings through a sharded channel and reassembles them")]
#[command(version)]
struct Args {
    /// Name of the stream to send frames to.
    stream_name: String,

    /// Region the stream lives in (e.g., `us-east-1`).
    region: String,

    /// Number of concurrent calls.
    #[arg(long, env = "CALL_RELAY_CALLS")]
    calls: Option<usize>,

    /// Number of shards of the stream.
    #[arg(long, env = "CALL_RELAY_SHARDS")]
    shards: Option<u32>,

    /// Directory reassembled calls are written to.
    #[arg(long, env = "CALL_RELAY_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory of recordings to stream instead of the built-in tones.
    #[arg(long, env = "CALL_RELAY_ASSET_DIR")]
    asset_dir: Option<PathBuf>,

    /// JSON configuration file; command line options override it.
    #[arg(long, env = "CALL_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Stop gracefully after this many seconds.
    #[arg(long, env = "CALL_RELAY_RUN_FOR_SECS")]
    run_for_secs: Option<u64>,

    /// Log output format.
    #[arg(long, env = "CALL_RELAY_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

impl Args {
    fn relay_config(&self) -> RelayResult<RelayConfig> {
        let region = Region::parse(&self.region)
            .map_err(|_| RelayError::Config(format!("{} is not a valid region", self.region)))?;

        let mut config = match &self.config {
            Some(path) => RelayConfig::from_json_file(path)?,
            None => RelayConfig::default(),
        };
        config.stream_name = self.stream_name.clone();
        config.region = region;
        if let Some(calls) = self.calls {
            config.producer.pool_size = calls;
        }
        if let Some(shards) = self.shards {
            config.shard_count = shards;
        }
        if let Some(dir) = &self.output_dir {
            config.consumer.output_dir = dir.clone();
        }
        if let Some(dir) = &self.asset_dir {
            config.producer.asset_dir = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_format);

    let config = match args.relay_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = run(config, args.run_for_secs.map(Duration::from_secs)).await {
        let code = err
            .downcast_ref::<RelayError>()
            .map_or(FATAL_EXIT_CODE, RelayError::exit_code);
        tracing::error!(error = %format!("{err:#}"), exit_code = code, "Relay stopped");
        std::process::exit(code);
    }
}

async fn run(config: RelayConfig, run_for: Option<Duration>) -> Result<()> {
    std::fs::create_dir_all(&config.consumer.output_dir).map_err(|err| {
        RelayError::Config(format!(
            "cannot create output directory {}: {err}",
            config.consumer.output_dir.display()
        ))
    })?;

    let catalog = match &config.producer.asset_dir {
        Some(dir) => AssetCatalog::from_dir(dir).map_err(RelayError::from)?,
        None => AssetCatalog::builtin(),
    };

    let channel = Arc::new(MemoryChannel::new(config.stream_name.clone(), config.shard_count));
    let store = MemoryCheckpointStore::new();
    let cancel = CancellationToken::new();
    let owner = format!("call-relay-{}", std::process::id());

    let consumers = ConsumerPool::start(
        &channel,
        &store,
        FileSinkFactory::from_config(&config.consumer),
        &config.consumer,
        &owner,
        cancel.clone(),
    )?;
    let calls = CallSupervisor::start(
        Arc::clone(&channel),
        Arc::new(catalog),
        &config.producer,
        cancel.child_token(),
    )
    .map_err(RelayError::from)?;

    tracing::info!(
        stream = %config.stream_name,
        region = %config.region,
        shards = config.shard_count,
        calls = config.producer.pool_size,
        output_dir = %config.consumer.output_dir.display(),
        "Relay running"
    );

    let mut consumers = tokio::spawn(consumers.join());
    tokio::select! {
        joined = &mut consumers => {
            // Consumers only stop on their own when something went wrong.
            let reports = joined??;
            tracing::warn!(shards = reports.len(), "Consumers stopped before the producers");
            calls.shutdown().await;
            return Ok(());
        }
        _ = shutdown_signal(run_for) => {}
    }

    tracing::info!("Shutting down");
    let slots = calls.shutdown().await;
    channel.close();
    let shards = consumers.await??;

    for slot in &slots {
        tracing::info!(
            slot = slot.slot,
            calls = slot.calls,
            frames = slot.frames_sent,
            send_failures = slot.send_failures,
            cadence_violations = slot.cadence_violations,
            "Call slot summary"
        );
    }
    for shard in &shards {
        tracing::info!(
            shard_id = %shard.shard,
            exit = ?shard.exit,
            records = shard.demux.records,
            streams_closed = shard.demux.streams_closed,
            checkpoints = shard.progress.saved,
            "Shard summary"
        );
    }
    Ok(())
}

async fn shutdown_signal(run_for: Option<Duration>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received"),
        _ = deadline => tracing::info!("Run time elapsed"),
    }
}
