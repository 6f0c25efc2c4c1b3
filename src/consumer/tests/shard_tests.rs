//! Tests for the per-shard processing loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::super::shard::*;
use super::super::sink::MemorySinkFactory;
use super::{RecordBuilder, SHARD, ScriptedFeed};
use crate::config::ConsumerConfig;
use crate::frame::{CallId, FRAME_SIZE};
use crate::streaming::StreamError;
use crate::transport::{
    CheckpointPosition, MemoryCheckpointStore, SequenceNumber, ShardCheckpointer, ShardId,
};

fn consumer(
    factory: &MemorySinkFactory,
    store: &MemoryCheckpointStore,
    config: &ConsumerConfig,
) -> ShardConsumer<MemorySinkFactory, ShardCheckpointer> {
    let (checkpointer, resume) = store.acquire(SHARD, "worker-1");
    let mut consumer = ShardConsumer::new(SHARD, factory.clone(), checkpointer, config);
    consumer.initialize(resume);
    consumer
}

#[tokio::test]
async fn test_shard_runs_to_its_end() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let mut rb = RecordBuilder::new();
    let feed = ScriptedFeed::ending(vec![
        vec![rb.data("A", vec![1; FRAME_SIZE]), rb.data("B", vec![2; FRAME_SIZE])],
        vec![rb.end("A"), rb.end("B")],
    ]);

    let report = consumer(&factory, &store, &ConsumerConfig::default())
        .run(feed, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.exit, ShardExit::ShardEnded);
    assert_eq!(report.batches, 2);
    assert_eq!(report.closed_on_exit, 0);
    assert_eq!(report.demux.streams_closed, 2);
    assert_eq!(store.position(SHARD), Some(CheckpointPosition::ShardEnd));
    assert_eq!(factory.contents(&CallId::from("A")).unwrap(), vec![1; FRAME_SIZE]);
    assert!(factory.is_closed(&CallId::from("B")));
}

#[tokio::test]
async fn test_lost_lease_stops_the_shard_cleanly() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let consumer = consumer(&factory, &store, &ConsumerConfig::default());
    store.transfer_lease(SHARD, "worker-2");

    let mut rb = RecordBuilder::new();
    let feed = ScriptedFeed::ending(vec![
        vec![rb.data("A", vec![1; FRAME_SIZE])],
        vec![rb.data("B", vec![2; FRAME_SIZE])],
    ]);
    let report = consumer.run(feed, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit, ShardExit::LeaseLost);
    assert_eq!(report.batches, 1);
    assert_eq!(report.progress.ownership_lost, 1);
    assert_eq!(factory.opens(&CallId::from("B")), 0);
    assert!(factory.is_closed(&CallId::from("A")));
    assert_eq!(store.position(SHARD), None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_checkpoints_and_closes_open_calls() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let config = ConsumerConfig {
        checkpoint_every_batches: 10,
        ..ConsumerConfig::default()
    };
    let mut rb = RecordBuilder::new();
    let feed = ScriptedFeed::open(vec![vec![
        rb.data("A", vec![1; FRAME_SIZE]),
        rb.data("A", vec![2; FRAME_SIZE]),
    ]]);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(consumer(&factory, &store, &config).run(feed, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.exit, ShardExit::Shutdown);
    assert_eq!(report.closed_on_exit, 1);
    assert!(factory.is_closed(&CallId::from("A")));
    assert_eq!(
        store.position(SHARD),
        Some(CheckpointPosition::At(SequenceNumber(1)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_can_leave_calls_open() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let config = ConsumerConfig {
        close_sinks_on_shutdown: false,
        ..ConsumerConfig::default()
    };
    let feed = ScriptedFeed::open(vec![vec![
        RecordBuilder::new().data("A", vec![1; FRAME_SIZE]),
    ]]);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(consumer(&factory, &store, &config).run(feed, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.left_open, 1);
    assert!(!factory.is_closed(&CallId::from("A")));
}

#[tokio::test(start_paused = true)]
async fn test_halt_wins_over_shutdown() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let feed = ScriptedFeed::open(vec![vec![
        RecordBuilder::new().data("A", vec![1; FRAME_SIZE]),
    ]]);

    let halt = CancellationToken::new();
    let cancel = CancellationToken::new();
    let consumer = consumer(&factory, &store, &ConsumerConfig::default()).with_halt(halt.clone());
    let task = tokio::spawn(consumer.run(feed, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    halt.cancel();
    cancel.cancel();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.exit, ShardExit::Halted);
    assert_eq!(report.closed_on_exit, 0);
    assert_eq!(report.left_open, 1);
    assert!(!factory.is_closed(&CallId::from("A")));
    assert_eq!(report.progress.attempts, 1);
}

#[tokio::test]
async fn test_fatal_batch_aborts_without_cleanup() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let mut rb = RecordBuilder::new();
    let first = rb.data("A", vec![1; FRAME_SIZE]);
    let mut foreign = rb.data("B", vec![2; FRAME_SIZE]);
    foreign.shard = ShardId(9);
    let feed = ScriptedFeed::ending(vec![vec![first], vec![foreign]]);

    let result = consumer(&factory, &store, &ConsumerConfig::default())
        .run(feed, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(StreamError::Protocol { .. })));
    assert!(!factory.is_closed(&CallId::from("A")));
    assert_eq!(
        store.position(SHARD),
        Some(CheckpointPosition::At(SequenceNumber(0)))
    );
}

#[tokio::test]
async fn test_feed_for_another_shard_is_refused() {
    let factory = MemorySinkFactory::new();
    let store = MemoryCheckpointStore::new();
    let (checkpointer, _) = store.acquire(ShardId(1), "worker-1");
    let consumer = ShardConsumer::new(
        ShardId(1),
        factory,
        checkpointer,
        &ConsumerConfig::default(),
    );

    let result = consumer
        .run(ScriptedFeed::ending(Vec::new()), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(StreamError::Protocol { .. })));
}
