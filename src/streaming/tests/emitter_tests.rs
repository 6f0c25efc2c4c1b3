//! Tests for streaming a single call.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::super::emitter::*;
use super::super::pacer::PacerConfig;
use super::{RecordingProducer, ScriptedSource, Step};
use crate::frame::{CallId, FRAME_SIZE};

fn emitter(producer: &Arc<RecordingProducer>) -> CallEmitter<RecordingProducer> {
    CallEmitter::new(
        Arc::clone(producer),
        PacerConfig::default(),
        FRAME_SIZE,
        CancellationToken::new(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_frames_then_end_marker_in_order() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");

    let summary = emitter(&producer)
        .run_call(&call_id, ScriptedSource::frames(3, FRAME_SIZE))
        .await;

    let frames = producer.frames_for(&call_id);
    assert_eq!(frames.len(), 4);
    for (i, frame) in frames[..3].iter().enumerate() {
        assert_eq!(frame, &vec![i as u8; FRAME_SIZE]);
    }
    assert!(frames[3].is_empty());

    assert_eq!(summary.frames_sent, 3);
    assert_eq!(summary.bytes_sent, 3 * FRAME_SIZE as u64);
    assert!(summary.end_marker_sent);
    assert!(!summary.stopped_early);
    assert_eq!(summary.asset, "scripted");
}

#[tokio::test(start_paused = true)]
async fn test_frames_are_spaced_one_interval_apart() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");

    emitter(&producer)
        .run_call(&call_id, ScriptedSource::frames(5, FRAME_SIZE))
        .await;

    let sent = producer.sent();
    for pair in sent[..5].windows(2) {
        assert_eq!(pair[1].at - pair[0].at, Duration::from_millis(20));
    }
}

#[tokio::test(start_paused = true)]
async fn test_short_tail_is_sent_as_read() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");
    let source = ScriptedSource::new([
        Step::Chunk(vec![1; FRAME_SIZE]),
        Step::Chunk(vec![2; 150]),
    ]);

    let summary = emitter(&producer).run_call(&call_id, source).await;

    let frames = producer.frames_for(&call_id);
    assert_eq!(frames[1], vec![2; 150]);
    assert_eq!(summary.short_frames, 1);
    assert_eq!(summary.bytes_sent, FRAME_SIZE as u64 + 150);
}

#[tokio::test(start_paused = true)]
async fn test_slow_reads_violate_cadence_without_dropping_frames() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");
    let source = ScriptedSource::new([
        Step::Slow(Duration::from_millis(30), vec![1; FRAME_SIZE]),
        Step::Slow(Duration::from_millis(30), vec![2; FRAME_SIZE]),
        Step::Chunk(vec![3; FRAME_SIZE]),
    ]);

    let summary = emitter(&producer).run_call(&call_id, source).await;

    assert_eq!(summary.frames_sent, 3);
    assert_eq!(summary.cadence_violations, 2);
    let frames = producer.frames_for(&call_id);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[1], vec![2; FRAME_SIZE]);

    // No sleep after a late frame: sends follow each slow read immediately.
    let sent = producer.sent();
    assert_eq!(sent[1].at - sent[0].at, Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_pending_reads_back_off_and_retry() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");
    let source = ScriptedSource::new([
        Step::Pending,
        Step::Pending,
        Step::Chunk(vec![7; FRAME_SIZE]),
    ]);

    let summary = emitter(&producer).run_call(&call_id, source).await;

    assert_eq!(summary.backoffs, 2);
    assert_eq!(summary.frames_sent, 1);
    assert_eq!(producer.frames_for(&call_id)[0], vec![7; FRAME_SIZE]);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_drops_frame_and_continues() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");
    producer.fail_next(1);

    let summary = emitter(&producer)
        .run_call(&call_id, ScriptedSource::frames(3, FRAME_SIZE))
        .await;

    assert_eq!(summary.send_failures, 1);
    assert_eq!(summary.frames_sent, 2);
    let frames = producer.frames_for(&call_id);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], vec![1; FRAME_SIZE]);
    assert!(summary.end_marker_sent);
}

#[tokio::test(start_paused = true)]
async fn test_read_error_still_ends_the_call() {
    let producer = Arc::new(RecordingProducer::new());
    let call_id = CallId::from("call-a");
    let source = ScriptedSource::new([
        Step::Chunk(vec![1; FRAME_SIZE]),
        Step::Fail(ErrorKind::UnexpectedEof),
        Step::Chunk(vec![2; FRAME_SIZE]),
    ]);

    let summary = emitter(&producer).run_call(&call_id, source).await;

    assert!(summary.read_error);
    assert_eq!(summary.frames_sent, 1);
    assert_eq!(producer.end_markers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_call_sends_end_marker() {
    let producer = Arc::new(RecordingProducer::new());
    let cancel = CancellationToken::new();
    let emitter = CallEmitter::new(
        Arc::clone(&producer),
        PacerConfig::default(),
        FRAME_SIZE,
        cancel.clone(),
    );
    cancel.cancel();

    let call_id = CallId::from("call-a");
    let summary = emitter
        .run_call(&call_id, ScriptedSource::frames(10, FRAME_SIZE))
        .await;

    assert!(summary.stopped_early);
    assert_eq!(summary.frames_sent, 0);
    assert_eq!(producer.frames_for(&call_id), vec![Vec::<u8>::new()]);
}
