//! Streams one call's frames onto the partitioned channel.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::pacer::{PaceOutcome, Pacer, PacerConfig};
use super::traits::{FrameRead, FrameSource};
use crate::frame::{CallId, FrameKind};
use crate::transport::PartitionedProducer;

/// What happened during one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    /// The call streamed
    pub call_id: CallId,
    /// Name of the asset it played
    pub asset: String,
    /// Data frames accepted by the channel
    pub frames_sent: u64,
    /// Payload bytes of those frames
    pub bytes_sent: u64,
    /// Frames shorter than a full frame
    pub short_frames: u64,
    /// Frames (including the end marker) the channel refused
    pub send_failures: u64,
    /// Frames that overran the pacing interval
    pub cadence_violations: u64,
    /// Retries after the source had nothing ready
    pub backoffs: u64,
    /// The channel accepted the end-of-call marker
    pub end_marker_sent: bool,
    /// The call was cut short by cancellation
    pub stopped_early: bool,
    /// The call was cut short by a read error
    pub read_error: bool,
}

impl CallSummary {
    fn new(call_id: CallId, asset: &str) -> Self {
        Self {
            call_id,
            asset: asset.to_string(),
            frames_sent: 0,
            bytes_sent: 0,
            short_frames: 0,
            send_failures: 0,
            cadence_violations: 0,
            backoffs: 0,
            end_marker_sent: false,
            stopped_early: false,
            read_error: false,
        }
    }
}

/// Binds a call to a frame source and pushes its frames at the pacer's cadence.
///
/// Every frame, including the terminal zero-length marker, is sent with the
/// call id as partition key. Send failures are logged and the frame dropped;
/// retrying is the transport's business.
pub struct CallEmitter<P> {
    producer: Arc<P>,
    pacer: PacerConfig,
    frame_size: usize,
    cancel: CancellationToken,
}

impl<P> Clone for CallEmitter<P> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            pacer: self.pacer,
            frame_size: self.frame_size,
            cancel: self.cancel.clone(),
        }
    }
}

impl<P: PartitionedProducer> CallEmitter<P> {
    /// Create an emitter sending through `producer`.
    pub fn new(
        producer: Arc<P>,
        pacer: PacerConfig,
        frame_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            producer,
            pacer,
            frame_size,
            cancel,
        }
    }

    /// Stream `source` as call `call_id` until it is exhausted or the emitter is cancelled.
    ///
    /// The end-of-call marker is sent in every case, so the consumer can
    /// finalize whatever it has received.
    pub async fn run_call<S: FrameSource>(&self, call_id: &CallId, mut source: S) -> CallSummary {
        let mut summary = CallSummary::new(call_id.clone(), source.name());
        let mut pacer = Pacer::new(self.pacer);
        tracing::info!(call_id = %call_id, asset = %source.name(), "New call");

        loop {
            if self.cancel.is_cancelled() {
                summary.stopped_early = true;
                break;
            }

            let started = pacer.start_frame();
            match source.next_frame().await {
                Ok(FrameRead::Exhausted) => break,
                Ok(FrameRead::Pending) => {
                    pacer.backoff().await;
                    continue;
                }
                Ok(FrameRead::Chunk(bytes)) if bytes.is_empty() => {
                    pacer.backoff().await;
                    continue;
                }
                Ok(FrameRead::Chunk(bytes)) => {
                    if let FrameKind::Short(len) = FrameKind::classify(bytes.len(), self.frame_size) {
                        tracing::warn!(call_id = %call_id, len, "Short frame");
                        summary.short_frames += 1;
                    }
                    let len = bytes.len() as u64;
                    if self.send(call_id, bytes, &mut summary).await {
                        summary.frames_sent += 1;
                        summary.bytes_sent += len;
                    }
                }
                Err(err) => {
                    tracing::error!(call_id = %call_id, error = %err, "Reading asset failed, ending call");
                    summary.read_error = true;
                    break;
                }
            }

            if let PaceOutcome::Late { overrun } = pacer.finish_frame(started).await {
                tracing::warn!(
                    call_id = %call_id,
                    overrun_ms = overrun.as_millis() as u64,
                    "Cadence violation"
                );
            }
        }

        summary.end_marker_sent = self.send(call_id, Vec::new(), &mut summary).await;
        let stats = pacer.stats();
        summary.cadence_violations = stats.cadence_violations;
        summary.backoffs = stats.backoffs;

        tracing::info!(
            call_id = %call_id,
            frames = summary.frames_sent,
            bytes = summary.bytes_sent,
            violations = summary.cadence_violations,
            "End call"
        );
        summary
    }

    async fn send(&self, call_id: &CallId, payload: Vec<u8>, summary: &mut CallSummary) -> bool {
        match self.producer.send(call_id, payload).await {
            Ok(ack) => {
                tracing::trace!(call_id = %call_id, shard_id = %ack.shard, sequence = %ack.sequence, "Frame sent");
                true
            }
            Err(err) => {
                tracing::warn!(call_id = %call_id, error = %err, "Error sending record, frame dropped");
                summary.send_failures += 1;
                false
            }
        }
    }
}
