//! Fixed-size pool of concurrently active calls.
//!
//! The supervisor owns one long-lived task per slot. Each slot streams a call,
//! and the moment that call completes it takes a fresh call id and a newly
//! drawn asset and starts over, so the pool keeps `pool_size` call lifecycles
//! going until it is shut down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::emitter::{CallEmitter, CallSummary};
use super::error::{StreamError, StreamResult};
use super::sources::AssetCatalog;
use crate::config::ProducerConfig;
use crate::frame::CallId;
use crate::observability::call_span;
use crate::transport::PartitionedProducer;

/// The call id currently assigned to every pool slot.
#[derive(Debug)]
pub struct ActiveCalls {
    slots: RwLock<Vec<Option<CallId>>>,
    completed: AtomicU64,
}

impl ActiveCalls {
    fn new(pool_size: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; pool_size]),
            completed: AtomicU64::new(0),
        }
    }

    fn assign(&self, slot: usize, call_id: CallId) {
        if let Some(entry) = self.slots.write().get_mut(slot) {
            *entry = Some(call_id);
        }
    }

    fn release(&self, slot: usize) {
        if let Some(entry) = self.slots.write().get_mut(slot) {
            *entry = None;
        }
    }

    fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Ids of all slots that currently hold a call.
    pub fn snapshot(&self) -> Vec<CallId> {
        self.slots.read().iter().flatten().cloned().collect()
    }

    /// Number of slots that currently hold a call.
    pub fn active_count(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }

    /// Id held by `slot`, if any.
    pub fn slot(&self, slot: usize) -> Option<CallId> {
        self.slots.read().get(slot).cloned().flatten()
    }

    /// Calls completed across all slots so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Per-slot totals reported when the pool shuts down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotReport {
    /// Slot index
    pub slot: usize,
    /// Calls streamed, including ones cut short
    pub calls: u64,
    /// Data frames accepted by the channel
    pub frames_sent: u64,
    /// Payload bytes accepted by the channel
    pub bytes_sent: u64,
    /// Frames the channel refused
    pub send_failures: u64,
    /// Frames that overran the pacing interval
    pub cadence_violations: u64,
    /// Assets that could not be opened
    pub asset_failures: u64,
}

impl SlotReport {
    fn absorb(&mut self, summary: &CallSummary) {
        self.calls += 1;
        self.frames_sent += summary.frames_sent;
        self.bytes_sent += summary.bytes_sent;
        self.send_failures += summary.send_failures;
        self.cadence_violations += summary.cadence_violations;
    }
}

/// Keeps `pool_size` call emitters running.
pub struct CallSupervisor {
    calls: Arc<ActiveCalls>,
    tasks: JoinSet<SlotReport>,
    cancel: CancellationToken,
    pool_size: usize,
}

impl CallSupervisor {
    /// Generate `pool_size` call ids and start one emitter task per id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<P>(
        producer: Arc<P>,
        catalog: Arc<AssetCatalog>,
        config: &ProducerConfig,
        cancel: CancellationToken,
    ) -> StreamResult<Self>
    where
        P: PartitionedProducer + 'static,
    {
        config.validate()?;
        if catalog.is_empty() {
            return Err(StreamError::EmptyCatalog);
        }

        let calls = Arc::new(ActiveCalls::new(config.pool_size));
        let emitter = CallEmitter::new(producer, config.pacer(), config.frame_size, cancel.clone());
        let mut tasks = JoinSet::new();

        for slot in 0..config.pool_size {
            let call_id = CallId::generate();
            calls.assign(slot, call_id.clone());
            tasks.spawn(run_slot(SlotContext {
                slot,
                first_call: call_id,
                emitter: emitter.clone(),
                catalog: Arc::clone(&catalog),
                calls: Arc::clone(&calls),
                config: config.clone(),
                cancel: cancel.clone(),
            }));
        }

        tracing::info!(pool_size = config.pool_size, assets = catalog.len(), "Call pool started");
        Ok(Self {
            calls,
            tasks,
            cancel,
            pool_size: config.pool_size,
        })
    }

    /// Live view of the ids held by each slot.
    pub fn active_calls(&self) -> Arc<ActiveCalls> {
        Arc::clone(&self.calls)
    }

    /// Number of slots.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stop every slot and wait for them. Calls in flight send their end marker first.
    pub async fn shutdown(mut self) -> Vec<SlotReport> {
        self.cancel.cancel();

        let mut reports = Vec::with_capacity(self.pool_size);
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => tracing::error!(error = %err, "Call slot task failed"),
            }
        }
        reports.sort_by_key(|r| r.slot);

        tracing::info!(
            calls = reports.iter().map(|r| r.calls).sum::<u64>(),
            completed = self.calls.completed(),
            "Call pool stopped"
        );
        reports
    }
}

struct SlotContext<P> {
    slot: usize,
    first_call: CallId,
    emitter: CallEmitter<P>,
    catalog: Arc<AssetCatalog>,
    calls: Arc<ActiveCalls>,
    config: ProducerConfig,
    cancel: CancellationToken,
}

async fn run_slot<P: PartitionedProducer + 'static>(ctx: SlotContext<P>) -> SlotReport {
    let mut report = SlotReport {
        slot: ctx.slot,
        ..SlotReport::default()
    };
    let gap = ctx.config.inter_call_gap();
    let mut call_id = ctx.first_call;

    loop {
        let asset = ctx.catalog.choose_random().clone();
        let opened = match asset.open(ctx.config.frame_size).await {
            Ok(source) => {
                let summary = ctx
                    .emitter
                    .run_call(&call_id, source)
                    .instrument(call_span(&call_id))
                    .await;
                report.absorb(&summary);
                ctx.calls.record_completion();
                true
            }
            Err(err) => {
                tracing::error!(call_id = %call_id, asset = %asset.name(), error = %err, "Could not open asset");
                report.asset_failures += 1;
                false
            }
        };

        if ctx.cancel.is_cancelled() {
            break;
        }

        call_id = CallId::generate();
        ctx.calls.assign(ctx.slot, call_id.clone());

        // Never spin on an asset that keeps failing to open.
        let pause = if !opened && gap.is_zero() {
            ctx.config.pacer().interval
        } else {
            gap
        };
        if !pause.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    ctx.calls.release(ctx.slot);
    report
}
