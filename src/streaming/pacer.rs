//! Constant-rate frame pacing.
//!
//! A [`Pacer`] spaces frames one interval apart, measured from the moment the
//! frame was started rather than from when the previous sleep ended, so the
//! time spent reading and sending counts against the interval. When a frame
//! takes longer than the interval there is no sleep and no catch-up: the
//! overrun is recorded as a cadence violation and the next frame starts
//! immediately.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::config::{DEFAULT_FRAME_INTERVAL, DEFAULT_WOULD_BLOCK_BACKOFF};

/// Pacer timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerConfig {
    /// Target time from the start of one frame to the start of the next.
    pub interval: Duration,
    /// Sleep applied when the source has nothing ready.
    pub backoff: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FRAME_INTERVAL,
            backoff: DEFAULT_WOULD_BLOCK_BACKOFF,
        }
    }
}

/// What happened at the end of one paced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    /// The frame finished early; the pacer slept for the remainder.
    OnTime { slept: Duration },
    /// The frame took at least the whole interval; nothing was slept.
    Late { overrun: Duration },
}

/// Counters kept by a pacer over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// Frames paced.
    pub frames: u64,
    /// Frames that used up the whole interval or more.
    pub cadence_violations: u64,
    /// Largest overrun seen.
    pub worst_overrun: Duration,
    /// Backoff sleeps taken because the source had nothing ready.
    pub backoffs: u64,
}

/// Drives one call's frames at a fixed cadence.
#[derive(Debug)]
pub struct Pacer {
    config: PacerConfig,
    stats: PacerStats,
}

impl Pacer {
    /// Create a pacer.
    pub fn new(config: PacerConfig) -> Self {
        Self {
            config,
            stats: PacerStats::default(),
        }
    }

    /// Mark the start of a frame. Call before reading it from the source.
    pub fn start_frame(&self) -> Instant {
        Instant::now()
    }

    /// Finish a frame started at `started`, sleeping out the rest of the interval.
    pub async fn finish_frame(&mut self, started: Instant) -> PaceOutcome {
        self.stats.frames += 1;
        let elapsed = started.elapsed();

        match self.config.interval.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                sleep(remaining).await;
                PaceOutcome::OnTime { slept: remaining }
            }
            _ => {
                let overrun = elapsed.saturating_sub(self.config.interval);
                self.stats.cadence_violations += 1;
                self.stats.worst_overrun = self.stats.worst_overrun.max(overrun);
                PaceOutcome::Late { overrun }
            }
        }
    }

    /// Sleep the fixed backoff before retrying a source that had nothing ready.
    pub async fn backoff(&mut self) {
        self.stats.backoffs += 1;
        sleep(self.config.backoff).await;
    }

    /// Counters so far.
    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    /// The pacer's configuration.
    pub fn config(&self) -> PacerConfig {
        self.config
    }
}
