//! Clock and pacing utilities for the export render loop.
//!
//! An export is anchored to a monotonic epoch recorded when encoding
//! starts. This module provides:
//! - The export clock (monotonic elapsed time plus a wall-clock stamp)
//! - Frame interval arithmetic
//! - Display-refresh pacing for the per-frame render loop

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// A clock that provides monotonic timestamps relative to the moment
/// encoding started.
///
/// Uses the tokio clock so paused-time tests observe virtual time.
#[derive(Debug, Clone)]
pub struct ExportClock {
    epoch: Instant,
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Time elapsed since the epoch.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Seconds elapsed since the epoch.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Wall-clock time at the epoch (RFC 3339).
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Duration of one frame at the given rate.
pub fn frame_interval(rate_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / rate_hz.max(1) as u64)
}

/// Schedules one iteration of the render loop per display refresh.
///
/// Cancelling a paced loop means not awaiting the next frame; there is
/// no interruption.
#[async_trait::async_trait]
pub trait FramePacer: Send {
    /// Suspend until the next frame should be rendered.
    async fn next_frame(&mut self);

    /// Nominal pacing rate in Hz.
    fn rate_hz(&self) -> u32;
}

/// Frame pacer backed by a tokio interval.
///
/// Late ticks are skipped rather than bursted, the same way a display
/// drops refreshes when the loop body runs long.
#[derive(Debug)]
pub struct IntervalPacer {
    rate_hz: u32,
    interval: Option<Interval>,
}

impl IntervalPacer {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: rate_hz.max(1),
            interval: None,
        }
    }
}

#[async_trait::async_trait]
impl FramePacer for IntervalPacer {
    async fn next_frame(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => {
                // The first frame is rendered immediately; pacing starts after it.
                let period = frame_interval(self.rate_hz);
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.interval = Some(interval);
            }
        }
    }

    fn rate_hz(&self) -> u32 {
        self.rate_hz
    }
}
