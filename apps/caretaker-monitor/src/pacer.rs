use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::trace;

use crate::capture::FrameSource;
use crate::transport::{SendRejected, TransportChannel};

/// What happened on one pacing tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    /// Channel not connected; nothing was captured.
    DroppedNotConnected,
    /// Previous frame still in flight; nothing was captured.
    DroppedBusy,
    /// The source had no frame to give.
    NoFrame,
    /// The frame could not be handed to the link.
    Rejected(SendRejected),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub ticks: u64,
    pub sent: u64,
    pub dropped_busy: u64,
    pub dropped_not_connected: u64,
    pub empty_captures: u64,
    pub rejected: u64,
}

/// Samples the frame source on a fixed cadence and forwards frames to the
/// channel when it has room, dropping them otherwise.
pub struct FramePacer {
    source: Box<dyn FrameSource>,
    ticker: Interval,
    stats: PacerStats,
}

impl FramePacer {
    /// Must be called inside a tokio runtime. The first tick fires one
    /// period after creation.
    pub fn new(source: Box<dyn FrameSource>, period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        // A late tick pushes the schedule back; missed ticks are never
        // replayed in a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            source,
            ticker,
            stats: PacerStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.ticker.period()
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    /// Resolves at the next tick deadline.
    pub async fn next_tick(&mut self) {
        self.ticker.tick().await;
    }

    /// One tick: check capacity, capture, hand over. Never waits on the
    /// channel.
    pub fn tick(&mut self, channel: &mut TransportChannel) -> TickOutcome {
        self.stats.ticks += 1;

        match channel.readiness() {
            Ok(()) => {}
            Err(SendRejected::Busy) => {
                self.stats.dropped_busy += 1;
                trace!(target = "caretaker::pacer", "frame dropped: send in flight");
                return TickOutcome::DroppedBusy;
            }
            Err(_) => {
                self.stats.dropped_not_connected += 1;
                return TickOutcome::DroppedNotConnected;
            }
        }

        let Some(frame) = self.source.capture() else {
            self.stats.empty_captures += 1;
            return TickOutcome::NoFrame;
        };

        match channel.try_send(frame) {
            Ok(()) => {
                self.stats.sent += 1;
                TickOutcome::Sent
            }
            Err(rejected) => {
                self.stats.rejected += 1;
                trace!(
                    target = "caretaker::pacer",
                    error = %rejected,
                    "frame dropped"
                );
                TickOutcome::Rejected(rejected)
            }
        }
    }

    /// Releases the frame source. The pacer is consumed, so no further tick
    /// can fire.
    pub fn stop(self) -> PacerStats {
        self.stats
    }
}
