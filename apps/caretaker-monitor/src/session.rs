//! One monitoring session: frame source, channel, router and aggregator
//! owned by a single task that is the only place state changes.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::config::MonitorConfig;
use crate::pacer::{FramePacer, PacerStats};
use crate::router::{MessageRouter, RouterStats};
use crate::state::{MonitorSnapshot, StateAggregator};
use crate::transport::{Dialer, StampedEvent, TransportChannel};

/// Counters gathered over the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub pacer: PacerStats,
    pub router: RouterStats,
    pub reconnect_attempts: u64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task ended abnormally: {0}")]
    Join(#[from] JoinError),
}

pub struct MonitoringSession {
    pacer: FramePacer,
    channel: TransportChannel,
    events: mpsc::UnboundedReceiver<StampedEvent>,
    router: MessageRouter,
    state: StateAggregator,
}

impl MonitoringSession {
    /// Spawns the session loop and starts connecting. Must be called from
    /// within a tokio runtime.
    pub fn start(
        config: &MonitorConfig,
        source: Box<dyn FrameSource>,
        dialer: Arc<dyn Dialer>,
    ) -> SessionHandle {
        let state = StateAggregator::new(config.alert_history_capacity, config.alert_hold);
        let snapshots = state.subscribe();
        let (channel, events) =
            TransportChannel::new(config.endpoint.clone(), config.reconnect_delay, dialer);

        let session = Self {
            pacer: FramePacer::new(source, config.frame_interval),
            channel,
            events,
            router: MessageRouter::new(),
            state,
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(stop_rx));
        SessionHandle {
            snapshots,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) -> SessionReport {
        if let Err(err) = self.channel.connect() {
            warn!(target = "caretaker::session", error = %err, "initial connect refused");
        }
        self.sync_connection();

        loop {
            let reconnect_at = self.channel.reconnect_deadline();
            let alert_at = self.state.alert_deadline();

            tokio::select! {
                biased;
                _ = &mut stop => break,
                Some(event) = self.events.recv() => {
                    if let Some(payload) = self.channel.handle_event(event) {
                        self.router.route(&payload, &mut self.state);
                    }
                    self.sync_connection();
                }
                _ = sleep_until_opt(reconnect_at) => {
                    self.channel.on_reconnect_due();
                    self.sync_connection();
                }
                _ = sleep_until_opt(alert_at) => {
                    self.state.expire_alert(Instant::now());
                }
                _ = self.pacer.next_tick() => {
                    self.pacer.tick(&mut self.channel);
                    self.sync_connection();
                }
            }
        }

        self.teardown()
    }

    fn sync_connection(&mut self) {
        self.state.set_connection_state(self.channel.state());
    }

    /// Pacer first, then the alert expiry, then the channel (which drops
    /// its reconnect deadline before closing the link).
    fn teardown(self) -> SessionReport {
        let Self {
            pacer,
            mut channel,
            events,
            router,
            mut state,
        } = self;

        let pacer_stats = pacer.stop();
        state.cancel_alert_timer();
        channel.disconnect();
        drop(events);
        state.close();

        let report = SessionReport {
            pacer: pacer_stats,
            router: router.stats(),
            reconnect_attempts: channel.reconnect_attempts(),
        };
        info!(
            target = "caretaker::session",
            sent = report.pacer.sent,
            dropped_busy = report.pacer.dropped_busy,
            rejected_payloads = report.router.rejected,
            reconnects = report.reconnect_attempts,
            "session stopped"
        );
        report
    }
}

/// Caller's side of a running session. Dropping it aborts the session task,
/// which releases the frame source and the link.
pub struct SessionHandle {
    snapshots: watch::Receiver<MonitorSnapshot>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SessionReport>>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Requests teardown and waits for it. No facet update is applied after
    /// the loop observes the request.
    pub async fn stop(mut self) -> Result<SessionReport, SessionError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => Ok(task.await?),
            None => Ok(SessionReport::default()),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(target = "caretaker::session", "session handle dropped; aborting");
            task.abort();
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
