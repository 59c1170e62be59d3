//! Session-wide derived state.
//!
//! [`StateAggregator`] is the only writer. Readers hold a
//! `watch::Receiver<MonitorSnapshot>` and are woken on every change; they
//! never mutate anything.
//!
//! The alert banner (`alert_active`) is driven by a single expiry deadline
//! owned here. A fall edge raises the banner and (re)arms the deadline;
//! the session loop sleeps until [`StateAggregator::alert_deadline`] and
//! then calls [`StateAggregator::expire_alert`]. The instantaneous fall
//! signal going back to false does not lower the banner.

use bytes::Bytes;
use monitor_proto::{DetectionData, FallDetection, GaitAnalysis, PoseData, RiskLevel};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

mod history;

pub use history::{AlertHistory, AlertRecord};

use crate::transport::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayImage {
    pub mime: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub num_people: u32,
    pub pose_detected: bool,
    pub keypoints_detected: u32,
    pub landmarks: u32,
    pub confidence: f32,
}

/// The detection facet arrives split over two wire keys; either half may be
/// missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionUpdate {
    pub counts: Option<DetectionData>,
    pub pose: Option<PoseData>,
}

impl DetectionUpdate {
    pub fn is_empty(&self) -> bool {
        self.counts.is_none() && self.pose.is_none()
    }
}

impl Detection {
    fn apply(&mut self, update: DetectionUpdate) {
        if let Some(counts) = update.counts {
            self.num_people = counts.num_people;
            self.pose_detected = counts.pose_detected;
            self.keypoints_detected = counts.keypoints_detected;
        }
        if let Some(pose) = update.pose {
            self.pose_detected = pose.detected;
            self.landmarks = pose.landmarks;
            self.confidence = pose.confidence;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallStatus {
    pub detected: bool,
    pub confidence: f32,
    pub reasons: Vec<String>,
}

impl From<FallDetection> for FallStatus {
    fn from(value: FallDetection) -> Self {
        Self {
            detected: value.fall_detected,
            confidence: value.fall_confidence,
            reasons: value.reasons,
        }
    }
}

/// `risk_level == None` means the service has not classified gait yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gait {
    pub risk_level: Option<RiskLevel>,
    pub instability_score: f32,
    pub step_width_var: f32,
    pub com_sway: f32,
}

impl From<GaitAnalysis> for Gait {
    fn from(value: GaitAnalysis) -> Self {
        Self {
            risk_level: value.risk_level,
            instability_score: value.instability_score,
            step_width_var: value.step_width_var,
            com_sway: value.com_sway,
        }
    }
}

/// Read-only view handed to presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub connection: ConnectionState,
    pub overlay: Option<OverlayImage>,
    pub detection: Detection,
    pub fall_status: FallStatus,
    pub gait: Gait,
    pub alert_history: AlertHistory,
    pub alert_active: bool,
}

impl MonitorSnapshot {
    pub fn new(alert_history_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            overlay: None,
            detection: Detection::default(),
            fall_status: FallStatus::default(),
            gait: Gait::default(),
            alert_history: AlertHistory::with_capacity(alert_history_capacity),
            alert_active: false,
        }
    }
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ALERT_HISTORY_CAPACITY)
    }
}

pub struct StateAggregator {
    tx: watch::Sender<MonitorSnapshot>,
    alert_hold: Duration,
    alert_deadline: Option<Instant>,
    last_fall_detected: bool,
    closed: bool,
}

impl StateAggregator {
    pub fn new(alert_history_capacity: usize, alert_hold: Duration) -> Self {
        let (tx, _rx) = watch::channel(MonitorSnapshot::new(alert_history_capacity));
        Self {
            tx,
            alert_hold,
            alert_deadline: None,
            last_fall_detected: false,
            closed: false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.tx.borrow().clone()
    }

    pub fn fall_status(&self) -> FallStatus {
        self.tx.borrow().fall_status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if self.closed {
            return;
        }
        self.tx.send_if_modified(|snap| {
            if snap.connection == state {
                return false;
            }
            snap.connection = state;
            true
        });
    }

    pub fn set_overlay(&mut self, overlay: OverlayImage) {
        if self.closed {
            return;
        }
        self.tx.send_if_modified(|snap| {
            if snap.overlay.as_ref() == Some(&overlay) {
                return false;
            }
            snap.overlay = Some(overlay);
            true
        });
    }

    pub fn set_detection(&mut self, update: DetectionUpdate) {
        if self.closed || update.is_empty() {
            return;
        }
        self.tx.send_if_modified(|snap| {
            let before = snap.detection.clone();
            snap.detection.apply(update);
            snap.detection != before
        });
    }

    /// Updates the fall facet. A false→true edge appends an alert record,
    /// raises the banner and re-arms the single expiry deadline.
    pub fn set_fall_status(&mut self, status: FallStatus) {
        if self.closed {
            return;
        }
        let rising = status.detected && !self.last_fall_detected;
        self.last_fall_detected = status.detected;

        let record = rising.then(|| AlertRecord::now(status.confidence, status.reasons.clone()));
        if rising {
            self.arm_alert_timer();
            info!(
                target = "caretaker::state",
                confidence = status.confidence,
                reasons = ?status.reasons,
                "fall detected"
            );
        }

        self.tx.send_if_modified(|snap| {
            let mut changed = snap.fall_status != status;
            snap.fall_status = status;
            if let Some(record) = record {
                snap.alert_history.push(record);
                snap.alert_active = true;
                changed = true;
            }
            changed
        });
    }

    pub fn set_gait(&mut self, gait: Gait) {
        if self.closed {
            return;
        }
        self.tx.send_if_modified(|snap| {
            if snap.gait == gait {
                return false;
            }
            snap.gait = gait;
            true
        });
    }

    fn arm_alert_timer(&mut self) {
        if self.alert_deadline.is_some() {
            debug!(target = "caretaker::state", "replacing pending alert expiry");
        }
        self.alert_deadline = Some(Instant::now() + self.alert_hold);
    }

    /// Deadline of the pending banner expiry, if armed.
    pub fn alert_deadline(&self) -> Option<Instant> {
        self.alert_deadline
    }

    pub fn pending_alert_timers(&self) -> usize {
        usize::from(self.alert_deadline.is_some())
    }

    /// Lowers the banner if the deadline has passed at `now`. Returns
    /// whether it fired.
    pub fn expire_alert(&mut self, now: Instant) -> bool {
        match self.alert_deadline {
            Some(deadline) if deadline <= now => {
                self.alert_deadline = None;
                self.tx.send_if_modified(|snap| {
                    let was_active = snap.alert_active;
                    snap.alert_active = false;
                    was_active
                });
                debug!(target = "caretaker::state", "alert banner expired");
                true
            }
            _ => false,
        }
    }

    pub fn cancel_alert_timer(&mut self) {
        self.alert_deadline = None;
    }

    /// Ends the session: the expiry is cancelled, the banner lowered, the
    /// connection shown as disconnected, and every later update ignored.
    pub fn close(&mut self) {
        self.cancel_alert_timer();
        self.tx.send_if_modified(|snap| {
            let changed = snap.alert_active || snap.connection != ConnectionState::Disconnected;
            snap.alert_active = false;
            snap.connection = ConnectionState::Disconnected;
            changed
        });
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> StateAggregator {
        StateAggregator::new(5, Duration::from_millis(10_000))
    }

    fn fall(detected: bool, confidence: f32) -> FallStatus {
        FallStatus {
            detected,
            confidence,
            reasons: vec!["sudden drop".into()],
        }
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn repeated_true_adds_a_single_record() {
        let mut state = aggregator();
        state.set_fall_status(fall(true, 0.87));
        tokio::time::advance(Duration::from_millis(200)).await;
        state.set_fall_status(fall(true, 0.87));

        let snap = state.snapshot();
        assert_eq!(snap.alert_history.len(), 1);
        assert!(snap.alert_active);
        assert_eq!(snap.alert_history.latest().unwrap().reasons, vec!["sudden drop"]);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn each_rising_edge_is_recorded() {
        let mut state = aggregator();
        for _ in 0..3 {
            state.set_fall_status(fall(true, 0.9));
            state.set_fall_status(fall(false, 0.1));
        }
        assert_eq!(state.snapshot().alert_history.len(), 3);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn history_is_capped_and_keeps_order() {
        let mut state = aggregator();
        for i in 0..6 {
            state.set_fall_status(fall(true, i as f32 / 10.0));
            state.set_fall_status(fall(false, 0.0));
        }
        let snap = state.snapshot();
        let confidences: Vec<f32> = snap.alert_history.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn banner_outlives_the_sensor_signal() {
        let mut state = aggregator();
        let raised_at = Instant::now();
        state.set_fall_status(fall(true, 0.9));
        state.set_fall_status(fall(false, 0.0));
        assert!(state.snapshot().alert_active);
        assert!(!state.snapshot().fall_status.detected);

        assert!(!state.expire_alert(raised_at + Duration::from_millis(9_999)));
        assert!(state.snapshot().alert_active);
        assert!(state.expire_alert(raised_at + Duration::from_millis(10_000)));
        assert!(!state.snapshot().alert_active);
        assert_eq!(state.pending_alert_timers(), 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn second_edge_rearms_instead_of_stacking() {
        let mut state = aggregator();
        let first = Instant::now();
        state.set_fall_status(fall(true, 0.9));
        state.set_fall_status(fall(false, 0.0));

        tokio::time::advance(Duration::from_millis(6_000)).await;
        state.set_fall_status(fall(true, 0.95));
        assert_eq!(state.pending_alert_timers(), 1);
        assert_eq!(
            state.alert_deadline(),
            Some(first + Duration::from_millis(16_000))
        );

        // The first edge's deadline passing must not lower the banner.
        assert!(!state.expire_alert(first + Duration::from_millis(10_000)));
        assert!(state.snapshot().alert_active);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn partial_updates_leave_other_facets_alone() {
        let mut state = aggregator();
        state.set_detection(DetectionUpdate {
            counts: Some(DetectionData {
                num_people: 1,
                pose_detected: true,
                keypoints_detected: 8,
            }),
            pose: None,
        });
        state.set_overlay(OverlayImage {
            mime: Some("image/jpeg".into()),
            data: Bytes::from_static(&[0xff, 0xd8]),
        });
        let before = state.snapshot();

        state.set_gait(Gait {
            risk_level: Some(RiskLevel::High),
            instability_score: 0.82,
            ..Gait::default()
        });

        let after = state.snapshot();
        assert_eq!(after.detection, before.detection);
        assert_eq!(after.overlay, before.overlay);
        assert_eq!(after.fall_status, before.fall_status);
        assert_eq!(after.gait.risk_level, Some(RiskLevel::High));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn pose_half_merges_into_detection() {
        let mut state = aggregator();
        state.set_detection(DetectionUpdate {
            counts: Some(DetectionData {
                num_people: 2,
                pose_detected: false,
                keypoints_detected: 12,
            }),
            pose: None,
        });
        state.set_detection(DetectionUpdate {
            counts: None,
            pose: Some(PoseData {
                detected: true,
                landmarks: 33,
                confidence: 0.7,
            }),
        });
        let detection = state.snapshot().detection;
        assert_eq!(detection.num_people, 2);
        assert_eq!(detection.keypoints_detected, 12);
        assert!(detection.pose_detected);
        assert_eq!(detection.landmarks, 33);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn subscribers_are_notified_only_on_change() {
        let mut state = aggregator();
        let mut rx = state.subscribe();
        rx.borrow_and_update();

        state.set_connection_state(ConnectionState::Connecting);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        state.set_connection_state(ConnectionState::Connecting);
        state.set_gait(Gait::default());
        assert!(!rx.has_changed().unwrap());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn close_freezes_state() {
        let mut state = aggregator();
        state.set_connection_state(ConnectionState::Connected);
        state.set_fall_status(fall(true, 0.9));
        state.close();

        let snap = state.snapshot();
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert!(!snap.alert_active);
        assert_eq!(state.pending_alert_timers(), 0);

        state.set_gait(Gait {
            instability_score: 0.5,
            ..Gait::default()
        });
        state.set_fall_status(fall(false, 0.0));
        state.set_fall_status(fall(true, 0.9));
        assert_eq!(state.snapshot(), snap);
    }
}
