//! Console presentation: turns consecutive snapshots into the handful of
//! changes an operator cares about.

use monitor_proto::RiskLevel;
use time::macros::format_description;
use tracing::{info, warn};

use crate::state::{AlertRecord, MonitorSnapshot};
use crate::transport::ConnectionState;

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotChange {
    Connection(ConnectionState),
    AlertRecorded(AlertRecord),
    BannerRaised,
    BannerCleared,
    RiskLevel(Option<RiskLevel>),
    PeopleInView(u32),
}

pub fn diff(prev: &MonitorSnapshot, next: &MonitorSnapshot) -> Vec<SnapshotChange> {
    let mut changes = Vec::new();
    if prev.connection != next.connection {
        changes.push(SnapshotChange::Connection(next.connection));
    }
    if let Some(latest) = next.alert_history.latest() {
        if prev.alert_history.latest() != Some(latest) {
            changes.push(SnapshotChange::AlertRecorded(latest.clone()));
        }
    }
    match (prev.alert_active, next.alert_active) {
        (false, true) => changes.push(SnapshotChange::BannerRaised),
        (true, false) => changes.push(SnapshotChange::BannerCleared),
        _ => {}
    }
    if prev.gait.risk_level != next.gait.risk_level {
        changes.push(SnapshotChange::RiskLevel(next.gait.risk_level.clone()));
    }
    if prev.detection.num_people != next.detection.num_people {
        changes.push(SnapshotChange::PeopleInView(next.detection.num_people));
    }
    changes
}

pub fn log_change(change: &SnapshotChange) {
    match change {
        SnapshotChange::Connection(state) => {
            info!(target = "caretaker::presenter", state = %state, "connection");
        }
        SnapshotChange::AlertRecorded(record) => {
            let at = record
                .at
                .format(format_description!("[hour]:[minute]:[second]"))
                .unwrap_or_else(|_| record.at.to_string());
            warn!(
                target = "caretaker::presenter",
                at = %at,
                confidence = record.confidence,
                reasons = %record.reasons.join(", "),
                "FALL ALERT"
            );
        }
        SnapshotChange::BannerRaised => {
            warn!(target = "caretaker::presenter", "alert banner raised");
        }
        SnapshotChange::BannerCleared => {
            info!(target = "caretaker::presenter", "alert banner cleared");
        }
        SnapshotChange::RiskLevel(level) => {
            let level = level.as_ref().map(RiskLevel::as_str).unwrap_or("unknown");
            info!(target = "caretaker::presenter", risk = level, "gait risk");
        }
        SnapshotChange::PeopleInView(count) => {
            info!(target = "caretaker::presenter", people = count, "people in view");
        }
    }
}
