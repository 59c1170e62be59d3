use bytes::Bytes;
use monitor_proto::{decode_data_uri, AlertSignal, DataUriError, FallDetection, InboundMessage};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::state::{DetectionUpdate, FallStatus, Gait, OverlayImage, StateAggregator};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("payload is not a valid reply: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub rejected: u64,
    /// Replies whose overlay image could not be decoded. The rest of the
    /// reply was still applied.
    pub overlays_dropped: u64,
}

/// A decoded reply, ready to apply. The JSON is validated whole before any
/// facet reaches the aggregator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUpdate {
    pub overlay: Option<OverlayImage>,
    /// Set when `processed_image` was present but unusable.
    pub overlay_error: Option<DataUriError>,
    pub detection: DetectionUpdate,
    pub fall: Option<FallStatus>,
    /// `alert: "fall_detected"` without a fall facet alongside it.
    pub fall_alert: bool,
    pub gait: Option<Gait>,
}

impl ParsedUpdate {
    pub fn is_empty(&self) -> bool {
        self.overlay.is_none()
            && self.detection.is_empty()
            && self.fall.is_none()
            && !self.fall_alert
            && self.gait.is_none()
    }
}

/// Turns raw inbound payloads into per-facet aggregator updates.
#[derive(Debug, Default)]
pub struct MessageRouter {
    stats: RouterStats,
    /// The fall flag was last raised by a bare alert signal; the next reply
    /// without any fall signal lowers it again.
    alert_latched: bool,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn parse(payload: &[u8]) -> Result<ParsedUpdate, RouterError> {
        let message = InboundMessage::from_slice(payload)?;

        let decoded_overlay = message.processed_image.as_deref().map(decode_data_uri);
        let (overlay, overlay_error) = match decoded_overlay {
            Some(Ok(decoded)) => (
                Some(OverlayImage {
                    mime: decoded.mime,
                    data: Bytes::from(decoded.bytes),
                }),
                None,
            ),
            Some(Err(err)) => (None, Some(err)),
            None => (None, None),
        };

        let fall = match (message.fall_detection, message.fall_detected) {
            (Some(facet), _) => Some(FallStatus::from(facet)),
            (None, Some(detected)) => Some(FallStatus::from(FallDetection {
                fall_detected: detected,
                fall_confidence: message.confidence.unwrap_or_default(),
                reasons: Vec::new(),
            })),
            (None, None) => None,
        };

        let fall_alert = match message.alert {
            Some(AlertSignal::FallDetected) => fall.is_none(),
            Some(AlertSignal::Other(other)) => {
                debug!(target = "caretaker::router", alert = %other, "ignoring unknown alert signal");
                false
            }
            None => false,
        };

        Ok(ParsedUpdate {
            overlay,
            overlay_error,
            detection: DetectionUpdate {
                counts: message.detection_data,
                pose: message.pose_data,
            },
            fall,
            fall_alert,
            gait: message.gait_analysis.map(Gait::from),
        })
    }

    /// Decodes `payload` and applies each facet it carries. A payload that
    /// is not a JSON object reply is dropped whole and logged once; an
    /// unusable overlay only drops the overlay.
    pub fn route(&mut self, payload: &[u8], state: &mut StateAggregator) {
        let update = match Self::parse(payload) {
            Ok(update) => update,
            Err(err) => {
                self.stats.rejected += 1;
                warn!(
                    target = "caretaker::router",
                    error = %err,
                    len = payload.len(),
                    "dropping inbound payload"
                );
                return;
            }
        };
        self.stats.routed += 1;

        if let Some(err) = &update.overlay_error {
            self.stats.overlays_dropped += 1;
            warn!(
                target = "caretaker::router",
                error = %err,
                "skipping undecodable overlay image"
            );
        }

        if update.is_empty() {
            trace!(target = "caretaker::router", "reply carried no known facets");
        }

        if let Some(overlay) = update.overlay {
            state.set_overlay(overlay);
        }
        state.set_detection(update.detection);
        if let Some(fall) = update.fall {
            self.alert_latched = false;
            state.set_fall_status(fall);
        } else if update.fall_alert {
            self.alert_latched = true;
            let last = state.fall_status();
            state.set_fall_status(FallStatus {
                detected: true,
                ..last
            });
        } else if self.alert_latched {
            // Bare alerts have no explicit "over" message; silence ends them.
            self.alert_latched = false;
            let last = state.fall_status();
            state.set_fall_status(FallStatus {
                detected: false,
                ..last
            });
        }
        if let Some(gait) = update.gait {
            state.set_gait(gait);
        }
    }
}
