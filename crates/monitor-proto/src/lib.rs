//! Wire messages exchanged between the caretaker monitor and the remote
//! inference service. Kept in a dedicated crate so a service implementation
//! (or a test double) can share the exact shapes without pulling in the
//! client runtime.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// One sampled frame, sent at most once per pacing tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// `data:<mime>;base64,<payload>` URI.
    pub image: String,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

impl OutboundFrame {
    pub fn new(mime: &str, bytes: &[u8], timestamp: i64) -> Self {
        Self {
            image: encode_data_uri(mime, bytes),
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A reply from the inference service. Any subset of keys may be present.
///
/// The flat `fall_detected` / `confidence` / `timestamp` keys are the reply
/// shape of the first-generation backend, which only ran the fall detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_data: Option<DetectionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_data: Option<PoseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fall_detection: Option<FallDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gait_analysis: Option<GaitAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fall_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    /// Parses a reply. Only a JSON object is accepted; serde would otherwise
    /// read an array positionally into the struct fields.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "inbound reply must be a JSON object",
            ));
        }
        serde_json::from_value(value)
    }

    /// True when the message carries nothing the client knows how to apply.
    pub fn is_empty(&self) -> bool {
        self.processed_image.is_none()
            && self.detection_data.is_none()
            && self.pose_data.is_none()
            && self.fall_detection.is_none()
            && self.gait_analysis.is_none()
            && self.alert.is_none()
            && self.fall_detected.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionData {
    pub num_people: u32,
    pub pose_detected: bool,
    pub keypoints_detected: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseData {
    pub detected: bool,
    pub landmarks: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallDetection {
    pub fall_detected: bool,
    pub fall_confidence: f32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitAnalysis {
    pub risk_level: Option<RiskLevel>,
    pub instability_score: f32,
    pub step_width_var: f32,
    pub com_sway: f32,
}

/// Risk bucket assigned by the service. The client never interprets the
/// boundaries; values it does not recognise are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Other(String),
}

impl RiskLevel {
    pub fn as_str(&self) -> &str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Other(other) => other.as_str(),
        }
    }
}

impl From<String> for RiskLevel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            _ => RiskLevel::Other(value),
        }
    }
}

impl From<RiskLevel> for String {
    fn from(value: RiskLevel) -> Self {
        match value {
            RiskLevel::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertSignal {
    FallDetected,
    Other(String),
}

impl From<String> for AlertSignal {
    fn from(value: String) -> Self {
        if value == "fall_detected" {
            AlertSignal::FallDetected
        } else {
            AlertSignal::Other(value)
        }
    }
}

impl From<AlertSignal> for String {
    fn from(value: AlertSignal) -> Self {
        match value {
            AlertSignal::FallDetected => "fall_detected".to_string(),
            AlertSignal::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataUriError {
    #[error("data uri has no payload separator")]
    MissingSeparator,
    #[error("data uri payload is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("data uri payload is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDataUri {
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Decodes a base64 data URI. A bare base64 payload without the `data:`
/// header is accepted as well; its mime type is then unknown.
pub fn decode_data_uri(uri: &str) -> Result<DecodedDataUri, DataUriError> {
    let uri = uri.trim();
    let (mime, payload) = match uri.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingSeparator)?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or(DataUriError::NotBase64)?;
            let mime = (!mime.is_empty()).then(|| mime.to_string());
            (mime, payload)
        }
        None => (None, uri),
    };
    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Err(DataUriError::Empty);
    }
    Ok(DecodedDataUri { mime, bytes })
}
