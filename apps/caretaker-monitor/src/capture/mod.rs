//! Frame acquisition. A [`FrameSource`] stands in for the camera device and
//! hands out encoded stills on demand.

use bytes::Bytes;
use monitor_proto::OutboundFrame;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

mod still;
mod synthetic;

pub use still::StillImageSource;
pub use synthetic::SyntheticSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("frame directory {path} is not readable: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
    #[error("frame directory {0} contains no jpeg or png stills")]
    NoStills(String),
    #[error("invalid synthetic frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// An encoded still plus the wall-clock time it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub mime: &'static str,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn jpeg(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            mime: "image/jpeg",
            captured_at: SystemTime::now(),
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    /// Consumes the frame into its wire form.
    pub fn into_outbound(self) -> OutboundFrame {
        let timestamp = self.timestamp_ms();
        OutboundFrame::new(self.mime, &self.data, timestamp)
    }
}

/// Produces frames on demand. `None` means the device had nothing to offer
/// at call time (not ready, empty read); it is not an error.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Option<Frame>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<Frame> + Send,
{
    fn capture(&mut self) -> Option<Frame> {
        (self)()
    }
}

pub(crate) fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
