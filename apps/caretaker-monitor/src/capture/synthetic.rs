use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::time::SystemTime;
use tracing::warn;

use super::{Frame, FrameSource, SourceError};

const DEFAULT_QUALITY: u8 = 80;

/// Renders a moving test pattern and encodes it as JPEG. Useful when no
/// camera is attached: the service still gets a steady stream of decodable
/// frames.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    quality: u8,
    frame_number: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Result<Self, SourceError> {
        if width == 0 || height == 0 {
            return Err(SourceError::InvalidSize { width, height });
        }
        Ok(Self {
            width,
            height,
            quality: DEFAULT_QUALITY,
            frame_number: 0,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    fn render(&self) -> RgbImage {
        // A vertical bar sweeps across a gradient, one column step per frame.
        let bar_width = (self.width / 16).max(1);
        let bar_x = ((self.frame_number * 8) % u64::from(self.width)) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= bar_x && x < bar_x.saturating_add(bar_width) {
                Rgb([255, 255, 255])
            } else {
                let r = (x * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                Rgb([r, g, 96])
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Option<Frame> {
        let image = self.render();
        self.frame_number = self.frame_number.wrapping_add(1);

        let mut buffer = Vec::new();
        if let Err(err) = JpegEncoder::new_with_quality(&mut buffer, self.quality).encode_image(&image) {
            warn!(
                target = "caretaker::capture",
                error = %err,
                "synthetic frame encode failed"
            );
            return None;
        }
        Some(Frame {
            data: buffer.into(),
            mime: "image/jpeg",
            captured_at: SystemTime::now(),
        })
    }
}
