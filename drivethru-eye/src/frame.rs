//! Captured frames

use crate::error::VisionError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use drivethru_core::CameraId;
use image::RgbImage;

/// Raw pixels produced by a frame source, before the capture worker stamps them
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, row-major
    pub data: Bytes,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, VisionError> {
        let data = data.into();
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|p| p.checked_mul(3))
            .ok_or_else(|| VisionError::Processing("Frame dimensions overflow".to_string()))?;
        if width == 0 || height == 0 {
            return Err(VisionError::Processing("Frame dimensions must be non-zero".to_string()));
        }
        if data.len() != expected {
            return Err(VisionError::Processing(format!(
                "Frame buffer holds {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Solid-colour frame
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data: Vec<u8> = std::iter::repeat(rgb)
            .take(width as usize * height as usize)
            .flatten()
            .collect();
        Self {
            width,
            height,
            data: Bytes::from(data),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: Bytes::from(image.into_raw()),
        }
    }
}

/// A frame as published to the buffer. Cloning is cheap: the pixel payload is
/// reference counted.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    /// Per-capture-session sequence number, starting at 1
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn from_raw(camera_id: CameraId, sequence: u64, raw: RawFrame) -> Self {
        Self {
            camera_id,
            sequence,
            captured_at: Utc::now(),
            width: raw.width,
            height: raw.height,
            data: raw.data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the pixels into an owned image
    pub fn to_image(&self) -> Result<RgbImage, VisionError> {
        RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or_else(|| VisionError::Processing("Frame buffer does not match dimensions".to_string()))
    }
}
