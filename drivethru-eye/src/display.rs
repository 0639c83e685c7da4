//! MJPEG encoding for the live display

use crate::error::VisionError;
use crate::frame::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::ColorType;

/// Multipart boundary of the MJPEG response
pub const BOUNDARY: &str = "frame";

/// Encodes frames as parts of a `multipart/x-mixed-replace` stream
#[derive(Debug, Clone)]
pub struct MjpegEncoder {
    width: u32,
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(width: u32, quality: u8) -> Self {
        Self {
            width: width.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
    }

    /// Resize to the display width, keeping the aspect ratio
    pub fn display_size(&self, width: u32, height: u32) -> (u32, u32) {
        if width == 0 {
            return (self.width, height);
        }
        let scaled = (height as u64 * self.width as u64 + width as u64 / 2) / width as u64;
        (self.width, (scaled as u32).max(1))
    }

    pub fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, VisionError> {
        let image = frame.to_image()?;
        let (w, h) = self.display_size(frame.width, frame.height);
        let image = if (w, h) == image.dimensions() {
            image
        } else {
            imageops::resize(&image, w, h, FilterType::Triangle)
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            image.as_raw(),
            w,
            h,
            ColorType::Rgb8,
        )?;
        Ok(jpeg)
    }

    /// One complete multipart part: boundary, headers and JPEG body
    pub fn encode_part(&self, frame: &Frame) -> Result<Bytes, VisionError> {
        let jpeg = self.encode_jpeg(frame)?;
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            jpeg.len()
        );
        let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
        part.put_slice(header.as_bytes());
        part.put_slice(&jpeg);
        part.put_slice(b"\r\n");
        Ok(part.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use drivethru_core::CameraId;

    #[test]
    fn test_display_size_keeps_aspect() {
        let encoder = MjpegEncoder::new(800, 80);
        assert_eq!(encoder.display_size(1600, 900), (800, 450));
        assert_eq!(encoder.display_size(640, 480), (800, 600));
    }

    #[test]
    fn test_encode_part() {
        let encoder = MjpegEncoder::new(16, 80);
        let frame = Frame::from_raw(CameraId::from("MENU"), 1, RawFrame::filled(32, 16, [200, 10, 10]));
        let part = encoder.encode_part(&frame).unwrap();

        let text = String::from_utf8_lossy(&part[..60]);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(part.ends_with(b"\r\n"));

        let jpeg = encoder.encode_jpeg(&frame).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            MjpegEncoder::content_type(),
            "multipart/x-mixed-replace; boundary=frame"
        );
    }
}
