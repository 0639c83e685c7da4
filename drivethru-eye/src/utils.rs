//! Utility functions for vision processing

use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::DetectedObject;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Resize a frame to the network input size
pub fn resize_frame(frame: &Frame, width: u32, height: u32) -> Result<RgbImage, VisionError> {
    if width == 0 || height == 0 {
        return Err(VisionError::Processing("Target dimensions cannot be zero".to_string()));
    }
    let image = frame.to_image()?;
    if image.dimensions() == (width, height) {
        return Ok(image);
    }
    Ok(imageops::resize(&image, width, height, FilterType::Triangle))
}

/// Packed RGB8 to planar float in `[0, 1]`, layout `[3, H, W]`
pub fn rgb_to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            out[c * plane + idx] = pixel.0[c] as f32 / 255.0;
        }
    }
    out
}

/// Class-wise non-maximum suppression.
///
/// Within each class, detections are visited by descending confidence and any
/// detection overlapping a kept one by more than `iou_threshold` is dropped.
pub fn non_max_suppression(
    detections: Vec<DetectedObject>,
    iou_threshold: f32,
) -> Vec<DetectedObject> {
    let mut by_class: BTreeMap<usize, Vec<DetectedObject>> = BTreeMap::new();
    for detection in detections {
        if detection.confidence.is_finite() {
            by_class.entry(detection.class_id).or_default().push(detection);
        }
    }

    let mut keep = Vec::new();
    for (_, mut group) in by_class {
        group.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut kept: Vec<DetectedObject> = Vec::new();
        for candidate in group {
            if kept
                .iter()
                .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
            {
                kept.push(candidate);
            }
        }
        keep.extend(kept);
    }

    keep.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    keep
}
