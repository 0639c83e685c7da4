//! Vehicle counting on top of a detector

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::{DetectedObject, Detector};
use crate::roi::Roi;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Detector plus the filters that decide what counts as a vehicle in the ROI
pub struct DetectionPipeline {
    detector: Arc<dyn Detector>,
    allowed_classes: HashSet<String>,
    confidence: f32,
}

impl DetectionPipeline {
    pub fn new(detector: Arc<dyn Detector>, config: &VisionConfig) -> Self {
        Self {
            detector,
            allowed_classes: config.allowed_classes.iter().cloned().collect(),
            confidence: config.confidence,
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Run the detector and keep allowed classes above the threshold
    pub fn detect(
        &self,
        frame: &Frame,
        roi: Option<&Roi>,
        confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let detections = self.detector.detect(frame, roi, confidence)?;
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence > confidence && self.allowed_classes.contains(&d.class_name))
            .collect())
    }

    /// Number of vehicles whose box touches the ROI, at the default threshold.
    /// Without a ROI the whole frame counts.
    pub fn count_in_roi(&self, frame: &Frame, roi: Option<&Roi>) -> Result<u32, VisionError> {
        self.count_with_confidence(frame, roi, self.confidence)
    }

    pub fn count_with_confidence(
        &self,
        frame: &Frame,
        roi: Option<&Roi>,
        confidence: f32,
    ) -> Result<u32, VisionError> {
        let vehicles = self.detect(frame, roi, confidence)?;
        let count = vehicles
            .iter()
            .filter(|d| roi.map_or(true, |roi| roi.intersects_box(&d.bbox)))
            .count() as u32;
        debug!(
            "Camera {}: {} vehicles detected, {} in ROI",
            frame.camera_id,
            vehicles.len(),
            count
        );
        Ok(count)
    }
}
