//! Configuration for drivethru-eye

use drivethru_core::{CameraId, Point};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Detector backend, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// Darknet/YOLO-style model run on the CPU or GPU
    Classic,
    /// SSD-style quantized model built for an edge accelerator
    Edge,
}

/// Detector model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,
    /// Model file handed to the inference runtime
    pub model_path: PathBuf,
    /// Network input size (width, height)
    pub input_size: (u32, u32),
    /// IoU threshold for non-maximum suppression
    pub nms_threshold: f32,
    /// Class labels indexed by class id; COCO when absent
    pub labels: Option<Vec<String>>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Classic,
            model_path: PathBuf::from("models/yolov3.onnx"),
            input_size: (416, 416),
            nms_threshold: 0.3,
            labels: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_size.0 == 0 || self.input_size.1 == 0 {
            return Err("Detector input size must be non-zero".to_string());
        }
        if self.input_size.0 > 4096 || self.input_size.1 > 4096 {
            return Err("Detector input size too large (max 4096)".to_string());
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err("nms_threshold must be between 0.0 and 1.0".to_string());
        }
        if let Some(labels) = &self.labels {
            if labels.is_empty() {
                return Err("labels must not be empty when provided".to_string());
            }
        }
        Ok(())
    }
}

/// Vision pipeline configuration shared by every camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub detector: DetectorConfig,
    /// Minimum detector score for a detection to count
    pub confidence: f32,
    /// Class labels that count as vehicles
    pub allowed_classes: Vec<String>,
    /// Debounce window size (consecutive agreeing passes)
    pub min_frames: usize,
    /// Delay between capture reads
    pub capture_interval_ms: u64,
    /// Upper bound for one detection pass
    pub detection_timeout_ms: u64,
    /// Backoff ceiling after failed reads
    pub max_backoff_ms: u64,
    /// Failed reads in a row before a camera is reported unavailable
    pub max_consecutive_failures: u32,
    /// Width frames are scaled to for display
    pub display_width: u32,
    pub jpeg_quality: u8,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            confidence: 0.25,
            allowed_classes: ["car", "truck", "bus", "motorcycle"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_frames: 3,
            capture_interval_ms: 100,
            detection_timeout_ms: 2_000,
            max_backoff_ms: 5_000,
            max_consecutive_failures: 10,
            display_width: 800,
            jpeg_quality: 80,
        }
    }
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.detector.validate()?;

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err("confidence must be between 0.0 and 1.0".to_string());
        }

        if self.allowed_classes.is_empty() {
            return Err("allowed_classes must name at least one class".to_string());
        }

        if self.min_frames < 1 {
            return Err("min_frames must be at least 1".to_string());
        }

        if self.capture_interval_ms == 0 {
            return Err("capture_interval_ms must be non-zero".to_string());
        }

        if self.detection_timeout_ms == 0 {
            return Err("detection_timeout_ms must be non-zero".to_string());
        }

        if self.max_backoff_ms < 100 {
            return Err("max_backoff_ms must be at least 100".to_string());
        }

        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be at least 1".to_string());
        }

        if self.display_width == 0 || self.display_width > 7680 {
            return Err("display_width must be between 1 and 7680".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Where a camera's frames come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Local capture device by index
    Device { index: u32 },
    /// Network stream (RTSP/HTTP) or video file path
    Url { url: String },
    /// Directory of still images replayed in name order
    Directory { path: PathBuf },
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Device { index } => write!(f, "device:{}", index),
            SourceSpec::Url { url } => write!(f, "{}", url),
            SourceSpec::Directory { path } => write!(f, "dir:{}", path.display()),
        }
    }
}

/// One camera watching one station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub source: SourceSpec,
    /// Region of interest polygon
    #[serde(default)]
    pub roi: Option<Vec<Point>>,
    /// Size of the canvas the ROI was drawn on, when it differs from the frame
    #[serde(default)]
    pub roi_space: Option<(u32, u32)>,
    /// Per-camera override of the debounce window
    #[serde(default)]
    pub min_frames: Option<usize>,
    /// Per-camera override of the confidence threshold
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl CameraSpec {
    pub fn new(name: impl Into<String>, source: SourceSpec) -> Self {
        Self {
            name: name.into(),
            source,
            roi: None,
            roi_space: None,
            min_frames: None,
            confidence: None,
        }
    }

    pub fn id(&self) -> CameraId {
        CameraId::new(self.name.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Camera name must not be empty".to_string());
        }
        if let Some(min_frames) = self.min_frames {
            if min_frames < 1 {
                return Err(format!("Camera {}: min_frames must be at least 1", self.name));
            }
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!(
                    "Camera {}: confidence must be between 0.0 and 1.0",
                    self.name
                ));
            }
        }
        if let Some((w, h)) = self.roi_space {
            if w == 0 || h == 0 {
                return Err(format!("Camera {}: roi_space must be non-zero", self.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = VisionConfig::default();
        assert_eq!(config.min_frames, 3);
        assert_eq!(config.detector.backend, DetectorBackend::Classic);
        assert_eq!(config.detector.input_size, (416, 416));
        assert!(config.allowed_classes.contains(&"truck".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_min_frames_zero() {
        let config = VisionConfig {
            min_frames: 0,
            ..VisionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_confidence_range() {
        let mut config = VisionConfig::default();
        config.confidence = 1.5;
        assert!(config.validate().is_err());

        config.confidence = -0.1;
        assert!(config.validate().is_err());

        config.confidence = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_display() {
        let mut config = VisionConfig::default();
        config.display_width = 0;
        assert!(config.validate().is_err());

        config.display_width = 800;
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_config_validation() {
        let mut detector = DetectorConfig::default();
        detector.input_size = (0, 416);
        assert!(detector.validate().is_err());

        detector.input_size = (300, 300);
        detector.labels = Some(vec![]);
        assert!(detector.validate().is_err());
    }

    #[test]
    fn test_camera_spec_validation() {
        let mut spec = CameraSpec::new("MENU", SourceSpec::Device { index: 0 });
        assert!(spec.validate().is_ok());

        spec.min_frames = Some(0);
        assert!(spec.validate().is_err());

        spec.min_frames = Some(2);
        spec.roi_space = Some((0, 600));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_source_spec_serde() {
        let spec: SourceSpec =
            serde_json::from_str(r#"{"kind": "url", "url": "rtsp://cam/1"}"#).unwrap();
        assert_eq!(
            spec,
            SourceSpec::Url {
                url: "rtsp://cam/1".to_string()
            }
        );
        assert_eq!(spec.to_string(), "rtsp://cam/1");
    }

    #[test]
    fn test_camera_spec_deserializes_roi() {
        let spec: CameraSpec = serde_json::from_str(
            r#"{
                "name": "PAY",
                "source": {"kind": "device", "index": 1},
                "roi": [{"x": 0, "y": 0}, {"x": 10, "y": 0}, {"x": 10, "y": 10}]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.id().as_str(), "PAY");
        assert_eq!(spec.roi.as_ref().map(|r| r.len()), Some(3));
        assert!(spec.min_frames.is_none());
    }
}
