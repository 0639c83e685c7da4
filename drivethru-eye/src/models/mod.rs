//! Detector backends and the inference runtime seam

pub mod classic;
pub mod edge;
#[cfg(feature = "onnx")]
pub mod onnx;

use crate::config::{DetectorBackend, DetectorConfig};
use crate::error::VisionError;
use crate::frame::Frame;
use crate::roi::Roi;
use drivethru_core::BoundingBox;
use std::sync::Arc;
use tracing::info;

pub use classic::ClassicDetector;
pub use edge::EdgeDetector;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Detected object, in frame pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

/// Object detector capability.
///
/// Implementations are blocking and are called from the blocking pool.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Detect objects scoring above `confidence`. The ROI is a hint; callers
    /// still apply their own intersection test.
    fn detect(
        &self,
        frame: &Frame,
        roi: Option<&Roi>,
        confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Model input
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

/// Model output, always widened to f32
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }
}

/// Opaque inference runtime
pub trait InferenceEngine: Send + Sync {
    fn run(&self, input: &InputTensor) -> Result<Vec<OutputTensor>, VisionError>;
}

/// Label lookup shared by both backends
#[derive(Debug, Clone)]
pub(crate) struct Labels(Vec<String>);

impl Labels {
    pub(crate) fn from_config(labels: Option<&Vec<String>>) -> Self {
        match labels {
            Some(labels) => Self(labels.clone()),
            None => Self(COCO_CLASSES.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn name(&self, class_id: usize) -> String {
        self.0
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

/// Wrap an engine in the detector for the configured backend
pub fn detector_with_engine(
    config: &DetectorConfig,
    engine: Arc<dyn InferenceEngine>,
) -> Arc<dyn Detector> {
    match config.backend {
        DetectorBackend::Classic => Arc::new(ClassicDetector::new(engine, config)),
        DetectorBackend::Edge => Arc::new(EdgeDetector::new(engine, config)),
    }
}

/// Load the model and build the configured detector
#[cfg(feature = "onnx")]
pub fn build_detector(config: &DetectorConfig) -> Result<Arc<dyn Detector>, VisionError> {
    config.validate().map_err(VisionError::Config)?;
    let engine = OnnxEngine::load(&config.model_path)?;
    info!(
        "Loaded {:?} detector from {}",
        config.backend,
        config.model_path.display()
    );
    Ok(detector_with_engine(config, Arc::new(engine)))
}

/// Load the model and build the configured detector
#[cfg(not(feature = "onnx"))]
pub fn build_detector(config: &DetectorConfig) -> Result<Arc<dyn Detector>, VisionError> {
    config.validate().map_err(VisionError::Config)?;
    info!(
        "No inference runtime compiled in, cannot load {}",
        config.model_path.display()
    );
    Err(VisionError::Model(format!(
        "cannot load {}: built without the `onnx` feature",
        config.model_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_fallback_name() {
        let labels = Labels::from_config(None);
        assert_eq!(labels.len(), 80);
        assert_eq!(labels.name(2), "car");
        assert_eq!(labels.name(500), "class_500");
    }

    #[test]
    fn test_custom_labels() {
        let custom = vec!["background".to_string(), "car".to_string()];
        let labels = Labels::from_config(Some(&custom));
        assert_eq!(labels.name(1), "car");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_build_detector_without_runtime() {
        let result = build_detector(&DetectorConfig::default());
        assert!(matches!(result, Err(VisionError::Model(_))));
    }
}
