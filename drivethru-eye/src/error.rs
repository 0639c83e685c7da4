//! Error types for drivethru-eye

use drivethru_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    #[error("Detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error("Source disconnected for camera {camera}: {reason}")]
    SourceDisconnected { camera: String, reason: String },

    #[error("Camera not found: {0}")]
    UnknownCamera(String),

    #[error("Camera already registered: {0}")]
    DuplicateCamera(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::InvalidRoi(msg) => CoreError::InvalidRoi(msg),
            VisionError::DetectionUnavailable(msg) => CoreError::DetectionUnavailable(msg),
            VisionError::SourceDisconnected { camera, reason } => {
                CoreError::SourceDisconnected(format!("{}: {}", camera, reason))
            }
            VisionError::UnknownCamera(name) => CoreError::UnknownCamera(name),
            VisionError::Config(msg) => CoreError::Configuration(msg),
            VisionError::Io(e) => CoreError::Io(e),
            VisionError::Core(e) => e,
            other => CoreError::DetectionUnavailable(other.to_string()),
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for VisionError {
    fn from(err: ort::Error) -> Self {
        VisionError::Ort(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Camera("Test error".to_string());
        assert!(err.to_string().contains("Camera error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_invalid_roi_maps_to_core() {
        let core_err: CoreError = VisionError::InvalidRoi("bowtie".to_string()).into();
        match core_err {
            CoreError::InvalidRoi(msg) => assert_eq!(msg, "bowtie"),
            _ => panic!("Expected InvalidRoi error"),
        }
    }

    #[test]
    fn test_source_disconnected_maps_to_core() {
        let core_err: CoreError = VisionError::SourceDisconnected {
            camera: "PAY".to_string(),
            reason: "eof".to_string(),
        }
        .into();
        match core_err {
            CoreError::SourceDisconnected(msg) => {
                assert!(msg.contains("PAY"));
                assert!(msg.contains("eof"));
            }
            _ => panic!("Expected SourceDisconnected error"),
        }
    }

    #[test]
    fn test_unknown_camera_maps_to_core() {
        let core_err: CoreError = VisionError::UnknownCamera("MENU".to_string()).into();
        assert!(matches!(core_err, CoreError::UnknownCamera(name) if name == "MENU"));
    }
}
