//! drivethru-eye: vision side of the drive-through counter
//!
//! Captures frames from the active camera into a latest-wins buffer, samples
//! them for vehicle detections inside each camera's region of interest, and
//! debounces the per-frame counts into presence transitions that are handed to
//! a [`drivethru_core::PresenceHandler`].

pub mod camera;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod frame_buffer;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod roi;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod utils;

pub use camera::{CameraStatus, DefaultSourceOpener, FrameSource, ReplaySource, SourceOpener};
pub use config::{CameraSpec, DetectorBackend, DetectorConfig, SourceSpec, VisionConfig};
pub use error::VisionError;
pub use display::MjpegEncoder;
pub use frame::{Frame, RawFrame};
pub use frame_buffer::{FrameBuffer, FrameStream};
pub use models::{build_detector, DetectedObject, Detector, InferenceEngine};
pub use pipeline::{CameraSummary, CaptureFailures, PipelineContext};
pub use processing::{DetectionPipeline, DetectionScheduler, PresenceDebouncer, PresenceState};
pub use roi::Roi;
