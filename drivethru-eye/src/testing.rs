//! Scripted detector and replay opener shared by the test suites

use crate::camera::{FrameSource, ReplaySource, SourceOpener};
use crate::config::{CameraSpec, SourceSpec};
use crate::error::VisionError;
use crate::frame::{Frame, RawFrame};
use crate::models::{DetectedObject, Detector};
use crate::roi::Roi;
use drivethru_core::{BoundingBox, CameraId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Reports one centred car per scripted count. A camera with its own script
/// reads from it, any other camera reads the shared script. Zero once a
/// script runs out, so `ScriptedDetector::default()` never sees a vehicle.
#[derive(Default)]
pub struct ScriptedDetector {
    shared: Mutex<VecDeque<u32>>,
    per_camera: Mutex<HashMap<CameraId, VecDeque<u32>>>,
}

impl ScriptedDetector {
    pub fn new(counts: &[u32]) -> Self {
        Self {
            shared: Mutex::new(counts.iter().copied().collect()),
            per_camera: Mutex::default(),
        }
    }

    pub fn script(&self, camera: &str, counts: &[u32]) {
        self.per_camera
            .lock()
            .insert(CameraId::from(camera), counts.iter().copied().collect());
    }

    fn next_count(&self, camera: &CameraId) -> u32 {
        if let Some(script) = self.per_camera.lock().get_mut(camera) {
            return script.pop_front().unwrap_or(0);
        }
        self.shared.lock().pop_front().unwrap_or(0)
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(
        &self,
        frame: &Frame,
        _roi: Option<&Roi>,
        _confidence: f32,
    ) -> Result<Vec<DetectedObject>, VisionError> {
        let count = self.next_count(&frame.camera_id);
        let (w, h) = (frame.width as f32, frame.height as f32);
        Ok((0..count)
            .map(|_| DetectedObject {
                bbox: BoundingBox::new(w * 0.4, h * 0.4, w * 0.2, h * 0.2),
                class_id: 2,
                class_name: "car".to_string(),
                confidence: 0.9,
            })
            .collect())
    }
}

/// Opens `Device` sources as looping replays of one solid frame whose red
/// channel is the device index. Device 99 never opens; device 7 yields one
/// frame and then disconnects.
pub struct ReplayOpener {
    width: u32,
    height: u32,
}

impl ReplayOpener {
    pub const UNPLUGGED: u32 = 99;
    pub const SINGLE_FRAME: u32 = 7;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SourceOpener for ReplayOpener {
    fn open(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, VisionError> {
        let SourceSpec::Device { index } = spec.source else {
            return Err(VisionError::Camera(format!("{} is not a device", spec.source)));
        };
        let frame = RawFrame::filled(self.width, self.height, [index as u8, 0, 0]);
        match index {
            Self::UNPLUGGED => Err(VisionError::Camera(format!("device {} is unplugged", index))),
            Self::SINGLE_FRAME => Ok(Box::new(ReplaySource::once(vec![frame]))),
            _ => Ok(Box::new(ReplaySource::looping(vec![frame]))),
        }
    }
}
