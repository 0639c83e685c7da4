//! Camera registry and the active capture
//!
//! `PipelineContext` owns everything the vision side shares: the frame
//! buffer, the ordered camera registry, the capture of the one active camera
//! and the detection pipeline every camera's scheduler runs on.

use crate::camera::{CameraStatus, CaptureHandle, CaptureSettings, FrameSource, SourceOpener};
use crate::config::{CameraSpec, VisionConfig};
use crate::error::VisionError;
use crate::frame_buffer::{FrameBuffer, FrameStream};
use crate::processing::{
    DetectionPipeline, DetectionScheduler, PresenceDebouncer, PresenceState, SchedulerStats,
};
use crate::roi::Roi;
use drivethru_core::{CameraId, DetectionEvent, Point, PresenceHandler};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

struct CameraEntry {
    spec: CameraSpec,
    /// Frame size seen when the camera was probed
    dimensions: Option<(u32, u32)>,
    /// ROI as configured, in `roi_space` coordinates
    roi_points: RwLock<Option<Vec<Point>>>,
    /// ROI in frame coordinates, read by the capture loop
    roi: Arc<RwLock<Option<Roi>>>,
    status: Arc<RwLock<CameraStatus>>,
    scheduler: DetectionScheduler,
}

impl CameraEntry {
    fn id(&self) -> CameraId {
        self.spec.id()
    }

    /// Validate and rescale a polygon for this camera's frames
    fn frame_roi(&self, points: &[Point]) -> Result<Roi, VisionError> {
        let roi = Roi::new(points.iter().copied())?;
        match (self.spec.roi_space, self.dimensions) {
            (Some((space_w, space_h)), Some((frame_w, frame_h))) => roi.scaled(
                frame_w as f64 / space_w as f64,
                frame_h as f64 / space_h as f64,
            ),
            _ => Ok(roi),
        }
    }
}

/// Failed reads reported by the frame buffer. `total` counts every camera
/// since startup; `consecutive` resets on a good read or a camera switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureFailures {
    pub consecutive: u32,
    pub total: u64,
}

/// Registry view of one camera
#[derive(Debug, Clone, Serialize)]
pub struct CameraSummary {
    pub name: String,
    pub source: String,
    pub status: CameraStatus,
    pub active: bool,
    pub dimensions: Option<(u32, u32)>,
    pub roi: Option<Vec<Point>>,
    pub presence: PresenceState,
    pub detection: SchedulerStats,
    pub last_detection: Option<DetectionEvent>,
    /// Only reported for the active camera
    pub capture_failures: Option<CaptureFailures>,
}

pub struct PipelineContext {
    config: VisionConfig,
    buffer: Arc<FrameBuffer>,
    cameras: RwLock<Vec<Arc<CameraEntry>>>,
    active: AsyncMutex<Option<CaptureHandle>>,
    active_id: RwLock<Option<CameraId>>,
    opener: Arc<dyn SourceOpener>,
    detection: Arc<DetectionPipeline>,
    handler: Arc<dyn PresenceHandler>,
}

impl PipelineContext {
    pub fn new(
        config: VisionConfig,
        detection: Arc<DetectionPipeline>,
        opener: Arc<dyn SourceOpener>,
        handler: Arc<dyn PresenceHandler>,
    ) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;
        info!(
            "Vision pipeline ready (detector {}, min_frames {})",
            detection.detector_name(),
            config.min_frames
        );
        Ok(Self {
            config,
            buffer: Arc::new(FrameBuffer::new()),
            cameras: RwLock::new(Vec::new()),
            active: AsyncMutex::new(None),
            active_id: RwLock::new(None),
            opener,
            detection,
            handler,
        })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    pub fn buffer(&self) -> Arc<FrameBuffer> {
        self.buffer.clone()
    }

    /// Display consumer for whatever camera is active
    pub fn frame_stream(&self) -> FrameStream {
        self.buffer.subscribe()
    }

    pub fn active_camera(&self) -> Option<CameraId> {
        self.active_id.read().clone()
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras.read().iter().map(|c| c.id()).collect()
    }

    pub fn cameras(&self) -> Vec<CameraSummary> {
        let active = self.active_camera();
        self.cameras
            .read()
            .iter()
            .map(|entry| {
                let id = entry.id();
                let is_active = active.as_ref() == Some(&id);
                CameraSummary {
                    name: entry.spec.name.clone(),
                    source: entry.spec.source.to_string(),
                    status: *entry.status.read(),
                    active: is_active,
                    dimensions: entry.dimensions,
                    roi: entry.roi_points.read().clone(),
                    presence: entry.scheduler.presence_state(),
                    detection: entry.scheduler.stats(),
                    last_detection: entry.scheduler.last_event(),
                    capture_failures: is_active.then(|| self.capture_failures()),
                }
            })
            .collect()
    }

    pub fn capture_failures(&self) -> CaptureFailures {
        CaptureFailures {
            consecutive: self.buffer.consecutive_failures(),
            total: self.buffer.total_failures(),
        }
    }

    fn entry(&self, id: &CameraId) -> Result<Arc<CameraEntry>, VisionError> {
        self.cameras
            .read()
            .iter()
            .find(|c| &c.id() == id)
            .cloned()
            .ok_or_else(|| VisionError::UnknownCamera(id.to_string()))
    }

    async fn open_source(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, VisionError> {
        let opener = self.opener.clone();
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || opener.open(&spec))
            .await
            .map_err(|e| VisionError::Camera(format!("source open task failed: {}", e)))?
    }

    /// Register a camera. The source is opened once to learn its frame size
    /// and released again.
    pub async fn add_camera(&self, spec: CameraSpec) -> Result<CameraId, VisionError> {
        spec.validate().map_err(VisionError::Config)?;
        let id = spec.id();
        if self.entry(&id).is_ok() {
            return Err(VisionError::DuplicateCamera(id.to_string()));
        }
        if let Some(points) = &spec.roi {
            Roi::new(points.iter().copied())?;
        }

        let mut source = self.open_source(&spec).await?;
        let dimensions = tokio::task::spawn_blocking(move || {
            let dims = source.dimensions();
            source.next_frame().map(|f| Some((f.width, f.height))).or_else(|e| {
                if dims.is_some() {
                    Ok(dims)
                } else {
                    Err(e)
                }
            })
        })
        .await
        .map_err(|e| VisionError::Camera(format!("probe task failed: {}", e)))??;

        let debouncer = PresenceDebouncer::new(
            id.clone(),
            spec.min_frames.unwrap_or(self.config.min_frames),
        );
        let scheduler = DetectionScheduler::new(
            id.clone(),
            self.detection.clone(),
            debouncer,
            self.handler.clone(),
            spec.confidence.unwrap_or(self.config.confidence),
            self.config.detection_timeout(),
        );

        let entry = CameraEntry {
            roi_points: RwLock::new(spec.roi.clone()),
            roi: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(CameraStatus::Idle)),
            dimensions,
            scheduler,
            spec,
        };
        if let Some(points) = entry.roi_points.read().as_deref() {
            *entry.roi.write() = Some(entry.frame_roi(points)?);
        }

        {
            let mut cameras = self.cameras.write();
            if cameras.iter().any(|c| c.id() == id) {
                return Err(VisionError::DuplicateCamera(id.to_string()));
            }
            cameras.push(Arc::new(entry));
        }

        info!("Camera {} added ({:?})", id, dimensions);
        Ok(id)
    }

    /// Unregister a camera. If it was active, the next camera in order that
    /// opens becomes active.
    pub async fn remove_camera(&self, id: &CameraId) -> Result<(), VisionError> {
        let mut active = self.active.lock().await;

        let position = {
            let mut cameras = self.cameras.write();
            let position = cameras
                .iter()
                .position(|c| &c.id() == id)
                .ok_or_else(|| VisionError::UnknownCamera(id.to_string()))?;
            cameras.remove(position);
            position
        };
        info!("Camera {} removed", id);

        if self.active_camera().as_ref() != Some(id) {
            return Ok(());
        }

        self.stop_active(&mut active).await;

        let candidates: Vec<Arc<CameraEntry>> = {
            let cameras = self.cameras.read();
            let n = cameras.len();
            (0..n).map(|i| cameras[(position + i) % n].clone()).collect()
        };

        for candidate in candidates {
            match self.start_capture(&mut active, &candidate).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Camera {} could not take over: {}", candidate.id(), e),
            }
        }

        warn!("No camera available after removing {}", id);
        Ok(())
    }

    /// Switch the active camera. The current capture is stopped and its
    /// source released before the new source is opened. If the new source
    /// cannot be opened, no camera is active afterwards.
    pub async fn select_camera(&self, id: &CameraId) -> Result<(), VisionError> {
        let entry = self.entry(id)?;
        let mut active = self.active.lock().await;
        self.stop_active(&mut active).await;

        if let Err(e) = self.start_capture(&mut active, &entry).await {
            error!("Failed to switch to camera {}: {}", id, e);
            return Err(e);
        }
        Ok(())
    }

    async fn stop_active(&self, active: &mut Option<CaptureHandle>) {
        if let Some(handle) = active.take() {
            let previous = handle.camera_id().clone();
            if let Err(e) = handle.stop().await {
                error!("Stopping camera {} failed: {}", previous, e);
            }
            if let Ok(entry) = self.entry(&previous) {
                *entry.status.write() = CameraStatus::Idle;
            }
        }
        *self.active_id.write() = None;
        self.buffer.clear();
    }

    async fn start_capture(
        &self,
        active: &mut Option<CaptureHandle>,
        entry: &Arc<CameraEntry>,
    ) -> Result<(), VisionError> {
        let source = self.open_source(&entry.spec).await?;
        let settings = CaptureSettings {
            camera_id: entry.id(),
            buffer: self.buffer.clone(),
            scheduler: Some(entry.scheduler.clone()),
            roi: entry.roi.clone(),
            status: entry.status.clone(),
            interval: self.config.capture_interval(),
            max_backoff: self.config.max_backoff(),
            max_consecutive_failures: self.config.max_consecutive_failures,
        };
        *active = Some(CaptureHandle::spawn(source, settings));
        *self.active_id.write() = Some(entry.id());
        info!("Camera {} is now active", entry.id());
        Ok(())
    }

    /// Replace a camera's ROI. An invalid polygon leaves the previous ROI in
    /// place; a valid one restarts presence debouncing for that camera.
    pub fn set_roi(&self, id: &CameraId, points: Vec<Point>) -> Result<(), VisionError> {
        let entry = self.entry(id)?;
        let roi = match entry.frame_roi(&points) {
            Ok(roi) => roi,
            Err(e) => {
                warn!("Rejected ROI for camera {}: {}", id, e);
                return Err(e);
            }
        };

        *entry.roi.write() = Some(roi);
        *entry.roi_points.write() = Some(points);
        entry.scheduler.reset_presence();
        info!("Camera {} ROI updated", id);
        Ok(())
    }

    /// ROI in frame coordinates
    pub fn roi(&self, id: &CameraId) -> Result<Option<Roi>, VisionError> {
        Ok(self.entry(id)?.roi.read().clone())
    }

    /// Stop capture and end every frame stream
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        self.stop_active(&mut active).await;
        self.buffer.close();
        info!("Vision pipeline shut down");
    }
}
