//! Frame sources and the capture worker

use crate::config::{CameraSpec, SourceSpec};
use crate::error::VisionError;
use crate::frame::{Frame, RawFrame};
use crate::frame_buffer::FrameBuffer;
use crate::processing::DetectionScheduler;
use crate::roi::Roi;
use drivethru_core::CameraId;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Anything that can hand out frames on demand. Calls block.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<RawFrame, VisionError>;

    /// Native frame size, when known before the first read
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Try to recover after a failed read
    fn reconnect(&mut self) -> Result<(), VisionError> {
        Ok(())
    }
}

/// Turns a camera spec into an open source
pub trait SourceOpener: Send + Sync {
    fn open(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, VisionError>;
}

/// Replays in-memory frames
pub struct ReplaySource {
    frames: Vec<RawFrame>,
    position: usize,
    looping: bool,
}

impl ReplaySource {
    /// Loops forever, like a video file
    pub fn looping(frames: Vec<RawFrame>) -> Self {
        Self {
            frames,
            position: 0,
            looping: true,
        }
    }

    /// Disconnects after the last frame
    pub fn once(frames: Vec<RawFrame>) -> Self {
        Self {
            frames,
            position: 0,
            looping: false,
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<RawFrame, VisionError> {
        if self.position >= self.frames.len() {
            if self.looping && !self.frames.is_empty() {
                self.position = 0;
            } else {
                return Err(VisionError::SourceDisconnected {
                    camera: "replay".to_string(),
                    reason: "end of frames".to_string(),
                });
            }
        }
        let frame = self.frames[self.position].clone();
        self.position += 1;
        Ok(frame)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| (f.width, f.height))
    }
}

/// Still images from a directory, replayed in file name order and looped
pub struct DirectorySource {
    path: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    dimensions: Option<(u32, u32)>,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

impl DirectorySource {
    pub fn open(path: &Path) -> Result<Self, VisionError> {
        let mut source = Self {
            path: path.to_path_buf(),
            files: Vec::new(),
            position: 0,
            dimensions: None,
        };
        source.scan()?;
        source.dimensions = Some(image::image_dimensions(&source.files[0])?);
        Ok(source)
    }

    fn scan(&mut self) -> Result<(), VisionError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(VisionError::Camera(format!(
                "No images found in {}",
                self.path.display()
            )));
        }
        self.files = files;
        self.position = 0;
        Ok(())
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<RawFrame, VisionError> {
        if self.position >= self.files.len() {
            self.position = 0;
        }
        let path = &self.files[self.position];
        self.position += 1;

        let image = image::open(path).map_err(|e| VisionError::SourceDisconnected {
            camera: self.path.display().to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(RawFrame::from_image(image.to_rgb8()))
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn reconnect(&mut self) -> Result<(), VisionError> {
        self.scan()
    }
}

#[cfg(feature = "opencv")]
pub use self::opencv_source::OpenCvSource;

#[cfg(feature = "opencv")]
mod opencv_source {
    use super::*;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, CAP_PROP_POS_FRAMES},
    };

    /// Capture device, network stream or video file
    pub struct OpenCvSource {
        spec: SourceSpec,
        capture: VideoCapture,
        looping: bool,
    }

    impl OpenCvSource {
        pub fn open(spec: &SourceSpec) -> Result<Self, VisionError> {
            let (capture, looping) = match spec {
                SourceSpec::Device { index } => (VideoCapture::new(*index as i32, CAP_ANY)?, false),
                SourceSpec::Url { url } => (
                    VideoCapture::from_file(url, CAP_ANY)?,
                    Path::new(url).is_file(),
                ),
                SourceSpec::Directory { .. } => {
                    return Err(VisionError::Camera(format!(
                        "{} is not a video source",
                        spec
                    )))
                }
            };

            if !capture.is_opened()? {
                return Err(VisionError::Camera(format!("Failed to open {}", spec)));
            }

            info!("Opened video source {}", spec);
            Ok(Self {
                spec: spec.clone(),
                capture,
                looping,
            })
        }

        fn read_mat(&mut self) -> Result<Option<Mat>, VisionError> {
            let mut mat = Mat::default();
            let ok = self.capture.read(&mut mat)?;
            if !ok || mat.empty() {
                return Ok(None);
            }
            Ok(Some(mat))
        }
    }

    impl FrameSource for OpenCvSource {
        fn next_frame(&mut self) -> Result<RawFrame, VisionError> {
            let mut mat = self.read_mat()?;
            if mat.is_none() && self.looping {
                // Video files restart from the beginning
                self.capture.set(CAP_PROP_POS_FRAMES, 0.0)?;
                mat = self.read_mat()?;
            }
            let mat = mat.ok_or_else(|| VisionError::SourceDisconnected {
                camera: self.spec.to_string(),
                reason: "no frame".to_string(),
            })?;

            let mut rgb = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            RawFrame::new(width, height, rgb.data_bytes()?.to_vec())
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            let width = self.capture.get(CAP_PROP_FRAME_WIDTH).ok()?;
            let height = self.capture.get(CAP_PROP_FRAME_HEIGHT).ok()?;
            if width > 0.0 && height > 0.0 {
                Some((width as u32, height as u32))
            } else {
                None
            }
        }

        fn reconnect(&mut self) -> Result<(), VisionError> {
            *self = Self::open(&self.spec)?;
            Ok(())
        }
    }
}

/// Opens every source kind this build supports
#[derive(Debug, Default, Clone)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, VisionError> {
        match &spec.source {
            SourceSpec::Directory { path } => Ok(Box::new(DirectorySource::open(path)?)),
            #[cfg(feature = "opencv")]
            other => Ok(Box::new(OpenCvSource::open(other)?)),
            #[cfg(not(feature = "opencv"))]
            other => Err(VisionError::Camera(format!(
                "cannot open {} for camera {}: built without the `opencv` feature",
                other, spec.name
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    /// Registered but not capturing
    Idle,
    Streaming,
    /// Reads are failing, retrying with backoff
    Reconnecting,
    /// Too many failures in a row; still retrying at the slowest rate
    Unavailable,
    Stopped,
}

/// Delay before retry number `failures` (1-based)
pub fn backoff_delay(failures: u32, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    Duration::from_millis(100u64 << exponent).min(max)
}

/// Everything the capture loop needs besides the source
#[derive(Clone)]
pub struct CaptureSettings {
    pub camera_id: CameraId,
    pub buffer: Arc<FrameBuffer>,
    pub scheduler: Option<DetectionScheduler>,
    pub roi: Arc<RwLock<Option<Roi>>>,
    pub status: Arc<RwLock<CameraStatus>>,
    pub interval: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
}

/// Running capture task for one camera
pub struct CaptureHandle {
    camera_id: CameraId,
    stop: watch::Sender<bool>,
    task: JoinHandle<Option<Box<dyn FrameSource>>>,
}

impl CaptureHandle {
    /// Start capturing. Must be called from within a tokio runtime.
    pub fn spawn(source: Box<dyn FrameSource>, settings: CaptureSettings) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let camera_id = settings.camera_id.clone();
        info!("Camera {} capture started", camera_id);
        let task = tokio::spawn(capture_loop(source, settings, stop_rx));
        Self {
            camera_id,
            stop,
            task,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Signal the loop, wait for it and release the source
    pub async fn stop(self) -> Result<(), VisionError> {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(source) => {
                drop(source);
                info!("Camera {} capture stopped, source released", self.camera_id);
                Ok(())
            }
            Err(e) => Err(VisionError::Camera(format!(
                "capture task for {} failed: {}",
                self.camera_id, e
            ))),
        }
    }
}

/// Sleep unless a stop arrives first. Returns true when stopping.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

async fn capture_loop(
    mut source: Box<dyn FrameSource>,
    settings: CaptureSettings,
    mut stop: watch::Receiver<bool>,
) -> Option<Box<dyn FrameSource>> {
    let camera = settings.camera_id.clone();
    let mut sequence = 0u64;
    let mut failures = 0u32;

    *settings.status.write() = CameraStatus::Streaming;

    loop {
        if *stop.borrow() {
            break;
        }

        let read = tokio::task::spawn_blocking(move || {
            let result = source.next_frame();
            (source, result)
        })
        .await;

        let result = match read {
            Ok((returned, result)) => {
                source = returned;
                result
            }
            Err(e) => {
                error!("Camera {}: capture read panicked: {}", camera, e);
                *settings.status.write() = CameraStatus::Unavailable;
                return None;
            }
        };

        match result {
            Ok(raw) => {
                if failures > 0 {
                    info!("Camera {} recovered after {} failed reads", camera, failures);
                    failures = 0;
                }
                *settings.status.write() = CameraStatus::Streaming;

                sequence += 1;
                let frame = Frame::from_raw(camera.clone(), sequence, raw);
                settings.buffer.publish(frame.clone());

                if let Some(scheduler) = &settings.scheduler {
                    let roi = settings.roi.read().clone();
                    scheduler.dispatch(frame, roi);
                }

                if wait_or_stop(&mut stop, settings.interval).await {
                    break;
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                settings.buffer.record_failure();

                let delay = if failures >= settings.max_consecutive_failures {
                    if failures == settings.max_consecutive_failures {
                        error!(
                            "Camera {} unavailable after {} failed reads: {}",
                            camera, failures, e
                        );
                    }
                    *settings.status.write() = CameraStatus::Unavailable;
                    settings.max_backoff
                } else {
                    warn!("Camera {} read failed ({}): {}", camera, failures, e);
                    *settings.status.write() = CameraStatus::Reconnecting;
                    backoff_delay(failures, settings.max_backoff)
                };

                if wait_or_stop(&mut stop, delay).await {
                    break;
                }

                let reconnect = tokio::task::spawn_blocking(move || {
                    let result = source.reconnect();
                    (source, result)
                })
                .await;
                match reconnect {
                    Ok((returned, result)) => {
                        source = returned;
                        if let Err(e) = result {
                            debug!("Camera {} reconnect failed: {}", camera, e);
                        }
                    }
                    Err(e) => {
                        error!("Camera {}: reconnect panicked: {}", camera, e);
                        *settings.status.write() = CameraStatus::Unavailable;
                        return None;
                    }
                }
            }
        }
    }

    *settings.status.write() = CameraStatus::Stopped;
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    fn settings(buffer: Arc<FrameBuffer>) -> CaptureSettings {
        CaptureSettings {
            camera_id: CameraId::from("MENU"),
            buffer,
            scheduler: None,
            roi: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(CameraStatus::Idle)),
            interval: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
            max_consecutive_failures: 2,
        }
    }

    /// Fails a fixed number of reads, then serves frames; records release
    struct FlakySource {
        failures_left: u32,
        reconnects: Arc<AtomicU32>,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for FlakySource {
        fn next_frame(&mut self) -> Result<RawFrame, VisionError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(VisionError::SourceDisconnected {
                    camera: "flaky".to_string(),
                    reason: "read failed".to_string(),
                });
            }
            Ok(RawFrame::filled(2, 2, [1, 2, 3]))
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            Some((2, 2))
        }

        fn reconnect(&mut self) -> Result<(), VisionError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FlakySource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_backoff_delay() {
        let max = Duration::from_secs(5);
        assert_eq!(backoff_delay(1, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(4, max), Duration::from_millis(800));
        assert_eq!(backoff_delay(10, max), max);
        assert_eq!(backoff_delay(u32::MAX, max), max);
    }

    #[test]
    fn test_replay_source_loops() {
        let mut source = ReplaySource::looping(vec![
            RawFrame::filled(1, 1, [1, 0, 0]),
            RawFrame::filled(1, 1, [2, 0, 0]),
        ]);
        let firsts: Vec<u8> = (0..4).map(|_| source.next_frame().unwrap().data[0]).collect();
        assert_eq!(firsts, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_replay_source_once_disconnects() {
        let mut source = ReplaySource::once(vec![RawFrame::filled(1, 1, [0, 0, 0])]);
        assert!(source.next_frame().is_ok());
        assert!(matches!(
            source.next_frame(),
            Err(VisionError::SourceDisconnected { .. })
        ));
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(6, 4, image::Rgb([10, 20, 30]))
            .save(dir.path().join("b.png"))
            .unwrap();
        image::RgbImage::from_pixel(6, 4, image::Rgb([40, 50, 60]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.dimensions(), Some((6, 4)));
        assert_eq!(&source.next_frame().unwrap().data[..3], &[40, 50, 60]);
        assert_eq!(&source.next_frame().unwrap().data[..3], &[10, 20, 30]);
        assert_eq!(&source.next_frame().unwrap().data[..3], &[40, 50, 60]);
    }

    #[test]
    fn test_directory_source_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySource::open(dir.path()).is_err());
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_default_opener_rejects_devices_without_opencv() {
        let spec = CameraSpec::new("MENU", SourceSpec::Device { index: 0 });
        assert!(matches!(
            DefaultSourceOpener.open(&spec),
            Err(VisionError::Camera(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_publishes_and_stops() {
        let buffer = Arc::new(FrameBuffer::new());
        let released = Arc::new(AtomicBool::new(false));
        let source = FlakySource {
            failures_left: 0,
            reconnects: Arc::new(AtomicU32::new(0)),
            released: released.clone(),
        };
        let settings = settings(buffer.clone());
        let status = settings.status.clone();

        let handle = CaptureHandle::spawn(Box::new(source), settings);
        wait_for("frames", || buffer.version() >= 3).await;
        assert_eq!(*status.read(), CameraStatus::Streaming);
        assert_eq!(buffer.read().unwrap().camera_id.as_str(), "MENU");

        handle.stop().await.unwrap();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(*status.read(), CameraStatus::Stopped);
    }

    #[tokio::test]
    async fn test_capture_retries_then_recovers() {
        let buffer = Arc::new(FrameBuffer::new());
        let reconnects = Arc::new(AtomicU32::new(0));
        let source = FlakySource {
            failures_left: 3,
            reconnects: reconnects.clone(),
            released: Arc::new(AtomicBool::new(false)),
        };
        let settings = settings(buffer.clone());
        let status = settings.status.clone();

        let handle = CaptureHandle::spawn(Box::new(source), settings);
        wait_for("recovery", || buffer.version() >= 1).await;

        assert_eq!(reconnects.load(Ordering::SeqCst), 3);
        assert_eq!(buffer.total_failures(), 3);
        assert_eq!(buffer.consecutive_failures(), 0);
        wait_for("streaming", || *status.read() == CameraStatus::Streaming).await;

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_marks_unavailable() {
        let buffer = Arc::new(FrameBuffer::new());
        let source = FlakySource {
            failures_left: u32::MAX,
            reconnects: Arc::new(AtomicU32::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        };
        let settings = settings(buffer.clone());
        let status = settings.status.clone();

        let handle = CaptureHandle::spawn(Box::new(source), settings);
        wait_for("unavailable", || *status.read() == CameraStatus::Unavailable).await;
        assert!(buffer.read().is_none());

        // Stop interrupts the backoff sleep
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap()
            .unwrap();
    }
}
