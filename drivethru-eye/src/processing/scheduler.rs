//! Per-camera detection gating
//!
//! At most one detection pass per camera is in flight. A frame offered while
//! a pass is running is skipped rather than queued, so detection never falls
//! behind the live feed.

use crate::frame::Frame;
use crate::processing::debounce::{PresenceDebouncer, PresenceDecision, PresenceState};
use crate::processing::detection::DetectionPipeline;
use crate::roi::Roi;
use drivethru_core::{CameraId, DetectionEvent, PresenceHandler};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started,
    Skipped,
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub started: u64,
    pub skipped: u64,
    pub failed: u64,
    pub completed: u64,
}

/// Clears the busy flag when dropped
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SchedulerInner {
    camera_id: CameraId,
    pipeline: Arc<DetectionPipeline>,
    debouncer: Mutex<PresenceDebouncer>,
    handler: Arc<dyn PresenceHandler>,
    confidence: f32,
    timeout: Duration,
    busy: Arc<AtomicBool>,
    started: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    completed: AtomicU64,
    last_event: Mutex<Option<DetectionEvent>>,
}

/// Cheap to clone; clones share the busy flag and the debouncer
#[derive(Clone)]
pub struct DetectionScheduler {
    inner: Arc<SchedulerInner>,
}

impl DetectionScheduler {
    pub fn new(
        camera_id: CameraId,
        pipeline: Arc<DetectionPipeline>,
        debouncer: PresenceDebouncer,
        handler: Arc<dyn PresenceHandler>,
        confidence: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                camera_id,
                pipeline,
                debouncer: Mutex::new(debouncer),
                handler,
                confidence,
                timeout,
                busy: Arc::new(AtomicBool::new(false)),
                started: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                last_event: Mutex::new(None),
            }),
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.inner.camera_id
    }

    /// Start a detection pass on `frame` unless one is already running.
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, frame: Frame, roi: Option<Roi>) -> DispatchOutcome {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.inner.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Camera {}: detection busy, skipping frame {}",
                self.inner.camera_id, frame.sequence
            );
            return DispatchOutcome::Skipped;
        }

        self.inner.started.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_pass(frame, roi).await;
        });
        DispatchOutcome::Started
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            started: self.inner.started.load(Ordering::Relaxed),
            skipped: self.inner.skipped.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
        }
    }

    pub fn presence_state(&self) -> PresenceState {
        self.inner.debouncer.lock().state()
    }

    pub fn last_event(&self) -> Option<DetectionEvent> {
        self.inner.last_event.lock().clone()
    }

    /// Clear the debounce window, e.g. after the ROI changed
    pub fn reset_presence(&self) {
        self.inner.debouncer.lock().reset();
    }
}

impl SchedulerInner {
    async fn run_pass(&self, frame: Frame, roi: Option<Roi>) {
        let guard = BusyGuard(self.busy.clone());
        let pipeline = self.pipeline.clone();
        let confidence = self.confidence;

        // The guard comes back with the result and is held until the result
        // has been applied. A panic drops it during unwinding.
        let task = tokio::task::spawn_blocking(move || {
            let count = pipeline.count_with_confidence(&frame, roi.as_ref(), confidence);
            (guard, count)
        });

        // On timeout the blocking call keeps the busy flag until it returns
        let (guard, count) = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok((guard, Ok(count)))) => (Some(guard), Some(count)),
            Ok(Ok((guard, Err(e)))) => {
                warn!("Camera {}: detection unavailable: {}", self.camera_id, e);
                (Some(guard), None)
            }
            Ok(Err(e)) => {
                error!("Camera {}: detection task failed: {}", self.camera_id, e);
                (None, None)
            }
            Err(_) => {
                warn!(
                    "Camera {}: detection timed out after {:?}",
                    self.camera_id, self.timeout
                );
                (None, None)
            }
        };

        *self.last_event.lock() = Some(DetectionEvent::new(self.camera_id.clone(), count));

        let decision: PresenceDecision = self.debouncer.lock().push(count);
        if let Some(event) = decision.event {
            self.handler.on_presence(&self.camera_id, event);
        }

        // Counted last so observers see the pass fully applied
        if count.is_some() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        drop(guard);
    }
}
