//! Capture, detection and debouncing wired together through PipelineContext

use drivethru_core::{CameraId, Point, PresenceEvent, PresenceHandler};
use drivethru_eye::config::{CameraSpec, SourceSpec, VisionConfig};
use drivethru_eye::processing::DetectionPipeline;
use drivethru_eye::testing::{ReplayOpener, ScriptedDetector};
use drivethru_eye::PipelineContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder(Mutex<Vec<(CameraId, PresenceEvent)>>);

impl PresenceHandler for Recorder {
    fn on_presence(&self, camera: &CameraId, event: PresenceEvent) {
        self.0.lock().push((camera.clone(), event));
    }
}

fn context(counts: &[u32], recorder: Arc<Recorder>) -> PipelineContext {
    let config = VisionConfig {
        min_frames: 2,
        capture_interval_ms: 5,
        ..VisionConfig::default()
    };
    let detection = Arc::new(DetectionPipeline::new(
        Arc::new(ScriptedDetector::new(counts)),
        &config,
    ));
    PipelineContext::new(config, detection, Arc::new(ReplayOpener::new(100, 100)), recorder).unwrap()
}

async fn wait_for_events(recorder: &Recorder, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while recorder.0.lock().len() < n {
        assert!(Instant::now() < deadline, "expected {} presence events", n);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_vehicle_enters_and_leaves() {
    let recorder = Arc::new(Recorder::default());
    let ctx = context(&[1, 1, 0, 0], recorder.clone());

    let mut spec = CameraSpec::new("MENU", SourceSpec::Device { index: 0 });
    spec.roi = Some(vec![
        Point::new(0.0, 0.0),
        Point::new(100.0, 0.0),
        Point::new(100.0, 100.0),
        Point::new(0.0, 100.0),
    ]);
    let id = ctx.add_camera(spec).await.unwrap();
    ctx.select_camera(&id).await.unwrap();

    wait_for_events(&recorder, 2).await;
    ctx.shutdown().await;

    let events = recorder.0.lock().clone();
    assert_eq!(
        events[..2],
        [(id.clone(), PresenceEvent::Entered), (id, PresenceEvent::Left)]
    );
}

#[tokio::test]
async fn test_vehicle_outside_roi_is_ignored() {
    let recorder = Arc::new(Recorder::default());
    let ctx = context(&[1, 1, 1, 1, 1, 1], recorder.clone());

    // Top-left corner only; the scripted car sits in the middle
    let mut spec = CameraSpec::new("PAY", SourceSpec::Device { index: 0 });
    spec.roi = Some(vec![
        Point::new(0.0, 0.0),
        Point::new(20.0, 0.0),
        Point::new(20.0, 20.0),
        Point::new(0.0, 20.0),
    ]);
    let id = ctx.add_camera(spec).await.unwrap();
    ctx.select_camera(&id).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.cameras()[0].detection.completed < 6 {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ctx.shutdown().await;

    assert!(recorder.0.lock().is_empty());
}
