//! Shared application state handed to every handler

use crate::settings::AppConfig;
use drivethru_core::{PresenceHandler, Result};
use drivethru_eye::camera::SourceOpener;
use drivethru_eye::config::CameraSpec;
use drivethru_eye::models::Detector;
use drivethru_eye::processing::DetectionPipeline;
use drivethru_eye::{MjpegEncoder, PipelineContext};
use drivethru_relay::{AuditSink, BroadcastSink, FanoutSink, StationRing, TracingSink};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PipelineContext>,
    pub ring: Arc<StationRing>,
    /// Live audit feed for the event stream endpoint
    pub audit: BroadcastSink,
    pub encoder: MjpegEncoder,
}

impl AppState {
    /// Wire the ring as the pipeline's presence handler. No camera is opened.
    pub fn new(
        config: &AppConfig,
        detector: Arc<dyn Detector>,
        opener: Arc<dyn SourceOpener>,
    ) -> Result<Self> {
        let audit = BroadcastSink::new(config.relay.audit_buffer);
        let sink: Arc<dyn AuditSink> = Arc::new(
            FanoutSink::new()
                .with(Arc::new(TracingSink))
                .with(Arc::new(audit.clone())),
        );
        let ring = Arc::new(StationRing::from_config(&config.relay, sink)?);

        let detection = Arc::new(DetectionPipeline::new(detector, &config.vision));
        let handler: Arc<dyn PresenceHandler> = ring.clone();
        let pipeline = Arc::new(PipelineContext::new(
            config.vision.clone(),
            detection,
            opener,
            handler,
        )?);

        let encoder = MjpegEncoder::new(config.vision.display_width, config.vision.jpeg_quality);

        Ok(Self {
            pipeline,
            ring,
            audit,
            encoder,
        })
    }

    /// Register the configured cameras and activate the first one that opens.
    /// Returns how many were registered.
    pub async fn start_cameras(&self, cameras: &[CameraSpec]) -> usize {
        let mut registered = Vec::new();
        for spec in cameras {
            let name = spec.name.clone();
            match self.pipeline.add_camera(spec.clone()).await {
                Ok(id) => {
                    if !self.ring.contains(&id) {
                        warn!("Camera {} does not match any station", id);
                    }
                    registered.push(id);
                }
                Err(e) => error!("Camera {} not registered: {}", name, e),
            }
        }

        for id in &registered {
            match self.pipeline.select_camera(id).await {
                Ok(()) => {
                    info!("Camera {} active", id);
                    break;
                }
                Err(e) => warn!("Camera {} could not start: {}", id, e),
            }
        }

        registered.len()
    }

    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
        info!("Final station state: {}", self.ring.snapshot());
    }
}
