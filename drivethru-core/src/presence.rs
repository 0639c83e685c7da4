//! Seam between the vision side and the station relay

use crate::types::{CameraId, PresenceEvent};

/// Receives debounced presence transitions, one stream per camera.
///
/// Implementations must absorb their own failures: a rejected transition is
/// reported through logging/auditing, never propagated back into the
/// detection pipeline.
pub trait PresenceHandler: Send + Sync {
    fn on_presence(&self, camera: &CameraId, event: PresenceEvent);
}

/// Discards every event. Useful when running the vision side on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenceHandler;

impl PresenceHandler for NullPresenceHandler {
    fn on_presence(&self, _camera: &CameraId, _event: PresenceEvent) {}
}
