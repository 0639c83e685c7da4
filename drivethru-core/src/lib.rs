pub mod types;
pub mod error;
pub mod config;
pub mod presence;

pub use error::{Error, Result, StationProtocolError};
pub use types::{
    AuditRecord, AuditStatus, BoundingBox, CameraId, DetectionEvent, Point, PresenceEvent,
    VehicleId,
};
pub use presence::PresenceHandler;
pub use config::{LoggingConfig, RelayConfig, ServerConfig};
