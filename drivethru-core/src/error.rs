use crate::types::{CameraId, VehicleId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    #[error("Detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error("Station protocol error: {0}")]
    StationProtocol(#[from] StationProtocolError),

    #[error("Source disconnected: {0}")]
    SourceDisconnected(String),

    #[error("Camera not found: {0}")]
    UnknownCamera(String),

    #[error("Station not found: {0}")]
    UnknownStation(String),
}

/// Out-of-order station transitions. Reported, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StationProtocolError {
    #[error("station {station} rejected entry (in service: {in_service:?}, queued: {queued})")]
    EnterRejected {
        station: CameraId,
        in_service: Option<VehicleId>,
        queued: usize,
    },

    #[error("station {station} has no vehicle in service to leave")]
    NothingInService { station: CameraId },
}

impl StationProtocolError {
    pub fn station(&self) -> &CameraId {
        match self {
            StationProtocolError::EnterRejected { station, .. } => station,
            StationProtocolError::NothingInService { station } => station,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_protocol_error_display() {
        let err = StationProtocolError::EnterRejected {
            station: CameraId::from("PAY"),
            in_service: Some(VehicleId(3)),
            queued: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("PAY"));
        assert!(msg.contains("queued: 0"));
        assert_eq!(err.station(), &CameraId::from("PAY"));
    }

    #[test]
    fn test_station_protocol_error_converts() {
        let err: Error = StationProtocolError::NothingInService {
            station: CameraId::from("MENU"),
        }
        .into();
        match err {
            Error::StationProtocol(inner) => assert_eq!(inner.station().as_str(), "MENU"),
            _ => panic!("Expected StationProtocol error"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }
}
