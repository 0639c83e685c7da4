use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a camera; doubles as the name of the station it watches
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for CameraId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Opaque vehicle identity, unique while the vehicle is inside the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 2-D point in frame (or display canvas) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Negative extents are clamped to zero.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Corners in drawing order: top-left, bottom-left, bottom-right, top-right
    pub fn corners(&self) -> [Point; 4] {
        let (x0, y0) = (self.x as f64, self.y as f64);
        let (x1, y1) = (self.x_max() as f64, self.y_max() as f64);
        [
            Point::new(x0, y0),
            Point::new(x0, y1),
            Point::new(x1, y1),
            Point::new(x1, y0),
        ]
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x as f64
            && point.x <= self.x_max() as f64
            && point.y >= self.y as f64
            && point.y <= self.y_max() as f64
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x_max().min(other.x_max());
        let y2 = self.y_max().min(other.y_max());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Discrete presence transition produced by the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceEvent {
    Entered,
    Left,
}

/// Status code carried by audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AuditStatus {
    /// 000: nothing happened (includes rejected station transitions)
    NoOp,
    /// 001: vehicle entered a station
    Entered,
    /// 002: vehicle left a station
    Left,
}

impl AuditStatus {
    pub fn code(&self) -> u8 {
        match self {
            AuditStatus::NoOp => 0,
            AuditStatus::Entered => 1,
            AuditStatus::Left => 2,
        }
    }
}

impl From<AuditStatus> for u8 {
    fn from(status: AuditStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for AuditStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(AuditStatus::NoOp),
            1 => Ok(AuditStatus::Entered),
            2 => Ok(AuditStatus::Left),
            other => Err(format!("unknown audit status code {}", other)),
        }
    }
}

impl From<PresenceEvent> for AuditStatus {
    fn from(event: PresenceEvent) -> Self {
        match event {
            PresenceEvent::Entered => AuditStatus::Entered,
            PresenceEvent::Left => AuditStatus::Left,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

/// Fixed-shape record handed to the audit sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub camera_id: CameraId,
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub vehicle_id: Option<VehicleId>,
    pub status: AuditStatus,
}

impl AuditRecord {
    pub fn new(camera_id: CameraId, vehicle_id: Option<VehicleId>, status: AuditStatus) -> Self {
        Self {
            camera_id,
            timestamp: Utc::now(),
            vehicle_id,
            status,
        }
    }
}

/// Outcome of one completed detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
    /// `None` when the detector was unavailable for this frame
    pub count: Option<u32>,
}

impl DetectionEvent {
    pub fn new(camera_id: CameraId, count: Option<u32>) -> Self {
        Self {
            camera_id,
            timestamp: Utc::now(),
            count,
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS.mmm`, UTC
pub mod millis_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
