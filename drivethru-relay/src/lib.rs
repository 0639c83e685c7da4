//! drivethru-relay: station queues and the audit trail
//!
//! Vehicles travel a fixed ring of stations. Each station holds a FIFO queue
//! of waiting vehicles and at most one vehicle in service; presence events
//! from the station's camera move identities along the ring. Every transition
//! attempt, successful or not, is reported to an [`audit::AuditSink`].

pub mod audit;
pub mod station;

pub use audit::{AuditSink, BroadcastSink, FanoutSink, MemorySink, TracingSink};
pub use station::{RingSnapshot, StationRing, StationSnapshot};
