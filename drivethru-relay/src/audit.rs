//! Audit sinks
//!
//! The relay never persists audit records itself. Delivery is the sink's
//! business; `emit` must not block.

use drivethru_core::AuditRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Structured `tracing` event per record, target `drivethru::audit`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, record: &AuditRecord) {
        let message = serde_json::to_string(record).unwrap_or_default();
        info!(
            target: "drivethru::audit",
            camera_id = %record.camera_id,
            vehicle_id = ?record.vehicle_id.map(|v| v.0),
            status = %record.status,
            "{}",
            message
        );
    }
}

/// Live fan-out to any number of subscribers. Slow subscribers lag and lose
/// records; nothing is buffered for late subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<AuditRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl AuditSink for BroadcastSink {
    fn emit(&self, record: &AuditRecord) {
        // No subscribers is fine
        let _ = self.sender.send(record.clone());
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Forwards each record to every inner sink, in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutSink {
    fn emit(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}
