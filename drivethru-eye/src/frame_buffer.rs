//! Single-slot, latest-wins frame exchange
//!
//! One capture task publishes, any number of readers take the most recent
//! frame. The lock only guards a reference-counted clone, so a reader never
//! holds up the publisher for longer than a pointer copy and never sees a
//! half-written frame.

use crate::frame::Frame;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    /// Bumped on every publish; 0 means nothing published yet
    version: u64,
}

/// Latest-wins frame cell shared between capture, display and detection
pub struct FrameBuffer {
    slot: RwLock<Slot>,
    changed: Notify,
    closed: AtomicBool,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            changed: Notify::new(),
            closed: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Replace the current frame unconditionally
    pub fn publish(&self, frame: Frame) {
        {
            let mut slot = self.slot.write();
            slot.frame = Some(frame);
            slot.version += 1;
        }
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    /// Most recent frame, or `None` before the first publish
    pub fn read(&self) -> Option<Frame> {
        self.slot.read().frame.clone()
    }

    /// Number of frames published so far
    pub fn version(&self) -> u64 {
        self.slot.read().version
    }

    fn newer_than(&self, version: u64) -> Option<(u64, Frame)> {
        let slot = self.slot.read();
        if slot.version > version {
            slot.frame.clone().map(|frame| (slot.version, frame))
        } else {
            None
        }
    }

    /// The source failed to produce a frame. The previous frame stays visible.
    /// Returns the number of failures since the last successful publish.
    pub fn record_failure(&self) -> u32 {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Drop the current frame, e.g. when switching to another camera.
    /// Readers keep waiting for the next publish.
    pub fn clear(&self) {
        self.slot.write().frame = None;
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// End every stream. Further publishes are still stored but nobody waits for them.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pull-based reader that yields each new frame at most once
    pub fn subscribe(self: &Arc<Self>) -> FrameStream {
        FrameStream {
            buffer: self.clone(),
            last_version: 0,
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Display-side consumer of a [`FrameBuffer`].
///
/// Frames published while the consumer was busy are skipped; only the latest
/// one is returned.
pub struct FrameStream {
    buffer: Arc<FrameBuffer>,
    last_version: u64,
}

impl FrameStream {
    /// Wait for a frame newer than the last one returned. `None` once the
    /// buffer is closed.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            let notified = self.buffer.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed
            notified.as_mut().enable();

            if self.buffer.is_closed() {
                return None;
            }

            if let Some((version, frame)) = self.buffer.newer_than(self.last_version) {
                self.last_version = version;
                return Some(frame);
            }

            notified.await;
        }
    }

    /// Non-blocking variant of [`FrameStream::next`]
    pub fn try_next(&mut self) -> Option<Frame> {
        let (version, frame) = self.buffer.newer_than(self.last_version)?;
        self.last_version = version;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use drivethru_core::CameraId;
    use std::time::Duration;

    fn frame(seq: u64) -> Frame {
        Frame::from_raw(CameraId::from("MENU"), seq, RawFrame::filled(2, 2, [seq as u8, 0, 0]))
    }

    #[test]
    fn test_read_before_publish() {
        let buffer = FrameBuffer::new();
        assert!(buffer.read().is_none());
        assert_eq!(buffer.version(), 0);
    }

    #[test]
    fn test_read_returns_latest_until_next_publish() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        assert_eq!(buffer.read().unwrap().sequence, 1);
        assert_eq!(buffer.read().unwrap().sequence, 1);

        buffer.publish(frame(2));
        assert_eq!(buffer.read().unwrap().sequence, 2);
        assert_eq!(buffer.version(), 2);
    }

    #[test]
    fn test_failure_counter_resets_on_publish() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        assert_eq!(buffer.record_failure(), 1);
        assert_eq!(buffer.record_failure(), 2);
        // Stale frame stays visible
        assert_eq!(buffer.read().unwrap().sequence, 1);
        assert_eq!(buffer.consecutive_failures(), 2);

        buffer.publish(frame(2));
        assert_eq!(buffer.consecutive_failures(), 0);
        assert_eq!(buffer.total_failures(), 2);
    }

    #[test]
    fn test_clear_drops_frame() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        buffer.clear();
        assert!(buffer.read().is_none());
    }

    #[tokio::test]
    async fn test_stream_waits_for_first_frame() {
        let buffer = Arc::new(FrameBuffer::new());
        let mut stream = buffer.subscribe();

        let pending = tokio::time::timeout(Duration::from_millis(30), stream.next()).await;
        assert!(pending.is_err());

        let publisher = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(frame(7));
        });

        let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.sequence, 7);
    }

    #[test]
    fn test_publish_wakes_pending_stream() {
        let buffer = Arc::new(FrameBuffer::new());
        let mut stream = buffer.subscribe();
        let mut next = tokio_test::task::spawn(stream.next());

        tokio_test::assert_pending!(next.poll());
        buffer.publish(frame(3));
        assert!(next.is_woken());

        let got = tokio_test::assert_ready!(next.poll());
        assert_eq!(got.map(|f| f.sequence), Some(3));
    }

    #[tokio::test]
    async fn test_stream_skips_to_latest() {
        let buffer = Arc::new(FrameBuffer::new());
        let mut stream = buffer.subscribe();

        buffer.publish(frame(1));
        buffer.publish(frame(2));
        buffer.publish(frame(3));

        assert_eq!(stream.next().await.unwrap().sequence, 3);
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let buffer = Arc::new(FrameBuffer::new());
        let mut stream = buffer.subscribe();

        let closer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_concurrent_readers_see_whole_frames() {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.publish(frame(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let f = buffer.read().unwrap();
                        assert_eq!(f.data.len(), 12);
                        assert_eq!(f.data[0], f.sequence as u8);
                    }
                })
            })
            .collect();

        for seq in 1..=200 {
            buffer.publish(frame(seq));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
