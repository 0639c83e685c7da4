//! Presence debouncing
//!
//! Per-pass detection counts flicker. A camera only changes state once the
//! last `min_frames` counts agree: all zeros leave the lane, all ones enter
//! it. Anything else, including counts above one, holds the current state.

use chrono::{DateTime, Utc};
use drivethru_core::{AuditStatus, CameraId, PresenceEvent};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    OutOfLane,
    InLane,
}

/// Outcome of feeding one count to the debouncer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceDecision {
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
    /// State after this decision
    pub state: PresenceState,
    pub event: Option<PresenceEvent>,
    pub status: AuditStatus,
}

#[derive(Debug)]
pub struct PresenceDebouncer {
    camera_id: CameraId,
    min_frames: usize,
    window: VecDeque<u32>,
    state: PresenceState,
}

impl PresenceDebouncer {
    pub fn new(camera_id: CameraId, min_frames: usize) -> Self {
        let min_frames = if min_frames < 1 {
            warn!(
                "Camera {}: min_frames must be at least 1, debouncing with a window of 1",
                camera_id
            );
            1
        } else {
            min_frames
        };

        Self {
            camera_id,
            min_frames,
            window: VecDeque::with_capacity(min_frames),
            state: PresenceState::OutOfLane,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn min_frames(&self) -> usize {
        self.min_frames
    }

    pub fn window(&self) -> impl Iterator<Item = u32> + '_ {
        self.window.iter().copied()
    }

    /// Feed one detection result. `None` (detector unavailable) is not
    /// recorded and never fires an event.
    pub fn push(&mut self, count: Option<u32>) -> PresenceDecision {
        let event = match count {
            Some(count) => {
                if self.window.len() == self.min_frames {
                    self.window.pop_front();
                }
                self.window.push_back(count);
                self.evaluate()
            }
            None => None,
        };

        let decision = PresenceDecision {
            camera_id: self.camera_id.clone(),
            timestamp: Utc::now(),
            state: self.state,
            event,
            status: event.map(AuditStatus::from).unwrap_or(AuditStatus::NoOp),
        };

        debug!(
            camera = %decision.camera_id,
            count = ?count,
            status = %decision.status,
            state = ?decision.state,
            "presence decision"
        );

        decision
    }

    fn evaluate(&mut self) -> Option<PresenceEvent> {
        if self.window.len() < self.min_frames {
            return None;
        }

        match self.state {
            PresenceState::InLane if self.window.iter().all(|&c| c == 0) => {
                self.state = PresenceState::OutOfLane;
                Some(PresenceEvent::Left)
            }
            PresenceState::OutOfLane if self.window.iter().all(|&c| c == 1) => {
                self.state = PresenceState::InLane;
                Some(PresenceEvent::Entered)
            }
            _ => None,
        }
    }

    /// Forget the window and return to `OutOfLane`
    pub fn reset(&mut self) {
        self.window.clear();
        self.state = PresenceState::OutOfLane;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(debouncer: &mut PresenceDebouncer, counts: &[u32]) -> Vec<PresenceEvent> {
        counts
            .iter()
            .filter_map(|&c| debouncer.push(Some(c)).event)
            .collect()
    }

    #[test]
    fn test_enters_once_on_full_window_of_ones() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 3);
        assert!(feed(&mut d, &[1, 1]).is_empty());
        assert_eq!(feed(&mut d, &[1]), vec![PresenceEvent::Entered]);
        assert_eq!(d.state(), PresenceState::InLane);
        // Steady presence does not re-fire
        assert!(feed(&mut d, &[1, 1, 1, 1]).is_empty());
    }

    #[test]
    fn test_leaves_once_on_full_window_of_zeros() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 3);
        feed(&mut d, &[1, 1, 1]);
        assert_eq!(feed(&mut d, &[0, 0, 0]), vec![PresenceEvent::Left]);
        assert!(feed(&mut d, &[0, 0, 0]).is_empty());
        assert_eq!(d.state(), PresenceState::OutOfLane);
    }

    #[test]
    fn test_zeros_while_out_of_lane_do_nothing() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 2);
        assert!(feed(&mut d, &[0, 0, 0, 0]).is_empty());
    }

    #[test]
    fn test_flicker_rejected() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 3);
        assert!(feed(&mut d, &[1, 0, 1, 0, 1, 1, 0, 1]).is_empty());
        assert_eq!(d.state(), PresenceState::OutOfLane);
    }

    #[test]
    fn test_counts_above_one_hold_state() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 2);
        assert!(feed(&mut d, &[2, 2, 2]).is_empty());
        assert_eq!(d.state(), PresenceState::OutOfLane);

        feed(&mut d, &[1, 1]);
        assert_eq!(d.state(), PresenceState::InLane);
        assert!(feed(&mut d, &[2, 0]).is_empty());
        assert_eq!(d.state(), PresenceState::InLane);
    }

    #[test]
    fn test_none_is_not_recorded() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 2);
        d.push(Some(1));
        let decision = d.push(None);
        assert_eq!(decision.event, None);
        assert_eq!(decision.status, AuditStatus::NoOp);
        assert_eq!(d.window().collect::<Vec<_>>(), vec![1]);
        assert_eq!(d.push(Some(1)).event, Some(PresenceEvent::Entered));
    }

    #[test]
    fn test_zero_min_frames_uses_one() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 0);
        assert_eq!(d.min_frames(), 1);
        assert_eq!(d.push(Some(1)).event, Some(PresenceEvent::Entered));
        assert_eq!(d.push(Some(0)).event, Some(PresenceEvent::Left));
    }

    #[test]
    fn test_decision_status_matches_event() {
        let mut d = PresenceDebouncer::new(CameraId::from("PAY"), 1);
        let entered = d.push(Some(1));
        assert_eq!(entered.status, AuditStatus::Entered);
        assert_eq!(entered.state, PresenceState::InLane);
        assert_eq!(entered.camera_id.as_str(), "PAY");
        assert_eq!(d.push(Some(1)).status, AuditStatus::NoOp);
    }

    #[test]
    fn test_reset() {
        let mut d = PresenceDebouncer::new(CameraId::from("MENU"), 2);
        feed(&mut d, &[1, 1]);
        d.reset();
        assert_eq!(d.state(), PresenceState::OutOfLane);
        assert_eq!(d.window().count(), 0);
        assert!(feed(&mut d, &[1]).is_empty());
    }
}
