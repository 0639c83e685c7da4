//! Vision processing pipelines

pub mod debounce;
pub mod detection;
pub mod scheduler;

pub use debounce::{PresenceDebouncer, PresenceDecision, PresenceState};
pub use detection::DetectionPipeline;
pub use scheduler::{DetectionScheduler, DispatchOutcome, SchedulerStats};
