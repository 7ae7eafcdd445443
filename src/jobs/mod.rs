pub mod progress;
pub mod slot;

pub use progress::{estimate_eta, Progress, ThroughputClock};
pub use slot::{CancelFlag, JobGuard, JobKind, JobSlot, JobState, JobStatus};
