use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Snapshot of a bulk job's advancement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub fetched: u64,
    pub total: u64,
    /// Remaining seconds at the observed throughput; `None` until a rate is known.
    pub eta_seconds: Option<f64>,
}

impl Progress {
    pub fn new(fetched: u64, total: u64, elapsed: Duration) -> Self {
        Self {
            fetched,
            total,
            eta_seconds: estimate_eta(fetched, total, elapsed),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fetched >= self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.fetched as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// `(total - fetched) / (fetched / elapsed)`.
pub fn estimate_eta(fetched: u64, total: u64, elapsed: Duration) -> Option<f64> {
    if fetched >= total {
        return Some(0.0);
    }
    let secs = elapsed.as_secs_f64();
    if fetched == 0 || secs <= 0.0 {
        return None;
    }
    let rate = fetched as f64 / secs;
    Some((total - fetched) as f64 / rate)
}

/// Measures throughput from the start of one job invocation.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputClock {
    started: Instant,
}

impl ThroughputClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn observe(&self, fetched: u64, total: u64) -> Progress {
        Progress::new(fetched, total, self.elapsed())
    }
}
