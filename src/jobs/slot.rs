//! Single-flight slot for bulk jobs.
//!
//! Sync and export both rebuild or drain whole datasets, so at most one of
//! them runs at a time. The slot publishes every status change on a watch
//! channel and carries the cooperative cancel flag checked between chunks.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::progress::Progress;
use crate::error::{MirrorError, MirrorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Sync,
    Export,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Sync => "sync",
            JobKind::Export => "export",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub kind: Option<JobKind>,
    pub state: JobState,
    pub progress: Progress,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct JobSlot {
    active: Mutex<Option<JobKind>>,
    cancel: CancelFlag,
    status: watch::Sender<JobStatus>,
}

impl JobSlot {
    pub fn new() -> Self {
        let (status, _) = watch::channel(JobStatus::default());
        Self {
            active: Mutex::new(None),
            cancel: CancelFlag::new(),
            status,
        }
    }

    /// Claim the slot, or fail with `Busy` naming the job already running.
    pub fn acquire(self: &Arc<Self>, kind: JobKind) -> MirrorResult<JobGuard> {
        let mut active = self.active.lock();
        if let Some(running) = *active {
            return Err(MirrorError::Busy(running.to_string()));
        }
        *active = Some(kind);
        self.cancel.reset();
        self.status.send_replace(JobStatus {
            kind: Some(kind),
            state: JobState::Running,
            progress: Progress::default(),
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        });
        tracing::info!("Started {} job", kind);

        Ok(JobGuard {
            slot: Arc::clone(self),
            kind,
            cancel: self.cancel.clone(),
            finished: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Request cooperative cancellation. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock();
        match *active {
            Some(kind) => {
                tracing::info!("Cancellation requested for {} job", kind);
                self.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    fn report(&self, progress: Progress) {
        self.status.send_modify(|status| status.progress = progress);
    }

    fn finish(&self, state: JobState, progress: Option<Progress>, error: Option<String>) {
        let mut active = self.active.lock();
        self.status.send_modify(|status| {
            status.state = state;
            if let Some(progress) = progress {
                status.progress = progress;
            }
            status.error = error;
            status.finished_at = Some(Utc::now());
        });
        *active = None;
    }
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the slot for one job. Dropping it without an outcome marks the job
/// failed and releases the slot.
pub struct JobGuard {
    slot: Arc<JobSlot>,
    kind: JobKind,
    cancel: CancelFlag,
    finished: bool,
}

impl JobGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn report_progress(&self, progress: Progress) {
        self.slot.report(progress);
    }

    pub fn complete(mut self, progress: Progress) {
        tracing::info!(
            "{} job completed: {}/{} rows",
            self.kind,
            progress.fetched,
            progress.total
        );
        self.slot.finish(JobState::Completed, Some(progress), None);
        self.finished = true;
    }

    pub fn cancelled(mut self, progress: Progress) {
        tracing::info!(
            "{} job cancelled after {}/{} rows",
            self.kind,
            progress.fetched,
            progress.total
        );
        self.slot.finish(JobState::Cancelled, Some(progress), None);
        self.finished = true;
    }

    pub fn fail(mut self, error: &MirrorError) {
        tracing::warn!("{} job failed: {}", self.kind, error);
        let progress = match error {
            MirrorError::SyncFailed { fetched, total, .. }
            | MirrorError::ExportFailed { fetched, total, .. } => Some(Progress {
                fetched: *fetched,
                total: *total,
                eta_seconds: None,
            }),
            _ => None,
        };
        self.slot
            .finish(JobState::Failed, progress, Some(error.to_string()));
        self.finished = true;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.finish(
                JobState::Failed,
                None,
                Some(format!("{} job ended without an outcome", self.kind)),
            );
        }
    }
}
