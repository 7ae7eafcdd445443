use serde::Serialize;
use std::sync::Arc;

use crate::adapter::RowSource;
use crate::error::{MirrorError, MirrorResult};
use crate::jobs::{CancelFlag, Progress, ThroughputClock};
use crate::query::QueryDescriptor;
use crate::schema::Row;
use crate::storage::LocalStore;

pub const DEFAULT_SYNC_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub fetched: u64,
    pub total: u64,
    pub chunks: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn progress(&self) -> Progress {
        Progress {
            fetched: self.fetched,
            total: self.total,
            eta_seconds: if self.cancelled { None } else { Some(0.0) },
        }
    }
}

/// Replicates a filtered remote subset into the local store.
///
/// The store is cleared first, so a rerun from any partial state converges on
/// the same contents.
pub struct SyncEngine {
    remote: Arc<dyn RowSource>,
    store: Arc<LocalStore>,
    chunk_size: usize,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RowSource>, store: Arc<LocalStore>) -> Self {
        Self {
            remote,
            store,
            chunk_size: DEFAULT_SYNC_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Run one sync. `on_progress` is called after the count and after every
    /// chunk. Cancellation is checked before each chunk fetch and ends the run
    /// early without an error.
    pub async fn run<F>(
        &self,
        descriptor: &QueryDescriptor,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> MirrorResult<SyncReport>
    where
        F: FnMut(Progress) + Send,
    {
        let clock = ThroughputClock::start();
        let mut fetched: u64 = 0;
        let mut total: u64 = 0;

        let cleared = self
            .blocking_store(|store| store.clear())
            .await
            .map_err(|e| e.into_sync_failure(fetched, total))?;
        tracing::info!("Sync started, cleared {} local rows", cleared);

        total = self
            .remote
            .count(&descriptor.filters)
            .await
            .map_err(|e| e.into_sync_failure(fetched, total))?;
        on_progress(clock.observe(fetched, total));

        let mut report = SyncReport {
            fetched,
            total,
            chunks: 0,
            cancelled: false,
            duration_ms: 0,
        };

        if total == 0 {
            tracing::info!("Sync finished: remote subset is empty");
            report.duration_ms = clock.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let mut chunk = descriptor.chunked(self.chunk_size);
        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let rows = self
                .remote
                .fetch_page(&chunk)
                .await
                .map_err(|e| e.into_sync_failure(fetched, total))?;
            let received = rows.len();
            let first_ordinal = fetched;

            if received > 0 {
                self.blocking_upsert(rows, first_ordinal)
                    .await
                    .map_err(|e| e.into_sync_failure(fetched, total))?;
            }

            fetched += received as u64;
            report.chunks += 1;
            let progress = clock.observe(fetched, total);
            tracing::debug!(
                "Sync chunk {}: {} rows ({}/{}, eta {:?})",
                chunk.page,
                received,
                fetched,
                total,
                progress.eta_seconds
            );
            on_progress(progress);

            if received < chunk.page_size || fetched >= total {
                break;
            }
            chunk.page += 1;
        }

        report.fetched = fetched;
        report.total = total;
        report.duration_ms = clock.elapsed().as_millis() as u64;

        if report.cancelled {
            tracing::info!("Sync cancelled after {}/{} rows", fetched, total);
        } else {
            tracing::info!(
                "Sync finished: {} rows in {} chunks ({} ms)",
                fetched,
                report.chunks,
                report.duration_ms
            );
        }
        Ok(report)
    }

    async fn blocking_store<T, F>(&self, f: F) -> MirrorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> MirrorResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| MirrorError::SourceUnavailable(format!("local store task failed: {}", e)))?
    }

    async fn blocking_upsert(&self, rows: Vec<Row>, first_ordinal: u64) -> MirrorResult<usize> {
        self.blocking_store(move |store| store.upsert(&rows, first_ordinal))
            .await
    }
}
