use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::adapter::{DataMode, RowSource};
use crate::error::{MirrorError, MirrorResult};
use crate::jobs::{CancelFlag, Progress, ThroughputClock};
use crate::query::QueryDescriptor;
use crate::schema::{display_value, Column, Row};

pub const DEFAULT_EXPORT_CHUNK_SIZE: usize = 2_000;

/// A materialized CSV export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub filename: String,
    pub mode: DataMode,
    pub columns: Vec<String>,
    pub rows: u64,
    pub total: u64,
    pub bytes: Vec<u8>,
    /// The drain stopped early; `bytes` holds only the rows read so far.
    pub cancelled: bool,
}

impl ExportArtifact {
    pub fn progress(&self) -> Progress {
        Progress {
            fetched: self.rows,
            total: self.total,
            eta_seconds: if self.cancelled { None } else { Some(0.0) },
        }
    }
}

/// Drains a row source in chunks into one CSV table. Never writes to the
/// local store or the page cache.
#[derive(Debug, Clone)]
pub struct ExportEngine {
    chunk_size: usize,
}

impl Default for ExportEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_EXPORT_CHUNK_SIZE,
        }
    }
}

impl ExportEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn export_all<F>(
        &self,
        source: &dyn RowSource,
        descriptor: &QueryDescriptor,
        cancel: &CancelFlag,
        mut on_progress: F,
    ) -> MirrorResult<ExportArtifact>
    where
        F: FnMut(Progress) + Send,
    {
        let mode = source.mode();
        let clock = ThroughputClock::start();
        let mut rows: Vec<Row> = Vec::new();
        let mut extras = ExtraColumns::default();

        let total = source
            .count(&descriptor.filters)
            .await
            .map_err(|e| e.into_export_failure(0, 0))?;
        on_progress(clock.observe(0, total));
        tracing::info!("Export from {} started: {} matching rows", mode, total);

        let mut chunk = descriptor.chunked(self.chunk_size);
        let mut cancelled = false;
        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let batch = source
                .fetch_page(&chunk)
                .await
                .map_err(|e| e.into_export_failure(rows.len() as u64, total))?;
            let received = batch.len();
            for row in &batch {
                extras.observe(row);
            }
            rows.extend(batch);

            let progress = clock.observe(rows.len() as u64, total.max(rows.len() as u64));
            tracing::debug!(
                "Export chunk {}: {} rows ({}/{})",
                chunk.page,
                received,
                rows.len(),
                total
            );
            on_progress(progress);

            if received < chunk.page_size {
                break;
            }
            chunk.page += 1;
        }

        let columns = header(&extras.into_vec());
        let bytes = render_csv(&columns, &rows)
            .map_err(|e| e.into_export_failure(rows.len() as u64, total))?;

        let artifact = ExportArtifact {
            filename: export_filename(mode, Utc::now()),
            mode,
            columns,
            rows: rows.len() as u64,
            total,
            bytes,
            cancelled,
        };
        tracing::info!(
            "Export from {} {}: {} rows, {} bytes",
            mode,
            if cancelled { "cancelled" } else { "finished" },
            artifact.rows,
            artifact.bytes.len()
        );
        Ok(artifact)
    }
}

#[derive(Default)]
struct ExtraColumns {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl ExtraColumns {
    fn observe(&mut self, row: &Row) {
        for key in row.extra_keys() {
            if self.seen.insert(key.clone()) {
                self.order.push(key.clone());
            }
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Known schema in fixed order, then extra columns in first-seen order.
pub fn header(extras: &[String]) -> Vec<String> {
    Column::ALL
        .iter()
        .map(|c| c.name().to_string())
        .chain(extras.iter().cloned())
        .collect()
}

pub fn render_csv(columns: &[String], rows: &[Row]) -> MirrorResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(
            columns
                .iter()
                .map(|c| row.get_field(c).map(display_value).unwrap_or_default()),
        )?;
    }
    writer
        .into_inner()
        .map_err(|e| MirrorError::Io(std::io::Error::other(e.to_string())))
}

/// `rows_<mode>_<YYYYMMDDTHHMMSSZ>.csv`
pub fn export_filename(mode: DataMode, at: DateTime<Utc>) -> String {
    format!("rows_{}_{}.csv", mode, at.format("%Y%m%dT%H%M%SZ"))
}
