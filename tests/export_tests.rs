//! Export Engine Tests
//! Chunk draining, CSV layout, cancellation, failure and convergence with sync

mod common;

use common::*;
use rowmirror::adapter::DataMode;
use rowmirror::export::ExportEngine;
use rowmirror::jobs::{CancelFlag, JobState};
use rowmirror::query::QueryDescriptor;
use rowmirror::schema::Column;
use rowmirror::MirrorError;
use std::sync::Arc;

fn csv_lines(bytes: &[u8]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes);
    let headers = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    let records = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, records)
}

fn sorted(mut records: Vec<Vec<String>>) -> Vec<Vec<String>> {
    records.sort();
    records
}

#[tokio::test]
async fn test_export_header_and_extra_columns() {
    let remote = MemorySource::new(contacts());
    let artifact = ExportEngine::new()
        .with_chunk_size(3)
        .export_all(&remote, &QueryDescriptor::new(), &CancelFlag::new(), |_| {})
        .await
        .unwrap();

    let (headers, records) = csv_lines(&artifact.bytes);
    let mut expected: Vec<String> = Column::ALL.iter().map(|c| c.name().to_string()).collect();
    expected.push("Tier".to_string());
    assert_eq!(headers, expected);
    assert_eq!(artifact.columns, expected);
    assert_eq!(records.len(), 8);
    assert_eq!(artifact.rows, 8);
    assert_eq!(artifact.total, 8);
    assert!(!artifact.cancelled);
    assert_eq!(artifact.mode, DataMode::Remote);
    assert!(artifact.filename.starts_with("rows_remote_"));
    assert!(artifact.filename.ends_with(".csv"));

    let tier = headers.len() - 1;
    let gold: Vec<_> = records.iter().filter(|r| r[tier] == "gold").collect();
    assert_eq!(gold.len(), 1);
    assert_eq!(gold[0][2], "Peter");
}

#[tokio::test]
async fn test_export_respects_filters_and_sort() {
    let remote = MemorySource::new(contacts());
    let descriptor = QueryDescriptor::new()
        .with_filter(Column::CompanyName, "acme")
        .with_sort(Column::FirstName, rowmirror::SortDirection::Asc);

    let artifact = ExportEngine::new()
        .export_all(&remote, &descriptor, &CancelFlag::new(), |_| {})
        .await
        .unwrap();
    let (_, records) = csv_lines(&artifact.bytes);
    let first_names: Vec<&str> = records.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(first_names, vec!["Ada", "Road", "Wile", "Wile"]);
}

#[tokio::test]
async fn test_export_drains_until_short_chunk() {
    let remote = MemorySource::new(acme_rows(8));
    let mut updates = Vec::new();
    let artifact = ExportEngine::new()
        .with_chunk_size(4)
        .export_all(&remote, &QueryDescriptor::new(), &CancelFlag::new(), |p| {
            updates.push(p.fetched)
        })
        .await
        .unwrap();

    assert_eq!(artifact.rows, 8);
    // the empty third chunk is what ends the drain
    assert_eq!(remote.fetch_count(), 3);
    assert_eq!(updates, vec![0, 4, 8, 8]);
}

#[tokio::test]
async fn test_export_ignores_interactive_page() {
    let remote = MemorySource::new(acme_rows(30));
    let descriptor = QueryDescriptor::new().with_page(3).with_page_size(5);

    let artifact = ExportEngine::new()
        .with_chunk_size(7)
        .export_all(&remote, &descriptor, &CancelFlag::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(artifact.rows, 30);
}

#[tokio::test]
async fn test_export_cancel_returns_partial_artifact() {
    let remote = MemorySource::new(acme_rows(50));
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();

    let artifact = ExportEngine::new()
        .with_chunk_size(10)
        .export_all(&remote, &QueryDescriptor::new(), &cancel, move |p| {
            if p.fetched >= 20 {
                trigger.cancel();
            }
        })
        .await
        .unwrap();

    assert!(artifact.cancelled);
    assert_eq!(artifact.rows, 20);
    assert_eq!(artifact.total, 50);
    assert_eq!(remote.fetch_count(), 2);
    let (_, records) = csv_lines(&artifact.bytes);
    assert_eq!(records.len(), 20);
}

#[tokio::test]
async fn test_export_failure_reports_partial_progress() {
    let remote = MemorySource::new(acme_rows(50));
    remote.fail_fetches_from(2, Failure::Unavailable);

    let err = ExportEngine::new()
        .with_chunk_size(10)
        .export_all(&remote, &QueryDescriptor::new(), &CancelFlag::new(), |_| {})
        .await
        .unwrap_err();
    match err {
        MirrorError::ExportFailed {
            fetched,
            total,
            reason,
        } => {
            assert_eq!(fetched, 20);
            assert_eq!(total, 50);
            assert!(reason.contains("connection reset"));
        }
        other => panic!("expected ExportFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_export_unauthorized_is_not_wrapped() {
    let remote = MemorySource::new(acme_rows(5));
    remote.fail_fetches_from(0, Failure::Unauthorized);

    let err = ExportEngine::new()
        .export_all(&remote, &QueryDescriptor::new(), &CancelFlag::new(), |_| {})
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_export_of_empty_result_has_header_only() {
    let remote = MemorySource::new(acme_rows(5));
    let descriptor = QueryDescriptor::new().with_filter(Column::City, "atlantis");

    let artifact = ExportEngine::new()
        .export_all(&remote, &descriptor, &CancelFlag::new(), |_| {})
        .await
        .unwrap();
    let (headers, records) = csv_lines(&artifact.bytes);
    assert_eq!(headers.len(), Column::ALL.len());
    assert!(records.is_empty());
    assert_eq!(artifact.total, 0);
}

#[tokio::test]
async fn test_session_export_leaves_store_and_cache_alone() {
    let remote = Arc::new(MemorySource::new(contacts()));
    let (session, store, _tmp) = create_test_session(remote, small_chunks());

    let artifact = session
        .export(DataMode::Remote, &QueryDescriptor::new())
        .await
        .unwrap();
    assert_eq!(artifact.rows, 8);
    assert!(store.is_empty().unwrap());
    assert_eq!(session.page_cache_stats().entries, 0);

    let status = session.job_status();
    assert_eq!(status.kind, Some(rowmirror::JobKind::Export));
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress.fetched, 8);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_session_export_failure_publishes_failed_state() {
    let remote = Arc::new(MemorySource::new(acme_rows(20)));
    remote.fail_fetches_from(1, Failure::Unavailable);
    let (session, _store, _tmp) = create_test_session(remote, small_chunks());

    let err = session
        .export(DataMode::Remote, &QueryDescriptor::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::ExportFailed { fetched: 4, .. }));
    assert_eq!(session.job_status().state, JobState::Failed);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_local_export_after_sync_matches_remote_export() {
    let remote = Arc::new(MemorySource::new(contacts()));
    let (session, _store, _tmp) = create_test_session(remote, small_chunks());
    let descriptor = QueryDescriptor::new().with_filter(Column::Country, "us");

    session.sync(&descriptor).await.unwrap();
    let from_remote = session.export(DataMode::Remote, &descriptor).await.unwrap();
    let from_local = session.export(DataMode::Local, &descriptor).await.unwrap();

    assert_eq!(from_local.mode, DataMode::Local);
    assert_eq!(from_local.rows, 7);
    assert_eq!(from_local.columns, from_remote.columns);
    let (_, remote_records) = csv_lines(&from_remote.bytes);
    let (_, local_records) = csv_lines(&from_local.bytes);
    assert_eq!(sorted(local_records), sorted(remote_records));
}
