//! Common test utilities
//!
//! Provides shared helpers for:
//! - Creating temporary local stores and sessions
//! - Row fixtures
//! - In-memory row sources with fetch counters and failure injection
//! - An in-process HTTP server standing in for the remote `/data` endpoints

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use rowmirror::adapter::{DataMode, RowSource};
use rowmirror::query::{self, Filters, QueryDescriptor};
use rowmirror::schema::{Column, Row};
use rowmirror::{LocalStore, MirrorError, MirrorResult, Session, SessionConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn create_test_store() -> (Arc<LocalStore>, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::open(tmp_dir.path()).expect("Failed to open local store");
    (Arc::new(store), tmp_dir)
}

/// Session over `remote` with a fresh local store.
pub fn create_test_session(
    remote: Arc<dyn RowSource>,
    config: SessionConfig,
) -> (Arc<Session>, Arc<LocalStore>, TempDir) {
    let (store, tmp_dir) = create_test_store();
    let session = Arc::new(Session::new(remote, store.clone(), config));
    (session, store, tmp_dir)
}

pub fn small_chunks() -> SessionConfig {
    SessionConfig {
        sync_chunk_size: 10,
        export_chunk_size: 4,
        ..SessionConfig::default()
    }
}

// ==================== Fixtures ====================

/// `n` rows, all `Company_Name = "Acme"`, with distinct ids.
pub fn acme_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::new()
                .with(Column::Id, i as u64)
                .with(Column::CompanyName, "Acme")
                .with(Column::FirstName, format!("Person{:05}", i))
                .with(Column::Employees, (i % 50) as u64)
        })
        .collect()
}

/// A small mixed dataset: aliased source keys, rows without an id, an extra
/// column and a duplicated name pair.
pub fn contacts() -> Vec<Row> {
    let raw = json!([
        {"Id": 1, "Company": "Acme Rockets", "FirstName": "Ada", "Surname": "Lovelace",
         "City": "London", "Country": "UK", "Employees": 120},
        {"Id": 2, "company_name": "Globex", "First_Name": "Hank", "Last_Name": "Scorpio",
         "City": "Cypress Creek", "Country": "US", "Headcount": 9000},
        {"Id": 3, "Organization": "Initech", "First_Name": "Peter", "Last_Name": "Gibbons",
         "City": "Austin", "Country": "US", "Employees": "45", "Tier": "gold"},
        {"Email": "Milton@Initech.test", "Company_Name": "Initech", "First_Name": "Milton",
         "City": "Austin", "Country": "US"},
        {"Company_Name": "Acme Rockets", "First_Name": "Wile", "Last_Name": "Coyote",
         "City": "Mesa", "Country": "US", "Employees": 120},
        {"Company_Name": "Acme Rockets", "First_Name": "Wile", "Last_Name": "Coyote",
         "City": "Mesa", "Country": "US", "Employees": 120},
        {"Id": 7, "Company_Name": "Umbrella", "First_Name": "Alice", "Last_Name": "Abernathy",
         "City": "Raccoon City", "Country": "US"},
        {"Id": 8, "Company_Name": "acme supply", "First_Name": "Road", "Last_Name": "Runner",
         "City": "mesa", "Country": "us", "Employees": 3}
    ]);
    serde_json::from_value(raw).expect("fixture rows")
}

pub fn company_names(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r.text(Column::CompanyName).unwrap_or_default())
        .collect()
}

/// Rows as sorted JSON strings, for order-insensitive comparison.
pub fn row_set(rows: &[Row]) -> Vec<String> {
    let mut set: Vec<String> = rows
        .iter()
        .map(|r| serde_json::to_string(r).expect("row json"))
        .collect();
    set.sort();
    set
}

// ==================== In-memory sources ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unavailable,
    Unauthorized,
}

impl Failure {
    fn error(self) -> MirrorError {
        match self {
            Failure::Unavailable => MirrorError::SourceUnavailable("connection reset".to_string()),
            Failure::Unauthorized => MirrorError::Unauthorized("token rejected".to_string()),
        }
    }
}

/// Row source evaluated in memory with the same filter/sort rules as the
/// local store.
pub struct MemorySource {
    mode: DataMode,
    rows: RwLock<Vec<Row>>,
    pub fetches: AtomicUsize,
    pub counts: AtomicUsize,
    fail_fetch_from: Mutex<Option<(usize, Failure)>>,
    offline: Mutex<bool>,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self::with_mode(DataMode::Remote, rows)
    }

    pub fn with_mode(mode: DataMode, rows: Vec<Row>) -> Self {
        Self {
            mode,
            rows: RwLock::new(rows),
            fetches: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            fail_fetch_from: Mutex::new(None),
            offline: Mutex::new(false),
        }
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.write() = rows;
    }

    /// The `n`-th fetch (zero-based) and every later one fail.
    pub fn fail_fetches_from(&self, n: usize, failure: Failure) {
        *self.fail_fetch_from.lock() = Some((n, failure));
    }

    pub fn heal(&self) {
        *self.fail_fetch_from.lock() = None;
        *self.offline.lock() = false;
    }

    /// Every call fails with `SourceUnavailable`.
    pub fn go_offline(&self) {
        *self.offline.lock() = true;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for MemorySource {
    fn mode(&self) -> DataMode {
        self.mode
    }

    async fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock() {
            return Err(Failure::Unavailable.error());
        }
        Ok(self.rows.read().iter().filter(|r| filters.matches(r)).count() as u64)
    }

    async fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock() {
            return Err(Failure::Unavailable.error());
        }
        if let Some((from, failure)) = *self.fail_fetch_from.lock() {
            if n >= from {
                return Err(failure.error());
            }
        }
        let rows = self.rows.read().clone();
        Ok(query::apply(rows, descriptor).1)
    }
}

/// Wraps a [`MemorySource`] and holds fetches of one page until released.
pub struct GatedSource {
    pub inner: MemorySource,
    gated_page: u64,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedSource {
    pub fn new(rows: Vec<Row>, gated_page: u64) -> Self {
        Self {
            inner: MemorySource::new(rows),
            gated_page,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl RowSource for GatedSource {
    fn mode(&self) -> DataMode {
        self.inner.mode()
    }

    async fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        self.inner.count(filters).await
    }

    async fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>> {
        if descriptor.page == self.gated_page {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_page(descriptor).await
    }
}

// ==================== Mock remote server ====================

#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// Answer `/data` with more rows than requested.
    pub oversize: bool,
    /// Answer every request with 500.
    pub broken: bool,
}

#[derive(Clone)]
struct MockState {
    rows: Arc<Vec<Row>>,
    behavior: MockBehavior,
    data_requests: Arc<AtomicUsize>,
}

pub struct MockRemote {
    pub base_url: String,
    pub data_requests: Arc<AtomicUsize>,
}

pub const GOOD_TOKEN: &str = "valid-token";

/// `Bearer expired` or no header answers 401, `Bearer forbidden` answers 403.
fn check_auth(headers: &HeaderMap) -> Result<(), Response> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match auth.strip_prefix("Bearer ") {
        None | Some("expired") => Err((StatusCode::UNAUTHORIZED, "token expired").into_response()),
        Some("forbidden") => Err((StatusCode::FORBIDDEN, "not allowed").into_response()),
        Some(_) => Ok(()),
    }
}

async fn mock_data(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.data_requests.fetch_add(1, Ordering::SeqCst);
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    if state.behavior.broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database on fire").into_response();
    }
    let descriptor = query::plan(&params);
    let rows = if state.behavior.oversize {
        state.rows.as_ref().clone()
    } else {
        query::apply(state.rows.as_ref().clone(), &descriptor).1
    };
    Json(json!({ "rows": rows })).into_response()
}

async fn mock_count(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = check_auth(&headers) {
        return resp;
    }
    if state.behavior.broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database on fire").into_response();
    }
    let descriptor = query::plan(&params);
    let count = state
        .rows
        .iter()
        .filter(|r| descriptor.filters.matches(r))
        .count();
    Json(json!({ "count": count })).into_response()
}

pub async fn spawn_remote(rows: Vec<Row>) -> MockRemote {
    spawn_remote_with(rows, MockBehavior::default()).await
}

pub async fn spawn_remote_with(rows: Vec<Row>, behavior: MockBehavior) -> MockRemote {
    let data_requests = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        rows: Arc::new(rows),
        behavior,
        data_requests: data_requests.clone(),
    };
    let app = Router::new()
        .route("/data", get(mock_data))
        .route("/data/count", get(mock_count))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock remote");
    let addr = listener.local_addr().expect("mock remote addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockRemote {
        base_url: format!("http://{}", addr),
        data_requests,
    }
}
