use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::DataMode;
use crate::cache::PageCacheStats;
use crate::error::{MirrorError, MirrorResult};
use crate::jobs::{JobKind, JobStatus};
use crate::query::{plan, QueryDescriptor, RawParams};
use crate::session::{PageView, Session};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

// ==================== Request / Response Types ====================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: DataMode,
    pub busy: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: DataMode,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub mode: DataMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<DataMode>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Decoded query string: the planned descriptor plus the non-descriptor keys
/// some routes read.
struct RequestParams {
    descriptor: QueryDescriptor,
    raw: RawParams,
}

impl RequestParams {
    fn parse(query: Option<String>) -> MirrorResult<Self> {
        let query = query.unwrap_or_default();
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&query)
            .map_err(|e| MirrorError::Validation(format!("undecodable query string: {}", e)))?;
        let raw: RawParams = pairs.into_iter().collect::<HashMap<_, _>>();
        Ok(Self {
            descriptor: plan(&raw),
            raw,
        })
    }

    fn mode(&self) -> MirrorResult<Option<DataMode>> {
        self.raw
            .get("mode")
            .filter(|m| !m.trim().is_empty())
            .map(|m| DataMode::parse(m))
            .transpose()
    }

    fn flag(&self, key: &str) -> bool {
        self.raw
            .get(key)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// Header naming the caller's session. Requests carrying the same id fence
/// each other; requests without one are never superseded.
pub const SESSION_ID_HEADER: &str = "x-session-id";

fn client_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

// ==================== Handlers ====================

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: state.session.mode(),
        busy: state.session.is_busy(),
    })
}

/// `GET /api/rows`. A request overtaken by a newer one from the same
/// session id answers 410.
pub async fn get_rows(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<PageView>, MirrorError> {
    let params = RequestParams::parse(query)?;
    let refresh = params.flag("refresh");
    let outcome = match client_id(&headers) {
        Some(id) => {
            state
                .session
                .query_as(id, params.descriptor, refresh)
                .await?
        }
        None => state.session.query_detached(params.descriptor, refresh).await?,
    };
    Ok(Json(outcome.into_view()?))
}

pub async fn get_count(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<CountResponse>, MirrorError> {
    let params = RequestParams::parse(query)?;
    let count = state.session.count(&params.descriptor.filters).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn get_mode(State(state): State<AppState>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.session.mode(),
        previous: None,
    })
}

pub async fn put_mode(
    State(state): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Json<ModeResponse> {
    let previous = state.session.set_mode(req.mode);
    Json(ModeResponse {
        mode: req.mode,
        previous: Some(previous),
    })
}

pub async fn get_cache(State(state): State<AppState>) -> Json<PageCacheStats> {
    Json(state.session.page_cache_stats())
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<PageCacheStats> {
    state.session.clear_page_cache();
    Json(state.session.page_cache_stats())
}

/// `POST /api/sync`. Claims the job slot synchronously so a busy slot answers
/// 409, then replicates in the background.
pub async fn start_sync(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<(StatusCode, Json<JobStatus>), MirrorError> {
    let params = RequestParams::parse(query)?;
    let guard = state.session.begin_job(JobKind::Sync)?;
    let status = state.session.job_status();

    let session = state.session.clone();
    let descriptor = params.descriptor;
    tokio::spawn(async move {
        if let Err(e) = session.run_sync(guard, &descriptor).await {
            tracing::error!("Background sync failed: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn get_job(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.session.job_status())
}

pub async fn cancel_job(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.session.cancel_job(),
    })
}

/// `GET /api/export`. Streams the finished CSV as an attachment.
pub async fn export_rows(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, MirrorError> {
    let params = RequestParams::parse(query)?;
    let mode = params.mode()?.unwrap_or_else(|| state.session.mode());
    let artifact = state.session.export(mode, &params.descriptor).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.filename),
        )
        .header("X-Export-Rows", artifact.rows.to_string())
        .header("X-Export-Cancelled", artifact.cancelled.to_string())
        .body(Body::from(artifact.bytes))
        .map_err(|e| MirrorError::Io(std::io::Error::other(format!("failed to build response: {}", e))))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found", "code": 404, "type": "NotFound"})),
    )
}
