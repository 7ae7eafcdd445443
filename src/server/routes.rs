use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::session::Session;

pub fn create_router(session: Arc<Session>) -> Router {
    let state = AppState { session };

    Router::new()
        .route("/health", get(health))
        // Paginated reads
        .route("/api/rows", get(get_rows))
        .route("/api/count", get(get_count))
        .route("/api/mode", get(get_mode).put(put_mode))
        .route("/api/cache", get(get_cache).delete(clear_cache))
        // Bulk jobs
        .route("/api/sync", post(start_sync))
        .route("/api/jobs", get(get_job))
        .route("/api/jobs/cancel", post(cancel_job))
        .route("/api/export", get(export_rows))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
