use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// Malformed descriptor input that could not be normalized.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport or storage failure in a row source.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Credential rejected by the remote source.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Sync failed after {fetched}/{total} rows: {reason}")]
    SyncFailed {
        fetched: u64,
        total: u64,
        reason: String,
    },

    #[error("Export failed after {fetched}/{total} rows: {reason}")]
    ExportFailed {
        fetched: u64,
        total: u64,
        reason: String,
    },

    /// Another bulk job already holds the job slot.
    #[error("Busy: a {0} job is already running")]
    Busy(String),

    /// The request was overtaken by a newer one before it completed.
    #[error("Request superseded by a newer query")]
    Superseded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type MirrorResult<T> = Result<T, MirrorError>;

impl MirrorError {
    /// Wrap an error raised inside the sync loop. Credential rejections stay
    /// distinct so the caller can send the user back to re-authentication.
    pub fn into_sync_failure(self, fetched: u64, total: u64) -> Self {
        match self {
            MirrorError::Unauthorized(_) | MirrorError::SyncFailed { .. } => self,
            other => MirrorError::SyncFailed {
                fetched,
                total,
                reason: other.to_string(),
            },
        }
    }

    /// Same as [`into_sync_failure`](Self::into_sync_failure) for the export loop.
    pub fn into_export_failure(self, fetched: u64, total: u64) -> Self {
        match self {
            MirrorError::Unauthorized(_) | MirrorError::ExportFailed { .. } => self,
            other => MirrorError::ExportFailed {
                fetched,
                total,
                reason: other.to_string(),
            },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, MirrorError::Unauthorized(_))
    }

    fn type_name(&self) -> &'static str {
        match self {
            MirrorError::Validation(_) => "ValidationError",
            MirrorError::SourceUnavailable(_) => "SourceUnavailable",
            MirrorError::Unauthorized(_) => "Unauthorized",
            MirrorError::SyncFailed { .. } => "SyncFailed",
            MirrorError::ExportFailed { .. } => "ExportFailed",
            MirrorError::Busy(_) => "Busy",
            MirrorError::Superseded => "Superseded",
            MirrorError::Config(_) => "ConfigError",
            MirrorError::Io(_) => "IoError",
            MirrorError::Json(_) => "JsonError",
        }
    }
}

impl serde::Serialize for MirrorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rocksdb::Error> for MirrorError {
    fn from(err: rocksdb::Error) -> Self {
        MirrorError::SourceUnavailable(format!("local store: {}", err))
    }
}

impl From<csv::Error> for MirrorError {
    fn from(err: csv::Error) -> Self {
        MirrorError::Io(std::io::Error::other(err.to_string()))
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MirrorError::Validation(_) => StatusCode::BAD_REQUEST,
            MirrorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MirrorError::Busy(_) => StatusCode::CONFLICT,
            MirrorError::Superseded => StatusCode::GONE,
            MirrorError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            // Default to 500
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
            "type": self.type_name(),
        });

        (status, Json(body)).into_response()
    }
}
