use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{DataMode, RowSource};
use crate::error::{MirrorError, MirrorResult};
use crate::query::{Filters, QueryDescriptor};
use crate::schema::Row;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RowsResponse {
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Reads pages from the remote `/data` endpoints.
///
/// Holds nothing but the HTTP client, the base URL and the bearer token.
pub struct RemoteAdapter {
    base_url: String,
    token: RwLock<Option<String>>,
    client: Client,
}

impl RemoteAdapter {
    pub fn new(base_url: &str, token: Option<String>) -> MirrorResult<Self> {
        Self::with_timeout(
            base_url,
            token,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> MirrorResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(MirrorError::Config("remote URL must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token: RwLock::new(token.filter(|t| !t.is_empty())),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer credential, e.g. after re-authentication.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|t| !t.is_empty());
    }

    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    async fn get<T>(&self, path: &str, params: &[(String, String)]) -> MirrorResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(params);
        let token = self.token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MirrorError::SourceUnavailable(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, path, &body));
        }

        response.json::<T>().await.map_err(|e| {
            MirrorError::SourceUnavailable(format!("GET {}: malformed response: {}", path, e))
        })
    }
}

/// 401 is a transport-level failure; 403 is a credential rejection.
fn map_status(status: StatusCode, path: &str, body: &str) -> MirrorError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {} {}", status, path)
    } else {
        format!("HTTP {} {}: {}", status, path, body.trim())
    };
    match status {
        StatusCode::FORBIDDEN => MirrorError::Unauthorized(detail),
        _ => MirrorError::SourceUnavailable(detail),
    }
}

#[async_trait]
impl RowSource for RemoteAdapter {
    fn mode(&self) -> DataMode {
        DataMode::Remote
    }

    async fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        let params = QueryDescriptor::filter_pairs(filters);
        let response: CountResponse = self.get("/data/count", &params).await?;
        Ok(response.count)
    }

    async fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>> {
        let response: RowsResponse = self.get("/data", &descriptor.query_pairs()).await?;
        let mut rows = response.rows;
        let page_size = descriptor.effective_page_size();
        if rows.len() > page_size {
            tracing::warn!(
                "Remote returned {} rows for page size {}, truncating",
                rows.len(),
                page_size
            );
            rows.truncate(page_size);
        }
        tracing::debug!(
            "Fetched {} remote rows (page {}, size {})",
            rows.len(),
            descriptor.page,
            page_size
        );
        Ok(rows)
    }
}
