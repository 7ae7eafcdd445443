//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags (applied by the binary).
//!
//! ## Environment Variables
//!
//! - `ROWMIRROR_REMOTE_URL` - Base URL of the remote `/data` endpoints
//! - `ROWMIRROR_TOKEN` - Bearer token for the remote source
//! - `ROWMIRROR_DATA_DIR` - Local store directory
//! - `ROWMIRROR_PORT` - HTTP port for `serve`
//! - `ROWMIRROR_MODE` - Default data mode (`remote` or `local`)
//!
//! These can be set in a `.env` file in the working directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::remote::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::adapter::DataMode;
use crate::cache::DEFAULT_PAGE_CACHE_CAPACITY;
use crate::error::{MirrorError, MirrorResult};
use crate::export::DEFAULT_EXPORT_CHUNK_SIZE;
use crate::query::descriptor::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::session::SessionConfig;
use crate::sync::DEFAULT_SYNC_CHUNK_SIZE;

pub const ENV_REMOTE_URL: &str = "ROWMIRROR_REMOTE_URL";
pub const ENV_TOKEN: &str = "ROWMIRROR_TOKEN";
pub const ENV_DATA_DIR: &str = "ROWMIRROR_DATA_DIR";
pub const ENV_PORT: &str = "ROWMIRROR_PORT";
pub const ENV_MODE: &str = "ROWMIRROR_MODE";

pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_PORT: u16 = 7070;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Base URL of the remote source
    pub remote_url: String,
    /// Bearer token for the remote source
    pub token: Option<String>,
    /// Local store directory
    pub data_dir: PathBuf,
    /// HTTP port for the session API
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Rows per sync request, at most 10,000
    pub sync_chunk_size: usize,
    /// Rows per export request, at most 10,000
    pub export_chunk_size: usize,
    pub page_cache_capacity: usize,
    pub default_mode: DataMode,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            token: None,
            data_dir: PathBuf::from("./rowmirror-data"),
            port: DEFAULT_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            sync_chunk_size: DEFAULT_SYNC_CHUNK_SIZE,
            export_chunk_size: DEFAULT_EXPORT_CHUNK_SIZE,
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            default_mode: DataMode::Remote,
        }
    }
}

impl MirrorConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> MirrorResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> MirrorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> MirrorResult<Self> {
        toml::from_str(content).map_err(|e| MirrorError::Config(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any variable lookup. Empty or unparsable values
    /// are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_REMOTE_URL) {
            self.remote_url = url;
        }

        if let Some(token) = get(ENV_TOKEN) {
            self.token = Some(token);
        }

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(port) = get(ENV_PORT) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}={}", ENV_PORT, port),
            }
        }

        if let Some(mode) = get(ENV_MODE) {
            match DataMode::parse(&mode) {
                Ok(mode) => self.default_mode = mode,
                Err(e) => tracing::warn!("Ignoring {}: {}", ENV_MODE, e),
            }
        }
    }

    pub fn validate(&self) -> MirrorResult<()> {
        if self.remote_url.trim().is_empty() {
            return Err(MirrorError::Config("remote_url must not be empty".to_string()));
        }
        for (name, size) in [
            ("sync_chunk_size", self.sync_chunk_size),
            ("export_chunk_size", self.export_chunk_size),
        ] {
            if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
                return Err(MirrorError::Config(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_PAGE_SIZE, MAX_PAGE_SIZE, size
                )));
            }
        }
        if self.page_cache_capacity == 0 {
            return Err(MirrorError::Config(
                "page_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(MirrorError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_mode: self.default_mode,
            sync_chunk_size: self.sync_chunk_size,
            export_chunk_size: self.export_chunk_size,
            page_cache_capacity: self.page_cache_capacity,
        }
    }
}
