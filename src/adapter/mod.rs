//! Uniform count/fetch interface over the remote source and the local mirror.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, MirrorResult};
use crate::query::{Filters, QueryDescriptor};
use crate::schema::Row;

pub use local::LocalAdapter;
pub use remote::RemoteAdapter;

/// Which backend serves reads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Remote,
    Local,
}

impl DataMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DataMode::Remote => "remote",
            DataMode::Local => "local",
        }
    }

    pub fn parse(raw: &str) -> MirrorResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "remote" => Ok(DataMode::Remote),
            "local" => Ok(DataMode::Local),
            other => Err(MirrorError::Validation(format!(
                "Unknown data mode: {}. Supported: remote, local",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DataMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paginated row source.
///
/// Both implementations must agree on filter and sort semantics exactly:
/// filter matching is [`Filters::matches`] and ordering is
/// [`crate::query::compare_rows`]. Implementations never clamp the page; a
/// page past the end yields an empty sequence.
#[async_trait]
pub trait RowSource: Send + Sync {
    fn mode(&self) -> DataMode;

    async fn count(&self, filters: &Filters) -> MirrorResult<u64>;

    /// At most `descriptor.page_size` rows.
    async fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>>;
}
