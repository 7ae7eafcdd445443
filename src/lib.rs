pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod jobs;
pub mod query;
pub mod schema;
pub mod server;
pub mod session;
pub mod storage;
pub mod sync;

pub use adapter::{DataMode, LocalAdapter, RemoteAdapter, RowSource};
pub use cache::{PageCache, PageCacheStats, PageKey};
pub use config::MirrorConfig;
pub use error::{MirrorError, MirrorResult};
pub use export::{ExportArtifact, ExportEngine};
pub use jobs::{CancelFlag, JobKind, JobSlot, JobState, JobStatus, Progress};
pub use query::{plan, plan_query_string, Filters, QueryDescriptor, SortDirection};
pub use schema::{Column, Row};
pub use server::create_router;
pub use session::{PageView, QueryOutcome, Session, SessionConfig};
pub use storage::LocalStore;
pub use sync::{SyncEngine, SyncReport};
