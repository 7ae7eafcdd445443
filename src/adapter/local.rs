use async_trait::async_trait;
use std::sync::Arc;

use super::{DataMode, RowSource};
use crate::error::{MirrorError, MirrorResult};
use crate::query::{Filters, QueryDescriptor};
use crate::schema::Row;
use crate::storage::LocalStore;

/// Serves reads from the local mirror. Scans run on the blocking pool.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    store: Arc<LocalStore>,
}

impl LocalAdapter {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }
}

async fn blocking<T, F>(f: F) -> MirrorResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> MirrorResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MirrorError::SourceUnavailable(format!("local scan aborted: {}", e)))?
}

#[async_trait]
impl RowSource for LocalAdapter {
    fn mode(&self) -> DataMode {
        DataMode::Local
    }

    async fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        let store = self.store.clone();
        let filters = filters.clone();
        blocking(move || store.count(&filters)).await
    }

    async fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>> {
        let store = self.store.clone();
        let descriptor = descriptor.clone();
        blocking(move || store.fetch_page(&descriptor)).await
    }
}
