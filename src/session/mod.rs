//! The querying session: mode switch, page cache, request fencing and the
//! bulk job slot, all owned by one explicit context object.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::adapter::{DataMode, LocalAdapter, RowSource};
use crate::cache::{PageCache, PageCacheStats, PageKey, DEFAULT_PAGE_CACHE_CAPACITY};
use crate::error::{MirrorError, MirrorResult};
use crate::export::{ExportArtifact, ExportEngine, DEFAULT_EXPORT_CHUNK_SIZE};
use crate::jobs::{JobGuard, JobKind, JobSlot, JobStatus};
use crate::query::{Filters, QueryDescriptor};
use crate::schema::Row;
use crate::storage::LocalStore;
use crate::sync::{SyncEngine, SyncReport, DEFAULT_SYNC_CHUNK_SIZE};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_mode: DataMode,
    pub sync_chunk_size: usize,
    pub export_chunk_size: usize,
    pub page_cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_mode: DataMode::Remote,
            sync_chunk_size: DEFAULT_SYNC_CHUNK_SIZE,
            export_chunk_size: DEFAULT_EXPORT_CHUNK_SIZE,
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
        }
    }
}

/// What the caller currently shows.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub mode: DataMode,
    /// Descriptor actually served, after page clamping.
    pub descriptor: QueryDescriptor,
    pub requested_page: u64,
    pub total: u64,
    pub total_pages: u64,
    pub rows: Vec<Row>,
    pub from_cache: bool,
    pub error: Option<String>,
}

impl PageView {
    pub fn empty(mode: DataMode, descriptor: QueryDescriptor) -> Self {
        Self {
            mode,
            requested_page: descriptor.page,
            descriptor,
            total: 0,
            total_pages: 0,
            rows: Vec::new(),
            from_cache: false,
            error: None,
        }
    }

    fn failed(mode: DataMode, descriptor: QueryDescriptor, error: &MirrorError) -> Self {
        let mut view = Self::empty(mode, descriptor);
        view.error = Some(error.to_string());
        view
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The response matched the current request and is now visible.
    Applied(PageView),
    /// A newer request was issued before this one finished; nothing changed.
    Superseded,
}

impl QueryOutcome {
    pub fn into_view(self) -> MirrorResult<PageView> {
        match self {
            QueryOutcome::Applied(view) => Ok(view),
            QueryOutcome::Superseded => Err(MirrorError::Superseded),
        }
    }
}

type Fence = (DataMode, QueryDescriptor);

/// Upper bound on remembered client views; the least recently used is dropped.
pub const CLIENT_VIEW_CAPACITY: usize = 1024;

/// Request fence and last applied page of one caller.
struct ClientView {
    current: Mutex<Option<Fence>>,
    visible: RwLock<PageView>,
}

impl ClientView {
    fn new(mode: DataMode) -> Self {
        Self {
            current: Mutex::new(None),
            visible: RwLock::new(PageView::empty(mode, QueryDescriptor::default())),
        }
    }
}

/// Adapters, store, page cache and job slot are shared by every caller.
/// Fencing is per view: the session's own view, or one per client id.
pub struct Session {
    remote: Arc<dyn RowSource>,
    local: Arc<dyn RowSource>,
    store: Arc<LocalStore>,
    mode: RwLock<DataMode>,
    page_cache: PageCache,
    view: Arc<ClientView>,
    clients: Mutex<LruCache<String, Arc<ClientView>>>,
    jobs: Arc<JobSlot>,
    config: SessionConfig,
}

impl Session {
    pub fn new(remote: Arc<dyn RowSource>, store: Arc<LocalStore>, config: SessionConfig) -> Self {
        let local: Arc<dyn RowSource> = Arc::new(LocalAdapter::new(store.clone()));
        Self {
            remote,
            local,
            store,
            mode: RwLock::new(config.default_mode),
            page_cache: PageCache::new(config.page_cache_capacity),
            view: Arc::new(ClientView::new(config.default_mode)),
            clients: Mutex::new(LruCache::new(
                NonZeroUsize::new(CLIENT_VIEW_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            jobs: Arc::new(JobSlot::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn mode(&self) -> DataMode {
        *self.mode.read()
    }

    /// Switch the read path. Never waits on a running job.
    pub fn set_mode(&self, mode: DataMode) -> DataMode {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            tracing::info!("Data mode switched from {} to {}", previous, mode);
        }
        previous
    }

    fn source(&self, mode: DataMode) -> &Arc<dyn RowSource> {
        match mode {
            DataMode::Remote => &self.remote,
            DataMode::Local => &self.local,
        }
    }

    pub fn visible(&self) -> PageView {
        self.view.visible.read().clone()
    }

    /// Last applied page of a client, if the client has queried.
    pub fn visible_for(&self, client: &str) -> Option<PageView> {
        let view = self.clients.lock().get(client).cloned()?;
        let visible = view.visible.read().clone();
        Some(visible)
    }

    fn client_view(&self, client: &str) -> Arc<ClientView> {
        let mut clients = self.clients.lock();
        if let Some(view) = clients.get(client) {
            return view.clone();
        }
        let view = Arc::new(ClientView::new(self.mode()));
        clients.put(client.to_string(), view.clone());
        view
    }

    /// Fetch a page in the current mode, serving from the page cache when the
    /// exact request was seen before.
    pub async fn query(&self, descriptor: QueryDescriptor) -> MirrorResult<QueryOutcome> {
        self.run_query(&self.view, descriptor, true).await
    }

    /// Like [`query`](Self::query) but always reads through and overwrites the
    /// cached entry.
    pub async fn refresh(&self, descriptor: QueryDescriptor) -> MirrorResult<QueryOutcome> {
        self.run_query(&self.view, descriptor, false).await
    }

    /// Query on behalf of one client. Only that client's newer requests can
    /// supersede this one.
    pub async fn query_as(
        &self,
        client: &str,
        descriptor: QueryDescriptor,
        refresh: bool,
    ) -> MirrorResult<QueryOutcome> {
        let view = self.client_view(client);
        self.run_query(&view, descriptor, !refresh).await
    }

    /// Query for a caller without an identity. Never superseded and never
    /// recorded as visible anywhere.
    pub async fn query_detached(
        &self,
        descriptor: QueryDescriptor,
        refresh: bool,
    ) -> MirrorResult<QueryOutcome> {
        let view = ClientView::new(self.mode());
        self.run_query(&view, descriptor, !refresh).await
    }

    async fn run_query(
        &self,
        view: &ClientView,
        descriptor: QueryDescriptor,
        use_cache: bool,
    ) -> MirrorResult<QueryOutcome> {
        let mode = self.mode();
        let fence: Fence = (mode, descriptor.clone());
        *view.current.lock() = Some(fence.clone());

        let result = self.load(mode, &descriptor, use_cache).await;
        Self::settle(view, fence, result)
    }

    async fn load(
        &self,
        mode: DataMode,
        descriptor: &QueryDescriptor,
        use_cache: bool,
    ) -> MirrorResult<PageView> {
        let key = PageKey::new(mode, descriptor);
        if use_cache {
            if let Some(hit) = self.page_cache.get(&key) {
                let served = descriptor.clone().with_page(hit.page);
                return Ok(PageView {
                    mode,
                    requested_page: descriptor.page,
                    total_pages: served.total_pages(hit.total),
                    descriptor: served,
                    total: hit.total,
                    rows: hit.rows.as_ref().clone(),
                    from_cache: true,
                    error: None,
                });
            }
        }

        let source = self.source(mode);
        let total = source.count(&descriptor.filters).await?;
        let served = descriptor.clamped_to(total);
        let rows = source.fetch_page(&served).await?;

        let cached = self.page_cache.put(key, rows, total, served.page);
        Ok(PageView {
            mode,
            requested_page: descriptor.page,
            total_pages: served.total_pages(total),
            descriptor: served,
            total,
            rows: cached.rows.as_ref().clone(),
            from_cache: false,
            error: None,
        })
    }

    /// Apply a finished request only if it is still the current one.
    fn settle(
        view: &ClientView,
        fence: Fence,
        result: MirrorResult<PageView>,
    ) -> MirrorResult<QueryOutcome> {
        let current = view.current.lock();
        if current.as_ref() != Some(&fence) {
            tracing::debug!(
                "Discarding superseded {} response for page {}",
                fence.0,
                fence.1.page
            );
            return Ok(QueryOutcome::Superseded);
        }

        match result {
            Ok(page) => {
                *view.visible.write() = page.clone();
                Ok(QueryOutcome::Applied(page))
            }
            Err(e) => {
                tracing::warn!("Page fetch failed ({}): {}", fence.0, e);
                *view.visible.write() = PageView::failed(fence.0, fence.1, &e);
                Err(e)
            }
        }
    }

    pub async fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        self.source(self.mode()).count(filters).await
    }

    pub fn clear_page_cache(&self) {
        self.page_cache.clear();
        tracing::info!("Page cache cleared");
    }

    pub fn page_cache_stats(&self) -> PageCacheStats {
        self.page_cache.stats()
    }

    /// Claim the job slot. Fails with `Busy` while another job runs.
    pub fn begin_job(&self, kind: JobKind) -> MirrorResult<JobGuard> {
        self.jobs.acquire(kind)
    }

    pub async fn sync(&self, descriptor: &QueryDescriptor) -> MirrorResult<SyncReport> {
        let guard = self.begin_job(JobKind::Sync)?;
        self.run_sync(guard, descriptor).await
    }

    /// Run a sync under an already acquired guard.
    pub async fn run_sync(
        &self,
        guard: JobGuard,
        descriptor: &QueryDescriptor,
    ) -> MirrorResult<SyncReport> {
        let engine = SyncEngine::new(self.remote.clone(), self.store.clone())
            .with_chunk_size(self.config.sync_chunk_size);
        let cancel = guard.cancel_flag();
        let result = engine
            .run(descriptor, &cancel, |progress| guard.report_progress(progress))
            .await;

        match result {
            Ok(report) => {
                if report.cancelled {
                    guard.cancelled(report.progress());
                } else {
                    guard.complete(report.progress());
                }
                Ok(report)
            }
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn export(
        &self,
        mode: DataMode,
        descriptor: &QueryDescriptor,
    ) -> MirrorResult<ExportArtifact> {
        let guard = self.begin_job(JobKind::Export)?;
        self.run_export(guard, mode, descriptor).await
    }

    pub async fn run_export(
        &self,
        guard: JobGuard,
        mode: DataMode,
        descriptor: &QueryDescriptor,
    ) -> MirrorResult<ExportArtifact> {
        let engine = ExportEngine::new().with_chunk_size(self.config.export_chunk_size);
        let cancel = guard.cancel_flag();
        let source = self.source(mode).clone();
        let result = engine
            .export_all(source.as_ref(), descriptor, &cancel, |progress| {
                guard.report_progress(progress)
            })
            .await;

        match result {
            Ok(artifact) => {
                if artifact.cancelled {
                    guard.cancelled(artifact.progress());
                } else {
                    guard.complete(artifact.progress());
                }
                Ok(artifact)
            }
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }

    pub fn cancel_job(&self) -> bool {
        self.jobs.cancel()
    }

    pub fn job_status(&self) -> JobStatus {
        self.jobs.status()
    }

    pub fn subscribe_jobs(&self) -> watch::Receiver<JobStatus> {
        self.jobs.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.jobs.is_busy()
    }
}
