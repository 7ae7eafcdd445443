//! Exact-match cache of already-visited pages.
//!
//! Entries are keyed by data mode plus the descriptor's canonical query
//! string. Nothing invalidates them except eviction and an explicit
//! [`PageCache::clear`]; writes from sync leave cached pages stale.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::adapter::DataMode;
use crate::query::QueryDescriptor;
use crate::schema::Row;

pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 256;

/// Configuration for the page cache
#[derive(Debug, Clone)]
pub struct PageCacheConfig {
    /// Maximum number of pages kept
    pub capacity: usize,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PAGE_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub mode: DataMode,
    pub query: String,
}

impl PageKey {
    pub fn new(mode: DataMode, descriptor: &QueryDescriptor) -> Self {
        Self {
            mode,
            query: descriptor.cache_key(),
        }
    }
}

/// A fetched page together with the count observed alongside it.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub rows: Arc<Vec<Row>>,
    pub total: u64,
    /// Page actually served after clamping.
    pub page: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct PageCache {
    cache: Mutex<LruCache<PageKey, CachedPage>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(bound)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_config(config: &PageCacheConfig) -> Self {
        Self::new(config.capacity)
    }

    pub fn get(&self, key: &PageKey) -> Option<CachedPage> {
        let hit = self.cache.lock().get(key).cloned();
        match hit {
            Some(page) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Page cache hit ({} {})", key.mode, key.query);
                Some(page)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: PageKey, rows: Vec<Row>, total: u64, page: u64) -> CachedPage {
        let entry = CachedPage {
            rows: Arc::new(rows),
            total,
            page,
        };
        self.cache.lock().put(key, entry.clone());
        entry
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.cache.lock().contains(key)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PageCacheStats {
        PageCacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::with_config(&PageCacheConfig::default())
    }
}
