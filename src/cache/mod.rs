pub mod page_cache;

pub use page_cache::{
    CachedPage, PageCache, PageCacheConfig, PageCacheStats, PageKey, DEFAULT_PAGE_CACHE_CAPACITY,
};
