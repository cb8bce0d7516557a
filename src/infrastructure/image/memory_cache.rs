//! In-memory LRU cache of decoded images.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// LRU cache of decoded images keyed by normalized URL.
/// Thread-safe and optimized for frequent reads.
pub struct MemoryImageCache {
    cache: RwLock<LruCache<CacheKey, Arc<image::DynamicImage>>>,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity` images.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(cap)),
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    /// Cache-only lookups use this so they leave recency untouched.
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let cache = self.cache.read().await;
        cache.peek(key).cloned()
    }
}

#[async_trait::async_trait]
impl ImageCachePort for MemoryImageCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let mut cache = self.cache.write().await;
        if let Some(img) = cache.get(key) {
            trace!(key = %key, "memory cache hit");
            Some(img.clone())
        } else {
            trace!(key = %key, "memory cache miss");
            None
        }
    }

    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) {
        let mut cache = self.cache.write().await;
        debug!(key = %key, "storing image in memory cache");
        cache.put(key, image);
    }

    async fn evict(&self, key: &CacheKey) {
        let mut cache = self.cache.write().await;
        if cache.pop(key).is_some() {
            debug!(key = %key, "evicted image from memory cache");
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let cache = self.cache.read().await;
        cache.contains(key)
    }

    async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        debug!("cleared memory image cache");
    }

    fn len(&self) -> usize {
        // Best-effort under concurrent writers.
        self.cache.try_read().map(|c| c.len()).unwrap_or(0)
    }
}
