//! Port definitions for image caching and fetching.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, ImageDownload};
use crate::domain::errors::FetchResult;

/// Port for a single cache tier holding decoded images.
/// Implementations must be thread-safe.
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the tier. Returns None on a miss.
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image in the tier.
    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>);

    /// Removes an image from the tier. No-op when absent.
    async fn evict(&self, key: &CacheKey);

    /// Returns true if the tier holds an entry for `key`.
    async fn contains(&self, key: &CacheKey) -> bool;

    /// Removes every entry from the tier.
    async fn clear(&self);

    /// Returns the current number of cached entries.
    fn len(&self) -> usize;

    /// Returns true if the tier is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Port for the fetch facade, so callers can substitute doubles.
#[async_trait::async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Resolves an image for `url`, falling through memory, disk, and
    /// finally the network.
    async fn fetch_image(&self, url: Option<&str>) -> FetchResult<ImageDownload>;

    /// Resolves an image from the cache tiers only. Fails with
    /// `DataNotFound` on a miss; never touches the network.
    async fn cached_image(&self, url: Option<&str>) -> FetchResult<ImageDownload>;

    /// Returns true if either cache tier holds an image for `url`.
    async fn has_image(&self, url: Option<&str>) -> bool;

    /// Removes the cached image for `url` from every tier.
    async fn delete_image(&self, url: Option<&str>);
}
