//! Disk tier persisting raw image bytes across sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{FetchError, FetchResult};

/// Disk cache storing encoded image bytes, one file per key.
///
/// File names are the hex SHA-256 of the normalized cache key, so the
/// scheme-stripped keying carries through to disk. Writes from a previous
/// session are picked up on construction.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Creates a disk cache rooted at `cache_dir`, capped at `max_size` bytes.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be created or scanned.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> FetchResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| FetchError::io(format!("failed to create cache dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| FetchError::io(format!("failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "img")
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        cache.cleanup_if_needed().await;

        Ok(cache)
    }

    /// Creates a cache under the platform cache directory for `namespace`.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be created.
    pub async fn default_location(namespace: &str, max_size: u64) -> FetchResult<Self> {
        let cache_dir = default_cache_dir(namespace);
        Self::new(cache_dir, max_size).await
    }

    /// Returns the file path backing `key`.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.img", key.file_stem()))
    }

    /// Gets the raw encoded bytes for `key`, or None on a miss.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        if let Ok(bytes) = fs::read(&path).await {
            trace!(key = %key, path = %path.display(), "disk cache hit");
            Some(bytes)
        } else {
            trace!(key = %key, "disk cache miss");
            None
        }
    }

    /// Loads and decodes the image for `key`, or None on a miss or a
    /// corrupt entry.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let bytes = self.get_bytes(key).await?;

        let result = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;

        match result {
            Ok(Ok(img)) => {
                debug!(key = %key, "decoded image from disk cache");
                Some(Arc::new(img))
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "failed to decode cached image");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "decode task panicked");
                None
            }
        }
    }

    /// Stores raw encoded bytes for `key`, replacing any prior entry.
    ///
    /// This writes the disk tier only; the memory tier is untouched, which
    /// is what image import relies on.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> FetchResult<()> {
        let path = self.cache_path(key);

        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| FetchError::io(format!("failed to create cache file: {e}")))?;

        file.write_all(bytes)
            .await
            .map_err(|e| FetchError::io(format!("failed to write cache file: {e}")))?;

        file.flush()
            .await
            .map_err(|e| FetchError::io(format!("failed to flush cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.current_size
                    .fetch_sub(old - new_size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(key = %key, size = bytes.len(), "stored image bytes on disk");

        self.cleanup_if_needed().await;

        Ok(())
    }

    /// Removes the entry for `key`. No-op when absent.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "failed to evict from disk cache");
            }
        } else if let Some(s) = size {
            self.current_size.fetch_sub(s, Ordering::Relaxed);
            self.item_count.fetch_sub(1, Ordering::Relaxed);
            debug!(key = %key, "evicted from disk cache");
        }
    }

    /// Removes every cache file.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be read.
    pub async fn clear(&self) -> FetchResult<()> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| FetchError::io(format!("failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::io(format!("failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "img")
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("cleared disk cache");
        Ok(())
    }

    /// Returns true if `key` has an entry on disk.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(&self.cache_path(key)).await.unwrap_or(false)
    }

    /// Returns the current cache size in bytes.
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops oldest-accessed entries while over the size cap.
    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "img") {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                // reads refresh atime where the mount records it; where it
                // does not (noatime), fall back to the write time so the
                // ordering stays deterministic instead of epoch-zero
                let stamp = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, stamp, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.max_size + (self.max_size / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove old cache file");
            } else {
                trace!(path = %path.display(), "removed old cache file");
                freed_size += size;
                freed_count += 1;
            }
        }
        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "disk cache cleanup complete"
        );
    }
}

/// Default per-namespace cache directory.
fn default_cache_dir(namespace: &str) -> PathBuf {
    directories::ProjectDirs::from("dev", "tecknian", "pixfetch").map_or_else(
        || std::env::temp_dir().join("pixfetch").join(namespace),
        |dirs| dirs.cache_dir().join(namespace),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn put_and_get_bytes_round_trip() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/a.png");
        let data = b"raw image data";

        cache.put_bytes(&key, data).await.unwrap();
        let retrieved = cache.get_bytes(&key).await;

        assert_eq!(retrieved.as_deref(), Some(data.as_slice()));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/absent.png");
        assert!(cache.get_bytes(&key).await.is_none());
        assert!(!cache.contains(&key).await);
    }

    #[tokio::test]
    async fn scheme_variants_share_a_file() {
        let (cache, _temp) = create_test_cache().await;
        let http = CacheKey::from_url("http://example.com/a.png");
        let https = CacheKey::from_url("https://example.com/a.png");

        cache.put_bytes(&http, b"data").await.unwrap();

        assert!(cache.contains(&https).await);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_decodes_to_none() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/corrupt.png");

        cache.put_bytes(&key, b"not an image").await.unwrap();

        assert!(cache.get(&key).await.is_none());
        // bytes stay retrievable even when undecodable
        assert!(cache.get_bytes(&key).await.is_some());
    }

    #[tokio::test]
    async fn evict_removes_the_entry() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/a.png");

        cache.put_bytes(&key, b"data").await.unwrap();
        assert!(cache.contains(&key).await);

        cache.evict(&key).await;
        assert!(!cache.contains(&key).await);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn counters_track_overwrites_and_clears() {
        let (cache, _temp) = create_test_cache().await;
        let k1 = CacheKey::from_url("https://example.com/1.png");
        let k2 = CacheKey::from_url("https://example.com/2.png");

        cache.put_bytes(&k1, b"hello").await.unwrap();
        cache.put_bytes(&k2, b"world!").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_size(), 11);

        cache.put_bytes(&k1, b"hey").await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_size(), 9);

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[tokio::test]
    async fn cleanup_drops_oldest_entries() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 10)
            .await
            .unwrap();

        cache
            .put_bytes(&CacheKey::from_url("https://example.com/1.png"), b"123456")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        cache
            .put_bytes(&CacheKey::from_url("https://example.com/2.png"), b"123456")
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 6);
    }

    #[tokio::test]
    async fn cleanup_evicts_unread_entries_in_write_order() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 14)
            .await
            .unwrap();
        let first = CacheKey::from_url("https://example.com/1.png");
        let second = CacheKey::from_url("https://example.com/2.png");
        let third = CacheKey::from_url("https://example.com/3.png");

        cache.put_bytes(&first, b"123456").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cache.put_bytes(&second, b"123456").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cache.put_bytes(&third, b"123456").await.unwrap();

        // third put tips the cache over the cap; only the oldest goes
        assert!(!cache.contains(&first).await);
        assert!(cache.contains(&second).await);
        assert!(cache.contains(&third).await);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn new_cache_picks_up_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let key = CacheKey::from_url("https://example.com/persisted.png");

        {
            let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            cache.put_bytes(&key, b"persisted").await.unwrap();
        }

        let reopened = DiskImageCache::new(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains(&key).await);
    }
}
