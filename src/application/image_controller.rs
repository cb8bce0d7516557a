//! Fetch facade composing the cache tiers, downloader, and registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CacheKey, ImageDownload, ImageOrigin};
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{ImageCachePort, ImageFetcherPort};
use crate::infrastructure::config::FetcherConfig;
use crate::infrastructure::image::cancel::{CancelHandle, CancelRegistry};
use crate::infrastructure::image::disk_cache::DiskImageCache;
use crate::infrastructure::image::downloader::ImageDownloader;
use crate::infrastructure::image::memory_cache::MemoryImageCache;

/// Image fetch and cache facade.
///
/// One controller per cache namespace; clones share the tiers and the
/// cancellation registry. Dropping the last clone cancels everything still
/// in flight.
#[derive(Clone)]
pub struct ImageController {
    inner: Arc<Inner>,
}

struct Inner {
    namespace: String,
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    downloader: ImageDownloader,
    registry: CancelRegistry,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.registry.cancel_all();
    }
}

impl std::fmt::Debug for ImageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageController")
            .field("namespace", &self.inner.namespace)
            .finish_non_exhaustive()
    }
}

impl ImageController {
    /// Creates a controller over an explicit disk cache.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: FetcherConfig, disk: Arc<DiskImageCache>) -> FetchResult<Self> {
        let downloader =
            ImageDownloader::new(config.timeout, config.max_concurrent_downloads)?;
        Ok(Self {
            inner: Arc::new(Inner {
                namespace: config.namespace,
                memory: Arc::new(MemoryImageCache::new(config.memory_cache_size)),
                disk,
                downloader,
                registry: CancelRegistry::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Creates a controller with its disk cache in the default location
    /// for the configured namespace.
    ///
    /// # Errors
    /// Returns an error if the cache directory or HTTP client cannot be
    /// created.
    pub async fn with_default_cache(config: FetcherConfig) -> FetchResult<Self> {
        let disk = Arc::new(
            DiskImageCache::default_location(&config.namespace, config.disk_cache_size).await?,
        );
        Self::new(config, disk)
    }

    /// The namespace this controller caches under.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Marks the controller torn down and cancels every in-flight fetch.
    /// Subsequent fetches and cascades fail with `FetchCancelled`.
    pub fn close(&self) {
        debug!(namespace = %self.inner.namespace, "closing image controller");
        self.inner.closed.store(true, Ordering::Release);
        self.inner.registry.cancel_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Rejects missing or blank URLs before any I/O happens.
    fn validate<'a>(url: Option<&'a str>) -> FetchResult<(&'a str, CacheKey)> {
        match url {
            Some(u) if !u.trim().is_empty() => Ok((u, CacheKey::from_url(u))),
            _ => Err(FetchError::InvalidOrEmptyUrl),
        }
    }

    // ---- cascading fetch ----

    /// Resolves the best available image for `main_url`, improving over
    /// time via `placeholder_url`.
    ///
    /// - If the main image is already cached, it is returned immediately
    ///   through `on_main` and the placeholder is never consulted.
    /// - Otherwise the placeholder is looked up in cache only; a hit goes
    ///   to `on_placeholder`, any failure is absorbed.
    /// - The main image is then fetched; success goes to `on_main`,
    ///   failure propagates to the caller.
    ///
    /// # Errors
    /// Fails with the main fetch's error, or `FetchCancelled` once the
    /// controller is closed.
    pub async fn cascading_fetch<M, P>(
        &self,
        main_url: Option<&str>,
        placeholder_url: Option<&str>,
        mut on_main: M,
        mut on_placeholder: P,
    ) -> FetchResult<()>
    where
        M: FnMut(ImageDownload),
        P: FnMut(ImageDownload),
    {
        if self.has_image(main_url).await {
            let download = self.cached_image(main_url).await?;
            on_main(download);
            return Ok(());
        }

        match self.cached_image(placeholder_url).await {
            Ok(placeholder) => on_placeholder(placeholder),
            Err(error) => {
                // placeholder failure is never fatal to the cascade
                trace!(error = %error, "placeholder lookup failed, continuing");
            }
        }

        if self.is_closed() {
            return Err(FetchError::FetchCancelled);
        }

        let download = self.fetch_image(main_url).await?;
        on_main(download);
        Ok(())
    }

    // ---- simple fetching ----

    async fn fetch_image_inner(&self, url: &str, key: &CacheKey) -> FetchResult<ImageDownload> {
        // closed controllers refuse all work, cached or not
        if self.is_closed() {
            return Err(FetchError::FetchCancelled);
        }

        if let Some(image) = self.inner.memory.get(key).await {
            return Ok(ImageDownload {
                url: url.to_string(),
                image,
                origin: ImageOrigin::Memory,
            });
        }

        let registration = self.inner.registry.register(key);

        if let Some(image) = self.disk_lookup(key, registration.handle()).await? {
            self.inner.memory.put(key.clone(), image.clone()).await;
            return Ok(ImageDownload {
                url: url.to_string(),
                image,
                origin: ImageOrigin::Disk,
            });
        }

        if self.is_closed() {
            return Err(FetchError::FetchCancelled);
        }

        let bytes = self
            .inner
            .downloader
            .fetch(url, key, registration.handle())
            .await?;

        // persist encoded bytes off the fetch path
        let disk = Arc::clone(&self.inner.disk);
        let key_for_disk = key.clone();
        let bytes_for_disk = bytes.clone();
        tokio::spawn(async move {
            if let Err(e) = disk.put_bytes(&key_for_disk, &bytes_for_disk).await {
                warn!(key = %key_for_disk, error = %e, "failed to store image on disk");
            }
        });

        let image = decode_image(bytes, registration.handle()).await?;
        self.inner.memory.put(key.clone(), image.clone()).await;

        debug!(key = %key, "image fetched from network");
        Ok(ImageDownload {
            url: url.to_string(),
            image,
            origin: ImageOrigin::Network,
        })
    }

    async fn cached_image_inner(&self, url: &str, key: &CacheKey) -> FetchResult<ImageDownload> {
        if self.is_closed() {
            return Err(FetchError::FetchCancelled);
        }

        // non-promoting peek keeps cache-only reads from reshuffling the LRU
        if let Some(image) = self.inner.memory.peek(key).await {
            return Ok(ImageDownload {
                url: url.to_string(),
                image,
                origin: ImageOrigin::Memory,
            });
        }

        let registration = self.inner.registry.register(key);

        match self.disk_lookup(key, registration.handle()).await? {
            Some(image) => Ok(ImageDownload {
                url: url.to_string(),
                image,
                origin: ImageOrigin::Disk,
            }),
            None => Err(FetchError::DataNotFound),
        }
    }

    /// Disk read raced against the request's cancel handle.
    async fn disk_lookup(
        &self,
        key: &CacheKey,
        cancel: &CancelHandle,
    ) -> FetchResult<Option<Arc<image::DynamicImage>>> {
        tokio::select! {
            () = cancel.cancelled() => Err(FetchError::FetchCancelled),
            image = self.inner.disk.get(key) => Ok(image),
        }
    }

    // ---- caching ----

    /// Returns true if the memory tier holds an image for `url`.
    pub async fn has_image_in_memory(&self, url: Option<&str>) -> bool {
        let Ok((_, key)) = Self::validate(url) else {
            return false;
        };
        self.inner.memory.contains(&key).await
    }

    /// Returns true if the disk tier holds an image for `url`.
    pub async fn has_image_on_disk(&self, url: Option<&str>) -> bool {
        let Ok((_, key)) = Self::validate(url) else {
            return false;
        };
        self.inner.disk.contains(&key).await
    }

    /// Raw encoded bytes cached on disk for `url`, or None.
    pub async fn disk_data(&self, url: Option<&str>) -> Option<Vec<u8>> {
        let (_, key) = Self::validate(url).ok()?;
        self.inner.disk.get_bytes(&key).await
    }

    /// Writes encoded bytes straight into the disk tier for `url`,
    /// bypassing the memory cache.
    ///
    /// # Errors
    /// Fails with `InvalidOrEmptyUrl` or a disk `Io` error.
    pub async fn import_image(&self, url: Option<&str>, bytes: &[u8]) -> FetchResult<()> {
        let (_, key) = Self::validate(url)?;
        self.inner.disk.put_bytes(&key, bytes).await
    }

    /// Removes every cached image from both tiers.
    pub async fn delete_all_images(&self) {
        self.inner.memory.clear().await;
        if let Err(e) = self.inner.disk.clear().await {
            warn!(error = %e, "failed to clear disk cache");
        }
    }

    // ---- cancellation ----

    /// Returns true if a network fetch is outstanding for `url`.
    pub async fn is_downloading(&self, url: Option<&str>) -> bool {
        let Ok((_, key)) = Self::validate(url) else {
            return false;
        };
        self.inner.downloader.is_downloading(&key).await
    }

    /// Cancels any pending fetches for `url`. No-op for absent URLs.
    pub fn cancel_fetch(&self, url: Option<&str>) {
        if let Ok((_, key)) = Self::validate(url) {
            self.inner.registry.cancel(&key);
        }
    }

    /// Cancels every pending fetch on this controller.
    pub fn cancel_all_fetches(&self) {
        self.inner.registry.cancel_all();
    }

    /// Number of fetches with a registered cancellable.
    pub async fn pending_fetch_count(&self) -> usize {
        self.inner.registry.pending_count().await
    }
}

#[async_trait::async_trait]
impl ImageFetcherPort for ImageController {
    async fn fetch_image(&self, url: Option<&str>) -> FetchResult<ImageDownload> {
        let (url, key) = Self::validate(url)?;
        self.fetch_image_inner(url, &key).await
    }

    async fn cached_image(&self, url: Option<&str>) -> FetchResult<ImageDownload> {
        let (url, key) = Self::validate(url)?;
        self.cached_image_inner(url, &key).await
    }

    /// A missing URL is false, not an error.
    async fn has_image(&self, url: Option<&str>) -> bool {
        let Ok((_, key)) = Self::validate(url) else {
            return false;
        };
        self.inner.memory.contains(&key).await || self.inner.disk.contains(&key).await
    }

    async fn delete_image(&self, url: Option<&str>) {
        let Ok((_, key)) = Self::validate(url) else {
            return;
        };
        self.inner.memory.evict(&key).await;
        self.inner.disk.evict(&key).await;
    }
}

/// Decodes bytes off the runtime, racing against cancellation.
async fn decode_image(
    bytes: Bytes,
    cancel: &CancelHandle,
) -> FetchResult<Arc<image::DynamicImage>> {
    let decode = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes));
    tokio::select! {
        () = cancel.cancelled() => Err(FetchError::FetchCancelled),
        joined = decode => {
            let image = joined
                .map_err(|e| FetchError::decode(format!("decode task panicked: {e}")))?
                .map_err(|e| FetchError::decode(format!("failed to decode image: {e}")))?;
            Ok(Arc::new(image))
        }
    }
}
