//! Network tier: HTTP download of encoded image bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::domain::entities::CacheKey;
use crate::domain::errors::{FetchError, FetchResult};

use super::cancel::CancelHandle;

/// HTTP downloader with a concurrency cap and per-key pending tracking.
pub struct ImageDownloader {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    // key -> number of outstanding downloads; concurrent fetches of one
    // URL are not deduplicated, so this must count, not flag
    pending: Mutex<HashMap<CacheKey, usize>>,
}

/// Counts one download as pending for its own lifetime. Dropping the
/// guard decrements, so a fetch future dropped mid-download (timeout,
/// caller going away) still releases its entry.
struct PendingGuard<'a> {
    downloader: &'a ImageDownloader,
    key: CacheKey,
}

impl<'a> PendingGuard<'a> {
    fn new(downloader: &'a ImageDownloader, key: &CacheKey) -> Self {
        *downloader
            .lock_pending()
            .entry(key.clone())
            .or_insert(0) += 1;
        Self {
            downloader,
            key: key.clone(),
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.downloader.lock_pending();
        if let Some(count) = pending.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&self.key);
            }
        }
    }
}

impl ImageDownloader {
    /// Creates a downloader with the given timeout and concurrency cap.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, max_concurrent: usize) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CacheKey, usize>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if a download is outstanding for `key`.
    #[allow(clippy::unused_async)]
    pub async fn is_downloading(&self, key: &CacheKey) -> bool {
        self.lock_pending().contains_key(key)
    }

    /// Downloads the body at `url`, racing the request against `cancel`.
    ///
    /// # Errors
    /// Fails with `FetchCancelled` when cancelled, or `Network` on HTTP
    /// failure or a non-success status.
    pub async fn fetch(
        &self,
        url: &str,
        key: &CacheKey,
        cancel: &CancelHandle,
    ) -> FetchResult<Bytes> {
        let permit = tokio::select! {
            () = cancel.cancelled() => return Err(FetchError::FetchCancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| FetchError::FetchCancelled)?
            }
        };

        let _pending = PendingGuard::new(self, key);
        debug!(key = %key, url = %url, "downloading image");

        let result = tokio::select! {
            () = cancel.cancelled() => Err(FetchError::FetchCancelled),
            res = self.download(url) => res,
        };

        drop(permit);
        result
    }

    async fn download(&self, url: &str) -> FetchResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FetchError::network(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("unknown")
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::network(format!("failed to read body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let header = format!(
                    "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{addr}/image.png")
    }

    fn test_handle() -> CancelHandle {
        // registry-independent handle for downloader-level tests
        let registry = super::super::cancel::CancelRegistry::new();
        let registration = registry.register(&CacheKey::from_url("https://example.com/x"));
        registration.handle().clone()
    }

    #[tokio::test]
    async fn successful_download_returns_the_body() {
        let url = serve_once("HTTP/1.1 200 OK", b"image bytes".to_vec()).await;
        let downloader = ImageDownloader::new(Duration::from_secs(5), 2).unwrap();
        let key = CacheKey::from_url(&url);

        let bytes = downloader.fetch(&url, &key, &test_handle()).await.unwrap();
        assert_eq!(&bytes[..], b"image bytes");
        assert!(!downloader.is_downloading(&key).await);
    }

    #[tokio::test]
    async fn http_error_status_fails_with_network_error() {
        let url = serve_once("HTTP/1.1 404 Not Found", Vec::new()).await;
        let downloader = ImageDownloader::new(Duration::from_secs(5), 2).unwrap();
        let key = CacheKey::from_url(&url);

        let err = downloader
            .fetch(&url, &key, &test_handle())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn cancel_aborts_a_hanging_download() {
        // accept the connection and never respond
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let url = format!("http://{addr}/slow.png");

        let downloader = Arc::new(ImageDownloader::new(Duration::from_secs(30), 2).unwrap());
        let key = CacheKey::from_url(&url);
        let handle = test_handle();

        let fetch = {
            let downloader = Arc::clone(&downloader);
            let url = url.clone();
            let key = key.clone();
            let handle = handle.clone();
            tokio::spawn(async move { downloader.fetch(&url, &key, &handle).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(downloader.is_downloading(&key).await);
        handle.cancel();

        let err = fetch.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!downloader.is_downloading(&key).await);
    }

    #[tokio::test]
    async fn dropping_a_fetch_mid_download_clears_pending() {
        // accept the connection and never respond
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let url = format!("http://{addr}/slow.png");

        let downloader = ImageDownloader::new(Duration::from_secs(30), 2).unwrap();
        let key = CacheKey::from_url(&url);
        let handle = test_handle();

        // the timeout drops the fetch future without cancelling it
        let timed_out =
            tokio::time::timeout(Duration::from_millis(200), downloader.fetch(&url, &key, &handle))
                .await;
        assert!(timed_out.is_err());

        assert!(!downloader.is_downloading(&key).await);
    }
}
