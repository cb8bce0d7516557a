//! Domain types for image fetching and caching.

use std::sync::Arc;

/// Normalized cache key derived from a URL.
///
/// The URL scheme is stripped before keying, so `http://host/pic.png` and
/// `https://host/pic.png` share one cache entry. Deletion and cancellation
/// normalize through the same function, and the disk tier derives its file
/// names from this key, so the normalization must stay stable byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `url` by dropping the scheme.
    ///
    /// Scheme-relative URLs (`//host/path`) already match the normalized
    /// form and pass through unchanged.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let schemeless = url.find("://").map_or(url, |idx| &url[idx + 1..]);
        Self(schemeless.to_string())
    }

    /// Returns the normalized key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe stem for the disk tier, a hex SHA-256 of the key.
    #[must_use]
    pub fn file_stem(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tier an image was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    /// In-memory LRU cache.
    Memory,
    /// On-disk byte cache.
    Disk,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A successfully resolved image together with its provenance.
#[derive(Debug, Clone)]
pub struct ImageDownload {
    /// URL the caller asked for, as given (scheme intact).
    pub url: String,
    /// Decoded image, shared with the memory tier.
    pub image: Arc<image::DynamicImage>,
    /// Tier the image came from.
    pub origin: ImageOrigin,
}

impl ImageDownload {
    /// Collapses the download to its bare image, discarding provenance.
    #[must_use]
    pub fn into_image(self) -> Arc<image::DynamicImage> {
        self.image
    }
}
