//! Fetcher configuration.

use std::time::Duration;

/// Default maximum number of decoded images held in memory.
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 50;

/// Default maximum disk cache size in bytes (200 MB).
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Configuration for an [`ImageController`](crate::ImageController) instance.
///
/// Each controller owns one namespace; independent caches coexist by
/// constructing controllers with distinct namespaces.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Cache namespace, used for the disk directory and log context.
    pub namespace: String,
    /// Maximum images in the memory cache.
    pub memory_cache_size: usize,
    /// Maximum disk cache size in bytes.
    pub disk_cache_size: u64,
    /// Maximum concurrent network downloads.
    pub max_concurrent_downloads: usize,
    /// Per-request network timeout.
    pub timeout: Duration,
}

impl FetcherConfig {
    /// Creates a configuration with defaults for the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            memory_cache_size: DEFAULT_MEMORY_CACHE_SIZE,
            disk_cache_size: DEFAULT_DISK_CACHE_SIZE,
            max_concurrent_downloads: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_config_keeps_defaults() {
        let config = FetcherConfig::new("thumbnails");
        assert_eq!(config.namespace, "thumbnails");
        assert_eq!(config.memory_cache_size, DEFAULT_MEMORY_CACHE_SIZE);
        assert_eq!(config.disk_cache_size, DEFAULT_DISK_CACHE_SIZE);
    }
}
