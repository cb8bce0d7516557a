//! Infrastructure layer with cache tiers and the network adapter.

/// Fetcher configuration.
pub mod config;
/// Image caching, downloading, and cancellation.
pub mod image;

pub use config::{DEFAULT_DISK_CACHE_SIZE, DEFAULT_MEMORY_CACHE_SIZE, FetcherConfig};
pub use image::{
    CancelHandle, CancelRegistry, DiskImageCache, ImageDownloader, MemoryImageCache, Registration,
};
