//! Image infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - Disk caching for persistence
//! - HTTP download of encoded bytes
//! - Cancellation bookkeeping for in-flight requests

pub mod cancel;
pub mod disk_cache;
pub mod downloader;
pub mod memory_cache;

pub use cancel::{CancelHandle, CancelRegistry, Registration};
pub use disk_cache::DiskImageCache;
pub use downloader::ImageDownloader;
pub use memory_cache::MemoryImageCache;
