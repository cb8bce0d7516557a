//! pixfetch - a cascading image fetcher.
//!
//! Given a URL, resolves a decoded image from an in-memory LRU cache, an
//! on-disk byte cache, or the network, in that order. Supports placeholder
//! fallbacks that improve as better images arrive, per-URL and bulk
//! cancellation, and scheme-agnostic cache keys.
//!
//! ```no_run
//! use pixfetch::{FetcherConfig, ImageController, ImageFetcherPort};
//!
//! # async fn demo() -> pixfetch::FetchResult<()> {
//! let controller = ImageController::with_default_cache(FetcherConfig::new("thumbs")).await?;
//! let download = controller.fetch_image(Some("https://example.com/pic.png")).await?;
//! println!("got {}x{} from {}", download.image.width(), download.image.height(), download.origin);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer: the facade and erased adapter.
pub mod application;
/// Domain layer: entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer: cache tiers, downloader, cancellation.
pub mod infrastructure;

pub use application::{ErasedImageFetcher, ImageController};
pub use domain::{
    CacheKey, FetchError, FetchResult, ImageCachePort, ImageDownload, ImageFetcherPort,
    ImageOrigin,
};
pub use infrastructure::{DiskImageCache, FetcherConfig, MemoryImageCache};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
