//! Domain entity definitions.

mod image;

pub use image::{CacheKey, ImageDownload, ImageOrigin};
