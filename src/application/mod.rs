//! Application layer: the fetch facade and its erased adapter.

/// Type-erased adapter.
pub mod erased;
/// Fetch/cache facade and the cascading fetch.
pub mod image_controller;

pub use erased::ErasedImageFetcher;
pub use image_controller::ImageController;
