//! Fetch error types.

use thiserror::Error;

/// Result type for fetch and cache operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors surfaced by the image controller and its tiers.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Caller passed a missing or empty URL. Raised before any I/O.
    #[error("invalid or empty image URL")]
    InvalidOrEmptyUrl,

    /// Cache-only lookup missed both the memory and disk tiers.
    #[error("image not found in cache")]
    DataNotFound,

    /// The fetch was aborted by an explicit cancel, a bulk cancel, or
    /// teardown of the owning controller.
    #[error("image fetch cancelled")]
    FetchCancelled,

    /// HTTP request failed or returned a non-success status.
    #[error("network error: {0}")]
    Network(String),

    /// Downloaded or cached bytes could not be decoded as an image.
    #[error("decode error: {0}")]
    Decode(String),

    /// Disk tier I/O failed.
    #[error("io error: {0}")]
    Io(String),
}

impl FetchError {
    /// Predicate distinguishing cancellation from other fetch failures.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::FetchCancelled)
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}
