//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use tally_storage::Category;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No synchronization has completed yet; there is nothing to diff against.
    #[display("cache is not initialized yet")]
    NotInitialized,
    /// Storage could not be listed or read during synchronization.
    #[display("storage unavailable")]
    StorageUnavailable,
    /// An object category file is not a JSON object. Stale data is kept
    /// rather than swapping in garbage.
    #[display("malformed object file in {_0}")]
    MalformedObjectFile(#[error(not(source))] Category),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable)
    }

    /// Re-raise a storage error as a cache error, keeping the storage frame
    /// as a child in the error tree.
    #[track_caller]
    pub(crate) fn storage(err: tally_storage::error::Error, category: Option<Category>) -> Error {
        let kind = match (&*err, category) {
            (tally_storage::error::ErrorKind::MalformedFile(_), Some(category)) => Self::MalformedObjectFile(category),
            _ => Self::StorageUnavailable,
        };
        err.raise(kind)
    }
}
