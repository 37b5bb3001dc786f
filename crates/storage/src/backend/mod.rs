//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait: the handful of primitive
//! operations a provider has to offer. Everything that knows about database
//! folders, categories and numbered files is built on top of these in
//! [`VersionedStore`](crate::VersionedStore), once, for all providers.

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. Object stores have no real directories;
/// backends emulate them with `/`-delimited keys (and placeholder keys for
/// empty directories) so that every backend answers
/// [`list_directories()`](Self::list_directories) the same way.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use tally_storage::{backend::StorageBackend, error::Result};
///
/// async fn database_folders(backend: &dyn StorageBackend) -> Result<usize> {
///     let folders = backend.list_directories(None).await?;
///     Ok(folders.len())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List the names of the immediate child directories of `prefix` (or of
    /// the storage root when `None`).
    ///
    /// A directory that only contains other directories, or is empty but was
    /// created with [`create_directory()`](Self::create_directory), is still
    /// listed. Names are returned without any trailing delimiter; order is
    /// unspecified.
    async fn list_directories(&self, prefix: Option<&Path>) -> Result<Vec<String>>;

    /// List all files under an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata under an optional prefix.
    ///
    /// Listing is recursive. Prefix matching is component based: the prefix
    /// `201901/messages` matches `201901/messages/0001.json` but not
    /// `201901/messages-old/0001.json`. Asking for a prefix that doesn't
    /// exist yields an empty stream, not an error. Directory placeholders
    /// are never yielded.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use tally_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("201901/results")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data. Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Make sure a (possibly empty) directory exists at `path`.
    ///
    /// Creating a directory that already exists is not an error.
    async fn create_directory(&self, path: &Path) -> Result<()>;
}
