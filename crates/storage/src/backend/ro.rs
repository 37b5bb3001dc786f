//! Read-only storage backend.
//!
//! Wraps another backend and prevents write operations from executing, while
//! still indicating success on return. Lets a cache replica point at the same
//! bucket as the upload process without ever mutating it.

use async_trait::async_trait;
use std::path::Path;

use crate::{BackendHandle, FileInfo, StorageBackend, backend::FileInfoStream, error::Result};

/// Read-only storage backend.
///
/// Wraps another backend and silently drops all write operations, logging an
/// [`info event`](tracing::Event).
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_directories(&self, prefix: Option<&Path>) -> Result<Vec<String>> {
        self.inner.list_directories(prefix).await
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.inner.list(prefix).await
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(
            backend = %self.name(),
            path = %path.display(),
            bytes = data.len(),
            "Skipping write during read-only mode"
        );
        Ok(())
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        tracing::info!(
            backend = %self.name(),
            path = %path.display(),
            "Skipping directory creation during read-only mode"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_writes_are_dropped() {
        let inner = Arc::new(MockBackend::with_files([("201901/databases/0001.json", "{}")]));
        let backend = ReadOnlyBackend::new(inner.clone());

        backend.write(Path::new("201901/databases/0002.json"), b"{}").await.unwrap();
        backend.create_directory(Path::new("201902")).await.unwrap();

        assert_eq!(backend.list(None).await.unwrap().len(), 1);
        assert_eq!(inner.list_directories(None).await.unwrap(), vec!["201901"]);
    }

    #[tokio::test]
    async fn test_reads_pass_through() {
        let inner = Arc::new(MockBackend::with_files([("201901/databases/0001.json", "{}")]).with_name("replica"));
        let backend = ReadOnlyBackend::new(inner.clone());
        assert_eq!(backend.name(), "replica");
        assert_eq!(backend.read(Path::new("201901/databases/0001.json")).await.unwrap(), b"{}");
        assert_eq!(inner.reads(), 1);
    }
}
