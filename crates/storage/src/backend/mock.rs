//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::StorageBackend;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Ideal for unit
/// tests that need a [`StorageBackend`] without filesystem or network
/// dependencies.
///
/// Besides storing files, the mock counts every [`read()`](StorageBackend::read)
/// (so tests can assert that nothing was fetched) and can be switched into an
/// "unavailable" mode where every operation fails with a network error.
///
/// # Examples
///
/// ```ignore
/// use tally_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("201901/databases/0001.json", r#"{"teams":[]}"#),
/// ]);
/// assert_eq!(backend.list_directories(None).await?, vec!["201901".to_string()]);
///
/// backend.write(Path::new("201901/results/0001.json"), b"[]").await?;
/// assert_eq!(backend.read(Path::new("201901/results/0001.json")).await?, b"[]");
/// assert_eq!(backend.reads(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    directories: RwLock<HashSet<PathBuf>>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            directories: RwLock::new(HashSet::new()),
            reads: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of [`read()`](StorageBackend::read) calls made so far,
    /// successful or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every subsequent operation fail with
    /// [`Network`](ErrorKind::Network) (or succeed again with `false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network(format!("{} is unavailable", self.name)));
        }
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Remainder of `path` below `prefix`, or the whole path with no prefix.
fn below<'p>(path: &'p Path, prefix: Option<&Path>) -> Option<&'p Path> {
    match prefix {
        Some(prefix) => path.strip_prefix(prefix).ok(),
        None => Some(path),
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directories(&self, prefix: Option<&Path>) -> Result<Vec<String>> {
        self.check_available()?;
        let prefix = prefix.map(validate_path).transpose()?;
        let mut names = BTreeSet::new();
        for path in self.storage.read().await.keys() {
            let Some(rest) = below(path, prefix.as_deref()) else { continue };
            let mut components = rest.components();
            // Only files at least one level deeper reveal a directory.
            if let (Some(first), Some(_)) = (components.next(), components.next()) {
                names.insert(first.as_os_str().to_string_lossy().into_owned());
            }
        }
        for path in self.directories.read().await.iter() {
            let Some(rest) = below(path, prefix.as_deref()) else { continue };
            if let Some(first) = rest.components().next() {
                names.insert(first.as_os_str().to_string_lossy().into_owned());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        if let Err(e) = self.check_available() {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<(PathBuf, OffsetDateTime, u64)> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (inserted, data))| (path.clone(), *inserted, data.len() as u64))
                    .collect()
            };
            for (path, inserted, size) in entries {
                yield Ok(FileInfo::new(path, size, inserted));
            }
        })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let path = validate_path(path)?;
        let (_inserted, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.check_available()?;
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        self.check_available()?;
        let path = validate_path(path)?;
        self.directories.write().await.insert(path);
        Ok(())
    }
}
