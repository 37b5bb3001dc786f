//! The versioned layout contract consumed by the cache engine.
//!
//! [`StorageBackend`](crate::StorageBackend) only knows about opaque keys. [`VersionedStore`] derives
//! everything that understands database folders, categories and numbered
//! files from those primitives, once, for every backend.

use crate::{
    BackendHandle, Category, FileNumber,
    error::{ErrorKind, Result},
    layout::{MAX_FILE_NUMBER, category_key, file_key, parse_file_number},
};
use async_trait::async_trait;
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Contents of an object-shaped file.
pub type Document = serde_json::Map<String, Value>;
/// A single element of an array-shaped file. Opaque to this crate.
pub type Entry = Value;
/// The parsed contents of one array-shaped file.
pub type FileGroup = Vec<Entry>;

/// Number of array files fetched at the same time by
/// [`array_files()`](Storage::array_files).
const CONCURRENT_FETCHES: usize = 8;

/// Read side of the versioned layout.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Lexicographically last database folder at the storage root, or `None`
    /// if the store is empty.
    async fn latest_folder_name(&self) -> Result<Option<String>>;

    /// Highest file number directly inside `folder/category`, or `None` if
    /// there are no files following the `NNNN.json` convention.
    async fn latest_file_number(&self, folder: &str, category: Category) -> Result<Option<FileNumber>>;

    /// Parsed object file. An absent file is an empty document; a file that
    /// is not a JSON object is [`MalformedFile`](ErrorKind::MalformedFile).
    async fn object_file(&self, folder: &str, category: Category, number: FileNumber) -> Result<Document>;

    /// Array files numbered `start + 1 ..= end`, in ascending order.
    ///
    /// Note that `start` is excluded and `end` is included. Absent,
    /// unparseable or non-array files are skipped rather than failing the
    /// whole range.
    async fn array_files(
        &self,
        folder: &str,
        category: Category,
        start: FileNumber,
        end: FileNumber,
    ) -> Result<Vec<FileGroup>>;
}

/// Write side of the versioned layout, used by the upload endpoints.
#[async_trait]
pub trait WritableStorage: Storage {
    async fn create_folder(&self, folder: &str) -> Result<()>;

    async fn create_sub_folder(&self, folder: &str, category: Category) -> Result<()>;

    async fn create_file(&self, folder: &str, category: Category, number: FileNumber, contents: &str) -> Result<()>;
}

/// [`Storage`] and [`WritableStorage`] on top of any [`StorageBackend`](crate::StorageBackend).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tally_storage::{Storage, VersionedStore, backend::LocalBackend};
///
/// # async fn example() -> tally_storage::error::Result<()> {
/// let backend = LocalBackend::new("local", "/srv/tally")?;
/// let store = VersionedStore::new(Arc::new(backend));
/// if let Some(folder) = store.latest_folder_name().await? {
///     println!("serving database {folder}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct VersionedStore {
    backend: BackendHandle,
}

impl VersionedStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Read a single file, mapping an absent file to `None`.
    async fn read_optional(&self, key: &Path) -> Result<Option<Vec<u8>>> {
        match self.backend.read(key).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fetch and parse one array file; `None` when it has to be skipped.
    async fn array_file(&self, key: PathBuf) -> Result<Option<FileGroup>> {
        let Some(data) = self.read_optional(&key).await? else {
            tracing::warn!(backend = %self.backend.name(), path = %key.display(), "Skipping missing array file");
            return Ok(None);
        };
        match serde_json::from_slice::<Value>(&data) {
            Ok(Value::Array(entries)) => Ok(Some(entries)),
            Ok(_) => {
                tracing::warn!(
                    backend = %self.backend.name(),
                    path = %key.display(),
                    "Skipping array file that does not hold an array"
                );
                Ok(None)
            },
            Err(error) => {
                tracing::warn!(
                    backend = %self.backend.name(),
                    path = %key.display(),
                    %error,
                    "Skipping unparseable array file"
                );
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl Storage for VersionedStore {
    async fn latest_folder_name(&self) -> Result<Option<String>> {
        let folders = self.backend.list_directories(None).await?;
        Ok(folders.into_iter().max())
    }

    async fn latest_file_number(&self, folder: &str, category: Category) -> Result<Option<FileNumber>> {
        let directory = category_key(folder, category);
        let files = self.backend.list(Some(&directory)).await?;
        let latest = files
            .iter()
            // Direct children only.
            .filter(|info| info.path.parent() == Some(directory.as_path()))
            .filter_map(|info| info.file_name().and_then(parse_file_number))
            .max();
        tracing::trace!(backend = %self.backend.name(), %folder, %category, ?latest, "Listed latest file number");
        Ok(latest)
    }

    async fn object_file(&self, folder: &str, category: Category, number: FileNumber) -> Result<Document> {
        let key = file_key(folder, category, number);
        let Some(data) = self.read_optional(&key).await? else {
            tracing::debug!(
                backend = %self.backend.name(),
                path = %key.display(),
                "Object file missing, using empty document"
            );
            return Ok(Document::new());
        };
        match serde_json::from_slice::<Value>(&data).or_raise(|| ErrorKind::MalformedFile(key.clone()))? {
            Value::Object(document) => Ok(document),
            _ => exn::bail!(ErrorKind::MalformedFile(key)),
        }
    }

    async fn array_files(
        &self,
        folder: &str,
        category: Category,
        start: FileNumber,
        end: FileNumber,
    ) -> Result<Vec<FileGroup>> {
        if start >= end {
            return Ok(Vec::new());
        }
        // `buffered` keeps the output in request order.
        let groups: Vec<Option<FileGroup>> = futures::stream::iter(start + 1..=end)
            .map(|number| self.array_file(file_key(folder, category, number)))
            .buffered(CONCURRENT_FETCHES)
            .try_collect()
            .await?;
        Ok(groups.into_iter().flatten().collect())
    }
}

#[async_trait]
impl WritableStorage for VersionedStore {
    async fn create_folder(&self, folder: &str) -> Result<()> {
        tracing::debug!(backend = %self.backend.name(), %folder, "Creating database folder");
        self.backend.create_directory(Path::new(folder)).await
    }

    async fn create_sub_folder(&self, folder: &str, category: Category) -> Result<()> {
        tracing::debug!(backend = %self.backend.name(), %folder, %category, "Creating category folder");
        self.backend.create_directory(&category_key(folder, category)).await
    }

    async fn create_file(&self, folder: &str, category: Category, number: FileNumber, contents: &str) -> Result<()> {
        if number > MAX_FILE_NUMBER {
            exn::bail!(ErrorKind::BackendError(format!(
                "file number {number} does not fit the four digit naming scheme"
            )));
        }
        let key = file_key(folder, category, number);
        tracing::debug!(backend = %self.backend.name(), path = %key.display(), bytes = contents.len(), "Writing file");
        self.backend.write(&key, contents.as_bytes()).await
    }
}
