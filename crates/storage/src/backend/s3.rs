//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, Google Cloud Storage (through its XML
//! interoperability endpoint and HMAC keys), Backblaze B2, MinIO, and others.
//!
//! Object stores have no directories. Folders are emulated with `/`-delimited
//! keys: [`list_directories`](StorageBackend::list_directories) reads the
//! common prefixes of a delimited listing, and
//! [`create_directory`](StorageBackend::create_directory) writes an empty
//! `folder/` placeholder object.

use crate::{
    FileInfo, StorageBackend,
    backend::FileInfoStream,
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible storage backend.
///
/// Stores files in an S3 bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use tally_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "scores",
///     "my-bucket",
///     Some("tally/".to_string()),
///     "eu-central-1",
///     None::<String>,
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "tally-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (MinIO, GCS interoperability, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        Self::from_client(name, client, bucket, prefix)
    }

    /// Create a backend around an already configured client.
    pub fn from_client(
        name: impl Into<String>,
        client: Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        // Already UTF-8, so the lossy conversion never replaces anything.
        let prefix = prefix.map(validate_path).transpose()?.map(|p| p.to_string_lossy().into_owned());
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
            None => path_str.to_string(),
        })
    }

    /// Key prefix (with trailing delimiter) for listing below `path`.
    fn listing_prefix(&self, path: Option<&Path>) -> Result<String> {
        Ok(match (path, &self.prefix) {
            (Some(path), _) => format!("{}/", self.full_key(path)?),
            (None, Some(prefix)) => format!("{}/", prefix.trim_end_matches('/')),
            (None, None) => String::new(),
        })
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_path(relative)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn content_type(key: &str) -> &'static str {
        match key.ends_with(".json") {
            true => "application/json",
            false => "application/octet-stream",
        }
    }

    async fn put(&self, key: String, body: ByteStream) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .content_type(Self::content_type(&key))
            .key(&key)
            .body(body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("failed to put `{key}`")))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directories(&self, prefix: Option<&Path>) -> Result<Vec<String>> {
        let listing_prefix = self.listing_prefix(prefix)?;
        let mut names = Vec::new();
        let mut continuation = None;
        loop {
            let _permit = self.acquire_permit().await?;
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&listing_prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("failed to list `{listing_prefix}`")))?;
            for common in output.common_prefixes() {
                let name = common
                    .prefix()
                    .and_then(|p| p.strip_prefix(listing_prefix.as_str()))
                    .map(|p| p.trim_end_matches('/'))
                    .filter(|p| !p.is_empty());
                if let Some(name) = name {
                    names.push(name.to_string());
                }
            }
            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(names)
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let listing_prefix = match self.listing_prefix(prefix) {
            Ok(listing_prefix) => listing_prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            let mut continuation = None;
            loop {
                let permit = match self.acquire_permit().await {
                    Ok(permit) => permit,
                    Err(e) => { yield Err(e); break; },
                };
                let sent = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&listing_prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await;
                drop(permit);
                let output = match sent.or_raise(|| ErrorKind::Network(format!("failed to list `{listing_prefix}`"))) {
                    Ok(output) => output,
                    Err(e) => { yield Err(e); break; },
                };
                for object in output.contents() {
                    // Directory placeholders are not files.
                    let Some(key) = object.key().filter(|key| !key.ends_with('/')) else { continue };
                    let path = match self.relative_path(key) {
                        Ok(path) => path,
                        Err(e) => { yield Err(e); continue; },
                    };
                    let modified = match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = object.size().and_then(|size| u64::try_from(size).ok()).unwrap_or(0);
                    yield Ok(FileInfo::new(path, size, modified));
                }
                match (output.is_truncated(), output.next_continuation_token()) {
                    (Some(true), Some(token)) => continuation = Some(token.to_string()),
                    _ => break,
                }
            }
        })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Network(format!("failed to get `{key}`"))),
        };
        let body = output.body.collect().await.or_raise(|| ErrorKind::Network(format!("failed to read `{key}`")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        self.put(key, ByteStream::from(data.to_vec())).await
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        let key = format!("{}/", self.full_key(path)?);
        self.put(key, ByteStream::from_static(b"")).await
    }
}
