//! Storage for tally.
//!
//! Two layers live here:
//! - [`StorageBackend`]: the primitive list/read/write operations each
//!   provider (local filesystem, S3-compatible, in-memory) implements.
//! - [`Storage`] / [`WritableStorage`]: the versioned layout
//!   (`<database>/<category>/<NNNN>.json`) consumed by the cache engine,
//!   implemented once for every backend by [`VersionedStore`].

pub mod backend;
pub mod error;
mod layout;
mod models;
mod path;
mod store;

pub use crate::backend::StorageBackend;
pub use crate::layout::{Category, FileNumber, MAX_FILE_NUMBER, Shape, file_key, file_name, parse_file_number};
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
pub use crate::store::{Document, Entry, FileGroup, Storage, VersionedStore, WritableStorage};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
pub type StorageHandle = Arc<dyn Storage + Send + Sync>;
pub type WritableHandle = Arc<dyn WritableStorage + Send + Sync>;
