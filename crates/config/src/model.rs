use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Shared secret for the upload and administration endpoints.
    pub password: String,
    /// Never write to storage; uploads are accepted but dropped.
    pub read_only: bool,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            password: String::new(),
            read_only: false,
            log_level: "info".to_string(),
            sync: SyncConfig::default(),
            storage: StorageConfig::Local { root: default_data_dir() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: SocketAddr::from(([0, 0, 0, 0], 3000)) }
    }
}

/// Timing of cache synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between two periodic synchronizations.
    pub interval_secs: u64,
    /// Minimum seconds between two synchronizations triggered over HTTP.
    pub cooldown_secs: u64,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: 300, cooldown_secs: 60 }
    }
}

/// Where the versioned data lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    /// Any S3-compatible service (AWS, MinIO, GCS interoperability, ...).
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tally")
}

fn default_data_dir() -> PathBuf {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from("/var/lib/tally"))
}
