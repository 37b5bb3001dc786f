//! Layered configuration for tally.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults.
//! 2. A config file (TOML, YAML or JSON, picked by extension). Without an
//!    explicit path, `config.toml` in the platform config directory is used
//!    if it exists.
//! 3. Environment variables prefixed `TALLY_`, with `__` separating nested
//!    keys (`TALLY_SYNC__INTERVAL_SECS=60`, `TALLY_STORAGE__TYPE=s3`).

pub mod error;
mod model;

pub use crate::model::{Config, ServerConfig, StorageConfig, SyncConfig};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "TALLY_";
const DEFAULT_FILE_NAME: &str = "config.toml";

impl Config {
    /// Load and validate configuration from every source.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = Self::figment(path)?.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Defaults plus the config file, without the environment.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", path.display())));
                }
                path.to_path_buf()
            },
            None => match default_file() {
                Some(file) if file.is_file() => file,
                _ => {
                    tracing::debug!("No config file found; using defaults and environment");
                    return Ok(figment);
                },
            },
        };
        tracing::debug!(path = %file.display(), "Loading config file");
        let extension = file.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        Ok(match extension {
            "toml" => figment.merge(Toml::file(&file)),
            "yaml" | "yml" => figment.merge(Yaml::file(&file)),
            "json" => figment.merge(Json::file(&file)),
            _ => exn::bail!(ErrorKind::Invalid(format!("unsupported config file format: {}", file.display()))),
        })
    }

    /// Extract and validate configuration from a prepared [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.password.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("password must not be empty".to_string()));
        }
        if self.sync.interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("sync.interval_secs must be positive".to_string()));
        }
        if self.sync.cooldown_secs == 0 {
            exn::bail!(ErrorKind::Invalid("sync.cooldown_secs must be positive".to_string()));
        }
        self.log_level
            .parse::<LevelFilter>()
            .or_raise(|| ErrorKind::Invalid(format!("unknown log level `{}`", self.log_level)))?;
        match &self.storage {
            StorageConfig::Local { root } if !root.is_absolute() => {
                exn::bail!(ErrorKind::Invalid(format!("storage.root must be absolute: {}", root.display())))
            },
            StorageConfig::S3 { bucket, .. } if bucket.is_empty() => {
                exn::bail!(ErrorKind::Invalid("storage.bucket must not be empty".to_string()))
            },
            _ => Ok(()),
        }
    }

    /// The configured log level.
    pub fn level(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::INFO)
    }
}

/// `config.toml` in the platform config directory.
pub fn default_file() -> Option<PathBuf> {
    model::project_dirs().map(|dirs| dirs.config_dir().join(DEFAULT_FILE_NAME))
}
