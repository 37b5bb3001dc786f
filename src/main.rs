mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tally_cache::CacheEngine;
use tally_config::{Config, StorageConfig};
use tally_server::AppState;
use tally_storage::backend::{LocalBackend, ReadOnlyBackend};
use tally_storage::{BackendHandle, VersionedStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    init_logging(&config, cli.verbose)?;

    let backend = backend(&config).await?;
    let store = Arc::new(VersionedStore::new(backend));
    let cache = Arc::new(CacheEngine::new(store.clone()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, cache, store).await,
        Command::Status => status(&cache).await,
    }
}

/// `RUST_LOG` wins; otherwise each `-v` raises the configured level.
fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => config.level(),
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        exn::bail!(ErrorKind::Logging(err.to_string()));
    }
    Ok(())
}

async fn backend(config: &Config) -> Result<BackendHandle> {
    let backend: BackendHandle = match &config.storage {
        StorageConfig::Local { root } => Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?),
        #[cfg(feature = "s3")]
        StorageConfig::S3 { bucket, prefix, region, endpoint, key_id, key_secret } => Arc::new(
            tally_storage::backend::S3Backend::new(
                "s3",
                bucket,
                prefix.clone(),
                region,
                endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?,
        ),
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => exn::bail!(ErrorKind::Unsupported("s3")),
    };
    tracing::info!(backend = %backend.name(), read_only = config.read_only, "Storage backend ready");
    let backend: BackendHandle = match config.read_only {
        true => Arc::new(ReadOnlyBackend::new(backend)),
        false => backend,
    };
    Ok(backend)
}

async fn serve(config: Config, cache: Arc<CacheEngine>, store: Arc<VersionedStore>) -> Result<()> {
    cache.synchronize().await;

    let interval = Duration::from_secs(config.sync.interval_secs);
    let periodic = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; startup already synchronized.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::debug!("Periodic synchronization");
                cache.synchronize().await;
            }
        }
    });

    let state = AppState::new(cache, store, config.password.as_str(), Duration::from_secs(config.sync.cooldown_secs));
    let app = tally_server::router(state);
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .or_raise(|| ErrorKind::Bind(config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "Listening");

    let result = tokio::select! {
        result = axum::serve(listener, app) => result.or_raise(|| ErrorKind::Serve),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        },
    };
    periodic.abort();
    result
}

async fn status(cache: &CacheEngine) -> Result<()> {
    cache.try_synchronize().await.or_raise(|| ErrorKind::Sync)?;
    let versions = cache.versions().unwrap_or_default();
    let json = serde_json::to_string_pretty(&versions).or_raise(|| ErrorKind::Sync)?;
    println!("{json}");
    Ok(())
}
