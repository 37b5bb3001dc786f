use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental-synchronization cache in front of a versioned object store.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON). Defaults to `config.toml` in the
    /// platform config directory, if present.
    #[arg(long, short, global = true, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output; repeat for even more. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Synchronize periodically and serve HTTP until interrupted (default).
    Serve,
    /// Synchronize once and print the current version vector as JSON.
    Status,
}
