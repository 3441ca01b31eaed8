//! TileStream CLI - Command-line interface
//!
//! Drives the tilestream library: stream a panning viewport, manage the
//! cache, and inspect the configuration.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilestream::config::ConfigFile;
use tilestream::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};

use commands::cache::CacheAction;
use commands::config::ConfigAction;
use commands::stream::StreamArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilestream")]
#[command(version, about = "Stream map tiles for a moving viewport", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.tilestream/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pan a viewport eastward and stream the tiles it uncovers
    Stream(StreamArgs),

    /// Cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(ConfigFile::default_path);
    let config_file = ConfigFile::load(&config_path)?;

    match cli.command {
        Commands::Config { action } => commands::config::run(action, &config_file),
        Commands::Stream(args) => {
            let _guard = start_logging()?;
            let runtime = build_runtime()?;
            runtime.block_on(commands::stream::run(args, config_file.into_stream()))
        }
        Commands::Cache { action } => {
            let _guard = start_logging()?;
            let runtime = build_runtime()?;
            runtime.block_on(commands::cache::run(action, config_file.into_stream()))
        }
    }
}

fn start_logging() -> Result<LoggingGuard, CliError> {
    init_logging(&default_log_dir(), default_log_file()).map_err(CliError::LoggingInit)
}

fn build_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}
