//! Cache management CLI commands.

use clap::Subcommand;
use tilestream::cache::CacheTier;
use tilestream::config::StreamConfig;
use tilestream::StreamContext;

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear every cache tier, removing all cached tiles
    Clear,
    /// Show how many tiles the disk cache holds
    Stats,
}

/// Run a cache subcommand.
pub async fn run(action: CacheAction, config: StreamConfig) -> Result<(), CliError> {
    let cache_dir = config.cache_dir().to_path_buf();
    let context = StreamContext::start(config).await.map_err(CliError::Start)?;

    let result = match action {
        CacheAction::Clear => {
            println!("Clearing caches at: {}", cache_dir.display());
            let before = context.disk_tier().map(|d| d.entry_count()).unwrap_or(0);
            context.clear_caches().await.map_err(CliError::CacheClear)?;
            println!("Removed {} cached tiles", before);
            Ok(())
        }
        CacheAction::Stats => {
            match context.disk_tier() {
                Some(disk) => {
                    println!("Disk cache: {}", cache_dir.display());
                    println!("  Tiles: {} / {}", disk.entry_count(), disk.max_entries());
                }
                None => println!("Disk cache disabled"),
            }
            Ok(())
        }
    };

    context.shutdown();
    result
}
