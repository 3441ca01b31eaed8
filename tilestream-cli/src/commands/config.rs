//! Configuration inspection CLI commands.

use clap::Subcommand;
use tilestream::config::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as INI
    Show,
    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(action: ConfigAction, file: &ConfigFile) -> Result<(), CliError> {
    match action {
        ConfigAction::Show => {
            if file.exists() {
                println!("# {}", file.path().display());
            } else {
                println!("# {} (not found, showing defaults)", file.path().display());
            }
            print!("{}", file.to_ini_string());
        }
        ConfigAction::Path => println!("{}", file.path().display()),
    }
    Ok(())
}
