//! CLI error handling with user-facing messages.

use std::fmt;
use std::process;

use tilestream::config::ConfigFileError;
use tilestream::tile::TileIdError;
use tilestream::StreamError;

#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be read or is invalid
    Config(ConfigFileError),
    /// Failed to build the async runtime
    Runtime(std::io::Error),
    /// Failed to install the Ctrl-C handler
    Signal(String),
    /// Latitude, longitude or zoom out of range
    Position(TileIdError),
    /// Failed to start the stream context
    Start(StreamError),
    /// Failed to clear the caches
    CacheClear(StreamError),
}

impl CliError {
    /// Print the error and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { section, key, .. }) => {
                eprintln!();
                eprintln!(
                    "Fix or remove '{}' in section [{}] of the config file.",
                    key, section
                );
                eprintln!("Run 'tilestream config show' to see the effective settings.");
            }
            CliError::Position(_) => {
                eprintln!();
                eprintln!("Latitude must be within +/-85.05, longitude within +/-180.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Signal(msg) => write!(f, "Failed to install Ctrl-C handler: {}", msg),
            CliError::Position(e) => write!(f, "Invalid position: {}", e),
            CliError::Start(e) => write!(f, "Failed to start streaming: {}", e),
            CliError::CacheClear(e) => write!(f, "Failed to clear caches: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) | CliError::Runtime(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Position(e) => Some(e),
            CliError::Start(e) | CliError::CacheClear(e) => Some(e),
            CliError::Signal(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<TileIdError> for CliError {
    fn from(e: TileIdError) -> Self {
        CliError::Position(e)
    }
}
