//! CLI command implementations.
//!
//! - [`cache`] - Cache management (clear, stats)
//! - [`config`] - Configuration inspection (show, path)
//! - [`stream`] - Stream tiles for a panning viewport

pub mod cache;
pub mod config;
pub mod stream;
