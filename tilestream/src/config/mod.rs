//! Streaming configuration.
//!
//! [`StreamConfig`] carries everything the engine and its context need at
//! startup. It is built with `with_*` setters on top of [`Default`], or
//! loaded from an INI file through [`ConfigFile`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tilestream::config::StreamConfig;
//!
//! let config = StreamConfig::default()
//!     .with_memory_cache_entries(200)
//!     .with_request_timeout(Duration::from_secs(10));
//! assert_eq!(config.memory_cache_entries(), 200);
//! assert_eq!(config.disk_cache_entries(), 2500);
//! ```

mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file::{ConfigFile, ConfigFileError};

use crate::channel::ElevationMode;
use crate::fetch::{TileSource, DEFAULT_MAX_CONCURRENT};

pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 500;
pub const DEFAULT_DISK_CACHE_ENTRIES: usize = 2500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_TILE_SLOTS: usize = 64;

pub const DEFAULT_RASTER_DATASET: &str = "osm";
pub const DEFAULT_RASTER_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Default on-disk cache location (`<platform cache dir>/tilestream`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilestream")
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    memory_cache_entries: usize,
    disk_cache_entries: usize,
    request_timeout: Duration,
    /// Re-request every active tile after the caches are reinitialised.
    auto_refresh_on_reinit: bool,
    cache_dir: PathBuf,
    persistent_cache: bool,
    max_concurrent_fetches: usize,
    max_tile_slots: usize,
    raster_source: Option<TileSource>,
    elevation_source: Option<TileSource>,
    elevation_mode: ElevationMode,
    vector_source: Option<TileSource>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            memory_cache_entries: DEFAULT_MEMORY_CACHE_ENTRIES,
            disk_cache_entries: DEFAULT_DISK_CACHE_ENTRIES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auto_refresh_on_reinit: false,
            cache_dir: default_cache_dir(),
            persistent_cache: true,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT,
            max_tile_slots: DEFAULT_MAX_TILE_SLOTS,
            raster_source: Some(TileSource::new(DEFAULT_RASTER_DATASET, DEFAULT_RASTER_URL)),
            elevation_source: None,
            elevation_mode: ElevationMode::Flat,
            vector_source: None,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum entries held by the memory tier (minimum 1).
    pub fn with_memory_cache_entries(mut self, entries: usize) -> Self {
        self.memory_cache_entries = entries.max(1);
        self
    }

    /// Maximum entries held by the disk tier (minimum 1).
    pub fn with_disk_cache_entries(mut self, entries: usize) -> Self {
        self.disk_cache_entries = entries.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auto_refresh_on_reinit(mut self, enabled: bool) -> Self {
        self.auto_refresh_on_reinit = enabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enable or disable the disk tier.
    pub fn with_persistent_cache(mut self, enabled: bool) -> Self {
        self.persistent_cache = enabled;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn with_max_tile_slots(mut self, slots: usize) -> Self {
        self.max_tile_slots = slots.max(1);
        self
    }

    pub fn with_raster_source(mut self, source: Option<TileSource>) -> Self {
        self.raster_source = source;
        self
    }

    pub fn with_elevation(mut self, mode: ElevationMode, source: Option<TileSource>) -> Self {
        self.elevation_mode = mode;
        self.elevation_source = source;
        self
    }

    pub fn with_vector_source(mut self, source: Option<TileSource>) -> Self {
        self.vector_source = source;
        self
    }

    pub fn memory_cache_entries(&self) -> usize {
        self.memory_cache_entries
    }

    pub fn disk_cache_entries(&self) -> usize {
        self.disk_cache_entries
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn auto_refresh_on_reinit(&self) -> bool {
        self.auto_refresh_on_reinit
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn persistent_cache(&self) -> bool {
        self.persistent_cache
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    pub fn max_tile_slots(&self) -> usize {
        self.max_tile_slots
    }

    pub fn raster_source(&self) -> Option<&TileSource> {
        self.raster_source.as_ref()
    }

    pub fn elevation_source(&self) -> Option<&TileSource> {
        self.elevation_source.as_ref()
    }

    pub fn elevation_mode(&self) -> ElevationMode {
        self.elevation_mode
    }

    pub fn vector_source(&self) -> Option<&TileSource> {
        self.vector_source.as_ref()
    }
}
