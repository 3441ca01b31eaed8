//! INI configuration file.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/tilestream
//! memory_entries = 500
//! disk_entries = 2500
//! persistent = true
//!
//! [fetch]
//! timeout_secs = 30
//! max_concurrent = 32
//!
//! [stream]
//! max_tile_slots = 64
//! auto_refresh = false
//!
//! [raster]
//! dataset = osm
//! url = https://tile.openstreetmap.org/{z}/{x}/{y}.png
//!
//! [elevation]
//! mode = flat
//!
//! [vector]
//! ```
//!
//! Missing files and missing keys fall back to [`StreamConfig::default`].
//! A source section with an empty `url` disables that channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::StreamConfig;
use crate::channel::ElevationMode;
use crate::fetch::TileSource;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// A configuration file and the settings it resolved to.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    exists: bool,
    stream: StreamConfig,
}

impl ConfigFile {
    /// `~/.tilestream/config.ini`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tilestream")
            .join("config.ini")
    }

    /// Load `path`, overlaying its values onto the defaults.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                exists: false,
                stream: StreamConfig::default(),
            });
        }

        let ini = Ini::load_from_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            exists: true,
            stream: parse_ini(&ini)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the settings came from a file on disk.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    pub fn into_stream(self) -> StreamConfig {
        self.stream
    }

    /// Render the effective settings as INI text.
    pub fn to_ini_string(&self) -> String {
        let ini = to_ini(&self.stream);
        let mut buf = Vec::new();
        if ini.write_to(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn save(&self) -> Result<(), ConfigFileError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }
        to_ini(&self.stream)
            .write_to_file(&self.path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_count(section: &str, key: &str, value: &str) -> Result<usize, ConfigFileError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid(section, key, value, "must be at least 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(section, key, value, "must be a positive integer")),
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Read `dataset` and `url` from a source section.
///
/// `Ok(None)` means the section is absent (keep the default); `Ok(Some(None))`
/// means the section explicitly disables the channel.
fn parse_source(
    section_name: &str,
    section: Option<&Properties>,
) -> Result<Option<Option<TileSource>>, ConfigFileError> {
    let Some(section) = section else {
        return Ok(None);
    };

    let url = section.get("url").map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Ok(Some(None));
    }
    if !url.contains("{z}") || !url.contains("{x}") || !url.contains("{y}") {
        return Err(invalid(
            section_name,
            "url",
            url,
            "must contain {z}, {x} and {y} placeholders",
        ));
    }

    let dataset = section
        .get("dataset")
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(section_name);

    Ok(Some(Some(TileSource::new(dataset, url))))
}

fn parse_ini(ini: &Ini) -> Result<StreamConfig, ConfigFileError> {
    let mut config = StreamConfig::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config = config.with_cache_dir(expand_tilde(v));
            }
        }
        if let Some(v) = section.get("memory_entries") {
            config = config.with_memory_cache_entries(parse_count("cache", "memory_entries", v)?);
        }
        if let Some(v) = section.get("disk_entries") {
            config = config.with_disk_cache_entries(parse_count("cache", "disk_entries", v)?);
        }
        if let Some(v) = section.get("persistent") {
            config = config.with_persistent_cache(parse_bool("cache", "persistent", v)?);
        }
    }

    // [fetch]
    if let Some(section) = ini.section(Some("fetch")) {
        if let Some(v) = section.get("timeout_secs") {
            let secs = parse_count("fetch", "timeout_secs", v)?;
            config = config.with_request_timeout(Duration::from_secs(secs as u64));
        }
        if let Some(v) = section.get("max_concurrent") {
            config = config.with_max_concurrent_fetches(parse_count("fetch", "max_concurrent", v)?);
        }
    }

    // [stream]
    if let Some(section) = ini.section(Some("stream")) {
        if let Some(v) = section.get("max_tile_slots") {
            config = config.with_max_tile_slots(parse_count("stream", "max_tile_slots", v)?);
        }
        if let Some(v) = section.get("auto_refresh") {
            config = config.with_auto_refresh_on_reinit(parse_bool("stream", "auto_refresh", v)?);
        }
    }

    // [raster]
    if let Some(source) = parse_source("raster", ini.section(Some("raster")))? {
        config = config.with_raster_source(source);
    }

    // [elevation]
    if let Some(section) = ini.section(Some("elevation")) {
        let mode = match section.get("mode") {
            Some(v) => v
                .parse::<ElevationMode>()
                .map_err(|reason| invalid("elevation", "mode", v, &reason))?,
            None => config.elevation_mode(),
        };
        let source = parse_source("elevation", Some(section))?.flatten();
        if mode == ElevationMode::Terrain && source.is_none() {
            return Err(invalid(
                "elevation",
                "url",
                "",
                "terrain mode requires a url",
            ));
        }
        config = config.with_elevation(mode, source);
    }

    // [vector]
    if let Some(source) = parse_source("vector", ini.section(Some("vector")))? {
        config = config.with_vector_source(source);
    }

    Ok(config)
}

fn to_ini(config: &StreamConfig) -> Ini {
    let mut ini = Ini::new();

    ini.with_section(Some("cache"))
        .set("directory", config.cache_dir().display().to_string())
        .set("memory_entries", config.memory_cache_entries().to_string())
        .set("disk_entries", config.disk_cache_entries().to_string())
        .set("persistent", config.persistent_cache().to_string());

    ini.with_section(Some("fetch"))
        .set("timeout_secs", config.request_timeout().as_secs().to_string())
        .set("max_concurrent", config.max_concurrent_fetches().to_string());

    ini.with_section(Some("stream"))
        .set("max_tile_slots", config.max_tile_slots().to_string())
        .set("auto_refresh", config.auto_refresh_on_reinit().to_string());

    let sources = [
        ("raster", config.raster_source()),
        ("elevation", config.elevation_source()),
        ("vector", config.vector_source()),
    ];
    for (name, source) in sources {
        let (dataset, url) = match source {
            Some(s) => (s.dataset(), s.url_template()),
            None => (name, ""),
        };
        let mut section = ini.with_section(Some(name));
        section.set("dataset", dataset).set("url", url);
        if name == "elevation" {
            let mode = match config.elevation_mode() {
                ElevationMode::Flat => "flat",
                ElevationMode::Terrain => "terrain",
            };
            section.set("mode", mode);
        }
    }

    ini
}
