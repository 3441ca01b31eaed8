//! Per-channel processing: register, unregister and post-process.
//!
//! Each data channel decides for itself whether a newly registered tile needs
//! a fetch, can be marked loaded immediately, or is skipped because the
//! channel has no source. Dispatch is by variant rather than by trait object
//! since the set of channels is closed.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::trace;

use crate::fetch::{FetchError, TileResource, TileSource};
use crate::lifecycle::TileChannel;
use crate::tile::UnwrappedTileId;

/// How the height channel produces elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElevationMode {
    /// Flat terrain; no elevation data is fetched.
    #[default]
    Flat,
    /// Elevation decoded from fetched height tiles.
    Terrain,
}

impl std::str::FromStr for ElevationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(ElevationMode::Flat),
            "terrain" => Ok(ElevationMode::Terrain),
            other => Err(format!("unknown elevation mode '{}'", other)),
        }
    }
}

/// What registering a tile on a channel requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Fetch this resource, then post-process the payload.
    Fetch(TileResource),
    /// Loaded without any data.
    Ready,
    /// The channel does not apply; it stays unregistered.
    Skip,
}

/// Tiles a channel has requested data for and not yet received.
#[derive(Debug, Default)]
struct Waiting {
    tiles: HashSet<UnwrappedTileId>,
}

impl Waiting {
    fn fetch(&mut self, source: &TileSource, tile: UnwrappedTileId) -> Registration {
        self.tiles.insert(tile);
        Registration::Fetch(source.resource(tile.canonical()))
    }
}

#[derive(Debug, Default)]
pub struct RasterChannel {
    source: Option<TileSource>,
    waiting: Waiting,
}

impl RasterChannel {
    pub fn new(source: Option<TileSource>) -> Self {
        Self {
            source,
            waiting: Waiting::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HeightChannel {
    source: Option<TileSource>,
    mode: ElevationMode,
    waiting: Waiting,
}

impl HeightChannel {
    pub fn new(source: Option<TileSource>, mode: ElevationMode) -> Self {
        Self {
            source,
            mode,
            waiting: Waiting::default(),
        }
    }

    pub fn mode(&self) -> ElevationMode {
        self.mode
    }
}

#[derive(Debug, Default)]
pub struct VectorChannel {
    source: Option<TileSource>,
    waiting: Waiting,
}

impl VectorChannel {
    pub fn new(source: Option<TileSource>) -> Self {
        Self {
            source,
            waiting: Waiting::default(),
        }
    }
}

/// One channel's pipeline.
#[derive(Debug)]
pub enum ChannelPipeline {
    Raster(RasterChannel),
    Height(HeightChannel),
    Vector(VectorChannel),
}

impl ChannelPipeline {
    pub fn channel(&self) -> TileChannel {
        match self {
            ChannelPipeline::Raster(_) => TileChannel::Raster,
            ChannelPipeline::Height(_) => TileChannel::Height,
            ChannelPipeline::Vector(_) => TileChannel::Vector,
        }
    }

    pub fn source(&self) -> Option<&TileSource> {
        match self {
            ChannelPipeline::Raster(c) => c.source.as_ref(),
            ChannelPipeline::Height(c) => c.source.as_ref(),
            ChannelPipeline::Vector(c) => c.source.as_ref(),
        }
    }

    fn waiting_mut(&mut self) -> &mut Waiting {
        match self {
            ChannelPipeline::Raster(c) => &mut c.waiting,
            ChannelPipeline::Height(c) => &mut c.waiting,
            ChannelPipeline::Vector(c) => &mut c.waiting,
        }
    }

    /// Whether `tile` was registered here and has not received data yet.
    pub fn is_waiting(&self, tile: UnwrappedTileId) -> bool {
        match self {
            ChannelPipeline::Raster(c) => c.waiting.tiles.contains(&tile),
            ChannelPipeline::Height(c) => c.waiting.tiles.contains(&tile),
            ChannelPipeline::Vector(c) => c.waiting.tiles.contains(&tile),
        }
    }

    /// Decide what loading `tile` on this channel takes.
    pub fn register(&mut self, tile: UnwrappedTileId) -> Registration {
        let registration = match self {
            ChannelPipeline::Raster(c) => match &c.source {
                Some(source) => c.waiting.fetch(source, tile),
                None => Registration::Skip,
            },
            ChannelPipeline::Height(c) => match (c.mode, &c.source) {
                (ElevationMode::Flat, _) => Registration::Ready,
                (ElevationMode::Terrain, Some(source)) => c.waiting.fetch(source, tile),
                (ElevationMode::Terrain, None) => Registration::Skip,
            },
            ChannelPipeline::Vector(c) => match &c.source {
                Some(source) => c.waiting.fetch(source, tile),
                None => Registration::Skip,
            },
        };
        trace!(
            tile = %tile,
            channel = %self.channel(),
            ?registration,
            "Channel registered"
        );
        registration
    }

    /// Forget `tile`; called for every channel when the tile is disposed.
    pub fn unregister(&mut self, tile: UnwrappedTileId) {
        if self.waiting_mut().tiles.remove(&tile) {
            trace!(tile = %tile, channel = %self.channel(), "Dropped pending tile");
        }
    }

    /// Accept a delivered payload before the channel is marked loaded.
    pub fn post_process(
        &mut self,
        tile: UnwrappedTileId,
        payload: &Bytes,
    ) -> Result<(), FetchError> {
        self.waiting_mut().tiles.remove(&tile);
        validate_payload(self.channel(), payload)
    }

    /// Record that the fetch for `tile` failed.
    pub fn fetch_failed(&mut self, tile: UnwrappedTileId) {
        self.waiting_mut().tiles.remove(&tile);
    }
}

/// Check that `payload` is usable on `channel`.
///
/// Raster and height payloads must be a recognised image; vector payloads
/// must not be empty. Runs before anything is written to the cache, so a
/// rejected payload is never served again.
pub fn validate_payload(channel: TileChannel, payload: &[u8]) -> Result<(), FetchError> {
    match channel {
        TileChannel::Raster | TileChannel::Height => match image_format(payload) {
            Some(_) => Ok(()),
            None => Err(FetchError::InvalidPayload(format!(
                "{} payload of {} bytes is not a recognised image",
                channel,
                payload.len()
            ))),
        },
        TileChannel::Vector if payload.is_empty() => {
            Err(FetchError::InvalidPayload("empty vector tile".to_string()))
        }
        TileChannel::Vector => Ok(()),
    }
}

/// Image container detected from the payload's leading bytes.
pub fn image_format(payload: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];

    if payload.starts_with(PNG) {
        Some("png")
    } else if payload.starts_with(JPEG) {
        Some("jpeg")
    } else if payload.len() >= 12 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WEBP" {
        Some("webp")
    } else if payload.starts_with(b"GIF87a") || payload.starts_with(b"GIF89a") {
        Some("gif")
    } else {
        None
    }
}
