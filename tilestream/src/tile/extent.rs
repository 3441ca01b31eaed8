//! Visible tile sets and the extent calculators that produce them.

use std::collections::HashSet;
use std::f64::consts::PI;

use super::id::{tiles_per_axis, TileIdError, UnwrappedTileId, MAX_ZOOM};

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;

/// The tiles that should be on screen after a viewport change.
///
/// A visible set is built once per update and replaced wholesale; it exposes
/// no mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleSet {
    tiles: HashSet<UnwrappedTileId>,
}

impl VisibleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tile: &UnwrappedTileId) -> bool {
        self.tiles.contains(tile)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnwrappedTileId> {
        self.tiles.iter()
    }
}

impl FromIterator<UnwrappedTileId> for VisibleSet {
    fn from_iter<I: IntoIterator<Item = UnwrappedTileId>>(iter: I) -> Self {
        Self {
            tiles: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a VisibleSet {
    type Item = &'a UnwrappedTileId;
    type IntoIter = std::collections::hash_set::Iter<'a, UnwrappedTileId>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}

/// Converts a geographic position to the (column, row) of the tile containing it.
pub fn lat_lon_to_tile(lat: f64, lon: f64, zoom: u8) -> Result<(u32, u32), TileIdError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(TileIdError::InvalidLatitude(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(TileIdError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(TileIdError::InvalidZoom(zoom));
    }

    let n = tiles_per_axis(zoom) as f64;
    let max_index = n - 1.0;

    // lon = 180 lands exactly on the eastern edge; keep it in the last column
    let col = ((lon + 180.0) / 360.0 * n).min(max_index) as u32;

    let lat_rad = lat * PI / 180.0;
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).clamp(0.0, max_index) as u32;

    Ok((col, row))
}

/// A rectangular block of tiles around a centre position.
///
/// Each direction gives the number of tiles to include beyond the centre tile.
/// Columns wrap across the antimeridian; rows stop at the poles. A range wider
/// than the world is clamped so no column appears twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeAroundCenter {
    pub zoom: u8,
    pub west: u32,
    pub north: u32,
    pub east: u32,
    pub south: u32,
}

impl RangeAroundCenter {
    /// Same range in every direction.
    pub fn uniform(zoom: u8, range: u32) -> Self {
        Self {
            zoom,
            west: range,
            north: range,
            east: range,
            south: range,
        }
    }

    /// This range with every direction limited to what the zoom level holds.
    pub fn clamped(&self) -> Self {
        let last = u32::try_from(tiles_per_axis(self.zoom) - 1).unwrap_or(u32::MAX);
        let west = self.west.min(last / 2);
        Self {
            zoom: self.zoom,
            west,
            north: self.north.min(last),
            east: self.east.min(last - west),
            south: self.south.min(last),
        }
    }

    /// Upper bound on the size of any visible set this range produces.
    pub fn max_tiles(&self) -> u64 {
        let r = self.clamped();
        let columns = u64::from(r.west) + u64::from(r.east) + 1;
        let rows = (u64::from(r.north) + u64::from(r.south) + 1).min(tiles_per_axis(self.zoom));
        columns * rows
    }

    /// Compute the visible set for a centre position.
    pub fn visible_tiles(&self, lat: f64, lon: f64) -> Result<VisibleSet, TileIdError> {
        let (col, row) = lat_lon_to_tile(lat, lon, self.zoom)?;
        Ok(self.visible_tiles_around(i64::from(col), row))
    }

    /// Compute the visible set around a world column and row.
    pub fn visible_tiles_around(&self, world_x: i64, row: u32) -> VisibleSet {
        let range = self.clamped();
        let max_row = (tiles_per_axis(self.zoom) - 1) as u32;
        let min_y = row.saturating_sub(range.north);
        let max_y = row.saturating_add(range.south).min(max_row);
        let min_x = world_x - i64::from(range.west);
        let max_x = world_x + i64::from(range.east);

        let mut tiles = HashSet::new();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                // zoom was validated when the centre tile was computed
                if let Ok(tile) = UnwrappedTileId::from_world(self.zoom, x, y) {
                    tiles.insert(tile);
                }
            }
        }
        VisibleSet { tiles }
    }
}
