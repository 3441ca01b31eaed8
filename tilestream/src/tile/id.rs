//! Tile identity types.
//!
//! A [`CanonicalTileId`] addresses tile content on the Web Mercator grid and is
//! the only form used for cache keys and network requests. An
//! [`UnwrappedTileId`] adds a world-repeat offset so a viewport that crosses
//! the antimeridian can hold two copies of the same tile in different places.

use std::fmt;

use thiserror::Error;

/// Deepest zoom level a tile id may address.
///
/// `2^30` columns still fits in a `u32` with room for the `x < 2^zoom` check.
pub const MAX_ZOOM: u8 = 30;

/// Errors produced when building tile identities or extents.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileIdError {
    /// Zoom level above [`MAX_ZOOM`].
    #[error("Zoom level {0} out of range (max {MAX_ZOOM})")]
    InvalidZoom(u8),

    /// Column or row outside the grid for the zoom level.
    #[error("Tile ({x}, {y}) outside the grid at zoom {zoom}")]
    OutOfBounds { zoom: u8, x: u32, y: u32 },

    /// Latitude outside the Web Mercator range.
    #[error("Latitude {0} out of range")]
    InvalidLatitude(f64),

    /// Longitude outside -180..=180.
    #[error("Longitude {0} out of range")]
    InvalidLongitude(f64),
}

/// Number of tiles along one axis at the given zoom.
#[inline]
pub fn tiles_per_axis(zoom: u8) -> u64 {
    1u64 << zoom
}

/// Wrap-independent tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileId {
    zoom: u8,
    x: u32,
    y: u32,
}

impl CanonicalTileId {
    /// Create a validated canonical id.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self, TileIdError> {
        if zoom > MAX_ZOOM {
            return Err(TileIdError::InvalidZoom(zoom));
        }
        let n = tiles_per_axis(zoom);
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(TileIdError::OutOfBounds { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// The tile one level up that contains this one, or `None` at zoom 0.
    pub fn parent(&self) -> Option<Self> {
        if self.zoom == 0 {
            return None;
        }
        Some(Self {
            zoom: self.zoom - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// The four tiles one level down, or `None` at [`MAX_ZOOM`].
    pub fn children(&self) -> Option<[Self; 4]> {
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        let zoom = self.zoom + 1;
        let (x, y) = (self.x << 1, self.y << 1);
        Some([
            Self { zoom, x, y },
            Self { zoom, x: x + 1, y },
            Self { zoom, x, y: y + 1 },
            Self {
                zoom,
                x: x + 1,
                y: y + 1,
            },
        ])
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Canonical tile plus the world copy it is drawn in.
///
/// Equality includes `wrap`: the same tile shown in two world copies occupies
/// two slots, but both share one cache entry and one network resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnwrappedTileId {
    canonical: CanonicalTileId,
    wrap: i32,
}

impl UnwrappedTileId {
    pub fn new(canonical: CanonicalTileId, wrap: i32) -> Self {
        Self { canonical, wrap }
    }

    /// Build from an unbounded world column.
    ///
    /// Columns west of the antimeridian get a negative `wrap`, columns past
    /// the eastern edge a positive one.
    pub fn from_world(zoom: u8, world_x: i64, y: u32) -> Result<Self, TileIdError> {
        if zoom > MAX_ZOOM {
            return Err(TileIdError::InvalidZoom(zoom));
        }
        let n = tiles_per_axis(zoom) as i64;
        let wrap = world_x.div_euclid(n) as i32;
        let x = world_x.rem_euclid(n) as u32;
        Ok(Self {
            canonical: CanonicalTileId::new(zoom, x, y)?,
            wrap,
        })
    }

    pub fn canonical(&self) -> CanonicalTileId {
        self.canonical
    }

    pub fn wrap(&self) -> i32 {
        self.wrap
    }

    pub fn zoom(&self) -> u8 {
        self.canonical.zoom
    }

    /// Column in the unwrapped world (`x + wrap * 2^zoom`).
    pub fn world_x(&self) -> i64 {
        i64::from(self.canonical.x) + i64::from(self.wrap) * tiles_per_axis(self.zoom()) as i64
    }
}

impl From<CanonicalTileId> for UnwrappedTileId {
    fn from(canonical: CanonicalTileId) -> Self {
        Self { canonical, wrap: 0 }
    }
}

impl fmt::Display for UnwrappedTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wrap == 0 {
            write!(f, "{}", self.canonical)
        } else {
            write!(f, "{}@w{}", self.canonical, self.wrap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_new_valid() {
        let id = CanonicalTileId::new(3, 7, 0).unwrap();
        assert_eq!(id.zoom(), 3);
        assert_eq!(id.x(), 7);
        assert_eq!(id.y(), 0);
    }

    #[test]
    fn test_canonical_rejects_out_of_grid() {
        assert_eq!(
            CanonicalTileId::new(3, 8, 0),
            Err(TileIdError::OutOfBounds { zoom: 3, x: 8, y: 0 })
        );
        assert_eq!(
            CanonicalTileId::new(31, 0, 0),
            Err(TileIdError::InvalidZoom(31))
        );
    }

    #[test]
    fn test_canonical_display_is_cache_key_form() {
        let id = CanonicalTileId::new(15, 5279, 12754).unwrap();
        assert_eq!(id.to_string(), "15/5279/12754");
    }

    #[test]
    fn test_parent_and_children() {
        let id = CanonicalTileId::new(4, 9, 5).unwrap();
        let parent = id.parent().unwrap();
        assert_eq!(parent, CanonicalTileId::new(3, 4, 2).unwrap());

        let children = parent.children().unwrap();
        assert!(children.contains(&id));
        assert!(CanonicalTileId::new(0, 0, 0).unwrap().parent().is_none());
    }

    #[test]
    fn test_from_world_wraps_east_and_west() {
        let east = UnwrappedTileId::from_world(2, 5, 1).unwrap();
        assert_eq!(east.canonical(), CanonicalTileId::new(2, 1, 1).unwrap());
        assert_eq!(east.wrap(), 1);
        assert_eq!(east.world_x(), 5);

        let west = UnwrappedTileId::from_world(2, -1, 1).unwrap();
        assert_eq!(west.canonical(), CanonicalTileId::new(2, 3, 1).unwrap());
        assert_eq!(west.wrap(), -1);
        assert_eq!(west.world_x(), -1);
    }

    #[test]
    fn test_wraps_share_canonical_but_differ() {
        let a = UnwrappedTileId::from_world(2, 1, 1).unwrap();
        let b = UnwrappedTileId::from_world(2, 5, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(b.to_string(), "2/1/1@w1");
        assert_eq!(a.to_string(), "2/1/1");
    }
}
