//! Tile addressing.
//!
//! Provides the identity types shared by every other module and the extent
//! calculation that turns a viewport position into a [`VisibleSet`].

mod extent;
mod id;

pub use extent::{lat_lon_to_tile, RangeAroundCenter, VisibleSet, MAX_LAT, MIN_LAT};
pub use id::{tiles_per_axis, CanonicalTileId, TileIdError, UnwrappedTileId, MAX_ZOOM};
