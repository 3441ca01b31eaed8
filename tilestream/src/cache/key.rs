//! Cache key derived from a dataset and a canonical tile.

use std::fmt;

use crate::tile::CanonicalTileId;

/// Key under which a tile payload is cached.
///
/// Keys are always built from the canonical tile id, so every world copy of a
/// tile shares one entry. The dataset keeps raster, elevation and vector
/// payloads for the same tile apart.
///
/// The dataset name is stored in its filesystem-safe form, which makes the
/// key identical to what the disk tier reconstructs when it rescans its
/// directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    dataset: String,
    tile: CanonicalTileId,
}

impl CacheKey {
    pub fn new(dataset: &str, tile: CanonicalTileId) -> Self {
        Self {
            dataset: sanitize_dataset(dataset),
            tile,
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn tile(&self) -> CanonicalTileId {
        self.tile
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.tile)
    }
}

/// Replace anything that is not safe as a single path component.
fn sanitize_dataset(dataset: &str) -> String {
    let cleaned: String = dataset
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> CanonicalTileId {
        CanonicalTileId::new(15, 5279, 12754).unwrap()
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey::new("mapbox.satellite", tile());
        assert_eq!(key.to_string(), "mapbox.satellite/15/5279/12754");
    }

    #[test]
    fn test_key_sanitizes_dataset() {
        let key = CacheKey::new("user/style:v1", tile());
        assert_eq!(key.dataset(), "user_style_v1");
        assert_eq!(CacheKey::new("..", tile()).dataset(), "_");
        assert_eq!(CacheKey::new("", tile()).dataset(), "_");
    }

    #[test]
    fn test_datasets_do_not_collide() {
        let raster = CacheKey::new("raster", tile());
        let height = CacheKey::new("terrain-rgb", tile());
        assert_ne!(raster, height);
        assert_eq!(raster.tile(), height.tile());
    }
}
