//! Tile resource addressing.
//!
//! A [`TileSource`] turns a canonical tile into a [`TileResource`] by filling
//! in its URL template. Templates may contain `{z}`, `{x}`, `{y}` and
//! `{dataset}` placeholders.

use reqwest::Url;

use super::error::FetchError;
use crate::cache::CacheKey;
use crate::tile::CanonicalTileId;

/// Where one dataset's tiles are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSource {
    dataset: String,
    url_template: String,
}

impl TileSource {
    pub fn new(dataset: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            url_template: url_template.into(),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Address `tile` within this source.
    pub fn resource(&self, tile: CanonicalTileId) -> TileResource {
        let raw = self
            .url_template
            .replace("{z}", &tile.zoom().to_string())
            .replace("{x}", &tile.x().to_string())
            .replace("{y}", &tile.y().to_string())
            .replace("{dataset}", &self.dataset);

        TileResource {
            dataset: self.dataset.clone(),
            tile,
            raw_url: raw,
        }
    }
}

/// A single fetchable tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileResource {
    dataset: String,
    tile: CanonicalTileId,
    raw_url: String,
}

impl TileResource {
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn tile(&self) -> CanonicalTileId {
        self.tile
    }

    /// Cache key shared by every request for this dataset and tile.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.dataset, self.tile)
    }

    /// The request URL with its query string normalised.
    ///
    /// Templates that already carry a `?` before appended parameters produce
    /// queries like `??access_token=...`; the stray leading `?` is dropped.
    /// An empty query is removed entirely.
    pub fn url(&self) -> Result<String, FetchError> {
        let (base, query) = match self.raw_url.split_once('?') {
            Some((base, query)) => (base, Some(query.trim_start_matches('?'))),
            None => (self.raw_url.as_str(), None),
        };

        let mut url = Url::parse(base)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", self.raw_url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                self.raw_url,
                url.scheme()
            )));
        }

        match query {
            Some(q) if !q.is_empty() => url.set_query(Some(q)),
            _ => url.set_query(None),
        }

        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> CanonicalTileId {
        CanonicalTileId::new(3, 4, 2).unwrap()
    }

    #[test]
    fn test_template_substitution() {
        let source = TileSource::new("osm", "https://tile.openstreetmap.org/{z}/{x}/{y}.png");
        let resource = source.resource(tile());
        assert_eq!(
            resource.url().unwrap(),
            "https://tile.openstreetmap.org/3/4/2.png"
        );
        assert_eq!(resource.cache_key().to_string(), "osm/3/4/2");
    }

    #[test]
    fn test_dataset_placeholder() {
        let source = TileSource::new(
            "mapbox.terrain-rgb",
            "https://api.example.com/v4/{dataset}/{z}/{x}/{y}.pngraw?access_token=abc",
        );
        assert_eq!(
            source.resource(tile()).url().unwrap(),
            "https://api.example.com/v4/mapbox.terrain-rgb/3/4/2.pngraw?access_token=abc"
        );
    }

    #[test]
    fn test_stray_leading_question_mark_is_stripped() {
        let source = TileSource::new("s", "https://tiles.example.com/{z}/{x}/{y}.png??key=1&v=2");
        assert_eq!(
            source.resource(tile()).url().unwrap(),
            "https://tiles.example.com/3/4/2.png?key=1&v=2"
        );
    }

    #[test]
    fn test_empty_query_is_removed() {
        let source = TileSource::new("s", "https://tiles.example.com/{z}/{x}/{y}.png?");
        assert_eq!(
            source.resource(tile()).url().unwrap(),
            "https://tiles.example.com/3/4/2.png"
        );
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        let relative = TileSource::new("s", "/{z}/{x}/{y}.png");
        assert!(matches!(
            relative.resource(tile()).url(),
            Err(FetchError::InvalidUrl(_))
        ));

        let file = TileSource::new("s", "file:///tmp/{z}/{x}/{y}.png");
        assert!(matches!(
            file.resource(tile()).url(),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
