//! End-to-end streaming through the public API.
//!
//! A scripted [`FetchClient`] stands in for the network so that slot
//! recycling, cancellation and cache fallback can be driven deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use tilestream::cache::BoxFuture;
use tilestream::channel::ElevationMode;
use tilestream::config::StreamConfig;
use tilestream::engine::Applied;
use tilestream::fetch::{FetchClient, FetchError, TileSource};
use tilestream::lifecycle::{ChannelState, RecordingObserver, TileChannel, TileEvent};
use tilestream::tile::{CanonicalTileId, UnwrappedTileId, VisibleSet};
use tilestream::{StreamContext, TileStreamEngine};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
const TEMPLATE: &str = "https://tiles.test/{z}/{x}/{y}.png";

/// Serves PNG bytes (or a scripted error) and optionally holds every
/// request until released.
#[derive(Clone)]
struct ScriptedClient {
    errors: Arc<Mutex<HashMap<String, FetchError>>>,
    gate: Option<Arc<Semaphore>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            errors: Arc::new(Mutex::new(HashMap::new())),
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    fn fail(&self, tile: UnwrappedTileId, error: FetchError) {
        let c = tile.canonical();
        let url = format!("https://tiles.test/{}/{}/{}.png", c.zoom(), c.x(), c.y());
        self.errors.lock().insert(url, error);
    }

    fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FetchClient for ScriptedClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            match self.errors.lock().get(url) {
                Some(error) => Err(error.clone()),
                None => Ok(Bytes::from_static(PNG)),
            }
        })
    }
}

fn tile(x: u32) -> UnwrappedTileId {
    CanonicalTileId::new(8, x, 90).unwrap().into()
}

fn visible(xs: &[u32]) -> VisibleSet {
    xs.iter().map(|x| tile(*x)).collect()
}

fn config(cache_dir: Option<&TempDir>, slots: usize) -> StreamConfig {
    let base = StreamConfig::default()
        .with_max_tile_slots(slots)
        .with_raster_source(Some(TileSource::new("test", TEMPLATE)))
        .with_elevation(ElevationMode::Flat, None)
        .with_vector_source(None);
    match cache_dir {
        Some(dir) => base.with_cache_dir(dir.path()),
        None => base.with_persistent_cache(false),
    }
}

async fn start(
    config: StreamConfig,
    client: &ScriptedClient,
) -> (StreamContext, TileStreamEngine, RecordingObserver) {
    let context = StreamContext::start_with_client(config, Arc::new(client.clone()))
        .await
        .unwrap();
    let mut engine = TileStreamEngine::new(&context);
    let events = RecordingObserver::new();
    engine.add_observer(Box::new(events.clone()));
    (context, engine, events)
}

async fn settle(engine: &mut TileStreamEngine) -> Vec<Applied> {
    let mut applied = Vec::new();
    while engine.in_flight() > 0 {
        let next = tokio::time::timeout(Duration::from_secs(5), engine.process_next())
            .await
            .expect("completion within timeout");
        applied.extend(next);
    }
    applied
}

fn raster_state(engine: &TileStreamEngine, x: u32) -> Option<ChannelState> {
    engine.channel_state(tile(x), TileChannel::Raster)
}

#[tokio::test]
async fn disk_tier_serves_tiles_across_sessions() {
    let dir = TempDir::new().unwrap();
    let client = ScriptedClient::new();

    {
        let (context, mut engine, _) = start(config(Some(&dir), 8), &client).await;
        engine.update_extent(visible(&[1, 2]));
        settle(&mut engine).await;
        context.shutdown();
    }
    assert_eq!(client.calls(), 2);

    let (_context, mut engine, events) = start(config(Some(&dir), 8), &client).await;
    engine.update_extent(visible(&[1, 2]));
    assert_eq!(
        settle(&mut engine).await,
        vec![Applied::Delivered, Applied::Delivered]
    );

    assert_eq!(client.calls(), 2, "second session must not touch the network");
    assert_eq!(engine.metrics().cache_hits, 2);
    let delivered = events
        .events()
        .iter()
        .filter(|e| matches!(e, TileEvent::DataReceived(..)))
        .count();
    assert_eq!(delivered, 2);
}

#[tokio::test]
async fn cancelled_tile_never_reports_data_or_errors() {
    let client = ScriptedClient::gated();
    let (_context, mut engine, events) = start(config(None, 4), &client).await;

    engine.update_extent(visible(&[1]));
    engine.update_extent(visible(&[]));
    client.release(4);

    let stale = tokio::time::timeout(Duration::from_secs(5), engine.process_next())
        .await
        .unwrap();
    assert_eq!(stale, Some(Applied::Stale));

    let about_tile_1: Vec<_> = events
        .events()
        .into_iter()
        .filter(|e| e.tile() == Some(tile(1)))
        .collect();
    assert!(about_tile_1
        .iter()
        .all(|e| !matches!(e, TileEvent::DataReceived(..) | TileEvent::FetchError(..))));
    assert!(engine.active_tiles().is_empty());
}

#[tokio::test]
async fn http_error_moves_channel_to_error_and_later_recovers() {
    let client = ScriptedClient::new();
    client.fail(
        tile(3),
        FetchError::Http {
            status: 503,
            url: "https://tiles.test/8/3/90.png".into(),
        },
    );
    let (_context, mut engine, events) = start(config(None, 4), &client).await;

    engine.update_extent(visible(&[3, 4]));
    settle(&mut engine).await;

    assert_eq!(raster_state(&engine, 3), Some(ChannelState::Error));
    assert_eq!(raster_state(&engine, 4), Some(ChannelState::Loaded));
    let errored = TileEvent::StateChanged(tile(3), TileChannel::Raster, ChannelState::Error);
    assert!(events.events().contains(&errored));
    assert!(events.events().contains(&TileEvent::Finished(tile(3))));

    // Failures are not cached; a refresh goes back to the network.
    client.errors.lock().clear();
    engine.refresh_all();
    settle(&mut engine).await;
    assert_eq!(raster_state(&engine, 3), Some(ChannelState::Loaded));
}

#[tokio::test]
async fn panning_keeps_overlap_and_reuses_slots() {
    let client = ScriptedClient::new();
    let (_context, mut engine, events) = start(config(None, 2), &client).await;

    engine.update_extent(visible(&[1, 2]));
    settle(&mut engine).await;
    events.drain();

    let summary = engine.update_extent(visible(&[2, 3]));
    assert!(summary.deferred.is_empty(), "disposal frees the slot before adds");
    settle(&mut engine).await;

    let recorded = events.events();
    assert_eq!(recorded[0], TileEvent::Disposing(vec![tile(1)]));
    assert!(recorded.contains(&TileEvent::Starting(vec![tile(3)])));
    assert!(recorded.contains(&TileEvent::Finished(tile(3))));
    assert!(!recorded.contains(&TileEvent::Added(tile(2))));
    assert!(recorded.contains(&TileEvent::Repositioned(tile(2))));
    assert!(recorded.contains(&TileEvent::Added(tile(3))));
    assert_eq!(engine.active_tiles(), vec![tile(2), tile(3)]);
    assert_eq!(raster_state(&engine, 3), Some(ChannelState::Loaded));
}

#[tokio::test]
async fn recycled_slot_only_shows_its_new_tile() {
    let client = ScriptedClient::gated();
    let (_context, mut engine, events) = start(config(None, 1), &client).await;

    engine.update_extent(visible(&[5]));
    engine.update_extent(visible(&[6]));
    client.release(2);
    settle(&mut engine).await;

    assert_eq!(engine.active_tiles(), vec![tile(6)]);
    assert_eq!(raster_state(&engine, 6), Some(ChannelState::Loaded));
    assert!(!events
        .events()
        .iter()
        .any(|e| matches!(e, TileEvent::DataReceived(t, ..) if *t == tile(5))));
    assert!(engine.metrics().stale_completions >= 1);
}
