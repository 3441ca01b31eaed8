//! `tilestream stream`: pan a viewport and stream its tiles.
//!
//! The viewport starts at the given position and moves one tile east per
//! step. Observer events are logged; a metrics summary is printed when the
//! last step has loaded or Ctrl-C is pressed.

use std::time::Duration;

use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};

use tilestream::config::StreamConfig;
use tilestream::lifecycle::TracingObserver;
use tilestream::tile::{lat_lon_to_tile, RangeAroundCenter};
use tilestream::{StreamContext, TileStreamEngine};

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Zoom level
    #[arg(long, default_value = "12")]
    pub zoom: u8,

    /// Tiles to include around the centre in every direction, clamped to
    /// the width of the world at the zoom level
    #[arg(long, default_value = "1")]
    pub range: u32,

    /// Number of one-tile eastward moves
    #[arg(long, default_value = "5")]
    pub steps: u32,

    /// Delay between moves in milliseconds
    #[arg(long, default_value = "500")]
    pub interval_ms: u64,
}

pub async fn run(args: StreamArgs, config: StreamConfig) -> Result<(), CliError> {
    let (col, row) = lat_lon_to_tile(args.lat, args.lon, args.zoom)?;
    let range = RangeAroundCenter::uniform(args.zoom, args.range).clamped();
    if let Some(tiles) = exceeds_pool(&range, config.max_tile_slots()) {
        warn!(
            tiles,
            slots = config.max_tile_slots(),
            "View is larger than the tile pool; some tiles will be deferred"
        );
    }

    let context = StreamContext::start(config).await.map_err(CliError::Start)?;
    let mut engine = TileStreamEngine::new(&context);
    engine.add_observer(Box::new(TracingObserver));

    let shutdown = context.shutdown_token();
    let interrupt = shutdown.clone();
    ctrlc::set_handler(move || interrupt.cancel())
        .map_err(|e| CliError::Signal(e.to_string()))?;

    info!(
        lat = args.lat,
        lon = args.lon,
        zoom = args.zoom,
        col,
        row,
        steps = args.steps,
        "Streaming started"
    );

    let (tx, rx) = mpsc::channel(4);
    let pan_shutdown = shutdown.clone();
    let steps = args.steps;
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let panner = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        for step in 0..=steps {
            tokio::select! {
                _ = pan_shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let visible = range.visible_tiles_around(i64::from(col) + i64::from(step), row);
            info!(step, tiles = visible.len(), "Viewport moved");
            if tx.send(visible).await.is_err() {
                break;
            }
        }
    });

    engine.run(rx, shutdown).await;
    if let Err(e) = panner.await {
        tracing::warn!(error = %e, "Viewport task ended abnormally");
    }

    let snapshot = engine.metrics();
    let active = engine.active_tiles().len();
    context.shutdown();

    println!();
    println!("Streamed {} steps, {} tiles active at exit", steps, active);
    println!("{}", snapshot);
    Ok(())
}

/// The view's tile count when it cannot fit in `slots`.
fn exceeds_pool(range: &RangeAroundCenter, slots: usize) -> Option<u64> {
    let tiles = range.max_tiles();
    (tiles > slots as u64).then_some(tiles)
}
