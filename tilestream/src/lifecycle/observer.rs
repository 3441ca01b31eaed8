//! Notifications to the rendering collaborator.
//!
//! The engine owns an [`ObserverList`] and calls it from the driver loop
//! only, so observers never need internal locking of their own.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::state::{ChannelState, TileChannel};
use crate::fetch::FetchError;
use crate::tile::UnwrappedTileId;

/// Receives tile lifecycle events. Every method defaults to a no-op.
pub trait TileObserver: Send {
    /// A batch of tiles is about to be released. Called once per tick,
    /// before any tile is added.
    fn on_tiles_disposing(&mut self, _tiles: &[UnwrappedTileId]) {}

    /// The tiles about to be added this tick, in add order. Tiles deferred
    /// for lack of a slot are not included.
    fn on_tiles_starting(&mut self, _tiles: &[UnwrappedTileId]) {}

    fn on_tile_added(&mut self, _tile: UnwrappedTileId) {}

    /// Screen placement may have changed. May fire for unchanged tiles.
    fn on_tile_repositioned(&mut self, _tile: UnwrappedTileId) {}

    fn on_channel_state_changed(
        &mut self,
        _tile: UnwrappedTileId,
        _channel: TileChannel,
        _state: ChannelState,
    ) {
    }

    fn on_tile_data_received(
        &mut self,
        _tile: UnwrappedTileId,
        _channel: TileChannel,
        _payload: &Bytes,
    ) {
    }

    fn on_tile_fetch_error(
        &mut self,
        _tile: UnwrappedTileId,
        _channel: TileChannel,
        _error: &FetchError,
    ) {
    }

    /// Every registered channel of the tile has loaded or failed.
    fn on_tile_finished(&mut self, _tile: UnwrappedTileId) {}
}

/// Observers in registration order.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn TileObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Box<dyn TileObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn tiles_disposing(&mut self, tiles: &[UnwrappedTileId]) {
        if tiles.is_empty() {
            return;
        }
        for observer in &mut self.observers {
            observer.on_tiles_disposing(tiles);
        }
    }

    pub fn tiles_starting(&mut self, tiles: &[UnwrappedTileId]) {
        if tiles.is_empty() {
            return;
        }
        for observer in &mut self.observers {
            observer.on_tiles_starting(tiles);
        }
    }

    pub fn tile_added(&mut self, tile: UnwrappedTileId) {
        for observer in &mut self.observers {
            observer.on_tile_added(tile);
        }
    }

    pub fn tile_repositioned(&mut self, tile: UnwrappedTileId) {
        for observer in &mut self.observers {
            observer.on_tile_repositioned(tile);
        }
    }

    pub fn channel_state_changed(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        state: ChannelState,
    ) {
        for observer in &mut self.observers {
            observer.on_channel_state_changed(tile, channel, state);
        }
    }

    pub fn tile_data_received(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        payload: &Bytes,
    ) {
        for observer in &mut self.observers {
            observer.on_tile_data_received(tile, channel, payload);
        }
    }

    pub fn tile_fetch_error(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        error: &FetchError,
    ) {
        for observer in &mut self.observers {
            observer.on_tile_fetch_error(tile, channel, error);
        }
    }

    pub fn tile_finished(&mut self, tile: UnwrappedTileId) {
        for observer in &mut self.observers {
            observer.on_tile_finished(tile);
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl TileObserver for TracingObserver {
    fn on_tiles_disposing(&mut self, tiles: &[UnwrappedTileId]) {
        info!(count = tiles.len(), "Tiles disposing");
    }

    fn on_tiles_starting(&mut self, tiles: &[UnwrappedTileId]) {
        debug!(count = tiles.len(), "Tiles starting");
    }

    fn on_tile_added(&mut self, tile: UnwrappedTileId) {
        info!(tile = %tile, "Tile added");
    }

    fn on_tile_repositioned(&mut self, tile: UnwrappedTileId) {
        debug!(tile = %tile, "Tile repositioned");
    }

    fn on_channel_state_changed(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        state: ChannelState,
    ) {
        debug!(tile = %tile, channel = %channel, state = %state, "Channel state changed");
    }

    fn on_tile_data_received(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        payload: &Bytes,
    ) {
        info!(
            tile = %tile,
            channel = %channel,
            bytes = payload.len(),
            "Tile data received"
        );
    }

    fn on_tile_fetch_error(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        error: &FetchError,
    ) {
        warn!(tile = %tile, channel = %channel, error = %error, "Tile fetch failed");
    }

    fn on_tile_finished(&mut self, tile: UnwrappedTileId) {
        info!(tile = %tile, "Tile finished");
    }
}

/// One recorded observer call.
#[derive(Debug, Clone, PartialEq)]
pub enum TileEvent {
    Disposing(Vec<UnwrappedTileId>),
    Starting(Vec<UnwrappedTileId>),
    Added(UnwrappedTileId),
    Repositioned(UnwrappedTileId),
    StateChanged(UnwrappedTileId, TileChannel, ChannelState),
    DataReceived(UnwrappedTileId, TileChannel, usize),
    FetchError(UnwrappedTileId, TileChannel, FetchError),
    Finished(UnwrappedTileId),
}

impl TileEvent {
    /// The tile an event is about; `None` for batch events.
    pub fn tile(&self) -> Option<UnwrappedTileId> {
        match self {
            TileEvent::Disposing(_) | TileEvent::Starting(_) => None,
            TileEvent::Added(t)
            | TileEvent::Repositioned(t)
            | TileEvent::StateChanged(t, _, _)
            | TileEvent::DataReceived(t, _, _)
            | TileEvent::FetchError(t, _, _)
            | TileEvent::Finished(t) => Some(*t),
        }
    }
}

/// Appends every event to a shared log.
///
/// Clones share the same log, so one clone can be handed to the engine while
/// another is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<TileEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TileEvent> {
        self.events.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<TileEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: TileEvent) {
        self.events.lock().push(event);
    }
}

impl TileObserver for RecordingObserver {
    fn on_tiles_disposing(&mut self, tiles: &[UnwrappedTileId]) {
        self.push(TileEvent::Disposing(tiles.to_vec()));
    }

    fn on_tiles_starting(&mut self, tiles: &[UnwrappedTileId]) {
        self.push(TileEvent::Starting(tiles.to_vec()));
    }

    fn on_tile_added(&mut self, tile: UnwrappedTileId) {
        self.push(TileEvent::Added(tile));
    }

    fn on_tile_repositioned(&mut self, tile: UnwrappedTileId) {
        self.push(TileEvent::Repositioned(tile));
    }

    fn on_channel_state_changed(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        state: ChannelState,
    ) {
        self.push(TileEvent::StateChanged(tile, channel, state));
    }

    fn on_tile_data_received(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        payload: &Bytes,
    ) {
        self.push(TileEvent::DataReceived(tile, channel, payload.len()));
    }

    fn on_tile_fetch_error(
        &mut self,
        tile: UnwrappedTileId,
        channel: TileChannel,
        error: &FetchError,
    ) {
        self.push(TileEvent::FetchError(tile, channel, error.clone()));
    }

    fn on_tile_finished(&mut self, tile: UnwrappedTileId) {
        self.push(TileEvent::Finished(tile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::CanonicalTileId;

    fn tile(x: u32) -> UnwrappedTileId {
        CanonicalTileId::new(5, x, 7).unwrap().into()
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let first = RecordingObserver::new();
        let second = RecordingObserver::new();
        let mut list = ObserverList::new();
        list.add(Box::new(first.clone()));
        list.add(Box::new(second.clone()));

        list.tile_added(tile(1));
        list.channel_state_changed(tile(1), TileChannel::Raster, ChannelState::Loading);

        let expected = vec![
            TileEvent::Added(tile(1)),
            TileEvent::StateChanged(tile(1), TileChannel::Raster, ChannelState::Loading),
        ];
        assert_eq!(first.events(), expected);
        assert_eq!(second.events(), expected);
    }

    #[test]
    fn test_empty_batches_are_not_sent() {
        let recorder = RecordingObserver::new();
        let mut list = ObserverList::new();
        list.add(Box::new(recorder.clone()));

        list.tiles_disposing(&[]);
        list.tiles_starting(&[]);
        assert!(recorder.events().is_empty());

        list.tiles_disposing(&[tile(1), tile(2)]);
        list.tiles_starting(&[tile(3)]);
        assert_eq!(
            recorder.drain(),
            vec![
                TileEvent::Disposing(vec![tile(1), tile(2)]),
                TileEvent::Starting(vec![tile(3)]),
            ]
        );
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_default_methods_are_noops() {
        struct Silent;
        impl TileObserver for Silent {}

        let mut list = ObserverList::new();
        list.add(Box::new(Silent));
        list.add(Box::new(TracingObserver));
        list.tile_repositioned(tile(3));
        list.tile_fetch_error(
            tile(3),
            TileChannel::Vector,
            &FetchError::Transport("x".into()),
        );
        list.tile_finished(tile(3));
        assert_eq!(list.len(), 2);
    }
}
