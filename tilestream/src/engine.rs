//! The streaming engine and its driver loop.
//!
//! [`TileStreamEngine`] is the single owner of tile state. Viewport changes
//! arrive through [`update_extent`](TileStreamEngine::update_extent) and
//! request outcomes through the coordinator's completion channel; both are
//! applied on whichever task drives the engine, so slot and channel state are
//! never shared across threads.
//!
//! # Tick order
//!
//! 1. Tiles leaving the view are announced in one batch, then disposed:
//!    pipelines forget them and their slots are recycled (cancelling any
//!    in-flight requests).
//! 2. Tiles that stay are repositioned.
//! 3. The tiles that will get a slot are announced in one batch. Each then
//!    takes its slot, is announced, positioned, and registered on every
//!    channel. Tiles that find no free slot are deferred; they are still
//!    visible, so the next tick picks them up again.
//!
//! Once every registered channel of a tile has loaded or failed, observers
//! hear that the tile is finished.
//!
//! # Staleness
//!
//! A completion is applied only if its slot handle still resolves (same
//! generation, not recycled), the slot still shows the same tile, and the
//! channel's in-flight request is the one that completed. Anything else is
//! counted and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::channel::{
    ChannelPipeline, HeightChannel, RasterChannel, Registration, VectorChannel,
};
use crate::context::StreamContext;
use crate::coordinator::{Completion, Outcome, TileFetchCoordinator};
use crate::lifecycle::{ChannelState, ObserverList, TileChannel, TileObserver};
use crate::pool::{SlotHandle, TilePool, TileRecord};
use crate::reconcile::{CleanupPredicate, ExtentReconciler, ReconcileDelta};
use crate::telemetry::{MetricsSnapshot, StreamMetrics};
use crate::tile::{UnwrappedTileId, VisibleSet};

/// Result of one extent update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub delta: ReconcileDelta,
    /// Tiles from `delta.to_add` that found no free slot.
    pub deferred: Vec<UnwrappedTileId>,
}

impl TickSummary {
    pub fn added(&self) -> usize {
        self.delta.to_add.len() - self.deferred.len()
    }
}

/// What applying a completion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Payload accepted; the channel is `Loaded`.
    Delivered,
    /// Fetch or post-processing failed; the channel is in `Error`.
    Failed,
    /// Cancelled, superseded, or the slot was recycled.
    Stale,
}

pub struct TileStreamEngine {
    pool: TilePool,
    active: HashMap<UnwrappedTileId, SlotHandle>,
    reconciler: ExtentReconciler,
    pipelines: Vec<ChannelPipeline>,
    coordinator: TileFetchCoordinator,
    completions: mpsc::UnboundedReceiver<Completion>,
    observers: ObserverList,
    metrics: Arc<StreamMetrics>,
    auto_refresh: bool,
}

impl TileStreamEngine {
    /// Build an engine over the context's shared cache, fetcher and metrics.
    pub fn new(context: &StreamContext) -> Self {
        let config = context.config();
        let pipelines = vec![
            ChannelPipeline::Raster(RasterChannel::new(config.raster_source().cloned())),
            ChannelPipeline::Height(HeightChannel::new(
                config.elevation_source().cloned(),
                config.elevation_mode(),
            )),
            ChannelPipeline::Vector(VectorChannel::new(config.vector_source().cloned())),
        ];

        let metrics = Arc::clone(context.metrics());
        let (coordinator, completions) = TileFetchCoordinator::new(
            context.chain().clone(),
            context.fetcher().clone(),
            config.request_timeout(),
            Arc::clone(&metrics),
        );

        Self {
            pool: TilePool::new(config.max_tile_slots()),
            active: HashMap::new(),
            reconciler: ExtentReconciler::new(),
            pipelines,
            coordinator,
            completions,
            observers: ObserverList::new(),
            metrics,
            auto_refresh: config.auto_refresh_on_reinit(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn TileObserver>) {
        self.observers.add(observer);
    }

    /// Replace the veto consulted before disposing a tile that left the view.
    pub fn set_cleanup_predicate(&mut self, predicate: CleanupPredicate) {
        self.reconciler.set_cleanup(predicate);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Tiles currently holding a slot, sorted.
    pub fn active_tiles(&self) -> Vec<UnwrappedTileId> {
        let mut tiles: Vec<_> = self.active.keys().copied().collect();
        tiles.sort();
        tiles
    }

    pub fn record(&self, tile: UnwrappedTileId) -> Option<&TileRecord> {
        self.active.get(&tile).and_then(|h| self.pool.get(*h))
    }

    pub fn channel_state(
        &self,
        tile: UnwrappedTileId,
        channel: TileChannel,
    ) -> Option<ChannelState> {
        self.record(tile).map(|r| r.state(channel))
    }

    /// Requests issued for active tiles and not yet applied.
    pub fn in_flight(&self) -> usize {
        self.active
            .values()
            .filter_map(|h| self.pool.get(*h))
            .map(|r| r.in_flight_count())
            .sum()
    }

    pub fn free_slots(&self) -> usize {
        self.pool.available()
    }

    /// Reconcile a new visible set against the active tiles and apply it.
    pub fn update_extent(&mut self, visible: VisibleSet) -> TickSummary {
        let delta = self.reconciler.reconcile(visible, self.active.keys());

        self.observers.tiles_disposing(&delta.to_dispose);
        for tile in &delta.to_dispose {
            self.dispose(*tile);
        }

        for tile in &delta.to_reposition {
            self.observers.tile_repositioned(*tile);
        }

        let admitted = delta.to_add.len().min(self.pool.available());
        self.observers.tiles_starting(&delta.to_add[..admitted]);

        let mut deferred = Vec::new();
        for tile in &delta.to_add {
            match self.pool.acquire(*tile) {
                Some(handle) => {
                    self.active.insert(*tile, handle);
                    self.observers.tile_added(*tile);
                    self.observers.tile_repositioned(*tile);
                    self.register_channels(handle, *tile);
                }
                None => deferred.push(*tile),
            }
        }

        let summary = TickSummary { delta, deferred };
        self.metrics.tiles_disposed(summary.delta.to_dispose.len());
        self.metrics.tiles_added(summary.added());
        if !summary.deferred.is_empty() {
            self.metrics.tiles_deferred(summary.deferred.len());
            warn!(
                deferred = summary.deferred.len(),
                capacity = self.pool.capacity(),
                "Tile pool exhausted, deferring adds"
            );
        }

        debug!(
            disposed = summary.delta.to_dispose.len(),
            repositioned = summary.delta.to_reposition.len(),
            added = summary.added(),
            deferred = summary.deferred.len(),
            "Extent reconciled"
        );
        summary
    }

    fn dispose(&mut self, tile: UnwrappedTileId) {
        let Some(handle) = self.active.remove(&tile) else {
            return;
        };
        for pipeline in &mut self.pipelines {
            pipeline.unregister(tile);
        }
        if let Some(released) = self.pool.release(handle) {
            for channel in released.reset_channels {
                self.observers
                    .channel_state_changed(tile, channel, ChannelState::Unregistered);
            }
        }
    }

    /// Register `tile` on every channel, issuing requests where needed.
    fn register_channels(&mut self, handle: SlotHandle, tile: UnwrappedTileId) {
        for index in 0..self.pipelines.len() {
            let channel = self.pipelines[index].channel();
            let registration = self.pipelines[index].register(tile);
            match registration {
                Registration::Skip => {}
                Registration::Ready => {
                    let state = self.pool.get(handle).map(|r| r.state(channel));
                    if state != Some(ChannelState::Loaded) {
                        self.transition(handle, tile, channel, ChannelState::Loading);
                        self.transition(handle, tile, channel, ChannelState::Loaded);
                    }
                }
                Registration::Fetch(resource) => {
                    self.transition(handle, tile, channel, ChannelState::Loading);
                    let token = self.coordinator.request(handle, tile, channel, resource);
                    if let Some(record) = self.pool.get_mut(handle) {
                        record.replace_in_flight(channel, token);
                    } else {
                        token.cancel();
                    }
                }
            }
        }
        self.check_finished(handle, tile);
    }

    /// Announce the tile as finished once no registered channel is pending.
    fn check_finished(&mut self, handle: SlotHandle, tile: UnwrappedTileId) {
        if self.pipelines.iter().any(|p| p.is_waiting(tile)) {
            return;
        }
        let settled = self
            .pool
            .get(handle)
            .is_some_and(|r| r.states().is_settled());
        if settled {
            self.observers.tile_finished(tile);
        }
    }

    /// Move a channel to `state`, notifying observers if it changed.
    fn transition(
        &mut self,
        handle: SlotHandle,
        tile: UnwrappedTileId,
        channel: TileChannel,
        state: ChannelState,
    ) -> bool {
        let Some(record) = self.pool.get_mut(handle) else {
            return false;
        };
        match record.set_state(channel, state) {
            Ok(true) => {
                self.observers.channel_state_changed(tile, channel, state);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(tile = %tile, error = %e, "Rejected channel transition");
                false
            }
        }
    }

    fn apply(&mut self, completion: Completion) -> Applied {
        let Completion {
            slot,
            tile,
            channel,
            token_id,
            outcome,
        } = completion;

        let current = self.pool.is_current(slot, tile)
            && self.pool.get(slot).and_then(|r| r.in_flight_id(channel)) == Some(token_id);
        if !current || outcome == Outcome::Cancelled {
            self.metrics.stale_completion();
            debug!(
                tile = %tile,
                channel = %channel,
                token = token_id,
                "Stale completion discarded"
            );
            return Applied::Stale;
        }
        if let Some(record) = self.pool.get_mut(slot) {
            record.finish_in_flight(channel, token_id);
        }

        let Some(pipeline) = self.pipelines.iter_mut().find(|p| p.channel() == channel) else {
            return Applied::Stale;
        };

        let result = match outcome {
            Outcome::CacheHit { payload, .. } | Outcome::Fetched(payload) => {
                pipeline.post_process(tile, &payload).map(|()| payload)
            }
            Outcome::Failed(error) => {
                pipeline.fetch_failed(tile);
                Err(error)
            }
            Outcome::Cancelled => return Applied::Stale,
        };

        let applied = match result {
            Ok(payload) => {
                self.observers.tile_data_received(tile, channel, &payload);
                self.transition(slot, tile, channel, ChannelState::Loaded);
                self.metrics.delivered();
                Applied::Delivered
            }
            Err(error) => {
                warn!(tile = %tile, channel = %channel, error = %error, "Tile load failed");
                self.observers.tile_fetch_error(tile, channel, &error);
                self.transition(slot, tile, channel, ChannelState::Error);
                Applied::Failed
            }
        };
        self.check_finished(slot, tile);
        applied
    }

    /// Apply every completion already queued, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    /// Wait for the next completion and apply it.
    ///
    /// Waits indefinitely if nothing is in flight.
    pub async fn process_next(&mut self) -> Option<Applied> {
        let completion = self.completions.recv().await?;
        Some(self.apply(completion))
    }

    /// Drive the engine until `shutdown` fires or the extent channel closes.
    ///
    /// After the extent sender is dropped the loop keeps applying
    /// completions until every request for an active tile has finished.
    pub async fn run(
        &mut self,
        mut extents: mpsc::Receiver<VisibleSet>,
        shutdown: CancellationToken,
    ) {
        enum Event {
            Shutdown,
            Extent(Option<VisibleSet>),
            Completion(Completion),
        }

        let mut extents_open = true;
        loop {
            if !extents_open && self.in_flight() == 0 {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Event::Shutdown,
                extent = extents.recv(), if extents_open => Event::Extent(extent),
                Some(completion) = self.completions.recv() => Event::Completion(completion),
            };

            match event {
                Event::Shutdown => break,
                Event::Extent(Some(visible)) => {
                    self.update_extent(visible);
                }
                Event::Extent(None) => {
                    debug!(in_flight = self.in_flight(), "Extent channel closed, draining");
                    extents_open = false;
                }
                Event::Completion(completion) => {
                    self.apply(completion);
                }
            }
        }

        self.shutdown();
    }

    /// Re-request every registered channel of every active tile.
    pub fn refresh_all(&mut self) {
        let mut tiles: Vec<_> = self.active.iter().map(|(t, h)| (*t, *h)).collect();
        tiles.sort_by_key(|(tile, _)| *tile);
        for (tile, handle) in &tiles {
            self.register_channels(*handle, *tile);
        }
        info!(tiles = tiles.len(), "Refreshed active tiles");
    }

    /// Clear and reinitialise the caches, then refresh if configured to.
    pub async fn reinitialize_caches(&mut self) -> Result<(), CacheError> {
        let chain = self.coordinator.chain().clone();
        chain.clear().await?;
        chain.reinit().await?;
        info!(auto_refresh = self.auto_refresh, "Caches reinitialised");
        if self.auto_refresh {
            self.refresh_all();
        }
        Ok(())
    }

    /// Cancel every in-flight request.
    ///
    /// Tiles keep their slots and states; completions that arrive later are
    /// discarded as stale.
    pub fn shutdown(&mut self) {
        let mut cancelled = 0;
        for handle in self.pool.active_handles() {
            if let Some(record) = self.pool.get_mut(handle) {
                cancelled += record.cancel_all();
            }
        }
        info!(cancelled, active = self.active.len(), "Engine shut down");
    }
}
