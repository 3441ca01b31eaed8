//! Fixed-size arena of tile slots.
//!
//! Slots are never freed; releasing one resets it in place and puts its
//! index at the back of the free list. Every acquisition bumps the slot's
//! generation, so a [`SlotHandle`] taken before a recycle no longer resolves
//! afterwards. In-flight requests refer to their slot only through a handle,
//! which is how a late completion for a recycled slot is detected.

use std::collections::VecDeque;

use crate::coordinator::RequestToken;
use crate::lifecycle::{ChannelState, ChannelStates, LifecycleError, TileChannel};
use crate::tile::UnwrappedTileId;

/// Index plus generation of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    generation: u64,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// State of one visible tile.
#[derive(Debug, Default)]
pub struct TileRecord {
    identity: Option<UnwrappedTileId>,
    states: ChannelStates,
    in_flight: [Option<RequestToken>; 3],
    recycled: bool,
    generation: u64,
}

impl TileRecord {
    pub fn identity(&self) -> Option<UnwrappedTileId> {
        self.identity
    }

    pub fn state(&self, channel: TileChannel) -> ChannelState {
        self.states.get(channel)
    }

    pub fn states(&self) -> &ChannelStates {
        &self.states
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the request currently loading `channel`, if any.
    pub fn in_flight_id(&self, channel: TileChannel) -> Option<u64> {
        self.in_flight[channel.index()].as_ref().map(|t| t.id())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.iter().filter(|t| t.is_some()).count()
    }

    /// Move `channel` to `state`; `Ok(true)` if it changed.
    pub fn set_state(
        &mut self,
        channel: TileChannel,
        state: ChannelState,
    ) -> Result<bool, LifecycleError> {
        self.states.transition(channel, state)
    }

    /// Track `token` as the channel's only in-flight request.
    ///
    /// The superseded token, if any, is cancelled and returned.
    pub fn replace_in_flight(
        &mut self,
        channel: TileChannel,
        token: RequestToken,
    ) -> Option<RequestToken> {
        let previous = self.in_flight[channel.index()].replace(token);
        if let Some(ref previous) = previous {
            previous.cancel();
        }
        previous
    }

    /// Stop tracking the request with `token_id`.
    ///
    /// Returns false if a different request (or none) owns the channel.
    pub fn finish_in_flight(&mut self, channel: TileChannel, token_id: u64) -> bool {
        let slot = &mut self.in_flight[channel.index()];
        match slot {
            Some(token) if token.id() == token_id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel and forget every in-flight request, returning how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for slot in &mut self.in_flight {
            if let Some(token) = slot.take() {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Result of releasing a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub tile: UnwrappedTileId,
    /// Channels that were not already `Unregistered`.
    pub reset_channels: Vec<TileChannel>,
}

/// Fixed pool of [`TileRecord`]s.
#[derive(Debug)]
pub struct TilePool {
    slots: Vec<TileRecord>,
    free: VecDeque<usize>,
}

impl TilePool {
    /// A pool of `capacity` slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| TileRecord::default()).collect(),
            free: (0..capacity).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Assign a free slot to `tile`. `None` when the pool is exhausted.
    pub fn acquire(&mut self, tile: UnwrappedTileId) -> Option<SlotHandle> {
        let index = self.free.pop_front()?;
        let record = &mut self.slots[index];
        record.generation += 1;
        record.identity = Some(tile);
        record.recycled = false;
        debug_assert!(record.states.all_unregistered());
        debug_assert_eq!(record.in_flight_count(), 0);
        Some(SlotHandle {
            index,
            generation: record.generation,
        })
    }

    /// Recycle a slot: cancel its requests and reset every channel.
    ///
    /// Returns `None` for a stale handle.
    pub fn release(&mut self, handle: SlotHandle) -> Option<Released> {
        let record = self.get_mut(handle)?;
        let tile = record.identity.take()?;
        record.cancel_all();
        let reset_channels = record.states.reset();
        record.recycled = true;
        self.free.push_back(handle.index);
        Some(Released {
            tile,
            reset_channels,
        })
    }

    /// Resolve a handle; `None` if the slot has since been recycled.
    pub fn get(&self, handle: SlotHandle) -> Option<&TileRecord> {
        self.slots
            .get(handle.index)
            .filter(|r| r.generation == handle.generation && !r.recycled)
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut TileRecord> {
        self.slots
            .get_mut(handle.index)
            .filter(|r| r.generation == handle.generation && !r.recycled)
    }

    /// Whether `handle` still resolves to a slot showing `tile`'s content.
    pub fn is_current(&self, handle: SlotHandle, tile: UnwrappedTileId) -> bool {
        self.get(handle)
            .and_then(|r| r.identity)
            .is_some_and(|id| id.canonical() == tile.canonical())
    }

    /// Handles of every slot in use.
    pub fn active_handles(&self) -> Vec<SlotHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| r.identity.is_some() && !r.recycled)
            .map(|(index, r)| SlotHandle {
                index,
                generation: r.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::CanonicalTileId;

    fn tile(x: u32) -> UnwrappedTileId {
        CanonicalTileId::new(6, x, 9).unwrap().into()
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = TilePool::new(2);
        assert!(pool.acquire(tile(1)).is_some());
        assert!(pool.acquire(tile(2)).is_some());
        assert!(pool.acquire(tile(3)).is_none());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_release_recycles_slot_with_new_generation() {
        let mut pool = TilePool::new(1);
        let first = pool.acquire(tile(1)).unwrap();
        let released = pool.release(first).unwrap();
        assert_eq!(released.tile, tile(1));

        let second = pool.acquire(tile(2)).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(pool.get(first).is_none());
        assert!(pool.release(first).is_none());
        assert_eq!(pool.get(second).unwrap().identity(), Some(tile(2)));
    }

    #[test]
    fn test_release_cancels_and_resets() {
        let mut pool = TilePool::new(1);
        let handle = pool.acquire(tile(1)).unwrap();
        let token = RequestToken::new(7);
        {
            let record = pool.get_mut(handle).unwrap();
            record
                .set_state(TileChannel::Raster, ChannelState::Loading)
                .unwrap();
            record.replace_in_flight(TileChannel::Raster, token.clone());
        }

        let released = pool.release(handle).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(released.reset_channels, vec![TileChannel::Raster]);

        let again = pool.acquire(tile(2)).unwrap();
        let record = pool.get(again).unwrap();
        assert!(record.states().all_unregistered());
        assert_eq!(record.in_flight_count(), 0);
    }

    #[test]
    fn test_new_request_supersedes_previous() {
        let mut pool = TilePool::new(1);
        let handle = pool.acquire(tile(1)).unwrap();
        let record = pool.get_mut(handle).unwrap();

        let old = RequestToken::new(1);
        record.replace_in_flight(TileChannel::Vector, old.clone());
        let superseded = record.replace_in_flight(TileChannel::Vector, RequestToken::new(2));

        assert_eq!(superseded.map(|t| t.id()), Some(1));
        assert!(old.is_cancelled());
        assert_eq!(record.in_flight_id(TileChannel::Vector), Some(2));
        assert!(!record.finish_in_flight(TileChannel::Vector, 1));
        assert!(record.finish_in_flight(TileChannel::Vector, 2));
        assert_eq!(record.in_flight_id(TileChannel::Vector), None);
    }

    #[test]
    fn test_is_current_matches_canonical_identity() {
        let mut pool = TilePool::new(1);
        let wrapped = UnwrappedTileId::new(CanonicalTileId::new(6, 1, 9).unwrap(), 1);
        let handle = pool.acquire(wrapped).unwrap();

        assert!(pool.is_current(handle, tile(1)));
        assert!(!pool.is_current(handle, tile(2)));
    }

    #[test]
    fn test_free_list_is_fifo() {
        let mut pool = TilePool::new(3);
        let a = pool.acquire(tile(1)).unwrap();
        let b = pool.acquire(tile(2)).unwrap();
        pool.release(b);
        pool.release(a);

        let c = pool.acquire(tile(3)).unwrap();
        // Slot 2 was never used and sits at the front of the free list.
        assert_eq!(c.index(), 2);
        assert_eq!(pool.acquire(tile(4)).unwrap().index(), b.index());
        assert_eq!(pool.active_handles().len(), 2);
    }
}
