//! Per-channel tile state machine.
//!
//! # State Machine
//!
//! ```text
//! Unregistered --register--> Loading
//! Loading --payload accepted--> Loaded
//! Loading --fetch failed / payload rejected--> Error
//! Loaded | Error --register--> Loading
//! any --recycle--> Unregistered
//! ```
//!
//! Setting a channel to the state it is already in is a no-op and reports no
//! change, so observers are only notified on real transitions.

use std::fmt;

use thiserror::Error;

/// Independent data kinds attached to a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileChannel {
    /// Imagery.
    Raster,
    /// Elevation.
    Height,
    /// Vector features.
    Vector,
}

impl TileChannel {
    pub const ALL: [TileChannel; 3] = [
        TileChannel::Raster,
        TileChannel::Height,
        TileChannel::Vector,
    ];

    pub fn index(self) -> usize {
        match self {
            TileChannel::Raster => 0,
            TileChannel::Height => 1,
            TileChannel::Vector => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TileChannel::Raster => "raster",
            TileChannel::Height => "height",
            TileChannel::Vector => "vector",
        }
    }
}

impl fmt::Display for TileChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of one channel of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    #[default]
    Unregistered,
    Loading,
    Loaded,
    Error,
}

impl ChannelState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Staying in the same state is always legal.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (_, Unregistered)
                | (Unregistered, Loading)
                | (Loaded, Loading)
                | (Error, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Loaded | ChannelState::Error)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Unregistered => "unregistered",
            ChannelState::Loading => "loading",
            ChannelState::Loaded => "loaded",
            ChannelState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid {channel} transition: {from} -> {to}")]
    InvalidTransition {
        channel: TileChannel,
        from: ChannelState,
        to: ChannelState,
    },
}

/// The three channel states of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStates {
    states: [ChannelState; 3],
}

impl ChannelStates {
    pub fn get(&self, channel: TileChannel) -> ChannelState {
        self.states[channel.index()]
    }

    /// Move `channel` to `next`.
    ///
    /// Returns `Ok(true)` if the state changed, `Ok(false)` for a no-op.
    pub fn transition(
        &mut self,
        channel: TileChannel,
        next: ChannelState,
    ) -> Result<bool, LifecycleError> {
        let current = self.get(channel);
        if !current.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                channel,
                from: current,
                to: next,
            });
        }
        self.states[channel.index()] = next;
        Ok(current != next)
    }

    /// Force every channel back to `Unregistered`, returning those that changed.
    pub fn reset(&mut self) -> Vec<TileChannel> {
        let mut changed = Vec::new();
        for channel in TileChannel::ALL {
            if self.get(channel) != ChannelState::Unregistered {
                self.states[channel.index()] = ChannelState::Unregistered;
                changed.push(channel);
            }
        }
        changed
    }

    pub fn all_unregistered(&self) -> bool {
        self.states.iter().all(|s| *s == ChannelState::Unregistered)
    }

    /// No channel is loading and at least one has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        !self.states.contains(&ChannelState::Loading)
            && self.states.iter().any(|s| s.is_terminal())
    }
}
