//! Tile lifecycle: per-channel states and the observers notified when they change.

mod observer;
mod state;

pub use observer::{ObserverList, RecordingObserver, TileEvent, TileObserver, TracingObserver};
pub use state::{ChannelState, ChannelStates, LifecycleError, TileChannel};
