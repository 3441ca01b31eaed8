//! TileStream - map tile streaming for a continuously moving viewport
//!
//! This library fetches raster, elevation and vector tiles through a layered
//! cache (memory, then disk) with a network fallback, and reconciles the set
//! of on-screen tiles every time the viewport changes. Rendering is left to a
//! collaborator that implements [`lifecycle::TileObserver`].
//!
//! # Architecture
//!
//! ```text
//! viewport ──► ExtentReconciler ──► dispose / reposition / add
//!                                            │
//!                                            ▼
//!                  TilePool slot ──► TileFetchCoordinator
//!                                     │            │
//!                                     ▼            ▼
//!                               CacheChain     Fetcher ──► network
//!                                     │            │
//!                                     └─── completion channel ───► driver loop
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod fetch;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod reconcile;
pub mod telemetry;
pub mod tile;

pub use context::{StreamContext, StreamError};
pub use engine::TileStreamEngine;

/// Crate version, used in log banners and the HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
