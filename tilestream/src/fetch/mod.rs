//! Network side of the pipeline.
//!
//! - [`TileSource`] / [`TileResource`]: URL templates and query normalisation
//! - [`FetchClient`]: the HTTP seam, with [`HttpFetchClient`] over reqwest
//! - [`ConcurrencyLimiter`]: FIFO ceiling on concurrent requests
//! - [`Fetcher`]: cancellable callback-style fetches with per-request timeouts

mod client;
mod error;
mod fetcher;
mod limiter;
mod resource;

pub use client::{FetchClient, HttpFetchClient};
pub use error::FetchError;
pub use fetcher::{FetchHandle, Fetcher};
pub use limiter::{ConcurrencyLimiter, ConcurrencyPermit, DEFAULT_MAX_CONCURRENT};
pub use resource::{TileResource, TileSource};

#[cfg(test)]
pub(crate) use client::mock::MockFetchClient;
