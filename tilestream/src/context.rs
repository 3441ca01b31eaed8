//! Explicit startup and teardown of shared streaming resources.
//!
//! A [`StreamContext`] owns the cache chain, the fetcher with its
//! concurrency limiter, and the metrics. It is created once at startup and
//! handed to every [`TileStreamEngine`](crate::TileStreamEngine) that needs
//! it; there is no global instance.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheChain, CacheError, CacheTier, DiskTier, MemoryTier};
use crate::config::StreamConfig;
use crate::fetch::{ConcurrencyLimiter, FetchClient, FetchError, Fetcher, HttpFetchClient};
use crate::telemetry::StreamMetrics;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch setup failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Stream context has been shut down")]
    ShutDown,
}

/// Shared resources for tile streaming.
pub struct StreamContext {
    config: StreamConfig,
    chain: CacheChain,
    memory: Arc<MemoryTier>,
    disk: Option<Arc<DiskTier>>,
    fetcher: Fetcher,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
}

impl StreamContext {
    /// Start with the reqwest HTTP client.
    pub async fn start(config: StreamConfig) -> Result<Self, StreamError> {
        let client = HttpFetchClient::new(config.request_timeout())?;
        Self::start_with_client(config, Arc::new(client)).await
    }

    /// Start with a caller-supplied fetch client.
    pub async fn start_with_client(
        config: StreamConfig,
        client: Arc<dyn FetchClient>,
    ) -> Result<Self, StreamError> {
        let memory = Arc::new(MemoryTier::new(config.memory_cache_entries()));
        let mut chain = CacheChain::new().with_tier(memory.clone());

        let disk = if config.persistent_cache() {
            let disk = Arc::new(
                DiskTier::open(config.cache_dir(), config.disk_cache_entries()).await?,
            );
            chain = chain.with_tier(disk.clone());
            Some(disk)
        } else {
            None
        };

        let limiter = Arc::new(ConcurrencyLimiter::new(
            config.max_concurrent_fetches(),
            "fetch",
        ));
        let fetcher = Fetcher::new(client, limiter);

        info!(
            memory_entries = memory.max_entries(),
            disk_entries = disk.as_ref().map(|d| d.max_entries()).unwrap_or(0),
            max_concurrent = config.max_concurrent_fetches(),
            timeout_secs = config.request_timeout().as_secs(),
            "Stream context started"
        );

        Ok(Self {
            config,
            chain,
            memory,
            disk,
            fetcher,
            metrics: Arc::new(StreamMetrics::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn chain(&self) -> &CacheChain {
        &self.chain
    }

    pub fn memory_tier(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    pub fn disk_tier(&self) -> Option<&Arc<DiskTier>> {
        self.disk.as_ref()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Cancelled by [`shutdown`](Self::shutdown); driver loops select on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Clear and reinitialise every cache tier.
    pub async fn clear_caches(&self) -> Result<(), StreamError> {
        if self.is_shut_down() {
            return Err(StreamError::ShutDown);
        }
        self.chain.clear().await?;
        self.chain.reinit().await?;
        info!("Caches cleared");
        Ok(())
    }

    /// Stop admitting fetches and signal driver loops to exit.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.fetcher.limiter().close();
        self.shutdown.cancel();
        info!(metrics = %self.metrics.snapshot(), "Stream context shut down");
    }
}
