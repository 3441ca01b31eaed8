//! Per-request orchestration: cache chain first, network second.
//!
//! [`TileFetchCoordinator::request`] spawns one task per tile channel
//! request. The task looks the tile up in the [`CacheChain`], falls back to
//! the [`Fetcher`] on a miss, validates the payload for its channel, writes
//! accepted payloads back to every tier, and finally sends exactly one
//! [`Completion`] to the driver loop.
//!
//! A cached payload that fails validation is treated as a miss and replaced
//! by the refetched one.
//!
//! The task never touches tile state. Completions carry the slot handle,
//! tile identity and request id they were issued for; the driver checks all
//! three before applying anything, which is what makes a late completion for
//! a recycled slot harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::{CacheChain, CacheKey};
use crate::channel::validate_payload;
use crate::fetch::{FetchError, FetchHandle, Fetcher, TileResource};
use crate::lifecycle::TileChannel;
use crate::pool::SlotHandle;
use crate::telemetry::StreamMetrics;
use crate::tile::UnwrappedTileId;

/// Opaque handle to one in-flight request.
///
/// Cancelling is idempotent and safe whether or not the request has already
/// completed.
#[derive(Debug, Clone)]
pub struct RequestToken {
    id: u64,
    cancel: CancellationToken,
}

impl RequestToken {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Served from a cache tier without touching the network.
    CacheHit { payload: Bytes, tier: String },
    /// Fetched from the network and written back to the cache.
    Fetched(Bytes),
    /// The fetch failed; nothing was cached.
    Failed(FetchError),
    /// The token was cancelled before a result was available.
    Cancelled,
}

/// Message sent to the driver loop when a request ends.
#[derive(Debug, Clone)]
pub struct Completion {
    pub slot: SlotHandle,
    pub tile: UnwrappedTileId,
    pub channel: TileChannel,
    pub token_id: u64,
    pub outcome: Outcome,
}

/// Issues requests and reports their outcomes on a channel.
pub struct TileFetchCoordinator {
    chain: CacheChain,
    fetcher: Fetcher,
    timeout: Duration,
    metrics: Arc<StreamMetrics>,
    completions: mpsc::UnboundedSender<Completion>,
    next_id: AtomicU64,
}

impl TileFetchCoordinator {
    /// Create a coordinator and the receiving end of its completion channel.
    pub fn new(
        chain: CacheChain,
        fetcher: Fetcher,
        timeout: Duration,
        metrics: Arc<StreamMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            chain,
            fetcher,
            timeout,
            metrics,
            completions: tx,
            next_id: AtomicU64::new(1),
        };
        (coordinator, rx)
    }

    pub fn chain(&self) -> &CacheChain {
        &self.chain
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start loading `resource` for `channel` of the tile in `slot`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request(
        &self,
        slot: SlotHandle,
        tile: UnwrappedTileId,
        channel: TileChannel,
        resource: TileResource,
    ) -> RequestToken {
        let token = RequestToken::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.metrics.request_issued();

        let request = Request {
            chain: self.chain.clone(),
            fetcher: self.fetcher.clone(),
            timeout: self.timeout,
            metrics: Arc::clone(&self.metrics),
            channel,
            key: resource.cache_key(),
            resource,
        };
        let cancel = token.cancel.clone();
        let completions = self.completions.clone();
        let token_id = token.id;

        trace!(tile = %tile, channel = %channel, token = token_id, "Request issued");

        tokio::spawn(async move {
            let outcome = request.run(cancel).await;
            let completion = Completion {
                slot,
                tile,
                channel,
                token_id,
                outcome,
            };
            if completions.send(completion).is_err() {
                debug!(
                    tile = %tile,
                    channel = %channel,
                    "Completion receiver gone, dropping result"
                );
            }
        });

        token
    }
}

enum Resolved {
    Hit { payload: Bytes, tier: String },
    Fetched { payload: Bytes, replace: bool },
    Failed(FetchError),
}

struct Request {
    chain: CacheChain,
    fetcher: Fetcher,
    timeout: Duration,
    metrics: Arc<StreamMetrics>,
    channel: TileChannel,
    key: CacheKey,
    resource: TileResource,
}

impl Request {
    async fn run(self, cancel: CancellationToken) -> Outcome {
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            resolved = self.resolve() => resolved,
        };

        match resolved {
            Resolved::Hit { payload, tier } => Outcome::CacheHit { payload, tier },
            Resolved::Fetched { payload, replace } => {
                // Written even if the tile has gone stale meanwhile; the
                // payload is still valid for whoever asks next.
                let write = self.chain.put(&self.key, payload.clone(), replace).await;
                let failures = write.failures();
                if failures > 0 {
                    self.metrics.cache_write_failed(failures);
                }
                Outcome::Fetched(payload)
            }
            Resolved::Failed(error) => Outcome::Failed(error),
        }
    }

    async fn resolve(&self) -> Resolved {
        let mut replace = false;
        if let Some(hit) = self.chain.get(&self.key).await {
            match validate_payload(self.channel, &hit.payload) {
                Ok(()) => {
                    self.metrics.cache_hit();
                    return Resolved::Hit {
                        payload: hit.payload,
                        tier: hit.tier,
                    };
                }
                Err(error) => {
                    warn!(
                        key = %self.key,
                        tier = %hit.tier,
                        error = %error,
                        "Discarding unusable cached payload"
                    );
                    replace = true;
                }
            }
        }
        self.metrics.cache_miss();

        let (tx, rx) = oneshot::channel();
        let handle = self.fetcher.fetch_async(&self.resource, self.timeout, move |result| {
            let _ = tx.send(result);
        });
        let _guard = CancelOnDrop(handle);

        let result = rx
            .await
            .unwrap_or_else(|_| Err(FetchError::Transport("fetch abandoned".to_string())));

        match result.and_then(|payload| {
            validate_payload(self.channel, &payload)?;
            Ok(payload)
        }) {
            Ok(payload) => {
                self.metrics.fetch_succeeded();
                Resolved::Fetched { payload, replace }
            }
            Err(error) => {
                self.metrics.fetch_failed();
                debug!(key = %self.key, error = %error, "Fetch failed");
                Resolved::Failed(error)
            }
        }
    }
}

/// Cancels the wrapped fetch when the request stops waiting for it.
struct CancelOnDrop(FetchHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BoxFuture, CacheError, CacheTier, MemoryTier, PutOutcome};
    use crate::fetch::{ConcurrencyLimiter, MockFetchClient, TileSource};
    use crate::pool::TilePool;
    use crate::tile::CanonicalTileId;

    struct Setup {
        coordinator: TileFetchCoordinator,
        rx: mpsc::UnboundedReceiver<Completion>,
        memory: Arc<MemoryTier>,
        mock: MockFetchClient,
        metrics: Arc<StreamMetrics>,
        slot: SlotHandle,
    }

    fn setup(mock: MockFetchClient) -> Setup {
        let memory = Arc::new(MemoryTier::new(8));
        let chain = CacheChain::new().with_tier(memory.clone());
        let fetcher = Fetcher::new(
            Arc::new(mock.clone()),
            Arc::new(ConcurrencyLimiter::new(4, "test")),
        );
        let metrics = Arc::new(StreamMetrics::new());
        let (coordinator, rx) =
            TileFetchCoordinator::new(chain, fetcher, Duration::from_secs(5), metrics.clone());
        let slot = TilePool::new(1).acquire(tile()).unwrap();
        Setup {
            coordinator,
            rx,
            memory,
            mock,
            metrics,
            slot,
        }
    }

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n-net";
    const CACHED_PNG: &[u8] = b"\x89PNG\r\n\x1a\n-cached";

    /// Tier that reads as empty and refuses every write.
    struct FailingTier;

    impl CacheTier for FailingTier {
        fn name(&self) -> &str {
            "failing"
        }

        fn get<'a>(
            &'a self,
            _key: &'a CacheKey,
        ) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>> {
            Box::pin(async { Ok(None) })
        }

        fn put<'a>(
            &'a self,
            _key: &'a CacheKey,
            _payload: Bytes,
            _force_insert: bool,
        ) -> BoxFuture<'a, Result<PutOutcome, CacheError>> {
            Box::pin(async {
                Err(CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )))
            })
        }

        fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn reinit(&self) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn entry_count(&self) -> usize {
            0
        }

        fn max_entries(&self) -> usize {
            1
        }
    }

    fn tile() -> UnwrappedTileId {
        CanonicalTileId::new(9, 100, 200).unwrap().into()
    }

    fn resource() -> TileResource {
        TileSource::new("osm", "https://t.example.com/{z}/{x}/{y}.png")
            .resource(tile().canonical())
    }

    #[tokio::test]
    async fn test_miss_fetches_and_writes_back() {
        let mut s = setup(MockFetchClient::returning(Ok(Bytes::from_static(PNG))));

        let token = s
            .coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let completion = s.rx.recv().await.unwrap();

        assert_eq!(completion.token_id, token.id());
        assert_eq!(completion.slot, s.slot);
        assert_eq!(completion.outcome, Outcome::Fetched(Bytes::from_static(PNG)));
        assert_eq!(
            s.memory.get(&resource().cache_key()).await.unwrap(),
            Some(Bytes::from_static(PNG))
        );
        assert_eq!(s.mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_hit_skips_network() {
        let mut s = setup(MockFetchClient::returning(Ok(Bytes::from_static(PNG))));
        s.memory
            .put(&resource().cache_key(), Bytes::from_static(CACHED_PNG), false)
            .await
            .unwrap();

        s.coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let completion = s.rx.recv().await.unwrap();

        assert_eq!(
            completion.outcome,
            Outcome::CacheHit {
                payload: Bytes::from_static(CACHED_PNG),
                tier: "memory".to_string()
            }
        );
        assert_eq!(s.mock.calls(), 0);
        assert_eq!(s.metrics.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let mut s = setup(MockFetchClient::returning(Err(FetchError::Http {
            status: 404,
            url: "u".into(),
        })));

        s.coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let completion = s.rx.recv().await.unwrap();

        assert!(matches!(
            completion.outcome,
            Outcome::Failed(FetchError::Http { status: 404, .. })
        ));
        assert_eq!(s.memory.entry_count(), 0);
        assert_eq!(s.metrics.snapshot().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_reports_cancelled_once() {
        let mut s = setup(MockFetchClient::returning(Ok(Bytes::from_static(PNG))).gated());

        let token = s
            .coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        token.cancel();
        s.mock.release(1);

        let completion = s.rx.recv().await.unwrap();
        assert_eq!(completion.outcome, Outcome::Cancelled);

        // Exactly one completion per request.
        drop(s.coordinator);
        assert!(s.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_token_ids_are_unique() {
        let s = setup(MockFetchClient::returning(Ok(Bytes::from_static(PNG))));
        let a = s
            .coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let b = s
            .coordinator
            .request(s.slot, tile(), TileChannel::Vector, resource());
        assert_ne!(a.id(), b.id());
        assert_eq!(s.metrics.snapshot().requests, 2);
    }

    #[tokio::test]
    async fn test_unusable_payload_is_never_cached() {
        let mut s = setup(MockFetchClient::returning(Ok(Bytes::from_static(
            b"<html>quota</html>",
        ))));

        s.coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let completion = s.rx.recv().await.unwrap();

        assert!(matches!(
            completion.outcome,
            Outcome::Failed(FetchError::InvalidPayload(_))
        ));
        assert_eq!(s.memory.entry_count(), 0);
        assert_eq!(s.metrics.snapshot().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_unusable_cached_payload_is_refetched_and_replaced() {
        let mut s = setup(MockFetchClient::returning(Ok(Bytes::from_static(PNG))));
        let key = resource().cache_key();
        s.memory
            .put(&key, Bytes::from_static(b"<html>quota</html>"), false)
            .await
            .unwrap();

        s.coordinator
            .request(s.slot, tile(), TileChannel::Raster, resource());
        let completion = s.rx.recv().await.unwrap();

        assert_eq!(completion.outcome, Outcome::Fetched(Bytes::from_static(PNG)));
        assert_eq!(s.mock.calls(), 1);
        assert_eq!(s.metrics.snapshot().cache_hits, 0);
        assert_eq!(
            s.memory.get(&key).await.unwrap(),
            Some(Bytes::from_static(PNG))
        );
    }

    #[tokio::test]
    async fn test_failed_tier_write_is_counted_and_others_still_written() {
        let memory = Arc::new(MemoryTier::new(8));
        let chain = CacheChain::new()
            .with_tier(memory.clone())
            .with_tier(Arc::new(FailingTier));
        let mock = MockFetchClient::returning(Ok(Bytes::from_static(PNG)));
        let fetcher = Fetcher::new(
            Arc::new(mock.clone()),
            Arc::new(ConcurrencyLimiter::new(4, "test")),
        );
        let metrics = Arc::new(StreamMetrics::new());
        let (coordinator, mut rx) =
            TileFetchCoordinator::new(chain, fetcher, Duration::from_secs(5), metrics.clone());
        let slot = TilePool::new(1).acquire(tile()).unwrap();

        coordinator.request(slot, tile(), TileChannel::Raster, resource());
        let completion = rx.recv().await.unwrap();

        assert_eq!(completion.outcome, Outcome::Fetched(Bytes::from_static(PNG)));
        assert_eq!(metrics.snapshot().cache_write_failures, 1);
        assert_eq!(
            memory.get(&resource().cache_key()).await.unwrap(),
            Some(Bytes::from_static(PNG))
        );
    }
}
