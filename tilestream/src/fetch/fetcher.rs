//! Cancellable, callback-style tile fetches.
//!
//! [`Fetcher::fetch_async`] starts one network operation on the runtime and
//! returns a [`FetchHandle`] straight away. The completion callback runs at
//! most once. Cancelling the handle before completion guarantees the callback
//! never runs; cancelling afterwards does nothing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::client::FetchClient;
use super::error::FetchError;
use super::limiter::ConcurrencyLimiter;
use super::resource::TileResource;

type Callback = Box<dyn FnOnce(Result<Bytes, FetchError>) + Send>;

/// Issues fetches through a shared client under a concurrency ceiling.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn FetchClient>,
    limiter: Arc<ConcurrencyLimiter>,
}

impl Fetcher {
    pub fn new(client: Arc<dyn FetchClient>, limiter: Arc<ConcurrencyLimiter>) -> Self {
        Self { client, limiter }
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Fetch `resource`, reporting the result through `on_complete`.
    ///
    /// Timeouts surface as [`FetchError::Timeout`] like any other failure.
    /// Time spent waiting for a concurrency permit does not count towards
    /// the timeout.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fetch_async<F>(
        &self,
        resource: &TileResource,
        timeout: Duration,
        on_complete: F,
    ) -> FetchHandle
    where
        F: FnOnce(Result<Bytes, FetchError>) + Send + 'static,
    {
        let handle = FetchHandle {
            token: CancellationToken::new(),
            callback: Arc::new(Mutex::new(Some(Box::new(on_complete) as Callback))),
        };

        let url = resource.url();
        let key = resource.cache_key();
        let client = Arc::clone(&self.client);
        let limiter = Arc::clone(&self.limiter);
        let task_handle = handle.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = task_handle.token.cancelled() => {
                    debug!(key = %key, "Fetch cancelled before completion");
                    return;
                }
                result = admit_and_get(client.as_ref(), &limiter, url, timeout) => result,
            };

            task_handle.complete(result);
        });

        handle
    }
}

/// Wait for a permit, then run the request under `timeout`.
async fn admit_and_get(
    client: &dyn FetchClient,
    limiter: &ConcurrencyLimiter,
    url: Result<String, FetchError>,
    timeout: Duration,
) -> Result<Bytes, FetchError> {
    let url = url?;
    let _permit = limiter
        .acquire()
        .await
        .ok_or_else(|| FetchError::Transport("fetcher is shut down".to_string()))?;
    trace!(
        url = %url,
        limiter = limiter.label(),
        in_flight = limiter.in_flight(),
        available = limiter.available(),
        "Fetch admitted"
    );
    match tokio::time::timeout(timeout, client.get(&url)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

/// Handle to an in-flight fetch.
#[derive(Clone)]
pub struct FetchHandle {
    token: CancellationToken,
    callback: Arc<Mutex<Option<Callback>>>,
}

impl FetchHandle {
    /// Cancel the fetch. Idempotent, and a no-op once the callback has run.
    pub fn cancel(&self) {
        self.token.cancel();
        // Holding the lock here waits out a callback that is mid-call.
        self.callback.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the callback has run or been discarded.
    pub fn is_finished(&self) -> bool {
        self.callback.lock().is_none()
    }

    fn complete(&self, result: Result<Bytes, FetchError>) {
        let mut slot = self.callback.lock();
        if self.token.is_cancelled() {
            slot.take();
            return;
        }
        if let Some(callback) = slot.take() {
            callback(result);
        }
    }
}
