//! HTTP client abstraction.
//!
//! [`FetchClient`] is the seam between the fetch pipeline and the network so
//! tests can substitute a scripted client. [`HttpFetchClient`] is the reqwest
//! implementation used in production.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::error::FetchError;
use crate::cache::BoxFuture;

/// User-Agent sent with every tile request. Some tile servers reject
/// requests without one.
const USER_AGENT: &str = concat!("tilestream/", env!("CARGO_PKG_VERSION"));

/// Performs a single GET for a tile payload.
///
/// Timeouts are applied by the caller, so implementations only need to
/// report what the server did.
pub trait FetchClient: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}

/// Async HTTP client backed by reqwest.
#[derive(Clone)]
pub struct HttpFetchClient {
    client: reqwest::Client,
}

impl HttpFetchClient {
    /// Build a client with pooled keep-alive connections.
    ///
    /// `connect_timeout` bounds connection setup only; whole-request
    /// timeouts are enforced per request by the fetcher.
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn get_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        trace!(url = url, "HTTP GET request starting");

        let response = match self.client.get(url).send().await {
            Ok(resp) => {
                debug!(
                    url = url,
                    status = resp.status().as_u16(),
                    "HTTP response received"
                );
                resp
            }
            Err(e) => {
                warn!(
                    url = url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(FetchError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = url, status = status.as_u16(), "HTTP error status");
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(url = url, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes)
            }
            Err(e) => {
                warn!(url = url, error = %e, "Failed to read response body");
                Err(FetchError::Transport(format!(
                    "Failed to read response: {}",
                    e
                )))
            }
        }
    }
}

impl FetchClient for HttpFetchClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.get_bytes(url))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    use super::*;

    /// Scripted client: per-URL responses, optional gate, call log.
    #[derive(Clone)]
    pub(crate) struct MockFetchClient {
        responses: Arc<Mutex<HashMap<String, Result<Bytes, FetchError>>>>,
        default_response: Result<Bytes, FetchError>,
        gate: Option<Arc<Semaphore>>,
        calls: Arc<AtomicUsize>,
        urls: Arc<Mutex<Vec<String>>>,
    }

    impl MockFetchClient {
        pub(crate) fn returning(response: Result<Bytes, FetchError>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(HashMap::new())),
                default_response: response,
                gate: None,
                calls: Arc::new(AtomicUsize::new(0)),
                urls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Requests block until [`release`](Self::release) lets them through.
        pub(crate) fn gated(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        pub(crate) fn with_response(self, url: &str, response: Result<Bytes, FetchError>) -> Self {
            self.responses.lock().insert(url.to_string(), response);
            self
        }

        pub(crate) fn release(&self, requests: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(requests);
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.urls.lock().clone()
        }
    }

    impl FetchClient for MockFetchClient {
        fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.urls.lock().push(url.to_string());
                if let Some(gate) = &self.gate {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                let scripted = self.responses.lock().get(url).cloned();
                scripted.unwrap_or_else(|| self.default_response.clone())
            })
        }
    }
}
