//! Concurrency ceiling for in-flight fetches.
//!
//! Wraps a Tokio semaphore, which hands out permits in FIFO order, so
//! requests are admitted in the order they started waiting. Waiting for a
//! permit is cancel-safe: dropping the future gives up the place in line.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default ceiling when none is configured.
pub const DEFAULT_MAX_CONCURRENT: usize = 32;

/// FIFO admission limiter with in-flight and peak tracking.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
    label: String,
}

impl ConcurrencyLimiter {
    /// A zero ceiling is raised to one.
    pub fn new(max_concurrent: usize, label: impl Into<String>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
            label: label.into(),
        }
    }

    /// Wait for a permit.
    ///
    /// Returns `None` only if the limiter has been closed.
    pub async fn acquire(&self) -> Option<ConcurrencyPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);
        Some(ConcurrencyPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Refuse all future acquisitions. Waiters are woken with `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Held for the duration of one fetch; releases its slot on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
