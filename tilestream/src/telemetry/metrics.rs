//! Lock-free counters for the streaming engine.
//!
//! Counters are independent, so every update uses `Relaxed` ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::MetricsSnapshot;

pub struct StreamMetrics {
    start_time: Instant,

    // === Requests ===
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // === Network ===
    fetch_successes: AtomicU64,
    fetch_failures: AtomicU64,

    // === Delivery ===
    /// Completions discarded because their slot moved on.
    stale_completions: AtomicU64,
    /// Payloads delivered to a channel (hit or fetch).
    deliveries: AtomicU64,
    /// Tier writes that failed; the tile simply stays uncached there.
    cache_write_failures: AtomicU64,

    // === Extent ===
    tiles_added: AtomicU64,
    tiles_disposed: AtomicU64,
    tiles_deferred: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            fetch_successes: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            stale_completions: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            cache_write_failures: AtomicU64::new(0),
            tiles_added: AtomicU64::new(0),
            tiles_disposed: AtomicU64::new(0),
            tiles_deferred: AtomicU64::new(0),
        }
    }

    pub fn request_issued(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_succeeded(&self) {
        self.fetch_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_failed(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_completion(&self) {
        self.stale_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_write_failed(&self, tiers: usize) {
        self.cache_write_failures
            .fetch_add(tiers as u64, Ordering::Relaxed);
    }

    pub fn tiles_added(&self, count: usize) {
        self.tiles_added.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tiles_disposed(&self, count: usize) {
        self.tiles_disposed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tiles_deferred(&self, count: usize) {
        self.tiles_deferred
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
            tiles_added: self.tiles_added.load(Ordering::Relaxed),
            tiles_disposed: self.tiles_disposed.load(Ordering::Relaxed),
            tiles_deferred: self.tiles_deferred.load(Ordering::Relaxed),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}
