//! Point-in-time view of [`StreamMetrics`](super::StreamMetrics).

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fetch_successes: u64,
    pub fetch_failures: u64,
    pub stale_completions: u64,
    pub deliveries: u64,
    pub cache_write_failures: u64,
    pub tiles_added: u64,
    pub tiles_disposed: u64,
    pub tiles_deferred: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups answered by a cache tier, 0.0 when none happened.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stream Telemetry (uptime: {:.1}s)", self.uptime.as_secs_f64())?;
        writeln!(f, "─────────────────────────────────────────")?;
        writeln!(f, "Requests: {}", self.requests)?;
        writeln!(
            f,
            "  Cache: {} hits / {} misses ({:.1}%)",
            self.cache_hits,
            self.cache_misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Network: {} ok / {} failed",
            self.fetch_successes, self.fetch_failures
        )?;
        writeln!(f, "  Delivered: {}", self.deliveries)?;
        writeln!(f, "  Stale (discarded): {}", self.stale_completions)?;
        writeln!(f, "  Cache write failures: {}", self.cache_write_failures)?;
        write!(
            f,
            "Tiles: {} added / {} disposed / {} deferred",
            self.tiles_added, self.tiles_disposed, self.tiles_deferred
        )
    }
}
