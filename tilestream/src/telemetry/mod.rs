//! Streaming metrics.
//!
//! [`StreamMetrics`] is shared between the driver loop and request tasks;
//! [`MetricsSnapshot`] is what callers read and print.

mod metrics;
mod snapshot;

pub use metrics::StreamMetrics;
pub use snapshot::MetricsSnapshot;
