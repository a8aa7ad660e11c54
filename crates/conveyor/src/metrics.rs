//! Fire-and-forget metrics emission.
//!
//! The actual metrics backend is an external collaborator; the core
//! only pushes counters and histograms into a [`MetricsSink`] and never
//! looks at the result.

use std::sync::Arc;

/// Metric names emitted by the queue engine.
pub mod names {
    /// A message was received from the queue.
    pub const QUEUE_RECEIVED: &str = "queue.message.received";
    /// A message was sent to the queue.
    pub const QUEUE_SENT: &str = "queue.message.sent";
    /// A message handler finished successfully.
    pub const QUEUE_COMPLETED: &str = "queue.message.completed";
    /// A message failed terminally (no further retries).
    pub const QUEUE_FAILED: &str = "queue.message.failed";
    /// A message was deleted from the queue.
    pub const QUEUE_DELETED: &str = "queue.message.deleted";
    /// Message processing duration in milliseconds.
    pub const QUEUE_DURATION: &str = "queue.message.duration";
}

/// Fixed histogram buckets (milliseconds) for the second duration
/// emission; the first emission feeds percentile rollups instead.
pub const DURATION_HISTOGRAM_BUCKETS: &str = "10_100_500_1000_2000_3000_5000_10000_30000_60000";

/// Tag key carrying the fixed-bucket histogram configuration.
pub const HISTOGRAM_BUCKET_TAG: &str = "gsd_histogram";

/// Sink for counters and histograms.
///
/// Implementations must be cheap and non-blocking; emission failures
/// are theirs to swallow.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one.
    fn increment(&self, name: &str, tags: &[(&str, &str)]);

    /// Record a histogram sample.
    fn histogram(&self, name: &str, value_ms: f64, tags: &[(&str, &str)]);
}

/// A sink that drops everything. The default when no backend is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _tags: &[(&str, &str)]) {}

    fn histogram(&self, _name: &str, _value_ms: f64, _tags: &[(&str, &str)]) {}
}

/// Shared handle to a metrics sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopMetrics;
        sink.increment(names::QUEUE_SENT, &[("queue", "backfill")]);
        sink.histogram(names::QUEUE_DURATION, 12.5, &[]);
    }
}
