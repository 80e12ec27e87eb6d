//! Observability infrastructure for the watcher
//!
//! Provides:
//! - Prometheus self-metrics (connections, stream ends, decode errors, observer failures)
//! - Structured logging of feed lifecycle events with tracing

use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatcherMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct WatcherMetricsInner {
    watch_connections: IntCounterVec,
    watch_stream_ends: IntCounterVec,
    watch_rejections: IntCounterVec,
    records_decoded: IntCounterVec,
    decode_errors: IntCounterVec,
    observer_failures: IntCounterVec,
    tracked_pods: IntGauge,
}

impl WatcherMetricsInner {
    fn new() -> Self {
        Self {
            watch_connections: register_int_counter_vec!(
                "oclogs_watch_connections_total",
                "Watch connections opened, per feed",
                &["feed"]
            )
            .expect("Failed to register watch_connections"),

            watch_stream_ends: register_int_counter_vec!(
                "oclogs_watch_stream_ends_total",
                "Watch streams that ended or failed and were retried, per feed",
                &["feed"]
            )
            .expect("Failed to register watch_stream_ends"),

            watch_rejections: register_int_counter_vec!(
                "oclogs_watch_rejections_total",
                "Watch requests rejected with a non-200 status, per feed",
                &["feed"]
            )
            .expect("Failed to register watch_rejections"),

            records_decoded: register_int_counter_vec!(
                "oclogs_records_decoded_total",
                "Watch records decoded into resources, per feed",
                &["feed"]
            )
            .expect("Failed to register records_decoded"),

            decode_errors: register_int_counter_vec!(
                "oclogs_decode_errors_total",
                "Watch records that could not be decoded, per feed",
                &["feed"]
            )
            .expect("Failed to register decode_errors"),

            observer_failures: register_int_counter_vec!(
                "oclogs_observer_failures_total",
                "Observer calls that failed or panicked, per observer",
                &["observer"]
            )
            .expect("Failed to register observer_failures"),

            tracked_pods: register_int_gauge!(
                "oclogs_reconciler_tracked_pods",
                "Pods currently tracked by the metrics reconciler"
            )
            .expect("Failed to register tracked_pods"),
        }
    }
}

/// Watcher self-metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct WatcherMetrics {
    _private: (),
}

impl Default for WatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatcherMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatcherMetricsInner {
        GLOBAL_METRICS.get_or_init(WatcherMetricsInner::new)
    }

    pub fn inc_connections(&self, feed: &str) {
        self.inner().watch_connections.with_label_values(&[feed]).inc();
    }

    pub fn inc_stream_ends(&self, feed: &str) {
        self.inner().watch_stream_ends.with_label_values(&[feed]).inc();
    }

    pub fn inc_rejections(&self, feed: &str) {
        self.inner().watch_rejections.with_label_values(&[feed]).inc();
    }

    pub fn inc_records_decoded(&self, feed: &str) {
        self.inner().records_decoded.with_label_values(&[feed]).inc();
    }

    pub fn inc_decode_errors(&self, feed: &str) {
        self.inner().decode_errors.with_label_values(&[feed]).inc();
    }

    pub fn inc_observer_failures(&self, observer: &str) {
        self.inner()
            .observer_failures
            .with_label_values(&[observer])
            .inc();
    }

    pub fn set_tracked_pods(&self, count: i64) {
        self.inner().tracked_pods.set(count);
    }

    /// Current decode error count for a feed
    pub fn decode_errors(&self, feed: &str) -> u64 {
        self.inner().decode_errors.with_label_values(&[feed]).get()
    }

    /// Current connection count for a feed
    pub fn connections(&self, feed: &str) -> u64 {
        self.inner().watch_connections.with_label_values(&[feed]).get()
    }
}

/// Structured logger for watcher lifecycle events
///
/// Provides consistent field naming for feed connections, disconnections
/// and series removals.
#[derive(Clone)]
pub struct StructuredLogger {
    api: String,
}

impl StructuredLogger {
    pub fn new(api: impl Into<String>) -> Self {
        Self { api: api.into() }
    }

    /// Log watcher startup
    pub fn log_startup(&self, version: &str, namespace: Option<&str>) {
        info!(
            event = "watcher_started",
            api = %self.api,
            version = %version,
            namespace = namespace.unwrap_or("*"),
            "Watcher started"
        );
    }

    /// Log watcher shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watcher_shutdown",
            api = %self.api,
            reason = %reason,
            "Watcher shutting down"
        );
    }

    /// Log a successfully opened watch stream
    pub fn log_feed_connected(&self, feed: &str, url: &str) {
        info!(
            event = "feed_connected",
            api = %self.api,
            feed = %feed,
            url = %url,
            "Watch stream opened"
        );
    }

    /// Log the end of a watch stream that will be retried
    pub fn log_feed_retry(&self, feed: &str, reason: &str, retry_in_ms: u128) {
        warn!(
            event = "feed_retry",
            api = %self.api,
            feed = %feed,
            reason = %reason,
            retry_in_ms = retry_in_ms as u64,
            "Watch stream ended, reconnecting"
        );
    }

    /// Log a permanently rejected watch request
    pub fn log_feed_rejected(&self, feed: &str, status: u16, body: &str) {
        error!(
            event = "feed_rejected",
            api = %self.api,
            feed = %feed,
            status = status,
            body = %body,
            "Watch request rejected, feed stopped"
        );
    }

    /// Log removal of every series of a pod after a deletion signal
    pub fn log_pod_removed(&self, pod: &str, namespace: &str, containers: usize, signal: &str) {
        info!(
            event = "pod_series_removed",
            api = %self.api,
            pod = %pod,
            namespace = %namespace,
            containers = containers,
            signal = %signal,
            "Removed pod series after deletion signal"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_metrics_creation() {
        // Metrics live in the global registry, so only relative changes are checked
        let metrics = WatcherMetrics::new();

        let before = metrics.decode_errors("test-feed");
        metrics.inc_decode_errors("test-feed");
        metrics.inc_connections("test-feed");
        metrics.inc_stream_ends("test-feed");
        metrics.inc_records_decoded("test-feed");
        metrics.inc_observer_failures("test-observer");
        metrics.set_tracked_pods(3);

        assert_eq!(metrics.decode_errors("test-feed"), before + 1);
        assert!(metrics.connections("test-feed") >= 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("https://api.example:6443/api/v1");
        assert_eq!(logger.api, "https://api.example:6443/api/v1");
    }
}
