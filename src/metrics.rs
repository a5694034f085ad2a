//! Prometheus metrics for the subscription client.
//!
//! This module provides metrics for:
//! - Inbound message volume and dispatch latency
//! - Dropped (malformed) messages and listener panics
//! - Control frames sent to the server
//! - Reconnect attempts and exhausted reconnect budgets

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

// === Metric Name Constants ===

/// Dispatch latency metric name.
pub const METRIC_DISPATCH_LATENCY: &str = "realtime_dispatch_latency_ms";
/// Inbound messages counter metric name.
pub const METRIC_MESSAGES_RECEIVED: &str = "realtime_messages_received_total";
/// Malformed inbound messages counter metric name.
pub const METRIC_MESSAGES_DROPPED: &str = "realtime_messages_dropped_total";
/// Listener panics counter metric name.
pub const METRIC_LISTENER_PANICS: &str = "realtime_listener_panics_total";
/// Control frames counter metric name.
pub const METRIC_CONTROL_SENT: &str = "realtime_control_frames_sent_total";
/// Reconnect attempts counter metric name.
pub const METRIC_RECONNECTS: &str = "realtime_reconnects_total";
/// Exhausted reconnect budget counter metric name.
pub const METRIC_RECONNECTS_EXHAUSTED: &str = "realtime_reconnects_exhausted_total";

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_DISPATCH_LATENCY,
        "Time to fan one inbound message out to its listeners in milliseconds"
    );

    describe_counter!(
        METRIC_MESSAGES_RECEIVED,
        "Total number of inbound messages received"
    );
    describe_counter!(
        METRIC_MESSAGES_DROPPED,
        "Total number of inbound messages dropped as undecodable"
    );
    describe_counter!(
        METRIC_LISTENER_PANICS,
        "Total number of listener invocations that panicked"
    );
    describe_counter!(
        METRIC_CONTROL_SENT,
        "Total number of subscribe/unsubscribe frames sent"
    );
    describe_counter!(
        METRIC_RECONNECTS,
        "Total number of scheduled reconnect attempts"
    );
    describe_counter!(
        METRIC_RECONNECTS_EXHAUSTED,
        "Total number of transports that gave up reconnecting"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder (once) and return its render handle.
pub fn install_prometheus() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS.set(handle.clone());
            init_metrics();
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Prometheus handle, if the recorder was installed.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS.get().cloned()
}

/// Increment inbound messages counter.
pub fn inc_messages_received(source: &'static str) {
    counter!(METRIC_MESSAGES_RECEIVED, "source" => source).increment(1);
}

/// Increment dropped messages counter.
pub fn inc_messages_dropped() {
    counter!(METRIC_MESSAGES_DROPPED).increment(1);
}

/// Increment listener panics counter.
pub fn inc_listener_panics() {
    counter!(METRIC_LISTENER_PANICS).increment(1);
}

/// Increment control frames counter.
pub fn inc_control_sent(kind: &'static str) {
    counter!(METRIC_CONTROL_SENT, "kind" => kind).increment(1);
}

/// Increment reconnect attempts counter.
pub fn inc_reconnects() {
    counter!(METRIC_RECONNECTS).increment(1);
}

/// Increment exhausted reconnects counter.
pub fn inc_reconnects_exhausted() {
    counter!(METRIC_RECONNECTS_EXHAUSTED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for message dispatch.
pub fn timer_dispatch() -> LatencyTimer {
    LatencyTimer::new(METRIC_DISPATCH_LATENCY)
}
