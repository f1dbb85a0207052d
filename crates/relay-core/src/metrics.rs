//! Metrics for Blob Relay
//!
//! Provides Prometheus-compatible metrics for observability.

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Webhook metrics
    pub const EVENTS_RECEIVED: &str = "blob_relay_events_received_total";
    pub const EVENTS_IGNORED: &str = "blob_relay_events_ignored_total";
    pub const VALIDATIONS_TOTAL: &str = "blob_relay_subscription_validations_total";

    // Policy metrics
    pub const POLICY_LATENCY: &str = "blob_relay_policy_latency_seconds";
    pub const POLICY_DESTINATIONS: &str = "blob_relay_policy_destinations";

    // Replication metrics
    pub const REPLICATIONS_TOTAL: &str = "blob_relay_replications_total";
    pub const BYTES_COPIED: &str = "blob_relay_bytes_copied_total";
    pub const REPLICATION_LATENCY: &str = "blob_relay_replication_latency_seconds";
    pub const ERRORS_TOTAL: &str = "blob_relay_errors_total";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const EVENT_TYPE: &str = "event_type";
    pub const BACKEND: &str = "backend";
    pub const STATUS: &str = "status";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Relay pipeline metrics
#[derive(Clone)]
pub struct RelayMetrics {
    component: String,
}

impl RelayMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a delivered change notification
    pub fn record_received(&self, event_type: &str) {
        counter!(
            names::EVENTS_RECEIVED,
            labels::COMPONENT => self.component.clone(),
            labels::EVENT_TYPE => event_type.to_string(),
        )
        .increment(1);
    }

    /// Record an event acknowledged without routing
    pub fn record_ignored(&self, event_type: &str) {
        counter!(
            names::EVENTS_IGNORED,
            labels::COMPONENT => self.component.clone(),
            labels::EVENT_TYPE => event_type.to_string(),
        )
        .increment(1);
    }

    /// Record a subscription handshake
    pub fn record_validation(&self, status: &str) {
        counter!(
            names::VALIDATIONS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Record policy latency and fan-out
    pub fn record_policy(&self, duration: Duration, destinations: usize) {
        histogram!(
            names::POLICY_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
        histogram!(
            names::POLICY_DESTINATIONS,
            labels::COMPONENT => self.component.clone(),
        )
        .record(destinations as f64);
    }

    /// Record one destination copy
    pub fn record_replication(&self, backend: &str, status: &str, bytes: u64) {
        counter!(
            names::REPLICATIONS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::BACKEND => backend.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
        if bytes > 0 {
            counter!(
                names::BYTES_COPIED,
                labels::COMPONENT => self.component.clone(),
                labels::BACKEND => backend.to_string(),
            )
            .increment(bytes);
        }
    }

    /// Record replication latency for a whole event
    pub fn record_replication_latency(&self, duration: Duration) {
        histogram!(
            names::REPLICATION_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        counter!(
            names::ERRORS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(1);
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
