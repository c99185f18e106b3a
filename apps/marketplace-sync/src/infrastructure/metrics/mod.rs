//! Prometheus Metrics Module
//!
//! Exposes synchronization metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Notifications**: entries added by source, unread gauge
//! - **Discards**: async completions dropped because their binding went stale
//! - **Transport**: fetch and subscribe failures
//! - **Feed**: snapshot loads and window rotations
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "marketplace_sync_notifications_added_total",
        "Notifications added to the bound user's list, by source"
    );
    describe_gauge!(
        "marketplace_sync_unread_notifications",
        "Unread notifications for the bound user"
    );
    describe_counter!(
        "marketplace_sync_events_discarded_total",
        "Async completions discarded because the binding changed"
    );
    describe_counter!(
        "marketplace_sync_transport_errors_total",
        "Backend fetch and subscribe failures"
    );
    describe_counter!(
        "marketplace_sync_feed_loads_total",
        "Live feed snapshot loads by outcome"
    );
    describe_counter!(
        "marketplace_sync_feed_rotations_total",
        "Live feed display window rotations"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    /// Initial snapshot on bind.
    Seed,
    /// Direct notification subscription.
    Push,
    /// Chat message subscription.
    Message,
    /// Simulated event generator.
    Simulated,
    /// Programmatic injection.
    Manual,
}

impl NotificationSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Push => "push",
            Self::Message => "message",
            Self::Simulated => "simulated",
            Self::Manual => "manual",
        }
    }
}

/// Which backend operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOperation {
    /// Snapshot query.
    Fetch,
    /// Subscription open.
    Subscribe,
}

impl TransportOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Subscribe => "subscribe",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record notifications added to the list.
pub fn record_notifications_added(source: NotificationSource, count: u64) {
    counter!(
        "marketplace_sync_notifications_added_total",
        "source" => source.as_str()
    )
    .increment(count);
}

/// Update the unread gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_unread(count: usize) {
    gauge!("marketplace_sync_unread_notifications").set(count as f64);
}

/// Record a stale completion that was discarded.
pub fn record_discard(stage: &'static str) {
    counter!(
        "marketplace_sync_events_discarded_total",
        "stage" => stage
    )
    .increment(1);
}

/// Record a backend failure.
pub fn record_transport_error(operation: TransportOperation) {
    counter!(
        "marketplace_sync_transport_errors_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record a feed snapshot load.
pub fn record_feed_load(success: bool) {
    counter!(
        "marketplace_sync_feed_loads_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a display window rotation.
pub fn record_feed_rotation() {
    counter!("marketplace_sync_feed_rotations_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_source_as_str() {
        assert_eq!(NotificationSource::Seed.as_str(), "seed");
        assert_eq!(NotificationSource::Push.as_str(), "push");
        assert_eq!(NotificationSource::Message.as_str(), "message");
        assert_eq!(NotificationSource::Simulated.as_str(), "simulated");
        assert_eq!(NotificationSource::Manual.as_str(), "manual");
    }

    #[test]
    fn transport_operation_as_str() {
        assert_eq!(TransportOperation::Fetch.as_str(), "fetch");
        assert_eq!(TransportOperation::Subscribe.as_str(), "subscribe");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_notifications_added(NotificationSource::Manual, 1);
        record_discard("membership");
        record_feed_rotation();
        set_unread(3);
    }
}
