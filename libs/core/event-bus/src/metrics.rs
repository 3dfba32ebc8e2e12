//! Prometheus metrics for the event bus

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls return the same handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok(handle)
    })
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format, empty if never initialized
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Publish-side counters
pub fn event_published(topic: &str, success: bool) {
    counter!(
        "event_bus_events_published_total",
        "topic" => topic.to_string(),
        "status" => if success { "success" } else { "failed" }
    )
    .increment(1);
}

/// Consumer-side metrics for one consumer group
#[derive(Clone, Debug)]
pub struct BusMetrics {
    group: String,
}

impl BusMetrics {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    /// `status` is one of `handled`, `unhandled`, `dead_lettered`
    pub fn event_consumed(&self, topic: &str, status: &'static str) {
        counter!(
            "event_bus_events_consumed_total",
            "topic" => topic.to_string(),
            "group" => self.group.clone(),
            "status" => status
        )
        .increment(1);
    }

    pub fn dispatch_duration(&self, topic: &str, duration: Duration) {
        histogram!(
            "event_bus_dispatch_duration_seconds",
            "topic" => topic.to_string(),
            "group" => self.group.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn retry(&self, topic: &str) {
        counter!(
            "event_bus_retries_total",
            "topic" => topic.to_string(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// A record that needed at least one retry eventually succeeded
    pub fn retry_succeeded(&self, topic: &str) {
        counter!(
            "event_bus_retry_successes_total",
            "topic" => topic.to_string(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// Keyed by the original topic, not the dead-letter topic
    pub fn dead_lettered(&self, original_topic: &str, error_class: &str) {
        counter!(
            "event_bus_dlq_messages_total",
            "topic" => original_topic.to_string(),
            "group" => self.group.clone(),
            "error_class" => error_class.to_string()
        )
        .increment(1);
    }

    pub fn dead_letter_failed(&self, original_topic: &str) {
        counter!(
            "event_bus_dlq_failures_total",
            "topic" => original_topic.to_string(),
            "group" => self.group.clone()
        )
        .increment(1);
    }
}
