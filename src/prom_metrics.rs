//! # Prometheus Metrics - Exposition for Container Orchestration
//!
//! Exposes sitelog operational metrics in the Prometheus text exposition format
//! for scraping by Prometheus, Grafana Agent, or any OpenMetrics-compatible collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sitelog_http_request_duration_seconds` | Histogram | `method`, `path` | HTTP handler latency |
//! | `sitelog_summary_triggers_total` | Counter | `mode`, `status` | Summary trigger outcomes |
//! | `sitelog_summary_generation_seconds` | Histogram | none | Generator call duration |
//! | `sitelog_summary_timers_armed` | Gauge | none | Pending debounce timers |
//!
//! The `/metrics` endpoint renders the current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for HTTP request metrics. Paths are normalized before use.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Label set for summary trigger outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct TriggerLabel {
    pub mode: String,
    pub status: String,
}

type HistogramFamily<L> = Family<L, Histogram, fn() -> Histogram>;

fn http_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Thread-safe metrics registry.
///
/// All fields use atomic types and are safe to update from any thread or async task.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: HistogramFamily<HttpLabel>,
    pub summary_triggers: Family<TriggerLabel, Counter>,
    pub generation_seconds: Histogram,
    pub timers_armed: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration: HistogramFamily<HttpLabel> =
            Family::new_with_constructor(http_histogram as fn() -> Histogram);
        registry.register(
            "sitelog_http_request_duration_seconds",
            "HTTP request duration by method and normalized path",
            http_request_duration.clone(),
        );

        let summary_triggers = Family::<TriggerLabel, Counter>::default();
        registry.register(
            "sitelog_summary_triggers",
            "Summary generation triggers by mode and outcome",
            summary_triggers.clone(),
        );

        let generation_seconds = Histogram::new(exponential_buckets(0.5, 2.0, 10));
        registry.register(
            "sitelog_summary_generation_seconds",
            "Duration of summary generator calls",
            generation_seconds.clone(),
        );

        let timers_armed = Gauge::default();
        registry.register(
            "sitelog_summary_timers_armed",
            "Number of pending summary debounce timers",
            timers_armed.clone(),
        );

        Self {
            registry,
            http_request_duration,
            summary_triggers,
            generation_seconds,
            timers_armed,
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_metrics() {
        let metrics = Metrics::new();
        metrics
            .summary_triggers
            .get_or_create(&TriggerLabel {
                mode: "manual".into(),
                status: "generated".into(),
            })
            .inc();
        metrics.timers_armed.set(3);
        let text = metrics.encode();
        assert!(text.contains("sitelog_summary_triggers_total"));
        assert!(text.contains("mode=\"manual\""));
        assert!(text.contains("sitelog_summary_timers_armed 3"));
        assert!(text.contains("sitelog_summary_generation_seconds"));
    }

    #[test]
    fn http_histogram_records_per_label() {
        let metrics = Metrics::new();
        metrics
            .http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/healthz".into(),
            })
            .observe(0.01);
        let text = metrics.encode();
        assert!(text.contains("sitelog_http_request_duration_seconds_count"));
        assert!(text.contains("path=\"/healthz\""));
    }
}
