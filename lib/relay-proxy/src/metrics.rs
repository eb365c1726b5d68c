//! Prometheus metrics for the edge forwarding server

use anyhow::Result;
use prometheus::{Counter, CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

/// Prometheus metrics collector for relayed requests
pub struct MetricsCollector {
    /// Total relay requests received, by method
    pub relay_requests_total: CounterVec,
    /// Relay responses by status code
    pub relay_responses_total: CounterVec,
    /// Forwarder-generated errors by kind (no_target, invalid_target, ...)
    pub relay_errors_total: CounterVec,
    /// Upstream fetch failures
    pub upstream_failures_total: Counter,
    /// End-to-end relay latency in seconds
    pub relay_duration_seconds: HistogramVec,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let relay_requests_total = CounterVec::new(
            Opts::new("relay_requests_total", "Total relay requests"),
            &["method"],
        )?;

        let relay_responses_total = CounterVec::new(
            Opts::new("relay_responses_total", "Total relay responses by status"),
            &["status"],
        )?;

        let relay_errors_total = CounterVec::new(
            Opts::new("relay_errors_total", "Forwarder-generated errors by kind"),
            &["kind"],
        )?;

        let upstream_failures_total = Counter::new(
            "upstream_failures_total",
            "Total upstream fetch failures",
        )?;

        let relay_duration_seconds = HistogramVec::new(
            Opts::new("relay_duration_seconds", "Relay latency in seconds").into(),
            &["method"],
        )?;

        registry.register(Box::new(relay_requests_total.clone()))?;
        registry.register(Box::new(relay_responses_total.clone()))?;
        registry.register(Box::new(relay_errors_total.clone()))?;
        registry.register(Box::new(upstream_failures_total.clone()))?;
        registry.register(Box::new(relay_duration_seconds.clone()))?;

        Ok(Self {
            relay_requests_total,
            relay_responses_total,
            relay_errors_total,
            upstream_failures_total,
            relay_duration_seconds,
            registry,
        })
    }

    /// Record one handled relay request.
    pub fn observe_request(&self, method: &str, status: u16, started: Instant) {
        self.relay_requests_total.with_label_values(&[method]).inc();
        self.relay_responses_total
            .with_label_values(&[&status.to_string()])
            .inc();
        self.relay_duration_seconds
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Record a forwarder-generated error by its wire code.
    pub fn observe_error(&self, kind: &str) {
        self.relay_errors_total.with_label_values(&[kind]).inc();
        if kind == "upstream_unreachable" {
            self.upstream_failures_total.inc();
        }
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        // Clones share the same registry and underlying metrics
        Self {
            relay_requests_total: self.relay_requests_total.clone(),
            relay_responses_total: self.relay_responses_total.clone(),
            relay_errors_total: self.relay_errors_total.clone(),
            upstream_failures_total: self.upstream_failures_total.clone(),
            relay_duration_seconds: self.relay_duration_seconds.clone(),
            registry: self.registry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        assert!(collector.gather().is_ok());
    }

    #[test]
    fn test_observe_request_records_all_series() {
        let collector = MetricsCollector::new().unwrap();
        collector.observe_request("GET", 200, Instant::now());

        let metrics = collector.gather().unwrap();
        assert!(metrics.contains("relay_requests_total"));
        assert!(metrics.contains("relay_responses_total"));
        assert!(metrics.contains("relay_duration_seconds"));
        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
    }

    #[test]
    fn test_upstream_errors_increment_failure_counter() {
        let collector = MetricsCollector::new().unwrap();
        collector.observe_error("no_target");
        collector.observe_error("upstream_unreachable");

        let metrics = collector.gather().unwrap();
        assert!(metrics.contains("relay_errors_total"));
        assert!(metrics.contains("upstream_failures_total 1"));
    }

    #[test]
    fn test_clones_share_registry() {
        let collector1 = MetricsCollector::new().unwrap();
        let collector2 = collector1.clone();
        collector1.observe_error("invalid_target");

        let metrics = collector2.gather().unwrap();
        assert!(metrics.contains("relay_errors_total"));
    }
}
