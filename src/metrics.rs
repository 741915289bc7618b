//! Prometheus implementation of the [`MetricsRecorder`] port.
//!
//! Metric families:
//! * `api_gateway_requests_total{service,method,status}` (counter)
//! * `api_gateway_request_duration_seconds{service,method}` (histogram)
//!
//! Each recorder owns its own `prometheus::Registry`, so several gateways (or
//! tests) in one process never share counters.
use std::time::Duration;

use eyre::{Result, WrapErr};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::ports::metrics::MetricsRecorder;

pub const REQUESTS_TOTAL: &str = "api_gateway_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "api_gateway_request_duration_seconds";

pub struct PrometheusMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(REQUESTS_TOTAL, "Total number of requests handled by the gateway"),
            &["service", "method", "status"],
        )
        .wrap_err("Failed to create requests counter")?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                REQUEST_DURATION_SECONDS,
                "Latency of requests handled by the gateway",
            ),
            &["service", "method"],
        )
        .wrap_err("Failed to create duration histogram")?;

        registry
            .register(Box::new(requests_total.clone()))
            .wrap_err("Failed to register requests counter")?;
        registry
            .register(Box::new(request_duration.clone()))
            .wrap_err("Failed to register duration histogram")?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
        })
    }
}

impl MetricsRecorder for PrometheusMetrics {
    fn record_request(&self, service: &str, method: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[service, method, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[service, method])
            .observe(duration.as_secs_f64());
    }

    fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .wrap_err("Failed to encode metrics")?;
        String::from_utf8(buffer).wrap_err("Metrics output was not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_renders() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_request("users", "GET", 200, Duration::from_millis(12));
        metrics.record_request("users", "GET", 200, Duration::from_millis(8));
        metrics.record_request("unknown", "POST", 404, Duration::from_millis(1));

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"api_gateway_requests_total{method="GET",service="users",status="200"} 2"#
        ));
        assert!(text.contains(
            r#"api_gateway_requests_total{method="POST",service="unknown",status="404"} 1"#
        ));
        assert!(text.contains(
            r#"api_gateway_request_duration_seconds_count{method="GET",service="users"} 2"#
        ));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.record_request("users", "GET", 200, Duration::ZERO);
        assert!(!b.render().unwrap().contains("users"));
    }
}
