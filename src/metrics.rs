//! Prometheus metrics for the redirect listeners.
//!
//! Every redirect router is wrapped in [`track_redirects`], which records
//! in-flight requests, a per-status request counter and a latency histogram.
//! The administrative API exposes the registry at `/metrics`.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    linear_buckets, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::rule::Scheme;

/// Content type of the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handle to the metrics registry, cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    active_connections: IntGauge,
    requests_total: IntCounterVec,
    response_time: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let active_connections = IntGauge::new(
            "active_client_connections",
            "Number of active client connections",
        )?;
        let requests_total = IntCounterVec::new(
            Opts::new("redirect_requests_total", "Total HTTP requests processed"),
            &["code", "type"],
        )?;
        let response_time = HistogramVec::new(
            HistogramOpts::new("response_time", "Histogram of response time for handler")
                .buckets(linear_buckets(0.0, 0.25, 12)?),
            &["type", "code"],
        )?;

        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(response_time.clone()))?;

        Ok(Self {
            registry,
            active_connections,
            requests_total,
            response_time,
        })
    }

    /// Encodes every registered metric in the text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    /// Middleware state for the listener serving `scheme`.
    pub fn listener(&self, scheme: Scheme) -> ListenerMetrics {
        ListenerMetrics {
            metrics: self.clone(),
            label: scheme.label(),
        }
    }
}

#[derive(Clone)]
pub struct ListenerMetrics {
    metrics: Metrics,
    label: &'static str,
}

/// Decrements the in-flight gauge even when the request future is dropped.
struct InFlight(IntGauge);

impl InFlight {
    fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Records one redirect request in the listener's metrics.
pub async fn track_redirects(
    State(listener): State<ListenerMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let metrics = &listener.metrics;
    let _in_flight = InFlight::enter(&metrics.active_connections);
    let start = Instant::now();

    let response = next.run(request).await;

    let code = response.status().as_u16().to_string();
    metrics
        .requests_total
        .with_label_values(&[code.as_str(), listener.label])
        .inc();
    metrics
        .response_time
        .with_label_values(&[listener.label, code.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first
            .requests_total
            .with_label_values(&["301", "http"])
            .inc();

        assert_eq!(first.requests_total.with_label_values(&["301", "http"]).get(), 1);
        let exposed = first.gather().unwrap();
        assert!(exposed.contains("redirect_requests_total{"));
        assert!(exposed.contains(r#"code="301""#));
        assert!(!second.gather().unwrap().contains("redirect_requests_total{"));
    }

    #[test]
    fn test_in_flight_guard_restores_gauge() {
        let metrics = Metrics::new().unwrap();
        {
            let _guard = InFlight::enter(&metrics.active_connections);
            assert_eq!(metrics.active_connections.get(), 1);
        }
        assert_eq!(metrics.active_connections.get(), 0);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = Metrics::new().unwrap();
        metrics
            .response_time
            .with_label_values(&["https", "308"])
            .observe(0.1);

        let histogram = metrics.response_time.with_label_values(&["https", "308"]);
        assert_eq!(histogram.get_sample_count(), 1);
        let exposed = metrics.gather().unwrap();
        assert!(exposed.contains(r#"le="0.25""#));
        assert!(exposed.contains(r#"le="2.75""#));
    }
}
