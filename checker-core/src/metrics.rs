//! Prometheus metrics for synthetic-checker
//!
//! Per-check status gauges, outcome counters and duration histograms,
//! plus HTTP server request metrics recorded by the API layer.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Latest check outcome per check name, 1 when passing and 0 when failing.
pub static CHECK_STATUS_UP: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("check_status_up", "Status from the check"),
        &["name"],
    )
    .expect("failed to create check_status_up")
});

/// Count of check outcomes, labeled by check name and "success"/"error".
pub static CHECK_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("check_status_total", "Number of check status occurrences"),
        &["name", "status"],
    )
    .expect("failed to create check_status_total")
});

/// Check execution duration in milliseconds.
pub static CHECK_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("check_duration_ms", "Duration of the check").buckets(vec![
            5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ]),
        &["name"],
    )
    .expect("failed to create check_duration_ms")
});

/// Total HTTP requests served by the API, labeled by status code and method.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Count of all HTTP requests"),
        &["code", "method"],
    )
    .expect("failed to create http_requests_total")
});

/// HTTP request duration in seconds, labeled by code, handler and method.
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "Duration of all HTTP requests",
        ),
        &["code", "handler", "method"],
    )
    .expect("failed to create http_request_duration_seconds")
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CHECK_STATUS_UP.clone()))
        .expect("failed to register check_status_up");
    registry
        .register(Box::new(CHECK_STATUS_TOTAL.clone()))
        .expect("failed to register check_status_total");
    registry
        .register(Box::new(CHECK_DURATION_MS.clone()))
        .expect("failed to register check_duration_ms");
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("failed to register http_requests_total");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("failed to register http_request_duration_seconds");
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("failed to encode metrics");
    String::from_utf8(buffer).expect("metrics are valid UTF-8")
}

/// Drop all per-check label values.
///
/// Check names are user-provided, so the label sets grow with check churn in
/// long-running deployments. Callers can reset them periodically to bound
/// cardinality.
pub fn reset_check_metrics() {
    CHECK_STATUS_UP.reset();
    CHECK_STATUS_TOTAL.reset();
    CHECK_DURATION_MS.reset();
}
