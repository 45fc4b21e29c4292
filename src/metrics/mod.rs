//! Metrics module
//!
//! Prometheus counters for the span pipeline and the HTTP surface. Everything
//! is registered in the default registry, which the metrics server exposes.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter,
};
use std::time::Duration;

lazy_static! {
    // Span pipeline metrics
    pub static ref SPANS_ENDED: IntCounter = register_int_counter!(
        "traced_spans_ended_total",
        "Spans ended and handed to processors"
    ).unwrap();

    pub static ref SPANS_DROPPED: IntCounter = register_int_counter!(
        "traced_spans_dropped_total",
        "Spans dropped because the export queue was full or closed"
    ).unwrap();

    pub static ref SPANS_EXPORTED: IntCounter = register_int_counter!(
        "traced_spans_exported_total",
        "Spans successfully exported"
    ).unwrap();

    pub static ref EXPORT_FAILURES: IntCounter = register_int_counter!(
        "traced_export_failures_total",
        "Spans discarded after a failed export"
    ).unwrap();

    // HTTP metrics
    pub static ref HTTP_REQUESTS: CounterVec = register_counter_vec!(
        "traced_http_requests_total",
        "HTTP requests handled",
        &["method", "route", "status"]
    ).unwrap();

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "traced_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

/// Record a span ending
pub fn record_span_ended() {
    SPANS_ENDED.inc();
}

/// Record a span dropped at the queue
pub fn record_span_dropped() {
    SPANS_DROPPED.inc();
}

/// Record a successfully exported batch
pub fn record_spans_exported(count: usize) {
    SPANS_EXPORTED.inc_by(count as u64);
}

/// Record a batch discarded after export failure
pub fn record_export_failure(count: usize) {
    EXPORT_FAILURES.inc_by(count as u64);
}

/// Record a completed HTTP request
///
/// # Arguments
/// * `method` - Request method
/// * `route` - Matched route template, or `unmatched`
/// * `status` - Response status code, or `cancelled`
/// * `duration` - Time from request start to response
pub fn record_http_request(method: &str, route: &str, status: &str, duration: Duration) {
    HTTP_REQUESTS
        .with_label_values(&[method, route, status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, route])
        .observe(duration.as_secs_f64());
}
