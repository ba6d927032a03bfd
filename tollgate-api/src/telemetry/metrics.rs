//! Prometheus Metrics Definitions
//!
//! Defines the tollgate metrics with their labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TollgateMetrics>> = Lazy::new(TollgateMetrics::new);

/// Container for all tollgate metrics.
#[derive(Clone)]
pub struct TollgateMetrics {
    /// Admission decisions - labels: stage (identity/plan/rate_limit), outcome
    pub admission_decisions_total: CounterVec,

    /// Identity cache lookups - labels: result (hit/miss)
    pub identity_cache_total: CounterVec,

    /// Observability hook deliveries - labels: status (success/failure)
    pub tracked_events_total: CounterVec,

    /// HTTP request counter - labels: method, route, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, route
    pub http_request_duration_seconds: HistogramVec,
}

impl TollgateMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            admission_decisions_total: register_counter_vec!(
                "tollgate_admission_decisions_total",
                "Admission decisions taken by the governance chain",
                &["stage", "outcome"]
            )
            .map_err(|e| registration_error("admission_decisions_total", e))?,

            identity_cache_total: register_counter_vec!(
                "tollgate_identity_cache_total",
                "Identity cache lookups",
                &["result"]
            )
            .map_err(|e| registration_error("identity_cache_total", e))?,

            tracked_events_total: register_counter_vec!(
                "tollgate_tracked_events_total",
                "Request events handed to the event sink",
                &["status"]
            )
            .map_err(|e| registration_error("tracked_events_total", e))?,

            http_requests_total: register_counter_vec!(
                "tollgate_http_requests_total",
                "Total number of HTTP requests",
                &["method", "route", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tollgate_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "route"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, route, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, route])
            .observe(duration_secs);
    }
}

fn registration_error(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

/// Record one admission decision. No-op if metrics failed to initialize.
pub fn record_admission(stage: &str, outcome: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics
            .admission_decisions_total
            .with_label_values(&[stage, outcome])
            .inc();
    }
}

/// Record an identity cache lookup.
pub fn record_identity_cache(result: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.identity_cache_total.with_label_values(&[result]).inc();
    }
}

/// Record a tracked event delivery.
pub fn record_tracked_event(success: bool) {
    if let Ok(metrics) = METRICS.as_ref() {
        let status = if success { "success" } else { "failure" };
        metrics.tracked_events_total.with_label_values(&[status]).inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
