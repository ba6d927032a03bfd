//! Axum Middleware for HTTP Request Metrics
//!
//! Records a Prometheus counter and latency histogram per request, labelled
//! by the matched route template so label cardinality stays bounded.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::metrics::METRICS;

/// Route label used when no route matched (404s).
const UNMATCHED_ROUTE: &str = "unmatched";

/// Metrics middleware for Axum.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(request).await;

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            &method,
            &route,
            response.status().as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }
    response
}
