//! Tollgate Telemetry - Observability Infrastructure
//!
//! Provides structured logging and Prometheus metrics for the API layer.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, TollgateMetrics, METRICS};
pub use middleware::metrics_middleware;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
