//! REST API Routes
//!
//! Assembles the public router. Operational endpoints (`/health`,
//! `/metrics`) sit outside the governance chain; every `/v1` route is
//! wrapped by `Governance::route`.

pub mod health;
pub mod whoami;

use axum::{middleware::from_fn, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::pipeline::Governance;
use crate::telemetry::{metrics_handler, metrics_middleware};

/// Build the full application router.
pub fn create_router(governance: &Governance) -> Router {
    let v1 = Router::new().nest("/whoami", whoami::create_router(governance));

    Router::new()
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .nest("/v1", v1)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
