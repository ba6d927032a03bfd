//! Middleware modules for the Tollgate API
//!
//! One Axum middleware per governance stage:
//!
//! - `identity`: resolves the API key and attaches the `TenantIdentity`
//! - `plan`: rejects workspaces below the endpoint's minimum plan
//! - `rate_limit`: fixed-window admission per workspace or client IP
//! - `track`: fires the observability hook after a 2xx response
//!
//! # Middleware Order
//!
//! Stages run identity → plan → rate limit → track → handler. Axum applies
//! the last added layer first, so they are added in reverse:
//!
//! ```ignore
//! get(handler)
//!     // Innermost (runs last on request, first on response)
//!     .layer(middleware::from_fn_with_state(route.clone(), track_middleware))
//!     .layer(middleware::from_fn_with_state(route.clone(), rate_limit_middleware))
//!     .layer(middleware::from_fn_with_state(route.clone(), plan_gate_middleware))
//!     // Outermost
//!     .layer(middleware::from_fn_with_state(route, identity_middleware))
//! ```
//!
//! `Governance::route` assembles this chain from an `EndpointPolicy`.

mod identity;
mod plan;
mod rate_limit;
mod track;

pub use identity::identity_middleware;
pub use plan::plan_gate_middleware;
pub use rate_limit::{
    apply_rate_limit_headers, extract_client_ip, rate_limit_middleware, RATE_LIMIT_LIMIT,
    RATE_LIMIT_REMAINING, RATE_LIMIT_RESET,
};
pub use track::track_middleware;
