//! Tollgate API - Request Governance Layer
//!
//! Axum middleware that admits or rejects each public API request before the
//! handler runs:
//!
//! 1. **Identity**: the API key resolves to a workspace and plan (cached)
//! 2. **Plan gate**: endpoints may require a minimum plan tier
//! 3. **Rate limit**: fixed-window budget per workspace in a shared store
//!
//! A successful response is then reported to the event sink.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod middleware;
pub mod pipeline;
pub mod plan_gate;
pub mod rate_limit;
pub mod routes;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{
    extract_credential, HttpKeyVerifier, HttpVerifierConfig, IdentityResolver, KeyVerifier,
    Verification, VerifyError,
};
pub use config::{ApiConfig, DEFAULT_CREDENTIAL_HEADER};
pub use directory::{
    DbConfig, DirectoryError, InMemoryWorkspaceDirectory, PgWorkspaceDirectory,
    WorkspaceDirectory,
};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::{EventError, EventSink, HttpEventSink, NoopEventSink, RequestEvent};
pub use pipeline::{Governance, GovernanceBuilder, GovernedRoute, Tenant};
pub use plan_gate::check_minimum_plan;
pub use rate_limit::{RateLimitKey, RateLimiter};
pub use routes::create_router;
