//! Identity stage: API key → `TenantIdentity` in request extensions.

use crate::auth::extract_credential;
use crate::error::ApiError;
use crate::pipeline::GovernedRoute;
use crate::telemetry::metrics::record_admission;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Resolve the caller and attach its identity, or reject with 401/400/503.
pub async fn identity_middleware(
    State(route): State<GovernedRoute>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let governance = route.governance();
    let credential = extract_credential(request.headers(), governance.credential_header());

    match governance.resolver().resolve(credential.as_deref()).await {
        Ok(identity) => {
            record_admission("identity", "allow");
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(err) => {
            record_admission("identity", err.kind());
            tracing::debug!(
                endpoint = %route.policy().endpoint,
                reason = err.kind(),
                "Request rejected at identity stage"
            );
            Err(err.into())
        }
    }
}
