//! Plan stage: minimum plan tier per endpoint.

use crate::error::ApiError;
use crate::pipeline::GovernedRoute;
use crate::plan_gate::check_minimum_plan;
use crate::telemetry::metrics::record_admission;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tollgate_core::TenantIdentity;

/// Reject with 402 when the workspace plan is below the endpoint's minimum.
///
/// Must run after `identity_middleware`. A missing identity is a wiring
/// error and answers 500 rather than letting the request through.
pub async fn plan_gate_middleware(
    State(route): State<GovernedRoute>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(required) = route.policy().min_plan else {
        return Ok(next.run(request).await);
    };

    let tenant = request.extensions().get::<TenantIdentity>().ok_or_else(|| {
        ApiError::internal_error(
            "TenantIdentity not found in request extensions. \
             Ensure identity_middleware runs before plan_gate_middleware.",
        )
    })?;

    if let Err(err) = check_minimum_plan(
        route.governance().hierarchy(),
        tenant,
        required,
        &route.policy().endpoint,
    ) {
        record_admission("plan", err.kind());
        tracing::debug!(
            workspace_id = %tenant.workspace_id,
            plan = %tenant.plan_tier,
            required = %required,
            "Request rejected at plan stage"
        );
        return Err(err.into());
    }

    record_admission("plan", "allow");
    Ok(next.run(request).await)
}
