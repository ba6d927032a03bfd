//! Rate-limit stage: fixed-window admission with quota headers.

use crate::error::ApiError;
use crate::pipeline::GovernedRoute;
use crate::rate_limit::RateLimitKey;
use crate::telemetry::metrics::record_admission;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tollgate_core::{GovernanceError, PlanTier, RateLimitDecision, TenantIdentity};

/// Budget of the current window.
pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix time (seconds) at which the window resets.
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Extract the client IP, trusting proxy headers only as far as configured.
///
/// With `trusted_proxy_hops == 0` the forwarding headers are ignored and the
/// connection address is used. With `n` trusted proxies in front of the
/// service, the client is the `n`-th `X-Forwarded-For` entry from the right;
/// entries left of it are client supplied. `X-Real-IP` is honoured only
/// behind a trusted proxy and only when `X-Forwarded-For` is absent.
///
/// Returns the unspecified address when nothing usable is available; those
/// callers share one window.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connection: Option<SocketAddr>,
    trusted_proxy_hops: usize,
) -> IpAddr {
    let fallback = connection
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    if trusted_proxy_hops == 0 {
        return fallback;
    }

    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        let hops: Vec<&str> = forwarded.split(',').map(str::trim).collect();
        return hops
            .len()
            .checked_sub(trusted_proxy_hops)
            .and_then(|index| hops[index].parse().ok())
            .unwrap_or(fallback);
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Write the `x-ratelimit-*` headers for `decision`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_at.timestamp()));
}

fn too_many_requests(decision: RateLimitDecision) -> Response {
    let retry_after = (decision.reset_at - Utc::now()).num_seconds().max(1);
    let mut response =
        ApiError::from(GovernanceError::RateLimitExceeded { decision: decision.clone() })
            .into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, &decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Count the request against its window; 429 once the budget is spent.
///
/// Authenticated requests are keyed by workspace and default to their plan's
/// budget. Requests without identity are keyed by client IP on the free budget.
/// An endpoint-specific budget overrides both and is counted in a window of
/// its own, so it neither drains nor is drained by the plan window.
pub async fn rate_limit_middleware(
    State(route): State<GovernedRoute>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let governance = route.governance();

    let (key, plan) = match request.extensions().get::<TenantIdentity>() {
        Some(tenant) => (
            RateLimitKey::Workspace(tenant.workspace_id.clone()),
            tenant.plan_tier,
        ),
        None => {
            let connection = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0);
            (
                RateLimitKey::Ip(extract_client_ip(
                    request.headers(),
                    connection,
                    governance.trusted_proxy_hops(),
                )),
                PlanTier::Free,
            )
        }
    };
    let policy = route
        .policy()
        .rate_limit
        .unwrap_or_else(|| governance.plan_limits().for_plan(plan));

    let bucket = key.bucket(route.policy());

    let decision = match governance.limiter().check(&bucket, &policy).await {
        Ok(decision) => decision,
        Err(err) => {
            record_admission("rate_limit", err.kind());
            return Err(err.into());
        }
    };

    if !decision.allowed {
        record_admission("rate_limit", "RateLimitExceeded");
        tracing::debug!(%bucket, limit = decision.limit, "Request rejected at rate-limit stage");
        return Ok(too_many_requests(decision));
    }

    record_admission(
        "rate_limit",
        if decision.degraded { "degraded" } else { "allow" },
    );
    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}
