//! End-to-end tests of the admission chain over mock collaborators.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tollgate_api::{ApiError, Tenant, DEFAULT_CREDENTIAL_HEADER};
use tollgate_test_utils::*;
use tower::ServiceExt;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const SETTLE: Duration = Duration::from_millis(200);

async fn ok(tenant: Tenant) -> Json<Value> {
    Json(json!({ "workspaceId": tenant.workspace_id, "plan": tenant.plan_tier }))
}

async fn failing(_tenant: Tenant) -> Result<Json<Value>, ApiError> {
    Err(ApiError::internal_error("handler failed"))
}

fn app(harness: &TestGovernance) -> Router {
    let governance = &harness.governance;
    Router::new()
        .route(
            "/summary",
            governance.route(
                EndpointPolicy::new("monitor.summary").min_plan(PlanTier::Pro),
                get(ok),
            ),
        )
        .route(
            "/limited",
            governance.route(
                EndpointPolicy::new("limited").rate_limit(RateLimitPolicy::per_minute(5)),
                get(ok),
            ),
        )
        .route(
            "/monitors",
            governance.route(
                EndpointPolicy::new("monitor.list").track_param("region"),
                get(ok),
            ),
        )
        .route(
            "/failing",
            governance.route(EndpointPolicy::new("failing"), get(failing)),
        )
}

fn request(uri: &str, key: Option<&str>) -> TestResult<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header(DEFAULT_CREDENTIAL_HEADER, key);
    }
    Ok(builder.body(Body::empty())?)
}

async fn send(app: &Router, request: Request<Body>) -> TestResult<(StatusCode, HeaderMap, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, headers, body))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> TestResult<&'a str> {
    Ok(headers
        .get(name)
        .ok_or_else(|| format!("missing header {}", name))?
        .to_str()?)
}

// ============================================================================
// IDENTITY STAGE
// ============================================================================

#[tokio::test]
async fn missing_credential_is_rejected_before_any_dependency() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);

    let (status, _, body) = send(&app, request("/monitors", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    assert_eq!(harness.verifier.calls(), 0);
    assert_eq!(harness.store.calls(), 0);
    assert!(harness.sink.wait_for(1, SETTLE).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_key_is_unauthorized() -> TestResult {
    let harness = TestGovernance::new();
    let (status, _, _) = send(&app(&harness), request("/monitors", Some("os_unknown"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn bearer_header_is_accepted() -> TestResult {
    let harness = TestGovernance::new();
    let request = Request::builder()
        .uri("/monitors")
        .header("authorization", format!("Bearer {}", PRO_KEY))
        .body(Body::empty())?;
    let (status, _, body) = send(&app(&harness), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspaceId"], PRO_WORKSPACE);
    Ok(())
}

#[tokio::test]
async fn resolved_identity_is_cached_per_key() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);
    for _ in 0..3 {
        let (status, _, _) = send(&app, request("/monitors", Some(TEAM_KEY))?).await?;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(harness.verifier.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn verifier_failures_map_to_400_and_503() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);

    harness.verifier.fail_with(Some(VerifyError::Transport {
        reason: "unexpected body".to_string(),
    }));
    let (status, _, body) = send(&app, request("/monitors", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    harness.verifier.fail_with(Some(VerifyError::Unreachable {
        reason: "connection refused".to_string(),
    }));
    let (status, _, body) = send(&app, request("/monitors", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("connection refused"));
    assert_eq!(harness.store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn local_mode_attaches_development_identity_without_verification() -> TestResult {
    let harness = TestGovernance::builder()
        .execution_mode(ExecutionMode::Local)
        .build();
    let (status, _, body) = send(&app(&harness), request("/summary", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspaceId"], "1");
    assert_eq!(body["plan"], "team");
    assert_eq!(harness.verifier.calls(), 0);
    Ok(())
}

// ============================================================================
// PLAN STAGE
// ============================================================================

#[tokio::test]
async fn plan_below_minimum_is_payment_required_and_not_counted() -> TestResult {
    let harness = TestGovernance::new();
    let (status, headers, body) = send(&app(&harness), request("/summary", Some(FREE_KEY))?).await?;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "PAYMENT_REQUIRED");
    assert_eq!(body["details"]["feature"], "monitor.summary");
    assert_eq!(body["details"]["requiredPlan"], "pro");
    assert!(headers.get("x-ratelimit-limit").is_none());
    assert_eq!(harness.store.calls(), 0);
    assert!(harness.sink.wait_for(1, SETTLE).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn plan_at_or_above_minimum_passes() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);
    for key in [PRO_KEY, TEAM_KEY] {
        let (status, _, _) = send(&app, request("/summary", Some(key))?).await?;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(harness.store.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn plan_upgrade_takes_effect_after_cache_ttl() -> TestResult {
    let harness = TestGovernance::builder()
        .cache_ttl(Duration::from_secs(60))
        .build();
    let app = app(&harness);

    let (status, _, _) = send(&app, request("/summary", Some(FREE_KEY))?).await?;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    assert!(harness.directory.set_plan(FREE_WORKSPACE, PlanTier::Pro));
    let (status, _, _) = send(&app, request("/summary", Some(FREE_KEY))?).await?;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    tokio::time::advance(Duration::from_secs(61)).await;
    let (status, _, _) = send(&app, request("/summary", Some(FREE_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.verifier.calls(), 2);
    Ok(())
}

// ============================================================================
// RATE-LIMIT STAGE
// ============================================================================

#[tokio::test]
async fn sixth_request_in_window_is_rejected() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);

    for expected_remaining in (0..5).rev() {
        let (status, headers, _) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header_str(&headers, "x-ratelimit-limit")?, "5");
        assert_eq!(
            header_str(&headers, "x-ratelimit-remaining")?,
            expected_remaining.to_string()
        );
        assert!(header_str(&headers, "x-ratelimit-reset")?.parse::<i64>()? > 0);
    }

    let (status, headers, body) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
    assert_eq!(body["details"]["remaining"], 0);
    assert!(body["details"]["resetAt"].is_string());
    assert_eq!(header_str(&headers, "x-ratelimit-remaining")?, "0");
    assert!(header_str(&headers, "retry-after")?.parse::<i64>()? >= 1);

    // Only the five admitted calls are tracked.
    let events = harness.sink.wait_for(6, SETTLE).await;
    assert_eq!(events.len(), 5);
    Ok(())
}

#[tokio::test]
async fn workspaces_have_independent_windows() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);
    for _ in 0..5 {
        send(&app, request("/limited", Some(PRO_KEY))?).await?;
    }
    let (status, _, _) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _, _) = send(&app, request("/limited", Some(TEAM_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn plan_default_budget_applies_without_endpoint_override() -> TestResult {
    let harness = TestGovernance::builder()
        .plan_limit(PlanTier::Free, RateLimitPolicy::per_minute(2))
        .build();
    let app = app(&harness);

    let (_, headers, _) = send(&app, request("/monitors", Some(FREE_KEY))?).await?;
    assert_eq!(header_str(&headers, "x-ratelimit-limit")?, "2");
    send(&app, request("/monitors", Some(FREE_KEY))?).await?;
    let (status, _, _) = send(&app, request("/monitors", Some(FREE_KEY))?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (_, headers, _) = send(&app, request("/monitors", Some(PRO_KEY))?).await?;
    assert_eq!(header_str(&headers, "x-ratelimit-limit")?, "300");
    Ok(())
}

#[tokio::test]
async fn endpoint_budget_is_counted_apart_from_plan_window() -> TestResult {
    let harness = TestGovernance::new();
    let app = app(&harness);

    for _ in 0..5 {
        let (status, _, _) = send(&app, request("/monitors", Some(PRO_KEY))?).await?;
        assert_eq!(status, StatusCode::OK);
    }

    // Plan-window traffic must not spend the endpoint's own budget.
    let (status, headers, _) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-ratelimit-limit")?, "5");
    assert_eq!(header_str(&headers, "x-ratelimit-remaining")?, "4");

    for _ in 0..4 {
        send(&app, request("/limited", Some(PRO_KEY))?).await?;
    }
    let (status, _, _) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Nor the other way round.
    let (status, headers, _) = send(&app, request("/monitors", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-ratelimit-remaining")?, "294");
    Ok(())
}

#[tokio::test]
async fn store_outage_fails_closed_by_default() -> TestResult {
    let harness = TestGovernance::builder().store_down().build();
    let (status, _, body) = send(&app(&harness), request("/limited", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert!(harness.sink.wait_for(1, SETTLE).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn store_outage_admits_when_configured_to_fail_open() -> TestResult {
    let harness = TestGovernance::builder()
        .store_down()
        .on_store_error(DependencyErrorPolicy::Allow)
        .build();
    let app = app(&harness);
    for _ in 0..7 {
        let (status, headers, _) = send(&app, request("/limited", Some(PRO_KEY))?).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header_str(&headers, "x-ratelimit-remaining")?, "5");
    }
    assert_eq!(harness.store.calls(), 7);
    Ok(())
}

// ============================================================================
// OBSERVABILITY HOOK
// ============================================================================

#[tokio::test]
async fn successful_request_is_tracked_with_properties() -> TestResult {
    let harness = TestGovernance::new();
    let (status, _, _) = send(
        &app(&harness),
        request("/monitors?region=ams&page=2", Some(PRO_KEY))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let events = harness.sink.wait_for(1, SETTLE).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event, "monitor.list");
    assert_eq!(event.workspace_id, WorkspaceId::new(PRO_WORKSPACE));
    assert_eq!(event.plan, PlanTier::Pro);
    assert_eq!(event.properties.get("method").map(String::as_str), Some("GET"));
    assert_eq!(event.properties.get("route").map(String::as_str), Some("/monitors"));
    assert_eq!(event.properties.get("status").map(String::as_str), Some("200"));
    assert_eq!(event.properties.get("region").map(String::as_str), Some("ams"));
    assert!(!event.properties.contains_key("page"));
    Ok(())
}

#[tokio::test]
async fn handler_error_is_not_tracked() -> TestResult {
    let harness = TestGovernance::new();
    let (status, _, _) = send(&app(&harness), request("/failing", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.sink.wait_for(1, SETTLE).await.is_empty());
    // The request still consumed budget.
    assert_eq!(harness.store.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn sink_failure_does_not_affect_response() -> TestResult {
    let harness = TestGovernance::new();
    harness.sink.set_failing(true);
    let (status, _, _) = send(&app(&harness), request("/monitors", Some(PRO_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.sink.wait_for(1, SETTLE).await.len(), 1);
    Ok(())
}

// ============================================================================
// FULL ROUTER
// ============================================================================

#[tokio::test]
async fn application_router_serves_operational_and_governed_routes() -> TestResult {
    let harness = TestGovernance::new();
    let app = tollgate_api::create_router(&harness.governance);

    let (status, _, body) = send(&app, request("/health", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _, _) = send(&app, request("/v1/whoami", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, body) = send(&app, request("/v1/whoami", Some(TEAM_KEY))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "workspaceId": TEAM_WORKSPACE, "plan": "team" }));
    assert_eq!(header_str(&headers, "x-ratelimit-limit")?, "600");

    let events = harness.sink.wait_for(1, SETTLE).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "whoami");
    assert_eq!(
        events[0].properties.get("route").map(String::as_str),
        Some("/v1/whoami")
    );

    let response = app.clone().oneshot(request("/metrics", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
