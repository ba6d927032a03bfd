//! Observability hook: one event per successfully handled request.

use crate::events::RequestEvent;
use crate::pipeline::GovernedRoute;
use crate::telemetry::metrics::record_tracked_event;
use axum::{
    extract::{MatchedPath, Query, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::{BTreeMap, HashMap};
use tollgate_core::{EndpointPolicy, TenantIdentity};

/// Event properties derived from the request line.
fn request_properties(request: &Request, policy: &EndpointPolicy) -> BTreeMap<String, String> {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let mut properties = BTreeMap::from([
        ("method".to_string(), request.method().to_string()),
        ("route".to_string(), route),
    ]);

    if !policy.tracked_params.is_empty() {
        let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();
        for name in &policy.tracked_params {
            if let Some(value) = query.get(name) {
                properties.insert(name.clone(), value.clone());
            }
        }
    }
    properties
}

/// Fire the observability hook after the handler returns a 2xx response.
///
/// Delivery runs on a detached task; a failing sink is logged and never
/// affects the response. Non-2xx responses, including errors raised inside
/// the handler, are not tracked.
pub async fn track_middleware(
    State(route): State<GovernedRoute>,
    request: Request,
    next: Next,
) -> Response {
    let tenant = request.extensions().get::<TenantIdentity>().cloned();
    let properties = request_properties(&request, route.policy());

    let response = next.run(request).await;

    let Some(tenant) = tenant else {
        return response;
    };
    if !response.status().is_success() {
        return response;
    }

    let mut properties = properties;
    properties.insert("status".to_string(), response.status().as_u16().to_string());
    let event = RequestEvent {
        event: route.policy().endpoint.clone(),
        workspace_id: tenant.workspace_id,
        plan: tenant.plan_tier,
        properties,
    };

    let sink = route.governance().sink();
    tokio::spawn(async move {
        let event_name = event.event.clone();
        match sink.track(event).await {
            Ok(()) => record_tracked_event(true),
            Err(err) => {
                record_tracked_event(false);
                tracing::warn!(event = %event_name, error = %err, "Failed to deliver request event");
            }
        }
    });

    response
}
