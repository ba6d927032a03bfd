//! Caller Introspection Endpoint
//!
//! Returns the workspace and plan the presented API key resolves to.

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tollgate_core::{EndpointPolicy, PlanTier, WorkspaceId};

use crate::pipeline::{Governance, Tenant};

/// Endpoint identifier used for rate limiting and tracked events.
pub const WHOAMI_ENDPOINT: &str = "whoami";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    pub workspace_id: WorkspaceId,
    pub plan: PlanTier,
}

/// GET /v1/whoami
pub async fn whoami(tenant: Tenant) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        workspace_id: tenant.workspace_id.clone(),
        plan: tenant.plan_tier,
    })
}

/// Governed on every plan, with the plan's default budget.
pub fn create_router(governance: &Governance) -> Router {
    Router::new().route(
        "/",
        governance.route(EndpointPolicy::new(WHOAMI_ENDPOINT), get(whoami)),
    )
}
