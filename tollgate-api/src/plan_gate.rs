//! Plan Gate
//!
//! Pure comparison of a tenant's plan against an endpoint's minimum plan.

use tollgate_core::{GovernanceError, GovernanceResult, PlanHierarchy, PlanTier, TenantIdentity};

/// Reject with `InsufficientPlan` if `tenant` is on a tier below `required`.
pub fn check_minimum_plan(
    hierarchy: &PlanHierarchy,
    tenant: &TenantIdentity,
    required: PlanTier,
    feature: &str,
) -> GovernanceResult<()> {
    if hierarchy.satisfies(tenant.plan_tier, required) {
        return Ok(());
    }
    Err(GovernanceError::InsufficientPlan {
        feature: feature.to_string(),
        required,
        current: tenant.plan_tier,
    })
}
