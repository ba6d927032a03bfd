//! Property-Based Tests for Fixed-Window Admission
//!
//! For any budget and any number of calls inside one window, exactly
//! `min(calls, limit)` are admitted and `remaining` never goes negative.
//! Endpoint budgets are counted apart from the plan window.

use proptest::prelude::*;
use std::sync::Arc;
use tollgate_api::{RateLimitKey, RateLimiter};
use tollgate_core::EndpointPolicy;
use tollgate_test_utils::generators::{arb_rate_limit_policy, arb_tenant, arb_workspace_id};
use tollgate_test_utils::{DependencyErrorPolicy, InMemoryCounterStore};

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => panic!("failed to build test runtime: {}", e),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_admits_exactly_limit_per_window(
        policy in arb_rate_limit_policy(),
        workspace in arb_workspace_id(),
        calls in 1u64..80,
    ) {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            "prop",
            DependencyErrorPolicy::Deny,
        );
        let key = RateLimitKey::Workspace(workspace).to_string();

        let decisions = runtime().block_on(async {
            let mut decisions = Vec::new();
            for _ in 0..calls {
                decisions.push(limiter.check(&key, &policy).await);
            }
            decisions
        });

        let mut admitted = 0u64;
        for (i, decision) in decisions.into_iter().enumerate() {
            let decision = decision.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(decision.limit, policy.limit);
            prop_assert!(decision.remaining <= policy.limit);
            prop_assert_eq!(decision.allowed, (i as u64) < policy.limit);
            if decision.allowed {
                admitted += 1;
            }
        }
        prop_assert_eq!(admitted, calls.min(policy.limit));
    }

    #[test]
    fn prop_endpoint_budget_does_not_drain_plan_window(
        tenant in arb_tenant(),
        endpoint_budget in arb_rate_limit_policy(),
        plan_calls in 1u64..40,
    ) {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            "prop",
            DependencyErrorPolicy::Deny,
        );
        let key = RateLimitKey::Workspace(tenant.workspace_id.clone());
        let plan_bucket = key.bucket(&EndpointPolicy::new("monitor.list"));
        let endpoint_bucket =
            key.bucket(&EndpointPolicy::new("monitor.export").rate_limit(endpoint_budget));
        prop_assert_ne!(&plan_bucket, &endpoint_bucket);

        let plan_policy = tollgate_core::RateLimitPolicy::per_minute(1000);
        let first_endpoint_call = runtime().block_on(async {
            for _ in 0..plan_calls {
                limiter.check(&plan_bucket, &plan_policy).await?;
            }
            limiter.check(&endpoint_bucket, &endpoint_budget).await
        });

        let decision = first_endpoint_call.map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(decision.allowed);
        prop_assert_eq!(decision.remaining, endpoint_budget.limit - 1);
    }
}
