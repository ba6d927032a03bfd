//! Static endpoint policies and rate-limit decisions

use crate::error::ConfigError;
use crate::plan::PlanTier;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// RATE LIMIT POLICY
// ============================================================================

/// Fixed-window admission budget: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub limit: u64,
}

impl RateLimitPolicy {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { window, limit }
    }

    pub fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Decision for the `count`-th request of the current window.
    pub fn decide(&self, count: u64, reset_at: Timestamp) -> RateLimitDecision {
        RateLimitDecision {
            allowed: count <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            reset_at,
            degraded: false,
        }
    }

    /// Decision used when the counting store could not be consulted and the
    /// configured policy is to let the request through.
    pub fn degraded(&self, reset_at: Timestamp) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit,
            reset_at,
            degraded: true,
        }
    }
}

/// Result of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Timestamp,
    /// True when the store was unreachable and the request was admitted anyway.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

/// Default budget per plan tier, used when an endpoint does not declare its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRateLimits {
    pub free: RateLimitPolicy,
    pub starter: RateLimitPolicy,
    pub pro: RateLimitPolicy,
    pub team: RateLimitPolicy,
    pub enterprise: RateLimitPolicy,
}

impl Default for PlanRateLimits {
    fn default() -> Self {
        Self {
            free: RateLimitPolicy::per_minute(60),
            starter: RateLimitPolicy::per_minute(120),
            pro: RateLimitPolicy::per_minute(300),
            team: RateLimitPolicy::per_minute(600),
            enterprise: RateLimitPolicy::per_minute(1200),
        }
    }
}

impl PlanRateLimits {
    pub fn for_plan(&self, plan: PlanTier) -> RateLimitPolicy {
        match plan {
            PlanTier::Free => self.free,
            PlanTier::Starter => self.starter,
            PlanTier::Pro => self.pro,
            PlanTier::Team => self.team,
            PlanTier::Enterprise => self.enterprise,
        }
    }

    pub fn set(&mut self, plan: PlanTier, policy: RateLimitPolicy) {
        match plan {
            PlanTier::Free => self.free = policy,
            PlanTier::Starter => self.starter = policy,
            PlanTier::Pro => self.pro = policy,
            PlanTier::Team => self.team = policy,
            PlanTier::Enterprise => self.enterprise = policy,
        }
    }
}

// ============================================================================
// ENDPOINT POLICY
// ============================================================================

/// Static governance declaration for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPolicy {
    /// Identifier used in rejection messages and tracked events.
    pub endpoint: String,
    /// Minimum plan required, if the endpoint is gated.
    pub min_plan: Option<PlanTier>,
    /// Endpoint-specific budget; the plan default applies when `None`.
    pub rate_limit: Option<RateLimitPolicy>,
    /// Query parameters copied into the tracked event.
    pub tracked_params: Vec<String>,
}

impl EndpointPolicy {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            min_plan: None,
            rate_limit: None,
            tracked_params: Vec::new(),
        }
    }

    pub fn min_plan(mut self, plan: PlanTier) -> Self {
        self.min_plan = Some(plan);
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    pub fn track_param(mut self, name: impl Into<String>) -> Self {
        self.tracked_params.push(name.into());
        self
    }
}

// ============================================================================
// OPERATING MODES
// ============================================================================

/// What to do when a dependency needed for an admission decision is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyErrorPolicy {
    /// Admit the request and record the decision as degraded.
    Allow,
    /// Reject the request.
    #[default]
    Deny,
}

impl FromStr for DependencyErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(DependencyErrorPolicy::Allow),
            "deny" => Ok(DependencyErrorPolicy::Deny),
            other => Err(ConfigError::InvalidValue {
                field: "on_dependency_error".to_string(),
                value: other.to_string(),
                reason: "expected 'allow' or 'deny'".to_string(),
            }),
        }
    }
}

/// Execution mode of the process. Never inferred; always supplied explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Credentials are verified against the verification service.
    #[default]
    Production,
    /// Trusted local development: verification is bypassed.
    Local,
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" => Ok(ExecutionMode::Production),
            "local" => Ok(ExecutionMode::Local),
            other => Err(ConfigError::InvalidValue {
                field: "execution_mode".to_string(),
                value: other.to_string(),
                reason: "expected 'production' or 'local'".to_string(),
            }),
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_allowed_iff_within_limit(limit in 0u64..10_000, count in 1u64..20_000) {
            let decision = RateLimitPolicy::per_minute(limit).decide(count, Utc::now());
            prop_assert_eq!(decision.allowed, count <= limit);
            prop_assert!(decision.remaining <= limit);
            if decision.allowed {
                prop_assert_eq!(decision.remaining, limit - count);
            } else {
                prop_assert_eq!(decision.remaining, 0);
            }
        }
    }
}
