//! Error types for tollgate admission decisions

use crate::plan::PlanTier;
use crate::policy::RateLimitDecision;
use thiserror::Error;

/// Reasons a request is refused by the governance chain.
///
/// The first five variants are caller-facing and are converted into a
/// terminal response by the stage that detects them. `DependencyUnavailable`
/// is resolved according to the configured [`crate::DependencyErrorPolicy`]
/// before it ever reaches a caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("No API key provided")]
    MissingCredential,

    #[error("Invalid API key")]
    InvalidCredential,

    #[error("Credential verification failed: {reason}")]
    VerificationTransportError { reason: String },

    #[error("{feature} requires the '{required}' plan, workspace is on '{current}'")]
    InsufficientPlan {
        feature: String,
        required: PlanTier,
        current: PlanTier,
    },

    #[error("Rate limit of {} requests exceeded", decision.limit)]
    RateLimitExceeded { decision: RateLimitDecision },

    #[error("Dependency '{dependency}' unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },
}

impl GovernanceError {
    pub fn dependency_unavailable(dependency: impl Into<String>, reason: impl ToString) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.to_string(),
        }
    }

    /// Machine-stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::MissingCredential => "MissingCredential",
            GovernanceError::InvalidCredential => "InvalidCredential",
            GovernanceError::VerificationTransportError { .. } => "VerificationTransportError",
            GovernanceError::InsufficientPlan { .. } => "InsufficientPlan",
            GovernanceError::RateLimitExceeded { .. } => "RateLimitExceeded",
            GovernanceError::DependencyUnavailable { .. } => "DependencyUnavailable",
        }
    }
}

/// Result type alias for admission decisions.
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_insufficient_plan_display_names_feature() {
        let err = GovernanceError::InsufficientPlan {
            feature: "Status page subscribers".to_string(),
            required: PlanTier::Pro,
            current: PlanTier::Free,
        };
        let msg = err.to_string();
        assert!(msg.contains("Status page subscribers"));
        assert!(msg.contains("'pro'"));
        assert!(msg.contains("'free'"));
    }

    #[test]
    fn test_rate_limit_display_includes_limit() {
        let err = GovernanceError::RateLimitExceeded {
            decision: RateLimitDecision {
                allowed: false,
                limit: 5,
                remaining: 0,
                reset_at: Utc::now(),
                degraded: false,
            },
        };
        assert!(err.to_string().contains('5'));
        assert_eq!(err.kind(), "RateLimitExceeded");
    }

    #[test]
    fn test_dependency_unavailable_constructor() {
        let err = GovernanceError::dependency_unavailable("counter-store", "connection refused");
        assert_eq!(err.kind(), "DependencyUnavailable");
        assert!(err.to_string().contains("counter-store"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "plan_order".to_string(),
            value: "free".to_string(),
            reason: "incomplete".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("plan_order"));
        assert!(msg.contains("incomplete"));
    }
}
