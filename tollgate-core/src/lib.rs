//! Tollgate Core - Admission Control Types
//!
//! Pure data structures shared by every tollgate crate. This crate contains
//! no I/O: the expiring cache and counter stores live in `tollgate-storage`,
//! the HTTP middleware chain lives in `tollgate-api`.
//!
//! The types here describe *who* is calling (`TenantIdentity`), *what plan*
//! they are on (`PlanTier`, ordered by a `PlanHierarchy`), and *how much* they
//! may call (`RateLimitPolicy`, `RateLimitDecision`).

pub mod error;
pub mod identity;
pub mod plan;
pub mod policy;

pub use error::{ConfigError, GovernanceError, GovernanceResult};
pub use identity::{TenantIdentity, WorkspaceId};
pub use plan::{PlanHierarchy, PlanTier};
pub use policy::{
    DependencyErrorPolicy, EndpointPolicy, ExecutionMode, PlanRateLimits, RateLimitDecision,
    RateLimitPolicy,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
