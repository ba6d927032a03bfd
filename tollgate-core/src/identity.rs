//! Identity types for tenants calling the API

use crate::plan::PlanTier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of the workspace (tenant) that owns a request.
///
/// Workspace ids come from the credential verification service as opaque
/// owner strings, so they are kept as strings rather than parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkspaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The resolved identity of an authenticated request.
///
/// Attached to the request context by the identity stage and read by every
/// later stage and by handlers. Handlers must not re-derive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantIdentity {
    /// Workspace owning the request
    pub workspace_id: WorkspaceId,
    /// Subscription tier of the workspace
    pub plan_tier: PlanTier,
}

impl TenantIdentity {
    pub fn new(workspace_id: impl Into<WorkspaceId>, plan_tier: PlanTier) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            plan_tier,
        }
    }

    /// Fixed identity attached in local execution mode.
    pub fn development() -> Self {
        Self::new("1", PlanTier::Team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_id_serializes_as_plain_string() -> Result<(), serde_json::Error> {
        let id = WorkspaceId::new("42");
        assert_eq!(serde_json::to_string(&id)?, "\"42\"");
        Ok(())
    }

    #[test]
    fn test_tenant_identity_camel_case() -> Result<(), serde_json::Error> {
        let identity = TenantIdentity::new("7", PlanTier::Pro);
        let json = serde_json::to_value(&identity)?;
        assert_eq!(json["workspaceId"], "7");
        assert_eq!(json["planTier"], "pro");
        Ok(())
    }

    #[test]
    fn test_development_identity() {
        let identity = TenantIdentity::development();
        assert_eq!(identity.workspace_id.as_str(), "1");
        assert_eq!(identity.plan_tier, PlanTier::Team);
    }
}
