//! Subscription plan tiers and their configured ordering

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tier of a workspace.
///
/// Tiers carry no intrinsic ordering; comparisons always go through a
/// [`PlanHierarchy`] so the order stays a piece of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Team,
    Enterprise,
}

impl PlanTier {
    /// Every tier, in declaration order.
    pub const ALL: [PlanTier; 5] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Pro,
        PlanTier::Team,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
            PlanTier::Team => "team",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            "team" => Ok(PlanTier::Team),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(ConfigError::InvalidValue {
                field: "plan".to_string(),
                value: other.to_string(),
                reason: "unknown plan tier".to_string(),
            }),
        }
    }
}

// ============================================================================
// PLAN HIERARCHY
// ============================================================================

/// Total order over plan tiers, lowest first.
///
/// Built from configuration. Every tier must appear exactly once, so any two
/// tiers are always comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanHierarchy {
    order: Vec<PlanTier>,
}

impl Default for PlanHierarchy {
    fn default() -> Self {
        Self {
            order: PlanTier::ALL.to_vec(),
        }
    }
}

impl PlanHierarchy {
    /// Build a hierarchy from an explicit lowest-to-highest ordering.
    pub fn from_order(order: Vec<PlanTier>) -> Result<Self, ConfigError> {
        for tier in PlanTier::ALL {
            let occurrences = order.iter().filter(|t| **t == tier).count();
            if occurrences != 1 {
                return Err(ConfigError::InvalidValue {
                    field: "plan_order".to_string(),
                    value: order
                        .iter()
                        .map(PlanTier::as_str)
                        .collect::<Vec<_>>()
                        .join(","),
                    reason: format!(
                        "tier '{}' must appear exactly once (found {})",
                        tier, occurrences
                    ),
                });
            }
        }
        Ok(Self { order })
    }

    /// Parse a comma-separated ordering such as `free,starter,pro,team,enterprise`.
    pub fn parse(csv: &str) -> Result<Self, ConfigError> {
        let order = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PlanTier::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_order(order)
    }

    /// Position of `tier` in the order (0 = lowest).
    pub fn rank(&self, tier: PlanTier) -> usize {
        // Construction guarantees every tier is present.
        self.order
            .iter()
            .position(|t| *t == tier)
            .unwrap_or(0)
    }

    /// True if `actual` is at least `required`.
    pub fn satisfies(&self, actual: PlanTier, required: PlanTier) -> bool {
        self.rank(actual) >= self.rank(required)
    }

    /// Tiers from lowest to highest.
    pub fn tiers(&self) -> &[PlanTier] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_is_declaration_order() {
        let hierarchy = PlanHierarchy::default();
        assert!(hierarchy.satisfies(PlanTier::Enterprise, PlanTier::Free));
        assert!(hierarchy.satisfies(PlanTier::Pro, PlanTier::Pro));
        assert!(!hierarchy.satisfies(PlanTier::Starter, PlanTier::Pro));
        assert_eq!(hierarchy.rank(PlanTier::Free), 0);
        assert_eq!(hierarchy.rank(PlanTier::Enterprise), 4);
    }

    #[test]
    fn test_parse_custom_order() -> Result<(), ConfigError> {
        let hierarchy = PlanHierarchy::parse("free, pro, starter, team, enterprise")?;
        assert!(hierarchy.satisfies(PlanTier::Starter, PlanTier::Pro));
        assert!(!hierarchy.satisfies(PlanTier::Pro, PlanTier::Starter));
        assert_eq!(
            hierarchy.tiers(),
            &[
                PlanTier::Free,
                PlanTier::Pro,
                PlanTier::Starter,
                PlanTier::Team,
                PlanTier::Enterprise
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_rejects_missing_tier() {
        let err = PlanHierarchy::parse("free,starter,pro,team");
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_rejects_duplicate_tier() {
        let err = PlanHierarchy::parse("free,free,starter,pro,team,enterprise");
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        let err = PlanHierarchy::parse("free,starter,pro,team,enterprise,platinum");
        assert!(err.is_err());
    }

    #[test]
    fn test_plan_tier_from_str_case_insensitive() {
        assert_eq!("PRO".parse::<PlanTier>().ok(), Some(PlanTier::Pro));
        assert_eq!(" team ".parse::<PlanTier>().ok(), Some(PlanTier::Team));
    }
}
