//! Workspace Directory
//!
//! Resolves the owner id returned by key verification to the workspace and
//! its current plan. The Postgres implementation uses a `deadpool-postgres`
//! connection pool; the in-memory one backs development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::NoTls;
use tollgate_core::{ConfigError, PlanTier, TenantIdentity};

/// Errors raised while looking up a workspace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Workspace directory unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Workspace record malformed: {reason}")]
    Malformed { reason: String },
}

/// Lookup of workspaces by key owner.
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    /// Workspace owned by `owner_id`, or `None` if it does not exist.
    async fn find(&self, owner_id: &str) -> Result<Option<TenantIdentity>, DirectoryError>;
}

// ============================================================================
// IN-MEMORY DIRECTORY
// ============================================================================

/// Directory held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceDirectory {
    workspaces: DashMap<String, TenantIdentity>,
}

impl InMemoryWorkspaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workspace whose id equals its owner id.
    pub fn with_workspace(self, owner_id: impl Into<String>, plan: PlanTier) -> Self {
        let owner_id = owner_id.into();
        self.insert(owner_id.clone(), TenantIdentity::new(owner_id, plan));
        self
    }

    pub fn insert(&self, owner_id: impl Into<String>, identity: TenantIdentity) {
        self.workspaces.insert(owner_id.into(), identity);
    }

    /// Change the plan of an existing workspace. Returns false if unknown.
    pub fn set_plan(&self, owner_id: &str, plan: PlanTier) -> bool {
        match self.workspaces.get_mut(owner_id) {
            Some(mut identity) => {
                identity.plan_tier = plan;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl WorkspaceDirectory for InMemoryWorkspaceDirectory {
    async fn find(&self, owner_id: &str) -> Result<Option<TenantIdentity>, DirectoryError> {
        Ok(self.workspaces.get(owner_id).map(|entry| entry.value().clone()))
    }
}

// ============================================================================
// POSTGRES DIRECTORY
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl DbConfig {
    /// Read `TOLLGATE_DB_*` variables. Returns `None` when no host is set.
    ///
    /// - `TOLLGATE_DB_HOST`: PostgreSQL host (enables the Postgres directory)
    /// - `TOLLGATE_DB_PORT`: Port (default: 5432)
    /// - `TOLLGATE_DB_NAME`: Database name (default: openstatus)
    /// - `TOLLGATE_DB_USER`: User (default: postgres)
    /// - `TOLLGATE_DB_PASSWORD`: Password (default: empty)
    /// - `TOLLGATE_DB_POOL_SIZE`: Maximum pool size (default: 16)
    /// - `TOLLGATE_DB_TIMEOUT_SECS`: Pool wait timeout (default: 5)
    pub fn from_lookup(
        var: &impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(host) = var("TOLLGATE_DB_HOST") else {
            return Ok(None);
        };
        let number = |key: &str, default: u64| -> Result<u64, ConfigError> {
            var(key)
                .map(|raw| {
                    raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        field: key.to_string(),
                        value: raw.clone(),
                        reason: e.to_string(),
                    })
                })
                .transpose()
                .map(|v| v.unwrap_or(default))
        };

        let port = u16::try_from(number("TOLLGATE_DB_PORT", 5432)?).map_err(|e| {
            ConfigError::InvalidValue {
                field: "TOLLGATE_DB_PORT".to_string(),
                value: "out of range".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Some(Self {
            host,
            port,
            dbname: var("TOLLGATE_DB_NAME").unwrap_or_else(|| "openstatus".to_string()),
            user: var("TOLLGATE_DB_USER").unwrap_or_else(|| "postgres".to_string()),
            password: SecretString::from(var("TOLLGATE_DB_PASSWORD").unwrap_or_default()),
            max_size: number("TOLLGATE_DB_POOL_SIZE", 16)? as usize,
            timeout: Duration::from_secs(number("TOLLGATE_DB_TIMEOUT_SECS", 5)?),
        }))
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, DirectoryError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DirectoryError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

/// Directory backed by the `workspace` table.
#[derive(Clone)]
pub struct PgWorkspaceDirectory {
    pool: Pool,
}

const FIND_WORKSPACE_SQL: &str = "SELECT id::text AS id, plan FROM workspace WHERE id::text = $1";

impl PgWorkspaceDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, DirectoryError> {
        Ok(Self::new(config.create_pool()?))
    }
}

#[async_trait]
impl WorkspaceDirectory for PgWorkspaceDirectory {
    async fn find(&self, owner_id: &str) -> Result<Option<TenantIdentity>, DirectoryError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DirectoryError::Unavailable {
                reason: e.to_string(),
            })?;

        let row = client
            .query_opt(FIND_WORKSPACE_SQL, &[&owner_id])
            .await
            .map_err(|e| DirectoryError::Unavailable {
                reason: e.to_string(),
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id").map_err(|e| DirectoryError::Malformed {
            reason: e.to_string(),
        })?;
        let plan: Option<String> = row.try_get("plan").map_err(|e| DirectoryError::Malformed {
            reason: e.to_string(),
        })?;

        Ok(Some(TenantIdentity::new(id, parse_plan(plan.as_deref())?)))
    }
}

/// Workspaces without a recorded plan are on the free tier.
fn parse_plan(raw: Option<&str>) -> Result<PlanTier, DirectoryError> {
    match raw {
        None => Ok(PlanTier::Free),
        Some(raw) => raw.parse().map_err(|e: ConfigError| DirectoryError::Malformed {
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_in_memory_lookup() -> Result<(), DirectoryError> {
        let directory = InMemoryWorkspaceDirectory::new().with_workspace("42", PlanTier::Pro);
        assert_eq!(
            directory.find("42").await?,
            Some(TenantIdentity::new("42", PlanTier::Pro))
        );
        assert_eq!(directory.find("43").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_plan_change() -> Result<(), DirectoryError> {
        let directory = InMemoryWorkspaceDirectory::new().with_workspace("1", PlanTier::Free);
        assert!(directory.set_plan("1", PlanTier::Team));
        assert!(!directory.set_plan("2", PlanTier::Team));
        assert_eq!(
            directory.find("1").await?.map(|t| t.plan_tier),
            Some(PlanTier::Team)
        );
        Ok(())
    }

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan(None), Ok(PlanTier::Free));
        assert_eq!(parse_plan(Some("TEAM")), Ok(PlanTier::Team));
        assert!(matches!(
            parse_plan(Some("platinum")),
            Err(DirectoryError::Malformed { .. })
        ));
    }

    #[test]
    fn test_db_config_from_lookup() -> Result<(), ConfigError> {
        let vars: HashMap<&str, &str> =
            [("TOLLGATE_DB_HOST", "db.internal"), ("TOLLGATE_DB_PORT", "6543")].into();
        let var = |key: &str| vars.get(key).map(|v| v.to_string());

        let config = DbConfig::from_lookup(&var)?.ok_or(ConfigError::MissingRequired {
            field: "TOLLGATE_DB_HOST".to_string(),
        })?;
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.dbname, "openstatus");

        let none = |_: &str| None;
        assert!(DbConfig::from_lookup(&none)?.is_none());
        Ok(())
    }

    #[test]
    fn test_db_config_rejects_bad_port() {
        let var = |key: &str| match key {
            "TOLLGATE_DB_HOST" => Some("db".to_string()),
            "TOLLGATE_DB_PORT" => Some("70000".to_string()),
            _ => None,
        };
        assert!(DbConfig::from_lookup(&var).is_err());
    }
}
