//! API Configuration Module
//!
//! Settings for identity resolution, plan ordering, rate limiting and the
//! outbound collaborators. Configuration is loaded from environment variables
//! with defaults suitable for development.

use crate::directory::DbConfig;
use crate::error::{ApiError, ApiResult};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;
use tollgate_core::{
    ConfigError, DependencyErrorPolicy, ExecutionMode, PlanHierarchy, PlanRateLimits, PlanTier,
    RateLimitPolicy,
};

/// Default header carrying the caller's API key.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "x-openstatus-key";

/// Upper bound for `TOLLGATE_IDENTITY_CACHE_TTL_SECS` (one day).
pub const MAX_IDENTITY_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
/// Upper bound for `TOLLGATE_CACHE_SWEEP_INTERVAL_MS` (one hour).
pub const MAX_CACHE_SWEEP_INTERVAL_MS: u64 = 60 * 60 * 1000;
/// Upper bound for the outbound call timeouts (five minutes).
pub const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Configuration for the governance chain and its collaborators.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Deployment
    // ========================================================================
    /// Deployment environment name ("development", "staging", "production").
    pub environment: String,

    /// Explicit execution mode. `Local` bypasses key verification.
    pub execution_mode: ExecutionMode,

    // ========================================================================
    // Identity Resolution
    // ========================================================================
    /// Request header carrying the API key.
    pub credential_header: String,

    /// Base URL of the key verification service.
    pub verifier_url: String,

    /// API id the keys belong to.
    pub verifier_api_id: Option<String>,

    /// Root key used to authenticate against the verification service.
    pub verifier_root_key: Option<SecretString>,

    /// Timeout for one verification call.
    pub verifier_timeout: Duration,

    /// How long a resolved identity stays cached.
    pub identity_cache_ttl: Duration,

    /// Interval of the cache eviction sweep.
    pub cache_sweep_interval: Duration,

    /// Workspace directory database; the in-memory directory is used when unset.
    pub database: Option<DbConfig>,

    /// Seed for the in-memory directory, as `owner:plan` pairs.
    pub static_workspaces: Vec<(String, PlanTier)>,

    // ========================================================================
    // Plan Gate
    // ========================================================================
    /// Total order over plan tiers.
    pub plan_hierarchy: PlanHierarchy,

    // ========================================================================
    // Rate Limiting
    // ========================================================================
    /// Number of reverse proxies in front of the service whose
    /// `X-Forwarded-For` entries are trusted. Zero ignores forwarding headers.
    pub trusted_proxy_hops: usize,

    /// Namespace prefixed to every rate-limit key.
    pub rate_limit_namespace: String,

    /// Default budget per plan tier.
    pub plan_rate_limits: PlanRateLimits,

    /// What to do when the counter store is unreachable.
    pub rate_limit_on_store_error: DependencyErrorPolicy,

    /// Redis REST endpoint; the in-memory store is used when unset.
    pub store_url: Option<String>,

    /// Token for the Redis REST endpoint.
    pub store_token: Option<SecretString>,

    /// Timeout for one counter store call.
    pub store_timeout: Duration,

    // ========================================================================
    // Observability Hook
    // ========================================================================
    /// Analytics endpoint receiving tracked request events.
    pub events_url: Option<String>,

    /// Client id sent with tracked events.
    pub events_client_id: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            execution_mode: ExecutionMode::Production,

            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            verifier_url: "https://api.unkey.dev".to_string(),
            verifier_api_id: None,
            verifier_root_key: None,
            verifier_timeout: Duration::from_secs(5),
            identity_cache_ttl: Duration::from_secs(60),
            cache_sweep_interval: Duration::from_secs(1),
            database: None,
            static_workspaces: Vec::new(),

            plan_hierarchy: PlanHierarchy::default(),

            trusted_proxy_hops: 0,
            rate_limit_namespace: "api".to_string(),
            plan_rate_limits: PlanRateLimits::default(),
            rate_limit_on_store_error: DependencyErrorPolicy::Deny,
            store_url: None,
            store_token: None,
            store_timeout: Duration::from_secs(1),

            events_url: None,
            events_client_id: None,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TOLLGATE_ENVIRONMENT`: Deployment environment (default: development)
    /// - `TOLLGATE_EXECUTION_MODE`: "production" or "local" (default: production)
    /// - `TOLLGATE_CREDENTIAL_HEADER`: API key header (default: x-openstatus-key)
    /// - `TOLLGATE_VERIFIER_URL`: Key verification base URL (default: https://api.unkey.dev)
    /// - `TOLLGATE_VERIFIER_API_ID`: API id the keys belong to
    /// - `TOLLGATE_VERIFIER_ROOT_KEY`: Root key for the verification service
    /// - `TOLLGATE_VERIFIER_TIMEOUT_MS`: Verification timeout (default: 5000)
    /// - `TOLLGATE_IDENTITY_CACHE_TTL_SECS`: Identity cache TTL (default: 60)
    /// - `TOLLGATE_CACHE_SWEEP_INTERVAL_MS`: Cache sweep interval (default: 1000)
    /// - `TOLLGATE_WORKSPACES`: In-memory directory seed, e.g. "1:team,2:free"
    /// - `TOLLGATE_DB_HOST` and friends: Postgres workspace directory (see `DbConfig`)
    /// - `TOLLGATE_PLAN_ORDER`: Comma-separated tiers, lowest first
    /// - `TOLLGATE_TRUSTED_PROXY_HOPS`: Trusted reverse proxies for client IPs (default: 0)
    /// - `TOLLGATE_RATE_LIMIT_NAMESPACE`: Key namespace (default: api)
    /// - `TOLLGATE_RATE_LIMIT_FREE` .. `TOLLGATE_RATE_LIMIT_ENTERPRISE`: Requests per minute
    /// - `TOLLGATE_RATE_LIMIT_ON_STORE_ERROR`: "allow" or "deny" (default: deny)
    /// - `TOLLGATE_STORE_URL` / `TOLLGATE_STORE_TOKEN`: Redis REST endpoint and token
    /// - `TOLLGATE_STORE_TIMEOUT_MS`: Counter store timeout (default: 1000)
    /// - `TOLLGATE_EVENTS_URL` / `TOLLGATE_EVENTS_CLIENT_ID`: Analytics sink
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let plan_hierarchy = match var("TOLLGATE_PLAN_ORDER") {
            Some(order) => PlanHierarchy::parse(&order)?,
            None => defaults.plan_hierarchy,
        };

        let mut plan_rate_limits = defaults.plan_rate_limits;
        for tier in PlanTier::ALL {
            let key = format!("TOLLGATE_RATE_LIMIT_{}", tier.as_str().to_uppercase());
            if let Some(limit) = parse_var::<u64>(&var, &key)? {
                plan_rate_limits.set(tier, RateLimitPolicy::per_minute(limit));
            }
        }

        let store_url = var("TOLLGATE_STORE_URL");
        let store_token = var("TOLLGATE_STORE_TOKEN").map(SecretString::from);
        if store_url.is_some() && store_token.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "TOLLGATE_STORE_TOKEN".to_string(),
            });
        }

        let static_workspaces = match var("TOLLGATE_WORKSPACES") {
            Some(seed) => parse_workspaces(&seed)?,
            None => Vec::new(),
        };

        Ok(Self {
            environment: var("TOLLGATE_ENVIRONMENT").unwrap_or(defaults.environment),
            execution_mode: parse_var(&var, "TOLLGATE_EXECUTION_MODE")?
                .unwrap_or(defaults.execution_mode),

            credential_header: var("TOLLGATE_CREDENTIAL_HEADER")
                .map(|h| h.to_lowercase())
                .unwrap_or(defaults.credential_header),
            verifier_url: var("TOLLGATE_VERIFIER_URL").unwrap_or(defaults.verifier_url),
            verifier_api_id: var("TOLLGATE_VERIFIER_API_ID"),
            verifier_root_key: var("TOLLGATE_VERIFIER_ROOT_KEY").map(SecretString::from),
            verifier_timeout: parse_bounded(&var, "TOLLGATE_VERIFIER_TIMEOUT_MS", MAX_TIMEOUT_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.verifier_timeout),
            identity_cache_ttl: parse_bounded(
                &var,
                "TOLLGATE_IDENTITY_CACHE_TTL_SECS",
                MAX_IDENTITY_CACHE_TTL_SECS,
            )?
                .map(Duration::from_secs)
                .unwrap_or(defaults.identity_cache_ttl),
            cache_sweep_interval: parse_bounded(
                &var,
                "TOLLGATE_CACHE_SWEEP_INTERVAL_MS",
                MAX_CACHE_SWEEP_INTERVAL_MS,
            )?
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_sweep_interval),
            database: DbConfig::from_lookup(&var)?,
            static_workspaces,

            plan_hierarchy,

            trusted_proxy_hops: parse_var(&var, "TOLLGATE_TRUSTED_PROXY_HOPS")?
                .unwrap_or(defaults.trusted_proxy_hops),
            rate_limit_namespace: var("TOLLGATE_RATE_LIMIT_NAMESPACE")
                .unwrap_or(defaults.rate_limit_namespace),
            plan_rate_limits,
            rate_limit_on_store_error: parse_var(&var, "TOLLGATE_RATE_LIMIT_ON_STORE_ERROR")?
                .unwrap_or(defaults.rate_limit_on_store_error),
            store_url,
            store_token,
            store_timeout: parse_bounded(&var, "TOLLGATE_STORE_TIMEOUT_MS", MAX_TIMEOUT_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),

            events_url: var("TOLLGATE_EVENTS_URL"),
            events_client_id: var("TOLLGATE_EVENTS_CLIENT_ID"),
        })
    }

    /// Check if running in a production environment.
    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    /// Validate the configuration for production use.
    ///
    /// Called at server startup. Local execution mode is refused outright in
    /// production; missing verifier credentials are fatal in production and
    /// logged as warnings elsewhere.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        if self.execution_mode == ExecutionMode::Local {
            if self.is_production() {
                return Err(ApiError::from(ConfigError::IncompatibleOptions {
                    option_a: "TOLLGATE_EXECUTION_MODE=local".to_string(),
                    option_b: format!("TOLLGATE_ENVIRONMENT={}", self.environment),
                }));
            }
            tracing::warn!(
                "Local execution mode: API key verification is bypassed and every request \
                 runs as the development workspace"
            );
            return Ok(());
        }

        let missing: Vec<&str> = [
            ("TOLLGATE_VERIFIER_API_ID", self.verifier_api_id.is_none()),
            ("TOLLGATE_VERIFIER_ROOT_KEY", self.verifier_root_key.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, is_missing)| is_missing.then_some(name))
        .collect();

        if !missing.is_empty() {
            if self.is_production() {
                return Err(ApiError::from(ConfigError::MissingRequired {
                    field: missing.join(", "),
                }));
            }
            tracing::warn!(
                missing = ?missing,
                "Key verifier is not fully configured; every API key will fail verification"
            );
        }

        if self.store_url.is_none() && self.is_production() {
            tracing::warn!(
                "No shared counter store configured; rate limits are enforced per process"
            );
        }

        Ok(())
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bounded(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    max: u64,
) -> Result<Option<u64>, ConfigError> {
    match parse_var::<u64>(var, key)? {
        Some(value) if value > max => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
            reason: format!("must be at most {}", max),
        }),
        parsed => Ok(parsed),
    }
}

fn parse_workspaces(seed: &str) -> Result<Vec<(String, PlanTier)>, ConfigError> {
    seed.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (owner, plan) = entry.split_once(':').ok_or_else(|| ConfigError::InvalidValue {
                field: "TOLLGATE_WORKSPACES".to_string(),
                value: entry.to_string(),
                reason: "expected owner:plan".to_string(),
            })?;
            Ok((owner.trim().to_string(), plan.parse()?))
        })
        .collect()
}
