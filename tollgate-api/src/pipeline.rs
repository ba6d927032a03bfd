//! Governance Pipeline Assembly
//!
//! [`Governance`] bundles the shared state of the admission chain. Each
//! governed route gets its own [`GovernedRoute`] state pairing that bundle
//! with the route's static [`EndpointPolicy`], and the stage middlewares are
//! layered so a request passes identity → plan → rate limit → track → handler.

use crate::auth::{
    HttpKeyVerifier, HttpVerifierConfig, IdentityResolver, KeyVerifier, Verification, VerifyError,
};
use crate::config::ApiConfig;
use crate::directory::{InMemoryWorkspaceDirectory, PgWorkspaceDirectory, WorkspaceDirectory};
use crate::error::{ApiError, ApiResult};
use crate::events::{EventSink, HttpEventSink, NoopEventSink};
use crate::middleware::{
    identity_middleware, plan_gate_middleware, rate_limit_middleware, track_middleware,
};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    middleware::from_fn_with_state,
    routing::MethodRouter,
};
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{EndpointPolicy, PlanHierarchy, PlanRateLimits, TenantIdentity};
use tollgate_storage::{
    CacheConfig, CounterStore, ExpiringCache, InMemoryCounterStore, RestCounterStore,
    RestStoreConfig,
};

// ============================================================================
// GOVERNANCE STATE
// ============================================================================

/// Shared state of the admission chain. Cheap to clone.
#[derive(Clone)]
pub struct Governance {
    inner: Arc<GovernanceInner>,
}

struct GovernanceInner {
    resolver: IdentityResolver,
    hierarchy: PlanHierarchy,
    plan_limits: PlanRateLimits,
    limiter: RateLimiter,
    sink: Arc<dyn EventSink>,
    credential_header: String,
    trusted_proxy_hops: usize,
}

impl std::fmt::Debug for Governance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governance")
            .field("resolver", &self.inner.resolver)
            .field("hierarchy", &self.inner.hierarchy)
            .field("limiter", &self.inner.limiter)
            .field("credential_header", &self.inner.credential_header)
            .field("trusted_proxy_hops", &self.inner.trusted_proxy_hops)
            .finish_non_exhaustive()
    }
}

impl Governance {
    pub fn builder(resolver: IdentityResolver, limiter: RateLimiter) -> GovernanceBuilder {
        GovernanceBuilder {
            resolver,
            limiter,
            hierarchy: PlanHierarchy::default(),
            plan_limits: PlanRateLimits::default(),
            sink: Arc::new(NoopEventSink),
            credential_header: crate::config::DEFAULT_CREDENTIAL_HEADER.to_string(),
            trusted_proxy_hops: 0,
        }
    }

    /// Build every collaborator from configuration.
    ///
    /// The configuration is validated first, so an unsafe combination such as
    /// local mode in production is refused here as well as at startup.
    ///
    /// Falls back to in-process implementations when no external endpoint
    /// is configured: in-memory counters, the static workspace seed, and a
    /// no-op event sink.
    pub fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        config.validate_for_production()?;

        let verifier: Arc<dyn KeyVerifier> =
            match (&config.verifier_api_id, &config.verifier_root_key) {
                (Some(api_id), Some(root_key)) => Arc::new(
                    HttpKeyVerifier::new(HttpVerifierConfig {
                        base_url: config.verifier_url.clone(),
                        api_id: api_id.clone(),
                        root_key: root_key.clone(),
                        timeout: config.verifier_timeout,
                    })
                    .map_err(|e| ApiError::internal_error(e.to_string()))?,
                ),
                _ => Arc::new(UnconfiguredVerifier),
            };

        let directory: Arc<dyn WorkspaceDirectory> = match &config.database {
            Some(db) => Arc::new(
                PgWorkspaceDirectory::from_config(db)
                    .map_err(|e| ApiError::internal_error(e.to_string()))?,
            ),
            None => {
                let directory = InMemoryWorkspaceDirectory::new();
                for (owner, plan) in &config.static_workspaces {
                    directory.insert(owner.clone(), TenantIdentity::new(owner.clone(), *plan));
                }
                Arc::new(directory)
            }
        };

        let store: Arc<dyn CounterStore> = match (&config.store_url, &config.store_token) {
            (Some(url), Some(token)) => Arc::new(
                RestCounterStore::new(RestStoreConfig {
                    url: url.clone(),
                    token: token.clone(),
                    timeout: config.store_timeout,
                })
                .map_err(|e| ApiError::internal_error(e.to_string()))?,
            ),
            _ => Arc::new(InMemoryCounterStore::new()),
        };

        let sink: Arc<dyn EventSink> = match &config.events_url {
            Some(url) => Arc::new(
                HttpEventSink::new(
                    url.clone(),
                    config.events_client_id.clone(),
                    Duration::from_secs(5),
                )
                .map_err(|e| ApiError::internal_error(e.to_string()))?,
            ),
            None => Arc::new(NoopEventSink),
        };

        let cache = ExpiringCache::new(
            CacheConfig::new()
                .with_ttl(config.identity_cache_ttl)
                .with_sweep_interval(config.cache_sweep_interval),
        );
        let resolver = IdentityResolver::new(
            config.execution_mode,
            verifier,
            directory,
            cache,
            config.identity_cache_ttl,
        );
        let limiter = RateLimiter::new(
            store,
            config.rate_limit_namespace.clone(),
            config.rate_limit_on_store_error,
        );

        Ok(Self::builder(resolver, limiter)
            .hierarchy(config.plan_hierarchy.clone())
            .plan_limits(config.plan_rate_limits.clone())
            .sink(sink)
            .credential_header(config.credential_header.clone())
            .trusted_proxy_hops(config.trusted_proxy_hops)
            .build())
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.inner.resolver
    }

    pub fn hierarchy(&self) -> &PlanHierarchy {
        &self.inner.hierarchy
    }

    pub fn plan_limits(&self) -> &PlanRateLimits {
        &self.inner.plan_limits
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.inner.sink)
    }

    pub fn credential_header(&self) -> &str {
        &self.inner.credential_header
    }

    /// Reverse proxies whose `X-Forwarded-For` entries are trusted.
    pub fn trusted_proxy_hops(&self) -> usize {
        self.inner.trusted_proxy_hops
    }

    /// Wrap `handler` in the full admission chain for `policy`.
    ///
    /// The plan stage is only layered when the policy declares a minimum plan.
    pub fn route<S>(&self, policy: EndpointPolicy, handler: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let route = GovernedRoute::new(self.clone(), policy);
        let gated = route.policy().min_plan.is_some();

        let handler: MethodRouter<S> =
            handler.layer(from_fn_with_state(route.clone(), track_middleware));
        let handler: MethodRouter<S> =
            handler.layer(from_fn_with_state(route.clone(), rate_limit_middleware));
        let handler: MethodRouter<S> = if gated {
            handler.layer(from_fn_with_state(route.clone(), plan_gate_middleware))
        } else {
            handler
        };
        handler.layer(from_fn_with_state(route, identity_middleware))
    }

    /// Wrap an unauthenticated `handler` in the rate-limit stage only,
    /// keyed by client IP.
    pub fn public_route<S>(
        &self,
        policy: EndpointPolicy,
        handler: MethodRouter<S>,
    ) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let route = GovernedRoute::new(self.clone(), policy);
        handler.layer(from_fn_with_state(route, rate_limit_middleware))
    }
}

/// Builder for [`Governance`].
pub struct GovernanceBuilder {
    resolver: IdentityResolver,
    limiter: RateLimiter,
    hierarchy: PlanHierarchy,
    plan_limits: PlanRateLimits,
    sink: Arc<dyn EventSink>,
    credential_header: String,
    trusted_proxy_hops: usize,
}

impl GovernanceBuilder {
    pub fn hierarchy(mut self, hierarchy: PlanHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn plan_limits(mut self, plan_limits: PlanRateLimits) -> Self {
        self.plan_limits = plan_limits;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn credential_header(mut self, header: impl Into<String>) -> Self {
        self.credential_header = header.into().to_lowercase();
        self
    }

    pub fn trusted_proxy_hops(mut self, hops: usize) -> Self {
        self.trusted_proxy_hops = hops;
        self
    }

    pub fn build(self) -> Governance {
        Governance {
            inner: Arc::new(GovernanceInner {
                resolver: self.resolver,
                hierarchy: self.hierarchy,
                plan_limits: self.plan_limits,
                limiter: self.limiter,
                sink: self.sink,
                credential_header: self.credential_header,
                trusted_proxy_hops: self.trusted_proxy_hops,
            }),
        }
    }
}

/// Verifier used when no verification service is configured: every key is
/// reported invalid.
struct UnconfiguredVerifier;

#[async_trait]
impl KeyVerifier for UnconfiguredVerifier {
    async fn verify(&self, _key: &str) -> Result<Verification, VerifyError> {
        Ok(Verification::invalid())
    }
}

// ============================================================================
// PER-ROUTE STATE
// ============================================================================

/// Middleware state for one governed route.
#[derive(Clone, Debug)]
pub struct GovernedRoute {
    governance: Governance,
    policy: Arc<EndpointPolicy>,
}

impl GovernedRoute {
    pub fn new(governance: Governance, policy: EndpointPolicy) -> Self {
        Self {
            governance,
            policy: Arc::new(policy),
        }
    }

    pub fn governance(&self) -> &Governance {
        &self.governance
    }

    pub fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for the caller's tenant identity.
///
/// Reads the identity attached by `identity_middleware`; handlers never
/// re-derive it. Without the middleware, extraction fails with 500.
///
/// ```ignore
/// async fn whoami(Tenant(tenant): Tenant) -> Json<TenantIdentity> {
///     Json(tenant)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantIdentity>()
            .cloned()
            .map(Tenant)
            .ok_or_else(|| {
                ApiError::internal_error(
                    "TenantIdentity not found in request extensions. \
                     Ensure the route is wrapped with Governance::route.",
                )
            })
    }
}

impl std::ops::Deref for Tenant {
    type Target = TenantIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
