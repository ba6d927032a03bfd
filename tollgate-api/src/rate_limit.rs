//! Fixed-window Rate Limiter
//!
//! One counter per caller per window in a shared [`CounterStore`]. The window
//! opens on the first request and its expiry is set exactly once, so up to
//! twice the limit can pass across a window boundary. Store failures are
//! resolved by the configured [`DependencyErrorPolicy`].

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{
    DependencyErrorPolicy, EndpointPolicy, GovernanceError, GovernanceResult, RateLimitDecision,
    RateLimitPolicy, Timestamp, WorkspaceId,
};
use tollgate_storage::{CounterStore, WindowCount};

/// Caller identity a window is keyed on.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Authenticated request - keyed by workspace
    Workspace(WorkspaceId),
    /// Unauthenticated request - keyed by client IP
    Ip(IpAddr),
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Workspace(id) => write!(f, "ws:{}", id),
            RateLimitKey::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}

impl RateLimitKey {
    /// Identifier this caller is counted under on `endpoint`.
    ///
    /// An endpoint that declares its own budget gets a window of its own per
    /// caller. Every other endpoint shares the caller's plan window.
    pub fn bucket(&self, endpoint: &EndpointPolicy) -> String {
        match endpoint.rate_limit {
            Some(_) => format!("{}:ep:{}", self, endpoint.endpoint),
            None => self.to_string(),
        }
    }
}

/// Fixed-window limiter over a shared counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    namespace: String,
    on_dependency_error: DependencyErrorPolicy,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("namespace", &self.namespace)
            .field("on_dependency_error", &self.on_dependency_error)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        namespace: impl Into<String>,
        on_dependency_error: DependencyErrorPolicy,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            on_dependency_error,
        }
    }

    /// Store key for `identifier` within this limiter's namespace.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("ratelimit:{}:{}", self.namespace, identifier)
    }

    /// Count one request from `identifier` against `policy`.
    ///
    /// Returns the decision whether or not the request is allowed. An error
    /// is returned only when the store is unreachable and the policy is deny.
    pub async fn check(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> GovernanceResult<RateLimitDecision> {
        let key = self.key_for(identifier);
        match self.store.increment_in_window(&key, policy.window).await {
            Ok(WindowCount { count, ttl }) => {
                // A missing TTL means the expiry write was lost; report a full window.
                let reset_at = reset_at(ttl.unwrap_or(policy.window));
                Ok(policy.decide(count, reset_at))
            }
            Err(err) => match self.on_dependency_error {
                DependencyErrorPolicy::Allow => {
                    tracing::warn!(
                        %key,
                        error = %err,
                        "Counter store unavailable, admitting request without counting"
                    );
                    Ok(policy.degraded(reset_at(policy.window)))
                }
                DependencyErrorPolicy::Deny => {
                    Err(GovernanceError::dependency_unavailable("counter-store", err))
                }
            },
        }
    }
}

fn reset_at(ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tollgate_storage::{InMemoryCounterStore, StoreError, StoreResult};

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str) -> StoreResult<u64> {
            Err(StoreError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
            Ok(())
        }
        async fn ttl(&self, _key: &str) -> StoreResult<Option<Duration>> {
            Ok(None)
        }
    }

    fn limiter(policy: DependencyErrorPolicy) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryCounterStore::new()), "api", policy)
    }

    #[test]
    fn test_key_is_namespaced() {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        assert_eq!(limiter.key_for("ws:1"), "ratelimit:api:ws:1");
        assert_eq!(
            RateLimitKey::Workspace(WorkspaceId::new("7")).to_string(),
            "ws:7"
        );
    }

    #[test]
    fn test_only_endpoint_budgets_get_their_own_bucket() {
        let key = RateLimitKey::Workspace(WorkspaceId::new("7"));
        assert_eq!(key.bucket(&EndpointPolicy::new("monitor.list")), "ws:7");
        assert_eq!(
            key.bucket(
                &EndpointPolicy::new("monitor.export").rate_limit(RateLimitPolicy::per_minute(5))
            ),
            "ws:7:ep:monitor.export"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_window_does_not_panic() -> GovernanceResult<()> {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        let policy = RateLimitPolicy::new(3, Duration::MAX);
        let decision = limiter.check("id", &policy).await?;
        assert!(decision.allowed);
        assert!(decision.reset_at > Utc::now() + chrono::Duration::days(365));

        let degraded = RateLimiter::new(Arc::new(DownStore), "api", DependencyErrorPolicy::Allow)
            .check("id", &RateLimitPolicy::new(3, Duration::from_secs(u64::MAX)))
            .await?;
        assert_eq!(degraded.reset_at, DateTime::<Utc>::MAX_UTC);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_counts_down_then_rejects() -> GovernanceResult<()> {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        let policy = RateLimitPolicy::new(5, Duration::from_secs(60));

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = limiter.check("id", &policy).await?;
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let sixth = limiter.check("id", &policy).await?;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_after_expiry() -> GovernanceResult<()> {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        let policy = RateLimitPolicy::new(2, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.check("id", &policy).await?;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let fresh = limiter.check("id", &policy).await?;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_isolated() -> GovernanceResult<()> {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        let policy = RateLimitPolicy::new(1, Duration::from_secs(60));
        limiter.check("a", &policy).await?;
        assert!(!limiter.check("a", &policy).await?.allowed);
        assert!(limiter.check("b", &policy).await?.allowed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_at_within_window() -> GovernanceResult<()> {
        let limiter = limiter(DependencyErrorPolicy::Deny);
        let policy = RateLimitPolicy::per_minute(10);
        let before = Utc::now();
        let decision = limiter.check("id", &policy).await?;
        let horizon = before + chrono::Duration::seconds(61);
        assert!(decision.reset_at > before && decision.reset_at <= horizon);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_down_fail_closed() {
        let limiter = RateLimiter::new(Arc::new(DownStore), "api", DependencyErrorPolicy::Deny);
        let result = limiter.check("id", &RateLimitPolicy::per_minute(5)).await;
        assert!(matches!(
            result,
            Err(GovernanceError::DependencyUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_down_fail_open() -> GovernanceResult<()> {
        let limiter = RateLimiter::new(Arc::new(DownStore), "api", DependencyErrorPolicy::Allow);
        let decision = limiter.check("id", &RateLimitPolicy::per_minute(5)).await?;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, 5);
        Ok(())
    }
}
