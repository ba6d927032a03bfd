//! Tollgate Test Utilities
//!
//! Shared test infrastructure for the tollgate workspace:
//! - Mock collaborators with call counters (key verifier, counter store, event sink)
//! - A fully wired `Governance` fixture over those mocks
//! - Proptest generators for plan tiers and rate-limit policies

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub use tollgate_api::{
    EventError, EventSink, Governance, IdentityResolver, InMemoryWorkspaceDirectory, KeyVerifier,
    RateLimiter, RequestEvent, Verification, VerifyError,
};
pub use tollgate_core::{
    DependencyErrorPolicy, EndpointPolicy, ExecutionMode, PlanRateLimits, PlanTier,
    RateLimitPolicy, TenantIdentity, WorkspaceId,
};
pub use tollgate_storage::{
    CacheConfig, CounterStore, ExpiringCache, InMemoryCounterStore, StoreError, StoreResult,
    WindowCount,
};

// ============================================================================
// MOCK KEY VERIFIER
// ============================================================================

/// Key verifier backed by a fixed table of keys.
///
/// Unknown keys verify as invalid. `fail_with` makes every call fail until
/// cleared.
#[derive(Debug, Default)]
pub struct MockKeyVerifier {
    keys: Mutex<HashMap<String, Verification>>,
    failure: Mutex<Option<VerifyError>>,
    calls: AtomicUsize,
}

impl MockKeyVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(self, key: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.add_key(key, owner_id);
        self
    }

    pub fn add_key(&self, key: impl Into<String>, owner_id: impl Into<String>) {
        self.keys
            .lock()
            .insert(key.into(), Verification::valid(owner_id));
    }

    /// Answer every call with `error`; `None` restores normal behaviour.
    pub fn fail_with(&self, error: Option<VerifyError>) {
        *self.failure.lock() = error;
    }

    /// Number of verification calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyVerifier for MockKeyVerifier {
    async fn verify(&self, key: &str) -> Result<Verification, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        Ok(self
            .keys
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(Verification::invalid))
    }
}

// ============================================================================
// COUNTER STORES
// ============================================================================

/// Counter store wrapper counting window increments.
pub struct CountingCounterStore {
    inner: Arc<dyn CounterStore>,
    calls: AtomicUsize,
}

impl CountingCounterStore {
    pub fn new(inner: Arc<dyn CounterStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()))
    }

    /// Number of window increments attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for CountingCounterStore {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        self.inner.increment(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn increment_in_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.increment_in_window(key, window).await
    }
}

/// Counter store that is always unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCounterStore;

fn unreachable_store<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable {
        reason: "connection refused".to_string(),
    })
}

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn increment(&self, _key: &str) -> StoreResult<u64> {
        unreachable_store()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
        unreachable_store()
    }

    async fn ttl(&self, _key: &str) -> StoreResult<Option<Duration>> {
        unreachable_store()
    }
}

// ============================================================================
// RECORDING EVENT SINK
// ============================================================================

/// Event sink keeping every delivered event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RequestEvent>>,
    notify: Notify,
    failing: AtomicBool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events but report every delivery as failed.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().clone()
    }

    /// Wait until at least `count` events arrived or `timeout` elapsed, then
    /// return what has been recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<RequestEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.lock().len() >= count {
                break;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                break;
            }
        }
        self.events()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn track(&self, event: RequestEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        self.notify.notify_one();
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventError::Rejected { status: 500 });
        }
        Ok(())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Key owned by a workspace on the free plan.
pub const FREE_KEY: &str = "os_free_key";
/// Key owned by a workspace on the pro plan.
pub const PRO_KEY: &str = "os_pro_key";
/// Key owned by a workspace on the team plan.
pub const TEAM_KEY: &str = "os_team_key";

pub const FREE_WORKSPACE: &str = "ws_free";
pub const PRO_WORKSPACE: &str = "ws_pro";
pub const TEAM_WORKSPACE: &str = "ws_team";

/// `Governance` wired to mocks, with handles on every mock for assertions.
pub struct TestGovernance {
    pub governance: Governance,
    pub verifier: Arc<MockKeyVerifier>,
    pub directory: Arc<InMemoryWorkspaceDirectory>,
    pub store: Arc<CountingCounterStore>,
    pub sink: Arc<RecordingEventSink>,
}

impl TestGovernance {
    /// Production mode, healthy in-memory store, fail-closed, default budgets.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestGovernanceBuilder {
        TestGovernanceBuilder::default()
    }
}

impl Default for TestGovernance {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestGovernance`].
#[derive(Debug, Clone)]
pub struct TestGovernanceBuilder {
    mode: ExecutionMode,
    on_store_error: DependencyErrorPolicy,
    plan_limits: PlanRateLimits,
    store_down: bool,
    cache_ttl: Duration,
}

impl Default for TestGovernanceBuilder {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Production,
            on_store_error: DependencyErrorPolicy::Deny,
            plan_limits: PlanRateLimits::default(),
            store_down: false,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl TestGovernanceBuilder {
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn on_store_error(mut self, policy: DependencyErrorPolicy) -> Self {
        self.on_store_error = policy;
        self
    }

    pub fn plan_limit(mut self, plan: PlanTier, policy: RateLimitPolicy) -> Self {
        self.plan_limits.set(plan, policy);
        self
    }

    /// Back the limiter with a store that is always unreachable.
    pub fn store_down(mut self) -> Self {
        self.store_down = true;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> TestGovernance {
        let verifier = Arc::new(
            MockKeyVerifier::new()
                .with_key(FREE_KEY, FREE_WORKSPACE)
                .with_key(PRO_KEY, PRO_WORKSPACE)
                .with_key(TEAM_KEY, TEAM_WORKSPACE),
        );
        let directory = Arc::new(
            InMemoryWorkspaceDirectory::new()
                .with_workspace(FREE_WORKSPACE, PlanTier::Free)
                .with_workspace(PRO_WORKSPACE, PlanTier::Pro)
                .with_workspace(TEAM_WORKSPACE, PlanTier::Team),
        );
        let store = Arc::new(if self.store_down {
            CountingCounterStore::new(Arc::new(FailingCounterStore))
        } else {
            CountingCounterStore::in_memory()
        });
        let sink = Arc::new(RecordingEventSink::new());

        let resolver = IdentityResolver::new(
            self.mode,
            verifier.clone(),
            directory.clone(),
            ExpiringCache::new(CacheConfig::new().with_ttl(self.cache_ttl)),
            self.cache_ttl,
        );
        let limiter = RateLimiter::new(store.clone(), "test", self.on_store_error);
        let governance = Governance::builder(resolver, limiter)
            .plan_limits(self.plan_limits)
            .sink(sink.clone())
            .build();

        TestGovernance {
            governance,
            verifier,
            directory,
            store,
            sink,
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_plan_tier() -> impl Strategy<Value = PlanTier> {
        proptest::sample::select(PlanTier::ALL.to_vec())
    }

    pub fn arb_workspace_id() -> impl Strategy<Value = WorkspaceId> {
        "[a-z0-9_]{1,24}".prop_map(WorkspaceId::new)
    }

    pub fn arb_tenant() -> impl Strategy<Value = TenantIdentity> {
        (arb_workspace_id(), arb_plan_tier())
            .prop_map(|(id, plan)| TenantIdentity::new(id, plan))
    }

    /// Budgets of 1..=50 requests over windows of 1..=120 seconds.
    pub fn arb_rate_limit_policy() -> impl Strategy<Value = RateLimitPolicy> {
        (1u64..=50, 1u64..=120)
            .prop_map(|(limit, secs)| RateLimitPolicy::new(limit, Duration::from_secs(secs)))
    }
}
