//! In-process counter store.

use super::{CounterStore, StoreResult, WindowCount};
use crate::cache::deadline_after;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Map size at which writes first trigger a purge of expired counters.
const MIN_PURGE_THRESHOLD: usize = 1024;

/// Counter store backed by a `DashMap`, scoped to one process.
///
/// Expired counters behave as absent. Writes purge them once the map reaches
/// a threshold, and the threshold is then reset to twice the live count, so
/// the map stays within `max(1024, 2 * live)` entries plus one write.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, Counter>,
    purge_threshold: AtomicUsize,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self {
            counters: DashMap::new(),
            purge_threshold: AtomicUsize::new(MIN_PURGE_THRESHOLD),
        }
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a write has released its shard lock.
    fn maybe_purge(&self) {
        if self.counters.len() < self.purge_threshold.load(Ordering::Relaxed) {
            return;
        }
        let dropped = self.purge_expired();
        let next = (self.counters.len() * 2).max(MIN_PURGE_THRESHOLD);
        self.purge_threshold.store(next, Ordering::Relaxed);
        tracing::debug!(dropped, next_threshold = next, "Purged expired counters");
    }

    /// Remove expired counters. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before - self.counters.len()
    }

    /// Number of counters held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Counter {
                count: 0,
                expires_at: None,
            };
        }
        entry.count += 1;
        let count = entry.count;
        drop(entry);
        self.maybe_purge();
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.expires_at = Some(deadline_after(Instant::now(), ttl));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .and_then(|counter| counter.ttl(now)))
    }

    /// Single-lock version: increment and expiry move together under the
    /// shard lock, so a counter never exists without its window deadline.
    async fn increment_in_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }
        if entry.expires_at.is_none() {
            entry.expires_at = Some(deadline_after(now, window));
        }
        entry.count += 1;
        let counted = WindowCount {
            count: entry.count,
            ttl: entry.ttl(now),
        };
        drop(entry);
        self.maybe_purge();
        Ok(counted)
    }
}
