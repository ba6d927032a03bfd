//! Process-local cache with per-entry time-to-live.
//!
//! Entries are evicted by a single periodic sweep over an ordered expiry
//! index rather than one timer per key, so a long tail of keys that are
//! written once and never read again does not accumulate timers or memory.
//!
//! Reads also compare the entry deadline against the clock, so an entry is
//! reported absent the instant its TTL elapses even if the sweeper has not
//! run yet. Reads never extend an entry's lifetime.
//!
//! # Example
//!
//! ```ignore
//! let cache: ExpiringCache<TenantIdentity> = ExpiringCache::new(CacheConfig::default());
//! cache.set("key_abc", identity, Some(Duration::from_secs(60)));
//! assert!(cache.has("key_abc"));
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Longest lifetime any deadline is allowed to reach.
///
/// Larger TTLs are clamped so that `Instant` arithmetic cannot overflow.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + ttl`, with `ttl` clamped to [`MAX_TTL`].
pub(crate) fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_TTL);
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

/// Configuration for an [`ExpiringCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one.
    pub default_ttl: Duration,
    /// How often the background sweeper drops expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because their TTL elapsed.
    pub evictions: u64,
    /// Live entries at the time of the snapshot.
    pub entries: usize,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot<V> {
    value: V,
    deadline: Instant,
    generation: u64,
}

struct CacheState<V> {
    entries: HashMap<String, Slot<V>>,
    /// Deadline-ordered index; the generation disambiguates equal deadlines.
    expiry_index: BTreeMap<(Instant, u64), String>,
    next_generation: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expiry_index: BTreeMap::new(),
            next_generation: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.expiry_index.remove(&(slot.deadline, slot.generation));
        Some(slot)
    }

    /// Drop every entry whose deadline is at or before `now`.
    fn evict_expired(&mut self, now: Instant) -> u64 {
        let mut evicted = 0;
        while let Some(entry) = self.expiry_index.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

struct Shared<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> Shared<V> {
    fn sweep(&self, now: Instant) -> u64 {
        let evicted = self.state.lock().evict_expired(now);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::trace!(evicted, "expiring cache sweep");
        }
        evicted
    }
}

/// Concurrent key/value cache where every entry carries its own TTL.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct ExpiringCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for ExpiringCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("config", &self.shared.config)
            .field("entries", &self.shared.state.lock().entries.len())
            .finish()
    }
}

impl<V> ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and, when called inside a tokio runtime, start its sweeper.
    ///
    /// The sweeper holds a weak reference and exits once every handle is dropped.
    pub fn new(config: CacheConfig) -> Self {
        let cache = Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(CacheState::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        };
        cache.spawn_sweeper();
        cache
    }

    fn spawn_sweeper(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no tokio runtime, expiring cache relies on write-time sweeps");
            return;
        };

        let weak: Weak<Shared<V>> = Arc::downgrade(&self.shared);
        let period = self
            .shared
            .config
            .sweep_interval
            .clamp(Duration::from_millis(1), MAX_TTL);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.sweep(Instant::now());
            }
        });
    }

    /// Insert or replace `key`, returning the stored value.
    ///
    /// Any pending expiry for a previous value under `key` is discarded and a
    /// new one is scheduled for `ttl` (or the configured default) from now.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> V {
        let key = key.into();
        let now = Instant::now();
        let deadline = deadline_after(now, ttl.unwrap_or(self.shared.config.default_ttl));

        let mut state = self.shared.state.lock();
        let evicted = state.evict_expired(now);
        state.remove(&key);

        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);
        state.expiry_index.insert((deadline, generation), key.clone());
        state.entries.insert(
            key,
            Slot {
                value: value.clone(),
                deadline,
                generation,
            },
        );
        drop(state);

        if evicted > 0 {
            self.shared.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        value
    }

    /// Current value under `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let value = {
            let state = self.shared.state.lock();
            state
                .entries
                .get(key)
                .filter(|slot| slot.deadline > now)
                .map(|slot| slot.value.clone())
        };

        let counter = if value.is_some() {
            &self.shared.hits
        } else {
            &self.shared.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Whether an unexpired entry exists under `key`.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shared
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|slot| slot.deadline > now)
    }

    /// Remove `key` and its pending expiry. Returns whether a live entry existed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shared
            .state
            .lock()
            .remove(key)
            .is_some_and(|slot| slot.deadline > now)
    }

    /// Remove every entry and every pending expiry.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.entries.clear();
        state.expiry_index.clear();
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn sweep_expired(&self) -> u64 {
        self.shared.sweep(Instant::now())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shared
            .state
            .lock()
            .entries
            .values()
            .filter(|slot| slot.deadline > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Entries physically held, including expired ones the sweeper has not reached.
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.shared.state.lock().entries.len()
    }
}
