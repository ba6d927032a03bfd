//! Shared counting stores for fixed-window rate limiting.
//!
//! A [`CounterStore`] provides the three primitives the rate limiter needs:
//! atomic increment, expiry, and time-to-live lookup. Counters are shared by
//! every process that points at the same store.
//!
//! - [`InMemoryCounterStore`]: single-process store, also used in tests
//! - [`RestCounterStore`]: Redis over the Upstash-compatible REST protocol

mod memory;
mod rest;

pub use memory::InMemoryCounterStore;
pub use rest::{RestCounterStore, RestStoreConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a counter store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, timeout, DNS).
    #[error("Counter store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store answered, but not with something we understand.
    #[error("Counter store protocol error: {reason}")]
    Protocol { reason: String },
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Counter value and remaining lifetime after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Remaining lifetime of the window, `None` if the key has no expiry.
    pub ttl: Option<Duration>,
}

/// Atomic counter store shared across processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at zero first if absent.
    async fn increment(&self, key: &str) -> StoreResult<u64>;

    /// Set `key` to expire after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Remaining lifetime of `key`, `None` if it is missing or never expires.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Count one hit in the window keyed by `key`.
    ///
    /// The expiry is set only on the 0 → 1 transition so a window's length is
    /// fixed when it opens. This default runs the two steps separately; two
    /// concurrent first hits may both set the same expiry, which is harmless.
    /// Stores with an atomic primitive override it.
    async fn increment_in_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        let ttl = self.ttl(key).await?;
        Ok(WindowCount { count, ttl })
    }
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for std::sync::Arc<T> {
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        (**self).increment(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        (**self).expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        (**self).ttl(key).await
    }

    async fn increment_in_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        (**self).increment_in_window(key, window).await
    }
}
