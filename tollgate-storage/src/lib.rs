//! Tollgate Storage - Expiring Cache and Counter Stores
//!
//! Holds the two pieces of state the governance pipeline keeps between
//! requests: a process-local expiring cache for resolved identities, and the
//! shared counter stores backing fixed-window rate limiting.

pub mod cache;
pub mod counter;

pub use cache::{CacheConfig, CacheStats, ExpiringCache};
pub use counter::{
    CounterStore, InMemoryCounterStore, RestCounterStore, RestStoreConfig, StoreError,
    StoreResult, WindowCount,
};
