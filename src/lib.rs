//! # Propcache
//!
//! A nonce-invalidated LRU memoization cache for values that live in another
//! process: expensive to fetch, read far more often than they change, and
//! invalidated wholesale by bumping a shared scalar.
//!
//! Each [`PropertyCache`] is bound to one nonce key in a process-external
//! registry. Queries read the nonce on their hot path and compare it to the
//! last one they saw; a change flushes the entries before any lookup, so a
//! single registry write invalidates every bound cache in every process with
//! no broadcast or subscription machinery.
//!
//! ## Features
//!
//! - **Stale-free reads**: entries only persist while their nonce epoch holds
//! - **Lock-free nonce reads**: the registry slot is published once and read
//!   without any lock on the query fast path
//! - **No lock across fetches**: the user-supplied recompute/refresh closures
//!   run with all cache locks released
//! - **Corking**: reference-counted suppression of invalidations during
//!   mutation bursts, with one fresh nonce published on the final uncork
//! - **Kill switch**: a single registry write disables a key system-wide
//! - **Bounded LRU**: access-ordered entries with eldest-out eviction
//! - **Statistics**: hit/miss/bypass counters via the `stats` feature
//! - **Verification**: double-fetch consistency checking via the `verify`
//!   feature
//!
//! ## Module Organization
//!
//! - [`NonceRegistry`] - the process-external nonce registry contract and the
//!   in-process reference implementation
//! - [`NonceHandle`] - per-key lazy registry accessor
//! - [`PropertyCache`] - the per-instance cache and its query protocol
//! - [`InvalidationCoordinator`] - cork table and nonce publication
//!
//! ## Quick Start
//!
//! ```rust
//! use propcache::{cork, invalidate, uncork, PropertyCache};
//!
//! let cache = PropertyCache::builder(128, "vendor.widgets", |id: &u64| {
//!     // Typically an IPC round trip; any Ok(Some(..)) result is cached.
//!     Ok(Some(id.to_string()))
//! })
//! .build();
//!
//! // Start the first epoch; until a live nonce exists the cache bypasses.
//! invalidate("vendor.widgets");
//! assert_eq!(cache.query(&1).unwrap(), Some("1".to_string()));
//!
//! // A burst of writes on the authoritative side:
//! cork("vendor.widgets");
//! invalidate("vendor.widgets"); // suppressed
//! invalidate("vendor.widgets"); // suppressed
//! uncork("vendor.widgets");     // one fresh nonce published
//! ```

mod cache;
mod coordinator;
mod error;
mod handle;
mod lru;
mod nonce;
mod registry;

#[cfg(feature = "stats")]
mod stats;

pub use cache::{caches_enabled, set_caches_enabled, PropertyCache, PropertyCacheBuilder, Refresh};
pub use coordinator::{
    cork, disable_system_wide, invalidate, uncork, CorkGuard, InvalidationCoordinator,
};
pub use error::{BoxError, QueryError};
pub use handle::NonceHandle;
pub use nonce::{is_live, next_nonce, DISABLED, UNSET};
pub use registry::{InProcessRegistry, NonceRegistry, NonceSlot};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
