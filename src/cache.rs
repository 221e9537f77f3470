//! The per-instance cache and its consistency protocol.

use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::coordinator::InvalidationCoordinator;
use crate::error::{BoxError, QueryError};
use crate::handle::NonceHandle;
use crate::lru::LruMap;
use crate::nonce::{is_live, DISABLED, UNSET};
#[cfg(feature = "stats")]
use crate::stats::CacheStats;

/// Process-wide enable switch. When off, every cache behaves as disabled.
static CACHES_ENABLED: AtomicBool = AtomicBool::new(true);

/// Turns all caches in this process on or off.
///
/// While off, every query bypasses its entry map and goes straight to
/// recompute. Primarily a test hook; production code wanting to turn a single
/// key off should use
/// [`disable_system_wide`](crate::disable_system_wide) instead.
pub fn set_caches_enabled(enabled: bool) {
    CACHES_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether caches in this process are enabled.
pub fn caches_enabled() -> bool {
    CACHES_ENABLED.load(Ordering::Relaxed)
}

/// Outcome of a refresh closure.
///
/// Cached values are plain data, so "returned the same object" is expressed
/// as a tag instead of pointer identity: `Keep` is the nothing-changed signal
/// that lets the hit path skip its second nonce read.
pub enum Refresh<R> {
    /// Keep the cached value as is; the query returns it.
    Keep,
    /// Replace the cached value; the query returns the replacement, subject
    /// to a nonce re-check against refreshes computed from stale data.
    Replace(R),
    /// Drop the entry; the query returns nothing.
    Evict,
}

type RecomputeFn<Q, R> = Box<dyn Fn(&Q) -> Result<Option<R>, BoxError> + Send + Sync>;
type RefreshFn<Q, R> = Box<dyn Fn(&R, &Q) -> Result<Refresh<R>, BoxError> + Send + Sync>;
#[cfg(feature = "verify")]
type CompareFn<R> = Box<dyn Fn(&R, &R) -> bool + Send + Sync>;
type QueryFmtFn<Q> = Box<dyn Fn(&Q) -> String + Send + Sync>;

struct Inner<Q, R> {
    entries: LruMap<Q, R>,
    last_seen_nonce: i64,
}

/// A nonce-invalidated memoization cache.
///
/// Each instance is bound to one nonce key and holds a bounded LRU of
/// query → result pairs, valid for exactly one nonce epoch. Queries read the
/// nonce on their hot path; whenever it differs from the last one seen, the
/// entries are flushed before any lookup. While the key holds a sentinel
/// (absent, corked, or disabled) the cache bypasses its entries entirely.
///
/// The instance lock is never held across the owner-supplied recompute or
/// refresh closures, so a slow fetch cannot block other queries on the same
/// cache.
///
/// # Examples
///
/// ```
/// use propcache::{InProcessRegistry, InvalidationCoordinator, PropertyCache};
/// use std::sync::Arc;
///
/// let registry = Arc::new(InProcessRegistry::new());
/// let coordinator = Arc::new(InvalidationCoordinator::new(registry));
///
/// let cache = PropertyCache::builder(64, "net.devices", |id: &u32| {
///     Ok(Some(format!("device-{id}")))
/// })
/// .coordinator(coordinator.clone())
/// .build();
///
/// // Publish the first live nonce so the cache starts retaining results.
/// coordinator.invalidate("net.devices");
///
/// assert_eq!(cache.query(&7).unwrap(), Some("device-7".to_string()));
/// assert_eq!(cache.query(&7).unwrap(), Some("device-7".to_string()));
///
/// // Producers of truth push a new nonce; the next query refetches.
/// cache.invalidate_cache();
/// assert_eq!(cache.query(&7).unwrap(), Some("device-7".to_string()));
/// ```
pub struct PropertyCache<Q, R> {
    cache_name: String,
    handle: NonceHandle,
    coordinator: Arc<InvalidationCoordinator>,
    inner: Mutex<Inner<Q, R>>,
    disabled: AtomicBool,
    recompute: RecomputeFn<Q, R>,
    refresh: Option<RefreshFn<Q, R>>,
    #[cfg(feature = "verify")]
    compare: CompareFn<R>,
    query_fmt: Option<QueryFmtFn<Q>>,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

impl<Q, R> PropertyCache<Q, R>
where
    Q: Eq + Hash + Clone + 'static,
    R: Clone + 'static,
{
    /// Starts building a cache holding at most `max_entries` results, bound
    /// to the nonce key `property_name`.
    ///
    /// `recompute` is the authoritative fetch: called on every miss and every
    /// bypassed query, without any cache lock held, and free to block. An
    /// `Ok(None)` result is returned to the caller but never cached.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is zero.
    pub fn builder<F>(
        max_entries: usize,
        property_name: impl Into<String>,
        recompute: F,
    ) -> PropertyCacheBuilder<Q, R>
    where
        F: Fn(&Q) -> Result<Option<R>, BoxError> + Send + Sync + 'static,
    {
        assert!(max_entries > 0, "max_entries must be positive");
        PropertyCacheBuilder {
            max_entries,
            property_name: property_name.into(),
            recompute: Box::new(recompute),
            refresh: None,
            #[cfg(feature = "verify")]
            compare: None,
            query_fmt: None,
            cache_name: None,
            coordinator: None,
        }
    }

    /// Looks up `query`, fetching through the recompute closure as needed.
    ///
    /// Returns `Ok(None)` when recompute declines to produce a value or a
    /// refresh evicts the entry; failures of either closure propagate
    /// unchanged and leave the cache as it was.
    pub fn query(&self, query: &Q) -> Result<Option<R>, QueryError> {
        let mut nonce = self.observed_nonce();

        loop {
            if !is_live(nonce) {
                // Bypass: no lookup, no insertion, no instance state touched.
                #[cfg(feature = "stats")]
                self.stats.record_bypass();
                return (self.recompute)(query).map_err(QueryError::Recompute);
            }

            let hit = {
                let mut inner = self.inner.lock();
                if inner.last_seen_nonce == nonce {
                    inner.entries.get(query)
                } else {
                    #[cfg(feature = "stats")]
                    if !inner.entries.is_empty() {
                        self.stats.record_clear();
                    }
                    debug!(
                        "{}: nonce changed ({} -> {}), flushing",
                        self.cache_name, inner.last_seen_nonce, nonce
                    );
                    inner.entries.clear();
                    inner.last_seen_nonce = nonce;
                    None
                }
            };

            match hit {
                Some(cached) => {
                    #[cfg(feature = "stats")]
                    self.stats.record_hit();

                    let outcome = match &self.refresh {
                        Some(refresh) => refresh(&cached, query).map_err(QueryError::Refresh)?,
                        None => Refresh::Keep,
                    };

                    if let Refresh::Keep = outcome {
                        return self.finish(nonce, query, Some(cached));
                    }

                    // The refresh produced something new; make sure it was
                    // not computed against a nonce that moved under us.
                    let observed = self.observed_nonce();
                    if observed != nonce {
                        nonce = observed;
                        continue;
                    }

                    let result = {
                        let mut inner = self.inner.lock();
                        let current_epoch = inner.last_seen_nonce == nonce;
                        match outcome {
                            Refresh::Replace(new) => {
                                if current_epoch {
                                    inner.entries.insert(query.clone(), new.clone());
                                }
                                Some(new)
                            }
                            Refresh::Evict => {
                                if current_epoch {
                                    inner.entries.remove(query);
                                }
                                None
                            }
                            Refresh::Keep => unreachable!(),
                        }
                    };
                    return self.finish(nonce, query, result);
                }
                None => {
                    #[cfg(feature = "stats")]
                    self.stats.record_miss();
                    trace!("{}: miss for {}", self.cache_name, self.describe(query));

                    let fetched = (self.recompute)(query).map_err(QueryError::Recompute)?;

                    {
                        let mut inner = self.inner.lock();
                        if inner.last_seen_nonce == nonce {
                            if let Some(value) = &fetched {
                                inner.entries.insert(query.clone(), value.clone());
                            }
                        }
                    }
                    return self.finish(nonce, query, fetched);
                }
            }
        }
    }

    /// Drops all entries. The last seen nonce and the local-disable flag are
    /// preserved.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Drops all entries and disables this instance in this process.
    ///
    /// Idempotent, and permanent for the lifetime of the instance: later
    /// invalidations re-enable other processes' caches but not this one.
    /// Does not publish `DISABLED` to the registry.
    pub fn disable_local(&self) {
        self.disabled.store(true, Ordering::Relaxed);
        self.inner.lock().entries.clear();
        warn!("{}: disabled locally", self.cache_name);
    }

    /// Whether this instance has been locally disabled.
    pub fn is_disabled_local(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Publishes a fresh nonce for this cache's key via its coordinator.
    pub fn invalidate_cache(&self) {
        self.coordinator.invalidate(self.handle.name());
    }

    /// Writes `DISABLED` for this cache's key via its coordinator.
    pub fn disable_system_wide(&self) {
        self.coordinator.disable_system_wide(self.handle.name());
    }

    /// The nonce key this cache is bound to.
    pub fn property_name(&self) -> &str {
        self.handle.name()
    }

    /// Number of currently cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Access counters for this cache.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The nonce this cache acts on right now: `DISABLED` when locally or
    /// process-wide disabled, otherwise whatever the registry holds.
    fn observed_nonce(&self) -> i64 {
        if self.disabled.load(Ordering::Relaxed) || !caches_enabled() {
            DISABLED
        } else {
            self.handle.read()
        }
    }

    fn describe(&self, query: &Q) -> String {
        match &self.query_fmt {
            Some(fmt) => fmt(query),
            None => String::from("<query>"),
        }
    }

    /// Re-checks a non-bypass result against a second authoritative fetch.
    ///
    /// A mismatch means a cache entry diverged from the source of truth
    /// within one epoch, which is a bug in the owner's recompute/refresh
    /// pair. A failed or empty verification fetch is tolerated so transient
    /// backend trouble does not take the process down.
    #[cfg(feature = "verify")]
    fn finish(&self, nonce: i64, query: &Q, value: Option<R>) -> Result<Option<R>, QueryError> {
        let check = match (self.recompute)(query) {
            Ok(check) => check,
            Err(_) => return Ok(value),
        };
        {
            let inner = self.inner.lock();
            if inner.last_seen_nonce != nonce {
                // The epoch moved; the proposed value is already doomed and
                // comparing it against the new epoch proves nothing.
                return Ok(value);
            }
        }
        let matches = match (&check, &value) {
            (None, _) => true,
            (Some(a), Some(b)) => (self.compare)(a, b),
            (Some(_), None) => false,
        };
        if !matches {
            panic!(
                "{}: verification mismatch for {}",
                self.cache_name,
                self.describe(query)
            );
        }
        Ok(value)
    }

    #[cfg(not(feature = "verify"))]
    #[inline]
    fn finish(&self, _nonce: i64, _query: &Q, value: Option<R>) -> Result<Option<R>, QueryError> {
        Ok(value)
    }
}

/// Builder for [`PropertyCache`]; created by [`PropertyCache::builder`].
pub struct PropertyCacheBuilder<Q, R> {
    max_entries: usize,
    property_name: String,
    recompute: RecomputeFn<Q, R>,
    refresh: Option<RefreshFn<Q, R>>,
    #[cfg(feature = "verify")]
    compare: Option<CompareFn<R>>,
    query_fmt: Option<QueryFmtFn<Q>>,
    cache_name: Option<String>,
    coordinator: Option<Arc<InvalidationCoordinator>>,
}

impl<Q, R> PropertyCacheBuilder<Q, R>
where
    Q: Eq + Hash + Clone + 'static,
    R: Clone + 'static,
{
    /// Installs an incremental refresh over cached hits.
    ///
    /// Called on every hit, without any cache lock held. Returning
    /// [`Refresh::Keep`] keeps the entry and skips the post-refresh nonce
    /// re-check; [`Refresh::Replace`] swaps the entry; [`Refresh::Evict`]
    /// removes it and the query returns nothing.
    pub fn refresh<F>(mut self, refresh: F) -> Self
    where
        F: Fn(&R, &Q) -> Result<Refresh<R>, BoxError> + Send + Sync + 'static,
    {
        self.refresh = Some(Box::new(refresh));
        self
    }

    /// Overrides the equivalence predicate used by verification builds.
    /// Defaults to `PartialEq`.
    #[cfg(feature = "verify")]
    pub fn debug_compare_results<F>(mut self, compare: F) -> Self
    where
        F: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        self.compare = Some(Box::new(compare));
        self
    }

    /// Installs a query formatter used in trace logging and verification
    /// failure reports.
    pub fn query_to_string<F>(mut self, fmt: F) -> Self
    where
        F: Fn(&Q) -> String + Send + Sync + 'static,
    {
        self.query_fmt = Some(Box::new(fmt));
        self
    }

    /// Names this cache in log output. Defaults to the property name.
    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    /// Routes this cache's invalidation surface through `coordinator`
    /// instead of the process-global one.
    pub fn coordinator(mut self, coordinator: Arc<InvalidationCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    #[cfg(feature = "verify")]
    pub fn build(self) -> PropertyCache<Q, R>
    where
        R: PartialEq,
    {
        let coordinator = self
            .coordinator
            .unwrap_or_else(|| InvalidationCoordinator::global().clone());
        let cache_name = self
            .cache_name
            .unwrap_or_else(|| self.property_name.clone());
        PropertyCache {
            cache_name,
            handle: NonceHandle::new(coordinator.registry().clone(), self.property_name),
            coordinator,
            inner: Mutex::new(Inner {
                entries: LruMap::new(self.max_entries),
                last_seen_nonce: UNSET,
            }),
            disabled: AtomicBool::new(false),
            recompute: self.recompute,
            refresh: self.refresh,
            compare: self
                .compare
                .unwrap_or_else(|| Box::new(|a: &R, b: &R| a == b)),
            query_fmt: self.query_fmt,
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        }
    }

    #[cfg(not(feature = "verify"))]
    pub fn build(self) -> PropertyCache<Q, R> {
        let coordinator = self
            .coordinator
            .unwrap_or_else(|| InvalidationCoordinator::global().clone());
        let cache_name = self
            .cache_name
            .unwrap_or_else(|| self.property_name.clone());
        PropertyCache {
            cache_name,
            handle: NonceHandle::new(coordinator.registry().clone(), self.property_name),
            coordinator,
            inner: Mutex::new(Inner {
                entries: LruMap::new(self.max_entries),
                last_seen_nonce: UNSET,
            }),
            disabled: AtomicBool::new(false),
            recompute: self.recompute,
            refresh: self.refresh,
            query_fmt: self.query_fmt,
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        }
    }
}
