//! Cork, uncork, disable, and the global coordinator surface.

#![cfg(not(feature = "verify"))]

use propcache::{
    caches_enabled, set_caches_enabled, InProcessRegistry, InvalidationCoordinator, NonceRegistry,
    PropertyCache, DISABLED, UNSET,
};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn setup() -> (Arc<InProcessRegistry>, Arc<InvalidationCoordinator>) {
    let registry = Arc::new(InProcessRegistry::new());
    let coordinator = Arc::new(InvalidationCoordinator::new(registry.clone()));
    (registry, coordinator)
}

fn counting_cache(
    coordinator: Arc<InvalidationCoordinator>,
    key: &str,
) -> (PropertyCache<u32, String>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_recompute = calls.clone();
    let cache = PropertyCache::builder(4, key, move |q: &u32| {
        calls_in_recompute.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("v{q}")))
    })
    .coordinator(coordinator)
    .build();
    (cache, calls)
}

#[test]
fn test_disable_system_wide_kills_caching() {
    let (registry, coordinator) = setup();
    registry.set("k", "7");
    let (cache, calls) = counting_cache(coordinator.clone(), "k");

    cache.query(&1).unwrap();
    coordinator.disable_system_wide("k");

    for i in 0..3 {
        assert_eq!(cache.query(&2).unwrap(), Some("v2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2 + i);
    }

    // Invalidation cannot resurrect a disabled key.
    coordinator.invalidate("k");
    assert_eq!(registry.get_long("k", UNSET), DISABLED);
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_cork_burst_suppresses_invalidations() {
    let (registry, coordinator) = setup();
    coordinator.invalidate("k");
    let before = registry.get_long("k", UNSET);

    let (cache_a, calls_a) = counting_cache(coordinator.clone(), "k");
    let (cache_b, calls_b) = counting_cache(coordinator.clone(), "k");
    cache_a.query(&1).unwrap();
    cache_b.query(&1).unwrap();
    assert_eq!(cache_a.len(), 1);
    assert_eq!(cache_b.len(), 1);

    coordinator.cork("k");
    assert_eq!(registry.get_long("k", UNSET), UNSET);

    for _ in 0..100 {
        coordinator.invalidate("k");
    }
    assert_eq!(registry.get_long("k", UNSET), UNSET);

    // Both caches bypass while corked; their entries are left alone.
    cache_a.query(&1).unwrap();
    cache_b.query(&1).unwrap();
    assert_eq!(calls_a.load(Ordering::SeqCst), 2);
    assert_eq!(calls_b.load(Ordering::SeqCst), 2);
    assert_eq!(cache_a.len(), 1);

    coordinator.uncork("k");
    let after = registry.get_long("k", UNSET);
    assert!(propcache::is_live(after));
    assert_ne!(after, before);

    // The fresh epoch flushes and refetches.
    cache_a.query(&1).unwrap();
    assert_eq!(calls_a.load(Ordering::SeqCst), 3);
    assert_eq!(cache_a.len(), 1);
}

#[test]
fn test_cork_guard_releases_on_drop() {
    let (registry, coordinator) = setup();
    coordinator.invalidate("k");

    {
        let _cork = coordinator.cork_guard("k");
        assert_eq!(registry.get_long("k", UNSET), UNSET);
        coordinator.invalidate("k");
        assert_eq!(registry.get_long("k", UNSET), UNSET);
    }
    assert!(propcache::is_live(registry.get_long("k", UNSET)));
}

#[test]
fn test_disable_local_is_idempotent_and_permanent() {
    let (registry, coordinator) = setup();
    registry.set("k", "7");
    let (cache, calls) = counting_cache(coordinator.clone(), "k");
    let (other, other_calls) = counting_cache(coordinator.clone(), "k");

    cache.query(&1).unwrap();
    assert!(!cache.is_disabled_local());

    cache.disable_local();
    cache.disable_local();
    assert!(cache.is_disabled_local());
    assert!(cache.is_empty());

    // Disabled instance recomputes every time.
    cache.query(&1).unwrap();
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());

    // Invalidation does not re-enable it, but instances that were not
    // locally disabled keep caching under the new epoch.
    coordinator.invalidate("k");
    cache.query(&1).unwrap();
    assert!(cache.is_empty());

    other.query(&1).unwrap();
    other.query(&1).unwrap();
    assert_eq!(other_calls.load(Ordering::SeqCst), 2);
    assert_eq!(other.len(), 1);
}

#[test]
fn test_instance_invalidate_delegates_to_coordinator() {
    let (registry, coordinator) = setup();
    registry.set("k", "7");
    let (cache, calls) = counting_cache(coordinator, "k");

    cache.query(&1).unwrap();
    cache.invalidate_cache();
    assert_ne!(registry.get_long("k", UNSET), 7);

    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_instance_disable_system_wide() {
    let (registry, coordinator) = setup();
    registry.set("k", "7");
    let (cache, _calls) = counting_cache(coordinator, "k");

    cache.disable_system_wide();
    assert_eq!(registry.get_long("k", UNSET), DISABLED);
    assert!(!cache.is_disabled_local());
}

#[test]
#[serial(process_globals)]
fn test_global_coordinator_surface() {
    let key = "invalidation_tests.global";
    let (cache, calls) = {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_recompute = calls.clone();
        let cache = PropertyCache::builder(4, key, move |q: &u32| {
            calls_in_recompute.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("v{q}")))
        })
        .build();
        (cache, calls)
    };

    propcache::invalidate(key);
    cache.query(&1).unwrap();
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    propcache::cork(key);
    assert_eq!(InProcessRegistry::global().get_long(key, UNSET), UNSET);
    propcache::invalidate(key);
    assert_eq!(InProcessRegistry::global().get_long(key, UNSET), UNSET);
    propcache::uncork(key);

    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    propcache::disable_system_wide(key);
    assert_eq!(InProcessRegistry::global().get_long(key, UNSET), DISABLED);
}

#[test]
#[serial(process_globals)]
fn test_process_enable_switch() {
    let key = "invalidation_tests.enable_switch";
    let (registry, coordinator) = setup();
    registry.set(key, "7");
    let (cache, calls) = counting_cache(coordinator, key);

    assert!(caches_enabled());
    cache.query(&1).unwrap();
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    set_caches_enabled(false);
    // Behaves as disabled: bypass, entries untouched.
    cache.query(&1).unwrap();
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cache.len(), 1);

    set_caches_enabled(true);
    cache.query(&1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
