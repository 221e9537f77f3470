use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use propcache::{InProcessRegistry, InvalidationCoordinator, NonceRegistry, PropertyCache};
use std::hint::black_box;
use std::sync::Arc;

fn build_cache(
    max_entries: usize,
) -> (
    Arc<InProcessRegistry>,
    Arc<InvalidationCoordinator>,
    PropertyCache<u64, u64>,
) {
    let registry = Arc::new(InProcessRegistry::new());
    let coordinator = Arc::new(InvalidationCoordinator::new(registry.clone()));
    let cache = PropertyCache::builder(max_entries, "bench.key", |q: &u64| Ok(Some(q * 3)))
        .coordinator(coordinator.clone())
        .build();
    (registry, coordinator, cache)
}

fn bench_query_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_hit");

    for size in [16, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (registry, _coordinator, cache) = build_cache(size);
            registry.set("bench.key", "7");
            for q in 0..size as u64 {
                cache.query(&q).unwrap();
            }

            let mut q = 0u64;
            b.iter(|| {
                q = (q + 1) % size as u64;
                black_box(cache.query(&q).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_query_bypass(c: &mut Criterion) {
    // No live nonce: every query goes straight to recompute.
    let (_registry, _coordinator, cache) = build_cache(16);

    c.bench_function("query_bypass", |b| {
        b.iter(|| black_box(cache.query(&1).unwrap()))
    });
}

fn bench_query_miss_with_eviction(c: &mut Criterion) {
    let (registry, _coordinator, cache) = build_cache(16);
    registry.set("bench.key", "7");

    c.bench_function("query_miss_evicting", |b| {
        let mut q = 0u64;
        b.iter(|| {
            // Strictly increasing keys: always a miss, always an eviction
            // once the map is full.
            q += 1;
            black_box(cache.query(&q).unwrap())
        });
    });
}

fn bench_invalidate(c: &mut Criterion) {
    let (_registry, coordinator, cache) = build_cache(16);
    coordinator.invalidate("bench.key");
    cache.query(&1).unwrap();

    c.bench_function("invalidate", |b| {
        b.iter(|| coordinator.invalidate(black_box("bench.key")))
    });
}

criterion_group!(
    benches,
    bench_query_hit,
    bench_query_bypass,
    bench_query_miss_with_eviction,
    bench_invalidate
);
criterion_main!(benches);
