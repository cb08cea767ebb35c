// Cache engine throughput benchmarks.
// Covers alloc/get hit-path cost and eviction-under-pressure behavior,
// standing in for the original's benchmark/cc_membench.c.

use ccache_core::clock::SystemClock;
use ccache_core::config::Config;
use ccache_core::engine::Engine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn engine_with(maxbytes: u64) -> Engine<SystemClock> {
    let mut cfg = Config::scenario_default();
    cfg.maxbytes = maxbytes;
    Engine::new(cfg).unwrap()
}

fn bench_set_get_small_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_get_small_value");

    let mut e = engine_with(8 * 1024 * 1024);
    let value = vec![b'x'; 64];

    group.bench_function("set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key-{i}");
            e.set(black_box(key.as_bytes()), black_box(&value), 0);
            i += 1;
        });
    });

    e.set(b"hot", &value, 0);
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(e.get(black_box(b"hot"))));
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(e.get(black_box(b"nope"))));
    });

    group.finish();
}

fn bench_chained_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("chained_value");
    let mut e = engine_with(8 * 1024 * 1024);
    let value = vec![b'y'; 3000];

    group.bench_function("set_chained", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("chain-{i}");
            e.set(black_box(key.as_bytes()), black_box(&value), 0);
            i += 1;
        });
    });

    e.set(b"chain-hot", &value, 0);
    group.bench_function("get_chained", |b| {
        b.iter(|| black_box(e.get(black_box(b"chain-hot"))));
    });

    group.finish();
}

fn bench_eviction_under_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_under_pressure");
    let value = vec![b'z'; 1000];

    // A small heap (8 slabs worth) forces every Nth set to evict.
    for heap_slabs in [8u64, 32] {
        group.bench_with_input(
            BenchmarkId::from_parameter(heap_slabs),
            &heap_slabs,
            |b, &heap_slabs| {
                let mut e = engine_with(heap_slabs * 1056);
                b.iter(|| {
                    for i in 0..256u32 {
                        let key = format!("evict-{i}");
                        e.set(black_box(key.as_bytes()), black_box(&value), 0);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set_get_small_value,
    bench_chained_value,
    bench_eviction_under_pressure
);
criterion_main!(benches);
