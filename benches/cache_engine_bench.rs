// Cache Engine Performance Benchmarks
// Measures the hot store/get paths and a mixed workload under the
// single-mutex engine design.

use criterion::{criterion_group, criterion_main, Criterion};
use rusty_cache::{SlabCache, StoreOperation, SystemServer};
use std::hint::black_box;
use std::sync::Arc;

fn create_engine(config: &str) -> SlabCache {
    let server = Arc::new(SystemServer::new());
    SlabCache::create(rusty_cache::ENGINE_INTERFACE_VERSION, Some(config), server)
        .expect("engine creation")
}

fn set_item(engine: &SlabCache, key: &[u8], value: &[u8]) {
    let handle = engine.allocate(key, value.len(), 0, 0).unwrap();
    engine.write_value(&handle, value).unwrap();
    engine.store(&handle, StoreOperation::Set).unwrap();
    engine.release(handle);
}

fn bench_set(c: &mut Criterion) {
    let engine = create_engine("cache_size=64m");
    let value = vec![b'x'; 98].into_iter().chain(*b"\r\n").collect::<Vec<u8>>();
    let mut i = 0u64;

    c.bench_function("set_100b_values", |b| {
        b.iter(|| {
            let key = format!("bench-set-{}", i % 4096);
            i += 1;
            set_item(&engine, black_box(key.as_bytes()), black_box(&value));
        });
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let engine = create_engine("cache_size=64m");
    for i in 0..4096u64 {
        let key = format!("bench-get-{i}");
        set_item(&engine, key.as_bytes(), b"payload-payload-payload\r\n");
    }
    let mut i = 0u64;

    c.bench_function("get_hit", |b| {
        b.iter(|| {
            let key = format!("bench-get-{}", i % 4096);
            i += 1;
            let handle = engine.get(black_box(key.as_bytes())).unwrap();
            black_box(engine.value(&handle));
            engine.release(handle);
        });
    });
}

fn bench_mixed_with_eviction(c: &mut Criterion) {
    // small budget keeps the eviction path on the hot set
    let engine = create_engine("cache_size=2m;chunk_size=96;factor=2.0");
    let value = vec![b'v'; 62].into_iter().chain(*b"\r\n").collect::<Vec<u8>>();
    let mut i = 0u64;

    c.bench_function("mixed_set_get_evicting", |b| {
        b.iter(|| {
            let key = format!("bench-mix-{i}");
            i += 1;
            set_item(&engine, key.as_bytes(), &value);
            if i % 4 == 0 {
                let probe = format!("bench-mix-{}", i - 1);
                if let Ok(handle) = engine.get(probe.as_bytes()) {
                    black_box(engine.value(&handle));
                    engine.release(handle);
                }
            }
        });
    });
}

criterion_group!(benches, bench_set, bench_get_hit, bench_mixed_with_eviction);
criterion_main!(benches);
