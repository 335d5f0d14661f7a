//! Throughput Benchmark for stashkv
//!
//! Measures the durable store directly (no socket) under a few workloads.
//! Every put is a committed write transaction, so numbers are bounded by
//! the disk rather than by the lock.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use stashkv::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Arc<Store> {
    Arc::new(
        Store::open(dir.path().join("bench.redb"), "cache", Duration::from_secs(900))
            .expect("open bench store"),
    )
}

/// Benchmark put operations
fn bench_put(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i);
            store.put(&key, b"small_value", Duration::ZERO).unwrap();
            i += 1;
        });
    });

    group.bench_function("put_large", |b| {
        let mut i = 0u64;
        let value = vec![b'x'; 64 * 1024]; // 64KB value
        b.iter(|| {
            let key = format!("key:{}", i);
            store.put(&key, &value, Duration::ZERO).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark get operations
fn bench_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for i in 0..10_000 {
        let key = format!("key:{}", i);
        store
            .put(&key, format!("value:{}", i).as_bytes(), Duration::ZERO)
            .unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            let _ = black_box(store.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            let _ = black_box(store.get(&key));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent readers while one thread writes
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    for i in 0..1_000 {
        store
            .put(&format!("key:{}", i), b"value", Duration::ZERO)
            .unwrap();
    }

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_readers_1_writer", |b| {
        b.iter(|| {
            let mut handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..1_000 {
                            let _ = store.get(&format!("key:{}", (i + t * 250) % 1_000));
                        }
                    })
                })
                .collect();

            let writer = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    writer
                        .put(&format!("key:{}", i), b"updated", Duration::ZERO)
                        .unwrap();
                }
            }));

            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_concurrent);

criterion_main!(benches);
