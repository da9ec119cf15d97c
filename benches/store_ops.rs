//! Benchmark suite for the store and the partitioned executor.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use heapcache::{pool::ThreadPool, OnHeapStore, PartitionedExecutor, StoreBuilder};
use std::{sync::Arc, time::Duration};

/// Puts into a store that is large enough to hold every entry.
fn put_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for size in [100u64, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let store: OnHeapStore<u64, String> = StoreBuilder::new(size).build();
                for i in 0..size {
                    store.put(black_box(i), black_box(format!("value-{i}")));
                }
            });
        });
    }
    group.finish();
}

/// Puts ten times more keys than the capacity, so that most puts evict.
fn put_with_eviction_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_with_eviction");

    for size in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(*size * 10));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let store: OnHeapStore<u64, u64> = StoreBuilder::new(size).build();
                for i in 0..size * 10 {
                    store.put(black_box(i), i);
                }
            });
        });
    }
    group.finish();
}

/// Reads from a pre-populated store.
fn get_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for size in [100u64, 1_000, 10_000].iter() {
        let store: OnHeapStore<u64, String> = StoreBuilder::new(*size).build();
        for i in 0..*size {
            store.put(i, format!("value-{i}"));
        }

        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let _ = store.get(&black_box(i));
                }
            });
        });
    }
    group.finish();
}

/// Half of the keys hit, the other half run the mapping function.
fn compute_if_absent_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_if_absent");

    for size in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(*size * 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let store: OnHeapStore<u64, u64> = StoreBuilder::new(size * 2).build();
                for i in 0..size {
                    store.put(i, i);
                }
                for i in 0..size * 2 {
                    let _ = store.compute_if_absent(black_box(i), |k| Some(*k * 2));
                }
            });
        });
    }
    group.finish();
}

/// Submits tasks over many keys and waits for all of them.
fn executor_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_submit");
    let pool = Arc::new(ThreadPool::new("bench-executor-{}", 4));

    for tasks in [1_000u64, 10_000].iter() {
        group.throughput(Throughput::Elements(*tasks));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), tasks, |b, &tasks| {
            b.iter(|| {
                let executor =
                    PartitionedExecutor::new(16, pool.clone()).expect("non-zero partitions");
                for i in 0..tasks {
                    let _ = executor.submit(&(i % 64), move || black_box(i) + 1);
                }
                executor.shutdown();
                assert!(executor.await_termination(Duration::from_secs(30)));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    put_benchmark,
    put_with_eviction_benchmark,
    get_benchmark,
    compute_if_absent_benchmark,
    executor_benchmark
);
criterion_main!(benches);
