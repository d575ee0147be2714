//! Tree engine benchmarks.
//!
//! Measures the operations that dominate index workloads: ordered and
//! shuffled inserts, hot-cache point reads, and cold reads that lazy-load
//! their path from the record store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use marbletree::{I64Codec, MemoryRecordStore, PersistentTree, StringCodec, TreeConfig};

fn bench_config() -> TreeConfig {
    TreeConfig {
        node_page_size: 128,
        entry_points_size: 16,
        optimize_threshold: 0,
        ..TreeConfig::default()
    }
}

fn new_tree() -> PersistentTree<i64, String> {
    PersistentTree::create(
        Arc::new(MemoryRecordStore::new()),
        bench_config(),
        Arc::new(I64Codec),
        Arc::new(StringCodec),
    )
    .unwrap()
}

fn shuffled(count: i64) -> Vec<i64> {
    let mut keys: Vec<i64> = (0..count).collect();
    let mut state = 0x9E3779B97F4A7C15u64;
    for i in (1..keys.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        keys.swap(i, j);
    }
    keys
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_insert");

    for count in [1_000i64, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| {
                let tree = new_tree();
                for key in 0..count {
                    tree.put(key, format!("value{:08}", key)).unwrap();
                }
                black_box(tree.size())
            });
        });

        group.bench_with_input(BenchmarkId::new("shuffled", count), &count, |b, &count| {
            let keys = shuffled(count);
            b.iter(|| {
                let tree = new_tree();
                for key in &keys {
                    tree.put(*key, format!("value{:08}", key)).unwrap();
                }
                black_box(tree.size())
            });
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_get");

    let tree = new_tree();
    for key in 0..10_000i64 {
        tree.put(key, format!("value{:08}", key)).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("hot_cache", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = (key + 4_001) % 10_000;
            black_box(tree.get(&key).unwrap())
        });
    });

    tree.flush().unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    let cold_tree = {
        let seeded = PersistentTree::create(
            store.clone(),
            bench_config(),
            Arc::new(I64Codec),
            Arc::new(StringCodec),
        )
        .unwrap();
        for key in 0..10_000i64 {
            seeded.put(key, format!("value{:08}", key)).unwrap();
        }
        seeded.flush().unwrap();
        let rid = seeded.descriptor_rid().unwrap();
        drop(seeded);
        PersistentTree::<i64, String>::open(
            store,
            bench_config(),
            rid,
            Arc::new(I64Codec),
            Arc::new(StringCodec),
        )
        .unwrap()
    };

    group.bench_function("cold_then_warm", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = (key + 4_001) % 10_000;
            black_box(cold_tree.get(&key).unwrap())
        });
    });

    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_mixed");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("put_get_remove", |b| {
        b.iter(|| {
            let tree = new_tree();
            for key in 0..1_000i64 {
                tree.put(key, format!("v{}", key)).unwrap();
            }
            for key in (0..1_000i64).step_by(3) {
                tree.remove(&key).unwrap();
            }
            let mut hits = 0u32;
            for key in 0..1_000i64 {
                if tree.get(&key).unwrap().is_some() {
                    hits += 1;
                }
            }
            black_box(hits)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_get, bench_mixed);
criterion_main!(benches);
