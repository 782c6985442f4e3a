//! Comparison benchmarks: lock-free map vs mutex-wrapped std HashMap.
//!
//! Four workload mixes over a shared key space, at several thread counts.
//! Both maps see identical seeded op streams.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use karst_map::LockFreeMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

const OPS_PER_THREAD: usize = 10_000;
const KEY_SPACE: u64 = 1_000;
const BUCKETS: usize = 1_024;
const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

fn run_lock_free(threads: usize, read_pct: u32) {
    let map = Arc::new(LockFreeMap::with_buckets(BUCKETS).unwrap());
    for key in 0..KEY_SPACE {
        map.insert(key, key).unwrap();
    }
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..OPS_PER_THREAD {
                    let key = rng.random_range(0..KEY_SPACE);
                    if rng.random_range(0..100) < read_pct {
                        black_box(map.get(&key).unwrap());
                    } else {
                        map.insert(key, black_box(key)).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn run_mutex(threads: usize, read_pct: u32) {
    let map = Arc::new(Mutex::new(HashMap::new()));
    for key in 0..KEY_SPACE {
        map.lock().unwrap().insert(key, key);
    }
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..OPS_PER_THREAD {
                    let key = rng.random_range(0..KEY_SPACE);
                    if rng.random_range(0..100) < read_pct {
                        black_box(map.lock().unwrap().get(&key).copied());
                    } else {
                        map.lock().unwrap().insert(key, black_box(key));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn bench_workload(c: &mut Criterion, name: &str, read_pct: u32) {
    let mut group = c.benchmark_group(name);
    for &threads in THREAD_COUNTS {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(
            BenchmarkId::new("karst-map", threads),
            &threads,
            |b, &threads| b.iter(|| run_lock_free(threads, read_pct)),
        );
        group.bench_with_input(
            BenchmarkId::new("mutex-std", threads),
            &threads,
            |b, &threads| b.iter(|| run_mutex(threads, read_pct)),
        );
    }
    group.finish();
}

fn bench_insert_only(c: &mut Criterion) {
    bench_workload(c, "insert_only", 0);
}

fn bench_read_only(c: &mut Criterion) {
    bench_workload(c, "read_only", 100);
}

fn bench_mixed_50_50(c: &mut Criterion) {
    bench_workload(c, "mixed_50_50", 50);
}

fn bench_read_heavy_80_20(c: &mut Criterion) {
    bench_workload(c, "read_heavy_80_20", 80);
}

criterion_group!(
    benches,
    bench_insert_only,
    bench_read_only,
    bench_mixed_50_50,
    bench_read_heavy_80_20
);
criterion_main!(benches);
