//! Lock and once-gate micro-benchmarks
//!
//! - Uncontended acquire/release: SpinLock vs Mutex
//! - Two-thread contention on a shared counter
//! - OnceGuard fast path after completion

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tether_core::{AtomicCounter, OnceGuard, SpinLock};
use tether_runtime::Mutex;

// =============================================================================
// UNCONTENDED
// =============================================================================

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    group.bench_function("atomic_counter", |b| {
        let counter = AtomicCounter::new(0);
        b.iter(|| {
            black_box(counter.increment_and_test());
            black_box(counter.decrement_and_test());
        })
    });

    group.bench_function("spinlock", |b| {
        let lock = SpinLock::new(0u64);
        b.iter(|| *lock.lock() += 1)
    });

    group.bench_function("mutex", |b| {
        let mutex = Mutex::new(0u64).unwrap();
        b.iter(|| *mutex.lock().unwrap() += 1)
    });

    group.finish();
}

// =============================================================================
// CONTENDED
// =============================================================================

const OPS_PER_THREAD: u64 = 10_000;

fn hammer<L, F>(lock: Arc<L>, threads: usize, op: F)
where
    L: Send + Sync + 'static,
    F: Fn(&L) + Send + Sync + Copy + 'static,
{
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..OPS_PER_THREAD {
                    op(&lock);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");

    for threads in [2usize, 4] {
        group.throughput(Throughput::Elements(OPS_PER_THREAD * threads as u64));

        group.bench_with_input(BenchmarkId::new("spinlock", threads), &threads, |b, &n| {
            b.iter(|| hammer(Arc::new(SpinLock::new(0u64)), n, |l| *l.lock() += 1))
        });

        group.bench_with_input(BenchmarkId::new("mutex", threads), &threads, |b, &n| {
            b.iter(|| hammer(Arc::new(Mutex::new(0u64).unwrap()), n, |l| *l.lock().unwrap() += 1))
        });
    }

    group.finish();
}

// =============================================================================
// ONCE
// =============================================================================

fn bench_once(c: &mut Criterion) {
    let mut group = c.benchmark_group("once");

    group.bench_function("done_fast_path", |b| {
        let once = OnceGuard::new();
        once.run(|| {});
        b.iter(|| once.run(|| black_box(())))
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended, bench_once);
criterion_main!(benches);
