//! Stress test - lock contention and exactly-once initialization
//!
//! Hammers a shared counter through `SpinLock` and `Mutex` from many
//! threads and races them through one `OnceGuard`, checking the totals.
//!
//! Usage: `stress [threads] [iterations]`

use tether::{Runtime, RuntimeConfig, RuntimeResult};
use tether::{Mutex, OnceGuard, SpinLock, ThreadHandle, spawn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn run_all(threads: usize, body: impl Fn() -> RuntimeResult<()> + Send + Sync + 'static) -> RuntimeResult<Duration> {
    let body = Arc::new(body);
    let barrier = Arc::new(Barrier::new(threads));
    let start = Instant::now();

    let handles: Vec<ThreadHandle> = (0..threads)
        .map(|_| {
            let body = Arc::clone(&body);
            let barrier = Arc::clone(&barrier);
            spawn(move || {
                barrier.wait();
                body()
            })
        })
        .collect::<RuntimeResult<_>>()?;

    for h in &handles {
        h.join()?;
    }
    Ok(start.elapsed())
}

fn main() -> RuntimeResult<()> {
    println!("=== Tether Stress Test ===\n");

    let threads: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);
    let iterations: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let expected = threads as u64 * iterations;

    let _runtime = Runtime::new(RuntimeConfig::default())?;
    let mut failures = 0;

    // SpinLock
    let spin = Arc::new(SpinLock::new(0u64));
    let s = Arc::clone(&spin);
    let elapsed = run_all(threads, move || {
        for _ in 0..iterations {
            *s.lock() += 1;
        }
        Ok(())
    })?;
    let got = *spin.lock();
    println!("SpinLock: {} / {} in {:?}", got, expected, elapsed);
    if got != expected {
        failures += 1;
    }

    // Mutex
    let mutex = Arc::new(Mutex::new(0u64)?);
    let m = Arc::clone(&mutex);
    let elapsed = run_all(threads, move || {
        for _ in 0..iterations {
            *m.lock()? += 1;
        }
        Ok(())
    })?;
    let got = *mutex.lock()?;
    println!("Mutex:    {} / {} in {:?}", got, expected, elapsed);
    if got != expected {
        failures += 1;
    }

    // OnceGuard
    let once = Arc::new(OnceGuard::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));
    let (o, r, seen) = (Arc::clone(&once), Arc::clone(&runs), Arc::clone(&observed));
    let elapsed = run_all(threads, move || {
        o.run(|| {
            std::thread::sleep(Duration::from_millis(5));
            r.fetch_add(1, Ordering::SeqCst);
        });
        // run() never returns before the payload finished
        if r.load(Ordering::SeqCst) == 1 {
            seen.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    })?;
    let (runs, observed) = (runs.load(Ordering::SeqCst), observed.load(Ordering::SeqCst));
    println!("Once:     {} run(s), {} / {} callers saw it in {:?}", runs, observed, threads, elapsed);
    if runs != 1 || observed != threads {
        failures += 1;
    }

    println!();
    if failures > 0 {
        eprintln!("FAILED: {} check(s)", failures);
        std::process::exit(1);
    }
    println!("=== All checks passed ===");
    Ok(())
}
