//! Basic tether example
//!
//! Spawns cancellable workers, builds a few singletons, and shows the
//! finalization order when the runtime shuts down.
//!
//! # Environment Variables
//!
//! - `TETHER_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `TETHER_LOG_FLUSH=1` - Flush log output immediately
//! - `TETHER_THREAD_NAME_PREFIX=demo` - Prefix for spawned thread names

use tether::{Runtime, RuntimeConfig, RuntimeResult, Priority, ExitCause};
use tether::{spawn, spawn_detached, test_cancel, test_cancel_with, cancel_enabled, current_id};
use tether::{Singleton, ClassSingleton, ThreadSingleton};
use tether::{kinfo, kdebug};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Metrics {
    events: AtomicUsize,
}

impl Drop for Metrics {
    fn drop(&mut self) {
        println!("  [finalize] Metrics (HIGH) - {} events", self.events.load(Ordering::SeqCst));
    }
}

#[derive(Default)]
struct Settings;

impl Drop for Settings {
    fn drop(&mut self) {
        println!("  [finalize] Settings (DEFAULT)");
    }
}

#[derive(Default)]
struct Journal;

impl Drop for Journal {
    fn drop(&mut self) {
        println!("  [finalize] Journal (LOW)");
    }
}

/// Owner type for a private counter
struct Parser;

// TETHER_LOG_LEVEL=debug cargo run -p tether-basic
fn main() -> RuntimeResult<()> {
    println!("=== Tether Basic Example ===\n");

    let config = RuntimeConfig::default();
    let mut runtime = Runtime::new(config)?;

    let completed = Arc::new(AtomicUsize::new(0));

    runtime.block_on(|| -> RuntimeResult<()> {
        // Singletons are built on first use; Journal first to show that
        // teardown follows priority, not construction order
        Singleton::<Journal>::instance_with_priority(Priority::LOW)?;
        let metrics = Singleton::<Metrics>::instance_with_priority(Priority::HIGH)?;
        Singleton::<Settings>::instance()?;

        kinfo!("Spawning workers...");

        // Workers that finish on their own
        let mut handles = Vec::new();
        for i in 1..=3 {
            let c = Arc::clone(&completed);
            let m = Arc::clone(&metrics);
            handles.push(spawn(move || {
                kdebug!("[worker {}] started as {}", i, current_id());
                let seen = ThreadSingleton::<Cell<u32>>::with(|n| {
                    n.set(n.get() + i);
                    n.get()
                })?;
                m.events.fetch_add(seen as usize, Ordering::SeqCst);
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?);
        }

        // A worker that loops until cancelled
        let m = Arc::clone(&metrics);
        let looper = spawn(move || loop {
            test_cancel_with(|| kdebug!("[looper] cleaning up"))?;
            m.events.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
        })?;

        // A worker that masks cancellation for a critical section
        let shielded = spawn(|| {
            let previous = cancel_enabled(false);
            std::thread::sleep(Duration::from_millis(30));
            cancel_enabled(previous);
            test_cancel()
        })?;

        // Detached worker: nobody joins it
        spawn_detached(|| {
            kdebug!("[detached] running");
            Ok(())
        })?;

        let parser_hits = ClassSingleton::<Parser, AtomicUsize>::instance()?;
        parser_hits.fetch_add(1, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(25));
        looper.cancel()?;
        shielded.cancel()?;

        for h in &handles {
            h.join()?;
        }
        looper.join()?;
        shielded.join()?;

        println!("Looper exit cause:   {}", looper.exit_cause()?);
        println!("Shielded exit cause: {}", shielded.exit_cause()?);
        assert_eq!(looper.exit_cause()?, ExitCause::Cancelled);
        Ok(())
    })?;

    println!("\n=== Results ===");
    println!("Completed workers: {}", completed.load(Ordering::SeqCst));
    println!("\n=== Done ===");
    Ok(())
}
