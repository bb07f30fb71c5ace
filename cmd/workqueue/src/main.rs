//! Work queue example
//!
//! A producer feeds jobs through a `Mutex` + `ConditionVariable` queue to a
//! pool of workers. Workers wait with a deadline so they reach a
//! `test_cancel()` checkpoint at the top of every loop, which is how a
//! listener or connection loop stays cancellable while blocked.
//!
//! Usage: `workqueue [workers] [jobs]`

use tether::{Runtime, RuntimeConfig, RuntimeResult, Deadline, ExitCause};
use tether::{ConditionVariable, Mutex, ThreadBuilder, ThreadHandle, test_cancel};
use tether::{kinfo, kdebug, kwarn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a worker sleeps on the queue before re-checking cancellation
const POLL: Duration = Duration::from_millis(20);

struct Queue {
    jobs: VecDeque<u64>,
    closed: bool,
}

fn worker(id: usize, queue: Arc<ConditionVariable<Queue>>, sum: Arc<AtomicU64>) -> RuntimeResult<()> {
    let mut done = 0u64;
    loop {
        test_cancel()?;

        let job = {
            let mut guard = queue.lock()?;
            let ready = queue.wait_for_until(&mut guard, Deadline::after(POLL), |q| {
                !q.jobs.is_empty() || q.closed
            })?;
            if !ready {
                continue;
            }
            match guard.jobs.pop_front() {
                Some(job) => job,
                None => break, // closed and drained
            }
        };

        sum.fetch_add(job * job, Ordering::Relaxed);
        done += 1;
    }
    kdebug!("[worker {}] processed {} jobs", id, done);
    Ok(())
}

fn main() -> RuntimeResult<()> {
    println!("=== Tether Work Queue ===\n");

    let num_workers: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);
    let num_jobs: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    let _runtime = Runtime::new(RuntimeConfig::default().thread_name_prefix("wq"))?;

    let queue = Arc::new(ConditionVariable::new(Arc::new(Mutex::new(Queue {
        jobs: VecDeque::new(),
        closed: false,
    })?))?);
    let sum = Arc::new(AtomicU64::new(0));

    let workers: Vec<ThreadHandle> = (0..num_workers)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let sum = Arc::clone(&sum);
            ThreadBuilder::new()
                .name(format!("wq-worker-{}", i))
                .spawn(move || worker(i, queue, sum))
        })
        .collect::<RuntimeResult<_>>()?;

    kinfo!("{} workers started, producing {} jobs", num_workers, num_jobs);
    let start = Instant::now();

    for job in 1..=num_jobs {
        let mut guard = queue.lock()?;
        guard.jobs.push_back(job);
        queue.signal()?;
    }
    {
        let mut guard = queue.lock()?;
        guard.closed = true;
        queue.broadcast()?;
    }

    // Give workers a bounded time to drain, then cancel stragglers
    for w in &workers {
        if !w.join_until(Deadline::after(Duration::from_secs(10)))? {
            kwarn!("{} still busy; cancelling", w.name());
            w.cancel()?;
            w.join()?;
        }
    }
    let elapsed = start.elapsed();

    let expected: u64 = (1..=num_jobs).map(|j| j * j).sum();
    let completed = workers
        .iter()
        .filter(|w| matches!(w.exit_cause(), Ok(ExitCause::Completed)))
        .count();

    println!("\n=== Results ===");
    println!("Workers completed: {}/{}", completed, num_workers);
    println!("Sum of squares:    {} (expected {})", sum.load(Ordering::SeqCst), expected);
    println!("Time:              {:?}", elapsed);
    println!("Throughput:        {:.0} jobs/sec", num_jobs as f64 / elapsed.as_secs_f64());

    if sum.load(Ordering::SeqCst) != expected {
        eprintln!("ERROR: sum mismatch");
        std::process::exit(1);
    }
    println!("\n=== Done ===");
    Ok(())
}
