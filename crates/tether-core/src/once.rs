//! Exactly-once initialization gate
//!
//! `OnceGuard` is const-constructible so it can sit in a `static`. The first
//! caller to bump `started` from -1 to 0 runs the payload; everyone else
//! yields the CPU until the winner publishes completion.
//!
//! State only moves forward: not-started -> running -> done. If the payload
//! panics the guard is poisoned instead of done, and every waiter (and every
//! later caller) panics rather than yielding forever.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use crate::atomic::AtomicCounter;

const PENDING: u8 = 0;
const DONE: u8 = 1;
const POISONED: u8 = 2;

/// Gate that runs a payload exactly once across all threads
pub struct OnceGuard {
    started: AtomicCounter,
    done: AtomicU8,
}

impl OnceGuard {
    /// Create a gate in the not-started state
    pub const fn new() -> Self {
        Self {
            started: AtomicCounter::new(-1),
            done: AtomicU8::new(PENDING),
        }
    }

    /// Run `payload` if no thread has run it yet
    ///
    /// No call returns before the payload has fully completed, whichever
    /// thread ran it.
    ///
    /// # Panics
    ///
    /// Panics if the payload panicked (here or on another thread).
    pub fn run<F: FnOnce()>(&self, payload: F) {
        if self.is_done() {
            return;
        }

        if !self.started.increment_and_test() {
            let poison = PoisonOnUnwind { once: self };
            payload();
            core::mem::forget(poison);
            self.done.store(DONE, Ordering::Release);
            return;
        }

        loop {
            match self.done.load(Ordering::Acquire) {
                DONE => return,
                POISONED => panic!("OnceGuard payload panicked"),
                _ => std::thread::yield_now(),
            }
        }
    }

    /// Has the payload completed?
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire) == DONE
    }

    /// Did the payload panic?
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.done.load(Ordering::Acquire) == POISONED
    }
}

impl Default for OnceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OnceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.done.load(Ordering::Acquire) {
            DONE => "done",
            POISONED => "poisoned",
            _ if self.started.get() >= 0 => "running",
            _ => "not-started",
        };
        f.debug_struct("OnceGuard").field("state", &state).finish()
    }
}

/// Marks the gate poisoned if the payload unwinds
struct PoisonOnUnwind<'a> {
    once: &'a OnceGuard,
}

impl Drop for PoisonOnUnwind<'_> {
    fn drop(&mut self) {
        self.once.done.store(POISONED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_once_sequential() {
        let once = OnceGuard::new();
        let mut count = 0;
        once.run(|| count += 1);
        once.run(|| count += 1);
        assert_eq!(count, 1);
        assert!(once.is_done());
    }

    #[test]
    fn test_exactly_once_concurrent() {
        static ONCE: OnceGuard = OnceGuard::new();
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = vec![];

        for _ in 0..threads {
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                ONCE.run(|| {
                    // Widen the window so losers really wait
                    thread::sleep(Duration::from_millis(20));
                    RUNS.fetch_add(1, Ordering::SeqCst);
                });
                // Nobody may return before the payload's effect is visible
                assert_eq!(RUNS.load(Ordering::SeqCst), 1);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_payload_poisons() {
        let once = Arc::new(OnceGuard::new());

        let winner = Arc::clone(&once);
        let result = thread::spawn(move || winner.run(|| panic!("boom"))).join();
        assert!(result.is_err());
        assert!(once.is_poisoned());
        assert!(!once.is_done());

        let later = Arc::clone(&once);
        let result = thread::spawn(move || later.run(|| {})).join();
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_state() {
        let once = OnceGuard::new();
        assert!(format!("{:?}", once).contains("not-started"));
        once.run(|| {});
        assert!(format!("{:?}", once).contains("done"));
    }
}
