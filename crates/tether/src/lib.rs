//! # tether - concurrency and lifecycle runtime
//!
//! Cooperatively-cancellable OS threads, blocking and spinning locks,
//! exactly-once initialization, thread-local slots with cleanup, and
//! priority-ordered teardown for lazily constructed singletons.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tether::{Runtime, RuntimeConfig, spawn, test_cancel, Singleton, Priority};
//!
//! fn main() -> tether::RuntimeResult<()> {
//!     let _runtime = Runtime::new(RuntimeConfig::default())?;
//!
//!     let worker = spawn(|| loop {
//!         test_cancel()?;
//!         // Do work...
//!     })?;
//!
//!     let registry = Singleton::<Registry>::instance_with_priority(Priority::HIGH)?;
//!     registry.announce();
//!
//!     worker.cancel()?;
//!     worker.join()
//!     // Runtime drop runs the finalization stack: Registry is dropped here
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        spawn(), test_cancel(), Singleton::instance()        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌─────────────┐     ┌─────────────┐
//!    │  Thread   │      │  Singleton  │     │ Finalization│
//!    │  Handle   │      │  Registry   │────▶│    Stack    │
//!    └───────────┘      └─────────────┘     └─────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │  Mutex / ConditionVariable   ThreadLocalSlot   SpinLock │
//!    │  OnceGuard                   AtomicCounter              │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use tether_core::{
    AtomicCounter,
    SpinLock,
    SpinLockGuard,
    OnceGuard,
    Deadline,
    ThreadId,
    ThreadState,
    ExitCause,
    Priority,
    Resource,
    SyncOp,
    RuntimeError,
    RuntimeResult,
};

// Re-export kprint macros for debug logging
pub use tether_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use tether_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled, set_time_enabled};

// Re-export env utilities
pub use tether_core::{env_get, env_get_bool, env_get_millis, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use tether_runtime::{
    RuntimeConfig,
    ConfigError,
    Mutex,
    MutexGuard,
    ConditionVariable,
    RawMutex,
    RawCondvar,
    ThreadLocalSlot,
    ThreadBuilder,
    ThreadHandle,
    FinalizationStack,
    SingletonRegistry,
    Singleton,
    ClassSingleton,
    ThreadSingleton,
    test_cancel,
    test_cancel_with,
    cancel_enabled,
    current_id,
    is_managed_thread,
    init,
    fini,
    config,
    is_initialized,
};

/// Runtime handle tying `init()` and `fini()` to a scope
///
/// Dropping the handle drains the finalization stack, so process-wide
/// singletons are torn down in priority order when it goes out of scope.
pub struct Runtime {
    finalized: bool,
}

impl Runtime {
    /// Initialize the runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        init(config)?;
        Ok(Self { finalized: false })
    }

    /// Run a function with the runtime active, then shutdown
    pub fn block_on<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let result = f();
        self.shutdown();
        result
    }

    /// Spawn a joinable thread
    pub fn spawn<F>(&self, f: F) -> RuntimeResult<ThreadHandle>
    where
        F: FnOnce() -> RuntimeResult<()> + Send + 'static,
    {
        spawn(f)
    }

    /// Drain the finalization stack now rather than on drop
    pub fn shutdown(&mut self) {
        if !self.finalized {
            self.finalized = true;
            fini();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a joinable thread with default settings
///
/// The entry routine returns `Err(RuntimeError::Cancelled)` (usually via
/// `test_cancel()?`) to acknowledge cancellation.
///
/// # Example
///
/// ```ignore
/// use tether::{spawn, test_cancel};
///
/// let handle = spawn(|| {
///     loop {
///         test_cancel()?;
///         // Do work...
///     }
/// })?;
/// handle.cancel()?;
/// ```
pub fn spawn<F>(f: F) -> RuntimeResult<ThreadHandle>
where
    F: FnOnce() -> RuntimeResult<()> + Send + 'static,
{
    ThreadHandle::spawn(f, false)
}

/// Spawn a thread that cleans up after itself
pub fn spawn_detached<F>(f: F) -> RuntimeResult<ThreadHandle>
where
    F: FnOnce() -> RuntimeResult<()> + Send + 'static,
{
    ThreadHandle::spawn_detached(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runtime_scope_finalizes_singletons() {
        static DROPPED: AtomicUsize = AtomicUsize::new(0);

        #[derive(Default)]
        struct Service;
        impl Drop for Service {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut runtime = Runtime::new(RuntimeConfig::new().embedded(true)).unwrap();
        assert!(is_initialized());
        assert!(config().embedded);

        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        runtime.block_on(|| {
            Singleton::<Service>::instance_with_priority(Priority::HIGH).unwrap();
            let worker = spawn(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                test_cancel()
            })
            .unwrap();
            worker.join().unwrap();
            assert_eq!(worker.exit_cause().unwrap(), ExitCause::Completed);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(DROPPED.load(Ordering::SeqCst), 1);
        assert!(matches!(
            Singleton::<Service>::instance_with_priority(Priority::HIGH),
            Err(RuntimeError::Finalized { .. })
        ));

        // Second init in the same process is refused
        assert!(matches!(Runtime::new(RuntimeConfig::new()), Err(RuntimeError::AlreadyInitialized)));
    }
}
