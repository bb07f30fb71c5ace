//! # tether-runtime
//!
//! OS-backed half of the tether lifecycle runtime.
//!
//! This crate provides:
//! - Blocking mutex and condition variable (pthread)
//! - Per-thread value slots with destructors run at thread exit
//! - Cooperatively-cancellable threads with join and detach
//! - The process-wide finalization stack
//! - Process-wide, class-scoped and thread-local singletons
//! - Runtime configuration and `init()` / `fini()`

pub mod config;
pub mod sync;
pub mod tls_slot;
pub mod tls;
pub mod thread;
pub mod finalize;
pub mod singleton;
pub mod lifecycle;

// Re-exports
pub use config::{ConfigError, RuntimeConfig};
pub use sync::{ConditionVariable, Mutex, MutexGuard, RawCondvar, RawMutex};
pub use tls_slot::ThreadLocalSlot;
pub use tls::{current_id, is_managed_thread};
pub use thread::{cancel_enabled, test_cancel, test_cancel_with, ThreadBuilder, ThreadHandle};
pub use finalize::FinalizationStack;
pub use singleton::{ClassSingleton, Singleton, SingletonRegistry, ThreadSingleton};
pub use lifecycle::{config, fini, init, is_initialized};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos",
                 target_os = "ios", target_os = "freebsd", target_os = "netbsd",
                 target_os = "openbsd", target_os = "dragonfly"))] {
        /// Name of the threading backend in use
        pub const PLATFORM: &str = "pthread";
    } else {
        compile_error!("Unsupported platform");
    }
}
