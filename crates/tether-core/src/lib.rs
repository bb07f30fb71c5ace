//! # tether-core
//!
//! Platform-agnostic primitives for the tether lifecycle runtime.
//!
//! Nothing here talks to the OS beyond `std::thread::yield_now`; blocking
//! locks, threads and thread-local keys live in `tether-runtime`.
//!
//! ## Modules
//!
//! - `atomic` - Single-word increment/decrement-and-test counter
//! - `spinlock` - Pure-spin lock built on the counter
//! - `once` - Exactly-once initialization gate
//! - `deadline` - Absolute deadlines for timed operations
//! - `state` - Thread lifecycle state, exit cause, destroy priority
//! - `id` - Thread identifier type
//! - `error` - Error types
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod atomic;
pub mod spinlock;
pub mod once;
pub mod deadline;
pub mod state;
pub mod id;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use atomic::AtomicCounter;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use once::OnceGuard;
pub use deadline::Deadline;
pub use state::{ExitCause, Priority, ThreadState};
pub use id::ThreadId;
pub use error::{Resource, RuntimeError, RuntimeResult, SyncOp};
pub use env::{env_get, env_get_bool, env_get_millis, env_get_opt, env_get_str, env_is_set};
