//! Error types for the tether runtime

use core::fmt;
use crate::state::Priority;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Cooperative cancellation signal raised by `test_cancel`
    ///
    /// Entry routines must propagate this (usually with `?`), never swallow it.
    Cancelled,

    /// A scoped acquire missed its deadline
    TimedOut,

    /// The OS refused to create a thread or sync primitive
    ResourceExhausted {
        resource: Resource,
        code: i32,
    },

    /// An OS synchronization call failed unexpectedly
    Threading {
        op: SyncOp,
        code: i32,
    },

    /// One singleton type referenced with two different destroy priorities
    Consistency {
        type_name: &'static str,
        registered: Priority,
        requested: Priority,
    },

    /// Singleton referenced after its finalization hook destroyed it
    Finalized {
        type_name: &'static str,
    },

    /// `init()` called more than once
    AlreadyInitialized,

    /// `init()` rejected the configuration
    InvalidConfig(&'static str),

    /// Application failure returned from a thread entry routine
    Failed(String),
}

impl RuntimeError {
    /// Build an application failure
    pub fn failed(msg: impl Into<String>) -> Self {
        RuntimeError::Failed(msg.into())
    }

    /// Is this the cancellation signal?
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled)
    }

    /// Raw OS error code, if this error came from the OS
    pub fn os_code(&self) -> Option<i32> {
        match self {
            RuntimeError::ResourceExhausted { code, .. } | RuntimeError::Threading { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Cancelled => write!(f, "thread cancelled"),
            RuntimeError::TimedOut => write!(f, "operation timed out"),
            RuntimeError::ResourceExhausted { resource, code } => {
                write!(f, "cannot create {}: os error {}", resource, code)
            }
            RuntimeError::Threading { op, code } => {
                write!(f, "{} failed: os error {}", op, code)
            }
            RuntimeError::Consistency { type_name, registered, requested } => write!(
                f,
                "singleton {} registered with destroy priority {} but requested with {}",
                type_name, registered, requested
            ),
            RuntimeError::Finalized { type_name } => {
                write!(f, "singleton {} already finalized", type_name)
            }
            RuntimeError::AlreadyInitialized => write!(f, "runtime already initialized"),
            RuntimeError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            RuntimeError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// OS objects the runtime creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Thread,
    Mutex,
    Condvar,
    TlsKey,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Thread => write!(f, "thread"),
            Resource::Mutex => write!(f, "mutex"),
            Resource::Condvar => write!(f, "condition variable"),
            Resource::TlsKey => write!(f, "thread-local key"),
        }
    }
}

/// OS synchronization calls that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Lock,
    TryLock,
    Unlock,
    Wait,
    TimedWait,
    Signal,
    Broadcast,
    Join,
    Spawn,
    SetSpecific,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOp::Lock => "mutex lock",
            SyncOp::TryLock => "mutex try-lock",
            SyncOp::Unlock => "mutex unlock",
            SyncOp::Wait => "condvar wait",
            SyncOp::TimedWait => "condvar timed wait",
            SyncOp::Signal => "condvar signal",
            SyncOp::Broadcast => "condvar broadcast",
            SyncOp::Join => "thread join",
            SyncOp::Spawn => "thread spawn",
            SyncOp::SetSpecific => "thread-local set",
        };
        f.write_str(name)
    }
}
