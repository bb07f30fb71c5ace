//! Thread lifecycle state and destroy-priority types

use core::fmt;

/// Lifecycle state of a spawned thread's context
///
/// Moves only forward, except that `CancelPending` may be set any time
/// before `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Context allocated, OS thread not yet running the entry routine
    Initializing = 0,

    /// Entry routine is executing
    Running = 1,

    /// `cancel()` was requested; observed at the next `test_cancel`
    CancelPending = 2,

    /// Entry routine finished; the exit cause is final
    Exited = 3,
}

impl ThreadState {
    /// Has the thread left its entry routine?
    #[inline]
    pub const fn is_exited(&self) -> bool {
        matches!(self, ThreadState::Exited)
    }

    /// Is the thread alive and executing user code?
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(self, ThreadState::Running | ThreadState::CancelPending)
    }
}

impl From<u8> for ThreadState {
    fn from(v: u8) -> Self {
        match v {
            0 => ThreadState::Initializing,
            1 => ThreadState::Running,
            2 => ThreadState::CancelPending,
            _ => ThreadState::Exited,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadState::Initializing => write!(f, "initializing"),
            ThreadState::Running => write!(f, "running"),
            ThreadState::CancelPending => write!(f, "cancel-pending"),
            ThreadState::Exited => write!(f, "exited"),
        }
    }
}

/// Why a thread left its entry routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCause {
    /// Still running (or never started)
    #[default]
    None,

    /// Entry routine returned normally
    Completed,

    /// Cancellation signal unwound out of the entry routine
    Cancelled,

    /// An error or panic escaped the entry routine
    UncaughtError,
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::None => write!(f, "none"),
            ExitCause::Completed => write!(f, "completed"),
            ExitCause::Cancelled => write!(f, "cancelled"),
            ExitCause::UncaughtError => write!(f, "uncaught error"),
        }
    }
}

/// Destroy priority for finalization hooks and process-wide singletons
///
/// Higher values are finalized first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Torn down before everything at default priority
    pub const HIGH: Priority = Priority(1000);

    /// Priority used when none is given
    pub const DEFAULT: Priority = Priority(0);

    /// Torn down after everything at default priority
    pub const LOW: Priority = Priority(-1000);

    /// Raw ordering key
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(v: i32) -> Self {
        Priority(v)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::HIGH => write!(f, "HIGH"),
            Priority::DEFAULT => write!(f, "DEFAULT"),
            Priority::LOW => write!(f, "LOW"),
            Priority(v) => write!(f, "{}", v),
        }
    }
}
