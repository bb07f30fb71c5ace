//! Absolute deadlines for timed operations
//!
//! A deadline is computed once by the caller, so retry loops that poll it
//! never re-measure elapsed time.

use core::fmt;
use std::time::{Duration, Instant};

/// An absolute point in time after which a timed operation gives up.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never passes
    pub const NEVER: Deadline = Deadline(None);

    /// Deadline at a fixed instant
    #[inline]
    pub const fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    /// Deadline `timeout` from now
    ///
    /// Saturates to `NEVER` when the addition overflows the clock.
    #[inline]
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    /// Deadline `ms` milliseconds from now
    #[inline]
    pub fn from_millis(ms: u64) -> Self {
        Self::after(Duration::from_millis(ms))
    }

    /// The underlying instant, `None` for `NEVER`
    #[inline]
    pub const fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Has this point in time passed?
    #[inline]
    pub fn has_passed(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left until the deadline, zero once it has passed
    ///
    /// `Duration::MAX` for `NEVER`.
    #[inline]
    pub fn remaining(&self) -> Duration {
        match self.0 {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    /// Remaining time in whole milliseconds (saturating)
    #[inline]
    pub fn remaining_millis(&self) -> u64 {
        u64::try_from(self.remaining().as_millis()).unwrap_or(u64::MAX)
    }

    /// Is this the `NEVER` deadline?
    #[inline]
    pub const fn is_never(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Instant> for Deadline {
    fn from(instant: Instant) -> Self {
        Deadline::at(instant)
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "Deadline(in {:?})", self.remaining()),
            None => write!(f, "Deadline(NEVER)"),
        }
    }
}
