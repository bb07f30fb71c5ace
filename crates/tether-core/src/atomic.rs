//! Single-word atomic counter
//!
//! The building block for `SpinLock` and `OnceGuard`. Both operations are a
//! single indivisible read-modify-write; nothing else is synchronized.

use core::fmt;
use core::sync::atomic::{AtomicIsize, Ordering};

/// Machine-word counter mutated only through increment/decrement-and-test.
pub struct AtomicCounter {
    value: AtomicIsize,
}

impl AtomicCounter {
    /// Create a counter with an application-defined starting value
    #[inline]
    pub const fn new(initial: isize) -> Self {
        Self {
            value: AtomicIsize::new(initial),
        }
    }

    /// Add one; returns `true` iff the result is non-zero
    #[inline]
    pub fn increment_and_test(&self) -> bool {
        self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1) != 0
    }

    /// Subtract one; returns `true` iff the result is non-zero
    #[inline]
    pub fn decrement_and_test(&self) -> bool {
        self.value.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1) != 0
    }

    /// Current value (a snapshot, stale as soon as it is read)
    #[inline]
    pub fn get(&self) -> isize {
        self.value.load(Ordering::Acquire)
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCounter").field(&self.get()).finish()
    }
}
