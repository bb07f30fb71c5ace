//! Busy-wait spinlock built on `AtomicCounter`
//!
//! The counter starts at `UNLOCKED` (-1). An increment that lands exactly on
//! zero takes the lock; any other increment found a holder and is undone
//! immediately. Release is a plain decrement.
//!
//! There is no backoff and no yield inside the loop. Use this only for
//! critical sections of a handful of instructions (list splices, map
//! lookups); anything that may block belongs under `Mutex`.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use crate::atomic::AtomicCounter;
use crate::deadline::Deadline;

const UNLOCKED: isize = -1;

/// A spinlock protecting a value of type `T`
pub struct SpinLock<T> {
    counter: AtomicCounter,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new, unlocked spinlock containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            counter: AtomicCounter::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    /// One acquisition attempt
    #[inline]
    fn attempt(&self) -> bool {
        if self.counter.increment_and_test() {
            // Someone else holds it: undo our increment
            self.counter.decrement_and_test();
            false
        } else {
            true
        }
    }

    /// Acquire the lock, spinning until it's available
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while !self.attempt() {
            core::hint::spin_loop();
        }
        SpinLockGuard::new(self)
    }

    /// Acquire the lock unless `deadline` passes first
    ///
    /// The deadline is checked only after a failed attempt, so an
    /// uncontended lock is always taken even with an expired deadline.
    #[inline]
    pub fn lock_until(&self, deadline: Deadline) -> Option<SpinLockGuard<'_, T>> {
        loop {
            if self.attempt() {
                return Some(SpinLockGuard::new(self));
            }
            if deadline.has_passed() {
                return None;
            }
            core::hint::spin_loop();
        }
    }

    /// Try to acquire the lock without spinning
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.attempt() {
            Some(SpinLockGuard::new(self))
        } else {
            None
        }
    }

    /// Check if the lock is currently held
    ///
    /// Contenders transiently bump the counter, so this may report `true`
    /// for an instant after the holder released.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.counter.get() != UNLOCKED
    }

    /// Mutable access through an exclusive borrow, no locking needed
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the lock and return the inner value
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
///
/// Sharing the guard between threads shares `&T`, so that needs `T: Sync`:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use tether_core::SpinLock;
///
/// fn assert_sync<T: Sync>(_: &T) {}
/// let lock = SpinLock::new(Cell::new(0u32));
/// assert_sync(&lock.lock());
/// ```
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _marker: PhantomData<*const ()>,
}

// Safety: moving the guard moves `&mut T` access; the counter does not
// care which thread releases it
unsafe impl<T: Send> Send for SpinLockGuard<'_, T> {}
// Safety: a shared guard only hands out `&T`
unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

impl<'a, T> SpinLockGuard<'a, T> {
    #[inline]
    fn new(lock: &'a SpinLock<T>) -> Self {
        Self { lock, _marker: PhantomData }
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.counter.decrement_and_test();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_guard_thread_bounds() {
        assert_send::<SpinLockGuard<'static, u64>>();
        assert_sync::<SpinLockGuard<'static, u64>>();
        // Cell<u32> is Send but not Sync: the guard may move, not be shared
        assert_send::<SpinLockGuard<'static, std::cell::Cell<u32>>>();
    }

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard = 42;
        }
        {
            let guard = lock.lock();
            assert_eq!(*guard, 42);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_spinlock_try_lock() {
        let lock = SpinLock::new(0u32);

        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.is_locked());

        // While held, try_lock should fail and leave the counter balanced
        assert!(lock.try_lock().is_none());
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_lock_until_expires() {
        let lock = SpinLock::new(());
        let _held = lock.lock();

        let deadline = Deadline::after(Duration::from_millis(20));
        assert!(lock.lock_until(deadline).is_none());
        assert!(deadline.has_passed());
    }

    #[test]
    fn test_lock_until_uncontended_past_deadline() {
        let lock = SpinLock::new(7);
        let expired = Deadline::after(Duration::ZERO);
        let guard = lock.lock_until(expired).expect("free lock must be taken");
        assert_eq!(*guard, 7);
    }

    #[test]
    fn test_spinlock_mutual_exclusion() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = vec![];

        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    let mut guard = lock.lock();
                    // Split read and write so a broken lock loses updates
                    let v = *guard;
                    *guard = v + 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 20_000);
    }

    #[test]
    fn test_into_inner() {
        let mut lock = SpinLock::new(vec![1, 2]);
        lock.get_mut().push(3);
        assert_eq!(lock.into_inner(), vec![1, 2, 3]);
    }
}
