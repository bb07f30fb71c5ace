//! Blocking synchronization: mutex and condition variable
//!
//! `RawMutex`/`RawCondvar` are thin OS handles with the acquire/release and
//! wait/signal contract. `Mutex<T>` puts data behind a `RawMutex` and hands
//! out RAII guards; `ConditionVariable<T>` is bound to exactly one
//! `Arc<Mutex<T>>` at construction and refuses guards of any other mutex.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use std::sync::Arc;
use tether_core::{kerror, Deadline, Resource, RuntimeError, RuntimeResult, SyncOp};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod pthread;
        pub use pthread::{RawCondvar, RawMutex};
    } else {
        compile_error!("Unsupported platform");
    }
}

#[inline]
pub(crate) fn check_create(code: i32, resource: Resource) -> RuntimeResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(RuntimeError::ResourceExhausted { resource, code })
    }
}

#[inline]
pub(crate) fn check_op(code: i32, op: SyncOp) -> RuntimeResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(RuntimeError::Threading { op, code })
    }
}

/// Error text with the OS code spelled out, for log lines
pub(crate) fn describe(err: &RuntimeError) -> String {
    match err.os_code() {
        Some(code) => format!("{} ({})", err, nix::errno::Errno::from_raw(code)),
        None => err.to_string(),
    }
}

/// A blocking mutex protecting a value of type `T`
///
/// # Example
///
/// ```ignore
/// let queue = Mutex::new(VecDeque::new())?;
/// queue.lock()?.push_back(job);
/// ```
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// Safety: Mutex provides exclusive access to T
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new mutex containing the given value
    pub fn new(value: T) -> RuntimeResult<Self> {
        Ok(Self {
            raw: RawMutex::new()?,
            data: UnsafeCell::new(value),
        })
    }

    /// Block until the lock is ours
    pub fn lock(&self) -> RuntimeResult<MutexGuard<'_, T>> {
        self.raw.acquire()?;
        Ok(MutexGuard::new(self))
    }

    /// Take the lock only if it is free
    pub fn try_lock(&self) -> RuntimeResult<Option<MutexGuard<'_, T>>> {
        Ok(self.raw.try_acquire()?.then(|| MutexGuard::new(self)))
    }

    /// Take the lock before `deadline`, `None` if it passes first
    pub fn try_lock_until(&self, deadline: Deadline) -> RuntimeResult<Option<MutexGuard<'_, T>>> {
        Ok(self.raw.acquire_until(deadline)?.then(|| MutexGuard::new(self)))
    }

    /// Scoped acquire: a missed deadline is `RuntimeError::TimedOut`
    pub fn lock_until(&self, deadline: Deadline) -> RuntimeResult<MutexGuard<'_, T>> {
        self.try_lock_until(deadline)?.ok_or(RuntimeError::TimedOut)
    }

    /// Mutable access through an exclusive borrow, no locking needed
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the mutex and return the inner value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Ok(Some(guard)) => f.debug_struct("Mutex").field("data", &*guard).finish(),
            _ => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Guard that releases the mutex when dropped
///
/// The OS mutex belongs to the thread that locked it, so the guard must be
/// dropped there:
///
/// ```compile_fail
/// use tether_runtime::Mutex;
///
/// fn assert_send<T: Send>(_: T) {}
/// let mutex = Mutex::new(0u32).unwrap();
/// assert_send(mutex.lock().unwrap());
/// ```
///
/// Sharing the guard shares `&T`, which needs `T: Sync`:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use tether_runtime::Mutex;
///
/// fn assert_sync<T: Sync>(_: &T) {}
/// let mutex = Mutex::new(Cell::new(0u32)).unwrap();
/// assert_sync(&mutex.lock().unwrap());
/// ```
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

// Safety: a shared guard only hands out `&T`
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    #[inline]
    fn new(mutex: &'a Mutex<T>) -> Self {
        Self { mutex, _not_send: PhantomData }
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.raw.release() {
            kerror!("mutex guard release: {}", describe(&e));
        }
    }
}

/// Condition variable permanently bound to one `Mutex<T>`
pub struct ConditionVariable<T> {
    raw: RawCondvar,
    mutex: Arc<Mutex<T>>,
}

impl<T> ConditionVariable<T> {
    /// Bind a new condition variable to `mutex`
    pub fn new(mutex: Arc<Mutex<T>>) -> RuntimeResult<Self> {
        Ok(Self {
            raw: RawCondvar::new()?,
            mutex,
        })
    }

    /// The associated mutex
    #[inline]
    pub fn mutex(&self) -> &Arc<Mutex<T>> {
        &self.mutex
    }

    /// Lock the associated mutex
    #[inline]
    pub fn lock(&self) -> RuntimeResult<MutexGuard<'_, T>> {
        self.mutex.lock()
    }

    fn check_guard(&self, guard: &MutexGuard<'_, T>, op: SyncOp) -> RuntimeResult<()> {
        if core::ptr::eq(guard.mutex, Arc::as_ptr(&self.mutex)) {
            Ok(())
        } else {
            Err(RuntimeError::Threading { op, code: libc::EINVAL })
        }
    }

    /// Release the guard's mutex, sleep until signaled, reacquire
    ///
    /// May wake spuriously; prefer `wait_for` with a predicate.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) -> RuntimeResult<()> {
        self.check_guard(guard, SyncOp::Wait)?;
        self.raw.wait(&self.mutex.raw)
    }

    /// As `wait`, giving up at `deadline`; `false` means timed out
    ///
    /// The mutex is held again on return whatever the outcome.
    pub fn wait_until(&self, guard: &mut MutexGuard<'_, T>, deadline: Deadline) -> RuntimeResult<bool> {
        self.check_guard(guard, SyncOp::TimedWait)?;
        self.raw.wait_until(&self.mutex.raw, deadline)
    }

    /// Wait until `predicate` holds for the protected value
    pub fn wait_for<F>(&self, guard: &mut MutexGuard<'_, T>, mut predicate: F) -> RuntimeResult<()>
    where
        F: FnMut(&mut T) -> bool,
    {
        while !predicate(&mut **guard) {
            self.wait(guard)?;
        }
        Ok(())
    }

    /// Wait until `predicate` holds or `deadline` passes
    ///
    /// Returns the predicate's final value, so `false` means timed out.
    pub fn wait_for_until<F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Deadline,
        mut predicate: F,
    ) -> RuntimeResult<bool>
    where
        F: FnMut(&mut T) -> bool,
    {
        while !predicate(&mut **guard) {
            if !self.wait_until(guard, deadline)? {
                return Ok(predicate(&mut **guard));
            }
        }
        Ok(true)
    }

    /// Wake at least one waiter
    #[inline]
    pub fn signal(&self) -> RuntimeResult<()> {
        self.raw.signal()
    }

    /// Wake all current waiters
    #[inline]
    pub fn broadcast(&self) -> RuntimeResult<()> {
        self.raw.broadcast()
    }
}
