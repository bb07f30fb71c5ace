//! pthread-backed raw mutex and condition variable
//!
//! Both objects are boxed: a pthread object must not move once initialized.
//! The mutex is created `PTHREAD_MUTEX_ERRORCHECK` so that unlocking a mutex
//! the caller does not hold (or relocking one it does) is reported instead
//! of being undefined behaviour.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::Duration;
use tether_core::{Deadline, Resource, RuntimeError, RuntimeResult, SyncOp};
use super::{check_create, check_op};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        // No pthread_condattr_setclock: timed waits run on the wall clock
        const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;
    } else {
        const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
    }
}

/// OS mutex handle with acquire/release semantics
pub struct RawMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// Safety: pthread mutexes are designed to be shared between threads
unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// Create an error-checking mutex
    pub fn new() -> RuntimeResult<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();

        // Safety: attr is initialized before use and destroyed after init
        unsafe {
            check_create(libc::pthread_mutexattr_init(attr.as_mut_ptr()), Resource::Mutex)?;
            let mut rc = libc::pthread_mutexattr_settype(
                attr.as_mut_ptr(),
                libc::PTHREAD_MUTEX_ERRORCHECK,
            );
            if rc == 0 {
                rc = libc::pthread_mutex_init(inner.get(), attr.as_ptr());
            }
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            check_create(rc, Resource::Mutex)?;
        }

        Ok(Self { inner })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }

    /// Block until ownership is granted
    pub fn acquire(&self) -> RuntimeResult<()> {
        // Safety: inner is an initialized mutex that outlives the call
        check_op(unsafe { libc::pthread_mutex_lock(self.as_ptr()) }, SyncOp::Lock)
    }

    /// Take ownership if nobody holds it
    pub fn try_acquire(&self) -> RuntimeResult<bool> {
        // Safety: as above
        match unsafe { libc::pthread_mutex_trylock(self.as_ptr()) } {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            code => Err(RuntimeError::Threading { op: SyncOp::TryLock, code }),
        }
    }

    /// Acquire unless `deadline` passes first
    ///
    /// This polls `try_acquire`, yielding the CPU between attempts, rather
    /// than using a native timed lock: `pthread_mutex_timedlock` is missing
    /// on some targets and only understands the wall clock on others.
    pub fn acquire_until(&self, deadline: Deadline) -> RuntimeResult<bool> {
        loop {
            if self.try_acquire()? {
                return Ok(true);
            }
            if deadline.has_passed() {
                return Ok(false);
            }
            std::thread::yield_now();
        }
    }

    /// Give up ownership; releasing a mutex the caller does not hold fails
    pub fn release(&self) -> RuntimeResult<()> {
        // Safety: as above
        check_op(unsafe { libc::pthread_mutex_unlock(self.as_ptr()) }, SyncOp::Unlock)
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        // Safety: no guard can outlive the mutex, so nobody holds it
        unsafe {
            libc::pthread_mutex_destroy(self.as_ptr());
        }
    }
}

/// OS condition variable handle
pub struct RawCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// Safety: pthread condition variables are designed to be shared
unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    /// Create a condition variable whose timed waits use `WAIT_CLOCK`
    pub fn new() -> RuntimeResult<Self> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();

        // Safety: attr is initialized before use and destroyed after init
        unsafe {
            check_create(libc::pthread_condattr_init(attr.as_mut_ptr()), Resource::Condvar)?;
            #[allow(unused_mut)]
            let mut rc = 0;
            #[cfg(not(any(target_os = "macos", target_os = "ios")))]
            {
                rc = libc::pthread_condattr_setclock(attr.as_mut_ptr(), WAIT_CLOCK);
            }
            if rc == 0 {
                rc = libc::pthread_cond_init(inner.get(), attr.as_ptr());
            }
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            check_create(rc, Resource::Condvar)?;
        }

        Ok(Self { inner })
    }

    /// Atomically release `mutex`, sleep until signaled, reacquire
    ///
    /// The caller must hold `mutex`. Spurious wakeups are possible.
    pub fn wait(&self, mutex: &RawMutex) -> RuntimeResult<()> {
        // Safety: both objects are initialized and outlive the call
        check_op(
            unsafe { libc::pthread_cond_wait(self.inner.get(), mutex.as_ptr()) },
            SyncOp::Wait,
        )
    }

    /// As `wait`, but give up at `deadline`
    ///
    /// Returns `false` on timeout. The mutex is held again either way.
    pub fn wait_until(&self, mutex: &RawMutex, deadline: Deadline) -> RuntimeResult<bool> {
        if deadline.is_never() {
            self.wait(mutex)?;
            return Ok(true);
        }
        if deadline.has_passed() {
            return Ok(false);
        }

        let abstime = abs_timespec(deadline.remaining());
        // Safety: as above
        match unsafe { libc::pthread_cond_timedwait(self.inner.get(), mutex.as_ptr(), &abstime) } {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            code => Err(RuntimeError::Threading { op: SyncOp::TimedWait, code }),
        }
    }

    /// Wake at least one waiter
    pub fn signal(&self) -> RuntimeResult<()> {
        // Safety: inner is initialized
        check_op(unsafe { libc::pthread_cond_signal(self.inner.get()) }, SyncOp::Signal)
    }

    /// Wake every current waiter
    pub fn broadcast(&self) -> RuntimeResult<()> {
        // Safety: inner is initialized
        check_op(unsafe { libc::pthread_cond_broadcast(self.inner.get()) }, SyncOp::Broadcast)
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        // Safety: &mut self means no thread is waiting
        unsafe {
            libc::pthread_cond_destroy(self.inner.get());
        }
    }
}

/// `WAIT_CLOCK` now + `remaining`, saturating on overflow
fn abs_timespec(remaining: Duration) -> libc::timespec {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // Safety: now is a valid out-pointer
    unsafe {
        libc::clock_gettime(WAIT_CLOCK, &mut now);
    }

    let secs = libc::time_t::try_from(remaining.as_secs()).unwrap_or(libc::time_t::MAX);
    let mut nsec = now.tv_nsec + remaining.subsec_nanos() as libc::c_long;
    let mut sec = now.tv_sec.saturating_add(secs);
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }
    libc::timespec { tv_sec: sec, tv_nsec: nsec }
}
