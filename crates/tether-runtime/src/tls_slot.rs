//! Per-thread value slot with an owner-supplied destructor
//!
//! Backed by a pthread key. Each thread lazily gets its own boxed entry; the
//! key's destructor hook runs the slot's destructor exactly once, on the
//! owning thread, for whatever value is still stored when that thread exits.
//!
//! Caveats:
//! - The process's main thread never runs key destructors (returning from
//!   `main` does not go through `pthread_exit`).
//! - Dropping the slot deletes the key. The dropping thread's own value is
//!   destroyed; values still stored on other threads are leaked.

use std::cell::Cell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tether_core::{kerror, Resource, RuntimeError, RuntimeResult, SyncOp};
use crate::sync::{check_create, check_op};

struct Entry<T> {
    value: T,
    destructor: fn(T),
    borrows: Cell<usize>,
}

impl<T> Entry<T> {
    fn destroy(self: Box<Self>) {
        let Entry { value, destructor, .. } = *self;
        destructor(value);
    }
}

/// Key destructor: runs on the exiting thread for a non-null value
unsafe extern "C" fn run_destructor<T>(ptr: *mut c_void) {
    // Safety: every non-null value stored under our key is a leaked Box<Entry<T>>
    let entry = unsafe { Box::from_raw(ptr.cast::<Entry<T>>()) };
    if catch_unwind(AssertUnwindSafe(|| entry.destroy())).is_err() {
        kerror!("thread-local destructor panicked during thread exit");
    }
}

/// One `Option<T>` per live thread, destroyed on thread exit
pub struct ThreadLocalSlot<T: 'static> {
    key: libc::pthread_key_t,
    destructor: fn(T),
    _marker: PhantomData<fn() -> T>,
}

// Safety: values never leave the thread that stored them; the slot itself
// is only a key
unsafe impl<T: 'static> Send for ThreadLocalSlot<T> {}
unsafe impl<T: 'static> Sync for ThreadLocalSlot<T> {}

impl<T: 'static> ThreadLocalSlot<T> {
    /// Slot whose values are simply dropped on thread exit
    pub fn new() -> RuntimeResult<Self> {
        Self::with_destructor(drop::<T>)
    }

    /// Slot that hands each remaining value to `destructor` on thread exit
    pub fn with_destructor(destructor: fn(T)) -> RuntimeResult<Self> {
        let mut key: libc::pthread_key_t = 0;
        // Safety: key is a valid out-pointer
        let rc = unsafe { libc::pthread_key_create(&mut key, Some(run_destructor::<T>)) };
        check_create(rc, Resource::TlsKey)?;
        Ok(Self {
            key,
            destructor,
            _marker: PhantomData,
        })
    }

    fn entry_ptr(&self) -> *mut Entry<T> {
        // Safety: key is live for as long as self
        unsafe { libc::pthread_getspecific(self.key).cast::<Entry<T>>() }
    }

    fn store(&self, ptr: *mut Entry<T>) -> RuntimeResult<()> {
        // Safety: key is live; ptr is null or a leaked Box<Entry<T>>
        let rc = unsafe { libc::pthread_setspecific(self.key, ptr.cast::<c_void>()) };
        check_op(rc, SyncOp::SetSpecific)
    }

    /// Unlink this thread's entry, refusing while `with` borrows it
    fn detach(&self) -> RuntimeResult<Option<Box<Entry<T>>>> {
        let ptr = self.entry_ptr();
        if ptr.is_null() {
            return Ok(None);
        }
        // Safety: non-null pointers under our key are live entries of this thread
        if unsafe { (*ptr).borrows.get() } > 0 {
            return Err(RuntimeError::Threading { op: SyncOp::SetSpecific, code: libc::EBUSY });
        }
        self.store(core::ptr::null_mut())?;
        // Safety: unlinked above, so we are the sole owner
        Ok(Some(unsafe { Box::from_raw(ptr) }))
    }

    /// Borrow this thread's value, `None` if nothing is stored
    ///
    /// `release` and `reset` fail while the borrow is active.
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(Option<&T>) -> R,
    {
        let ptr = self.entry_ptr();
        if ptr.is_null() {
            return f(None);
        }
        // Safety: entry stays linked while borrows > 0
        let entry = unsafe { &*ptr };
        let _borrow = BorrowGuard::new(&entry.borrows);
        f(Some(&entry.value))
    }

    /// Borrow this thread's value, first storing `init()` if empty
    pub fn with_or_insert<R, I, F>(&self, init: I, f: F) -> RuntimeResult<R>
    where
        I: FnOnce() -> T,
        F: FnOnce(&T) -> R,
    {
        if self.entry_ptr().is_null() {
            self.reset(Some(init()))?;
        }
        self.with(|value| value.map(f))
            .ok_or(RuntimeError::Threading { op: SyncOp::SetSpecific, code: libc::ENOENT })
    }

    /// Is a value stored for this thread?
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.entry_ptr().is_null()
    }

    /// Take this thread's value out without destroying it
    pub fn release(&self) -> RuntimeResult<Option<T>> {
        Ok(self.detach()?.map(|entry| entry.value))
    }

    /// Destroy this thread's current value (if any), then store `new`
    pub fn reset(&self, new: Option<T>) -> RuntimeResult<()> {
        if let Some(old) = self.detach()? {
            old.destroy();
        }
        let Some(value) = new else {
            return Ok(());
        };
        let ptr = Box::into_raw(Box::new(Entry {
            value,
            destructor: self.destructor,
            borrows: Cell::new(0),
        }));
        if let Err(e) = self.store(ptr) {
            // Safety: never published, still ours
            drop(unsafe { Box::from_raw(ptr) });
            return Err(e);
        }
        Ok(())
    }
}

impl<T: 'static> Drop for ThreadLocalSlot<T> {
    fn drop(&mut self) {
        if let Ok(Some(entry)) = self.detach() {
            entry.destroy();
        }
        // Safety: key was created by us and is deleted exactly once
        unsafe {
            libc::pthread_key_delete(self.key);
        }
    }
}

struct BorrowGuard<'a> {
    count: &'a Cell<usize>,
}

impl<'a> BorrowGuard<'a> {
    fn new(count: &'a Cell<usize>) -> Self {
        count.set(count.get() + 1);
        Self { count }
    }
}

impl Drop for BorrowGuard<'_> {
    fn drop(&mut self) {
        self.count.set(self.count.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_then_set() {
        let slot = ThreadLocalSlot::<u32>::new().unwrap();
        assert!(slot.with(|v| v.is_none()));

        slot.reset(Some(5)).unwrap();
        assert!(slot.is_set());
        assert_eq!(slot.with(|v| v.copied()), Some(5));

        assert_eq!(slot.release().unwrap(), Some(5));
        assert!(!slot.is_set());
        assert_eq!(slot.release().unwrap(), None);
    }

    #[test]
    fn test_isolation_between_threads() {
        let slot = Arc::new(ThreadLocalSlot::<String>::new().unwrap());
        slot.reset(Some("main".to_string())).unwrap();

        let other = Arc::clone(&slot);
        let seen = thread::spawn(move || other.with(|v| v.cloned())).join().unwrap();
        assert_eq!(seen, None);

        assert_eq!(slot.with(|v| v.cloned()), Some("main".to_string()));
        slot.reset(None).unwrap();
    }

    #[test]
    fn test_destructor_runs_once_on_thread_exit() {
        static DESTROYED: AtomicUsize = AtomicUsize::new(0);
        static LAST: AtomicUsize = AtomicUsize::new(0);

        fn record(v: usize) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
            LAST.store(v, Ordering::SeqCst);
        }

        let slot = Arc::new(ThreadLocalSlot::with_destructor(record).unwrap());
        let worker = Arc::clone(&slot);
        thread::spawn(move || {
            worker.reset(Some(17)).unwrap();
            // No explicit reset: the thread-exit hook must clean up
        })
        .join()
        .unwrap();

        assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
        assert_eq!(LAST.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn test_reset_destroys_previous() {
        static DESTROYED: AtomicUsize = AtomicUsize::new(0);

        fn count(_: u8) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        }

        let slot = ThreadLocalSlot::with_destructor(count).unwrap();
        slot.reset(Some(1)).unwrap();
        slot.reset(Some(2)).unwrap();
        assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);

        // release hands ownership back: no destructor
        assert_eq!(slot.release().unwrap(), Some(2));
        assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_while_borrowed_fails() {
        let slot = ThreadLocalSlot::<u32>::new().unwrap();
        slot.reset(Some(1)).unwrap();

        let result = slot.with(|_| slot.reset(Some(2)));
        assert!(matches!(
            result,
            Err(RuntimeError::Threading { op: SyncOp::SetSpecific, .. })
        ));
        assert_eq!(slot.with(|v| v.copied()), Some(1));

        // Borrow released: reset works again
        slot.reset(None).unwrap();
    }

    #[test]
    fn test_with_or_insert() {
        let slot = ThreadLocalSlot::<Vec<u8>>::new().unwrap();
        let len = slot.with_or_insert(|| vec![1, 2, 3], |v| v.len()).unwrap();
        assert_eq!(len, 3);
        let len = slot.with_or_insert(Vec::new, |v| v.len()).unwrap();
        assert_eq!(len, 3);
    }
}
