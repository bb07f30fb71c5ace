//! Thread-local storage for the current thread's context
//!
//! Threads spawned through `ThreadBuilder` publish their shared context here
//! so the static cancellation checkpoints can find it. Any other thread
//! (including `main`) has no context and is treated as unmanaged.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use tether_core::ThreadId;
use crate::thread::ThreadContext;

thread_local! {
    /// Context of the runtime thread running on this OS thread
    static CURRENT_CONTEXT: RefCell<Option<Arc<ThreadContext>>> = const { RefCell::new(None) };

    /// Cached id of that thread, `ThreadId::NONE` when unmanaged
    static CURRENT_ID: Cell<ThreadId> = const { Cell::new(ThreadId::NONE) };
}

/// Publish `ctx` as this OS thread's context
#[inline]
pub(crate) fn set_current_context(ctx: Arc<ThreadContext>) {
    CURRENT_ID.with(|cell| cell.set(ctx.id()));
    CURRENT_CONTEXT.with(|cell| *cell.borrow_mut() = Some(ctx));
}

/// Withdraw the context (entry routine finished)
#[inline]
pub(crate) fn clear_current_context() {
    CURRENT_ID.with(|cell| cell.set(ThreadId::NONE));
    // Thread-local may already be torn down during thread exit
    let _ = CURRENT_CONTEXT.try_with(|cell| cell.borrow_mut().take());
}

/// Run `f` with this thread's context, if any
#[inline]
pub(crate) fn with_current_context<R>(f: impl FnOnce(Option<&Arc<ThreadContext>>) -> R) -> R {
    CURRENT_CONTEXT.with(|cell| f(cell.borrow().as_ref()))
}

/// Id of the runtime thread we are running on, `ThreadId::NONE` if unmanaged
#[inline]
pub fn current_id() -> ThreadId {
    CURRENT_ID.try_with(|cell| cell.get()).unwrap_or(ThreadId::NONE)
}

/// Was this OS thread spawned by the runtime?
#[inline]
pub fn is_managed_thread() -> bool {
    !current_id().is_none()
}
