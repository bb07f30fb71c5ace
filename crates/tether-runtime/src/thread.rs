//! Cooperatively-cancellable OS threads
//!
//! Each spawned thread shares a `ThreadContext` with its `ThreadHandle`. The
//! context is guarded for its whole life by its own mutex and condition
//! variable:
//!
//! ```text
//!   Initializing ──> Running ──────────────> Exited
//!                       │                      ▲
//!                       └──> CancelPending ────┘
//! ```
//!
//! Cancellation is cooperative. `cancel()` only marks the context; the
//! thread observes it when it calls `test_cancel()`, which returns
//! `Err(RuntimeError::Cancelled)` for the entry routine to propagate with
//! `?`. A thread blocked on a lock, a condition variable, or a join without
//! ever reaching a checkpoint cannot be cancelled.
//!
//! An error or panic escaping the entry routine is recorded as
//! `ExitCause::UncaughtError` and logged. It is not turned into a `join()`
//! failure; callers that care inspect `exit_cause()` / `failure()` after
//! joining.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tether_core::{
    kdebug, kerror, kwarn, Deadline, ExitCause, Resource, RuntimeError, RuntimeResult, SyncOp,
    ThreadId, ThreadState,
};
#[cfg(feature = "debug-logging")]
use tether_core::ktrace;
use crate::lifecycle;
use crate::sync::{describe, ConditionVariable, Mutex, MutexGuard};
use crate::tls;

/// Upper bound on the wait for a new thread to reach `Running`
const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Mutable part of a thread's context, only touched under its mutex
#[derive(Debug)]
pub(crate) struct ContextState {
    state: ThreadState,
    exit_cause: ExitCause,
    cancel_enabled: bool,
    detached: bool,
    failure: Option<String>,
}

/// State shared by a spawned thread and its handle
pub(crate) struct ThreadContext {
    id: ThreadId,
    name: String,
    monitor: ConditionVariable<ContextState>,
}

impl ThreadContext {
    fn new(id: ThreadId, name: String, detached: bool) -> RuntimeResult<Self> {
        let state = ContextState {
            state: ThreadState::Initializing,
            exit_cause: ExitCause::None,
            cancel_enabled: true,
            detached,
            failure: None,
        };
        Ok(Self {
            id,
            name,
            monitor: ConditionVariable::new(Arc::new(Mutex::new(state)?))?,
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    fn lock(&self) -> RuntimeResult<MutexGuard<'_, ContextState>> {
        self.monitor.lock()
    }

    /// Move to `next` and wake everyone waiting on the context
    fn publish(&self, guard: &mut MutexGuard<'_, ContextState>, next: ThreadState) -> RuntimeResult<()> {
        #[cfg(feature = "debug-logging")]
        ktrace!("thread {}: {} -> {}", self.id, guard.state, next);
        guard.state = next;
        self.monitor.broadcast()
    }

    fn enter(&self) -> RuntimeResult<()> {
        let mut guard = self.lock()?;
        self.publish(&mut guard, ThreadState::Running)
    }

    fn exit(&self, cause: ExitCause, failure: Option<String>) -> RuntimeResult<bool> {
        let mut guard = self.lock()?;
        guard.exit_cause = cause;
        guard.failure = failure;
        self.publish(&mut guard, ThreadState::Exited)?;
        Ok(guard.detached)
    }

    /// Block until the thread has left `Initializing`
    fn await_started(&self, deadline: Deadline) -> RuntimeResult<()> {
        let mut guard = self.lock()?;
        let started = self.monitor.wait_for_until(&mut guard, deadline, |s| {
            s.state != ThreadState::Initializing
        })?;
        if started {
            Ok(())
        } else {
            Err(RuntimeError::TimedOut)
        }
    }

    fn check_cancel(&self) -> RuntimeResult<()> {
        let guard = self.lock()?;
        if guard.state == ThreadState::CancelPending && guard.cancel_enabled {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn wait_exited(&self, deadline: Deadline) -> RuntimeResult<bool> {
        let mut guard = self.lock()?;
        self.monitor
            .wait_for_until(&mut guard, deadline, |s| s.state.is_exited())
    }
}

/// Builder for spawned threads
///
/// Defaults come from the runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
    detached: bool,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// OS thread name (default `<prefix>-<id>`)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Detached threads are not reaped by their handle
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Start the thread; returns once it has reached `Running`
    pub fn spawn<F>(self, entry: F) -> RuntimeResult<ThreadHandle>
    where
        F: FnOnce() -> RuntimeResult<()> + Send + 'static,
    {
        let config = lifecycle::config();
        let id = ThreadId::next();
        let name = self
            .name
            .unwrap_or_else(|| format!("{}-{}", config.thread_name_prefix, id));
        if name.contains('\0') {
            return Err(RuntimeError::Threading { op: SyncOp::Spawn, code: libc::EINVAL });
        }
        let ctx = Arc::new(ThreadContext::new(id, name.clone(), self.detached)?);

        let child = Arc::clone(&ctx);
        let join = std::thread::Builder::new()
            .name(name)
            .stack_size(self.stack_size.unwrap_or(config.stack_size))
            .spawn(move || run_thread(child, entry))
            .map_err(|e| RuntimeError::ResourceExhausted {
                resource: Resource::Thread,
                code: e.raw_os_error().unwrap_or(libc::EAGAIN),
            })?;

        // Never hand out a handle before the child is schedulable
        if let Err(e) = ctx.await_started(Deadline::after(SPAWN_TIMEOUT)) {
            kerror!("thread {} did not start: {}", ctx.id, describe(&e));
            return Err(e);
        }
        kdebug!("spawned thread {} ({})", ctx.id, ctx.name);

        Ok(ThreadHandle {
            join: if self.detached { None } else { Some(join) },
            ctx,
        })
    }
}

/// Body of every spawned OS thread
fn run_thread<F>(ctx: Arc<ThreadContext>, entry: F)
where
    F: FnOnce() -> RuntimeResult<()>,
{
    if let Err(e) = ctx.enter() {
        kerror!("thread {} failed to publish Running: {}", ctx.id, describe(&e));
        // Skip the entry routine; Exited still releases the spawner
        if let Err(e) = ctx.exit(ExitCause::UncaughtError, Some(e.to_string())) {
            kerror!("thread {} failed to publish Exited: {}", ctx.id, describe(&e));
        }
        return;
    }
    tls::set_current_context(Arc::clone(&ctx));

    let (cause, failure) = match catch_unwind(AssertUnwindSafe(entry)) {
        Ok(Ok(())) => (ExitCause::Completed, None),
        Ok(Err(RuntimeError::Cancelled)) => (ExitCause::Cancelled, None),
        Ok(Err(e)) => (ExitCause::UncaughtError, Some(e.to_string())),
        Err(payload) => (ExitCause::UncaughtError, Some(panic_message(payload.as_ref()))),
    };
    if let Some(msg) = &failure {
        kwarn!("thread {} exited with uncaught error: {}", ctx.id, msg);
    }

    tls::clear_current_context();

    match ctx.exit(cause, failure) {
        Ok(true) => kdebug!("detached thread {} {}", ctx.id, cause),
        Ok(false) => kdebug!("thread {} {}", ctx.id, cause),
        Err(e) => kerror!("thread {} failed to publish Exited: {}", ctx.id, describe(&e)),
    }
    // Dropping `ctx` releases this thread's share; for a detached thread
    // whose handle is gone that frees the context.
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Owner of a spawned thread
///
/// Dropping a non-detached handle joins the thread and reaps the OS thread,
/// so the drop blocks until the thread has exited. For non-blocking
/// teardown, `cancel()` first and make sure the thread reaches a
/// `test_cancel()` checkpoint.
pub struct ThreadHandle {
    ctx: Arc<ThreadContext>,
    join: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    /// Spawn `entry` with default settings
    pub fn spawn<F>(entry: F, detached: bool) -> RuntimeResult<ThreadHandle>
    where
        F: FnOnce() -> RuntimeResult<()> + Send + 'static,
    {
        ThreadBuilder::new().detached(detached).spawn(entry)
    }

    /// Spawn a thread that frees its own context on exit
    pub fn spawn_detached<F>(entry: F) -> RuntimeResult<ThreadHandle>
    where
        F: FnOnce() -> RuntimeResult<()> + Send + 'static,
    {
        Self::spawn(entry, true)
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.ctx.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.join.is_none()
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeResult<ThreadState> {
        Ok(self.ctx.lock()?.state)
    }

    /// Why the thread exited (`ExitCause::None` while it runs)
    pub fn exit_cause(&self) -> RuntimeResult<ExitCause> {
        Ok(self.ctx.lock()?.exit_cause)
    }

    /// Description of the error or panic that escaped the entry routine
    pub fn failure(&self) -> RuntimeResult<Option<String>> {
        Ok(self.ctx.lock()?.failure.clone())
    }

    /// Has the thread left its entry routine?
    pub fn is_finished(&self) -> bool {
        self.state().map(|s| s.is_exited()).unwrap_or(false)
    }

    /// Ask the thread to stop at its next `test_cancel()` checkpoint
    ///
    /// Non-blocking; has no effect once the thread has exited.
    pub fn cancel(&self) -> RuntimeResult<()> {
        let mut guard = self.ctx.lock()?;
        if !guard.state.is_exited() {
            self.ctx.publish(&mut guard, ThreadState::CancelPending)?;
        }
        Ok(())
    }

    fn ensure_other_thread(&self) -> RuntimeResult<()> {
        if tls::current_id() == self.ctx.id {
            return Err(RuntimeError::Threading { op: SyncOp::Join, code: libc::EDEADLK });
        }
        Ok(())
    }

    /// Block until the thread has exited
    pub fn join(&self) -> RuntimeResult<()> {
        self.ensure_other_thread()?;
        self.ctx.wait_exited(Deadline::NEVER).map(|_| ())
    }

    /// Block until the thread has exited or `deadline` passes
    pub fn join_until(&self, deadline: Deadline) -> RuntimeResult<bool> {
        self.ensure_other_thread()?;
        self.ctx.wait_exited(deadline)
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.ctx.id)
            .field("name", &self.ctx.name)
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        if tls::current_id() == self.ctx.id {
            // Dropped by the thread itself: nothing can reap it
            kwarn!("thread {} dropped its own handle; detaching", self.ctx.id);
            return;
        }
        if let Err(e) = self.join() {
            kerror!("implicit join of thread {} failed: {}", self.ctx.id, describe(&e));
        }
        if join.join().is_err() {
            kerror!("thread {} unwound past its entry wrapper", self.ctx.id);
        }
    }
}

/// Cancellation checkpoint for the calling thread
///
/// Returns `Err(RuntimeError::Cancelled)` if this thread's handle requested
/// cancellation and cancellation is enabled. A no-op on threads the runtime
/// did not spawn.
pub fn test_cancel() -> RuntimeResult<()> {
    tls::with_current_context(|ctx| match ctx {
        Some(ctx) => ctx.check_cancel(),
        None => Ok(()),
    })
}

/// As `test_cancel`, but runs `on_cancel` before propagating the signal
///
/// Whatever `on_cancel` returns (or panics with) is discarded.
pub fn test_cancel_with<F, R>(on_cancel: F) -> RuntimeResult<()>
where
    F: FnOnce() -> R,
{
    match test_cancel() {
        Err(RuntimeError::Cancelled) => {
            if catch_unwind(AssertUnwindSafe(|| drop(on_cancel()))).is_err() {
                kdebug!("cancellation callback panicked; ignored");
            }
            Err(RuntimeError::Cancelled)
        }
        other => other,
    }
}

/// Enable or disable cancellation for the calling thread
///
/// Returns the previous setting. Threads the runtime did not spawn are
/// always "enabled" and unaffected.
pub fn cancel_enabled(enabled: bool) -> bool {
    tls::with_current_context(|ctx| match ctx {
        Some(ctx) => match ctx.lock() {
            Ok(mut guard) => std::mem::replace(&mut guard.cancel_enabled, enabled),
            Err(e) => {
                kerror!("cancel_enabled: {}", describe(&e));
                true
            }
        },
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_start_wait_is_bounded() {
        // Nothing ever runs this context, so it stays Initializing
        let ctx = ThreadContext::new(ThreadId::next(), "never-started".into(), false).unwrap();
        let start = Instant::now();
        assert_eq!(
            ctx.await_started(Deadline::after(Duration::from_millis(20))),
            Err(RuntimeError::TimedOut)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));

        // An exit without ever running also releases the waiter
        ctx.exit(ExitCause::UncaughtError, Some("setup failed".into())).unwrap();
        assert_eq!(ctx.await_started(Deadline::after(Duration::from_millis(20))), Ok(()));
    }

    #[test]
    fn test_spawn_rejects_nul_in_name() {
        let result = ThreadBuilder::new().name("bad\0name").spawn(|| Ok(()));
        assert!(matches!(
            result,
            Err(RuntimeError::Threading { op: SyncOp::Spawn, code: libc::EINVAL })
        ));
    }

    #[test]
    fn test_spawn_is_running_on_return() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let handle = ThreadHandle::spawn(
            move || {
                while !flag.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            false,
        )
        .unwrap();

        assert_eq!(handle.state().unwrap(), ThreadState::Running);
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::None);
        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Completed);
    }

    #[test]
    fn test_cancel_stops_checkpointing_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&iterations);
        let handle = ThreadHandle::spawn(
            move || loop {
                test_cancel()?;
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            },
            false,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        handle.cancel().unwrap();
        let at_cancel = iterations.load(Ordering::SeqCst);

        assert!(handle.join_until(Deadline::from_millis(5_000)).unwrap());
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Cancelled);
        // At most the iteration already past its checkpoint completes
        assert!(iterations.load(Ordering::SeqCst) <= at_cancel + 1);
    }

    #[test]
    fn test_cancel_ignored_without_checkpoint() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&release);
        let handle = ThreadHandle::spawn(
            move || {
                while !flag.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            false,
        )
        .unwrap();

        handle.cancel().unwrap();
        assert_eq!(handle.state().unwrap(), ThreadState::CancelPending);
        assert!(!handle.join_until(Deadline::from_millis(30)).unwrap());

        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Completed);
    }

    #[test]
    fn test_cancel_disabled_section() {
        let (tx, rx) = std::sync::mpsc::channel();
        let go = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&go);

        let handle = ThreadHandle::spawn(
            move || {
                let previous = cancel_enabled(false);
                while !flag.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                // Cancel is pending but masked
                let masked = test_cancel().is_ok();
                cancel_enabled(previous);
                tx.send((previous, masked)).unwrap();
                test_cancel()
            },
            false,
        )
        .unwrap();

        handle.cancel().unwrap();
        go.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), (true, true));
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Cancelled);
    }

    #[test]
    fn test_cancel_callback_runs_before_signal() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned);
        let handle = ThreadHandle::spawn(
            move || loop {
                let flag = Arc::clone(&flag);
                test_cancel_with(move || {
                    flag.store(true, Ordering::SeqCst);
                    Err::<(), _>(RuntimeError::failed("cleanup error is discarded"))
                })?;
                std::thread::sleep(Duration::from_millis(1));
            },
            false,
        )
        .unwrap();

        handle.cancel().unwrap();
        handle.join().unwrap();
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Cancelled);
    }

    #[test]
    fn test_uncaught_error_recorded_not_propagated() {
        let handle = ThreadHandle::spawn(|| Err(RuntimeError::failed("disk on fire")), false).unwrap();
        handle.join().unwrap();
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::UncaughtError);
        assert_eq!(handle.failure().unwrap().as_deref(), Some("disk on fire"));

        let handle = ThreadHandle::spawn(|| panic!("kaboom"), false).unwrap();
        handle.join().unwrap();
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::UncaughtError);
        assert!(handle.failure().unwrap().unwrap().contains("kaboom"));
    }

    #[test]
    fn test_drop_joins() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let handle = ThreadHandle::spawn(
            move || {
                std::thread::sleep(Duration::from_millis(30));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            false,
        )
        .unwrap();

        drop(handle);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_detached_thread_outlives_handle() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = ThreadHandle::spawn_detached(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(crate::tls::current_id()).unwrap();
            Ok(())
        })
        .unwrap();

        let id = handle.id();
        assert!(handle.is_detached());
        let start = Instant::now();
        drop(handle);
        // Dropping a detached handle does not wait
        assert!(start.elapsed() < Duration::from_millis(20));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), id);
    }

    #[test]
    fn test_self_join_rejected() {
        let (tx, rx) = std::sync::mpsc::channel::<ThreadHandle>();
        let (result_tx, result_rx) = std::sync::mpsc::channel();

        let handle = ThreadHandle::spawn(
            move || {
                let me = rx.recv().map_err(|e| RuntimeError::failed(e.to_string()))?;
                result_tx.send(me.join()).unwrap();
                // Dropping our own handle must not deadlock
                drop(me);
                Ok(())
            },
            false,
        )
        .unwrap();
        tx.send(handle).unwrap();

        let result = result_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(RuntimeError::Threading { op: SyncOp::Join, .. })));
    }

    #[test]
    fn test_unmanaged_thread_checkpoints_are_noops() {
        assert!(test_cancel().is_ok());
        assert!(cancel_enabled(false));
        assert!(cancel_enabled(true));
        assert!(!tls::is_managed_thread());
    }

    #[test]
    fn test_builder_name() {
        let handle = ThreadBuilder::new()
            .name("named-worker")
            .stack_size(128 * 1024)
            .spawn(|| {
                let current = std::thread::current();
                assert_eq!(current.name(), Some("named-worker"));
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.name(), "named-worker");
        handle.join().unwrap();
        assert_eq!(handle.exit_cause().unwrap(), ExitCause::Completed);
    }
}
