//! Priority-ordered shutdown hooks
//!
//! Hooks are kept sorted by priority, highest first. Among equal priorities
//! the hook pushed last runs first, so pushing `[5, 10, 5, 1]` runs
//! `10, 5 (second), 5 (first), 1`.
//!
//! The process-wide stack registers `exec` with `atexit` on its first push,
//! unless the runtime is embedded in a dynamically loaded module. In that
//! case the host must call `fini()` before unloading us.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tether_core::{kdebug, kerror, kwarn, Priority, SpinLock};

pub(crate) static GLOBAL: FinalizationStack = FinalizationStack::process();

type Routine = Box<dyn FnOnce() + Send + 'static>;

struct FinalizationTask {
    priority: Priority,
    routine: Routine,
}

struct TaskList {
    /// Ascending by priority; the back of the vector runs first
    tasks: Vec<FinalizationTask>,
    exit_hook_registered: bool,
}

/// Sorted list of routines to run at shutdown
pub struct FinalizationStack {
    list: SpinLock<TaskList>,
    embedded: AtomicBool,
    at_exit: bool,
}

impl FinalizationStack {
    /// A private stack drained only by explicit `exec()` calls
    pub const fn new() -> Self {
        Self::build(false)
    }

    const fn process() -> Self {
        Self::build(true)
    }

    const fn build(at_exit: bool) -> Self {
        Self {
            list: SpinLock::new(TaskList {
                tasks: Vec::new(),
                exit_hook_registered: false,
            }),
            embedded: AtomicBool::new(false),
            at_exit,
        }
    }

    /// The process-wide stack drained by `fini()` or at process exit
    #[inline]
    pub fn global() -> &'static FinalizationStack {
        &GLOBAL
    }

    /// Queue `routine` to run at shutdown
    pub fn push<F>(&self, priority: Priority, routine: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let register = {
            let mut list = self.list.lock();
            let at = list.tasks.partition_point(|t| t.priority <= priority);
            list.tasks.insert(at, FinalizationTask {
                priority,
                routine: Box::new(routine),
            });

            let register = self.at_exit && !list.exit_hook_registered && !self.is_embedded();
            if register {
                list.exit_hook_registered = true;
            }
            register
        };

        if register {
            // Safety: run_at_exit is a plain extern "C" fn with no arguments
            if unsafe { libc::atexit(run_at_exit) } != 0 {
                kwarn!("atexit registration failed; call fini() before exit");
            } else {
                kdebug!("finalization stack registered with atexit");
            }
        }
    }

    /// Run and discard hooks, highest priority first, until none remain
    ///
    /// Hooks pushed while draining are run too. Calling this on an empty
    /// stack does nothing.
    pub fn exec(&self) {
        let mut ran = 0usize;
        loop {
            // Never hold the lock while a hook runs: it may push more hooks
            let task = self.list.lock().tasks.pop();
            let Some(task) = task else {
                break;
            };
            if catch_unwind(AssertUnwindSafe(task.routine)).is_err() {
                kerror!("finalization hook (priority {}) panicked", task.priority);
            }
            ran += 1;
        }

        let mut list = self.list.lock();
        if list.tasks.is_empty() {
            list.tasks = Vec::new();
        }
        drop(list);

        if ran > 0 {
            kdebug!("ran {} finalization hooks", ran);
        }
    }

    /// Number of hooks waiting to run
    pub fn len(&self) -> usize {
        self.list.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the runtime as living in a dynamically loaded module
    ///
    /// Takes effect for pushes that have not yet registered the exit hook.
    pub fn set_embedded(&self, embedded: bool) {
        self.embedded.store(embedded, Ordering::Release);
    }

    #[inline]
    pub fn is_embedded(&self) -> bool {
        self.embedded.load(Ordering::Acquire)
    }
}

impl Default for FinalizationStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FinalizationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationStack")
            .field("pending", &self.len())
            .field("embedded", &self.is_embedded())
            .finish()
    }
}

extern "C" fn run_at_exit() {
    GLOBAL.exec();
}
