//! Lazily constructed singletons with ordered teardown
//!
//! Three flavors share one registry:
//!
//! | Flavor | Storage | Destroyed |
//! |--------|---------|-----------|
//! | `Singleton<T>` | one `Arc<T>` per process | by the finalization stack, at its priority |
//! | `ClassSingleton<O, T>` | one `Arc<T>` per owner type `O` | same as above |
//! | `ThreadSingleton<T>` | one `T` per thread | when that thread exits |
//!
//! Construction runs exactly once per holder no matter how many threads
//! race for it. A process-wide type must always be requested with the same
//! destroy priority; a mismatch is `RuntimeError::Consistency`.
//!
//! Finalization drops the registry's reference. `T` itself is dropped then
//! unless callers still hold clones of the `Arc`, in which case the last
//! clone drops it. Asking for the instance after finalization is
//! `RuntimeError::Finalized`.

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::{kdebug, kerror, OnceGuard, Priority, RuntimeError, RuntimeResult, SpinLock};
use crate::finalize::{self, FinalizationStack};
use crate::tls_slot::ThreadLocalSlot;

static REGISTRY: SingletonRegistry = SingletonRegistry::new(&finalize::GLOBAL);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Flavor {
    Process,
    Class,
    Thread,
}

/// (flavor, owner type, value type)
type HolderKey = (Flavor, TypeId, TypeId);

/// Storage for one process-wide or class-scoped instance
struct Holder<T> {
    once: OnceGuard,
    priority: Priority,
    instance: SpinLock<Option<Arc<T>>>,
    finalized: AtomicBool,
}

impl<T> Holder<T> {
    fn new(priority: Priority) -> Self {
        Self {
            once: OnceGuard::new(),
            priority,
            instance: SpinLock::new(None),
            finalized: AtomicBool::new(false),
        }
    }
}

/// Storage for a thread-local instance
struct ThreadHolder<T: 'static> {
    slot: ThreadLocalSlot<T>,
}

/// Owner of every singleton holder
///
/// Holders are allocated on first use and never freed, so references to
/// them stay valid for the life of the process.
pub struct SingletonRegistry {
    holders: SpinLock<BTreeMap<HolderKey, &'static (dyn Any + Send + Sync)>>,
    finalizers: &'static FinalizationStack,
}

impl SingletonRegistry {
    /// Registry whose process-wide instances are torn down by `finalizers`
    pub const fn new(finalizers: &'static FinalizationStack) -> Self {
        Self {
            holders: SpinLock::new(BTreeMap::new()),
            finalizers,
        }
    }

    /// The registry behind `Singleton`, `ClassSingleton` and `ThreadSingleton`
    #[inline]
    pub fn global() -> &'static SingletonRegistry {
        &REGISTRY
    }

    /// Find or create the holder stored under `key`
    fn holder<H, M>(&self, key: HolderKey, make: M) -> RuntimeResult<&'static H>
    where
        H: Any + Send + Sync,
        M: FnOnce() -> RuntimeResult<H>,
    {
        let found = self.holders.lock().get(&key).copied();
        let any: &'static (dyn Any + Send + Sync) = match found {
            Some(any) => any,
            None => {
                // Build outside the spinlock; a racing thread may beat us
                let fresh = make()?;
                let mut holders = self.holders.lock();
                match holders.get(&key) {
                    Some(any) => *any,
                    None => {
                        let leaked: &'static (dyn Any + Send + Sync) = Box::leak(Box::new(fresh));
                        holders.insert(key, leaked);
                        leaked
                    }
                }
            }
        };
        any.downcast_ref::<H>()
            .ok_or_else(|| RuntimeError::failed(format!("singleton holder type mismatch for {}", type_name::<H>())))
    }

    fn shared<O, T, F>(&self, flavor: Flavor, priority: Priority, init: F) -> RuntimeResult<Arc<T>>
    where
        O: 'static,
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let key = (flavor, TypeId::of::<O>(), TypeId::of::<T>());
        let holder: &'static Holder<T> = self.holder(key, || Ok(Holder::new(priority)))?;

        if holder.priority != priority {
            let err = RuntimeError::Consistency {
                type_name: type_name::<T>(),
                registered: holder.priority,
                requested: priority,
            };
            kerror!("{}", err);
            return Err(err);
        }

        holder.once.run(|| {
            *holder.instance.lock() = Some(Arc::new(init()));
            self.finalizers.push(priority, move || {
                let instance = holder.instance.lock().take();
                holder.finalized.store(true, Ordering::Release);
                drop(instance);
            });
            kdebug!("singleton {} constructed ({:?}, priority {})", type_name::<T>(), flavor, priority);
        });

        let instance = holder.instance.lock().clone();
        match instance {
            Some(instance) => Ok(instance),
            None if holder.finalized.load(Ordering::Acquire) => {
                Err(RuntimeError::Finalized { type_name: type_name::<T>() })
            }
            None => Err(RuntimeError::failed(format!("singleton {} has no instance", type_name::<T>()))),
        }
    }

    /// Process-wide instance of `T`, constructed by `init` on first use
    pub fn get_or_init<T, F>(&self, priority: Priority, init: F) -> RuntimeResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.shared::<(), T, F>(Flavor::Process, priority, init)
    }

    /// Instance of `T` private to owner type `O`
    pub fn get_or_init_for<O, T, F>(&self, priority: Priority, init: F) -> RuntimeResult<Arc<T>>
    where
        O: 'static,
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.shared::<O, T, F>(Flavor::Class, priority, init)
    }

    /// Borrow the calling thread's instance of `T`, constructing it first if
    /// this thread has none
    ///
    /// The instance is dropped when the thread exits. The process's main
    /// thread never runs thread-exit hooks, so its instance is never dropped.
    pub fn with_thread_local<T, I, F, R>(&self, init: I, f: F) -> RuntimeResult<R>
    where
        T: 'static,
        I: FnOnce() -> T,
        F: FnOnce(&T) -> R,
    {
        let key = (Flavor::Thread, TypeId::of::<()>(), TypeId::of::<T>());
        let holder: &'static ThreadHolder<T> = self.holder(key, || {
            Ok(ThreadHolder { slot: ThreadLocalSlot::new()? })
        })?;
        holder.slot.with_or_insert(init, f)
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("holders", &self.holders.lock().len())
            .finish()
    }
}

/// Process-wide singleton of `T`
///
/// # Example
///
/// ```ignore
/// let cache = Singleton::<Cache>::instance_with_priority(Priority::HIGH)?;
/// cache.insert(key, value);
/// ```
pub struct Singleton<T>(PhantomData<fn() -> T>);

impl<T: Send + Sync + 'static> Singleton<T> {
    /// The instance, default-constructed on first use at default priority
    pub fn instance() -> RuntimeResult<Arc<T>>
    where
        T: Default,
    {
        Self::get_or_init(Priority::DEFAULT, T::default)
    }

    /// The instance, default-constructed on first use
    pub fn instance_with_priority(priority: Priority) -> RuntimeResult<Arc<T>>
    where
        T: Default,
    {
        Self::get_or_init(priority, T::default)
    }

    /// The instance, built by `init` on first use
    pub fn get_or_init<F: FnOnce() -> T>(priority: Priority, init: F) -> RuntimeResult<Arc<T>> {
        SingletonRegistry::global().get_or_init(priority, init)
    }
}

/// Singleton of `T` scoped to owner type `O`
///
/// Owners holding the same `T` never share an instance. Restricting access
/// to the owner is left to the owner's module privacy.
pub struct ClassSingleton<O, T>(PhantomData<fn() -> (O, T)>);

impl<O: 'static, T: Send + Sync + 'static> ClassSingleton<O, T> {
    pub fn instance() -> RuntimeResult<Arc<T>>
    where
        T: Default,
    {
        Self::get_or_init(Priority::DEFAULT, T::default)
    }

    pub fn instance_with_priority(priority: Priority) -> RuntimeResult<Arc<T>>
    where
        T: Default,
    {
        Self::get_or_init(priority, T::default)
    }

    pub fn get_or_init<F: FnOnce() -> T>(priority: Priority, init: F) -> RuntimeResult<Arc<T>> {
        SingletonRegistry::global().get_or_init_for::<O, T, F>(priority, init)
    }
}

/// One `T` per thread, dropped when the thread exits
pub struct ThreadSingleton<T>(PhantomData<fn() -> T>);

impl<T: 'static> ThreadSingleton<T> {
    /// Borrow this thread's instance, default-constructed on first use
    pub fn with<R, F: FnOnce(&T) -> R>(f: F) -> RuntimeResult<R>
    where
        T: Default,
    {
        Self::with_init(T::default, f)
    }

    /// Borrow this thread's instance, built by `init` on first use
    pub fn with_init<R, I, F>(init: I, f: F) -> RuntimeResult<R>
    where
        I: FnOnce() -> T,
        F: FnOnce(&T) -> R,
    {
        SingletonRegistry::global().with_thread_local(init, f)
    }
}
