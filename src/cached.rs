//! `CachedValue<T>`: a context-bound, recomputing single-flight cache
//! around a future-producing miss handler. Grounded on DICE's own
//! cache-or-compute contract (`project_for_key`): check the slot, invoke
//! the miss path on a miss, never invoke it again for a hit, and fail fast
//! if the owning context is already gone.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::context::WeakExecutionContext;
use crate::error::Error;
use crate::fallible::panic_message;
use crate::future::constructors::from_failure;
use crate::future::Future;
use crate::locking::CriticalSection;

type MissHandler<T> = dyn Fn(ExecutionContext) -> Future<T> + Send + Sync;

/// Caches the `Future<T>` produced by `miss_handler` behind a weakly-held
/// `ExecutionContext`. The first caller to observe an empty slot invokes
/// `miss_handler`; every other caller, concurrent or later, observes the
/// same `Future<T>` and therefore the same eventual value.
pub struct CachedValue<T> {
    context: WeakExecutionContext,
    miss_handler: Arc<MissHandler<T>>,
    cached: CriticalSection<Option<Future<T>>>,
}

impl<T> CachedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `context` is held weakly: once it is gone, `value()` stops invoking
    /// `miss_handler` and instead returns a `ContextDeallocated` failure.
    pub fn new(
        context: &ExecutionContext,
        miss_handler: impl Fn(ExecutionContext) -> Future<T> + Send + Sync + 'static,
    ) -> Self {
        CachedValue {
            context: context.weak(),
            miss_handler: Arc::new(miss_handler),
            cached: CriticalSection::new(None),
        }
    }

    /// Returns the cached future, invoking `miss_handler` on a cache miss.
    /// `miss_handler` runs at most once per fill — its own raises are
    /// captured into a failed future rather than propagated. Use
    /// [`CachedValue::invalidate`] to force a recompute.
    pub fn value(&self) -> Future<T> {
        self.cached.locked(|slot| {
            if let Some(future) = slot {
                return future.clone();
            }
            match self.context.upgrade() {
                // Not cached: a dead-context failure is never stored here,
                // so a still-live context later could still populate the
                // slot on a subsequent call.
                None => from_failure(Error::context_deallocated()),
                Some(context) => {
                    let future = self.invoke_miss_handler(context);
                    *slot = Some(future.clone());
                    future
                }
            }
        })
    }

    fn invoke_miss_handler(&self, context: ExecutionContext) -> Future<T> {
        let handler = self.miss_handler.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(move || handler(context))) {
            Ok(future) => future,
            Err(payload) => {
                from_failure(Error::user(anyhow::anyhow!("{}", panic_message(&payload))))
            }
        }
    }

    /// Clears the cached slot so the next [`CachedValue::value`] call
    /// recomputes. Does not affect a `Future<T>` handle a caller is already
    /// holding — that handle still observes its original completion;
    /// invalidation is not cancellation.
    pub fn invalidate(&self) {
        self.cached.locked(|slot| *slot = None);
    }

    /// `true` if a value (success or failure) has been computed and not
    /// since invalidated.
    pub fn is_populated(&self) -> bool {
        self.cached.locked(|slot| match slot {
            Some(future) => future.is_complete(),
            None => false,
        })
    }
}
