//! The one-shot value primitive: [`Future<T>`] is the read handle, [`Promise<T>`]
//! the write handle, both views onto the same shared state. Grounded
//! directly on `dice`'s `DiceTask`/`DiceTaskInternal`: an atomically-guarded
//! state, a lock-protected handler registry that is drained exactly once at
//! completion, and idempotent completion.

pub mod constructors;

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Condvar;
use parking_lot::Mutex;
use slab::Slab;

use crate::cancellation::Cancellable;
use crate::context::Dependent;
use crate::error::Error;
use crate::executor::Executor;
use crate::fallible::Fallible;

type Callback<T> = Box<dyn FnOnce(Fallible<T>) + Send>;
type DrainCallback = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending { handlers: Slab<Weak<HandlerSlot<T>>> },
    Completed(Fallible<T>),
}

impl<T> State<T> {
    fn new_pending() -> Self {
        State::Pending {
            handlers: Slab::new(),
        }
    }
}

struct HandlerSlot<T> {
    executor: Executor,
    callback: Mutex<Option<Callback<T>>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> Inner<T> {
    fn new() -> Arc<Self> {
        Arc::new(Inner {
            state: Mutex::new(State::new_pending()),
            condvar: Condvar::new(),
        })
    }
}

/// The read-capability view of a one-shot value.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: self.inner.clone(),
        }
    }
}

/// The receipt returned by [`Future::make_final_handler`]. Holding it alive
/// keeps the registered callback live; dropping it deregisters the callback
/// from the future's handler registry. The future itself only ever holds a
/// *weak* reference to the callback slot, so a dropped receipt is never a
/// leak.
pub struct FutureHandler<T> {
    inner: Arc<Inner<T>>,
    key: usize,
    _slot: Arc<HandlerSlot<T>>,
}

impl<T> Drop for FutureHandler<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let State::Pending { handlers } = &mut *state {
            if handlers.contains(self.key) {
                handlers.remove(self.key);
            }
        }
    }
}

struct ProducerInner<T> {
    inner: Arc<Inner<T>>,
    drain_callbacks: Mutex<Vec<DrainCallback>>,
}

impl<T> Drop for ProducerInner<T> {
    fn drop(&mut self) {
        let still_pending = matches!(&*self.inner.state.lock(), State::Pending { .. });
        if still_pending {
            let callbacks = std::mem::take(&mut *self.drain_callbacks.lock());
            for callback in callbacks {
                callback();
            }
        }
    }
}

/// The write-capability view of a one-shot value.
#[derive(Clone)]
pub struct Promise<T> {
    producer: Arc<ProducerInner<T>>,
}

impl<T> Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// If already complete, schedules `callback(value)` on `executor` and
    /// returns `None` — no registration took place. Otherwise registers the
    /// callback and returns a receipt; dropping it deregisters.
    pub fn make_final_handler(
        &self,
        executor: Executor,
        callback: impl FnOnce(Fallible<T>) + Send + 'static,
    ) -> Option<FutureHandler<T>> {
        let mut guard = self.inner.state.lock();
        match &mut *guard {
            State::Completed(value) => {
                let value = value.clone();
                drop(guard);
                executor.execute(move || callback(value));
                None
            }
            State::Pending { handlers } => {
                let slot = Arc::new(HandlerSlot {
                    executor,
                    callback: Mutex::new(Some(Box::new(callback))),
                });
                let key = handlers.insert(Arc::downgrade(&slot));
                drop(guard);
                Some(FutureHandler {
                    inner: self.inner.clone(),
                    key,
                    _slot: slot,
                })
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Completed(_))
    }

    /// Blocks the calling thread until complete. For tests; production code
    /// uses [`Future::make_final_handler`].
    pub fn wait(&self) -> Fallible<T> {
        let mut guard = self.inner.state.lock();
        loop {
            if let State::Completed(value) = &*guard {
                return value.clone();
            }
            self.inner.condvar.wait(&mut guard);
        }
    }

    /// Blocks with a timeout; `None` if still pending when it elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Fallible<T>> {
        let mut guard = self.inner.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let State::Completed(value) = &*guard {
                return Some(value.clone());
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let timed_out = self.inner.condvar.wait_for(&mut guard, deadline - now);
            if timed_out.timed_out() {
                if let State::Completed(value) = &*guard {
                    return Some(value.clone());
                }
                return None;
            }
        }
    }

    /// Creates a downstream future that completes with `f(success)`, or
    /// propagates the original failure untouched.
    pub fn map<U, F>(&self, executor: Executor, f: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        let (promise, downstream) = Promise::new();
        self.make_final_handler(executor, move |value| {
            let result = match value {
                Fallible::Success(v) => match f(v) {
                    Ok(u) => Fallible::Success(u),
                    Err(e) => Fallible::Failure(e),
                },
                Fallible::Failure(e) => Fallible::Failure(e),
            };
            promise.complete(result);
        })
        .map(leak_handler);
        downstream
    }

    /// Like [`Future::map`], but `f` itself returns a `Future<U>` that is
    /// chained in.
    pub fn flat_map<U, F>(&self, executor: Executor, f: F) -> Future<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let (promise, downstream) = Promise::new();
        self.make_final_handler(executor, move |value| match value {
            Fallible::Success(v) => promise.complete_with(f(v)),
            Fallible::Failure(e) => promise.fail(e),
        })
        .map(leak_handler);
        downstream
    }
}

/// Handlers created to drive internal plumbing (e.g. `map`'s forwarding
/// handler) must stay registered for the lifetime of the upstream future,
/// not just until this call returns — there is no earlier natural owner,
/// so we intentionally leak the receipt. This mirrors the same tradeoff
/// `ExecutionContext::add_dependent` makes, documented there.
fn leak_handler<T>(handler: FutureHandler<T>) {
    std::mem::forget(handler);
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a pending `(Promise, Future)` pair sharing the same identity.
    pub fn new() -> (Promise<T>, Future<T>) {
        let inner = Inner::new();
        let promise = Promise {
            producer: Arc::new(ProducerInner {
                inner: inner.clone(),
                drain_callbacks: Mutex::new(Vec::new()),
            }),
        };
        (promise, Future { inner })
    }

    /// Returns a read handle onto the same identity.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: self.producer.inner.clone(),
        }
    }

    pub fn succeed(&self, value: T) {
        self.complete(Fallible::Success(value));
    }

    pub fn fail(&self, err: Error) {
        self.complete(Fallible::Failure(err));
    }

    /// Transitions `Pending -> Completed`. Second and later calls are
    /// no-ops: completion is terminal.
    pub fn complete(&self, value: Fallible<T>) {
        let handlers = {
            let mut guard = self.producer.inner.state.lock();
            if matches!(&*guard, State::Completed(_)) {
                return;
            }
            let previous = std::mem::replace(&mut *guard, State::Completed(value.clone()));
            match previous {
                State::Pending { handlers } => handlers,
                State::Completed(_) => unreachable!("checked above"),
            }
        };
        self.producer.inner.condvar.notify_all();

        for (_, weak) in handlers {
            if let Some(slot) = weak.upgrade() {
                if let Some(callback) = slot.callback.lock().take() {
                    let value = value.clone();
                    slot.executor.execute(move || callback(value));
                }
            }
        }
    }

    /// Registers a handler on `other` that forwards its completion to
    /// `self`. Race-safe if `other` is already complete.
    pub fn complete_with(&self, other: Future<T>) {
        let this = self.clone();
        other
            .make_final_handler(Executor::immediate(), move |value| this.complete(value))
            .map(leak_handler);
    }

    pub fn cancel(&self) {
        self.fail(Error::cancelled());
    }

    pub fn cancel_because_of_deallocated_context(&self) {
        self.fail(Error::context_deallocated());
    }

    /// Registers `callback` to run if this promise is released (every
    /// `Promise<T>` clone dropped) without ever completing.
    pub fn notify_drain(&self, callback: impl FnOnce() + Send + 'static) {
        self.producer.drain_callbacks.lock().push(Box::new(callback));
    }

    pub fn is_complete(&self) -> bool {
        matches!(&*self.producer.inner.state.lock(), State::Completed(_))
    }
}

impl<T> Cancellable for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cancel(&self) {
        Promise::cancel(self);
    }
}

impl<T> Dependent for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cancel_because_of_deallocated_context(&self) {
        Promise::cancel_because_of_deallocated_context(self);
    }
}
