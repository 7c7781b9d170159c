//! The eight future-constructor factory forms from the component design:
//! {immediate value} x {success, failure, thunk, thunk->Future,
//! thunk(context), thunk(context)->Future, delayed-thunk, delayed-thunk(context)}.

use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::Cancellable;
use crate::cancellation::CancellationToken;
use crate::context::ExecutionContext;
use crate::error::Error;
use crate::executor::Executor;
use crate::fallible::Fallible;
use crate::future::Future;
use crate::future::Promise;

/// An already-completed `Future` wrapping `value`. No handler scheduling
/// cost: registrations against it resolve synchronously.
pub fn from_success<T>(value: T) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    let (promise, future) = Promise::new();
    promise.succeed(value);
    future
}

/// An already-completed `Future` wrapping `err`.
pub fn from_failure<T>(err: Error) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
{
    let (promise, future) = Promise::new();
    promise.fail(err);
    future
}

/// Schedules `thunk` on `executor`; success becomes `succeed`, a raised
/// error or panic becomes `fail`.
pub fn from_thunk<T, F>(executor: Executor, thunk: F) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<T, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();
    executor.execute(move || {
        promise.complete(Fallible::from_result_thunk(thunk));
    });
    future
}

/// Schedules `thunk` on `executor`; `thunk` itself returns a `Future<T>`
/// that is chained into the result.
pub fn from_thunk_flat<T, F>(executor: Executor, thunk: F) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<Future<T>, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();
    executor.execute(move || match thunk() {
        Ok(upstream) => promise.complete_with(upstream),
        Err(e) => promise.fail(Error::user(e)),
    });
    future
}

/// Contextual variant of [`from_thunk`]: weakly captures `context`, fails
/// with `ContextDeallocated` if the context is gone by the time `executor`
/// dispatches the thunk, and registers the resulting future as a dependent
/// of the context.
pub fn from_context_thunk<T, F>(context: &ExecutionContext, executor: Executor, thunk: F) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(ExecutionContext) -> Result<T, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();
    context.add_dependent(promise.clone());

    let weak_context = context.weak();
    executor.execute(move || match weak_context.upgrade() {
        Some(context) => promise.complete(Fallible::from_result_thunk(move || thunk(context))),
        None => promise.fail(Error::context_deallocated()),
    });
    future
}

/// Contextual variant of [`from_thunk_flat`].
pub fn from_context_thunk_flat<T, F>(
    context: &ExecutionContext,
    executor: Executor,
    thunk: F,
) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(ExecutionContext) -> Result<Future<T>, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();
    context.add_dependent(promise.clone());

    let weak_context = context.weak();
    executor.execute(move || match weak_context.upgrade() {
        Some(context) => match thunk(context) {
            Ok(upstream) => promise.complete_with(upstream),
            Err(e) => promise.fail(Error::user(e)),
        },
        None => promise.fail(Error::context_deallocated()),
    });
    future
}

/// Runs `thunk` on `executor` after `delay` elapses. If `token` is given
/// and fires before the timer elapses, the resulting future fails with
/// `Cancelled` and `thunk` never runs.
pub fn after_delay<T, F>(
    executor: Executor,
    delay: Duration,
    token: Option<&CancellationToken>,
    thunk: F,
) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<T, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();

    // The token only weak-references `cancellable`; it must be kept alive
    // (alongside the registration receipt) until the timer fires, or the
    // weak ref goes dangling and a late cancel can no longer reach us.
    let cancellable: Option<Arc<dyn Cancellable>> =
        token.map(|_| Arc::new(promise.clone()) as Arc<dyn Cancellable>);
    let registration = match (&token, &cancellable) {
        (Some(token), Some(cancellable)) => Some(token.add(cancellable)),
        _ => None,
    };

    executor.execute_after(delay, move || {
        let _keep_alive = (registration, cancellable);
        if promise.is_complete() {
            return; // already cancelled
        }
        promise.complete(Fallible::from_result_thunk(thunk));
    });

    future
}

/// Contextual variant of [`after_delay`]: additionally fails with
/// `ContextDeallocated` (instead of running `thunk`) if `context` is gone
/// by the time the timer fires, and registers the resulting future as a
/// dependent of the context.
pub fn after_delay_context<T, F>(
    context: &ExecutionContext,
    executor: Executor,
    delay: Duration,
    token: Option<&CancellationToken>,
    thunk: F,
) -> Future<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(ExecutionContext) -> Result<T, anyhow::Error> + Send + 'static,
{
    let (promise, future) = Promise::new();
    context.add_dependent(promise.clone());

    let cancellable: Option<Arc<dyn Cancellable>> =
        token.map(|_| Arc::new(promise.clone()) as Arc<dyn Cancellable>);
    let registration = match (&token, &cancellable) {
        (Some(token), Some(cancellable)) => Some(token.add(cancellable)),
        _ => None,
    };

    let weak_context = context.weak();
    executor.execute_after(delay, move || {
        let _keep_alive = (registration, cancellable);
        if promise.is_complete() {
            return;
        }
        match weak_context.upgrade() {
            Some(context) => {
                promise.complete(Fallible::from_result_thunk(move || thunk(context)));
            }
            None => promise.fail(Error::context_deallocated()),
        }
    });

    future
}
