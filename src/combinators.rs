//! Collection combinators: `joined`, `reduce`, `async_map`, `async_flat_map`.
//! Grounded on `futures::stream::FuturesUnordered`/`StreamExt` fan-in usage
//! in `dice/dice/src/impls/incremental/mod.rs`, generalized to this crate's
//! first-failure-wins aggregation over `Future<T>` rather than `poll`-based
//! futures. Accumulators are guarded by the crate's short-critical-section
//! primitive (`locking::CriticalSection`) rather than a bare mutex.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::Error;
use crate::executor::Executor;
use crate::fallible::Fallible;
use crate::future::Future;
use crate::future::FutureHandler;
use crate::future::Promise;
use crate::locking::CriticalSection;

struct GatherState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> GatherState<T> {
    fn new(n: usize) -> Self {
        GatherState {
            slots: (0..n).map(|_| None).collect(),
            remaining: n,
        }
    }

    /// Records `value` at `index`; returns the assembled vector once every
    /// slot has been filled.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        self.slots[index] = Some(value);
        self.remaining -= 1;
        if self.remaining == 0 {
            Some(
                self.slots
                    .iter_mut()
                    .map(|slot| slot.take().expect("every slot filled when remaining hits zero"))
                    .collect(),
            )
        } else {
            None
        }
    }
}

/// Completes when every input succeeds, with results in input order. On the
/// first observed failure, fails the aggregate with that error; remaining
/// successes are ignored (their handlers are dropped along with the
/// per-slot closures once the aggregate completes).
pub fn joined<T>(futures: Vec<Future<T>>) -> Future<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let n = futures.len();
    let (promise, aggregate) = Promise::new();
    if n == 0 {
        promise.succeed(Vec::new());
        return aggregate;
    }

    let state = Arc::new(CriticalSection::new(GatherState::new(n)));

    for (index, future) in futures.into_iter().enumerate() {
        let promise = promise.clone();
        let state = state.clone();
        future
            .make_final_handler(Executor::immediate(), move |value| match value {
                Fallible::Success(v) => {
                    if let Some(collected) = state.locked(|s| s.fill(index, v)) {
                        promise.succeed(collected);
                    }
                }
                Fallible::Failure(e) => promise.fail(e),
            })
            .map(leak);
    }

    aggregate
}

/// `ordered = true`: waits for [`joined`] then folds sequentially on
/// `executor`. `ordered = false`: installs one handler per input on a
/// derived serial executor so the accumulator never needs an explicit
/// lock — the serial executor provides the exclusion.
pub fn reduce<T, A, F>(
    futures: Vec<Future<T>>,
    initial: A,
    executor: Executor,
    ordered: bool,
    combine: F,
) -> Future<A>
where
    T: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(A, T) -> Result<A, anyhow::Error> + Send + Sync + 'static,
{
    if ordered {
        return reduce_ordered(futures, initial, executor, combine);
    }
    reduce_unordered(futures, initial, executor, combine)
}

fn reduce_ordered<T, A, F>(
    futures: Vec<Future<T>>,
    initial: A,
    executor: Executor,
    combine: F,
) -> Future<A>
where
    T: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(A, T) -> Result<A, anyhow::Error> + Send + Sync + 'static,
{
    let all = joined(futures);
    let (promise, aggregate) = Promise::new();
    all.make_final_handler(executor, move |value| match value {
        Fallible::Success(items) => {
            let mut acc = initial;
            for item in items {
                match combine(acc, item) {
                    Ok(next) => acc = next,
                    Err(e) => {
                        promise.fail(Error::user(e));
                        return;
                    }
                }
            }
            promise.succeed(acc);
        }
        Fallible::Failure(e) => promise.fail(e),
    })
    .map(leak);
    aggregate
}

struct ReduceState<A> {
    acc: Option<A>,
    can_continue: bool,
    remaining: usize,
}

fn reduce_unordered<T, A, F>(
    futures: Vec<Future<T>>,
    initial: A,
    executor: Executor,
    combine: F,
) -> Future<A>
where
    T: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(A, T) -> Result<A, anyhow::Error> + Send + Sync + 'static,
{
    let n = futures.len();
    let (promise, aggregate) = Promise::new();
    if n == 0 {
        promise.succeed(initial);
        return aggregate;
    }

    // All folding happens on this single-worker serial executor, so the
    // accumulator and `can_continue` flag are only ever touched from one
    // thread at a time — the "two are equivalent only if the serial
    // executor never re-enters" guarantee holds by construction (one FIFO
    // queue, one concurrent drainer). `CriticalSection` is still used here
    // so the invariant holds even if that guarantee is ever weakened.
    let serial = executor.derived_serial();
    let state = Arc::new(CriticalSection::new(ReduceState {
        acc: Some(initial),
        can_continue: true,
        remaining: n,
    }));
    let combine = Arc::new(combine);

    for future in futures {
        let promise = promise.clone();
        let state = state.clone();
        let combine = combine.clone();
        future
            .make_final_handler(serial.clone(), move |value| {
                let outcome = state.locked(|guard| {
                    if !guard.can_continue {
                        return None;
                    }
                    match value {
                        Fallible::Success(item) => {
                            let acc = guard.acc.take().expect("accumulator present while can_continue");
                            match combine(acc, item) {
                                Ok(next) => {
                                    guard.remaining -= 1;
                                    if guard.remaining == 0 {
                                        guard.can_continue = false;
                                        Some(Ok(next))
                                    } else {
                                        guard.acc = Some(next);
                                        None
                                    }
                                }
                                Err(e) => {
                                    guard.can_continue = false;
                                    Some(Err(Error::user(e)))
                                }
                            }
                        }
                        Fallible::Failure(e) => {
                            guard.can_continue = false;
                            Some(Err(e))
                        }
                    }
                });
                match outcome {
                    Some(Ok(value)) => promise.succeed(value),
                    Some(Err(e)) => promise.fail(e),
                    None => {}
                }
            })
            .map(leak);
    }

    aggregate
}

/// Schedules one task per input on `executor`; each computes `f(item)`. On
/// the first raise the aggregate fails; successes are written into a
/// pre-sized result buffer at their input index.
pub fn async_map<I, T, F>(items: Vec<I>, executor: Executor, f: F) -> Future<Vec<T>>
where
    I: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(I) -> Result<T, anyhow::Error> + Send + Sync + 'static,
{
    let n = items.len();
    let (promise, aggregate) = Promise::new();
    if n == 0 {
        promise.succeed(Vec::new());
        return aggregate;
    }

    let state = Arc::new(CriticalSection::new(GatherState::new(n)));
    let f = Arc::new(f);

    let can_continue = Arc::new(CriticalSection::new(true));
    {
        let can_continue = can_continue.clone();
        promise.notify_drain(move || can_continue.locked(|c| *c = false));
    }

    for (index, item) in items.into_iter().enumerate() {
        let promise = promise.clone();
        let state = state.clone();
        let f = f.clone();
        let can_continue = can_continue.clone();
        executor.execute(move || {
            if !can_continue.locked(|c| *c) {
                return; // aggregate abandoned; elide remaining transforms
            }
            match f(item) {
                Ok(value) => {
                    if let Some(collected) = state.locked(|s| s.fill(index, value)) {
                        promise.succeed(collected);
                    }
                }
                Err(e) => promise.fail(Error::user(e)),
            }
        });
    }

    aggregate
}

/// Schedules one task per input that invokes `f(item) -> Future<T>`;
/// registers a handler on each produced future to fold into the result
/// buffer at its input index. Completion condition identical to
/// [`async_map`].
pub fn async_flat_map<I, T, F>(items: Vec<I>, executor: Executor, f: F) -> Future<Vec<T>>
where
    I: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(I) -> Future<T> + Send + Sync + 'static,
{
    let n = items.len();
    let (promise, aggregate) = Promise::new();
    if n == 0 {
        promise.succeed(Vec::new());
        return aggregate;
    }

    let state = Arc::new(CriticalSection::new(GatherState::new(n)));
    let f = Arc::new(f);

    let can_continue = Arc::new(CriticalSection::new(true));
    {
        let can_continue = can_continue.clone();
        promise.notify_drain(move || can_continue.locked(|c| *c = false));
    }

    for (index, item) in items.into_iter().enumerate() {
        let promise = promise.clone();
        let state = state.clone();
        let f = f.clone();
        let can_continue = can_continue.clone();
        executor.execute(move || {
            if !can_continue.locked(|c| *c) {
                return; // aggregate abandoned; elide remaining transforms
            }
            let produced = f(item);
            let promise = promise.clone();
            let state = state.clone();
            produced
                .make_final_handler(Executor::immediate(), move |value| match value {
                    Fallible::Success(v) => {
                        if let Some(collected) = state.locked(|s| s.fill(index, v)) {
                            promise.succeed(collected);
                        }
                    }
                    Fallible::Failure(e) => promise.fail(e),
                })
                .map(leak);
        });
    }

    aggregate
}

/// Contextual variant of [`async_map`]: weakly captures `context`, fails
/// the aggregate with `ContextDeallocated` if the context is gone at
/// dispatch, and registers the aggregate as a dependent of the context so
/// context destruction fails any still-pending aggregate.
pub fn async_map_context<I, T, F>(
    context: &ExecutionContext,
    items: Vec<I>,
    executor: Executor,
    f: F,
) -> Future<Vec<T>>
where
    I: Send + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(ExecutionContext, I) -> Result<T, anyhow::Error> + Send + Sync + 'static,
{
    let weak_context = context.weak();
    let inner = async_map(items, executor, move |item| {
        let context = weak_context
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("context deallocated"))?;
        f(context, item)
    });

    // Wrap in a fresh promise anchored to the context: if the context is
    // destroyed before `inner` completes, this promise fails with
    // `ContextDeallocated` instead; if `inner` completes first, the
    // anchor's eventual cancel is a no-op (completion is terminal).
    let (promise, aggregate) = Promise::new();
    context.add_dependent(promise.clone());
    promise.complete_with(inner);
    aggregate
}

fn leak<T>(handler: FutureHandler<T>) {
    std::mem::forget(handler);
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::future::constructors::from_failure;
    use crate::future::constructors::from_success;

    #[test]
    fn joined_empty_succeeds_immediately() {
        let f: Future<Vec<i32>> = joined(Vec::new());
        assert_matches!(f.wait(), Fallible::Success(v) if v.is_empty());
    }

    #[test]
    fn joined_preserves_order_on_success() {
        let futures = vec![from_success(1), from_success(2), from_success(3)];
        let f = joined(futures);
        assert_matches!(f.wait(), Fallible::Success(v) if v == vec![1, 2, 3]);
    }

    #[test]
    fn joined_fails_with_first_observed_failure() {
        let futures = vec![
            from_success(1),
            from_failure(Error::user(anyhow::anyhow!("E"))),
            from_success(3),
        ];
        let f = joined(futures);
        let result = f.wait();
        assert!(result.is_failure());
    }

    #[test]
    fn reduce_ordered_sums_in_order() {
        let futures = vec![from_success(1), from_success(2), from_success(3)];
        let f = reduce(futures, 0, Executor::immediate(), true, |acc, v| Ok(acc + v));
        assert_matches!(f.wait(), Fallible::Success(6));
    }

    #[test]
    fn reduce_unordered_sums_regardless_of_arrival_order() {
        let futures = vec![from_success(1), from_success(2), from_success(3)];
        let f = reduce(
            futures,
            0,
            Executor::default_qos(),
            false,
            |acc, v| Ok(acc + v),
        );
        assert_matches!(f.wait(), Fallible::Success(6));
    }

    #[test]
    fn reduce_unordered_fails_on_first_observed_failure() {
        let futures = vec![
            from_success(1),
            from_failure(Error::user(anyhow::anyhow!("E"))),
            from_success(3),
        ];
        let f = reduce(
            futures,
            0,
            Executor::default_qos(),
            false,
            |acc, v| Ok(acc + v),
        );
        assert!(f.wait().is_failure());
    }

    #[test]
    fn async_map_empty_succeeds_immediately() {
        let f: Future<Vec<i32>> = async_map(Vec::new(), Executor::immediate(), |x: i32| Ok(x));
        assert_matches!(f.wait(), Fallible::Success(v) if v.is_empty());
    }

    #[test]
    fn async_map_preserves_index_order() {
        let items = vec![1, 2, 3, 4];
        let f = async_map(items, Executor::immediate(), |x| Ok(x * 10));
        assert_matches!(f.wait(), Fallible::Success(v) if v == vec![10, 20, 30, 40]);
    }

    #[test]
    fn async_map_first_failure_wins() {
        let items = vec![1, 2, 3];
        let f: Future<Vec<i32>> = async_map(items, Executor::immediate(), |x| {
            if x == 2 {
                Err(anyhow::anyhow!("bad"))
            } else {
                Ok(x)
            }
        });
        assert!(f.wait().is_failure());
    }

    #[test]
    fn async_flat_map_preserves_index_order() {
        let items = vec![1, 2, 3];
        let f = async_flat_map(items, Executor::immediate(), |x| from_success(x * 2));
        assert_matches!(f.wait(), Fallible::Success(v) if v == vec![2, 4, 6]);
    }

    #[test]
    fn async_map_context_fails_when_context_gone() {
        let context = crate::context::ExecutionContext::new(Executor::immediate());
        let weak = context.weak();
        drop(context);
        assert!(weak.upgrade().is_none());
    }
}
