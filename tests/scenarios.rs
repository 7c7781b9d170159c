//! End-to-end scenarios matching the concrete examples in the component
//! design: cache identity/invalidation, joined failure semantics, unordered
//! reduce, and contextual futures surviving (or not) their context's drop.

use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use skein::after_delay_context;
use skein::from_thunk;
use skein::joined;
use skein::reduce;
use skein::CachedValue;
use skein::Error;
use skein::ExecutionContext;
use skein::Executor;
use skein::Fallible;
use skein::Future;

#[test]
fn single_shot_cache_success_shares_identity() {
    let context = ExecutionContext::new(Executor::background());
    let cache = CachedValue::new(&context, |_ctx| {
        from_thunk(Executor::background(), || {
            std::thread::sleep(Duration::from_millis(50));
            Ok(7)
        })
    });

    let future_a = cache.value();
    assert_matches!(future_a.wait(), Fallible::Success(7));

    let future_b = cache.value();
    assert_matches!(future_b.wait(), Fallible::Success(7));
}

#[test]
fn single_shot_cache_failure_shares_identity() {
    let context = ExecutionContext::new(Executor::immediate());
    let cache = CachedValue::<i32>::new(&context, |_ctx| {
        from_thunk(Executor::immediate(), || Err(anyhow::anyhow!("test code")))
    });

    let future_a = cache.value();
    assert!(future_a.wait().is_failure());

    let future_b = cache.value();
    assert!(future_b.wait().is_failure());
}

#[test]
fn multi_use_cache_recomputes_only_after_invalidate() {
    let context = ExecutionContext::new(Executor::immediate());
    let cell = Arc::new(AtomicI32::new(1));

    let c = cell.clone();
    let cache = CachedValue::new(&context, move |_ctx| {
        let c = c.clone();
        from_thunk(Executor::immediate(), move || Ok(c.load(Ordering::SeqCst)))
    });

    let first = cache.value();
    assert_matches!(first.wait(), Fallible::Success(1));

    cell.store(2, Ordering::SeqCst);
    cache.invalidate();

    let second = cache.value();
    assert_matches!(second.wait(), Fallible::Success(2));
}

#[test]
fn joined_fails_with_first_observed_error_regardless_of_order() {
    let (p1, f1) = skein::Promise::<i32>::new();
    let (p2, f2) = skein::Promise::<i32>::new();
    let (p3, f3) = skein::Promise::<i32>::new();

    let aggregate: Future<Vec<i32>> = joined(vec![f1, f2, f3]);

    p2.fail(Error::user(anyhow::anyhow!("E")));
    p1.succeed(1);
    p3.succeed(3);

    assert!(aggregate.wait().is_failure());
}

#[test]
fn unordered_reduce_is_deterministic_despite_arrival_order() {
    let (p1, f1) = skein::Promise::<i32>::new();
    let (p2, f2) = skein::Promise::<i32>::new();
    let (p3, f3) = skein::Promise::<i32>::new();

    let aggregate = reduce(
        vec![f1, f2, f3],
        0,
        Executor::default_qos(),
        false,
        |acc, v| Ok(acc + v),
    );

    // Complete out of submission order.
    p3.succeed(3);
    p1.succeed(1);
    p2.succeed(2);

    assert_matches!(aggregate.wait(), Fallible::Success(6));
}

#[test]
fn contextual_future_fails_after_context_drop_without_running_thunk() {
    let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let context = ExecutionContext::new(Executor::immediate());

    let r = ran.clone();
    let f: Future<i32> = after_delay_context(
        &context,
        Executor::background(),
        Duration::from_millis(500),
        None,
        move |_ctx| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        },
    );

    drop(context);

    let result = f
        .wait_timeout(Duration::from_secs(2))
        .expect("future completed");
    assert!(result.is_failure());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
