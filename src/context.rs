//! `ExecutionContext`: the collaborator identity that owns a default
//! executor and a release pool, and binds dependents (futures/promises) to
//! its own lifetime.

use std::sync::Arc;
use std::sync::Weak;

use dupe::Dupe;

use crate::executor::Executor;
use crate::release_pool::ReleasePool;

/// Something an [`ExecutionContext`] can fail on its owner's behalf when
/// that owner is torn down before the dependent completes. `Promise<T>`
/// implements this.
pub trait Dependent: Send + Sync {
    /// Fails this dependent with `ContextDeallocated`. A no-op if the
    /// dependent has already completed — completion is terminal.
    fn cancel_because_of_deallocated_context(&self);
}

struct Inner {
    executor: Executor,
    release_pool: ReleasePool,
}

/// A collaborator that owns an executor and a release pool, and binds
/// dependent futures to its own lifetime: when the context is destroyed,
/// every still-pending dependent fails with `ContextDeallocated`.
#[derive(Clone, Dupe)]
pub struct ExecutionContext(Arc<Inner>);

/// A non-owning reference to an [`ExecutionContext`]. Callbacks that close
/// over a context must hold it this way and check liveness (`upgrade`)
/// before touching it — holding a context strongly from inside a callback
/// it schedules would keep it alive forever.
#[derive(Clone, Dupe)]
pub struct WeakExecutionContext(Weak<Inner>);

impl ExecutionContext {
    pub fn new(executor: Executor) -> Self {
        ExecutionContext(Arc::new(Inner {
            executor,
            release_pool: ReleasePool::new(),
        }))
    }

    /// This context's default executor for work placement.
    pub fn executor(&self) -> Executor {
        self.0.executor.clone()
    }

    /// The pool used to anchor this context's dependents.
    pub fn release_pool(&self) -> &ReleasePool {
        &self.0.release_pool
    }

    pub fn weak(&self) -> WeakExecutionContext {
        WeakExecutionContext(Arc::downgrade(&self.0))
    }

    /// Registers `dependent` so that, if this context is destroyed before
    /// `dependent` completes, `dependent` fails with `ContextDeallocated`.
    ///
    /// `dependent` is captured strongly by this context's release pool —
    /// the context holds the dependent, never the other way around — and
    /// released when the pool drains. `cancel_because_of_deallocated_context`
    /// is specified to be a no-op once the dependent has already completed,
    /// so holding the capture until the context itself goes away (rather
    /// than eagerly dropping it the moment the dependent completes on its
    /// own) is observably correct, just not maximally eager about memory.
    pub fn add_dependent<D>(&self, dependent: D)
    where
        D: Dependent + 'static,
    {
        let dependent = Arc::new(dependent);
        self.0
            .release_pool
            .notify_drain(move || dependent.cancel_because_of_deallocated_context());
    }
}

impl WeakExecutionContext {
    pub fn upgrade(&self) -> Option<ExecutionContext> {
        self.0.upgrade().map(ExecutionContext)
    }
}
