//! A scoped lifetime anchor: items inserted into a [`ReleasePool`] are
//! released together when the pool drains (normally when its owner is
//! dropped). Handlers are typically anchored here or in an
//! [`crate::ExecutionContext`]'s own pool.

use std::any::Any;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use slab::Slab;

type AnyItem = Box<dyn Any + Send>;
type DrainCallback = Box<dyn FnOnce() + Send>;

struct State {
    items: Slab<AnyItem>,
    callbacks: Vec<DrainCallback>,
    cancellable_callbacks: Slab<DrainCallback>,
}

/// Owns a bag of items and a set of drain callbacks; drains exactly once,
/// on `Drop`. Deliberately not `Clone`/`Dupe`: the backing state is shared
/// via `Arc` only so a [`DrainRegistration`] can reach back into the pool
/// that produced it through a `Weak` handle — a second strong owner able to
/// drop and drain the pool out from under the first would defeat the
/// "drains when its single owner goes away" contract this type exists for.
pub struct ReleasePool {
    state: Arc<Mutex<Option<State>>>,
}

impl Default for ReleasePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleasePool {
    pub fn new() -> Self {
        ReleasePool {
            state: Arc::new(Mutex::new(Some(State {
                items: Slab::new(),
                callbacks: Vec::new(),
                cancellable_callbacks: Slab::new(),
            }))),
        }
    }

    /// Anchors `item` in this pool. If the pool has already drained, `item`
    /// is released immediately instead (dropped at the end of this call).
    pub fn insert<T: Send + 'static>(&self, item: T) {
        let mut guard = self.state.lock();
        if let Some(state) = guard.as_mut() {
            state.items.insert(Box::new(item));
        }
        // else: guard drops `item` at end of scope — released immediately.
    }

    /// Registers `callback` to run when the pool drains. If the pool has
    /// already drained, `callback` runs immediately, inline, before this
    /// call returns. There is no way to deregister a plain drain callback;
    /// see [`ReleasePool::notify_drain_cancellable`] for one.
    pub fn notify_drain(&self, callback: impl FnOnce() + Send + 'static) {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) => state.callbacks.push(Box::new(callback)),
            None => {
                drop(guard);
                callback();
            }
        }
    }

    /// As [`ReleasePool::notify_drain`], but returns a receipt that removes
    /// the callback if dropped before the pool drains.
    pub fn notify_drain_cancellable(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> DrainRegistration {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) => {
                let key = state.cancellable_callbacks.insert(Box::new(callback));
                drop(guard);
                DrainRegistration {
                    state: Some(Arc::downgrade(&self.state)),
                    key,
                }
            }
            None => {
                drop(guard);
                callback();
                DrainRegistration {
                    state: None,
                    key: 0,
                }
            }
        }
    }

    /// Releases every held item and runs every drain callback. Idempotent:
    /// a second call is a no-op. Called automatically on `Drop`.
    pub fn drain(&self) {
        let state = self.state.lock().take();
        if let Some(state) = state {
            tracing::trace!(items = state.items.len(), "release pool draining");
            drop(state.items);
            for callback in state.callbacks {
                callback();
            }
            for (_, callback) in state.cancellable_callbacks {
                callback();
            }
        }
    }
}

impl Drop for ReleasePool {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Receipt for a cancellable drain callback. Dropping it before the pool
/// drains removes the callback; dropping it after is a no-op.
pub struct DrainRegistration {
    state: Option<Weak<Mutex<Option<State>>>>,
    key: usize,
}

impl Drop for DrainRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.as_ref().and_then(Weak::upgrade) {
            let mut guard = state.lock();
            if let Some(state) = guard.as_mut() {
                if state.cancellable_callbacks.contains(self.key) {
                    state.cancellable_callbacks.remove(self.key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc as StdArc;

    use super::*;

    #[test]
    fn drain_runs_callbacks_exactly_once() {
        let pool = ReleasePool::new();
        let hits = StdArc::new(AtomicUsize::new(0));
        let h = hits.clone();
        pool.notify_drain(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        pool.drain();
        pool.drain();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insert_after_drain_releases_immediately() {
        let pool = ReleasePool::new();
        pool.drain();

        let dropped = StdArc::new(AtomicUsize::new(0));
        struct DropSignal(StdArc<AtomicUsize>);
        impl Drop for DropSignal {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        pool.insert(DropSignal(dropped.clone()));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_drain_after_drain_runs_inline() {
        let pool = ReleasePool::new();
        pool.drain();

        let hits = StdArc::new(AtomicUsize::new(0));
        let h = hits.clone();
        pool.notify_drain(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_drains_pool() {
        let hits = StdArc::new(AtomicUsize::new(0));
        {
            let pool = ReleasePool::new();
            let h = hits.clone();
            pool.notify_drain(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_cancellable_registration_removes_callback() {
        let pool = ReleasePool::new();
        let hits = StdArc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let reg = pool.notify_drain_cancellable(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        drop(reg);
        pool.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancellable_registration_fires_if_not_dropped() {
        let pool = ReleasePool::new();
        let hits = StdArc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let reg = pool.notify_drain_cancellable(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        pool.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        drop(reg);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
