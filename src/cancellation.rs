//! Fan-out cancellation: a [`CancellationToken`] holds a weak set of
//! [`Cancellable`] registrants and cancels all of them, synchronously, the
//! moment it fires.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dupe::Dupe;
use parking_lot::Mutex;
use slab::Slab;

/// Anything that can be told to cancel. `Promise<T>` implements this (as
/// `fail(Cancelled)`); so does any other collaborator that wants to observe
/// a shared cancellation signal.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

struct Inner {
    cancelled: AtomicBool,
    registry: Mutex<Slab<Weak<dyn Cancellable>>>,
}

/// A shared, cloneable cancellation signal.
#[derive(Clone, Dupe)]
pub struct CancellationToken(Arc<Inner>);

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            registry: Mutex::new(Slab::new()),
        }))
    }

    /// Weak-registers `cancellable`. If the token has already fired,
    /// `cancellable.cancel()` is invoked immediately, synchronously, before
    /// this call returns, and no registration is kept.
    pub fn add(&self, cancellable: &Arc<dyn Cancellable>) -> CancellationRegistration {
        if self.0.cancelled.load(Ordering::Acquire) {
            cancellable.cancel();
            return CancellationRegistration::inert();
        }

        let mut registry = self.0.registry.lock();
        // Re-check under the lock: `cancel()` may have raced us here.
        if self.0.cancelled.load(Ordering::Acquire) {
            drop(registry);
            cancellable.cancel();
            return CancellationRegistration::inert();
        }
        let key = registry.insert(Arc::downgrade(cancellable));
        drop(registry);

        CancellationRegistration {
            token: Some(self.0.clone()),
            key,
        }
    }

    /// Idempotent. Flips state to cancelled and synchronously calls
    /// `cancel()` on every currently-registered `Cancellable`, with the
    /// registry lock released before any callback runs.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return; // already cancelled
        }

        tracing::debug!("cancellation token fired");
        let drained = std::mem::take(&mut *self.0.registry.lock());
        for (_, weak) in drained {
            if let Some(cancellable) = weak.upgrade() {
                cancellable.cancel();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }
}

/// The receipt returned by [`CancellationToken::add`]. Dropping it
/// deregisters the callback; holding it alive keeps the weak registration
/// reachable through the token (the strong owner is whoever holds the
/// `Arc<dyn Cancellable>` passed to `add`, not this receipt).
pub struct CancellationRegistration {
    token: Option<Arc<Inner>>,
    key: usize,
}

impl CancellationRegistration {
    fn inert() -> Self {
        CancellationRegistration {
            token: None,
            key: 0,
        }
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let Some(token) = &self.token {
            let mut registry = token.registry.lock();
            if registry.contains(self.key) {
                registry.remove(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Counter(Arc<AtomicUsize>);
    impl Cancellable for Counter {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_registered_cancellables_exactly_once() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let c: Arc<dyn Cancellable> = Arc::new(Counter(hits.clone()));
        let _reg = token.add(&c);

        token.cancel();
        token.cancel(); // idempotent

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_after_cancel_cancels_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let c: Arc<dyn Cancellable> = Arc::new(Counter(hits.clone()));
        let _reg = token.add(&c);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_registration_deregisters() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let c: Arc<dyn Cancellable> = Arc::new(Counter(hits));
        let reg = token.add(&c);
        drop(reg);
        drop(c);

        // No live registrants left; cancel() should not panic on dead weak refs.
        token.cancel();
        assert!(token.is_cancelled());
    }
}
