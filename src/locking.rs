//! A short critical-section primitive. Not part of the public API: used
//! wherever the spec calls for a brief lock around an accumulator or
//! registry that isn't already serialized by a derived-serial executor.

use parking_lot::Mutex;

pub(crate) struct CriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> CriticalSection<T> {
    pub(crate) fn new(value: T) -> Self {
        CriticalSection {
            inner: Mutex::new(value),
        }
    }

    /// Runs `f` with the lock held, then releases it. `f` must be short:
    /// no executor submissions or handler callbacks may run while the lock
    /// is held.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_mutates_and_returns() {
        let cs = CriticalSection::new(0);
        let r = cs.locked(|v| {
            *v += 1;
            *v
        });
        assert_eq!(r, 1);
        cs.locked(|v| assert_eq!(*v, 1));
    }
}
