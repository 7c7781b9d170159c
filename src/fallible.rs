//! `Fallible<T>`: the tagged success/failure variant that every `Future<T>`
//! eventually resolves to.

use std::panic::AssertUnwindSafe;
use std::panic::UnwindSafe;

use crate::error::Error;

/// Either a successfully produced `T`, or the [`Error`] that prevented it.
#[derive(Clone, Debug)]
pub enum Fallible<T> {
    Success(T),
    Failure(Error),
}

impl<T> Fallible<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Fallible::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Fallible::Failure(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Fallible::Success(v) => Some(v),
            Fallible::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Error> {
        match self {
            Fallible::Success(_) => None,
            Fallible::Failure(e) => Some(e),
        }
    }

    /// Raises on `Failure`, otherwise returns the success value. Named after
    /// the source's `liftSuccess`.
    pub fn lift_success(self) -> Result<T, Error> {
        match self {
            Fallible::Success(v) => Ok(v),
            Fallible::Failure(e) => Err(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fallible<U> {
        match self {
            Fallible::Success(v) => Fallible::Success(f(v)),
            Fallible::Failure(e) => Fallible::Failure(e),
        }
    }

    pub fn flat_map<U>(self, f: impl FnOnce(T) -> Fallible<U>) -> Fallible<U> {
        match self {
            Fallible::Success(v) => f(v),
            Fallible::Failure(e) => Fallible::Failure(e),
        }
    }

    /// Captures any raise from `thunk` into `Failure(e)`. No raised
    /// condition ever escapes this call.
    pub fn from_thunk(thunk: impl FnOnce() -> T + UnwindSafe) -> Fallible<T> {
        match std::panic::catch_unwind(thunk) {
            Ok(v) => Fallible::Success(v),
            Err(payload) => Fallible::Failure(Error::user(anyhow::anyhow!(
                "{}",
                panic_message(&payload)
            ))),
        }
    }

    /// As [`Fallible::from_thunk`], but for a `thunk` returning
    /// `Result<T, anyhow::Error>` rather than raising; the common case for
    /// fallible user code. `thunk` need not itself be `UnwindSafe` — the
    /// catch boundary is asserted explicitly, same as `anyhow`'s own
    /// `catch_unwind` helpers.
    pub fn from_result_thunk(thunk: impl FnOnce() -> Result<T, anyhow::Error>) -> Fallible<T> {
        match std::panic::catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(Ok(v)) => Fallible::Success(v),
            Ok(Err(e)) => Fallible::Failure(Error::user(e)),
            Err(payload) => Fallible::Failure(Error::user(anyhow::anyhow!(
                "{}",
                panic_message(&payload)
            ))),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "thunk panicked with a non-string payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_flat_map_short_circuit_on_failure() {
        let f: Fallible<i32> = Fallible::Failure(Error::cancelled());
        assert!(f.clone().map(|v| v + 1).is_failure());
        assert!(f.flat_map(|v| Fallible::Success(v + 1)).is_failure());
    }

    #[test]
    fn from_thunk_captures_panic() {
        let f: Fallible<i32> = Fallible::from_thunk(|| panic!("kaboom"));
        assert!(f.is_failure());
    }

    #[test]
    fn from_thunk_success() {
        let f: Fallible<i32> = Fallible::from_thunk(|| 1 + 1);
        assert_eq!(f.success(), Some(2));
    }
}
