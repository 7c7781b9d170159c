//! The public error taxonomy: `Cancelled`, `ContextDeallocated`, and
//! transparently-carried user errors.

use std::fmt;
use std::sync::Arc;

use dupe::Dupe;
use thiserror::Error;

/// A cloneable, `Arc`-backed error. Cloning a completed [`crate::Fallible`]
/// must not re-box or re-allocate the user error payload.
#[derive(Clone, Dupe)]
pub struct Error(Arc<ErrorKind>);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

impl Error {
    pub fn cancelled() -> Self {
        Error(Arc::new(ErrorKind::Cancelled))
    }

    pub fn context_deallocated() -> Self {
        Error(Arc::new(ErrorKind::ContextDeallocated))
    }

    pub fn user(err: anyhow::Error) -> Self {
        Error(Arc::new(ErrorKind::User(err)))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.0, ErrorKind::Cancelled)
    }

    pub fn is_context_deallocated(&self) -> bool {
        matches!(*self.0, ErrorKind::ContextDeallocated)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("cancelled")]
    Cancelled,
    #[error("owning execution context was deallocated")]
    ContextDeallocated,
    #[error(transparent)]
    User(#[from] anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::user(err)
    }
}
