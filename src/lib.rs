//! Composable async primitives: one-shot futures/promises, cancellation,
//! execution contexts, a single-flight cache, and fan-out/fan-in collection
//! combinators, all built on a callback-based handler protocol rather than
//! `std::future::Future`'s `poll`. Scheduling happens only at executor
//! boundaries — callbacks run to completion once dispatched, with no
//! cooperative suspension inside them.

mod cached;
mod cancellation;
mod combinators;
mod context;
mod error;
mod executor;
mod fallible;
pub mod future;
mod locking;
mod release_pool;

pub use cached::CachedValue;
pub use cancellation::Cancellable;
pub use cancellation::CancellationRegistration;
pub use cancellation::CancellationToken;
pub use combinators::async_flat_map;
pub use combinators::async_map;
pub use combinators::async_map_context;
pub use combinators::joined;
pub use combinators::reduce;
pub use context::Dependent;
pub use context::ExecutionContext;
pub use context::WeakExecutionContext;
pub use error::Error;
pub use error::ErrorKind;
pub use executor::Executor;
pub use fallible::Fallible;
pub use future::constructors::after_delay;
pub use future::constructors::after_delay_context;
pub use future::constructors::from_context_thunk;
pub use future::constructors::from_context_thunk_flat;
pub use future::constructors::from_failure;
pub use future::constructors::from_success;
pub use future::constructors::from_thunk;
pub use future::constructors::from_thunk_flat;
pub use future::Future;
pub use future::FutureHandler;
pub use future::Promise;
pub use release_pool::DrainRegistration;
pub use release_pool::ReleasePool;
