//! Promise/A+ deferred results for rust.
//!
//! A [`Promise`] is a single-assignment slot settled through the [`Resolver`]
//! handed to its initializer. Consumers chain onto it with [`Promise::then`],
//! and every handler's return value goes through the thenable resolution
//! procedure, so promises from this crate, foreign [`Thenable`]s and plain
//! values all compose the same way.
//!
//! Handlers never run on the caller's stack: they are queued on an injected
//! [`Scheduler`], either a [`TaskQueue`] you drain yourself or a
//! [`ThreadScheduler`] worker.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{Error, Outcome, Promise, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let promise = Promise::<i32, Error>::new(queue.scheduler(), |resolver| {
//!     resolver.resolve(20);
//!     Ok(())
//! });
//! let doubled = promise
//!     .and_then(|value| Ok(Outcome::Value(value * 2)))
//!     .catch(|_| Ok(Outcome::Value(0)));
//!
//! queue.run_until_idle();
//! assert_eq!(doubled.peek(), Some(Ok(40)));
//! ```
mod promise;
mod resolution;
pub mod scheduler;
mod settled;
pub mod thread;

pub use promise::{Handler, Promise, Resolver, Status};
pub use resolution::{FnThenable, OnFulfilled, OnRejected, Outcome, ThenFn, ThenMember, Thenable};
pub use scheduler::{Scheduler, SchedulerRef, Task, TaskQueue};
pub use settled::Settled;
pub use thread::ThreadScheduler;

/// Errors the engine raises on its own. Reason types receive them through
/// `From<Error>`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("chaining cycle detected for promise")]
    ChainingCycle,
    #[error("promise was dropped before it settled")]
    Abandoned,
    #[error("{0}")]
    Reason(String),
}

impl Error {
    pub fn reason(message: impl Into<String>) -> Self {
        Error::Reason(message.into())
    }
}

/// Anything a promise can be fulfilled with.
pub trait PromiseValue: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> PromiseValue for T {}

/// Anything a promise can be rejected with.
pub trait PromiseReason: Clone + Send + From<Error> + 'static {}

impl<E: Clone + Send + From<Error> + 'static> PromiseReason for E {}
