//! The thenable resolution procedure.
//!
//! Whatever a handler returns is an [`Outcome`]: a plain value, a promise of
//! this crate, or a foreign [`Thenable`]. [`resolve`] decides the derived
//! promise's fate from it, adopting promises and thenables recursively.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::promise::{Callback, Promise};
use crate::{Error, PromiseReason, PromiseValue};

/// What a handler hands back to the derived promise.
pub enum Outcome<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Outcome<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E>) -> Self {
        Outcome::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Outcome<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Outcome::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Outcome::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Outcome::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// A foreign value that may expose a `then` member.
///
/// `read_then` consumes the thenable, so its `then` member is read exactly once.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Outcome, Promise, TaskQueue, ThenMember, Thenable};
///
/// /// An object whose `then` is not callable is just a value.
/// struct Plain(i32);
///
/// impl Thenable<i32, Error> for Plain {
///     fn read_then(self: Box<Self>) -> Result<ThenMember<i32, Error>, Error> {
///         Ok(ThenMember::Plain(self.0))
///     }
/// }
///
/// let queue = TaskQueue::new();
/// let promise = Promise::<i32, Error>::resolved(queue.scheduler(), 0)
///     .and_then(|_| Ok(Outcome::thenable(Plain(3))));
/// queue.run_until_idle();
/// assert_eq!(promise.peek(), Some(Ok(3)));
/// ```
pub trait Thenable<T, E>: Send + 'static {
    /// Read the `then` member. `Err` means reading it failed.
    fn read_then(self: Box<Self>) -> Result<ThenMember<T, E>, E>;

    /// A promise of this crate hiding behind the thenable, if any. Such a
    /// promise is adopted directly instead of through its `then` member.
    fn as_promise(&self) -> Option<Promise<T, E>> {
        None
    }
}

pub enum ThenMember<T, E> {
    /// A callable `then`, with the receiver already bound.
    Callable(ThenFn<T, E>),
    /// `then` is not callable; the thenable is a plain value.
    Plain(T),
}

pub type ThenFn<T, E> = Box<dyn FnOnce(OnFulfilled<T, E>, OnRejected<E>) -> Result<(), E> + Send>;

/// Fulfillment callback handed to a foreign `then`. May be cloned and called
/// any number of times; only the first call on either callback counts.
pub struct OnFulfilled<T, E>(Arc<dyn Fn(Outcome<T, E>) + Send + Sync>);

/// Rejection callback handed to a foreign `then`.
pub struct OnRejected<E>(Arc<dyn Fn(E) + Send + Sync>);

impl<T, E> OnFulfilled<T, E> {
    pub fn call(&self, outcome: Outcome<T, E>) {
        (self.0)(outcome)
    }

    pub fn fulfill(&self, value: T) {
        self.call(Outcome::Value(value))
    }
}

impl<E> OnRejected<E> {
    pub fn call(&self, reason: E) {
        (self.0)(reason)
    }
}

impl<T, E> Clone for OnFulfilled<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E> Clone for OnRejected<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// A foreign thenable backed by a closure acting as its `then` member.
pub struct FnThenable<F>(F);

impl<F> FnThenable<F> {
    pub fn new<T, E>(then: F) -> Self
    where
        F: FnOnce(OnFulfilled<T, E>, OnRejected<E>) -> Result<(), E> + Send + 'static,
    {
        FnThenable(then)
    }
}

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: FnOnce(OnFulfilled<T, E>, OnRejected<E>) -> Result<(), E> + Send + 'static,
{
    fn read_then(self: Box<Self>) -> Result<ThenMember<T, E>, E> {
        Ok(ThenMember::Callable(Box::new(self.0)))
    }
}

impl<T: PromiseValue, E: PromiseReason> Thenable<T, E> for Promise<T, E> {
    fn read_then(self: Box<Self>) -> Result<ThenMember<T, E>, E> {
        Ok(ThenMember::Callable(Box::new(
            move |on_fulfilled: OnFulfilled<T, E>, on_rejected: OnRejected<E>| {
                self.subscribe(
                    Box::new(move |value| on_fulfilled.fulfill(value)),
                    Box::new(move |reason| on_rejected.call(reason)),
                );
                Ok(())
            },
        )))
    }

    fn as_promise(&self) -> Option<Promise<T, E>> {
        Some(self.clone())
    }
}

/// One-shot flag; `trip` returns true for the first caller only.
#[derive(Clone, Default)]
pub(crate) struct Latch(Arc<AtomicBool>);

impl Latch {
    pub(crate) fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Settle `derived` from `outcome`.
pub(crate) fn resolve<T: PromiseValue, E: PromiseReason>(
    derived: &Promise<T, E>,
    outcome: Outcome<T, E>,
) {
    match outcome {
        Outcome::Value(value) => derived.fulfill(value),
        Outcome::Promise(source) if source.ptr_eq(derived) => {
            debug!(promise = derived.id(), "chaining cycle detected");
            derived.reject(Error::ChainingCycle.into());
        }
        Outcome::Promise(source) => adopt_promise(derived, &source),
        Outcome::Thenable(thenable) => match thenable.as_promise() {
            Some(source) => resolve(derived, Outcome::Promise(source)),
            None => adopt_thenable(derived, thenable),
        },
    }
}

fn adopt_promise<T: PromiseValue, E: PromiseReason>(
    derived: &Promise<T, E>,
    source: &Promise<T, E>,
) {
    trace!(promise = derived.id(), source = source.id(), "adopting promise");
    match source.peek() {
        Some(Ok(value)) => derived.fulfill(value),
        Some(Err(reason)) => derived.reject(reason),
        None => {
            // Still pending: the source may itself be following another
            // promise, so its eventual value goes back through `resolve`.
            let on_fulfilled: Callback<T> = {
                let derived = derived.clone();
                Box::new(move |value| resolve(&derived, Outcome::Value(value)))
            };
            let on_rejected: Callback<E> = {
                let derived = derived.clone();
                Box::new(move |reason| derived.reject(reason))
            };
            source.subscribe(on_fulfilled, on_rejected);
        }
    }
}

fn adopt_thenable<T: PromiseValue, E: PromiseReason>(
    derived: &Promise<T, E>,
    thenable: Box<dyn Thenable<T, E>>,
) {
    let then = match thenable.read_then() {
        Ok(ThenMember::Callable(then)) => then,
        Ok(ThenMember::Plain(value)) => {
            derived.fulfill(value);
            return;
        }
        Err(reason) => {
            debug!(promise = derived.id(), "reading then failed");
            derived.reject(reason);
            return;
        }
    };

    let settled = Latch::default();
    let on_fulfilled = OnFulfilled(Arc::new({
        let (derived, settled) = (derived.clone(), settled.clone());
        move |outcome| {
            if settled.trip() {
                resolve(&derived, outcome);
            } else {
                trace!(promise = derived.id(), "thenable fulfilled after settling");
            }
        }
    }));
    let on_rejected = OnRejected(Arc::new({
        let (derived, settled) = (derived.clone(), settled.clone());
        move |reason| {
            if settled.trip() {
                derived.reject(reason);
            } else {
                trace!(promise = derived.id(), "thenable rejected after settling");
            }
        }
    }));

    if let Err(reason) = then(on_fulfilled, on_rejected) {
        if settled.trip() {
            debug!(promise = derived.id(), "thenable raised");
            derived.reject(reason);
        } else {
            trace!(promise = derived.id(), "thenable raised after settling");
        }
    }
}
