use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::resolution::{self, Latch, Outcome};
use crate::scheduler::SchedulerRef;
use crate::{PromiseReason, PromiseValue};

/// A continuation passed to [`Promise::then`]. Returning `Err` rejects the
/// derived promise; returning `Ok` resolves it with the outcome.
pub type Handler<A, T, E> = Box<dyn FnOnce(A) -> Result<Outcome<T, E>, E> + Send>;

pub(crate) type Callback<A> = Box<dyn FnOnce(A) + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

/// A single-assignment deferred result. Cloning yields another handle to the
/// same instance.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Outcome, Promise, Status, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let (resolver, promise) = Promise::<&str, Error>::deferred(queue.scheduler());
/// let shouted = promise.and_then(|word| {
///     Ok(Outcome::Value(if word == "hi" { "HI" } else { word }))
/// });
///
/// resolver.resolve("hi");
/// assert_eq!(promise.status(), Status::Fulfilled);
/// // Handlers wait for the scheduler.
/// assert_eq!(shouted.status(), Status::Pending);
///
/// queue.run_until_idle();
/// assert_eq!(shouted.peek(), Some(Ok("HI")));
/// ```
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    id: u64,
    scheduler: SchedulerRef,
    inner: Mutex<Inner<T, E>>,
}

struct Inner<T, E> {
    settled: Option<Result<T, E>>,
    on_fulfilled: Vec<Callback<T>>,
    on_rejected: Vec<Callback<E>>,
}

impl<T, E> Inner<T, E> {
    fn status(&self) -> Status {
        match self.settled {
            None => Status::Pending,
            Some(Ok(_)) => Status::Fulfilled,
            Some(Err(_)) => Status::Rejected,
        }
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("status", &self.shared.inner.lock().status())
            .finish()
    }
}

impl<T: PromiseValue, E: PromiseReason> Promise<T, E> {
    /// Run `initializer` right away with the resolver of a fresh promise.
    ///
    /// An `Err` from the initializer rejects the promise, unless the resolver
    /// was already used.
    pub fn new<F>(scheduler: SchedulerRef, initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (resolver, promise) = Self::deferred(scheduler);
        if let Err(reason) = initializer(resolver.clone()) {
            trace!(promise = promise.id(), "initializer failed");
            resolver.reject(reason);
        }
        promise
    }

    /// A pending promise together with its resolver.
    pub fn deferred(scheduler: SchedulerRef) -> (Resolver<T, E>, Self) {
        let promise = Self::pending(scheduler);
        (Resolver::new(promise.clone()), promise)
    }

    pub fn resolved(scheduler: SchedulerRef, value: T) -> Self {
        let promise = Self::pending(scheduler);
        promise.fulfill(value);
        promise
    }

    pub fn rejected(scheduler: SchedulerRef, reason: E) -> Self {
        let promise = Self::pending(scheduler);
        promise.reject(reason);
        promise
    }

    pub(crate) fn pending(scheduler: SchedulerRef) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                scheduler,
                inner: Mutex::new(Inner {
                    settled: None,
                    on_fulfilled: vec![],
                    on_rejected: vec![],
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn status(&self) -> Status {
        self.shared.inner.lock().status()
    }

    /// The settled value or reason, if any.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.shared.inner.lock().settled.clone()
    }

    pub fn scheduler(&self) -> &SchedulerRef {
        &self.shared.scheduler
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Derive a new promise from this one's settlement.
    ///
    /// A missing handler passes the value or reason through unchanged. Handlers
    /// always run on a scheduler task, never inside this call.
    pub fn then(
        &self,
        on_fulfilled: Option<Handler<T, T, E>>,
        on_rejected: Option<Handler<E, T, E>>,
    ) -> Self {
        let derived = Self::pending(self.shared.scheduler.clone());
        trace!(promise = self.id(), derived = derived.id(), "then");

        let fulfilled: Callback<T> = {
            let derived = derived.clone();
            Box::new(move |value| match on_fulfilled {
                Some(handler) => settle_with(&derived, handler(value)),
                None => derived.fulfill(value),
            })
        };
        let rejected: Callback<E> = {
            let derived = derived.clone();
            Box::new(move |reason| match on_rejected {
                Some(handler) => settle_with(&derived, handler(reason)),
                None => derived.reject(reason),
            })
        };
        self.subscribe(fulfilled, rejected);
        derived
    }

    pub fn and_then<F>(&self, on_fulfilled: F) -> Self
    where
        F: FnOnce(T) -> Result<Outcome<T, E>, E> + Send + 'static,
    {
        self.then(Some(Box::new(on_fulfilled)), None)
    }

    pub fn catch<R>(&self, on_rejected: R) -> Self
    where
        R: FnOnce(E) -> Result<Outcome<T, E>, E> + Send + 'static,
    {
        self.then(None, Some(Box::new(on_rejected)))
    }

    /// Like [`then`](Self::then), but the handlers may change the value type.
    /// Both are required, since there is no `U` to pass a `T` or an `E`
    /// through unchanged.
    pub fn then_map<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: PromiseValue,
        F: FnOnce(T) -> Result<Outcome<U, E>, E> + Send + 'static,
        R: FnOnce(E) -> Result<Outcome<U, E>, E> + Send + 'static,
    {
        let derived = Promise::<U, E>::pending(self.shared.scheduler.clone());
        trace!(promise = self.id(), derived = derived.id(), "then_map");

        let fulfilled: Callback<T> = {
            let derived = derived.clone();
            Box::new(move |value| settle_with(&derived, on_fulfilled(value)))
        };
        let rejected: Callback<E> = {
            let derived = derived.clone();
            Box::new(move |reason| settle_with(&derived, on_rejected(reason)))
        };
        self.subscribe(fulfilled, rejected);
        derived
    }

    /// Register raw callbacks: queued while pending, scheduled right away once
    /// settled.
    pub(crate) fn subscribe(&self, on_fulfilled: Callback<T>, on_rejected: Callback<E>) {
        let settled = {
            let mut inner = self.shared.inner.lock();
            match inner.settled.clone() {
                Some(settled) => settled,
                None => {
                    inner.on_fulfilled.push(on_fulfilled);
                    inner.on_rejected.push(on_rejected);
                    return;
                }
            }
        };
        match settled {
            Ok(value) => self.schedule(move || on_fulfilled(value)),
            Err(reason) => self.schedule(move || on_rejected(reason)),
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        self.settle(Ok(value))
    }

    pub(crate) fn reject(&self, reason: E) {
        self.settle(Err(reason))
    }

    fn settle(&self, result: Result<T, E>) {
        let (on_fulfilled, on_rejected) = {
            let mut inner = self.shared.inner.lock();
            if inner.settled.is_some() {
                trace!(promise = self.id(), status = ?inner.status(), "settlement ignored");
                return;
            }
            inner.settled = Some(result.clone());
            (
                mem::take(&mut inner.on_fulfilled),
                mem::take(&mut inner.on_rejected),
            )
        };
        match result {
            Ok(value) => {
                trace!(promise = self.id(), callbacks = on_fulfilled.len(), "fulfilled");
                drop(on_rejected);
                self.drain(on_fulfilled, value);
            }
            Err(reason) => {
                trace!(promise = self.id(), callbacks = on_rejected.len(), "rejected");
                drop(on_fulfilled);
                self.drain(on_rejected, reason);
            }
        }
    }

    /// Each callback queued while pending gets its own scheduler task, enqueued
    /// in registration order, so a panicking handler cannot take its siblings
    /// down with it.
    fn drain<A: Clone + Send + 'static>(&self, callbacks: Vec<Callback<A>>, arg: A) {
        for callback in callbacks {
            let arg = arg.clone();
            self.schedule(move || callback(arg));
        }
    }

    fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.scheduler.enqueue(Box::new(task));
    }
}

fn settle_with<T: PromiseValue, E: PromiseReason>(
    derived: &Promise<T, E>,
    returned: Result<Outcome<T, E>, E>,
) {
    match returned {
        Ok(outcome) => resolution::resolve(derived, outcome),
        Err(reason) => derived.reject(reason),
    }
}

/// The settlement capability of one promise.
///
/// The first `resolve`, `adopt`, `resolve_with` or `reject` on any clone
/// decides the promise; every later call is ignored.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
    used: Latch,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            used: self.used.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .field("used", &self.used.is_tripped())
            .finish()
    }
}

impl<T: PromiseValue, E: PromiseReason> Resolver<T, E> {
    fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            used: Latch::default(),
        }
    }

    pub fn resolve(&self, value: T) {
        self.resolve_with(Outcome::Value(value))
    }

    /// Follow `other`: settle only when it settles, with its value or reason.
    pub fn adopt(&self, other: Promise<T, E>) {
        self.resolve_with(Outcome::Promise(other))
    }

    /// Run the resolution procedure for `outcome` against this promise.
    pub fn resolve_with(&self, outcome: Outcome<T, E>) {
        if self.lock_in() {
            resolution::resolve(&self.promise, outcome);
        }
    }

    pub fn reject(&self, reason: E) {
        if self.lock_in() {
            self.promise.reject(reason);
        }
    }

    /// Whether a settlement call has been made, even if the promise is still
    /// waiting on an adopted one.
    pub fn is_resolved(&self) -> bool {
        self.used.is_tripped()
    }

    fn lock_in(&self) -> bool {
        let first = self.used.trip();
        if !first {
            trace!(promise = self.promise.id(), "resolver already used");
        }
        first
    }
}
