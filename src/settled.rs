use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::{Error, Promise, PromiseReason, PromiseValue};

/// Resolves with a promise's value or reason once it settles.
///
/// If the promise is dropped while still pending, that is every handle and
/// every resolver is gone, this resolves with [`Error::Abandoned`].
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Promise, Scheduler, ThreadScheduler};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let scheduler = ThreadScheduler::spawn().unwrap().into_ref();
/// let (resolver, promise) = Promise::<String, Error>::deferred(scheduler);
///
/// let task1 = thread::spawn(move || block_on(async {
///     promise.await
/// }));
/// resolver.resolve("Hi".into());
/// assert_eq!(task1.join().expect("The task1 thread has panicked."), Ok("Hi".to_string()));
/// ```
#[derive(Debug)]
pub struct Settled<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Shared by the two callbacks registered on the promise. Dropping the last
/// one without delivering means the promise can no longer settle.
struct Notifier<T, E> {
    slot: Arc<Mutex<Slot<T, E>>>,
}

impl<T, E> Notifier<T, E> {
    fn deliver(&self, result: Result<T, E>) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.value = Some(result);
            mem::replace(&mut slot.waker, Err(WakerState::Tainted))
        };
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> Drop for Notifier<T, E> {
    /// If this is an unsettled promise, wake with error.
    fn drop(&mut self) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.value.is_some() {
                return;
            }
            mem::replace(&mut slot.waker, Err(WakerState::Tainted))
        };
        if let Ok(waker) = waker {
            waker.wake()
        }
    }
}

impl<T: PromiseValue, E: PromiseReason> Settled<T, E> {
    fn new(promise: &Promise<T, E>) -> Self {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let on_fulfilled = Arc::new(Notifier { slot: slot.clone() });
        let on_rejected = on_fulfilled.clone();
        promise.subscribe(
            Box::new(move |value| on_fulfilled.deliver(Ok(value))),
            Box::new(move |reason| on_rejected.deliver(Err(reason))),
        );
        Settled { slot }
    }
}

impl<T, E: From<Error>> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => match mem::replace(&mut slot.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => Poll::Ready(Err(Error::Abandoned.into())),
                _ => Poll::Pending,
            },
        }
    }
}

impl<T: PromiseValue, E: PromiseReason> Promise<T, E> {
    /// A future for this promise's settlement.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self)
    }
}

impl<T: PromiseValue, E: PromiseReason> IntoFuture for Promise<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled::new(&self)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Outcome, Promise, Scheduler, TaskQueue, ThreadScheduler};
    use futures::executor::block_on;
    use std::future::IntoFuture;
    use std::thread;

    #[test]
    fn test_await_resolve_from_another_thread() {
        let scheduler = ThreadScheduler::spawn().expect("spawn scheduler").into_ref();
        let (op, op_a) = Promise::<String, Error>::deferred(scheduler);
        let task1 = thread::spawn(move || block_on(op_a.settled()));
        let task2 = thread::spawn(move || op.resolve(String::from("🍓")));
        task2.join().expect("The task2 thread has panicked");
        assert_eq!(
            task1.join().expect("The task1 thread has panicked"),
            Ok(String::from("🍓"))
        );
    }

    #[test]
    fn test_await_reject() {
        let scheduler = ThreadScheduler::spawn().expect("spawn scheduler").into_ref();
        let (a, b) = Promise::<String, Error>::deferred(scheduler);
        let task1 = thread::spawn(move || block_on(async { b.await }));
        let task2 = thread::spawn(move || a.reject(Error::reason("reject!!")));
        task2.join().expect("The task2 thread has panicked");
        assert_eq!(
            task1.join().expect("The task1 thread has panicked"),
            Err(Error::reason("reject!!"))
        );
    }

    #[test]
    fn test_two_waiters_on_one_promise() {
        let scheduler = ThreadScheduler::spawn().expect("spawn scheduler").into_ref();
        let (op, op_a) = Promise::<String, Error>::deferred(scheduler);
        let op_b = op_a.clone();
        let task1 = thread::spawn(move || block_on(op_a.settled()));
        let task2 = thread::spawn(move || block_on(op_b.settled()));
        op.resolve(String::from("🍓"));
        assert_eq!(task1.join().expect("task1"), Ok(String::from("🍓")));
        assert_eq!(task2.join().expect("task2"), Ok(String::from("🍓")));
    }

    #[test]
    fn test_await_chain() {
        let scheduler = ThreadScheduler::spawn().expect("spawn scheduler").into_ref();
        let promise = Promise::<i32, Error>::resolved(scheduler, 1)
            .and_then(|value| Ok(Outcome::Value(value + 1)))
            .and_then(|_| Err(Error::reason("oops")))
            .catch(|_| Ok(Outcome::Value(10)));
        assert_eq!(block_on(promise.into_future()), Ok(10));
    }

    #[test]
    fn test_unresolved_promise_is_abandoned() {
        let queue = TaskQueue::new();
        let (op, op_a) = Promise::<String, Error>::deferred(queue.scheduler());
        let waiting = op_a.into_future();
        // Drop the producer without ever resolving it.
        std::mem::drop(op);
        assert_eq!(block_on(waiting), Err(Error::Abandoned));
    }

    #[test]
    fn test_settled_value_is_delivered_through_the_queue() {
        let queue = TaskQueue::new();
        let promise = Promise::<i32, Error>::resolved(queue.scheduler(), 3);
        let waiting = promise.settled();
        assert_eq!(queue.len(), 1);
        queue.run_until_idle();
        assert_eq!(block_on(waiting), Ok(3));
    }
}
