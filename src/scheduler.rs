//! The deferred-task boundary promises dispatch their handlers through.
//!
//! A [`Scheduler`] only has to run every [`Task`] eventually, in the order it
//! was enqueued, and never inline on the caller's stack. [`TaskQueue`] is the
//! simplest such scheduler: a FIFO you drain yourself, one event-loop tick at
//! a time.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a scheduler, inherited by every promise derived from a root.
pub type SchedulerRef = Arc<dyn Scheduler>;

pub trait Scheduler: Send + Sync {
    /// Queue `task` to run on a later turn.
    fn enqueue(&self, task: Task);

    fn into_ref(self) -> SchedulerRef
    where
        Self: Sized + 'static,
    {
        Arc::new(self)
    }
}

/// A manually drained FIFO of tasks.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Scheduler, TaskQueue};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let queue = TaskQueue::new();
/// let ran = Arc::new(AtomicUsize::new(0));
/// let counter = ran.clone();
/// queue.enqueue(Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
/// assert_eq!(ran.load(Ordering::SeqCst), 0);
/// assert_eq!(queue.run_until_idle(), 1);
/// assert_eq!(ran.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler handle feeding this queue.
    pub fn scheduler(&self) -> SchedulerRef {
        self.clone().into_ref()
    }

    /// Run the oldest queued task, if any.
    pub fn run_once(&self) -> bool {
        // The lock is released before the task runs so it can enqueue more.
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks enqueued along the
    /// way. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        trace!(ran, "task queue idle");
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Scheduler for TaskQueue {
    fn enqueue(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("pending", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Scheduler, TaskQueue};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(vec![]));
        let sink = log.clone();
        let make = move |n: u32| -> Box<dyn FnOnce() + Send> {
            let sink = sink.clone();
            Box::new(move || sink.lock().unwrap().push(n))
        };
        (log, make)
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let queue = TaskQueue::new();
        let (log, task) = recorder();
        for n in 0..5 {
            queue.enqueue(task(n));
        }
        assert_eq!(queue.len(), 5);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(queue.run_until_idle(), 5);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_enqueued_while_draining_run_after_existing_ones() {
        let queue = TaskQueue::new();
        let (log, task) = recorder();
        let inner = queue.clone();
        let late = task(2);
        queue.enqueue(Box::new(move || inner.enqueue(late)));
        queue.enqueue(task(1));

        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_run_once_on_empty_queue() {
        let queue = TaskQueue::new();
        assert!(!queue.run_once());
        assert_eq!(queue.run_until_idle(), 0);
    }

    #[test]
    fn test_scheduler_handle_shares_the_queue() {
        let queue = TaskQueue::new();
        let scheduler = queue.scheduler();
        let (log, task) = recorder();
        scheduler.enqueue(task(7));
        assert_eq!(queue.len(), 1);
        queue.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }
}
