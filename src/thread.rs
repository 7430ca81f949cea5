//! A thread scheduler uses a multi-producer, single-consumer channel as its
//! backend. Every handle is a cloned sender; one worker thread drains the
//! receiver and exits once the last handle is dropped.
//!
use crate::scheduler::{Scheduler, Task};
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::mpsc::{channel, Receiver, Sender},
    thread,
};
use tracing::{debug, warn};

pub const DEFAULT_THREAD_NAME: &str = "promise-scheduler";

/// # Examples
///
/// ```
/// use promise_aplus::{Error, Promise, Scheduler, ThreadScheduler};
/// use futures::executor::block_on;
///
/// let scheduler = ThreadScheduler::spawn().unwrap().into_ref();
/// let promise = Promise::<String, Error>::resolved(scheduler, "Hi".into());
/// assert_eq!(block_on(promise.settled()), Ok("Hi".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    sender: Sender<Task>,
}

impl ThreadScheduler {
    pub fn spawn() -> io::Result<Self> {
        Self::spawn_named(DEFAULT_THREAD_NAME)
    }

    pub fn spawn_named(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(receiver))?;
        debug!(thread = %name, "scheduler thread started");
        Ok(ThreadScheduler { sender })
    }
}

fn run(receiver: Receiver<Task>) {
    for task in receiver {
        // A panicking task must not take the remaining queue down with it.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("scheduled task panicked");
        }
    }
    debug!("scheduler thread exiting");
}

impl Scheduler for ThreadScheduler {
    fn enqueue(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("scheduler thread is gone, dropping task");
        }
    }
}
