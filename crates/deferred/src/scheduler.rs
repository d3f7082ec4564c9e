//! # Task Queue
//!
//! A per-thread, single-shot FIFO of pending tasks.
//!
//! Deferred values drain their continuations "later" by pushing one task here.
//! Whoever owns the event loop pumps the queue with [`run_until_idle`]; the
//! async bridge in [`crate::Deferred::settled`] does so whenever
//! [`work_scheduled`] wakes it, and sleeps otherwise.
//!
//! ## Invariants
//!
//! - Every scheduled task runs exactly once.
//! - Tasks run in the order they were scheduled, including tasks scheduled
//!   by a running task (they are appended behind the current backlog).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::Notify;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static WAKE: Rc<Notify> = Rc::new(Notify::new());
}

/// Queues a task to run on a later turn of this thread's loop.
pub fn schedule(task: impl FnOnce() + 'static) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
    WAKE.with(|wake| wake.notify_one());
}

/// Completes once a task has been scheduled on this thread.
///
/// A task scheduled while nobody is waiting leaves a permit behind, so the
/// next wait returns at once instead of missing it.
pub async fn work_scheduled() {
    let wake = WAKE.with(Rc::clone);
    wake.notified().await;
}

/// Number of tasks waiting to run.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

/// Runs queued tasks until the queue is empty, returning how many ran.
///
/// The queue is not borrowed while a task runs, so tasks may schedule more
/// work; that work runs before this function returns.
pub fn run_until_idle() -> usize {
    let mut ran = 0;
    // pop in its own statement so the borrow ends before the task runs
    loop {
        let next = QUEUE.with(|queue| queue.borrow_mut().pop_front());
        let Some(task) = next else { break };
        task();
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(ran, "task queue drained");
    }
    ran
}
