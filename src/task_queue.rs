//! Cross-thread hand-off onto a channel's owning thread.
//!
//! Asynchronous handler completions may originate on arbitrary worker
//! threads, but encode-and-reply must run on the thread that owns the
//! transport. `TaskQueue` is the one primitive for that hand-off: any thread
//! posts, only the owning thread drains.

use std::collections::VecDeque;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::warn;
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct TaskQueue {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    owner: ThreadId,
}

impl TaskQueue {
    /// Creates a queue owned by the calling thread.
    pub fn new() -> Self {
        TaskQueue {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            owner: thread::current().id(),
        }
    }

    /// True when the calling thread is the queue's owner.
    pub fn runs_on_owning_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Queues a task for the owning thread. Callable from any thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.queue.lock();
        queue.push_back(Box::new(task));
        self.condvar.notify_one();
    }

    /// Runs every queued task, including tasks queued while draining.
    /// Must be called from the owning thread.
    pub fn run_pending(&self) {
        if !self.runs_on_owning_thread() {
            warn!("[TaskQueue] run_pending called off the owning thread; skipping");
            return;
        }
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => task(),
                None => return,
            }
        }
    }

    /// Blocks the owning thread until at least one task is queued (or the
    /// timeout elapses), then drains. Returns false on timeout with nothing
    /// to run.
    pub fn wait_run_pending(&self, timeout: Duration) -> bool {
        if !self.runs_on_owning_thread() {
            warn!("[TaskQueue] wait_run_pending called off the owning thread; skipping");
            return false;
        }
        let deadline = Instant::now() + timeout;
        {
            let mut queue = self.queue.lock();
            // Condvar waits may wake spuriously; keep waiting until there is
            // work or the deadline passes.
            while queue.is_empty() {
                let result = self.condvar.wait_until(&mut queue, deadline);
                if result.timed_out() && queue.is_empty() {
                    return false;
                }
            }
        }
        self.run_pending();
        true
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue::new()
    }
}
