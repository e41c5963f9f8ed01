//! Shared ready queue and the worker-thread loop.
//!
//! Workers block on a condvar until a ready task appears, run it, then
//! push any successors the completion released. Shutdown is a flag on the
//! queue: blocked workers drain remaining ready tasks first, then exit.

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::task::handle::TaskHandle;

struct QueueState {
    ready: VecDeque<Arc<TaskHandle>>,
    stop: bool,
}

/// Multi-producer ready queue feeding the worker pool.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { ready: VecDeque::new(), stop: false }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a ready task and wakes one worker.
    pub(crate) fn push(&self, task: Arc<TaskHandle>) {
        let mut state = self.state.lock();
        state.ready.push_back(task);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until a task is available; `None` means the pool is shutting
    /// down and the queue has drained.
    fn pop_blocking(&self) -> Option<Arc<TaskHandle>> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.ready.pop_front() {
                return Some(task);
            }
            if state.stop {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Flags shutdown and wakes every worker.
    pub(crate) fn stop(&self) {
        let mut state = self.state.lock();
        state.stop = true;
        drop(state);
        self.available.notify_all();
    }
}

/// Body of every worker thread.
pub(crate) fn worker_loop(index: usize, queue: Arc<TaskQueue>) {
    trace!("worker {index} started");
    while let Some(task) = queue.pop_blocking() {
        task.run();
        for successor in task.finish() {
            queue.push(successor);
        }
    }
    trace!("worker {index} stopped");
}
