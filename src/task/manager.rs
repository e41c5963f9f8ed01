//! The task manager: scheduling front end and worker pool owner.
//!
//! ## Two-phase scheduling
//! [`TaskManager::schedule`] only records a task and its predecessor list
//! on a waiting list; nothing can start yet. A later call to
//! [`TaskManager::activate_waiting_tasks`] wires every waiting task into
//! its predecessors' successor lists and releases the scheduling guards,
//! after which tasks flow through the worker pool as their dependencies
//! resolve. The split lets a frame build its whole dependency graph
//! before any of it runs.
//!
//! ## Fan-in
//! [`TaskManager::combine`] schedules a no-op task depending on a set of
//! handles, collapsing them into a single predecessor; this is the
//! barrier primitive the frame driver builds on.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::task::handle::TaskHandle;
use crate::task::worker::{worker_loop, TaskQueue};

/// Workers spawned by [`TaskManager::new`].
pub const DEFAULT_WORKER_COUNT: usize = 8;

type Predecessors = SmallVec<[Arc<TaskHandle>; 4]>;

/// Dependency-graph task scheduler with a fixed worker pool.
pub struct TaskManager {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
    waiting: Mutex<Vec<(Arc<TaskHandle>, Predecessors)>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    /// Spawns the default worker pool.
    pub fn new() -> Self {
        Self::with_workers(DEFAULT_WORKER_COUNT)
    }

    /// Spawns `worker_count` workers (at least one).
    pub fn with_workers(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let queue = Arc::new(TaskQueue::new());
        let workers = (0..worker_count)
            .map(|index| {
                let queue = queue.clone();
                std::thread::Builder::new()
                    .name(format!("task-worker-{index}"))
                    .spawn(move || worker_loop(index, queue))
                    .unwrap_or_else(|error| panic!("failed to spawn worker thread: {error}"))
            })
            .collect();
        debug!("task manager started with {worker_count} workers");
        Self { queue, workers, waiting: Mutex::new(Vec::new()) }
    }

    /// Number of worker threads; the fan-out width of schedule calls.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Records `procedure` to run after every handle in `predecessors`.
    ///
    /// The task stays dormant until [`Self::activate_waiting_tasks`].
    pub fn schedule(
        &self,
        procedure: impl FnOnce() + Send + 'static,
        predecessors: &[Arc<TaskHandle>],
    ) -> Arc<TaskHandle> {
        let task = Arc::new(TaskHandle::new(Box::new(procedure), predecessors.len() as u32));
        self.waiting
            .lock()
            .push((task.clone(), predecessors.iter().cloned().collect()));
        task
    }

    /// Fan-in barrier: a no-op task depending on all of `predecessors`.
    pub fn combine(&self, predecessors: &[Arc<TaskHandle>]) -> Arc<TaskHandle> {
        self.schedule(|| {}, predecessors)
    }

    /// Wires every waiting task into the graph and releases the tasks
    /// whose predecessors have already finished.
    pub fn activate_waiting_tasks(&self) {
        let waiting = std::mem::take(&mut *self.waiting.lock());
        for (task, predecessors) in waiting {
            // The scheduling guard plus one unit per predecessor that
            // finished before we could enroll.
            let mut release = 1u32;
            for predecessor in &predecessors {
                if !predecessor.enroll(&task) {
                    release += 1;
                }
            }
            if task.release(release) {
                self.queue.push(task);
            }
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.queue.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn chain_runs_in_dependency_order() {
        let manager = TaskManager::with_workers(4);
        let trace = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let trace = trace.clone();
            manager.schedule(move || trace.lock().push(1), &[])
        };
        let second = {
            let trace = trace.clone();
            manager.schedule(move || trace.lock().push(2), &[first])
        };
        manager.activate_waiting_tasks();
        second.complete();

        assert_eq!(*trace.lock(), vec![1, 2]);
    }

    #[test]
    fn combine_waits_for_every_predecessor() {
        let manager = TaskManager::with_workers(4);
        let counter = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let counter = counter.clone();
                manager.schedule(
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                    &[],
                )
            })
            .collect();
        let barrier = manager.combine(&tasks);
        manager.activate_waiting_tasks();
        barrier.complete();

        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn activation_after_predecessor_finished_still_releases() {
        let manager = TaskManager::with_workers(2);
        let first = manager.schedule(|| {}, &[]);
        manager.activate_waiting_tasks();
        first.complete();

        // The predecessor is already finished when the successor is wired.
        let second = manager.schedule(|| {}, &[first]);
        manager.activate_waiting_tasks();
        second.complete();
        assert!(second.is_finished());
    }
}
