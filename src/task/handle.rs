//! Task handles: dependency counting, successor wiring, and completion
//! futures.
//!
//! ## Lifecycle
//! A task is *scheduled* (recorded with its predecessor list), later
//! *activated* (wired into each predecessor's successor list), becomes
//! *ready* when every predecessor has finished, is *run* by a worker, and
//! finally *finished*, which releases its successors and wakes any thread
//! blocked on [`TaskHandle::complete`].
//!
//! ## The activation race
//! Predecessors may finish on worker threads while a task is still being
//! wired into their successor lists. Two rules keep the count exact:
//!
//! - The remaining-predecessor counter is initialized to `len + 1`; the
//!   extra *scheduling guard* is only released at the end of activation,
//!   so the counter cannot reach zero while wiring is in progress.
//! - `finished` is flipped under the same lock that guards the successor
//!   list, so activation either observes a finished predecessor or
//!   enrolls in its successor list, never neither and never both.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

type Procedure = Box<dyn FnOnce() + Send>;

/// Successor wiring, guarded together with the finished flag.
struct TaskLinks {
    finished: bool,
    successors: SmallVec<[Arc<TaskHandle>; 4]>,
}

/// One schedulable unit of work and its dependency bookkeeping.
pub struct TaskHandle {
    procedure: Mutex<Option<Procedure>>,
    predecessors_remaining: AtomicU32,
    links: Mutex<TaskLinks>,
    done: Mutex<bool>,
    signal: Condvar,
}

impl TaskHandle {
    /// Creates a handle whose counter carries the scheduling guard on top
    /// of `predecessor_count`.
    pub(crate) fn new(procedure: Procedure, predecessor_count: u32) -> Self {
        Self {
            procedure: Mutex::new(Some(procedure)),
            predecessors_remaining: AtomicU32::new(predecessor_count + 1),
            links: Mutex::new(TaskLinks { finished: false, successors: SmallVec::new() }),
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Runs the stored procedure; a second call is a no-op.
    pub(crate) fn run(&self) {
        let procedure = self.procedure.lock().take();
        if let Some(procedure) = procedure {
            procedure();
        }
    }

    /// Observes a finished predecessor (during activation) or absorbs the
    /// scheduling guard; returns `true` when the task became ready.
    pub(crate) fn release(&self, count: u32) -> bool {
        debug_assert!(count > 0);
        self.predecessors_remaining.fetch_sub(count, Ordering::AcqRel) == count
    }

    /// Enrolls `successor` if this task has not finished yet; otherwise
    /// reports that the successor should count this predecessor as done.
    pub(crate) fn enroll(&self, successor: &Arc<TaskHandle>) -> bool {
        let mut links = self.links.lock();
        if links.finished {
            return false;
        }
        links.successors.push(successor.clone());
        true
    }

    /// Marks the task finished, releases its successors, and wakes
    /// completion waiters. Returns the successors that became ready.
    pub(crate) fn finish(&self) -> SmallVec<[Arc<TaskHandle>; 4]> {
        let successors = {
            let mut links = self.links.lock();
            debug_assert!(!links.finished, "task finished twice");
            links.finished = true;
            std::mem::take(&mut links.successors)
        };

        let mut ready = SmallVec::new();
        for successor in successors {
            if successor.release(1) {
                ready.push(successor);
            }
        }

        let mut done = self.done.lock();
        *done = true;
        self.signal.notify_all();
        drop(done);

        ready
    }

    /// Returns `true` once the task's procedure has run.
    pub fn is_finished(&self) -> bool {
        *self.done.lock()
    }

    /// Blocks the calling thread until the task finishes.
    pub fn complete(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }
}
