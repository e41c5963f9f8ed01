//! Dependency-graph task scheduling over a fixed worker pool.
//!
//! The frame driver expresses per-frame work as tasks with explicit
//! predecessor handles. Scheduling is two-phase: record the graph, then
//! activate it, so an entire frame's dependencies exist before the first
//! task starts. See [`manager::TaskManager`] for the front end.

mod handle;
mod manager;
mod worker;

pub use handle::TaskHandle;
pub use manager::{TaskManager, DEFAULT_WORKER_COUNT};
