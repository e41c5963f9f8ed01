//! The world: frame driver tying storage, systems, and the scheduler
//! together.
//!
//! ## Frame shape
//! Each [`World::update`] call:
//!
//! 1. advances the frame clock,
//! 2. schedules a barrier over every handle the previous frame left
//!    outstanding,
//! 3. schedules the commit task behind the barrier, the single point
//!    where command buffers replay and archetype membership changes,
//! 4. activates the waiting graph, then
//! 5. runs each system's `on_update` in registration order, waiting for
//!    its predecessor first, so storage is committed and stable before
//!    any system reads it and every system observes the one before it.
//!
//! Chunk accessors produced during frame N are consumed by frame N's
//! tasks, all of which the barrier orders before frame N+1's commit; no
//! accessor ever observes a structural change.

use std::sync::Arc;
use std::time::Instant;

use log::trace;

use crate::engine::manager::{EcsManager, EcsRef, EntityManager};
use crate::engine::system::{System, SystemContext};
use crate::task::{TaskHandle, TaskManager};

/// Frame clock handed to every system.
#[derive(Clone, Copy, Debug, Default)]
pub struct Time {
    /// Seconds elapsed since the previous update; zero on the first.
    pub delta_seconds: f32,
    /// Seconds elapsed since the world was created.
    pub elapsed_seconds: f64,
    /// Number of completed updates.
    pub frame: u64,
}

/// Owner of entity storage, registered systems, and the task scheduler.
pub struct World {
    tasks: Arc<TaskManager>,
    manager: EcsManager,
    systems: Vec<Box<dyn System>>,
    outstanding: Vec<Arc<TaskHandle>>,
    time: Time,
    last_update: Option<Instant>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default worker pool.
    pub fn new() -> Self {
        Self::with_task_manager(Arc::new(TaskManager::new()))
    }

    /// Creates a world driving its frames through `tasks`.
    pub fn with_task_manager(tasks: Arc<TaskManager>) -> Self {
        Self {
            tasks,
            manager: EcsManager::default(),
            systems: Vec::new(),
            outstanding: Vec::new(),
            time: Time::default(),
            last_update: None,
        }
    }

    /// Registers a system; update order is registration order.
    pub fn add_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    /// Accessor into entity storage.
    ///
    /// Mutable access through the returned handle is only sound between
    /// updates, when no scheduled task is running.
    pub fn entity_manager(&self) -> EcsRef<'_> {
        self.manager.manager_ref()
    }

    /// Convenience shared access to storage for reads between updates.
    pub fn storage(&self) -> &EntityManager {
        self.manager.manager_ref().data()
    }

    /// The scheduler driving this world.
    #[inline]
    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// The frame clock as of the most recent update.
    #[inline]
    pub fn time(&self) -> Time {
        self.time
    }

    /// Runs one frame: commit the previous frame's commands, then drive
    /// every system in order.
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = self
            .last_update
            .map(|previous| (now - previous).as_secs_f32())
            .unwrap_or(0.0);
        self.last_update = Some(now);
        self.time.delta_seconds = delta;
        self.time.elapsed_seconds += delta as f64;
        self.time.frame += 1;
        trace!("frame {} starting, delta {delta:.6}s", self.time.frame);

        // Barrier over everything the previous frame scheduled, then the
        // commit behind it.
        let outstanding = std::mem::take(&mut self.outstanding);
        let barrier = self.tasks.combine(&outstanding);
        let handle = self.manager.raw();
        let commit = self
            .tasks
            .schedule(move || handle.commit(), std::slice::from_ref(&barrier));
        self.tasks.activate_waiting_tasks();

        let mut predecessor = commit;
        for system in self.systems.iter_mut() {
            predecessor.complete();
            let mut context =
                SystemContext::new(&self.tasks, &self.manager, predecessor, self.time);
            system.on_update(&mut context);
            self.tasks.activate_waiting_tasks();
            predecessor = context.into_predecessor();
        }

        if self.systems.is_empty() {
            predecessor.complete();
        }
        self.outstanding.push(predecessor);
    }

    /// Blocks until every task scheduled so far has finished; storage is
    /// safe to mutate directly afterwards.
    pub fn wait_idle(&mut self) {
        let outstanding = std::mem::take(&mut self.outstanding);
        let barrier = self.tasks.combine(&outstanding);
        self.tasks.activate_waiting_tasks();
        barrier.complete();
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Outstanding tasks hold accessors into this world's storage.
        self.wait_idle();
    }
}
