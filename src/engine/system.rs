//! Systems and per-frame chunk fan-out.
//!
//! A [`System`] is the unit of simulation logic: every frame the world
//! calls [`System::on_update`] with a [`SystemContext`], through which the
//! system schedules parallel work over filtered chunks and records
//! deferred structural changes.
//!
//! ## Fan-out
//! A schedule call filters the storage into chunk accessors, partitions
//! them into at most `worker_count` contiguous slices of at least
//! [`MIN_CHUNKS_PER_TASK`] chunks each, and schedules one task per slice
//! behind the context's current predecessor. The per-slice tasks are
//! combined into a single handle that becomes the new predecessor, so
//! consecutive schedule calls of one system form a chain and the chunk
//! disjointness of concurrent tasks holds by construction.

use std::sync::Arc;

use crate::engine::archetype::ChunkAccessor;
use crate::engine::commands::EntityCommandBuffer;
use crate::engine::filter::EntityFilter;
use crate::engine::manager::{EcsManager, EntityManager};
use crate::engine::world::Time;
use crate::task::{TaskHandle, TaskManager};

/// Minimum chunks per scheduled task; below this, fewer tasks are cut.
pub const MIN_CHUNKS_PER_TASK: usize = 4;

/// Per-chunk work: accessor, global chunk index, global entity offset.
pub type ChunkCallback = Arc<dyn Fn(&ChunkAccessor, u32, u32) + Send + Sync>;

/// Per-chunk work that also records deferred commands.
pub type ChunkCommandCallback =
    Arc<dyn Fn(&ChunkAccessor, u32, u32, &mut EntityCommandBuffer) + Send + Sync>;

/// A unit of simulation logic driven once per frame.
pub trait System {
    /// Schedules this frame's work; storage is committed and stable for
    /// the duration of the call.
    fn on_update(&mut self, context: &mut SystemContext<'_>);
}

/// Frame-scoped scheduling interface handed to [`System::on_update`].
pub struct SystemContext<'a> {
    tasks: &'a Arc<TaskManager>,
    manager: &'a EcsManager,
    predecessor: Arc<TaskHandle>,
    time: Time,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        tasks: &'a Arc<TaskManager>,
        manager: &'a EcsManager,
        predecessor: Arc<TaskHandle>,
        time: Time,
    ) -> Self {
        Self { tasks, manager, predecessor, time }
    }

    /// Frame clock at the start of this update.
    #[inline]
    pub fn time(&self) -> Time {
        self.time
    }

    /// Read access to entity storage.
    #[inline]
    pub fn manager(&self) -> &'a EntityManager {
        self.manager.manager_ref().data()
    }

    /// The main-thread command buffer; replayed first at the next commit.
    pub fn commands(&self) -> &'a mut EntityCommandBuffer {
        self.manager.manager_ref().data_mut().commands()
    }

    /// The handle all subsequently scheduled work depends on.
    #[inline]
    pub fn predecessor(&self) -> Arc<TaskHandle> {
        self.predecessor.clone()
    }

    pub(crate) fn into_predecessor(self) -> Arc<TaskHandle> {
        self.predecessor
    }

    /// Schedules `callback` over every chunk matching `filter`, fanned out
    /// across the worker pool, and returns the combined handle (which also
    /// becomes the context's new predecessor).
    ///
    /// The callback receives each chunk accessor together with the global
    /// chunk index and the global entity offset of the chunk's first
    /// entity within the filtered set.
    pub fn schedule(&mut self, filter: &EntityFilter, callback: ChunkCallback) -> Arc<TaskHandle> {
        self.fan_out(filter, move |slice, chunk_base, entity_base, _buffer| {
            let mut chunk_index = chunk_base;
            let mut entity_offset = entity_base;
            for accessor in slice {
                callback(accessor, chunk_index, entity_offset);
                entity_offset += accessor.entity_count();
                chunk_index += 1;
            }
        })
    }

    /// Like [`Self::schedule`], additionally handing each task its own
    /// deferred command buffer, replayed at the next commit after the main
    /// buffer in slice order.
    pub fn schedule_with_buffer(
        &mut self,
        filter: &EntityFilter,
        callback: ChunkCommandCallback,
    ) -> Arc<TaskHandle> {
        self.fan_out(filter, move |slice, chunk_base, entity_base, buffer| {
            let mut chunk_index = chunk_base;
            let mut entity_offset = entity_base;
            for accessor in slice {
                callback(accessor, chunk_index, entity_offset, buffer);
                entity_offset += accessor.entity_count();
                chunk_index += 1;
            }
        })
    }

    fn fan_out(
        &mut self,
        filter: &EntityFilter,
        body: impl Fn(&[ChunkAccessor], u32, u32, &mut EntityCommandBuffer) + Send + Sync + 'static,
    ) -> Arc<TaskHandle> {
        let accessors = self.manager.manager_ref().data().filter_entities(filter);
        if accessors.is_empty() {
            return self.predecessor.clone();
        }

        let chunk_count = accessors.len();
        let task_count = self
            .tasks
            .worker_count()
            .min(chunk_count.div_ceil(MIN_CHUNKS_PER_TASK))
            .max(1);
        let per_task = chunk_count.div_ceil(task_count);

        let body = Arc::new(body);
        let mut handles = Vec::with_capacity(task_count);
        let mut iter = accessors.into_iter();
        let mut chunk_base = 0u32;
        let mut entity_base = 0u32;
        loop {
            let slice: Vec<ChunkAccessor> = iter.by_ref().take(per_task).collect();
            if slice.is_empty() {
                break;
            }
            let slice_chunk_base = chunk_base;
            let slice_entity_base = entity_base;
            chunk_base += slice.len() as u32;
            entity_base += slice.iter().map(ChunkAccessor::entity_count).sum::<u32>();

            let buffer = self.manager.manager_ref().data_mut().create_task_buffer();
            let body = body.clone();
            let handle = self.tasks.schedule(
                move || {
                    let mut buffer = buffer.lock();
                    body(&slice, slice_chunk_base, slice_entity_base, &mut buffer);
                },
                std::slice::from_ref(&self.predecessor),
            );
            handles.push(handle);
        }

        let combined = self.tasks.combine(&handles);
        self.predecessor = combined.clone();
        combined
    }
}
