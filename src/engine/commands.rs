//! Deferred structural mutation of entity storage.
//!
//! ## Purpose
//! Systems never mutate archetype membership while tasks may be reading
//! chunk memory. Instead every structural request (entity creation and
//! destruction, component and shared-component add/remove/set) is
//! recorded as a deferred closure in an [`EntityCommandBuffer`] and
//! replayed during the commit phase, the single point per frame where
//! archetype membership actually changes.
//!
//! ## Design
//! - A command is a boxed `FnOnce(&mut EntityManager)` capturing owned ids
//!   and values; no references into storage survive inside a command.
//! - Entity ids are reserved *eagerly* through the shared allocator (the
//!   only ECS-layer lock), so a command buffer can hand out usable ids
//!   from worker tasks while materialization stays deferred.
//! - Each scheduled task slice receives its own fresh buffer; buffers are
//!   replayed in registration order at commit, so intra-buffer order is
//!   FIFO and inter-buffer order is deterministic.
//!
//! ## Invariants
//! - Commands must be executed in the order they were recorded.
//! - No command may run concurrently with task execution; the frame
//!   driver schedules the commit behind a barrier over all systems.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::component::{component_id_of, shared_component_id_of, ComponentData};
use crate::engine::entity::{Entity, EntityAllocator};
use crate::engine::manager::EntityManager;
use crate::engine::store::SharedComponentData;
use crate::engine::types::ArchetypeMask;

type EntityCommand = Box<dyn FnOnce(&mut EntityManager) + Send>;

/// Ordered list of deferred structural mutations.
pub struct EntityCommandBuffer {
    allocator: Arc<Mutex<EntityAllocator>>,
    commands: Vec<EntityCommand>,
}

impl EntityCommandBuffer {
    pub(crate) fn new(allocator: Arc<Mutex<EntityAllocator>>) -> Self {
        Self { allocator, commands: Vec::new() }
    }

    /// Number of recorded commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing is recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[inline]
    fn push(&mut self, command: impl FnOnce(&mut EntityManager) + Send + 'static) {
        self.commands.push(Box::new(command));
    }

    pub(crate) fn take_commands(&mut self) -> Vec<EntityCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Reserves an entity id immediately and defers its materialization
    /// into the structurally-empty archetype.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.allocator.lock().allocate();
        self.push(move |manager| manager.apply_create(entity, ArchetypeMask::default()));
        entity
    }

    /// Reserves an entity id and defers materialization directly into the
    /// archetype described by `mask`.
    pub fn create_entity_with_archetype(&mut self, mask: ArchetypeMask) -> Entity {
        let entity = self.allocator.lock().allocate();
        self.push(move |manager| manager.apply_create(entity, mask));
        entity
    }

    /// Defers destruction of `entity`, honoring manual-component rules.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.push(move |manager| manager.apply_destroy(entity));
    }

    /// Defers adding component `T` with the given value.
    pub fn add_component<T: ComponentData>(&mut self, entity: Entity, value: T) {
        let component_id = component_id_of::<T>();
        self.push(move |manager| {
            manager.apply_add_component(entity, component_id, bytemuck::bytes_of(&value));
        });
    }

    /// Defers removing component `T`.
    pub fn remove_component<T: ComponentData>(&mut self, entity: Entity) {
        let component_id = component_id_of::<T>();
        self.push(move |manager| manager.apply_remove_component(entity, component_id));
    }

    /// Defers an in-place value update of component `T`.
    pub fn set_component<T: ComponentData>(&mut self, entity: Entity, value: T) {
        let component_id = component_id_of::<T>();
        self.push(move |manager| {
            manager.apply_set_component(entity, component_id, bytemuck::bytes_of(&value));
        });
    }

    /// Defers adding shared component `S`; the value is deduplicated into
    /// the object store at commit time.
    pub fn add_shared_component<S: SharedComponentData>(&mut self, entity: Entity, value: S) {
        let shared_id = shared_component_id_of::<S>();
        self.push(move |manager| manager.apply_add_shared(entity, shared_id, &value));
    }

    /// Defers removing shared component `S`, releasing its store
    /// reference.
    pub fn remove_shared_component<S: SharedComponentData>(&mut self, entity: Entity) {
        let shared_id = shared_component_id_of::<S>();
        self.push(move |manager| manager.apply_remove_shared(entity, shared_id));
    }

    /// Defers rebinding shared component `S` to a new value, moving the
    /// entity between combinations.
    pub fn set_shared_component<S: SharedComponentData>(&mut self, entity: Entity, value: S) {
        let shared_id = shared_component_id_of::<S>();
        self.push(move |manager| manager.apply_set_shared(entity, shared_id, &value));
    }

    /// Defers updating the process-unique singleton entity for component
    /// `T`, creating it on first use.
    pub fn set_singleton<T: ComponentData>(&mut self, value: T) {
        let component_id = component_id_of::<T>();
        self.push(move |manager| {
            manager.apply_set_singleton(component_id, bytemuck::bytes_of(&value));
        });
    }
}
