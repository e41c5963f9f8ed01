//! Entity manager: archetype registry, location table, and the commit
//! phase that replays deferred command buffers.
//!
//! ## Purpose
//! [`EntityManager`] owns every storage primitive (the archetype list and
//! its mask-keyed deduplication index, the chunk pool, the shared object
//! store, the entity location table, and the command buffers) and is the
//! only type allowed to mutate archetype membership.
//!
//! ## Frame discipline
//! During task execution the manager is read-only: tasks walk chunk
//! accessors produced by [`EntityManager::filter_entities`] and record
//! structural requests into per-task command buffers. The frame driver
//! then runs [`EntityManager::execute_entity_command_buffers`] behind a
//! barrier, the single point per frame where entities move. The id
//! allocator mutex is the only lock in the storage layer.
//!
//! ## Shared mutability
//! [`EcsManager`] wraps the manager in an `UnsafeCell` so that the frame
//! driver can hand shared references to many tasks while keeping one
//! mutable path for the commit task. Soundness rests on the phase split
//! above, not on runtime borrow tracking.

use std::cell::UnsafeCell;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, trace};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::engine::archetype::{Archetype, ChunkAccessor};
use crate::engine::chunk::ChunkPool;
use crate::engine::commands::EntityCommandBuffer;
use crate::engine::component::{
    component_info, shared_component_id_of, shared_component_info, ComponentData,
};
use crate::engine::entity::{Entity, EntityAllocator, EntityLocation};
use crate::engine::filter::EntityFilter;
use crate::engine::store::{ObjectStore, SharedComponentData};
use crate::engine::types::{
    ArchetypeId, ArchetypeMask, ComponentId, SharedComponentId, StoreIndex,
};

/// Fluent construction of an [`ArchetypeMask`] from registered types, for
/// creating entities directly in their final archetype.
#[derive(Default)]
pub struct ArchetypeBuilder {
    mask: ArchetypeMask,
}

impl ArchetypeBuilder {
    /// Starts an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds component `T`, carrying its registered manual flag.
    pub fn with<T: ComponentData>(mut self) -> Self {
        let info = component_info(crate::engine::component::component_id_of::<T>());
        self.mask.set_component(info.id, info.manual);
        self
    }

    /// Adds shared component `S`, carrying its registered manual flag.
    pub fn with_shared<S: SharedComponentData>(mut self) -> Self {
        let info = shared_component_info(shared_component_id_of::<S>());
        self.mask.set_shared(info.id, info.manual);
        self
    }

    /// Finishes construction.
    pub fn build(self) -> ArchetypeMask {
        self.mask
    }
}

/// Owner of all entity storage and the deferred-command commit phase.
pub struct EntityManager {
    archetypes: Vec<Archetype>,
    mask_index: AHashMap<ArchetypeMask, ArchetypeId>,
    pool: ChunkPool,
    store: ObjectStore,
    allocator: Arc<Mutex<EntityAllocator>>,
    locations: Vec<EntityLocation>,
    main_buffer: EntityCommandBuffer,
    task_buffers: Vec<Arc<Mutex<EntityCommandBuffer>>>,
    singletons: AHashMap<ComponentId, Entity>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        let allocator = Arc::new(Mutex::new(EntityAllocator::new()));
        let main_buffer = EntityCommandBuffer::new(allocator.clone());
        Self {
            archetypes: Vec::new(),
            mask_index: AHashMap::new(),
            pool: ChunkPool::new(),
            store: ObjectStore::new(),
            allocator,
            locations: Vec::new(),
            main_buffer,
            task_buffers: Vec::new(),
            singletons: AHashMap::new(),
        }
    }

    /// The main-thread command buffer, replayed first at commit.
    pub fn commands(&mut self) -> &mut EntityCommandBuffer {
        &mut self.main_buffer
    }

    /// Registers a fresh command buffer for one task slice; replayed after
    /// the main buffer, in registration order.
    pub fn create_task_buffer(&mut self) -> Arc<Mutex<EntityCommandBuffer>> {
        let buffer = Arc::new(Mutex::new(EntityCommandBuffer::new(self.allocator.clone())));
        self.task_buffers.push(buffer.clone());
        buffer
    }

    /// Replays every recorded command: the main buffer first, then each
    /// task buffer in registration order, then drops the registrations.
    ///
    /// This is the only mutation point of archetype membership; the caller
    /// must guarantee no task is reading chunk memory while it runs.
    pub fn execute_entity_command_buffers(&mut self) {
        let mut executed = 0usize;

        let mut main =
            std::mem::replace(&mut self.main_buffer, EntityCommandBuffer::new(self.allocator.clone()));
        executed += main.len();
        for command in main.take_commands() {
            command(self);
        }

        let task_buffers = std::mem::take(&mut self.task_buffers);
        for buffer in task_buffers {
            let commands = buffer.lock().take_commands();
            executed += commands.len();
            for command in commands {
                command(self);
            }
        }

        if executed > 0 {
            debug!("commit replayed {executed} entity commands");
        }
    }

    /// Resolves or creates the archetype for `mask`.
    pub fn register_archetype(&mut self, mask: ArchetypeMask) -> ArchetypeId {
        if let Some(&id) = self.mask_index.get(&mask) {
            return id;
        }
        assert!(
            self.archetypes.len() < ArchetypeId::MAX as usize,
            "archetype id space exhausted"
        );
        let id = self.archetypes.len() as ArchetypeId;
        self.archetypes.push(Archetype::new(id, mask));
        self.mask_index.insert(mask, id);
        id
    }

    /// Current storage location of `entity`, or `None` if it is not alive.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations
            .get(entity.0 as usize)
            .copied()
            .filter(|location| location.is_valid())
    }

    /// Returns `true` if `entity` is materialized in some archetype.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.location(entity).is_some()
    }

    /// Live entities across all archetypes.
    pub fn entity_count(&self) -> u32 {
        self.archetypes.iter().map(Archetype::entity_count).sum()
    }

    /// Number of registered archetypes, including empty ones.
    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Read access to one archetype.
    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id as usize]
    }

    /// Read access to the shared-component object store.
    #[inline]
    pub fn object_store(&self) -> &ObjectStore {
        &self.store
    }

    /// Resident and pooled chunk counts, for introspection.
    pub fn chunk_counts(&self) -> (usize, usize) {
        (self.pool.allocated_chunks() - self.pool.free_chunks(), self.pool.free_chunks())
    }

    /// Object-store index currently bound to `value`, if any entity
    /// references an equal value. Used to build exact-value filters.
    pub fn shared_component_index<S: SharedComponentData>(&self, value: &S) -> Option<StoreIndex> {
        self.store.find(value)
    }

    /// The singleton entity for component `T`'s id, if one was ever set.
    pub fn singleton_entity<T: ComponentData>(&self) -> Option<Entity> {
        let id = crate::engine::component::component_id_of::<T>();
        self.singletons.get(&id).copied().filter(|&entity| self.is_alive(entity))
    }

    /// Collects one [`ChunkAccessor`] per resident chunk matching `filter`,
    /// across every archetype.
    pub fn filter_entities(&self, filter: &EntityFilter) -> Vec<ChunkAccessor> {
        let mut out = Vec::new();
        for archetype in &self.archetypes {
            archetype.filter_entities(filter, &self.store, &mut out);
        }
        out
    }

    fn ensure_location_capacity(&mut self) {
        let bound = self.allocator.lock().id_bound() as usize;
        if self.locations.len() < bound {
            self.locations.resize(bound, EntityLocation::INVALID);
        }
    }

    /// Repairs the location of the entity swap-relocated into `vacated`.
    fn repair_swapped(&mut self, swapped: Entity, vacated: EntityLocation) {
        if swapped.is_valid() {
            self.locations[swapped.0 as usize] = vacated;
        }
    }

    /// Simultaneous mutable access to two distinct archetypes.
    fn archetype_pair_mut(
        archetypes: &mut [Archetype],
        first: ArchetypeId,
        second: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        debug_assert_ne!(first, second);
        let (first, second) = (first as usize, second as usize);
        if first < second {
            let (head, tail) = archetypes.split_at_mut(second);
            (&mut head[first], &mut tail[0])
        } else {
            let (head, tail) = archetypes.split_at_mut(first);
            (&mut tail[0], &mut head[second])
        }
    }

    /// Materializes a reserved entity id into the archetype for `mask`.
    pub(crate) fn apply_create(&mut self, entity: Entity, mask: ArchetypeMask) {
        self.ensure_location_capacity();
        debug_assert!(
            !self.locations[entity.0 as usize].is_valid(),
            "entity {} is already materialized",
            entity.0
        );
        let archetype_id = self.register_archetype(mask);
        let archetype = &mut self.archetypes[archetype_id as usize];
        let location = archetype.add_entity(&mut self.pool, entity);
        self.locations[entity.0 as usize] = location;
        trace!("entity {} created in archetype {archetype_id}", entity.0);
    }

    /// Destroys `entity`, honoring manual-component rules: fully-manual
    /// entities are untouched, partially-manual entities are stripped of
    /// their non-manual types one at a time, anything else is removed
    /// outright with its shared references released and its id recycled.
    pub(crate) fn apply_destroy(&mut self, entity: Entity) {
        let Some(location) = self.location(entity) else { return };
        let mask = *self.archetypes[location.archetype as usize].mask();

        if mask.fully_manual() {
            trace!("entity {} is fully manual, destroy ignored", entity.0);
            return;
        }
        if mask.partially_manual() {
            let strip: SmallVec<[ComponentId; 8]> = mask
                .components
                .iterate_over_ids()
                .filter(|&id| !mask.manual_components.has(id))
                .collect();
            for component_id in strip {
                self.apply_remove_component(entity, component_id);
            }
            let strip_shared: SmallVec<[SharedComponentId; 4]> = mask
                .shared
                .iterate_over_ids()
                .filter(|&id| !mask.manual_shared.has(id))
                .collect();
            for shared_id in strip_shared {
                self.apply_remove_shared(entity, shared_id);
            }
            trace!("entity {} stripped to its manual archetype", entity.0);
            return;
        }

        let archetype = &mut self.archetypes[location.archetype as usize];
        let shared_indices: SmallVec<[StoreIndex; 4]> = archetype
            .shared_component_ids()
            .iter()
            .map(|&shared_id| archetype.shared_index_at(location, shared_id))
            .collect();
        let swapped = archetype.remove_entity(&mut self.pool, location);
        for index in shared_indices {
            self.store.pop(index);
        }
        self.repair_swapped(swapped, location);
        self.locations[entity.0 as usize] = EntityLocation::INVALID;
        self.allocator.lock().release(entity);
        trace!("entity {} destroyed", entity.0);
    }

    /// Adds component `component_id` with `bytes` as its value; if the
    /// component is already present this degenerates to a value update.
    /// A dead entity is silently ignored, matching the deferred-command
    /// model where an earlier command in the same commit may destroy it.
    pub(crate) fn apply_add_component(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        bytes: &[u8],
    ) {
        let Some(location) = self.location(entity) else { return };
        let source_id = location.archetype;

        if self.archetypes[source_id as usize].mask().components.has(component_id) {
            self.archetypes[source_id as usize].set_component(location, component_id, bytes);
            return;
        }

        let mut mask = *self.archetypes[source_id as usize].mask();
        mask.set_component(component_id, component_info(component_id).manual);
        let destination_id = self.register_archetype(mask);

        let (source, destination) =
            Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);
        let (new_location, swapped) = source.move_entity_adding_component(
            destination,
            &mut self.pool,
            location,
            component_id,
            bytes,
        );
        self.locations[entity.0 as usize] = new_location;
        self.repair_swapped(swapped, location);
    }

    /// Removes component `component_id`; absent components and dead
    /// entities are silently ignored.
    pub(crate) fn apply_remove_component(&mut self, entity: Entity, component_id: ComponentId) {
        let Some(location) = self.location(entity) else { return };
        let source_id = location.archetype;
        if !self.archetypes[source_id as usize].mask().components.has(component_id) {
            return;
        }

        let mut mask = *self.archetypes[source_id as usize].mask();
        mask.clear_component(component_id);
        let destination_id = self.register_archetype(mask);

        let (source, destination) =
            Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);
        let (new_location, swapped) = source.move_entity_removing_component(
            destination,
            &mut self.pool,
            location,
            component_id,
        );
        self.locations[entity.0 as usize] = new_location;
        self.repair_swapped(swapped, location);
    }

    /// In-place value update of a component the entity already carries.
    ///
    /// ## Panics
    /// Panics when the entity's archetype lacks `component_id`; a dead
    /// entity is silently ignored.
    pub(crate) fn apply_set_component(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        bytes: &[u8],
    ) {
        let Some(location) = self.location(entity) else { return };
        self.archetypes[location.archetype as usize].set_component(location, component_id, bytes);
    }

    /// Adds shared component `shared_id` bound to `value`, deduplicating
    /// the value into the store; if already present this degenerates to a
    /// rebind.
    pub(crate) fn apply_add_shared<S: SharedComponentData>(
        &mut self,
        entity: Entity,
        shared_id: SharedComponentId,
        value: &S,
    ) {
        let Some(location) = self.location(entity) else { return };
        let source_id = location.archetype;

        if self.archetypes[source_id as usize].mask().shared.has(shared_id) {
            self.apply_set_shared(entity, shared_id, value);
            return;
        }

        let store_index = self.store.push(value);
        let mut mask = *self.archetypes[source_id as usize].mask();
        mask.set_shared(shared_id, shared_component_info(shared_id).manual);
        let destination_id = self.register_archetype(mask);

        let (source, destination) =
            Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);
        let (new_location, swapped) = source.move_entity_adding_shared_component(
            destination,
            &mut self.pool,
            location,
            shared_id,
            store_index,
        );
        self.locations[entity.0 as usize] = new_location;
        self.repair_swapped(swapped, location);
    }

    /// Removes shared component `shared_id`, releasing the entity's store
    /// reference; absent ids and dead entities are silently ignored.
    pub(crate) fn apply_remove_shared(&mut self, entity: Entity, shared_id: SharedComponentId) {
        let Some(location) = self.location(entity) else { return };
        let source_id = location.archetype;
        if !self.archetypes[source_id as usize].mask().shared.has(shared_id) {
            return;
        }

        let mut mask = *self.archetypes[source_id as usize].mask();
        mask.clear_shared(shared_id);
        let destination_id = self.register_archetype(mask);

        let (source, destination) =
            Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);
        let (new_location, swapped, removed) = source.move_entity_removing_shared_component(
            destination,
            &mut self.pool,
            location,
            shared_id,
        );
        self.locations[entity.0 as usize] = new_location;
        self.repair_swapped(swapped, location);
        self.store.pop(removed);
    }

    /// Rebinds shared component `shared_id` to `value`, moving the entity
    /// between combinations of its archetype; falls back to an add when the
    /// id is absent.
    pub(crate) fn apply_set_shared<S: SharedComponentData>(
        &mut self,
        entity: Entity,
        shared_id: SharedComponentId,
        value: &S,
    ) {
        let Some(location) = self.location(entity) else { return };
        let source_id = location.archetype;
        if !self.archetypes[source_id as usize].mask().shared.has(shared_id) {
            self.apply_add_shared(entity, shared_id, value);
            return;
        }

        let store_index = self.store.push(value);
        let (new_location, swapped, previous) = self.archetypes[source_id as usize]
            .set_shared_component(&mut self.pool, location, shared_id, store_index);
        self.locations[entity.0 as usize] = new_location;
        self.repair_swapped(swapped, location);
        // Rebinding to the already-bound value pushed a duplicate
        // reference; popping `previous` rebalances both that case and the
        // genuine move.
        self.store.pop(previous);
    }

    /// Updates the process-unique singleton entity carrying
    /// `component_id`, creating it on first use.
    pub(crate) fn apply_set_singleton(&mut self, component_id: ComponentId, bytes: &[u8]) {
        let entity = match self.singletons.get(&component_id).copied() {
            Some(entity) if self.is_alive(entity) => entity,
            _ => {
                let entity = self.allocator.lock().allocate();
                self.apply_create(entity, ArchetypeMask::default());
                self.singletons.insert(component_id, entity);
                entity
            }
        };
        self.apply_add_component(entity, component_id, bytes);
    }
}

impl Drop for EntityManager {
    fn drop(&mut self) {
        // Chunks still held by live combinations go back to the pool, which
        // frees them; the pool's accounting expects every block returned.
        for archetype in &mut self.archetypes {
            archetype.release_chunks(&mut self.pool);
        }
    }
}

/// Shared-mutability wrapper handing the manager to concurrent tasks.
///
/// ## Safety
/// The frame driver upholds the phase discipline: while tasks run, only
/// shared access happens ([`EcsRef::data`]); the commit task is the sole
/// holder of mutable access ([`EcsRef::data_mut`]) and runs behind a
/// barrier over every reader.
pub struct EcsManager {
    inner: UnsafeCell<EntityManager>,
}

// Shared access across worker threads is mediated by the phase split
// documented above.
unsafe impl Sync for EcsManager {}

impl Default for EcsManager {
    fn default() -> Self {
        Self::new(EntityManager::new())
    }
}

impl EcsManager {
    /// Wraps an entity manager for frame-driven shared access.
    pub fn new(manager: EntityManager) -> Self {
        Self { inner: UnsafeCell::new(manager) }
    }

    /// Borrow-like handle used by systems and tasks.
    pub fn manager_ref(&self) -> EcsRef<'_> {
        EcsRef { inner: &self.inner }
    }

    /// Raw handle for the commit task closure; must be consumed before the
    /// owning frame returns.
    pub(crate) fn raw(&self) -> EcsHandle {
        EcsHandle { manager: self.inner.get() }
    }
}

/// Lightweight accessor produced by [`EcsManager::manager_ref`].
#[derive(Clone, Copy)]
pub struct EcsRef<'a> {
    inner: &'a UnsafeCell<EntityManager>,
}

impl<'a> EcsRef<'a> {
    /// Shared access; valid whenever no commit is in progress.
    #[inline]
    pub fn data(&self) -> &'a EntityManager {
        unsafe { &*self.inner.get() }
    }

    /// Mutable access; valid only on the main thread between frames, when
    /// no task holds accessors into storage.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub fn data_mut(&self) -> &'a mut EntityManager {
        unsafe { &mut *self.inner.get() }
    }
}

/// Owning raw pointer moved into the per-frame commit task.
pub(crate) struct EcsHandle {
    manager: *mut EntityManager,
}

// The commit task is the only holder while it runs; the barrier over all
// readers makes the transfer safe.
unsafe impl Send for EcsHandle {}

impl EcsHandle {
    /// Runs the commit phase through the raw pointer.
    pub(crate) fn commit(self) {
        unsafe { &mut *self.manager }.execute_entity_command_buffers();
    }
}
