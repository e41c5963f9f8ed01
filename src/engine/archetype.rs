//! Archetype and combination chunk storage.
//!
//! This module is the storage heart of the runtime. An [`Archetype`] owns
//! every entity whose component/shared-component signature matches one
//! [`ArchetypeMask`]; within the archetype, storage is split per unique
//! shared-component *value* tuple into [`Combination`]s, each of which packs
//! its entities densely into fixed-size chunks acquired from the
//! [`ChunkPool`].
//!
//! ## Storage model
//!
//! A chunk is a raw 16 KiB, 64-byte-aligned arena. The per-archetype
//! [`ChunkLayout`] computes one byte offset for the entity array and one per
//! component array, packed largest-alignment-first; chunk capacity is the
//! number of entities whose combined per-entity footprint fits the arena.
//!
//! Entities are stored packed with no holes: removal swaps the last
//! entity's bytes into the vacated slot and trims the trailing chunk back
//! to the pool when it empties. `index / capacity` selects the chunk,
//! `index % capacity` the slot.
//!
//! ## Structural moves
//!
//! Adding or removing a (shared) component moves an entity's row between
//! archetypes: append a slot in the destination combination, copy every
//! component byte range common to both layouts, write the new value if
//! any, then swap-remove the source slot. Every move reports the entity
//! that was swap-relocated so the caller can repair its location.
//!
//! ## Safety
//!
//! Raw-pointer arithmetic into chunk memory is confined to this module;
//! typed access goes through [`ChunkAccessor`], which validates component
//! presence and element size before casting.

use std::ptr::NonNull;

use ahash::AHashMap;
use log::trace;
use smallvec::{smallvec, SmallVec};

use crate::engine::chunk::{ChunkPool, CHUNK_BYTE_SIZE};
use crate::engine::component::{component_id_of, component_info, ComponentData};
use crate::engine::entity::{Entity, EntityLocation};
use crate::engine::filter::EntityFilter;
use crate::engine::store::{ObjectStore, SharedComponentData};
use crate::engine::types::{
    ArchetypeId, ArchetypeMask, CombinationIndex, ComponentId, SharedComponentId, StoreIndex,
    INVALID_STORE_INDEX,
};

/// Concrete shared-component value assignment, parallel to the archetype's
/// ascending `shared_component_ids`.
pub type SharedTuple = SmallVec<[StoreIndex; 4]>;

/// Byte offsets of the entity array and every component array within one
/// chunk, computed once per archetype.
#[derive(Clone, Debug)]
pub struct ChunkLayout {
    capacity: u32,
    entity_offset: usize,
    /// Parallel to the archetype's ascending component id list.
    component_offsets: SmallVec<[usize; 8]>,
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl ChunkLayout {
    /// Computes the layout for the given component sizes and alignments.
    ///
    /// Capacity starts at `chunk_bytes / per_entity_bytes` and shrinks
    /// until the aligned arrays fit, so inter-array padding can never
    /// overflow the arena.
    fn compute(sizes: &[usize], aligns: &[usize]) -> ChunkLayout {
        let entity_size = std::mem::size_of::<Entity>();
        let entity_align = std::mem::align_of::<Entity>();
        let per_entity: usize = entity_size + sizes.iter().sum::<usize>();

        let mut capacity = CHUNK_BYTE_SIZE / per_entity;
        assert!(capacity > 0, "component set exceeds the chunk byte size");

        // Largest-alignment-first placement; usize::MAX marks the entity
        // array's slot in the ordering.
        let mut order: SmallVec<[usize; 8]> = (0..sizes.len()).collect();
        order.push(usize::MAX);
        order.sort_by_key(|&slot| {
            let align = if slot == usize::MAX { entity_align } else { aligns[slot] };
            std::cmp::Reverse(align)
        });

        loop {
            let mut entity_offset = 0usize;
            let mut offsets: SmallVec<[usize; 8]> = smallvec![0; sizes.len()];
            let mut cursor = 0usize;
            for &slot in &order {
                let (size, align) = if slot == usize::MAX {
                    (entity_size, entity_align)
                } else {
                    (sizes[slot], aligns[slot])
                };
                cursor = align_up(cursor, align);
                if slot == usize::MAX {
                    entity_offset = cursor;
                } else {
                    offsets[slot] = cursor;
                }
                cursor += size * capacity;
            }

            if cursor <= CHUNK_BYTE_SIZE {
                return ChunkLayout {
                    capacity: capacity as u32,
                    entity_offset,
                    component_offsets: offsets,
                };
            }
            capacity -= 1;
            assert!(capacity > 0, "component set exceeds the chunk byte size");
        }
    }

    /// Number of entities one chunk holds.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Chunked array storage for one archetype × one shared-value tuple.
pub struct Combination {
    shared_indices: SharedTuple,
    chunks: Vec<NonNull<u8>>,
    entity_count: u32,
}

// Chunk pointers are exclusively owned by this combination.
unsafe impl Send for Combination {}

impl Combination {
    fn new(shared_indices: SharedTuple) -> Self {
        Self { shared_indices, chunks: Vec::new(), entity_count: 0 }
    }

    /// The concrete shared-value assignment of this combination.
    #[inline]
    pub fn shared_indices(&self) -> &[StoreIndex] {
        &self.shared_indices
    }

    /// Number of live entities.
    #[inline]
    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    #[inline]
    fn slot_ptr(&self, layout: &ChunkLayout, offset: usize, elem_size: usize, index: u32) -> *mut u8 {
        let capacity = layout.capacity;
        debug_assert!(index < self.entity_count, "slot index {index} out of bounds");
        let chunk = (index / capacity) as usize;
        let slot = (index % capacity) as usize;
        unsafe { self.chunks[chunk].as_ptr().add(offset + slot * elem_size) }
    }

    #[inline]
    fn entity_at(&self, layout: &ChunkLayout, index: u32) -> Entity {
        let ptr = self.slot_ptr(layout, layout.entity_offset, std::mem::size_of::<Entity>(), index);
        unsafe { *(ptr as *const Entity) }
    }

    #[inline]
    fn write_entity(&self, layout: &ChunkLayout, index: u32, entity: Entity) {
        let ptr = self.slot_ptr(layout, layout.entity_offset, std::mem::size_of::<Entity>(), index);
        unsafe { *(ptr as *mut Entity) = entity };
    }

    /// Appends a slot holding `entity`, allocating a chunk when full.
    /// Returns the new slot index and whether a chunk was acquired.
    fn push_slot(&mut self, layout: &ChunkLayout, pool: &mut ChunkPool, entity: Entity) -> (u32, bool) {
        let capacity = layout.capacity;
        let mut acquired = false;
        if self.entity_count as usize == self.chunks.len() * capacity as usize {
            self.chunks.push(pool.acquire());
            acquired = true;
        }
        let index = self.entity_count;
        self.entity_count += 1;
        self.write_entity(layout, index, entity);
        (index, acquired)
    }

    /// Swap-removes the slot at `index`.
    ///
    /// Returns the entity that was relocated into the vacated slot
    /// ([`Entity::INVALID`] when the removed slot was already last) and
    /// whether the trailing chunk was released back to the pool.
    fn swap_remove(
        &mut self,
        layout: &ChunkLayout,
        sizes: &[usize],
        pool: &mut ChunkPool,
        index: u32,
    ) -> (Entity, bool) {
        assert!(index < self.entity_count, "stale entity location: slot {index} out of bounds");
        let last = self.entity_count - 1;

        let swapped = if index < last {
            let moved = self.entity_at(layout, last);
            self.write_entity(layout, index, moved);
            for (position, &size) in sizes.iter().enumerate() {
                if size == 0 {
                    continue;
                }
                let offset = layout.component_offsets[position];
                let from = self.slot_ptr(layout, offset, size, last);
                let to = self.slot_ptr(layout, offset, size, index);
                unsafe { std::ptr::copy_nonoverlapping(from, to, size) };
            }
            moved
        } else {
            Entity::INVALID
        };

        self.entity_count -= 1;
        let capacity = layout.capacity as usize;
        let needed = (self.entity_count as usize).div_ceil(capacity);
        let mut released = false;
        while self.chunks.len() > needed {
            let chunk = self.chunks.pop().expect("chunk list shorter than accounting");
            pool.release(chunk);
            released = true;
        }
        (swapped, released)
    }
}

/// Per-type-signature storage partition: an immutable descriptor plus the
/// registry of combinations it owns.
///
/// ## Invariants
/// - `component_ids` and `shared_component_ids` are ascending; the
///   descriptor never changes after construction.
/// - `entity_count` / `chunk_count` exactly track combination contents
///   across creation, moves, and recycling; `chunk_count` is the
///   work-splitting heuristic input.
pub struct Archetype {
    id: ArchetypeId,
    mask: ArchetypeMask,
    component_ids: SmallVec<[ComponentId; 8]>,
    component_sizes: SmallVec<[usize; 8]>,
    shared_component_ids: SmallVec<[SharedComponentId; 4]>,
    layout: ChunkLayout,
    combinations: Vec<Option<Combination>>,
    lookup: AHashMap<SharedTuple, CombinationIndex>,
    free_combinations: Vec<CombinationIndex>,
    entity_count: u32,
    chunk_count: u32,
}

impl Archetype {
    /// Builds the immutable descriptor and chunk layout for `mask`.
    ///
    /// Component sizes and alignments are taken from the registry, so every
    /// id in the mask must already be registered.
    pub fn new(id: ArchetypeId, mask: ArchetypeMask) -> Self {
        let component_ids: SmallVec<[ComponentId; 8]> =
            mask.components.iterate_over_ids().collect();
        let mut component_sizes: SmallVec<[usize; 8]> = SmallVec::new();
        let mut component_aligns: SmallVec<[usize; 8]> = SmallVec::new();
        for &component_id in &component_ids {
            let info = component_info(component_id);
            component_sizes.push(info.size);
            component_aligns.push(info.align);
        }
        let shared_component_ids: SmallVec<[SharedComponentId; 4]> =
            mask.shared.iterate_over_ids().collect();

        let layout = ChunkLayout::compute(&component_sizes, &component_aligns);
        trace!(
            "archetype {id} created: {} components, {} shared, capacity {}",
            component_ids.len(),
            shared_component_ids.len(),
            layout.capacity
        );

        Self {
            id,
            mask,
            component_ids,
            component_sizes,
            shared_component_ids,
            layout,
            combinations: Vec::new(),
            lookup: AHashMap::new(),
            free_combinations: Vec::new(),
            entity_count: 0,
            chunk_count: 0,
        }
    }

    /// Stable archetype identifier.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The deduplication mask this archetype was created for.
    #[inline]
    pub fn mask(&self) -> &ArchetypeMask {
        &self.mask
    }

    /// Live entities across all combinations.
    #[inline]
    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    /// Resident 16 KiB blocks across all combinations.
    #[inline]
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Entities one chunk of this archetype holds.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.layout.capacity
    }

    /// Ascending component id list.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    /// Ascending shared-component id list.
    #[inline]
    pub fn shared_component_ids(&self) -> &[SharedComponentId] {
        &self.shared_component_ids
    }

    #[inline]
    fn component_position(&self, component_id: ComponentId) -> Option<usize> {
        self.component_ids.binary_search(&component_id).ok()
    }

    #[inline]
    fn shared_position(&self, shared_id: SharedComponentId) -> Option<usize> {
        self.shared_component_ids.binary_search(&shared_id).ok()
    }

    fn combination(&self, index: CombinationIndex) -> &Combination {
        self.combinations
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .unwrap_or_else(|| panic!("stale entity location: combination {index} is vacant"))
    }

    fn combination_mut(&mut self, index: CombinationIndex) -> &mut Combination {
        self.combinations
            .get_mut(index as usize)
            .and_then(|slot| slot.as_mut())
            .unwrap_or_else(|| panic!("stale entity location: combination {index} is vacant"))
    }

    fn get_or_create_combination(&mut self, shared_indices: SharedTuple) -> CombinationIndex {
        debug_assert_eq!(shared_indices.len(), self.shared_component_ids.len());
        if let Some(&index) = self.lookup.get(&shared_indices) {
            return index;
        }

        let combination = Combination::new(shared_indices.clone());
        let index = match self.free_combinations.pop() {
            Some(index) => {
                self.combinations[index as usize] = Some(combination);
                index
            }
            None => {
                let index = self.combinations.len() as CombinationIndex;
                self.combinations.push(Some(combination));
                index
            }
        };
        self.lookup.insert(shared_indices, index);
        trace!("archetype {}: combination {index} created", self.id);
        index
    }

    /// Recycles a combination that just became empty.
    fn retire_if_empty(&mut self, index: CombinationIndex) {
        let empty = self.combination(index).entity_count == 0;
        if !empty {
            return;
        }
        let combination = self.combinations[index as usize]
            .take()
            .expect("retire_if_empty on a vacant combination");
        debug_assert!(combination.chunks.is_empty());
        self.lookup.remove(&combination.shared_indices);
        self.free_combinations.push(index);
        trace!("archetype {}: combination {index} recycled", self.id);
    }

    fn default_tuple(&self) -> SharedTuple {
        smallvec![INVALID_STORE_INDEX; self.shared_component_ids.len()]
    }

    /// Appends `entity` to the default (all-empty-shared-values)
    /// combination, allocating a chunk when the current one is full.
    pub fn add_entity(&mut self, pool: &mut ChunkPool, entity: Entity) -> EntityLocation {
        let combination_index = self.get_or_create_combination(self.default_tuple());
        let layout = self.layout.clone();
        let combination = self.combination_mut(combination_index);
        let (index, acquired) = combination.push_slot(&layout, pool, entity);
        self.entity_count += 1;
        if acquired {
            self.chunk_count += 1;
        }
        EntityLocation { archetype: self.id, combination: combination_index, index }
    }

    /// Swap-removes the entity at `location`, recycling the emptied
    /// trailing chunk and the combination itself when it empties.
    ///
    /// Returns the entity relocated into the vacated slot, or
    /// [`Entity::INVALID`] when the removed slot was already last.
    pub fn remove_entity(&mut self, pool: &mut ChunkPool, location: EntityLocation) -> Entity {
        debug_assert_eq!(location.archetype, self.id);
        let layout = self.layout.clone();
        let sizes = self.component_sizes.clone();
        let combination = self.combination_mut(location.combination);
        let (swapped, released) = combination.swap_remove(&layout, &sizes, pool, location.index);
        self.entity_count -= 1;
        if released {
            self.chunk_count -= 1;
        }
        self.retire_if_empty(location.combination);
        swapped
    }

    /// In-place byte copy of one component value; no location change.
    ///
    /// ## Panics
    /// Panics when the archetype does not contain `component_id` or the
    /// payload size disagrees with the registered component size.
    pub fn set_component(&mut self, location: EntityLocation, component_id: ComponentId, bytes: &[u8]) {
        let position = self.component_position(component_id).unwrap_or_else(|| {
            panic!("archetype {} does not contain component {component_id}", self.id)
        });
        let size = self.component_sizes[position];
        assert_eq!(bytes.len(), size, "component {component_id} payload size mismatch");
        let offset = self.layout.component_offsets[position];
        let layout = self.layout.clone();
        let combination = self.combination(location.combination);
        let ptr = combination.slot_ptr(&layout, offset, size, location.index);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, size) };
    }

    /// Entity id stored at `location`.
    pub fn entity_at(&self, location: EntityLocation) -> Entity {
        self.combination(location.combination).entity_at(&self.layout, location.index)
    }

    /// Object-store index of `shared_id` for the combination at `location`.
    pub fn shared_index_at(&self, location: EntityLocation, shared_id: SharedComponentId) -> StoreIndex {
        let position = self.shared_position(shared_id).unwrap_or_else(|| {
            panic!("archetype {} does not contain shared component {shared_id}", self.id)
        });
        self.combination(location.combination).shared_indices[position]
    }

    /// Appends a slot in `destination` for the entity at `source_location`,
    /// copies every component common to both layouts (skipping
    /// `skip_component`), optionally writes one fresh component value, then
    /// swap-removes the source slot.
    fn move_row(
        &mut self,
        destination: &mut Archetype,
        pool: &mut ChunkPool,
        source_location: EntityLocation,
        destination_tuple: SharedTuple,
        skip_component: Option<ComponentId>,
        new_component: Option<(ComponentId, &[u8])>,
    ) -> (EntityLocation, Entity) {
        debug_assert_eq!(source_location.archetype, self.id);
        let entity = self.entity_at(source_location);

        let destination_combination = destination.get_or_create_combination(destination_tuple);
        let destination_layout = destination.layout.clone();
        let (destination_index, acquired) = destination
            .combination_mut(destination_combination)
            .push_slot(&destination_layout, pool, entity);
        destination.entity_count += 1;
        if acquired {
            destination.chunk_count += 1;
        }

        // Copy the byte ranges common to both layouts.
        let source_combination = self.combination(source_location.combination);
        let destination_comb = destination.combinations[destination_combination as usize]
            .as_ref()
            .expect("destination combination vanished mid-move");
        for (source_position, &component_id) in self.component_ids.iter().enumerate() {
            if Some(component_id) == skip_component {
                continue;
            }
            let Some(destination_position) = destination.component_position(component_id) else {
                continue;
            };
            let size = self.component_sizes[source_position];
            if size == 0 {
                continue;
            }
            let from = source_combination.slot_ptr(
                &self.layout,
                self.layout.component_offsets[source_position],
                size,
                source_location.index,
            );
            let to = destination_comb.slot_ptr(
                &destination_layout,
                destination_layout.component_offsets[destination_position],
                size,
                destination_index,
            );
            unsafe { std::ptr::copy_nonoverlapping(from, to, size) };
        }

        let destination_location = EntityLocation {
            archetype: destination.id,
            combination: destination_combination,
            index: destination_index,
        };
        if let Some((component_id, bytes)) = new_component {
            destination.set_component(destination_location, component_id, bytes);
        }

        let swapped = self.remove_entity(pool, source_location);
        (destination_location, swapped)
    }

    /// Moves the entity at `source_location` into `destination`, which
    /// differs from this archetype by exactly the added `component_id`.
    /// The destination combination carries the same shared-value tuple as
    /// the source.
    pub fn move_entity_adding_component(
        &mut self,
        destination: &mut Archetype,
        pool: &mut ChunkPool,
        source_location: EntityLocation,
        component_id: ComponentId,
        bytes: &[u8],
    ) -> (EntityLocation, Entity) {
        let tuple = self.combination(source_location.combination).shared_indices.clone();
        self.move_row(
            destination,
            pool,
            source_location,
            tuple,
            Some(component_id),
            Some((component_id, bytes)),
        )
    }

    /// Symmetric to [`Self::move_entity_adding_component`], omitting the
    /// fresh-value write.
    pub fn move_entity_removing_component(
        &mut self,
        destination: &mut Archetype,
        pool: &mut ChunkPool,
        source_location: EntityLocation,
        component_id: ComponentId,
    ) -> (EntityLocation, Entity) {
        let tuple = self.combination(source_location.combination).shared_indices.clone();
        self.move_row(destination, pool, source_location, tuple, Some(component_id), None)
    }

    /// Moves the entity into `destination`, which carries exactly one
    /// additional shared-component id bound to `store_index`.
    ///
    /// Both id arrays are ascending and differ by exactly `shared_id`, so
    /// the destination tuple is produced by one linear pass that inserts
    /// the new index at its sorted position.
    pub fn move_entity_adding_shared_component(
        &mut self,
        destination: &mut Archetype,
        pool: &mut ChunkPool,
        source_location: EntityLocation,
        shared_id: SharedComponentId,
        store_index: StoreIndex,
    ) -> (EntityLocation, Entity) {
        let source_tuple = self.combination(source_location.combination).shared_indices.clone();
        let mut tuple = SharedTuple::with_capacity(destination.shared_component_ids.len());
        let mut source_position = 0usize;
        for &id in &destination.shared_component_ids {
            if id == shared_id {
                tuple.push(store_index);
            } else {
                debug_assert_eq!(self.shared_component_ids[source_position], id);
                tuple.push(source_tuple[source_position]);
                source_position += 1;
            }
        }
        self.move_row(destination, pool, source_location, tuple, None, None)
    }

    /// Moves the entity into `destination`, which lacks exactly
    /// `shared_id`. Returns the store index the entity held for it, for
    /// refcount release by the caller.
    pub fn move_entity_removing_shared_component(
        &mut self,
        destination: &mut Archetype,
        pool: &mut ChunkPool,
        source_location: EntityLocation,
        shared_id: SharedComponentId,
    ) -> (EntityLocation, Entity, StoreIndex) {
        let source_tuple = self.combination(source_location.combination).shared_indices.clone();
        let mut tuple = SharedTuple::with_capacity(destination.shared_component_ids.len());
        let mut removed = INVALID_STORE_INDEX;
        for (position, &id) in self.shared_component_ids.iter().enumerate() {
            if id == shared_id {
                removed = source_tuple[position];
            } else {
                tuple.push(source_tuple[position]);
            }
        }
        debug_assert_eq!(tuple.len(), destination.shared_component_ids.len());
        let (location, swapped) =
            self.move_row(destination, pool, source_location, tuple, None, None);
        (location, swapped, removed)
    }

    /// Rebinds one shared-component value within this archetype, moving
    /// the entity to the combination keyed by the updated tuple.
    ///
    /// Returns the new location, the swap-relocated source entity, and the
    /// store index previously held (for refcount release).
    pub fn set_shared_component(
        &mut self,
        pool: &mut ChunkPool,
        location: EntityLocation,
        shared_id: SharedComponentId,
        store_index: StoreIndex,
    ) -> (EntityLocation, Entity, StoreIndex) {
        let position = self.shared_position(shared_id).unwrap_or_else(|| {
            panic!("archetype {} does not contain shared component {shared_id}", self.id)
        });

        let source_combination = location.combination;
        let mut tuple = self.combination(source_combination).shared_indices.clone();
        let previous = tuple[position];
        if previous == store_index {
            return (location, Entity::INVALID, previous);
        }
        tuple[position] = store_index;

        let entity = self.entity_at(location);
        let destination_combination = self.get_or_create_combination(tuple);
        debug_assert_ne!(destination_combination, source_combination);

        let layout = self.layout.clone();
        let sizes = self.component_sizes.clone();

        // Take the source combination out so source and destination can be
        // borrowed simultaneously within one archetype.
        let mut source = self.combinations[source_combination as usize]
            .take()
            .unwrap_or_else(|| panic!("stale entity location: combination {source_combination} is vacant"));

        let destination = self.combinations[destination_combination as usize]
            .as_mut()
            .expect("destination combination vanished mid-move");
        let (destination_index, acquired) = destination.push_slot(&layout, pool, entity);
        if acquired {
            self.chunk_count += 1;
        }
        for (component_position, &size) in sizes.iter().enumerate() {
            if size == 0 {
                continue;
            }
            let offset = layout.component_offsets[component_position];
            let from = source.slot_ptr(&layout, offset, size, location.index);
            let to = destination.slot_ptr(&layout, offset, size, destination_index);
            unsafe { std::ptr::copy_nonoverlapping(from, to, size) };
        }

        let (swapped, released) = source.swap_remove(&layout, &sizes, pool, location.index);
        if released {
            self.chunk_count -= 1;
        }

        if source.entity_count == 0 {
            self.lookup.remove(&source.shared_indices);
            self.free_combinations.push(source_combination);
        } else {
            self.combinations[source_combination as usize] = Some(source);
        }

        (
            EntityLocation {
                archetype: self.id,
                combination: destination_combination,
                index: destination_index,
            },
            swapped,
            previous,
        )
    }

    /// Returns every resident chunk to `pool`. Teardown only: entity data
    /// is gone afterwards and the archetype must not be used again.
    pub(crate) fn release_chunks(&mut self, pool: &mut ChunkPool) {
        for combination in self.combinations.iter_mut().flatten() {
            for chunk in combination.chunks.drain(..) {
                pool.release(chunk);
            }
            combination.entity_count = 0;
        }
        self.entity_count = 0;
        self.chunk_count = 0;
    }

    /// Appends one [`ChunkAccessor`] per resident chunk of every
    /// combination matching `filter`. The final chunk of a combination
    /// reports its true entity count; earlier chunks report full capacity.
    pub fn filter_entities(
        &self,
        filter: &EntityFilter,
        store: &ObjectStore,
        out: &mut Vec<ChunkAccessor>,
    ) {
        if !filter.satisfied_by_mask(&self.mask) {
            return;
        }

        let capacity = self.layout.capacity;
        for combination in self.combinations.iter().flatten() {
            if !filter.satisfied_by_values(&self.shared_component_ids, &combination.shared_indices) {
                continue;
            }
            let last_chunk = combination.chunks.len().saturating_sub(1);
            for (chunk_index, &chunk) in combination.chunks.iter().enumerate() {
                let count = if chunk_index == last_chunk {
                    combination.entity_count - chunk_index as u32 * capacity
                } else {
                    capacity
                };
                out.push(ChunkAccessor {
                    chunk,
                    entity_count: count,
                    capacity,
                    entity_offset: self.layout.entity_offset,
                    component_ids: self.component_ids.clone(),
                    component_sizes: self.component_sizes.clone(),
                    component_offsets: self.layout.component_offsets.clone(),
                    shared_ids: self.shared_component_ids.clone(),
                    shared_indices: combination.shared_indices.clone(),
                    store,
                });
            }
        }
    }
}

/// Read/write view of one resident chunk, handed to scheduled task code.
///
/// All raw-pointer reinterpretation of chunk memory is confined here;
/// every typed access validates component presence and element size first.
///
/// ## Safety
/// Accessors are snapshots: they are valid until the next command-buffer
/// commit. The slice partitioning of a schedule call guarantees that no
/// two concurrently running tasks receive the same chunk, and the
/// barrier-before-commit discipline keeps storage immutable while any
/// accessor is live.
pub struct ChunkAccessor {
    chunk: NonNull<u8>,
    entity_count: u32,
    capacity: u32,
    entity_offset: usize,
    component_ids: SmallVec<[ComponentId; 8]>,
    component_sizes: SmallVec<[usize; 8]>,
    component_offsets: SmallVec<[usize; 8]>,
    shared_ids: SmallVec<[SharedComponentId; 4]>,
    shared_indices: SharedTuple,
    store: *const ObjectStore,
}

// Chunk disjointness across tasks is guaranteed by schedule partitioning;
// the store is read-only while tasks run.
unsafe impl Send for ChunkAccessor {}
unsafe impl Sync for ChunkAccessor {}

impl ChunkAccessor {
    /// Number of live entities in this chunk.
    #[inline]
    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    /// Chunk capacity in entities (resident count for all but the final
    /// chunk of a combination).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The packed entity id array.
    pub fn entity_array(&self) -> &[Entity] {
        unsafe {
            std::slice::from_raw_parts(
                self.chunk.as_ptr().add(self.entity_offset) as *const Entity,
                self.entity_count as usize,
            )
        }
    }

    #[inline]
    fn component_slot(&self, component_id: ComponentId, elem_size: usize) -> *mut u8 {
        let position = self.component_ids.binary_search(&component_id).unwrap_or_else(|_| {
            panic!("chunk does not contain component {component_id}")
        });
        assert_eq!(
            self.component_sizes[position], elem_size,
            "component {component_id} element size mismatch"
        );
        unsafe { self.chunk.as_ptr().add(self.component_offsets[position]) }
    }

    /// Shared read view of one component array.
    ///
    /// ## Panics
    /// Panics when the chunk lacks `component_id` or `T` does not match
    /// the registered type for it.
    pub fn component_array<T: ComponentData>(&self, component_id: ComponentId) -> &[T] {
        debug_assert_eq!(component_id_of::<T>(), component_id);
        let ptr = self.component_slot(component_id, std::mem::size_of::<T>());
        unsafe { std::slice::from_raw_parts(ptr as *const T, self.entity_count as usize) }
    }

    /// Mutable view of one component array.
    ///
    /// ## Safety
    /// The caller must not hold any other view of the same component array
    /// of this chunk while the returned slice is live. Distinct component
    /// ids and distinct chunks never alias.
    pub unsafe fn component_array_mut<T: ComponentData>(&self, component_id: ComponentId) -> &mut [T] {
        debug_assert_eq!(component_id_of::<T>(), component_id);
        let ptr = self.component_slot(component_id, std::mem::size_of::<T>());
        unsafe { std::slice::from_raw_parts_mut(ptr as *mut T, self.entity_count as usize) }
    }

    /// The shared-component value every entity of this chunk references.
    ///
    /// ## Panics
    /// Panics when the chunk lacks `shared_id` or no value is bound.
    pub fn shared_component<S: SharedComponentData>(&self, shared_id: SharedComponentId) -> &S {
        let position = self.shared_ids.binary_search(&shared_id).unwrap_or_else(|_| {
            panic!("chunk does not contain shared component {shared_id}")
        });
        let index = self.shared_indices[position];
        assert!(
            index != INVALID_STORE_INDEX,
            "shared component {shared_id} has no value bound for this chunk"
        );
        unsafe { &*self.store }.get::<S>(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_packs_largest_alignment_first() {
        // 8-byte, 4-byte, and 1-byte components plus the 4-byte entity id.
        let layout = ChunkLayout::compute(&[4, 8, 1], &[4, 8, 1]);
        let capacity = layout.capacity as usize;
        assert_eq!(capacity, CHUNK_BYTE_SIZE / (4 + 4 + 8 + 1));

        // The 8-aligned array comes first.
        assert_eq!(layout.component_offsets[1], 0);
        assert!(layout.component_offsets[0] >= 8 * capacity);
        for (&offset, &align) in layout.component_offsets.iter().zip([4usize, 8, 1].iter()) {
            assert_eq!(offset % align, 0);
        }
    }

    #[test]
    fn layout_shrinks_capacity_when_padding_overflows() {
        // Worst-case padding must never push the arena past its size.
        let layout = ChunkLayout::compute(&[1, 64], &[1, 64]);
        let capacity = layout.capacity as usize;
        let end = layout
            .component_offsets
            .iter()
            .zip([1usize, 64].iter())
            .map(|(&offset, &size)| offset + size * capacity)
            .max()
            .unwrap()
            .max(layout.entity_offset + 4 * capacity);
        assert!(end <= CHUNK_BYTE_SIZE);
        assert!(capacity > 0);
    }
}
