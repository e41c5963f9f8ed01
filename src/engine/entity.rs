//! Entity identifiers, storage locations, and id allocation.
//!
//! Entities are pure identifiers; all state lives in chunk storage and is
//! located indirectly through an [`EntityLocation`] held in a dense table
//! indexed by id. The allocator hands out recycled ids from a free list
//! before growing the counter, and is the only piece of the storage layer
//! guarded by a lock: per-task command buffers reserve ids concurrently
//! while every other mutation is deferred to the commit phase.

use bytemuck::{Pod, Zeroable};

use crate::engine::types::{ArchetypeId, CombinationIndex, INVALID_ARCHETYPE};

/// Opaque entity identifier.
///
/// `u32::MAX` is the sentinel invalid value. `Pod` so entity arrays can
/// live inside raw chunk memory alongside component arrays.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Pod, Zeroable)]
pub struct Entity(pub u32);

impl Entity {
    /// The sentinel invalid entity.
    pub const INVALID: Entity = Entity(u32::MAX);

    /// Returns `true` unless this is the invalid sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Where an entity's component data currently lives.
///
/// Mutated whenever the entity's component set, shared-component set, or
/// position within a chunk changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Owning archetype.
    pub archetype: ArchetypeId,
    /// Combination slot within the archetype.
    pub combination: CombinationIndex,
    /// Packed index within the combination; `index / capacity` selects the
    /// chunk, `index % capacity` the slot.
    pub index: u32,
}

impl Default for EntityLocation {
    fn default() -> Self {
        Self::INVALID
    }
}

impl EntityLocation {
    /// Location of an entity that is not materialized anywhere.
    pub const INVALID: EntityLocation = EntityLocation {
        archetype: INVALID_ARCHETYPE,
        combination: 0,
        index: 0,
    };

    /// Returns `true` if the location points into an archetype.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.archetype != INVALID_ARCHETYPE
    }
}

/// Thread-safe id source; callers wrap it in the manager's mutex.
///
/// Recycled ids get a fresh (invalid) location on allocation; the location
/// table itself lives in the manager and is only touched during commit.
#[derive(Default)]
pub struct EntityAllocator {
    next: u32,
    free: Vec<u32>,
}

impl EntityAllocator {
    /// Creates an allocator with no ids handed out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh or recycled id.
    pub fn allocate(&mut self) -> Entity {
        if let Some(id) = self.free.pop() {
            return Entity(id);
        }
        let id = self.next;
        assert!(id != u32::MAX, "entity id space exhausted");
        self.next += 1;
        Entity(id)
    }

    /// Returns an id to the free list.
    pub fn release(&mut self, entity: Entity) {
        debug_assert!(entity.is_valid(), "released the invalid entity sentinel");
        self.free.push(entity.0);
    }

    /// Upper bound (exclusive) of ids ever handed out; sizes the location
    /// table.
    #[inline]
    pub fn id_bound(&self) -> u32 {
        self.next
    }
}
