//! Core identifiers, capacity constants, and bit-level signatures.
//!
//! This module defines the **fundamental types, identifiers, and bit layouts**
//! shared across all subsystems of the runtime: archetype storage, the shared
//! component store, entity filtering, command processing, and scheduling.
//!
//! ## Design Philosophy
//!
//! The storage core is designed around:
//!
//! - **Dense chunked storage**
//! - **Bitset-based type signatures**
//! - **Stable numeric identifiers**
//! - **No heap allocation in hot paths**
//!
//! To support these goals this module:
//!
//! - Represents component and shared-component sets as fixed-size bit arrays,
//! - Uses small, copyable numeric IDs for every runtime concept,
//! - Encodes archetype identity as a hashable mask of four bitsets.
//!
//! ## Archetypes and Masks
//!
//! Components and shared components are identified by compact [`ComponentId`]
//! / [`SharedComponentId`] values. An archetype is described by an
//! [`ArchetypeMask`]: the component bitset, the shared-component bitset, and
//! two *manual* sub-masks flagging types that are never removed implicitly
//! when an entity is destroyed.
//!
//! Masks:
//!
//! - are fixed-size arrays of `u64` words,
//! - support fast bitwise comparison and hashing,
//! - are the deduplication key of the archetype registry.

/// Unique identifier for a plain-data component type.
pub type ComponentId = u16;
/// Unique identifier for a shared-component type.
pub type SharedComponentId = u16;
/// Unique identifier for an archetype.
pub type ArchetypeId = u16;
/// Index of a combination within an archetype.
pub type CombinationIndex = u32;
/// Index of a deduplicated value inside the object store.
pub type StoreIndex = u32;

/// Sentinel archetype id for entities not yet materialized.
pub const INVALID_ARCHETYPE: ArchetypeId = ArchetypeId::MAX;
/// Sentinel object-store index meaning "no value".
pub const INVALID_STORE_INDEX: StoreIndex = StoreIndex::MAX;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;
/// Maximum number of registered shared-component types.
pub const SHARED_COMPONENT_CAP: usize = 256;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Bitset representing a set of component or shared-component ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed id bitset.
    pub words: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self { words: [0u64; SIGNATURE_SIZE] }
    }
}

impl Signature {
    /// Sets the bit corresponding to `id`.
    #[inline]
    pub fn set(&mut self, id: u16) {
        self.words[(id as usize) / 64] |= 1u64 << ((id as usize) % 64);
    }

    /// Clears the bit corresponding to `id`.
    #[inline]
    pub fn clear(&mut self, id: u16) {
        self.words[(id as usize) / 64] &= !(1u64 << ((id as usize) % 64));
    }

    /// Returns `true` if `id` is present in this signature.
    #[inline]
    pub fn has(&self, id: u16) -> bool {
        (self.words[(id as usize) / 64] >> ((id as usize) % 64)) & 1 == 1
    }

    /// Returns `true` if no bits are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Number of set bits.
    #[inline]
    pub fn count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    /// Returns `true` if every bit of `other` is also set in `self`.
    #[inline]
    pub fn contains_all(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(word, need)| (word & need) == *need)
    }

    /// Returns `true` if `self` and `other` share no set bits.
    #[inline]
    pub fn disjoint(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| (a & b) == 0)
    }

    /// Iterates over all ids set in this signature, in ascending order.
    pub fn iterate_over_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let base = word_index * 64;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((base + tz) as u16)
            })
        })
    }
}

/// Builds a signature from a list of ids.
pub fn build_signature(ids: &[u16]) -> Signature {
    let mut signature = Signature::default();
    for &id in ids {
        signature.set(id);
    }
    signature
}

/// Archetype identity: the exact set of component and shared-component types
/// an entity carries, plus the sub-masks of *manual* types.
///
/// ## Invariants
/// - `manual_components` is a subset of `components`, `manual_shared` of
///   `shared`.
/// - Equality and hashing over all four bitsets is the archetype
///   deduplication key: two entities with identical masks share one
///   archetype regardless of registration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ArchetypeMask {
    /// Component type bitset.
    pub components: Signature,
    /// Shared-component type bitset.
    pub shared: Signature,
    /// Components that survive implicit destruction.
    pub manual_components: Signature,
    /// Shared components that survive implicit destruction.
    pub manual_shared: Signature,
}

impl ArchetypeMask {
    /// Total number of component and shared-component types in the mask.
    #[inline]
    pub fn count(&self) -> u32 {
        self.components.count() + self.shared.count()
    }

    /// Returns `true` if the mask names exactly one type.
    #[inline]
    pub fn single(&self) -> bool {
        self.count() == 1
    }

    /// Returns `true` if the mask is non-empty and every set bit is also a
    /// manual bit. Fully-manual archetypes are never torn down by implicit
    /// entity destruction.
    #[inline]
    pub fn fully_manual(&self) -> bool {
        self.count() > 0
            && self.components == self.manual_components
            && self.shared == self.manual_shared
    }

    /// Returns `true` if any manual bit is set.
    #[inline]
    pub fn partially_manual(&self) -> bool {
        !self.manual_components.is_empty() || !self.manual_shared.is_empty()
    }

    /// Adds a component bit, flagging it manual when requested.
    #[inline]
    pub fn set_component(&mut self, id: ComponentId, manual: bool) {
        self.components.set(id);
        if manual {
            self.manual_components.set(id);
        }
    }

    /// Removes a component bit and its manual flag.
    #[inline]
    pub fn clear_component(&mut self, id: ComponentId) {
        self.components.clear(id);
        self.manual_components.clear(id);
    }

    /// Adds a shared-component bit, flagging it manual when requested.
    #[inline]
    pub fn set_shared(&mut self, id: SharedComponentId, manual: bool) {
        self.shared.set(id);
        if manual {
            self.manual_shared.set(id);
        }
    }

    /// Removes a shared-component bit and its manual flag.
    #[inline]
    pub fn clear_shared(&mut self, id: SharedComponentId) {
        self.shared.clear(id);
        self.manual_shared.clear(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_set_clear_has() {
        let mut signature = Signature::default();
        signature.set(3);
        signature.set(130);
        assert!(signature.has(3));
        assert!(signature.has(130));
        assert_eq!(signature.count(), 2);
        signature.clear(3);
        assert!(!signature.has(3));
        assert_eq!(signature.iterate_over_ids().collect::<Vec<_>>(), vec![130]);
    }

    #[test]
    fn mask_fully_manual_requires_every_bit_manual() {
        let mut mask = ArchetypeMask::default();
        assert!(!mask.fully_manual());

        mask.set_component(1, true);
        assert!(mask.fully_manual());
        assert!(mask.single());

        mask.set_shared(2, false);
        assert!(!mask.fully_manual());
        assert!(mask.partially_manual());

        mask.clear_shared(2);
        mask.set_shared(2, true);
        assert!(mask.fully_manual());
        assert_eq!(mask.count(), 2);
    }
}
