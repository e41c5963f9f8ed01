//! Boolean predicates over archetype signatures and shared-component
//! values.
//!
//! An [`EntityFilter`] selects matching chunks in two steps:
//!
//! 1. **Mask test**: required component / shared-component bits must be a
//!    subset of the archetype's bits, rejected bits must be disjoint.
//! 2. **Value test**: exact `(sharedComponentId, storeIndex)` pairs are
//!    matched against each combination's concrete tuple. Both id arrays
//!    are ascending; repeated ids in the archetype give OR semantics for a
//!    required pair, and a required id absent from the archetype entirely
//!    fails the filter.
//!
//! Filters are built fluently through [`EntityFilterBuilder`] from
//! registered component types.

use smallvec::SmallVec;

use crate::engine::component::{component_id_of, shared_component_id_of, ComponentData};
use crate::engine::store::SharedComponentData;
use crate::engine::types::{ArchetypeMask, SharedComponentId, Signature, StoreIndex};

/// Exact shared-value requirement, ascending by id.
pub type SharedValuePairs = SmallVec<[(SharedComponentId, StoreIndex); 4]>;

/// Predicate over an archetype's signature and shared-component values.
#[derive(Clone, Debug, Default)]
pub struct EntityFilter {
    /// Components every matching archetype must contain.
    pub required: Signature,
    /// Components no matching archetype may contain.
    pub rejected: Signature,
    /// Shared-component ids every matching archetype must contain.
    pub required_shared: Signature,
    /// Shared-component ids no matching archetype may contain.
    pub rejected_shared: Signature,
    /// Exact shared values a matching combination must carry.
    pub required_values: SharedValuePairs,
    /// Exact shared values a matching combination must not carry.
    pub rejected_values: SharedValuePairs,
}

impl EntityFilter {
    /// Starts fluent construction of a filter.
    pub fn builder() -> EntityFilterBuilder {
        EntityFilterBuilder { filter: EntityFilter::default() }
    }

    /// Signature-level test against an archetype mask.
    pub fn satisfied_by_mask(&self, mask: &ArchetypeMask) -> bool {
        mask.components.contains_all(&self.required)
            && mask.components.disjoint(&self.rejected)
            && mask.shared.contains_all(&self.required_shared)
            && mask.shared.disjoint(&self.rejected_shared)
    }

    /// Value-level test against one combination's concrete tuple.
    ///
    /// `shared_ids` and `shared_indices` are the archetype's ascending id
    /// array and the combination's parallel index array.
    pub fn satisfied_by_values(
        &self,
        shared_ids: &[SharedComponentId],
        shared_indices: &[StoreIndex],
    ) -> bool {
        debug_assert_eq!(shared_ids.len(), shared_indices.len());

        for &(id, index) in &self.required_values {
            // OR across repeated occurrences of the same id; an absent id
            // is an unsatisfiable comparison and fails the filter.
            let matched = shared_ids
                .iter()
                .zip(shared_indices.iter())
                .any(|(&shared_id, &shared_index)| shared_id == id && shared_index == index);
            if !matched {
                return false;
            }
        }

        for &(id, index) in &self.rejected_values {
            let matched = shared_ids
                .iter()
                .zip(shared_indices.iter())
                .any(|(&shared_id, &shared_index)| shared_id == id && shared_index == index);
            if matched {
                return false;
            }
        }

        true
    }
}

/// Fluent [`EntityFilter`] construction from registered types.
pub struct EntityFilterBuilder {
    filter: EntityFilter,
}

impl EntityFilterBuilder {
    /// Requires component `T`.
    pub fn with<T: ComponentData>(mut self) -> Self {
        self.filter.required.set(component_id_of::<T>());
        self
    }

    /// Rejects component `T`.
    pub fn without<T: ComponentData>(mut self) -> Self {
        self.filter.rejected.set(component_id_of::<T>());
        self
    }

    /// Requires shared component `S` to be present, with any value.
    pub fn with_shared<S: SharedComponentData>(mut self) -> Self {
        self.filter.required_shared.set(shared_component_id_of::<S>());
        self
    }

    /// Rejects shared component `S`.
    pub fn without_shared<S: SharedComponentData>(mut self) -> Self {
        self.filter.rejected_shared.set(shared_component_id_of::<S>());
        self
    }

    /// Requires shared component `S` to be bound to the exact store index.
    ///
    /// Obtain the index through the entity manager's value lookup; it also
    /// implies presence of `S`.
    pub fn with_shared_value<S: SharedComponentData>(mut self, index: StoreIndex) -> Self {
        let id = shared_component_id_of::<S>();
        self.filter.required_shared.set(id);
        let at = self.filter.required_values.partition_point(|&(pair_id, _)| pair_id < id);
        self.filter.required_values.insert(at, (id, index));
        self
    }

    /// Rejects combinations binding shared component `S` to the exact
    /// store index.
    pub fn without_shared_value<S: SharedComponentData>(mut self, index: StoreIndex) -> Self {
        let id = shared_component_id_of::<S>();
        let at = self.filter.rejected_values.partition_point(|&(pair_id, _)| pair_id < id);
        self.filter.rejected_values.insert(at, (id, index));
        self
    }

    /// Finishes construction.
    pub fn build(self) -> EntityFilter {
        self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::build_signature;

    fn mask_of(components: &[u16], shared: &[u16]) -> ArchetypeMask {
        ArchetypeMask {
            components: build_signature(components),
            shared: build_signature(shared),
            ..ArchetypeMask::default()
        }
    }

    #[test]
    fn required_and_rejected_bits() {
        let filter = EntityFilter {
            required: build_signature(&[0]),
            rejected: build_signature(&[1]),
            ..EntityFilter::default()
        };

        assert!(filter.satisfied_by_mask(&mask_of(&[0, 2], &[])));
        assert!(!filter.satisfied_by_mask(&mask_of(&[0, 1], &[])));
        assert!(!filter.satisfied_by_mask(&mask_of(&[1], &[])));
        assert!(filter.satisfied_by_mask(&mask_of(&[0], &[])));
    }

    #[test]
    fn value_pairs_use_or_semantics_over_repeated_ids() {
        let mut filter = EntityFilter::default();
        filter.required_values.push((3, 7));

        // Repeated occurrences of id 3: one match suffices.
        assert!(filter.satisfied_by_values(&[3, 3], &[9, 7]));
        assert!(!filter.satisfied_by_values(&[3, 3], &[9, 8]));
        // Required id absent entirely: unsatisfiable.
        assert!(!filter.satisfied_by_values(&[4], &[7]));
    }

    #[test]
    fn rejected_value_pair_must_match_none() {
        let mut filter = EntityFilter::default();
        filter.rejected_values.push((2, 5));

        assert!(filter.satisfied_by_values(&[2], &[6]));
        assert!(!filter.satisfied_by_values(&[2], &[5]));
        assert!(filter.satisfied_by_values(&[], &[]));
    }
}
