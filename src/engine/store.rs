//! Reference-counted, content-deduplicated storage for shared-component
//! values.
//!
//! Shared-component identity is *value* identity, not pointer identity: two
//! entities referencing equal values share one stored copy and one
//! [`StoreIndex`]. The store deduplicates by `(TypeId, hash, equality)`;
//! hashing and comparison are resolved at compile time through the
//! [`SharedComponentData`] trait bound rather than through runtime
//! function-pointer vtables.
//!
//! ## Lifecycle
//! - [`ObjectStore::push`] increments the refcount of an existing equal
//!   value or heap-clones the value into a fresh (possibly recycled) slot
//!   with refcount 1.
//! - [`ObjectStore::pop`] decrements; at zero the entry is erased from the
//!   lookup index, the value is dropped, and the index returns to the free
//!   list. Popping [`INVALID_STORE_INDEX`] is a no-op.
//! - [`ObjectStore::find`] resolves a value to its index without touching
//!   refcounts; a value of a type never pushed reports "not found" rather
//!   than erroring.

use std::any::{Any, TypeId};
use std::hash::Hash;

use ahash::{AHashMap, RandomState};
use smallvec::SmallVec;

use crate::engine::types::{StoreIndex, INVALID_STORE_INDEX};

/// Bound required of shared-component value types.
///
/// Resolved per concrete type at compile time; registering hash/equality
/// function pointers at runtime is never necessary.
pub trait SharedComponentData: 'static + Send + Sync + Clone + Hash + PartialEq {}

impl<T: 'static + Send + Sync + Clone + Hash + PartialEq> SharedComponentData for T {}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    hash: u64,
    ref_count: u32,
}

/// Deduplicated shared-component value store.
pub struct ObjectStore {
    entries: Vec<Option<Entry>>,
    /// `(TypeId, hash)` buckets; entries with colliding hashes coexist and
    /// are disambiguated by typed equality at push/find time.
    lookup: AHashMap<(TypeId, u64), SmallVec<[StoreIndex; 2]>>,
    free: Vec<StoreIndex>,
    hasher: RandomState,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            lookup: AHashMap::new(),
            free: Vec::new(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn hash_value<T: SharedComponentData>(&self, value: &T) -> u64 {
        self.hasher.hash_one(value)
    }

    /// Stores `value`, deduplicating against existing entries of the same
    /// type.
    ///
    /// ## Behavior
    /// - On a value-equality hit the existing entry's refcount is
    ///   incremented and its index returned.
    /// - On a miss the value is cloned into a fresh slot (reusing a free
    ///   index if any) with refcount 1.
    pub fn push<T: SharedComponentData>(&mut self, value: &T) -> StoreIndex {
        let type_id = TypeId::of::<T>();
        let hash = self.hash_value(value);

        if let Some(bucket) = self.lookup.get(&(type_id, hash)) {
            for &index in bucket {
                let entry = self.entries[index as usize]
                    .as_mut()
                    .expect("lookup bucket referenced a vacant store slot");
                let stored = entry
                    .value
                    .downcast_ref::<T>()
                    .expect("store entry type diverged from its bucket key");
                if stored == value {
                    let entry = self.entries[index as usize].as_mut().unwrap();
                    entry.ref_count += 1;
                    return index;
                }
            }
        }

        let entry = Entry {
            value: Box::new(value.clone()),
            type_id,
            hash,
            ref_count: 1,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                index
            }
            None => {
                let index = self.entries.len() as StoreIndex;
                assert!(index != INVALID_STORE_INDEX, "object store index space exhausted");
                self.entries.push(Some(entry));
                index
            }
        };

        self.lookup.entry((type_id, hash)).or_default().push(index);
        index
    }

    /// Drops one reference to the value at `index`, freeing the slot when
    /// the count reaches zero. No-op on [`INVALID_STORE_INDEX`].
    ///
    /// ## Panics
    /// Panics if `index` does not name a live entry.
    pub fn pop(&mut self, index: StoreIndex) {
        if index == INVALID_STORE_INDEX {
            return;
        }

        let entry = self.entries[index as usize]
            .as_mut()
            .expect("pop on a vacant object store slot");
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return;
        }

        let (type_id, hash) = (entry.type_id, entry.hash);
        self.entries[index as usize] = None;
        self.free.push(index);

        let bucket = self
            .lookup
            .get_mut(&(type_id, hash))
            .expect("freed store entry missing from lookup index");
        bucket.retain(|&mut i| i != index);
        if bucket.is_empty() {
            self.lookup.remove(&(type_id, hash));
        }
    }

    /// Typed view of the value at `index`.
    ///
    /// ## Panics
    /// Panics if the slot is vacant or was pushed for a different type; the
    /// caller guarantees `index` was obtained for `T`.
    pub fn get<T: SharedComponentData>(&self, index: StoreIndex) -> &T {
        self.entries
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .expect("object store index does not name a live entry")
            .value
            .downcast_ref::<T>()
            .expect("object store index was obtained for a different type")
    }

    /// Resolves an equal value to its index without changing refcounts.
    ///
    /// Returns `None` when no equal value is stored, including for types
    /// never pushed at all.
    pub fn find<T: SharedComponentData>(&self, value: &T) -> Option<StoreIndex> {
        let type_id = TypeId::of::<T>();
        let hash = self.hash_value(value);
        let bucket = self.lookup.get(&(type_id, hash))?;
        bucket.iter().copied().find(|&index| {
            self.entries[index as usize]
                .as_ref()
                .and_then(|entry| entry.value.downcast_ref::<T>())
                .is_some_and(|stored| stored == value)
        })
    }

    /// Current reference count of the entry at `index`, if live.
    pub fn ref_count(&self, index: StoreIndex) -> Option<u32> {
        self.entries
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.ref_count)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Hash, PartialEq, Debug)]
    struct Palette {
        tint: u32,
    }

    #[test]
    fn equal_values_share_one_entry() {
        let mut store = ObjectStore::new();
        let a = store.push(&Palette { tint: 7 });
        let b = store.push(&Palette { tint: 7 });
        assert_eq!(a, b);
        assert_eq!(store.ref_count(a), Some(2));
        assert_eq!(store.len(), 1);

        store.pop(a);
        assert_eq!(store.ref_count(a), Some(1));
        assert_eq!(store.find(&Palette { tint: 7 }), Some(a));

        store.pop(a);
        assert_eq!(store.find(&Palette { tint: 7 }), None);
        assert!(store.is_empty());
    }

    #[test]
    fn freed_indices_are_reused() {
        let mut store = ObjectStore::new();
        let a = store.push(&Palette { tint: 1 });
        store.pop(a);
        let b = store.push(&Palette { tint: 2 });
        assert_eq!(a, b);
    }

    #[test]
    fn find_on_never_pushed_type_reports_not_found() {
        let store = ObjectStore::new();
        assert_eq!(store.find(&Palette { tint: 1 }), None);
    }

    #[test]
    fn pop_of_invalid_index_is_a_no_op() {
        let mut store = ObjectStore::new();
        store.pop(INVALID_STORE_INDEX);
        assert!(store.is_empty());
    }
}
