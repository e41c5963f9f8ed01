//! Error types for the component registration surface.
//!
//! This module declares the small set of recoverable errors the runtime
//! exposes. The storage and scheduling layers deliberately surface **no**
//! recoverable runtime errors: non-matching filters and empty schedules are
//! ordinary empty results, pool growth is unconditional, and detectable
//! contract violations (unregistered types, stale locations, absent
//! component ids) panic loudly rather than corrupting storage.
//!
//! Registration is the one surface where a caller can sensibly recover, so
//! it returns structured errors with enough context to be actionable.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

/// Returned when a component or shared-component registration cannot be
/// satisfied.
///
/// ### Example
/// ```ignore
/// if next_id as usize >= COMPONENT_CAP {
///     return Err(RegistryError::CapacityExceeded {
///         registered: COMPONENT_CAP,
///         capacity: COMPONENT_CAP,
///     });
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The fixed id space for this kind of type is exhausted.
    CapacityExceeded {
        /// Number of types already registered.
        registered: usize,
        /// The configured upper bound.
        capacity: usize,
    },
    /// The type's alignment exceeds the chunk block alignment, so no chunk
    /// layout could place it.
    AlignmentUnsupported {
        /// The offending alignment.
        align: usize,
        /// The maximum supported alignment.
        max_align: usize,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { registered, capacity } => write!(
                f,
                "type id space exhausted ({registered} registered; capacity {capacity})"
            ),
            RegistryError::AlignmentUnsupported { align, max_align } => write!(
                f,
                "component alignment {align} exceeds chunk alignment {max_align}"
            ),
        }
    }
}

impl std::error::Error for RegistryError {}
