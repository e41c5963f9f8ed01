//! # ECS Runtime
//!
//! Data-oriented entity-component runtime: archetype-chunked storage,
//! deduplicated shared-component values, deferred structural mutation,
//! and a dependency-graph task scheduler driving systems each frame.
//!
//! ## Design Goals
//! - Archetype-based chunk storage for cache efficiency
//! - One commit point per frame; storage immutable while tasks run
//! - Parallel chunk fan-out over an explicit worker pool
//! - Safe, explicit data access through chunk accessors

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;
pub mod task;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core storage types

pub use engine::manager::{
    ArchetypeBuilder,
    EcsManager,
    EcsRef,
    EntityManager,
};

pub use engine::entity::{
    Entity,
    EntityLocation,
};

pub use engine::component::{
    ComponentData,
    ComponentInfo,
    SharedComponentInfo,
    component_id_of,
    register_component,
    register_manual_component,
    register_manual_shared_component,
    register_shared_component,
    shared_component_id_of,
};

pub use engine::store::{ObjectStore, SharedComponentData};

pub use engine::archetype::{Archetype, ChunkAccessor};
pub use engine::chunk::{ChunkPool, CHUNK_ALIGN, CHUNK_BYTE_SIZE};

pub use engine::filter::{EntityFilter, EntityFilterBuilder};
pub use engine::commands::EntityCommandBuffer;

pub use engine::system::{System, SystemContext, MIN_CHUNKS_PER_TASK};
pub use engine::world::{Time, World};

pub use engine::error::RegistryError;

pub use engine::types::{
    ArchetypeId,
    ArchetypeMask,
    CombinationIndex,
    ComponentId,
    SharedComponentId,
    Signature,
    StoreIndex,
};

pub use task::{TaskHandle, TaskManager, DEFAULT_WORKER_COUNT};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used runtime types.
///
/// Import with:
/// ```rust
/// use ecs_runtime::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        component_id_of,
        register_component,
        register_shared_component,
        shared_component_id_of,
        ArchetypeBuilder,
        ChunkAccessor,
        Entity,
        EntityCommandBuffer,
        EntityFilter,
        EntityManager,
        System,
        SystemContext,
        TaskManager,
        Time,
        World,
    };
}
