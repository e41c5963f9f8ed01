//! Component and shared-component registration.
//!
//! This module provides the process-wide registry that assigns stable
//! [`ComponentId`] / [`SharedComponentId`] values to Rust types and records
//! the size, alignment, and *manual* flag the storage layer needs to compute
//! chunk layouts and destruction behavior.
//!
//! ## Design
//! - A type is registered once and keeps its compact id for the lifetime of
//!   the process; repeat registration returns the existing id.
//! - Plain-data components are bound by [`ComponentData`] (`bytemuck::Pod`),
//!   so the raw-byte chunk representation is valid for every registered
//!   type by construction.
//! - Shared components are bound by
//!   [`SharedComponentData`](crate::engine::store::SharedComponentData)
//!   (hash + equality + clone), resolved per concrete type at compile time.
//!
//! ## Concurrency
//! Both registries live behind `OnceLock<RwLock<…>>`: concurrent reads on
//! the hot id-lookup path, serialized writes during registration.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::{OnceLock, RwLock};

use crate::engine::chunk::CHUNK_ALIGN;
use crate::engine::error::RegistryError;
use crate::engine::store::SharedComponentData;
use crate::engine::types::{ComponentId, SharedComponentId, COMPONENT_CAP, SHARED_COMPONENT_CAP};

/// Bound required of plain-data component types.
///
/// `Pod` guarantees every bit pattern is valid, which makes the zeroed
/// chunk slots and raw byte copies of the storage layer sound.
pub trait ComponentData: bytemuck::Pod + Send + Sync + 'static {}

impl<T: bytemuck::Pod + Send + Sync + 'static> ComponentData for T {}

/// Metadata recorded for a registered component type.
#[derive(Clone, Copy, Debug)]
pub struct ComponentInfo {
    /// Compact runtime identifier.
    pub id: ComponentId,
    /// Size in bytes, captured at registration time.
    pub size: usize,
    /// Alignment in bytes, captured at registration time.
    pub align: usize,
    /// `true` if the component is never removed implicitly on destruction.
    pub manual: bool,
    /// Human-readable type name for diagnostics.
    pub name: &'static str,
}

/// Metadata recorded for a registered shared-component type.
#[derive(Clone, Copy, Debug)]
pub struct SharedComponentInfo {
    /// Compact runtime identifier.
    pub id: SharedComponentId,
    /// `true` if the shared component is never removed implicitly.
    pub manual: bool,
    /// Human-readable type name for diagnostics.
    pub name: &'static str,
}

struct Registry<Info> {
    by_type: HashMap<TypeId, u16>,
    infos: Vec<Info>,
}

impl<Info> Registry<Info> {
    fn new() -> Self {
        Self { by_type: HashMap::new(), infos: Vec::new() }
    }
}

static COMPONENTS: OnceLock<RwLock<Registry<ComponentInfo>>> = OnceLock::new();
static SHARED: OnceLock<RwLock<Registry<SharedComponentInfo>>> = OnceLock::new();

fn components() -> &'static RwLock<Registry<ComponentInfo>> {
    COMPONENTS.get_or_init(|| RwLock::new(Registry::new()))
}

fn shared() -> &'static RwLock<Registry<SharedComponentInfo>> {
    SHARED.get_or_init(|| RwLock::new(Registry::new()))
}

fn register_component_impl<T: ComponentData>(manual: bool) -> Result<ComponentId, RegistryError> {
    if align_of::<T>() > CHUNK_ALIGN {
        return Err(RegistryError::AlignmentUnsupported {
            align: align_of::<T>(),
            max_align: CHUNK_ALIGN,
        });
    }

    let mut registry = components().write().expect("component registry poisoned");
    if let Some(&id) = registry.by_type.get(&TypeId::of::<T>()) {
        return Ok(id);
    }
    if registry.infos.len() >= COMPONENT_CAP {
        return Err(RegistryError::CapacityExceeded {
            registered: registry.infos.len(),
            capacity: COMPONENT_CAP,
        });
    }

    let id = registry.infos.len() as ComponentId;
    registry.by_type.insert(TypeId::of::<T>(), id);
    registry.infos.push(ComponentInfo {
        id,
        size: size_of::<T>(),
        align: align_of::<T>(),
        manual,
        name: type_name::<T>(),
    });
    Ok(id)
}

fn register_shared_impl<S: SharedComponentData>(
    manual: bool,
) -> Result<SharedComponentId, RegistryError> {
    let mut registry = shared().write().expect("shared component registry poisoned");
    if let Some(&id) = registry.by_type.get(&TypeId::of::<S>()) {
        return Ok(id);
    }
    if registry.infos.len() >= SHARED_COMPONENT_CAP {
        return Err(RegistryError::CapacityExceeded {
            registered: registry.infos.len(),
            capacity: SHARED_COMPONENT_CAP,
        });
    }

    let id = registry.infos.len() as SharedComponentId;
    registry.by_type.insert(TypeId::of::<S>(), id);
    registry.infos.push(SharedComponentInfo { id, manual, name: type_name::<S>() });
    Ok(id)
}

/// Registers a plain-data component type, returning its stable id.
///
/// Repeat registration of the same type returns the original id and keeps
/// the original manual flag.
pub fn register_component<T: ComponentData>() -> Result<ComponentId, RegistryError> {
    register_component_impl::<T>(false)
}

/// Registers a component whose removal is never implicit on destruction.
pub fn register_manual_component<T: ComponentData>() -> Result<ComponentId, RegistryError> {
    register_component_impl::<T>(true)
}

/// Registers a shared-component type, returning its stable id.
pub fn register_shared_component<S: SharedComponentData>(
) -> Result<SharedComponentId, RegistryError> {
    register_shared_impl::<S>(false)
}

/// Registers a shared component whose removal is never implicit.
pub fn register_manual_shared_component<S: SharedComponentData>(
) -> Result<SharedComponentId, RegistryError> {
    register_shared_impl::<S>(true)
}

/// Resolves the id of a registered component type.
///
/// ## Panics
/// Requesting an id for an unregistered type is a programmer-contract
/// violation and panics.
pub fn component_id_of<T: ComponentData>() -> ComponentId {
    let registry = components().read().expect("component registry poisoned");
    *registry
        .by_type
        .get(&TypeId::of::<T>())
        .unwrap_or_else(|| panic!("component type {} was never registered", type_name::<T>()))
}

/// Resolves the id of a registered shared-component type.
///
/// ## Panics
/// Panics if the type was never registered.
pub fn shared_component_id_of<S: SharedComponentData>() -> SharedComponentId {
    let registry = shared().read().expect("shared component registry poisoned");
    *registry
        .by_type
        .get(&TypeId::of::<S>())
        .unwrap_or_else(|| {
            panic!("shared component type {} was never registered", type_name::<S>())
        })
}

/// Metadata for a registered component id.
///
/// ## Panics
/// Panics on an id that was never handed out.
pub fn component_info(id: ComponentId) -> ComponentInfo {
    let registry = components().read().expect("component registry poisoned");
    *registry
        .infos
        .get(id as usize)
        .unwrap_or_else(|| panic!("component id {id} was never registered"))
}

/// Metadata for a registered shared-component id.
///
/// ## Panics
/// Panics on an id that was never handed out.
pub fn shared_component_info(id: SharedComponentId) -> SharedComponentInfo {
    let registry = shared().read().expect("shared component registry poisoned");
    *registry
        .infos
        .get(id as usize)
        .unwrap_or_else(|| panic!("shared component id {id} was never registered"))
}
