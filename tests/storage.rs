use std::sync::Once;

use bytemuck::{Pod, Zeroable};

use ecs_runtime::engine::component::{
    component_id_of, register_component, register_manual_component,
    register_manual_shared_component, register_shared_component, ComponentData,
};
use ecs_runtime::engine::entity::Entity;
use ecs_runtime::engine::filter::EntityFilter;
use ecs_runtime::engine::manager::EntityManager;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Position {
    x: f32,
    y: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Health(u32);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Persistent(u32);

#[derive(Clone, Debug, Hash, PartialEq)]
struct Faction(String);

#[derive(Clone, Debug, Hash, PartialEq)]
struct Region(u8);

#[derive(Clone, Debug, Hash, PartialEq)]
struct Heritage(u16);

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Health>().unwrap();
        register_manual_component::<Persistent>().unwrap();
        register_shared_component::<Faction>().unwrap();
        register_shared_component::<Region>().unwrap();
        register_manual_shared_component::<Heritage>().unwrap();
    });
}

/// Reads one entity's component through the public filter path.
fn read_component<T: ComponentData>(manager: &EntityManager, entity: Entity) -> Option<T> {
    let filter = EntityFilter::builder().with::<T>().build();
    let component_id = component_id_of::<T>();
    for accessor in manager.filter_entities(&filter) {
        if let Some(position) = accessor.entity_array().iter().position(|&e| e == entity) {
            return Some(accessor.component_array::<T>(component_id)[position]);
        }
    }
    None
}

#[test]
fn archetypes_deduplicate_regardless_of_add_order() {
    init_registry();
    let mut manager = EntityManager::new();

    let a = manager.commands().create_entity();
    manager.commands().add_component(a, Position { x: 1.0, y: 2.0 });
    manager.commands().add_component(a, Velocity { dx: 0.5, dy: 0.0 });

    let b = manager.commands().create_entity();
    manager.commands().add_component(b, Velocity { dx: -0.5, dy: 0.0 });
    manager.commands().add_component(b, Position { x: 3.0, y: 4.0 });
    manager.execute_entity_command_buffers();

    let location_a = manager.location(a).unwrap();
    let location_b = manager.location(b).unwrap();
    assert_eq!(location_a.archetype, location_b.archetype);
    assert_eq!(manager.archetype(location_a.archetype).entity_count(), 2);
}

#[test]
fn component_values_survive_structural_moves() {
    init_registry();
    let mut manager = EntityManager::new();

    let entity = manager.commands().create_entity();
    manager.commands().add_component(entity, Position { x: 1.0, y: 2.0 });
    manager.commands().add_component(entity, Velocity { dx: 9.0, dy: 8.0 });
    manager.commands().add_component(entity, Health(77));
    manager.execute_entity_command_buffers();

    manager.commands().remove_component::<Velocity>(entity);
    manager.execute_entity_command_buffers();

    assert_eq!(read_component::<Position>(&manager, entity), Some(Position { x: 1.0, y: 2.0 }));
    assert_eq!(read_component::<Health>(&manager, entity), Some(Health(77)));
    assert_eq!(read_component::<Velocity>(&manager, entity), None);
}

#[test]
fn swap_remove_keeps_survivors_addressable() {
    init_registry();
    let mut manager = EntityManager::new();

    let mut entities = Vec::new();
    for index in 0..3u32 {
        let entity = manager.commands().create_entity();
        manager
            .commands()
            .add_component(entity, Position { x: index as f32, y: 0.0 });
        entities.push(entity);
    }
    manager.execute_entity_command_buffers();

    // Removing the first entity relocates the last into its slot.
    manager.commands().destroy_entity(entities[0]);
    manager.execute_entity_command_buffers();

    assert_eq!(manager.entity_count(), 2);
    assert_eq!(
        read_component::<Position>(&manager, entities[1]),
        Some(Position { x: 1.0, y: 0.0 })
    );
    assert_eq!(
        read_component::<Position>(&manager, entities[2]),
        Some(Position { x: 2.0, y: 0.0 })
    );
}

#[test]
fn shared_values_group_entities_into_combinations() {
    init_registry();
    let mut manager = EntityManager::new();

    let red_a = manager.commands().create_entity();
    let red_b = manager.commands().create_entity();
    let blue = manager.commands().create_entity();
    for &entity in &[red_a, red_b, blue] {
        manager.commands().add_component(entity, Health(1));
    }
    manager.commands().add_shared_component(red_a, Faction("red".into()));
    manager.commands().add_shared_component(red_b, Faction("red".into()));
    manager.commands().add_shared_component(blue, Faction("blue".into()));
    manager.execute_entity_command_buffers();

    let red_index = manager.shared_component_index(&Faction("red".into())).unwrap();
    assert_eq!(manager.object_store().ref_count(red_index), Some(2));

    let location_a = manager.location(red_a).unwrap();
    let location_b = manager.location(red_b).unwrap();
    let location_blue = manager.location(blue).unwrap();
    assert_eq!(location_a.archetype, location_blue.archetype);
    assert_eq!(location_a.combination, location_b.combination);
    assert_ne!(location_a.combination, location_blue.combination);
}

#[test]
fn filters_select_by_bits_and_exact_shared_value() {
    init_registry();
    let mut manager = EntityManager::new();

    let plain = manager.commands().create_entity();
    manager.commands().add_component(plain, Health(1));

    let north = manager.commands().create_entity();
    manager.commands().add_component(north, Health(2));
    manager.commands().add_shared_component(north, Region(0));

    let south = manager.commands().create_entity();
    manager.commands().add_component(south, Health(3));
    manager.commands().add_shared_component(south, Region(1));
    manager.execute_entity_command_buffers();

    let count = |filter: &EntityFilter| -> u32 {
        manager
            .filter_entities(filter)
            .iter()
            .map(|accessor| accessor.entity_count())
            .sum()
    };

    let with_region = EntityFilter::builder().with::<Health>().with_shared::<Region>().build();
    assert_eq!(count(&with_region), 2);

    let without_region = EntityFilter::builder().with::<Health>().without_shared::<Region>().build();
    assert_eq!(count(&without_region), 1);

    let north_index = manager.shared_component_index(&Region(0)).unwrap();
    let north_only = EntityFilter::builder()
        .with::<Health>()
        .with_shared_value::<Region>(north_index)
        .build();
    let accessors = manager.filter_entities(&north_only);
    assert_eq!(accessors.len(), 1);
    assert_eq!(accessors[0].entity_array(), &[north]);
    assert_eq!(
        accessors[0].shared_component::<Region>(
            ecs_runtime::engine::component::shared_component_id_of::<Region>()
        ),
        &Region(0)
    );
}

#[test]
fn rebinding_a_shared_value_moves_the_entity() {
    init_registry();
    let mut manager = EntityManager::new();

    let entity = manager.commands().create_entity();
    manager.commands().add_shared_component(entity, Region(4));
    manager.execute_entity_command_buffers();
    let before = manager.location(entity).unwrap();

    manager.commands().set_shared_component(entity, Region(5));
    manager.execute_entity_command_buffers();
    let after = manager.location(entity).unwrap();

    assert_eq!(before.archetype, after.archetype);
    assert_ne!(before.combination, after.combination);
    assert!(manager.shared_component_index(&Region(4)).is_none());
    assert_eq!(
        manager.object_store().ref_count(manager.shared_component_index(&Region(5)).unwrap()),
        Some(1)
    );
}

#[test]
fn manual_components_survive_destruction() {
    init_registry();
    let mut manager = EntityManager::new();

    let entity = manager.commands().create_entity();
    manager.commands().add_component(entity, Persistent(42));
    manager.commands().add_component(entity, Position { x: 1.0, y: 1.0 });
    manager.execute_entity_command_buffers();

    // First destroy strips only the non-manual component.
    manager.commands().destroy_entity(entity);
    manager.execute_entity_command_buffers();
    assert!(manager.is_alive(entity));
    assert_eq!(read_component::<Position>(&manager, entity), None);
    assert_eq!(read_component::<Persistent>(&manager, entity), Some(Persistent(42)));

    // The entity is now fully manual; destroy is a no-op.
    manager.commands().destroy_entity(entity);
    manager.execute_entity_command_buffers();
    assert!(manager.is_alive(entity));

    // Explicitly removing the manual component leaves a plain empty
    // entity, which a destroy then removes.
    manager.commands().remove_component::<Persistent>(entity);
    manager.commands().destroy_entity(entity);
    manager.execute_entity_command_buffers();
    assert!(!manager.is_alive(entity));
}

#[test]
fn manual_shared_components_survive_destruction() {
    init_registry();
    let mut manager = EntityManager::new();

    let entity = manager.commands().create_entity();
    manager.commands().add_component(entity, Health(9));
    manager.commands().add_shared_component(entity, Heritage(3));
    manager.commands().add_shared_component(entity, Region(9));
    manager.execute_entity_command_buffers();

    let heritage_index = manager.shared_component_index(&Heritage(3)).unwrap();

    // First destroy strips the non-manual component and shared value; the
    // manual shared value and its store reference survive.
    manager.commands().destroy_entity(entity);
    manager.execute_entity_command_buffers();
    assert!(manager.is_alive(entity));
    assert_eq!(read_component::<Health>(&manager, entity), None);
    assert!(manager.shared_component_index(&Region(9)).is_none());
    assert_eq!(manager.object_store().ref_count(heritage_index), Some(1));

    // Only the manual shared component remains, so the entity is now fully
    // manual and a second destroy is a no-op.
    manager.commands().destroy_entity(entity);
    manager.execute_entity_command_buffers();
    assert!(manager.is_alive(entity));
    assert_eq!(manager.shared_component_index(&Heritage(3)), Some(heritage_index));
}

#[test]
fn destroyed_ids_are_recycled() {
    init_registry();
    let mut manager = EntityManager::new();

    let first = manager.commands().create_entity();
    manager.execute_entity_command_buffers();
    manager.commands().destroy_entity(first);
    manager.execute_entity_command_buffers();

    let second = manager.commands().create_entity();
    manager.execute_entity_command_buffers();
    assert_eq!(first, second);
    assert!(manager.is_alive(second));
}

#[test]
fn chunks_return_to_the_pool_when_entities_leave() {
    init_registry();
    let mut manager = EntityManager::new();

    let mut entities = Vec::new();
    for index in 0..2048u32 {
        let entity = manager.commands().create_entity();
        manager
            .commands()
            .add_component(entity, Position { x: index as f32, y: 0.0 });
        entities.push(entity);
    }
    manager.execute_entity_command_buffers();
    let (resident, _) = manager.chunk_counts();
    assert!(resident >= 2);

    for entity in entities {
        manager.commands().destroy_entity(entity);
    }
    manager.execute_entity_command_buffers();
    let (resident, pooled) = manager.chunk_counts();
    assert_eq!(resident, 0);
    assert!(pooled >= 2);
    assert_eq!(manager.entity_count(), 0);
}
