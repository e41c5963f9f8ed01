use std::sync::Arc;
use std::sync::Once;

use bytemuck::{Pod, Zeroable};

use ecs_runtime::prelude::*;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Translation {
    x: f32,
    y: f32,
    z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Speed(f32);

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        register_component::<Translation>().unwrap();
        register_component::<Speed>().unwrap();
    });
}

/// Advances every translation by its speed along x, fanned out over the
/// worker pool.
struct MoveSystem;

impl System for MoveSystem {
    fn on_update(&mut self, context: &mut SystemContext<'_>) {
        let filter = EntityFilter::builder().with::<Translation>().with::<Speed>().build();
        context.schedule(
            &filter,
            Arc::new(|accessor: &ChunkAccessor, _chunk, _entity| {
                let speed_id = component_id_of::<Speed>();
                let translation_id = component_id_of::<Translation>();
                let speeds = accessor.component_array::<Speed>(speed_id);
                // No other view of this array exists: chunks are disjoint
                // across tasks and this system is the only writer.
                let translations =
                    unsafe { accessor.component_array_mut::<Translation>(translation_id) };
                for index in 0..accessor.entity_count() as usize {
                    translations[index].x += speeds[index].0;
                }
            }),
        );
    }
}

/// Records a deferred destroy for every entity past the finish line.
struct FinishLineSystem {
    line: f32,
}

impl System for FinishLineSystem {
    fn on_update(&mut self, context: &mut SystemContext<'_>) {
        let line = self.line;
        let filter = EntityFilter::builder().with::<Translation>().build();
        context.schedule_with_buffer(
            &filter,
            Arc::new(move |accessor: &ChunkAccessor, _chunk, _entity, buffer| {
                let translation_id = component_id_of::<Translation>();
                let translations = accessor.component_array::<Translation>(translation_id);
                for (index, &entity) in accessor.entity_array().iter().enumerate() {
                    if translations[index].x >= line {
                        buffer.destroy_entity(entity);
                    }
                }
            }),
        );
    }
}

#[test]
fn world_moves_and_retires_entities_over_frames() {
    init_registry();
    let mut world = World::new();
    world.add_system(MoveSystem);
    world.add_system(FinishLineSystem { line: 3.0 });

    {
        let manager = world.entity_manager().data_mut();
        let commands = manager.commands();
        for index in 0..1024u32 {
            let entity = commands.create_entity();
            commands.add_component(entity, Translation { x: 0.0, y: index as f32, z: 0.0 });
            commands.add_component(entity, Speed(1.0));
        }
    }

    // Frame 1 commits the spawns, then moves everything to x = 1.
    world.update();
    world.update();
    world.wait_idle();
    assert_eq!(world.storage().entity_count(), 1024);

    let filter = EntityFilter::builder().with::<Translation>().build();
    let translation_id = component_id_of::<Translation>();
    for accessor in world.storage().filter_entities(&filter) {
        for translation in accessor.component_array::<Translation>(translation_id) {
            assert_eq!(translation.x, 2.0);
        }
    }

    // Frame 3 moves to x = 3 and records destroys; frame 4 commits them.
    world.update();
    world.update();
    world.wait_idle();
    assert_eq!(world.storage().entity_count(), 0);

    // Every chunk drained back to the pool.
    let (resident, pooled) = world.storage().chunk_counts();
    assert_eq!(resident, 0);
    assert!(pooled > 0);
    assert_eq!(world.time().frame, 4);
}

#[test]
fn each_entity_advances_by_exactly_its_own_speed() {
    init_registry();
    let mut world = World::new();
    world.add_system(MoveSystem);

    // Every entity has a speed, only a third also has a translation; each
    // carries a distinct starting position and a per-entity speed so any
    // slot or slice mis-indexing shows up as a wrong value.
    let mut expected = std::collections::HashMap::new();
    {
        let manager = world.entity_manager().data_mut();
        let commands = manager.commands();
        for index in 0..1024u32 {
            let entity = commands.create_entity();
            let speed = (index % 10) as f32;
            commands.add_component(entity, Speed(speed));
            if index % 3 == 0 {
                let start = 100.0 + index as f32;
                commands.add_component(entity, Translation { x: start, y: 0.0, z: 0.0 });
                expected.insert(entity, start + speed);
            }
        }
    }

    // Frame 1 commits the spawns, then moves each filtered entity once.
    world.update();
    world.wait_idle();

    let filter = EntityFilter::builder().with::<Translation>().with::<Speed>().build();
    let translation_id = component_id_of::<Translation>();
    let mut seen = 0usize;
    for accessor in world.storage().filter_entities(&filter) {
        let translations = accessor.component_array::<Translation>(translation_id);
        for (slot, entity) in accessor.entity_array().iter().enumerate() {
            assert_eq!(translations[slot].x, expected[entity]);
            seen += 1;
        }
    }
    assert_eq!(seen, expected.len());
}

#[test]
fn singleton_state_is_visible_to_later_frames() {
    init_registry();
    let mut world = World::new();

    world.entity_manager().data_mut().commands().set_singleton(Speed(5.0));
    world.update();
    world.wait_idle();

    let storage = world.storage();
    let singleton = storage.singleton_entity::<Speed>().unwrap();
    assert!(storage.is_alive(singleton));
    assert_eq!(storage.entity_count(), 1);

    let filter = EntityFilter::builder().with::<Speed>().build();
    let accessors = storage.filter_entities(&filter);
    assert_eq!(accessors.len(), 1);
    assert_eq!(accessors[0].component_array::<Speed>(component_id_of::<Speed>()), &[Speed(5.0)]);
}
