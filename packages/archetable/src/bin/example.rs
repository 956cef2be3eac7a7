use archetable::{
    ArchetypeStorage, BoxSystem, CommandBuffer, component, ComponentRegistry, ForEach, Frame, Query,
    RowMut, StorageConfig, SystemGroup,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Position(f32, f32);
component!(Position);

#[derive(Debug, Clone, Copy, Default)]
pub struct Velocity(f32, f32);
component!(Velocity);

#[derive(Debug, Clone, Copy)]
pub struct Health(i32);
component!(Health);

#[derive(Debug, Clone, Copy)]
pub struct Burning;
component!(Burning);

/// Stands in for a handle into some renderer.
#[derive(Debug)]
pub struct Sprite {
    handle: u32,
}

fn release_sprite(sprite: &mut Sprite) {
    log::info!("releasing sprite {}", sprite.handle);
}

component!(Sprite, teardown = release_sprite);

pub struct Input {
    gust: (f32, f32),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = ComponentRegistry::new();
    let config = StorageConfig::default().with_initial_table_capacity(4);
    let mut storage = ArchetypeStorage::with_config(registry, config);

    let dragon = storage.spawn()
        .add(Position(0.0, 10.0))?
        .add(Sprite { handle: 1 })?
        .id();
    storage.add_component(dragon, Health(30))?;

    for idx in 0..4 {
        let x = idx as f32 * 2.0;
        storage.create_entity((Position(x, 0.0), Velocity(0.5, 1.0), Health(10), Sprite { handle: 10 + idx }));
    }
    storage.add_component(dragon, Velocity(0.0, -1.0))?;

    let mut systems = SystemGroup::new();
    systems.insert(BoxSystem::named("movement", ForEach::new(
        |q: Query| q.with::<Position>().with::<Velocity>(),
        |_, mut row: RowMut<'_>, _: &mut CommandBuffer, frame: &Frame<'_, Input>| {
            let delta = frame.delta as f32;
            let Velocity(vx, vy) = row.get::<Velocity>().copied().unwrap_or_default();
            if let Some(Position(x, y)) = row.get_mut::<Position>() {
                *x += (vx + frame.input.gust.0) * delta;
                *y += (vy + frame.input.gust.1) * delta;
            }
        })));
    systems.insert(BoxSystem::named("ignite", ForEach::new(
        |q: Query| q.with::<Position>().with::<Health>().without::<Burning>(),
        move |entity, mut row: RowMut<'_>, commands: &mut CommandBuffer, _: &Frame<'_, Input>| {
            let near_dragon = row.get::<Position>().map_or(false, |p| p.0 < 3.0);
            if near_dragon && entity != dragon {
                commands.add_component(entity, Burning);
            }
        })));
    systems.insert(BoxSystem::named("burn", ForEach::new(
        |q: Query| q.with::<Health>().with::<Burning>(),
        |entity, mut row: RowMut<'_>, commands: &mut CommandBuffer, _: &Frame<'_, Input>| {
            if let Some(Health(hp)) = row.get_mut::<Health>() {
                *hp -= 4;
                if *hp <= 0 {
                    commands.delete_entity(entity);
                }
            }
        })));

    let input = Input { gust: (0.1, 0.0) };
    for _ in 0..5 {
        systems.run(&mut storage, &Frame { delta: 0.5, input: &input });
    }

    println!("storage: {:?}", storage);
    println!("dragon: {:?} at {:?}", dragon, storage.get_component::<Position>(dragon)?);

    let survivors = Query::new(storage.registry()).with::<Health>();
    for (entity, row) in survivors.iter(&storage) {
        println!("survivor {:?}: {:?}", entity, row.get::<Health>());
    }

    storage.delete_all();
    Ok(())
}
