//! Systems: the per-frame logic run against an `ArchetypeStorage`.

use std::any::type_name;
use std::borrow::Cow;

use once_cell::unsync::OnceCell;

use crate::command_buffer::CommandBuffer;
use crate::entity::EntityID;
use crate::query::{Query, RowMut};
use crate::storage::ArchetypeStorage;

/// Per-frame context handed to every system.
///
/// `input` is whatever the surrounding game collects each frame; it is
/// passed through untouched.
#[derive(Debug)]
pub struct Frame<'a, I> {
    /// Seconds since the previous frame.
    pub delta: f64,
    /// The frame's input.
    pub input: &'a I,
}

impl<'a, I> Clone for Frame<'a, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, I> Copy for Frame<'a, I> {}

/// An ECS system.
///
/// Structural changes made while iterating should be recorded into
/// `commands`; they are applied once the system returns.
pub trait System<I> {
    /// Run the system for one frame.
    fn run(&mut self, storage: &mut ArchetypeStorage, commands: &mut CommandBuffer, frame: &Frame<'_, I>);
}

impl<I, F> System<I> for F
    where F: FnMut(&mut ArchetypeStorage, &mut CommandBuffer, &Frame<'_, I>)
{
    fn run(&mut self, storage: &mut ArchetypeStorage, commands: &mut CommandBuffer, frame: &Frame<'_, I>) {
        self(storage, commands, frame)
    }
}

/// A boxed system with a name for diagnostics.
pub struct BoxSystem<I> {
    name: Cow<'static, str>,
    system: Box<dyn System<I>>,
}

impl<I> BoxSystem<I> {
    /// Box a system, naming it after its type.
    pub fn new<S: System<I> + 'static>(system: S) -> BoxSystem<I> {
        BoxSystem::named(type_name::<S>(), system)
    }

    /// Box a system with an explicit name.
    pub fn named<S: System<I> + 'static>(name: impl Into<Cow<'static, str>>, system: S) -> BoxSystem<I> {
        BoxSystem {
            name: name.into(),
            system: Box::new(system),
        }
    }

    /// Get the name of this system.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<I> System<I> for BoxSystem<I> {
    fn run(&mut self, storage: &mut ArchetypeStorage, commands: &mut CommandBuffer, frame: &Frame<'_, I>) {
        self.system.run(storage, commands, frame)
    }
}

/// A system which calls a closure for every entity matching a query.
///
/// The query is built from the storage's registry the first time the
/// system runs.
pub struct ForEach<Q, F> {
    configure: Q,
    query: OnceCell<Query>,
    body: F,
}

impl<Q, F> ForEach<Q, F> {
    /// Create a new `ForEach` system.
    ///
    /// `configure` adds the query's requirements, `body` is run per row.
    pub fn new<I>(configure: Q, body: F) -> ForEach<Q, F>
        where Q: Fn(Query) -> Query,
              F: FnMut(EntityID, RowMut<'_>, &mut CommandBuffer, &Frame<'_, I>)
    {
        ForEach {
            configure,
            query: OnceCell::new(),
            body,
        }
    }

    /// Get the query, if the system has run.
    pub fn query(&self) -> Option<&Query> {
        self.query.get()
    }
}

impl<I, Q, F> System<I> for ForEach<Q, F>
    where Q: Fn(Query) -> Query,
          F: FnMut(EntityID, RowMut<'_>, &mut CommandBuffer, &Frame<'_, I>)
{
    fn run(&mut self, storage: &mut ArchetypeStorage, commands: &mut CommandBuffer, frame: &Frame<'_, I>) {
        let configure = &self.configure;
        let query = self.query.get_or_init(|| configure(Query::new(storage.registry())));

        for (entity, row) in query.iter_mut(storage) {
            (self.body)(entity, row, commands, frame);
        }
    }
}

/// A token which represents a system in a `SystemGroup`.
///
/// Tokens are never reused within a group, but are not unique between
/// `SystemGroup`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemToken(pub usize);

/// An ordered list of systems.
///
/// Systems run in insertion order. The group's command buffer is flushed
/// after each one, so every system sees the structural changes of those
/// before it.
pub struct SystemGroup<I> {
    systems: Vec<(SystemToken, BoxSystem<I>)>,
    next_token: usize,
    commands: CommandBuffer,
}

impl<I> SystemGroup<I> {
    /// Create a new empty `SystemGroup`.
    pub fn new() -> SystemGroup<I> {
        SystemGroup {
            systems: Vec::new(),
            next_token: 0,
            commands: CommandBuffer::new(),
        }
    }

    /// Append a system to the group.
    pub fn insert(&mut self, system: BoxSystem<I>) -> SystemToken {
        let token = SystemToken(self.next_token);
        self.next_token += 1;
        self.systems.push((token, system));
        token
    }

    /// Remove a system from the group, keeping the others in order.
    ///
    /// Returns `None` if the token does not name a system in this group.
    pub fn remove(&mut self, token: SystemToken) -> Option<BoxSystem<I>> {
        let index = self.systems.iter().position(|(t, _)| *t == token)?;
        let (_, system) = self.systems.remove(index);
        log::debug!("removed system {}", system.name());
        Some(system)
    }

    /// Return the number of systems in the group.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns true if the group has no systems.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Iterate over the names of the systems, in run order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|(_, system)| system.name())
    }

    /// Run every system once.
    pub fn run(&mut self, storage: &mut ArchetypeStorage, frame: &Frame<'_, I>) {
        for (_, system) in self.systems.iter_mut() {
            log::trace!("running system {}", system.name());
            system.run(storage, &mut self.commands, frame);

            let summary = self.commands.run(storage);
            if !summary.is_ok() {
                log::debug!("{} commands from {} failed", summary.failures.len(), system.name());
            }
        }
    }
}

impl<I> Default for SystemGroup<I> {
    fn default() -> Self {
        SystemGroup::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component;
    use crate::component::ComponentRegistry;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f64);
    component!(Position);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(f64);
    component!(Velocity);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Expired;
    component!(Expired);

    struct Input {
        wind: f64,
    }

    #[test]
    fn test_for_each() {
        let mut storage = ArchetypeStorage::new(ComponentRegistry::new());
        let a = storage.create_entity((Position(0.0), Velocity(2.0)));
        let b = storage.create_entity((Position(5.0),));

        let mut system = ForEach::new(
            |q: Query| q.with::<Position>().with::<Velocity>(),
            |_, mut row: RowMut<'_>, _: &mut CommandBuffer, frame: &Frame<'_, Input>| {
                let velocity = row.get::<Velocity>().unwrap();
                let position = row.get_mut::<Position>().unwrap();
                position.0 += (velocity.0 + frame.input.wind) * frame.delta;
            });

        let input = Input { wind: 1.0 };
        let frame = Frame { delta: 0.5, input: &input };
        let mut commands = CommandBuffer::new();
        assert!(system.query().is_none());

        System::run(&mut system, &mut storage, &mut commands, &frame);
        System::run(&mut system, &mut storage, &mut commands, &frame);

        assert!(system.query().is_some());
        assert_eq!(storage.component::<Position>(a), Some(&Position(3.0)));
        assert_eq!(storage.component::<Position>(b), Some(&Position(5.0)));
    }

    #[test]
    fn test_group_flushes_between_systems() {
        let mut storage = ArchetypeStorage::new(ComponentRegistry::new());
        for i in 0..4 {
            storage.create_entity((Position(i as f64),));
        }

        let mut group = SystemGroup::new();
        group.insert(BoxSystem::named("expire", ForEach::new(
            |q: Query| q.with::<Position>(),
            |entity, mut row: RowMut<'_>, commands: &mut CommandBuffer, _: &Frame<'_, ()>| {
                if row.get::<Position>().map_or(false, |p| p.0 >= 2.0) {
                    commands.add_component(entity, Expired);
                }
            })));
        group.insert(BoxSystem::named("reap", ForEach::new(
            |q: Query| q.with::<Expired>(),
            |entity, _: RowMut<'_>, commands: &mut CommandBuffer, _: &Frame<'_, ()>| {
                commands.delete_entity(entity);
            })));

        assert_eq!(group.names().collect::<Vec<_>>(), vec!["expire", "reap"]);
        group.run(&mut storage, &Frame { delta: 1.0, input: &() });

        assert_eq!(storage.entity_count(), 2);
        let remaining = Query::new(storage.registry()).with::<Position>();
        for (_, row) in remaining.iter(&storage) {
            assert!(row.get::<Position>().unwrap().0 < 2.0);
        }
    }

    #[test]
    fn test_closure_system() {
        let mut storage = ArchetypeStorage::new(ComponentRegistry::new());
        fn spawn(_: &mut ArchetypeStorage, commands: &mut CommandBuffer, _: &Frame<'_, ()>) {
            commands.create_entity((Position(1.0),));
        }

        let mut group = SystemGroup::new();
        group.insert(BoxSystem::new(spawn));

        group.run(&mut storage, &Frame { delta: 0.0, input: &() });
        group.run(&mut storage, &Frame { delta: 0.0, input: &() });
        assert_eq!(storage.entity_count(), 2);
    }

    #[test]
    fn test_remove_system() {
        let mut storage = ArchetypeStorage::new(ComponentRegistry::new());
        fn spawn(_: &mut ArchetypeStorage, commands: &mut CommandBuffer, _: &Frame<'_, ()>) {
            commands.create_entity((Position(1.0),));
        }
        fn expire(storage: &mut ArchetypeStorage, commands: &mut CommandBuffer, _: &Frame<'_, ()>) {
            for entity in storage.entities().collect::<Vec<_>>() {
                commands.add_component(entity, Expired);
            }
        }

        let mut group = SystemGroup::new();
        let first = group.insert(BoxSystem::named("spawn", spawn));
        let second = group.insert(BoxSystem::named("expire", expire));
        assert_ne!(first, second);

        let removed = group.remove(first).unwrap();
        assert_eq!(removed.name(), "spawn");
        assert!(group.remove(first).is_none());
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["expire"]);

        group.run(&mut storage, &Frame { delta: 0.0, input: &() });
        assert_eq!(storage.entity_count(), 0);

        let third = group.insert(BoxSystem::named("spawn", spawn));
        assert_ne!(third, first);
        assert_ne!(third, second);
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["expire", "spawn"]);

        group.run(&mut storage, &Frame { delta: 0.0, input: &() });
        assert_eq!(storage.entity_count(), 1);
        assert_eq!(Query::new(storage.registry()).with::<Expired>().count(&storage), 0);

        assert_eq!(group.remove(second).map(|s| s.name().to_string()), Some("expire".to_string()));
        assert_eq!(group.len(), 1);
    }
}
