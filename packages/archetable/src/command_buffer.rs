//! Deferred structural changes to an `ArchetypeStorage`.

use std::any::type_name;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::component::{Component, ComponentRegistry, ComponentTypeID};
use crate::component_data::{Bundle, ComponentValue, IntoBundle};
use crate::entity::EntityID;
use crate::error::{Error, Result};
use crate::storage::ArchetypeStorage;

static NEXT_BUFFER_ID: AtomicU32 = AtomicU32::new(0);

/// An entity which a `CommandBuffer` will create when it runs.
///
/// Only valid with the buffer that issued it, until that buffer next runs
/// or is discarded. Commands naming any other pending entity fail with
/// `Error::UnknownPendingEntity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingEntity {
    buffer: u32,
    epoch: u32,
    index: u32,
}

impl PendingEntity {
    /// Return the position of this entity among the buffer's creations.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// The entity a buffered command applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// An entity which already exists.
    Entity(EntityID),
    /// An entity created earlier in the same buffer.
    Pending(PendingEntity),
}

impl From<EntityID> for Target {
    fn from(id: EntityID) -> Self {
        Target::Entity(id)
    }
}

impl From<PendingEntity> for Target {
    fn from(pending: PendingEntity) -> Self {
        Target::Pending(pending)
    }
}

type Lookup = fn(&ComponentRegistry) -> Option<ComponentTypeID>;

enum Command {
    Create(Bundle),
    Delete(Target),
    Add(Target, ComponentValue),
    Remove(Target, &'static str, Lookup),
    RemoveId(Target, ComponentTypeID),
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Create(bundle) => write!(f, "Create({:?})", bundle),
            Command::Delete(target) => write!(f, "Delete({:?})", target),
            Command::Add(target, value) => write!(f, "Add({:?}, {:?})", target, value),
            Command::Remove(target, name, _) => write!(f, "Remove({:?}, {})", target, name),
            Command::RemoveId(target, ty) => write!(f, "Remove({:?}, {:?})", target, ty),
        }
    }
}

/// A command which could not be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFailure {
    /// Position of the command in the buffer.
    pub index: usize,
    /// Why it failed.
    pub error: Error,
}

/// The outcome of running a `CommandBuffer`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of commands applied.
    pub applied: usize,
    /// Commands which failed, in order.
    pub failures: Vec<CommandFailure>,
    buffer: u32,
    epoch: u32,
    created: Vec<EntityID>,
}

impl RunSummary {
    /// Returns true if every command was applied.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Return the entities created, in the order they were requested.
    pub fn created(&self) -> &[EntityID] {
        &self.created
    }

    /// Return the ID given to a pending entity.
    pub fn entity(&self, pending: PendingEntity) -> Option<EntityID> {
        if pending.buffer != self.buffer || pending.epoch != self.epoch {
            return None;
        }
        self.created.get(pending.index()).copied()
    }

    fn resolve(&self, target: Target) -> Result<EntityID> {
        match target {
            Target::Entity(id) => Ok(id),
            Target::Pending(pending) => self.entity(pending).ok_or(Error::UnknownPendingEntity(pending)),
        }
    }
}

/// A queue of structural changes, applied in order by `run`.
///
/// Systems record into a `CommandBuffer` while they iterate, since tables
/// cannot change shape mid-iteration.
#[derive(Debug)]
pub struct CommandBuffer {
    id: u32,
    commands: Vec<Command>,
    pending: u32,
    epoch: u32,
}

impl CommandBuffer {
    /// Create a new, empty, command buffer.
    pub fn new() -> CommandBuffer {
        CommandBuffer {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            commands: Vec::new(),
            pending: 0,
            epoch: 0,
        }
    }

    /// Return the number of buffered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if there are no buffered commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queue the creation of an entity.
    pub fn create_entity(&mut self, components: impl IntoBundle) -> PendingEntity {
        let pending = PendingEntity {
            buffer: self.id,
            epoch: self.epoch,
            index: self.pending,
        };
        self.pending += 1;
        self.commands.push(Command::Create(components.into_bundle()));
        pending
    }

    /// Queue the deletion of an entity.
    pub fn delete_entity(&mut self, target: impl Into<Target>) {
        let target = target.into();
        self.commands.push(Command::Delete(target));
    }

    /// Queue adding a component to an entity.
    pub fn add_component<T: Component>(&mut self, target: impl Into<Target>, value: T) {
        self.add_component_value(target, ComponentValue::new(value));
    }

    /// Queue adding a type-erased component to an entity.
    pub fn add_component_value(&mut self, target: impl Into<Target>, value: ComponentValue) {
        let target = target.into();
        self.commands.push(Command::Add(target, value));
    }

    /// Queue removing a component from an entity.
    pub fn remove_component<T: Component>(&mut self, target: impl Into<Target>) {
        let target = target.into();
        self.commands.push(Command::Remove(target, type_name::<T>(), ComponentRegistry::id_of::<T>));
    }

    /// Queue removing a component from an entity by type ID.
    pub fn remove_component_id(&mut self, target: impl Into<Target>, ty: ComponentTypeID) {
        let target = target.into();
        self.commands.push(Command::RemoveId(target, ty));
    }

    /// Drop every buffered command without applying it.
    ///
    /// Buffered component values are released.
    pub fn discard(&mut self) {
        log::trace!("discarding {} commands", self.commands.len());
        self.commands.clear();
        self.reset();
    }

    fn reset(&mut self) {
        self.pending = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Apply every buffered command to `storage` in the order recorded.
    ///
    /// Each command sees the effects of those before it. A command which
    /// fails is logged and skipped; the rest still run.
    pub fn run(&mut self, storage: &mut ArchetypeStorage) -> RunSummary {
        let commands = std::mem::take(&mut self.commands);
        let mut summary = RunSummary {
            applied: 0,
            failures: Vec::new(),
            buffer: self.id,
            epoch: self.epoch,
            created: Vec::with_capacity(self.pending as usize),
        };
        self.reset();

        log::trace!("flushing {} commands", commands.len());
        for (index, command) in commands.into_iter().enumerate() {
            match apply(storage, command, &mut summary) {
                Ok(()) => summary.applied += 1,
                Err(error) => {
                    log::warn!("command {} failed: {}", index, error);
                    summary.failures.push(CommandFailure { index, error });
                }
            }
        }

        summary
    }
}

impl Default for CommandBuffer {
    fn default() -> CommandBuffer {
        CommandBuffer::new()
    }
}

fn apply(storage: &mut ArchetypeStorage, command: Command, summary: &mut RunSummary) -> Result<()> {
    match command {
        Command::Create(bundle) => {
            summary.created.push(storage.create_entity(bundle));
            Ok(())
        }
        Command::Delete(target) => storage.delete_entity(summary.resolve(target)?),
        Command::Add(target, value) => storage.add_component_value(summary.resolve(target)?, value),
        Command::Remove(target, name, lookup) => {
            let id = summary.resolve(target)?;
            match lookup(storage.registry()) {
                Some(ty) => storage.remove_component_id(id, ty),
                None => {
                    storage.location(id)?;
                    Err(Error::ComponentNotPresent {
                        entity: id,
                        component: name,
                    })
                }
            }
        }
        Command::RemoveId(target, ty) => storage.remove_component_id(summary.resolve(target)?, ty),
    }
}
