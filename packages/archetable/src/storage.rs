//! Storage for every entity and component, partitioned into tables by signature.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::archetype::Signature;
use crate::component::{Component, ComponentRegistration, ComponentRegistry, ComponentTypeID};
use crate::component_data::{ComponentValue, IntoBundle};
use crate::config::StorageConfig;
use crate::entity::{EntityAllocator, EntityID};
use crate::error::{Error, Result};
use crate::table::{Table, TableId};

/// Where an entity's components currently live.
///
/// Rows move whenever a table is mutated, so locations must be looked up
/// again after any structural change rather than cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// The table holding the entity.
    pub table: TableId,
    /// The row within that table.
    pub row: usize,
}

/// Owns every table of component data and the entity index into them.
pub struct ArchetypeStorage {
    registry: Arc<ComponentRegistry>,
    config: StorageConfig,
    allocator: EntityAllocator,
    tables: Vec<Option<Table>>,
    free_tables: Vec<usize>,
    by_signature: HashMap<Signature, TableId>,
    locations: Vec<Option<EntityLocation>>,
}

impl ArchetypeStorage {
    /// Create an empty storage with the default settings.
    pub fn new(registry: Arc<ComponentRegistry>) -> ArchetypeStorage {
        ArchetypeStorage::with_config(registry, StorageConfig::default())
    }

    /// Create an empty storage with the given settings.
    pub fn with_config(registry: Arc<ComponentRegistry>, config: StorageConfig) -> ArchetypeStorage {
        ArchetypeStorage {
            registry,
            config,
            allocator: EntityAllocator::new(),
            tables: Vec::new(),
            free_tables: Vec::new(),
            by_signature: HashMap::new(),
            locations: Vec::new(),
        }
    }

    /// Get the component registry this storage resolves types against.
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Get the settings of this storage.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns true if `id` refers to a live entity.
    pub fn is_alive(&self, id: EntityID) -> bool {
        self.allocator.is_alive(id)
    }

    /// Returns the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Returns the number of tables.
    pub fn table_count(&self) -> usize {
        self.by_signature.len()
    }

    /// Get the allocator issuing this storage's entity IDs.
    pub fn allocator(&self) -> &EntityAllocator {
        &self.allocator
    }

    /// Iterate over all tables.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter_map(Option::as_ref)
    }

    /// Iterate mutably over all tables.
    ///
    /// Only component values can be changed through this; rows cannot be
    /// added or removed.
    pub(crate) fn tables_mut(&mut self) -> impl Iterator<Item = &mut Table> {
        self.tables.iter_mut().filter_map(Option::as_mut)
    }

    /// Get a table by ID.
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.0).and_then(Option::as_ref)
    }

    /// Find the table for a signature, if one exists.
    pub fn table_for(&self, signature: &Signature) -> Option<&Table> {
        self.by_signature.get(signature).and_then(|id| self.table(*id))
    }

    /// Iterate over every live entity.
    pub fn entities(&self) -> impl Iterator<Item = EntityID> + '_ {
        self.tables().flat_map(|t| t.entities().iter().copied())
    }

    /// Look up where an entity's components live.
    pub fn location(&self, id: EntityID) -> Result<EntityLocation> {
        if !self.allocator.is_alive(id) {
            return Err(Error::UnknownEntity(id));
        }

        match self.locations.get(id.index() as usize).copied().flatten() {
            Some(location) => Ok(location),
            None => panic!("live entity {:?} has no location", id),
        }
    }

    /// Return the signature of a live entity.
    pub fn signature_of(&self, id: EntityID) -> Result<&Signature> {
        let location = self.location(id)?;
        Ok(self.table_at(location.table).signature())
    }

    /// Create an entity with the given initial components.
    pub fn create_entity(&mut self, components: impl IntoBundle) -> EntityID {
        let values = components.into_bundle().resolve(&self.registry);
        let signature: Signature = values.iter().map(|(ty, _)| *ty).collect();
        let table_id = self.ensure_table(&signature);

        let id = self.allocator.allocate();
        let row = self.table_at_mut(table_id).insert_row(id, values);
        self.set_location(id, Some(EntityLocation { table: table_id, row }));
        id
    }

    /// Create an entity with no components, returning a handle for adding some.
    pub fn spawn(&mut self) -> EntityMut<'_> {
        let id = self.create_entity(());
        EntityMut { storage: self, id }
    }

    /// Get a handle to a live entity.
    pub fn entity_mut(&mut self, id: EntityID) -> Result<EntityMut<'_>> {
        self.location(id)?;
        Ok(EntityMut { storage: self, id })
    }

    /// Add a component to an entity, moving it to the matching table.
    pub fn add_component<T: Component>(&mut self, id: EntityID, value: T) -> Result<()> {
        self.add_component_value(id, ComponentValue::new(value))
    }

    /// Add a type-erased component to an entity.
    ///
    /// On failure the value is dropped, which releases it.
    pub fn add_component_value(&mut self, id: EntityID, value: ComponentValue) -> Result<()> {
        let location = self.location(id)?;
        let ty = value.register(&self.registry);

        let signature = self.table_at(location.table).signature();
        if signature.includes(ty) {
            return Err(Error::DuplicateComponent {
                entity: id,
                component: value.name(),
            });
        }

        let signature = signature.with(ty);
        let dest = self.ensure_table(&signature);
        self.migrate(id, location, dest, vec![(ty, value)]);
        Ok(())
    }

    /// Remove a component from an entity, releasing the value.
    pub fn remove_component<T: Component>(&mut self, id: EntityID) -> Result<()> {
        self.location(id)?;
        match self.registry.id_of::<T>() {
            Some(ty) => self.remove_component_id(id, ty),
            None => Err(Error::ComponentNotPresent {
                entity: id,
                component: type_name::<T>(),
            }),
        }
    }

    /// Remove a component from an entity by type ID, releasing the value.
    pub fn remove_component_id(&mut self, id: EntityID, ty: ComponentTypeID) -> Result<()> {
        let location = self.location(id)?;

        let signature = self.table_at(location.table).signature();
        if !signature.includes(ty) {
            return Err(Error::ComponentNotPresent {
                entity: id,
                component: self.registry.name(ty).unwrap_or("<unregistered>"),
            });
        }

        let signature = signature.without(ty);
        let dest = self.ensure_table(&signature);
        self.migrate(id, location, dest, Vec::new());
        Ok(())
    }

    /// Get a reference to one of an entity's components.
    pub fn get_component<T: Component>(&self, id: EntityID) -> Result<&T> {
        let location = self.location(id)?;
        self.table_at(location.table)
            .get::<T>(location.row)
            .ok_or(Error::ComponentNotPresent {
                entity: id,
                component: type_name::<T>(),
            })
    }

    /// Get a mutable reference to one of an entity's components.
    pub fn get_component_mut<T: Component>(&mut self, id: EntityID) -> Result<&mut T> {
        let location = self.location(id)?;
        self.table_at_mut(location.table)
            .get_mut::<T>(location.row)
            .ok_or(Error::ComponentNotPresent {
                entity: id,
                component: type_name::<T>(),
            })
    }

    /// Get a reference to a component, or `None` if the entity is dead or
    /// lacks it.
    pub fn component<T: Component>(&self, id: EntityID) -> Option<&T> {
        self.get_component(id).ok()
    }

    /// Get a mutable reference to a component, or `None` if the entity is
    /// dead or lacks it.
    pub fn component_mut<T: Component>(&mut self, id: EntityID) -> Option<&mut T> {
        self.get_component_mut(id).ok()
    }

    /// Returns true if the entity is alive and has a `T`.
    pub fn has_component<T: Component>(&self, id: EntityID) -> bool {
        match (self.location(id), self.registry.id_of::<T>()) {
            (Ok(location), Some(ty)) => self.table_at(location.table).has_component_type(ty),
            _ => false,
        }
    }

    /// Delete an entity, releasing all of its components.
    ///
    /// The entity is gone even if a teardown panics part way through.
    pub fn delete_entity(&mut self, id: EntityID) -> Result<()> {
        let location = self.location(id)?;

        if let Some(moved) = self.swapped_into(location) {
            self.set_location(moved, Some(location));
        }
        self.set_location(id, None);
        self.allocator.free(id)?;

        self.table_at_mut(location.table).remove_row(location.row);
        self.release_table_if_empty(location.table);
        Ok(())
    }

    /// Delete every entity, releasing all components.
    pub fn delete_all(&mut self) {
        log::debug!(
            "deleting {} entities across {} tables",
            self.allocator.alive_count(),
            self.by_signature.len());

        let detached: Vec<(TableId, usize)> = self.tables_mut()
            .map(|table| (table.id(), table.detach_all()))
            .collect();
        self.allocator.clear();
        self.locations.clear();

        for (id, rows) in detached {
            unsafe { self.table_at_mut(id).release_detached(rows) };
        }

        if !self.config.retain_empty_tables {
            self.tables.clear();
            self.free_tables.clear();
            self.by_signature.clear();
        }
    }

    fn table_at(&self, id: TableId) -> &Table {
        match self.tables.get(id.0) {
            Some(Some(table)) => table,
            _ => panic!("table {:?} does not exist", id),
        }
    }

    fn table_at_mut(&mut self, id: TableId) -> &mut Table {
        match self.tables.get_mut(id.0) {
            Some(Some(table)) => table,
            _ => panic!("table {:?} does not exist", id),
        }
    }

    fn two_tables_mut(&mut self, a: TableId, b: TableId) -> (&mut Table, &mut Table) {
        assert_ne!(a, b, "cannot borrow table {:?} twice", a);
        let (first, second) = if a.0 < b.0 {
            let (lo, hi) = self.tables.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.tables.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        };

        match (first, second) {
            (Some(first), Some(second)) => (first, second),
            _ => panic!("tables {:?} and {:?} must both exist", a, b),
        }
    }

    /// Return the entity which a swap-remove of `location` would move.
    fn swapped_into(&self, location: EntityLocation) -> Option<EntityID> {
        let entities = self.table_at(location.table).entities();
        match entities.len().checked_sub(1) {
            Some(last) if last != location.row => Some(entities[last]),
            _ => None,
        }
    }

    fn set_location(&mut self, id: EntityID, location: Option<EntityLocation>) {
        let index = id.index() as usize;
        if self.locations.len() <= index {
            self.locations.resize(index + 1, None);
        }
        self.locations[index] = location;
    }

    /// Find or create the table for a signature.
    fn ensure_table(&mut self, signature: &Signature) -> TableId {
        if let Some(id) = self.by_signature.get(signature) {
            return *id;
        }

        let registrations: Vec<ComponentRegistration> = signature.iter()
            .map(|ty| match self.registry.registration(ty) {
                Some(registration) => registration,
                None => panic!("component #{} is not registered", ty.id()),
            })
            .collect();

        let id = match self.free_tables.pop() {
            Some(idx) => TableId(idx),
            None => {
                self.tables.push(None);
                TableId(self.tables.len() - 1)
            }
        };

        log::debug!("creating table {} for [{}]", id.0, self.signature_names(signature));
        let table = Table::new(id, signature.clone(), registrations, self.config.initial_table_capacity);
        self.tables[id.0] = Some(table);
        self.by_signature.insert(signature.clone(), id);
        id
    }

    /// Move an entity to another table, fixing up both locations.
    fn migrate(
        &mut self,
        id: EntityID,
        location: EntityLocation,
        dest: TableId,
        extra: Vec<(ComponentTypeID, ComponentValue)>,
    ) {
        log::trace!("moving {:?} from table {} to table {}", id, location.table.0, dest.0);

        let row = self.table_at(dest).len();
        if let Some(moved) = self.swapped_into(location) {
            self.set_location(moved, Some(location));
        }
        self.set_location(id, Some(EntityLocation { table: dest, row }));

        let (source_table, dest_table) = self.two_tables_mut(location.table, dest);
        let (dest_row, _) = source_table.move_row(location.row, dest_table, extra);
        debug_assert_eq!(dest_row, row);
        self.release_table_if_empty(location.table);
    }

    fn release_table_if_empty(&mut self, id: TableId) {
        if self.config.retain_empty_tables || !self.table_at(id).is_empty() {
            return;
        }

        if let Some(table) = self.tables[id.0].take() {
            log::debug!("dropping empty table {} [{}]", id.0, self.signature_names(table.signature()));
            self.by_signature.remove(table.signature());
            self.free_tables.push(id.0);
        }
    }

    fn signature_names(&self, signature: &Signature) -> String {
        signature.iter()
            .map(|ty| self.registry.name(ty).unwrap_or("?"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check every entity's location points at its own row.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for table in self.tables() {
            table.assert_consistent();
            for (row, entity) in table.entities().iter().enumerate() {
                assert_eq!(self.location(*entity), Ok(EntityLocation { table: table.id(), row }));
            }
        }
    }
}

impl Debug for ArchetypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ArchetypeStorage {{")?;

        writeln!(f, "  Tables:")?;
        for table in self.tables() {
            if table.is_empty() {
                continue;
            }

            writeln!(f, "    #{} - [{}]", table.id().id(), self.signature_names(table.signature()))?;
            for entity in table.entities() {
                writeln!(f, "      Entity {:?}", entity)?;
            }
        }

        writeln!(f, "}}")
    }
}

/// A handle to one live entity, borrowing its storage.
pub struct EntityMut<'a> {
    storage: &'a mut ArchetypeStorage,
    id: EntityID,
}

impl<'a> EntityMut<'a> {
    /// Get the ID of the entity.
    pub fn id(&self) -> EntityID {
        self.id
    }

    /// Add a component, returning the handle for chaining.
    pub fn add<T: Component>(self, value: T) -> Result<EntityMut<'a>> {
        self.storage.add_component(self.id, value)?;
        Ok(self)
    }

    /// Remove a component, returning the handle for chaining.
    pub fn remove<T: Component>(self) -> Result<EntityMut<'a>> {
        self.storage.remove_component::<T>(self.id)?;
        Ok(self)
    }

    /// Get a reference to a component.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.storage.component(self.id)
    }

    /// Get a mutable reference to a component.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.storage.component_mut(self.id)
    }

    /// Delete the entity.
    pub fn delete(self) -> Result<()> {
        self.storage.delete_entity(self.id)
    }
}
