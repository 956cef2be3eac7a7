//! Iteration over every entity which has a given set of components.

use std::marker::PhantomData;
use std::sync::Arc;

use bit_vec::BitVec;

use crate::archetype::Signature;
use crate::component::{Component, ComponentRegistry, ComponentTypeID};
use crate::component_data::ComponentValueRef;
use crate::entity::EntityID;
use crate::storage::ArchetypeStorage;
use crate::table::Table;

/// A filter over tables: every required component present, every excluded
/// component absent.
///
/// Matching tables are found again on every call, so a `Query` can be kept
/// around while the storage changes shape underneath it.
#[derive(Clone, Debug)]
pub struct Query {
    registry: Arc<ComponentRegistry>,
    required: Signature,
    excluded: Signature,
}

impl Query {
    /// Create a query which matches every entity.
    ///
    /// Component type IDs are only meaningful within one registry, so the
    /// query panics if it is used with a storage built on any other.
    pub fn new(registry: &Arc<ComponentRegistry>) -> Query {
        Query {
            registry: registry.clone(),
            required: Signature::empty(),
            excluded: Signature::empty(),
        }
    }

    /// Require a component type.
    pub fn with<T: Component>(mut self) -> Query {
        let ty = self.registry.register::<T>();
        self.required.insert(ty);
        self
    }

    /// Exclude entities which have a component type.
    pub fn without<T: Component>(mut self) -> Query {
        let ty = self.registry.register::<T>();
        self.excluded.insert(ty);
        self
    }

    /// Require a component type by ID.
    pub fn with_id(mut self, ty: ComponentTypeID) -> Query {
        self.required.insert(ty);
        self
    }

    /// Exclude a component type by ID.
    pub fn without_id(mut self, ty: ComponentTypeID) -> Query {
        self.excluded.insert(ty);
        self
    }

    /// Return the required component types.
    pub fn required(&self) -> &Signature {
        &self.required
    }

    /// Return the excluded component types.
    pub fn excluded(&self) -> &Signature {
        &self.excluded
    }

    /// Returns true if a table with this signature would be visited.
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.is_superset(&self.required) && signature.is_disjoint(&self.excluded)
    }

    fn check_storage(&self, storage: &ArchetypeStorage) {
        assert!(
            Arc::ptr_eq(&self.registry, storage.registry()),
            "query used with a storage from another registry");
    }

    /// Iterate over the tables this query matches.
    pub fn tables<'a>(&'a self, storage: &'a ArchetypeStorage) -> impl Iterator<Item = &'a Table> + 'a {
        self.check_storage(storage);
        storage.tables().filter(move |t| self.matches(t.signature()))
    }

    /// Return the number of matching entities.
    pub fn count(&self, storage: &ArchetypeStorage) -> usize {
        self.tables(storage).map(Table::len).sum()
    }

    /// Iterate over every matching entity with read access to its components.
    pub fn iter<'a>(&'a self, storage: &'a ArchetypeStorage) -> impl Iterator<Item = (EntityID, RowRef<'a>)> + 'a {
        self.tables(storage)
            .flat_map(|table| {
                table.entities().iter()
                    .enumerate()
                    .map(move |(row, entity)| (*entity, RowRef { table, row }))
            })
    }

    /// Iterate over every matching entity with write access to its components.
    pub fn iter_mut<'a>(&self, storage: &'a mut ArchetypeStorage) -> QueryIterMut<'a> {
        self.check_storage(storage);
        let tables = storage.tables_mut()
            .filter(|t| self.matches(t.signature()))
            .collect();

        QueryIterMut {
            tables,
            table: 0,
            row: 0,
        }
    }
}

/// Read access to one row of a table.
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a Table,
    row: usize,
}

impl<'a> RowRef<'a> {
    /// Get the ID of the entity in this row.
    pub fn entity(&self) -> EntityID {
        self.table.entities()[self.row]
    }

    /// Get the table this row is in.
    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// Get a reference to a component.
    pub fn get<T: Component>(&self) -> Option<&'a T> {
        self.table.get::<T>(self.row)
    }

    /// Get a type-erased view of a component.
    pub fn value(&self, ty: ComponentTypeID) -> Option<ComponentValueRef<'a>> {
        self.table.value(self.row, ty)
    }

    /// Iterate over type-erased views of every component in this row.
    pub fn values(&self) -> impl Iterator<Item = ComponentValueRef<'a>> + 'a {
        self.table.row_values(self.row)
    }
}

/// Iterator returned by `Query::iter_mut`.
pub struct QueryIterMut<'a> {
    tables: Vec<&'a mut Table>,
    table: usize,
    row: usize,
}

impl<'a> Iterator for QueryIterMut<'a> {
    type Item = (EntityID, RowMut<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let table = self.tables.get_mut(self.table)?;
            if self.row < table.len() {
                let row = self.row;
                self.row += 1;

                let entity = table.entities()[row];
                let table: *mut Table = &mut **table;
                return Some((entity, unsafe { RowMut::new(table, row) }));
            }

            self.table += 1;
            self.row = 0;
        }
    }
}

/// Write access to one row of a table.
///
/// Several components of the row can be borrowed at once. Each component
/// type can be handed out either once mutably or any number of times
/// immutably; further requests return `None`.
pub struct RowMut<'a> {
    table: *mut Table,
    row: usize,
    locked: BitVec,
    _marker: PhantomData<&'a mut Table>,
}

impl<'a> RowMut<'a> {
    /// # Safety
    /// No other `RowMut` may exist for the same row, and the table must not
    /// change shape for `'a`.
    unsafe fn new(table: *mut Table, row: usize) -> RowMut<'a> {
        let num_columns = (*table).signature().len();
        RowMut {
            table,
            row,
            locked: BitVec::from_elem(num_columns << 1, false),
            _marker: PhantomData,
        }
    }

    fn table(&self) -> &Table {
        unsafe { &*self.table }
    }

    /// Get the ID of the entity in this row.
    pub fn entity(&self) -> EntityID {
        self.table().entities()[self.row]
    }

    /// Returns true if this row has a component of type `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.table().column_index::<T>().is_some()
    }

    fn mark_column(&mut self, column: usize, mutable: bool) -> bool {
        let offset = column << 1;
        let shared = self.locked[offset];
        let exclusive = self.locked[offset + 1];

        if mutable && !shared && !exclusive {
            self.locked.set(offset + 1, true);
            true
        } else if !mutable && !exclusive {
            self.locked.set(offset, true);
            true
        } else {
            false
        }
    }

    /// Get a reference to a component.
    ///
    /// Returns `None` if the row has no `T`, or it is already borrowed
    /// mutably.
    pub fn get<T: Component>(&mut self) -> Option<&'a T> {
        let column = self.table().column_index::<T>()?;
        if !self.mark_column(column, false) {
            return None;
        }

        let ptr = self.table().column_ptr(column, self.row);
        Some(unsafe { &*(ptr as *const T) })
    }

    /// Get a mutable reference to a component.
    ///
    /// Returns `None` if the row has no `T`, or it is already borrowed.
    pub fn get_mut<T: Component>(&mut self) -> Option<&'a mut T> {
        let column = self.table().column_index::<T>()?;
        if !self.mark_column(column, true) {
            return None;
        }

        let ptr = self.table().column_ptr(column, self.row);
        Some(unsafe { &mut *(ptr as *mut T) })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component;
    use std::collections::HashSet;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(i32);
    component!(Position);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(i32);
    component!(Velocity);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Frozen;
    component!(Frozen);

    fn populated() -> (ArchetypeStorage, Vec<EntityID>) {
        let mut storage = ArchetypeStorage::new(ComponentRegistry::new());
        let ids = vec![
            storage.create_entity((Position(0), Velocity(1))),
            storage.create_entity((Position(10),)),
            storage.create_entity((Position(20), Velocity(2), Frozen)),
            storage.create_entity((Velocity(3),)),
            storage.create_entity((Position(30), Velocity(4))),
        ];
        (storage, ids)
    }

    #[test]
    fn test_matches() {
        let (storage, ids) = populated();
        let query = Query::new(storage.registry()).with::<Position>().without::<Frozen>();

        for id in ids {
            let signature = storage.signature_of(id).unwrap();
            let expected = storage.has_component::<Position>(id) && !storage.has_component::<Frozen>(id);
            assert_eq!(query.matches(signature), expected);
        }
    }

    #[test]
    fn test_iter() {
        let (storage, ids) = populated();
        let query = Query::new(storage.registry()).with::<Position>().with::<Velocity>();

        let found: HashSet<_> = query.iter(&storage).map(|(id, _)| id).collect();
        let expected: HashSet<_> = [ids[0], ids[2], ids[4]].iter().copied().collect();
        assert_eq!(found, expected);
        assert_eq!(query.count(&storage), 3);

        for (id, row) in query.iter(&storage) {
            assert_eq!(row.entity(), id);
            assert_eq!(row.get::<Position>(), storage.component::<Position>(id));
        }

        let everything = Query::new(storage.registry());
        assert_eq!(everything.iter(&storage).count(), ids.len());
    }

    #[test]
    fn test_iter_mut() {
        let (mut storage, ids) = populated();
        let query = Query::new(storage.registry()).with::<Position>().with::<Velocity>().without::<Frozen>();

        for (_, mut row) in query.iter_mut(&mut storage) {
            let velocity = row.get::<Velocity>().unwrap();
            let position = row.get_mut::<Position>().unwrap();
            position.0 += velocity.0;
        }

        assert_eq!(storage.component::<Position>(ids[0]), Some(&Position(1)));
        assert_eq!(storage.component::<Position>(ids[1]), Some(&Position(10)));
        assert_eq!(storage.component::<Position>(ids[2]), Some(&Position(20)));
        assert_eq!(storage.component::<Position>(ids[4]), Some(&Position(34)));
    }

    #[test]
    fn test_row_borrows() {
        let (mut storage, _) = populated();
        let query = Query::new(storage.registry()).with::<Position>();

        let (_, mut row) = query.iter_mut(&mut storage).next().unwrap();
        assert!(row.get_mut::<Position>().is_some());
        assert!(row.get_mut::<Position>().is_none());
        assert!(row.get::<Position>().is_none());
        assert!(row.get_mut::<Frozen>().is_none());
    }

    #[test]
    fn test_recomputed() {
        let (mut storage, ids) = populated();
        let query = Query::new(storage.registry()).with::<Frozen>();
        assert_eq!(query.count(&storage), 1);

        storage.add_component(ids[0], Frozen).unwrap();
        assert_eq!(query.count(&storage), 2);

        storage.remove_component::<Frozen>(ids[2]).unwrap();
        let found: Vec<_> = query.iter(&storage).map(|(id, _)| id).collect();
        assert_eq!(found, vec![ids[0]]);
    }

    #[test]
    #[should_panic(expected = "another registry")]
    fn test_foreign_registry() {
        let (storage, _) = populated();
        let other = ArchetypeStorage::new(ComponentRegistry::new());
        let query = Query::new(other.registry()).with::<Position>();
        query.count(&storage);
    }
}
