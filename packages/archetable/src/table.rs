//! Logic for dealing with tables of entities.

use std::alloc::{self, Layout};
use std::fmt::{self, Debug};
use std::ops::Range;
use std::ptr::{self, NonNull};

use crate::archetype::Signature;
use crate::component::{Component, ComponentRegistration, ComponentTypeID};
use crate::component_data::{ComponentValue, ComponentValueRef};
use crate::entity::EntityID;

/// The index of a `Table` within its `ArchetypeStorage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub(crate) usize);

impl TableId {
    /// Return the inner index.
    pub fn id(&self) -> usize {
        self.0
    }
}

/// A packed, type-erased array of one component type.
pub(crate) struct Column {
    registration: ComponentRegistration,
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
}

impl Column {
    fn new(registration: ComponentRegistration, capacity: usize) -> Column {
        let align = registration.layout().align();
        // Zero-sized components never allocate, a well-aligned dangling
        // pointer is enough.
        let ptr = NonNull::new(align as *mut u8).unwrap_or(NonNull::dangling());
        let mut column = Column {
            registration,
            ptr,
            len: 0,
            capacity: 0,
        };
        column.reserve(capacity);
        column
    }

    fn item_size(&self) -> usize {
        self.registration.layout().size()
    }

    fn array_layout(&self, capacity: usize) -> Layout {
        let layout = self.registration.layout();
        let size = layout.size().checked_mul(capacity).expect("column capacity overflow");
        Layout::from_size_align(size, layout.align()).expect("invalid column layout")
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.capacity {
            return;
        }

        if self.item_size() == 0 {
            self.capacity = usize::MAX;
            return;
        }

        let new_capacity = required.max(self.capacity * 2).max(4);
        let new_layout = self.array_layout(new_capacity);
        let raw = unsafe {
            if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                alloc::realloc(self.ptr.as_ptr(), self.array_layout(self.capacity), new_layout.size())
            }
        };

        self.ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.capacity = new_capacity;
    }

    fn ptr_at(&self, row: usize) -> *mut u8 {
        assert!(row < self.len, "row {} out of bounds for column of {}", row, self.len);
        unsafe { self.ptr.as_ptr().add(row * self.item_size()) }
    }

    /// Append one value by copying its bytes from `src`.
    unsafe fn push_raw(&mut self, src: *const u8) {
        self.reserve(1);
        let dest = self.ptr.as_ptr().add(self.len * self.item_size());
        ptr::copy_nonoverlapping(src, dest, self.item_size());
        self.len += 1;
    }

    /// Swap the value at `row` with the last one and shrink the column.
    ///
    /// The removed value is left just past the end, still owned by the
    /// caller, who must either release it or treat it as moved.
    fn swap_remove_detach(&mut self, row: usize) {
        assert!(row < self.len, "row {} out of bounds for column of {}", row, self.len);
        let last = self.len - 1;
        if row != last {
            let size = self.item_size();
            unsafe {
                let base = self.ptr.as_ptr();
                ptr::swap_nonoverlapping(base.add(row * size), base.add(last * size), size);
            }
        }
        self.len -= 1;
    }

    /// Release (teardown + drop) the detached values in `rows`.
    ///
    /// # Safety
    /// Every slot in `rows` must lie at or past `len`, hold a live value
    /// and not be released again.
    unsafe fn release_range(&mut self, rows: Range<usize>) {
        debug_assert!(rows.start >= self.len && rows.end <= self.capacity);
        let size = self.item_size();
        for row in rows {
            self.registration.release(self.ptr.as_ptr().add(row * size));
        }
    }

    fn release_all(&mut self) {
        let len = std::mem::replace(&mut self.len, 0);
        unsafe { self.release_range(0..len) };
    }

    unsafe fn as_slice<T>(&self) -> &[T] {
        std::slice::from_raw_parts(self.ptr.as_ptr() as *const T, self.len)
    }

    unsafe fn as_mut_slice<T>(&mut self) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut T, self.len)
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.release_all();
        if self.item_size() > 0 && self.capacity > 0 {
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.array_layout(self.capacity)) };
        }
    }
}

/// All entities which share one `Signature`.
///
/// The components are stored as a struct of arrays: one packed column per
/// component type, in signature order, plus a column of entity IDs. Row `n`
/// of every column belongs to the same entity.
pub struct Table {
    id: TableId,
    signature: Signature,
    columns: Vec<Column>,
    entities: Vec<EntityID>,
}

impl Table {
    /// Create an empty table.
    ///
    /// `registrations` must be in signature order.
    pub(crate) fn new(
        id: TableId,
        signature: Signature,
        registrations: Vec<ComponentRegistration>,
        capacity: usize,
    ) -> Table {
        assert_eq!(signature.len(), registrations.len());
        let columns = registrations.into_iter()
            .zip(signature.iter())
            .map(|(registration, ty)| {
                assert_eq!(registration.type_id(), ty);
                Column::new(registration, capacity)
            })
            .collect();

        Table {
            id,
            signature,
            columns,
            entities: Vec::with_capacity(capacity),
        }
    }

    /// Return the ID of this table within its storage.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Return the component types stored in this table.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Get the total number of entities currently stored in this table.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if this table contains no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Return the entity stored in each row.
    pub fn entities(&self) -> &[EntityID] {
        &self.entities
    }

    /// Return the entity stored in a row.
    pub fn entity(&self, row: usize) -> Option<EntityID> {
        self.entities.get(row).copied()
    }

    /// Returns true if this table stores the given component type.
    pub fn has_component_type(&self, component_type: ComponentTypeID) -> bool {
        self.signature.includes(component_type)
    }

    pub(crate) fn column_index<T: Component>(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.registration.is::<T>())
    }

    pub(crate) fn column_ptr(&self, column: usize, row: usize) -> *mut u8 {
        self.columns[column].ptr_at(row)
    }

    /// Get a slice of components from this table.
    pub fn column<T: Component>(&self) -> Option<&[T]> {
        self.column_index::<T>()
            .map(|idx| unsafe { self.columns[idx].as_slice::<T>() })
    }

    /// Get a mutable slice of components from this table.
    pub fn column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        self.column_index::<T>()
            .map(move |idx| unsafe { self.columns[idx].as_mut_slice::<T>() })
    }

    /// Get a reference to one component.
    pub fn get<T: Component>(&self, row: usize) -> Option<&T> {
        self.column::<T>().and_then(|c| c.get(row))
    }

    /// Get a mutable reference to one component.
    pub fn get_mut<T: Component>(&mut self, row: usize) -> Option<&mut T> {
        self.column_mut::<T>().and_then(|c| c.get_mut(row))
    }

    /// Get a type-erased view of one component.
    pub fn value(&self, row: usize, component_type: ComponentTypeID) -> Option<ComponentValueRef<'_>> {
        let column = &self.columns[self.signature.index_of(component_type)?];
        if row >= column.len {
            return None;
        }

        unsafe {
            let slice = std::slice::from_raw_parts(column.ptr_at(row), column.item_size());
            Some(ComponentValueRef::from_raw(column.registration, slice))
        }
    }

    /// Iterate over type-erased views of every component in a row.
    pub fn row_values(&self, row: usize) -> impl Iterator<Item = ComponentValueRef<'_>> + '_ {
        self.signature.iter().filter_map(move |ty| self.value(row, ty))
    }

    /// Insert an entity, moving its component values into the table.
    ///
    /// `values` must be sorted by type and match the signature exactly.
    pub(crate) fn insert_row(&mut self, entity: EntityID, values: Vec<(ComponentTypeID, ComponentValue)>) -> usize {
        assert_eq!(values.len(), self.columns.len(), "component values do not match the table signature");

        let row = self.entities.len();
        for (column, (ty, value)) in self.columns.iter_mut().zip(values) {
            assert_eq!(column.registration.type_id(), ty, "component values do not match the table signature");
            assert!(value.layout() == column.registration.layout());

            column.reserve(1);
            unsafe {
                let dest = column.ptr.as_ptr().add(column.len * column.item_size());
                value.move_into(dest);
            }
            column.len += 1;
        }
        self.entities.push(entity);
        row
    }

    /// Remove the entity at `row`, releasing every component it owns.
    ///
    /// The last row is moved into the gap. Returns the ID of the entity
    /// which moved, if any, so the caller can fix up its location.
    ///
    /// The row is detached before any teardown runs: if one panics the
    /// table is still consistent and the remaining values are leaked.
    pub(crate) fn remove_row(&mut self, row: usize) -> Option<EntityID> {
        let moved = self.detach_row(row);
        let spare = self.entities.len();
        for column in self.columns.iter_mut() {
            unsafe { column.release_range(spare..spare + 1) };
        }
        moved
    }

    /// Swap-remove the entity at `row`, leaving its components just past
    /// the end of each column.
    fn detach_row(&mut self, row: usize) -> Option<EntityID> {
        assert!(row < self.entities.len(), "row {} out of bounds for table of {}", row, self.entities.len());
        for column in self.columns.iter_mut() {
            column.swap_remove_detach(row);
        }

        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Move the entity at `row` into `dest`.
    ///
    /// Components in both signatures are moved over; components only in
    /// this table are released; components only in `dest` are taken from
    /// `extra`, which must be sorted by type. Returns the new row in `dest`
    /// and the entity which was swapped into `row` here, if any.
    ///
    /// Both tables are complete before the dropped components are released.
    pub(crate) fn move_row(
        &mut self,
        row: usize,
        dest: &mut Table,
        extra: Vec<(ComponentTypeID, ComponentValue)>,
    ) -> (usize, Option<EntityID>) {
        assert!(row < self.len(), "row {} out of bounds for table of {}", row, self.len());

        let entity = self.entities[row];
        let mut missing = extra.iter().map(|(ty, _)| *ty);
        for ty in dest.signature.iter().filter(|ty| !self.signature.includes(*ty)) {
            if missing.next() != Some(ty) {
                panic!("no value for component #{} while moving {:?}", ty.id(), entity);
            }
        }
        assert!(missing.next().is_none(), "unused component values while moving {:?}", entity);

        let mut extra = extra.into_iter();
        for column in dest.columns.iter_mut() {
            let ty = column.registration.type_id();
            if let Some(source) = self.signature.index_of(ty) {
                unsafe { column.push_raw(self.columns[source].ptr_at(row)) };
                continue;
            }

            match extra.next() {
                Some((_, value)) => {
                    assert!(value.layout() == column.registration.layout());
                    column.reserve(1);
                    unsafe {
                        let dest_ptr = column.ptr.as_ptr().add(column.len * column.item_size());
                        value.move_into(dest_ptr);
                    }
                    column.len += 1;
                }
                None => unreachable!(),
            }
        }
        dest.entities.push(entity);
        let dest_row = dest.entities.len() - 1;

        let moved = self.detach_row(row);
        let spare = self.entities.len();
        for column in self.columns.iter_mut() {
            if !dest.signature.includes(column.registration.type_id()) {
                unsafe { column.release_range(spare..spare + 1) };
            }
        }
        (dest_row, moved)
    }

    /// Empty the table without releasing anything, returning how many
    /// rows were detached.
    pub(crate) fn detach_all(&mut self) -> usize {
        let rows = self.entities.len();
        self.entities.clear();
        for column in self.columns.iter_mut() {
            column.len = 0;
        }
        rows
    }

    /// Release the rows left behind by `detach_all`.
    ///
    /// # Safety
    /// `rows` must be the result of the last `detach_all`, with nothing
    /// inserted or released since.
    pub(crate) unsafe fn release_detached(&mut self, rows: usize) {
        for column in self.columns.iter_mut() {
            column.release_range(0..rows);
        }
    }

    /// Check the columns all agree on the length of the table.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for column in self.columns.iter() {
            assert_eq!(column.len, self.entities.len(), "column length mismatch in table {:?}", self.id);
        }
    }
}

impl Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
               "Table {{ id: {}, signature: {:?}, len: {} }}",
               self.id.0,
               self.signature,
               self.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component;
    use crate::component::ComponentRegistry;
    use crate::component_data::{Bundle, IntoBundle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct A(u32);
    component!(A);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct B(u64);
    component!(B);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Marker;
    component!(Marker);

    fn table_for(registry: &ComponentRegistry, id: usize, bundle: &[ComponentTypeID]) -> Table {
        let signature = Signature::new(bundle.to_vec());
        let registrations = signature.iter()
            .map(|ty| registry.registration(ty).unwrap())
            .collect();
        Table::new(TableId(id), signature, registrations, 2)
    }

    fn values(registry: &ComponentRegistry, bundle: Bundle) -> Vec<(ComponentTypeID, ComponentValue)> {
        bundle.resolve(registry)
    }

    #[test]
    fn test_insert_get() {
        let registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let mut table = table_for(&registry, 0, &[a, b]);

        for i in 0..10 {
            let row = table.insert_row(EntityID::new(i, 0), values(&registry, (A(i), B(i as u64 * 2)).into_bundle()));
            assert_eq!(row, i as usize);
        }

        assert_eq!(table.len(), 10);
        assert_eq!(table.get::<A>(7), Some(&A(7)));
        assert_eq!(table.get::<B>(7), Some(&B(14)));
        assert_eq!(table.get::<Marker>(7), None);
        assert_eq!(table.column::<A>().unwrap().len(), 10);

        table.get_mut::<A>(3).unwrap().0 = 99;
        assert_eq!(table.column::<A>().unwrap()[3], A(99));
        table.assert_consistent();
    }

    #[test]
    fn test_swap_remove() {
        let registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let mut table = table_for(&registry, 0, &[a]);

        for i in 0..3 {
            table.insert_row(EntityID::new(i, 0), values(&registry, (A(i),).into_bundle()));
        }

        assert_eq!(table.remove_row(0), Some(EntityID::new(2, 0)));
        assert_eq!(table.entities(), &[EntityID::new(2, 0), EntityID::new(1, 0)]);
        assert_eq!(table.column::<A>().unwrap(), &[A(2), A(1)]);

        // Removing the last row moves nothing.
        assert_eq!(table.remove_row(1), None);
        assert_eq!(table.column::<A>().unwrap(), &[A(2)]);
        table.assert_consistent();
    }

    #[test]
    fn test_zero_sized() {
        let registry = ComponentRegistry::new();
        let marker = registry.register::<Marker>();
        let mut table = table_for(&registry, 0, &[marker]);

        for i in 0..100 {
            table.insert_row(EntityID::new(i, 0), values(&registry, (Marker,).into_bundle()));
        }
        assert_eq!(table.column::<Marker>().unwrap().len(), 100);
        table.remove_row(50);
        assert_eq!(table.len(), 99);
    }

    #[test]
    fn test_move_row() {
        let registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let marker = registry.register::<Marker>();

        let mut from = table_for(&registry, 0, &[a, marker]);
        let mut to = table_for(&registry, 1, &[a, b]);

        from.insert_row(EntityID::new(0, 0), values(&registry, (A(1), Marker).into_bundle()));
        from.insert_row(EntityID::new(1, 0), values(&registry, (A(2), Marker).into_bundle()));

        let extra = values(&registry, (B(5),).into_bundle());
        let (row, moved) = from.move_row(0, &mut to, extra);

        assert_eq!(row, 0);
        assert_eq!(moved, Some(EntityID::new(1, 0)));
        assert_eq!(to.get::<A>(0), Some(&A(1)));
        assert_eq!(to.get::<B>(0), Some(&B(5)));
        assert_eq!(from.get::<A>(0), Some(&A(2)));
        from.assert_consistent();
        to.assert_consistent();
    }

    #[test]
    fn test_release_on_remove_and_drop() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);

        struct Handle(u32);
        fn release(_: &mut Handle) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
        component!(Handle, teardown = release);

        let registry = ComponentRegistry::new();
        let handle = registry.register::<Handle>();
        let mut table = table_for(&registry, 0, &[handle]);

        for i in 0..4 {
            table.insert_row(EntityID::new(i, 0), values(&registry, (Handle(i),).into_bundle()));
        }

        table.remove_row(1);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
        assert_eq!(table.get::<Handle>(1).map(|h| h.0), Some(3));

        drop(table);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 4);
    }
}
