//! Containers for component data.
//!
//! Usually used for building entities and for queueing component values in
//! a `CommandBuffer` before they land in storage.

use std::alloc::{self, Layout};
use std::any::{type_name, TypeId};
use std::fmt::{self, Debug};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::component::{Component, ComponentRegistration, ComponentRegistry, ComponentTypeID};

/// A borrowed view of one component value in storage.
#[derive(Clone, Copy)]
pub struct ComponentValueRef<'a> {
    registration: ComponentRegistration,
    slice: &'a [u8],
}

impl<'a> ComponentValueRef<'a> {
    /// Create a `ComponentValueRef` from a raw byte array.
    ///
    /// # Safety
    /// `data` must hold an initialised value of the registered type, aligned
    /// for that type.
    pub unsafe fn from_raw(registration: ComponentRegistration, data: &'a [u8]) -> ComponentValueRef<'a> {
        ComponentValueRef {
            registration,
            slice: data,
        }
    }

    /// Get the type ID of the referenced component value.
    pub fn type_id(&self) -> ComponentTypeID {
        self.registration.type_id()
    }

    /// Get the name of the referenced component type.
    pub fn name(&self) -> &'static str {
        self.registration.name()
    }

    /// Return the raw bytes of the component.
    pub fn as_slice(&self) -> &'a [u8] {
        self.slice
    }

    /// Attempt to downcast this value ref back to a reference to the component type.
    pub fn downcast<T: Component>(&self) -> Option<&'a T> {
        if self.registration.is::<T>() {
            Some(unsafe { &*(self.slice.as_ptr() as *const T) })
        } else {
            None
        }
    }
}

impl<'a> Debug for ComponentValueRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:?}>", self.name(), self.slice)
    }
}

unsafe fn release_raw<T: Component>(ptr: *mut u8) {
    if let Some(teardown) = T::TEARDOWN {
        let bytes = std::slice::from_raw_parts_mut(ptr, std::mem::size_of::<T>());
        teardown(bytes);
    }
    std::ptr::drop_in_place(ptr as *mut T);
}

/// An owned, type-erased component value which is not yet in storage.
///
/// Dropping a `ComponentValue` releases it exactly like removing the
/// component from an entity would: teardown runs, then drop glue.
pub struct ComponentValue {
    ptr: NonNull<u8>,
    layout: Layout,
    name: &'static str,
    rust_type: TypeId,
    register: fn(&ComponentRegistry) -> ComponentTypeID,
    release: unsafe fn(*mut u8),
}

impl ComponentValue {
    /// Box up a component value.
    pub fn new<T: Component>(value: T) -> ComponentValue {
        let layout = Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            NonNull::<T>::dangling().cast::<u8>()
        } else {
            let raw = unsafe { alloc::alloc(layout) };
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(layout),
            }
        };
        unsafe { std::ptr::write(ptr.as_ptr() as *mut T, value) };

        ComponentValue {
            ptr,
            layout,
            name: type_name::<T>(),
            rust_type: TypeId::of::<T>(),
            register: ComponentRegistry::register::<T>,
            release: release_raw::<T>,
        }
    }

    /// Get the name of the contained component type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the memory layout of the contained value.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns true if the contained value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }

    /// Register the contained type with `registry`, returning its ID.
    pub fn register(&self, registry: &ComponentRegistry) -> ComponentTypeID {
        (self.register)(registry)
    }

    /// Return the raw bytes of the value.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Attempt to borrow the contained value as a `T`.
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        if self.is::<T>() {
            Some(unsafe { &*(self.ptr.as_ptr() as *const T) })
        } else {
            None
        }
    }

    /// Attempt to take the contained value back out as a `T`.
    ///
    /// No teardown runs, ownership simply passes back to the caller.
    pub fn downcast<T: Component>(self) -> Result<T, ComponentValue> {
        if !self.is::<T>() {
            return Err(self);
        }

        let value = unsafe { std::ptr::read(self.ptr.as_ptr() as *const T) };
        self.forget();
        Ok(value)
    }

    /// Move the value's bytes into `dest`, giving up ownership.
    ///
    /// # Safety
    /// `dest` must be valid for writes of `self.layout()` and aligned for the
    /// contained type.
    pub(crate) unsafe fn move_into(self, dest: *mut u8) {
        std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), dest, self.layout.size());
        self.forget();
    }

    /// Free the allocation without releasing the value.
    fn forget(self) {
        let this = ManuallyDrop::new(self);
        if this.layout.size() > 0 {
            unsafe { alloc::dealloc(this.ptr.as_ptr(), this.layout) };
        }
    }
}

impl Drop for ComponentValue {
    fn drop(&mut self) {
        unsafe {
            (self.release)(self.ptr.as_ptr());
            if self.layout.size() > 0 {
                alloc::dealloc(self.ptr.as_ptr(), self.layout);
            }
        }
    }
}

impl Debug for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ComponentValue {}>", self.name)
    }
}

/// The initial set of components for a new entity.
///
/// Holds at most one value per component type; adding a second value of the
/// same type replaces (and releases) the first.
#[derive(Debug, Default)]
pub struct Bundle {
    values: Vec<ComponentValue>,
}

impl Bundle {
    /// Create an empty `Bundle`.
    pub fn new() -> Bundle {
        Bundle::default()
    }

    /// Add a component value, builder style.
    pub fn with<T: Component>(mut self, value: T) -> Bundle {
        self.add(value);
        self
    }

    /// Add a component value.
    pub fn add<T: Component>(&mut self, value: T) {
        self.add_value(ComponentValue::new(value));
    }

    /// Add a type-erased component value.
    pub fn add_value(&mut self, value: ComponentValue) {
        match self.values.iter().position(|v| v.rust_type == value.rust_type) {
            Some(idx) => self.values[idx] = value,
            None => self.values.push(value),
        }
    }

    /// Return the number of values in this bundle.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no values in this bundle.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow a value of type `T`, if present.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.values.iter().find_map(|v| v.downcast_ref::<T>())
    }

    /// Resolve every value against `registry`, returning them sorted by type.
    pub(crate) fn resolve(self, registry: &ComponentRegistry) -> Vec<(ComponentTypeID, ComponentValue)> {
        let mut resolved: Vec<_> = self.values.into_iter()
            .map(|v| (v.register(registry), v))
            .collect();
        resolved.sort_by_key(|(ty, _)| *ty);
        resolved
    }
}

/// Conversion into a `Bundle`, implemented for tuples of components.
pub trait IntoBundle {
    /// Convert this value into a `Bundle`.
    fn into_bundle(self) -> Bundle;
}

impl IntoBundle for Bundle {
    fn into_bundle(self) -> Bundle {
        self
    }
}

impl IntoBundle for () {
    fn into_bundle(self) -> Bundle {
        Bundle::new()
    }
}

macro_rules! impl_into_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> IntoBundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_bundle(self) -> Bundle {
                let ($($name,)+) = self;
                let mut bundle = Bundle::new();
                $(bundle.add($name);)+
                bundle
            }
        }
    };
}

impl_into_bundle!(A);
impl_into_bundle!(A, B);
impl_into_bundle!(A, B, C);
impl_into_bundle!(A, B, C, D);
impl_into_bundle!(A, B, C, D, E);
impl_into_bundle!(A, B, C, D, E, F);
impl_into_bundle!(A, B, C, D, E, F, G);
impl_into_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod test {
    use super::*;
    use crate::component;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_component_value() {
        #[derive(Clone, Copy, Default, Debug, PartialEq)]
        struct A(u8);
        component!(A);

        #[derive(Clone, Copy, Default, Debug, PartialEq)]
        struct B(u8);
        component!(B);

        let value = ComponentValue::new(A(23));
        assert!(value.is::<A>());
        assert_eq!(value.as_slice(), &[23]);
        assert_eq!(value.downcast_ref::<B>(), None);

        let value = value.downcast::<B>().unwrap_err();
        assert_eq!(value.downcast::<A>().unwrap(), A(23));
    }

    #[test]
    fn test_bundle_sorted() {
        #[derive(Clone, Copy, Default, Debug, PartialEq)]
        struct A(u8);
        component!(A);

        #[derive(Clone, Copy, Default, Debug, PartialEq)]
        struct B(u8);
        component!(B);

        let registry = ComponentRegistry::new();
        let b = registry.register::<B>();
        let a = registry.register::<A>();

        let bundle = (A(51), B(24), A(52)).into_bundle();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.get::<A>(), Some(&A(52)));

        let resolved = bundle.resolve(&registry);
        assert_eq!(resolved[0].0, b);
        assert_eq!(resolved[1].0, a);
        assert_eq!(resolved[0].1.as_slice(), &[24]);
        assert_eq!(resolved[1].1.as_slice(), &[52]);
    }

    #[test]
    fn test_drop_releases() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);

        struct Handle;
        fn release(_: &mut Handle) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
        component!(Handle, teardown = release);

        drop(ComponentValue::new(Handle));
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);

        // Taking the value back out is not a release.
        let _handle: Handle = ComponentValue::new(Handle).downcast().ok().unwrap();
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);

        // A replaced bundle value is released.
        let _bundle = Bundle::new().with(Handle).with(Handle);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 2);
    }
}
