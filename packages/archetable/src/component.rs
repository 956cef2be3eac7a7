//! Base definitions for components.
//!
//! All entities in this library are built out of components. There is no
//! intrinsic value to an entity. This module provides means of defining and
//! managing components.
//!
//! Each component type is allocated a unique ID by a `ComponentRegistry`
//! the first time it is seen. The registry is an ordinary value: create one
//! at startup and share it (through an `Arc`) with every storage that should
//! agree on component IDs.

use std::alloc::Layout;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

/// A teardown routine, given the raw bytes of one component instance just
/// before that memory is reclaimed.
pub type Teardown = fn(&mut [u8]);

/// A component type ID which is unique for a specific component type within
/// one `ComponentRegistry`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeID(usize);

impl ComponentTypeID {
    /// Construct a new `ComponentTypeID` from the inner value.
    pub(crate) fn new(inner: usize) -> ComponentTypeID {
        ComponentTypeID(inner)
    }

    /// Return the inner unique ID.
    pub fn id(&self) -> usize {
        self.0
    }
}

impl Debug for ComponentTypeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeID(#{})", self.0)
    }
}

/// The component trait is implemented on all component types.
///
/// Components are plain structs. A component which owns something outside
/// of Rust's ownership model (a renderer handle, a slot in some external
/// pool) can name a `TEARDOWN` routine to release it. The `component!`
/// macro is the usual way to implement this trait.
pub trait Component: 'static + Sized {
    /// Routine run on the raw bytes of an instance before it is reclaimed.
    const TEARDOWN: Option<Teardown> = None;
}

/// Reinterpret the bytes handed to a teardown routine as the component.
///
/// # Safety
/// `bytes` must be the storage of a live, initialised `T`, as is the case
/// for the slice handed to a `Teardown` registered for `T`.
pub unsafe fn component_from_bytes<T: Component>(bytes: &mut [u8]) -> &mut T {
    assert_eq!(bytes.len(), std::mem::size_of::<T>());
    let ptr = bytes.as_mut_ptr() as *mut T;
    debug_assert_eq!(ptr as usize % std::mem::align_of::<T>(), 0);
    &mut *ptr
}

unsafe fn drop_raw<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T)
}

/// A ComponentRegistration is the dynamic version of a type implementing Component.
#[derive(Clone, Copy)]
pub struct ComponentRegistration {
    type_id: ComponentTypeID,
    layout: Layout,
    name: &'static str,
    rust_type: TypeId,
    teardown: Option<Teardown>,
    drop: Option<unsafe fn(*mut u8)>,
}

impl ComponentRegistration {
    /// Create a ComponentRegistration for a static type.
    pub fn new<T: Component>(type_id: ComponentTypeID) -> ComponentRegistration {
        let drop = if std::mem::needs_drop::<T>() {
            Some(drop_raw::<T> as unsafe fn(*mut u8))
        } else {
            None
        };

        ComponentRegistration {
            type_id,
            layout: Layout::new::<T>(),
            name: type_name::<T>(),
            rust_type: TypeId::of::<T>(),
            teardown: T::TEARDOWN,
            drop,
        }
    }

    /// Return the unique type ID for this `ComponentRegistration`.
    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    /// Return the memory layout of a single instance of this component.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the name of this component type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if this registration describes the Rust type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }

    /// Returns true if this type has a teardown routine.
    pub fn has_teardown(&self) -> bool {
        self.teardown.is_some()
    }

    /// Run the teardown routine on the bytes of one instance, if there is one.
    pub fn teardown(&self, bytes: &mut [u8]) {
        assert_eq!(bytes.len(), self.layout.size());
        if let Some(teardown) = self.teardown {
            teardown(bytes);
        }
    }

    /// Release an instance: run teardown, then drop glue.
    ///
    /// # Safety
    /// `ptr` must point at a live, initialised instance of this type. The
    /// instance must not be used afterwards.
    pub unsafe fn release(&self, ptr: *mut u8) {
        if self.teardown.is_some() {
            let bytes = std::slice::from_raw_parts_mut(ptr, self.layout.size());
            self.teardown(bytes);
        }
        if let Some(drop) = self.drop {
            drop(ptr);
        }
    }
}

impl PartialEq for ComponentRegistration {
    fn eq(&self, other: &ComponentRegistration) -> bool {
        self.type_id.eq(&other.type_id)
    }
}

impl Eq for ComponentRegistration {}

impl Debug for ComponentRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<ComponentRegistration #{} {}>", self.type_id.id(), self.name)
    }
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<TypeId, ComponentTypeID>,
    registrations: Vec<ComponentRegistration>,
}

/// Maps Rust component types to `ComponentTypeID`s and their metadata.
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Arc<ComponentRegistry> {
        Arc::new(ComponentRegistry {
            inner: RwLock::new(RegistryInner::default()),
        })
    }

    /// Register a component type, returning its ID.
    ///
    /// Registering the same type again returns the same ID.
    pub fn register<T: Component>(&self) -> ComponentTypeID {
        if let Some(id) = self.id_of::<T>() {
            return id;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let RegistryInner { by_type, registrations } = &mut *inner;
        *by_type.entry(TypeId::of::<T>()).or_insert_with(|| {
            let id = ComponentTypeID::new(registrations.len());
            registrations.push(ComponentRegistration::new::<T>(id));
            log::trace!("registered component {} as #{}", type_name::<T>(), id.id());
            id
        })
    }

    /// Look up the ID of a component type without registering it.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentTypeID> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Fetch the registration for a `ComponentTypeID`.
    pub fn registration(&self, id: ComponentTypeID) -> Option<ComponentRegistration> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.registrations.get(id.0).copied()
    }

    /// Return the name of a registered component type.
    pub fn name(&self, id: ComponentTypeID) -> Option<&'static str> {
        self.registration(id).map(|r| r.name())
    }

    /// Run the teardown routine of a type on one instance's bytes.
    ///
    /// Types without a teardown routine, and unknown IDs, are a no-op.
    pub fn teardown(&self, id: ComponentTypeID, bytes: &mut [u8]) {
        if let Some(registration) = self.registration(id) {
            registration.teardown(bytes);
        }
    }

    /// Return the number of registered component types.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.registrations.len()
    }

    /// Returns true if no component types are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Debug for ComponentRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_list().entries(inner.registrations.iter()).finish()
    }
}

/// Implement the `Component` trait on a type.
///
/// ```
/// # use archetable::component;
/// #[derive(Debug)]
/// struct Position(f32, f32);
/// component!(Position);
///
/// struct Sprite { handle: u32 }
/// fn release_sprite(sprite: &mut Sprite) { let _ = sprite.handle; }
/// component!(Sprite, teardown = release_sprite);
/// ```
#[macro_export]
macro_rules! component {
    ($i:ty, teardown = $f:expr) => {
        impl $crate::component::Component for $i {
            const TEARDOWN: ::core::option::Option<$crate::component::Teardown> = {
                fn teardown(bytes: &mut [u8]) {
                    let value: &mut $i = unsafe { $crate::component::component_from_bytes::<$i>(bytes) };
                    ($f)(value)
                }

                ::core::option::Option::Some(teardown)
            };
        }
    };
    ($i:ty) => {
        impl $crate::component::Component for $i {}
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_uniqueness() {
        #[derive(Debug, Clone, Copy, Default)]
        struct A;
        #[derive(Debug, Clone, Copy, Default)]
        struct B;

        component!(A);
        component!(B);

        let registry = ComponentRegistry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();

        assert_ne!(a, b);
        assert_eq!(registry.register::<A>(), a);
        assert_eq!(registry.register::<B>(), b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registration() {
        #[derive(Debug, Clone, Copy)]
        struct A(u64);
        component!(A);

        let registry = ComponentRegistry::new();
        assert_eq!(registry.id_of::<A>(), None);

        let id = registry.register::<A>();
        let registration = registry.registration(id).unwrap();
        assert_eq!(registration.type_id(), id);
        assert_eq!(registration.layout(), Layout::new::<A>());
        assert!(registration.name().ends_with("A"));
        assert!(!registration.has_teardown());
    }

    #[test]
    fn test_teardown() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);

        struct Handle(usize);
        fn release(handle: &mut Handle) {
            RELEASED.fetch_add(handle.0, Ordering::SeqCst);
        }
        component!(Handle, teardown = release);

        #[derive(Debug)]
        struct Plain(u8);
        component!(Plain);

        let registry = ComponentRegistry::new();
        let handle_id = registry.register::<Handle>();
        let plain_id = registry.register::<Plain>();

        let mut handle = Handle(5);
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(&mut handle as *mut Handle as *mut u8, std::mem::size_of::<Handle>())
        };
        registry.teardown(handle_id, bytes);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 5);

        // No teardown registered, so this does nothing.
        let mut plain = Plain(1);
        let bytes = unsafe { std::slice::from_raw_parts_mut(&mut plain as *mut Plain as *mut u8, 1) };
        registry.teardown(plain_id, bytes);
        assert_eq!(plain.0, 1);
    }

    #[test]
    fn test_release_runs_drop() {
        let registry = ComponentRegistry::new();
        struct Name(String);
        component!(Name);

        let id = registry.register::<Name>();
        let registration = registry.registration(id).unwrap();

        let mut value = std::mem::ManuallyDrop::new(Name("dragon".to_string()));
        unsafe { registration.release(&mut *value as *mut Name as *mut u8) };
    }
}
