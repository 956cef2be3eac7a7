//! Archetypes are the 'layout' of entities, the set of attached component types.
//!
//! Every entity with the same set of component types lives in the same
//! `Table`; the `Signature` is that table's key.

use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

use bit_vec::BitVec;

use crate::component::ComponentTypeID;

/// A sorted, duplicate-free set of component types.
///
/// Alongside the sorted list a bitset indexed by `ComponentTypeID` is kept,
/// which makes membership and superset tests cheap.
#[derive(Clone, Default)]
pub struct Signature {
    types: Vec<ComponentTypeID>,
    bits: BitVec,
}

impl Signature {
    /// Create a new `Signature` from a `Vec` of component types.
    pub fn new(mut types: Vec<ComponentTypeID>) -> Signature {
        types.sort();
        types.dedup();

        let mut bits = BitVec::new();
        for ty in types.iter() {
            set_bit(&mut bits, *ty);
        }

        Signature { types, bits }
    }

    /// Create an empty `Signature`.
    pub fn empty() -> Signature {
        Signature::default()
    }

    /// Return the sorted component types in this signature.
    pub fn as_slice(&self) -> &[ComponentTypeID] {
        &self.types
    }

    /// Iterate over the component types in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentTypeID> + '_ {
        self.types.iter().copied()
    }

    /// Return the number of component types in this signature.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if this signature has no component types.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns true if this signature contains the given component.
    pub fn includes(&self, component_type: ComponentTypeID) -> bool {
        self.bits.get(component_type.id()).unwrap_or(false)
    }

    /// Returns true if this signature contains all of the given component types.
    pub fn includes_all(&self, component_types: impl IntoIterator<Item = ComponentTypeID>) -> bool {
        component_types.into_iter().all(|ct| self.includes(ct))
    }

    /// Returns true if every component type of `other` is also in this signature.
    pub fn is_superset(&self, other: &Signature) -> bool {
        let mut mine = self.bits.blocks();
        other.bits.blocks().all(|theirs| {
            let mine = mine.next().unwrap_or(0);
            theirs & !mine == 0
        })
    }

    /// Returns true if this signature shares no component types with `other`.
    pub fn is_disjoint(&self, other: &Signature) -> bool {
        self.bits.blocks()
            .zip(other.bits.blocks())
            .all(|(a, b)| a & b == 0)
    }

    /// Return the position of a component type in the sorted list.
    ///
    /// This is the column index of that component in a table with this
    /// signature.
    pub fn index_of(&self, component_type: ComponentTypeID) -> Option<usize> {
        if !self.includes(component_type) {
            return None;
        }
        self.types.binary_search(&component_type).ok()
    }

    /// Insert a component type into this set.
    pub fn insert(&mut self, component_type: ComponentTypeID) {
        if let Err(idx) = self.types.binary_search(&component_type) {
            self.types.insert(idx, component_type);
            set_bit(&mut self.bits, component_type);
        }
    }

    /// Remove a component type from this set.
    pub fn remove(&mut self, component_type: ComponentTypeID) {
        if let Ok(idx) = self.types.binary_search(&component_type) {
            self.types.remove(idx);
            self.bits.set(component_type.id(), false);
        }
    }

    /// Return a copy of this signature with one more component type.
    pub fn with(&self, component_type: ComponentTypeID) -> Signature {
        let mut signature = self.clone();
        signature.insert(component_type);
        signature
    }

    /// Return a copy of this signature with one component type removed.
    pub fn without(&self, component_type: ComponentTypeID) -> Signature {
        let mut signature = self.clone();
        signature.remove(component_type);
        signature
    }
}

fn set_bit(bits: &mut BitVec, component_type: ComponentTypeID) {
    let idx = component_type.id();
    if bits.len() <= idx {
        bits.grow(idx + 1 - bits.len(), false);
    }
    bits.set(idx, true);
}

impl PartialEq for Signature {
    fn eq(&self, other: &Signature) -> bool {
        self.types.eq(&other.types)
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.types.hash(state)
    }
}

impl PartialOrd for Signature {
    fn partial_cmp(&self, other: &Signature) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Signature {
    fn cmp(&self, other: &Signature) -> Ordering {
        self.types.cmp(&other.types)
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.types.iter().map(|t| t.id())).finish()
    }
}

impl From<Vec<ComponentTypeID>> for Signature {
    fn from(component_types: Vec<ComponentTypeID>) -> Self {
        Signature::new(component_types)
    }
}

impl FromIterator<ComponentTypeID> for Signature {
    fn from_iter<I: IntoIterator<Item = ComponentTypeID>>(iter: I) -> Self {
        Signature::new(iter.into_iter().collect())
    }
}

/// Shortcut for neatly creating signatures.
#[macro_export]
macro_rules! signature {
    ($($x:expr),* $(,)?) => {
        $crate::archetype::Signature::new(vec![$($x),*])
    };
}
