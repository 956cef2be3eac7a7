//! Generational entity IDs.
//!
//! Entities have no intrinsic value; they are just an identity which the
//! storage maps to a row of component data. An `EntityID` pairs a slot index
//! with the generation of that slot, so an ID which outlives its entity is
//! detected rather than silently aliasing whichever entity reuses the slot.

use std::fmt;

use crate::error::{Error, Result};

/// The ID of a single entity.
///
/// Entity IDs are unique per `ArchetypeStorage`. They are not unique across
/// storages.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityID {
    index: u32,
    generation: u32,
}

impl EntityID {
    /// Create an `EntityID` from its raw parts.
    pub fn new(index: u32, generation: u32) -> EntityID {
        EntityID { index, generation }
    }

    /// Return the slot index of this ID.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Return the generation of this ID.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack this ID into a single integer.
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack an ID previously produced by `to_bits`.
    pub fn from_bits(bits: u64) -> EntityID {
        EntityID {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for EntityID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    generation: u32,
    alive: bool,
    retired: bool,
}

impl Slot {
    /// Mark the slot dead. Returns false once its generations are used up,
    /// in which case it must never be handed out again.
    fn kill(&mut self) -> bool {
        self.alive = false;
        match self.generation.checked_add(1) {
            Some(generation) => self.generation = generation,
            None => self.retired = true,
        }
        !self.retired
    }
}

/// Issues and recycles `EntityID`s.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    alive: usize,
}

impl EntityAllocator {
    /// Create an empty allocator.
    pub fn new() -> EntityAllocator {
        EntityAllocator::default()
    }

    /// Allocate a fresh ID, reusing a freed slot if one is available.
    pub fn allocate(&mut self) -> EntityID {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .expect("entity slot space exhausted");
                self.slots.push(Slot { generation: 0, alive: false, retired: false });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.alive, "free list held a live slot");
        slot.alive = true;
        self.alive += 1;
        EntityID::new(index, slot.generation)
    }

    /// Returns true if `id` refers to a live entity.
    pub fn is_alive(&self, id: EntityID) -> bool {
        self.slots
            .get(id.index as usize)
            .map_or(false, |slot| slot.alive && slot.generation == id.generation)
    }

    /// Free the slot of a live entity, bumping its generation.
    ///
    /// A slot whose generation would wrap is retired instead of reused.
    pub fn free(&mut self, id: EntityID) -> Result<()> {
        if !self.is_alive(id) {
            return Err(Error::UnknownEntity(id));
        }

        let slot = &mut self.slots[id.index as usize];
        if slot.kill() {
            self.free.push(id.index);
        } else {
            log::debug!("retiring entity slot {}", id.index);
        }
        self.alive -= 1;
        Ok(())
    }

    /// Free every live entity at once.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.alive {
                slot.kill();
            }
            if !slot.retired {
                self.free.push(index as u32);
            }
        }
        self.alive = 0;
    }

    /// Return the number of live entities.
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Return the number of slots ever allocated.
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Return the number of slots waiting to be reused.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allocate_unique() {
        let mut allocator = EntityAllocator::new();
        let a = allocator.allocate();
        let b = allocator.allocate();

        assert_ne!(a, b);
        assert!(allocator.is_alive(a));
        assert!(allocator.is_alive(b));
        assert_eq!(allocator.alive_count(), 2);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let mut allocator = EntityAllocator::new();
        let a = allocator.allocate();
        allocator.free(a).unwrap();
        assert!(!allocator.is_alive(a));

        let b = allocator.allocate();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(!allocator.is_alive(a));
        assert!(allocator.is_alive(b));
    }

    #[test]
    fn test_double_free() {
        let mut allocator = EntityAllocator::new();
        let a = allocator.allocate();
        allocator.free(a).unwrap();
        assert_eq!(allocator.free(a), Err(Error::UnknownEntity(a)));
        assert_eq!(allocator.free_count(), 1);
    }

    #[test]
    fn test_generation_exhausted() {
        let mut allocator = EntityAllocator::new();
        let a = allocator.allocate();
        allocator.slots[a.index() as usize].generation = u32::MAX;
        let last = EntityID::new(a.index(), u32::MAX);
        assert!(allocator.is_alive(last));

        allocator.free(last).unwrap();
        assert!(!allocator.is_alive(last));
        assert!(!allocator.is_alive(EntityID::new(a.index(), 0)));
        assert_eq!(allocator.free_count(), 0);

        let b = allocator.allocate();
        assert_ne!(b.index(), a.index());
        assert!(!allocator.is_alive(last));

        allocator.clear();
        assert_eq!(allocator.free_count(), 1);
        assert_eq!(allocator.allocate().index(), b.index());
    }

    #[test]
    fn test_out_of_range() {
        let allocator = EntityAllocator::new();
        assert!(!allocator.is_alive(EntityID::new(7, 0)));
    }

    #[test]
    fn test_clear() {
        let mut allocator = EntityAllocator::new();
        let ids: Vec<_> = (0..4).map(|_| allocator.allocate()).collect();
        allocator.clear();

        assert_eq!(allocator.alive_count(), 0);
        assert_eq!(allocator.free_count(), 4);
        assert!(ids.iter().all(|id| !allocator.is_alive(*id)));

        // Slots come back in ascending order after a clear.
        let next = allocator.allocate();
        assert_eq!(next.index(), 0);
        assert_eq!(next.generation(), 1);
    }

    #[test]
    fn test_bits() {
        let id = EntityID::new(12, 3);
        assert_eq!(EntityID::from_bits(id.to_bits()), id);
    }
}
