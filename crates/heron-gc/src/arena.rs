//! Typed arena and handles

use crate::heap::{GcConfig, GcStats};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Reference to a cell in an [`Arena<T>`]
///
/// Two handles are equal iff they name the same slot in the same generation,
/// which makes handle equality a valid identity check for the cell.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation the handle was issued for
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Slot vector with a free list
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    collect_stats: bool,
    stats: GcStats,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::with_config(&GcConfig::default())
    }
}

impl<T> Arena<T> {
    /// Arena with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena with custom config
    pub fn with_config(config: &GcConfig) -> Self {
        Self {
            slots: Vec::with_capacity(config.initial_capacity),
            free: Vec::new(),
            live: 0,
            collect_stats: config.collect_stats,
            stats: GcStats::default(),
        }
    }

    /// Move `value` into the arena
    pub fn allocate(&mut self, value: T) -> Handle<T> {
        if self.collect_stats {
            self.stats.allocations += 1;
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match &*slot {
                Slot::Vacant { generation } => *generation,
                Slot::Occupied { .. } => unreachable!("free list names an occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            return Handle::new(index, generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        Handle::new(index, 0)
    }

    /// Borrow a cell, `None` when the handle is stale
    #[inline]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow a cell, `None` when the handle is stale
    #[inline]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Whether `handle` still names a live cell
    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Free a cell; later uses of `handle` (or copies of it) resolve to `None`
    pub fn free(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        let generation = match &*slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => *generation,
            _ => return None,
        };
        let vacant = Slot::Vacant {
            generation: generation.wrapping_add(1),
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            unreachable!("slot was checked to be occupied")
        };
        self.free.push(handle.index);
        self.live -= 1;
        if self.collect_stats {
            self.stats.frees += 1;
        }
        Some(value)
    }

    /// Live cell count
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no cell is live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live cells with their handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Allocation counters
    #[inline]
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub(crate) fn record_sweep(&mut self) {
        if self.collect_stats {
            self.stats.sweeps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut arena = Arena::new();
        let a = arena.allocate("a");
        let b = arena.allocate("b");
        assert_ne!(a, b);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_handle_is_rejected_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.allocate(1);
        assert_eq!(arena.free(old), Some(1));
        let new = arena.allocate(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
        assert_eq!(arena.free(old), None);
    }

    #[test]
    fn test_stats_count_allocations_and_frees() {
        let mut arena = Arena::new();
        let h = arena.allocate(());
        arena.allocate(());
        arena.free(h);
        let stats = arena.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
    }
}
