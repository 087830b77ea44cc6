//! Mark bits and sweeping

use crate::arena::{Arena, Handle};
use std::marker::PhantomData;

/// Reachability marks for the cells of one arena
pub struct MarkSet<T> {
    bits: Vec<u64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for MarkSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MarkSet<T> {
    /// No cell marked
    pub fn new() -> Self {
        Self {
            bits: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Mark a handle; returns `true` the first time
    pub fn mark(&mut self, handle: Handle<T>) -> bool {
        let index = handle.index() as usize;
        let (word, bit) = (index / 64, index % 64);
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }

    /// Whether the slot of `handle` is marked
    pub fn is_marked(&self, handle: Handle<T>) -> bool {
        let index = handle.index() as usize;
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }
}

impl<T> Arena<T> {
    /// Free every live cell whose slot is not marked; returns the count
    pub fn sweep(&mut self, marks: &MarkSet<T>) -> usize {
        let dead: Vec<Handle<T>> = self
            .iter()
            .map(|(handle, _)| handle)
            .filter(|handle| !marks.is_marked(*handle))
            .collect();
        for handle in &dead {
            self.free(*handle);
        }
        self.record_sweep();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "heron::gc",
            reclaimed = dead.len(),
            live = self.len(),
            "arena sweep"
        );

        dead.len()
    }
}
