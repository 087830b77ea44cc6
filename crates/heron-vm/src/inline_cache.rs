//! Inline caches
//!
//! Each executable owns one table per cache kind, indexed by the cache index
//! embedded in the instruction. Caches only ever short-circuit a lookup; a
//! miss always falls back to the full algorithm.
//!
//! Property lookup caches hold up to [`PROPERTY_LOOKUP_CACHE_ENTRIES`]
//! entries. Lookups scan front to back and a hit is moved to the front, so
//! the most recently used shape is always tried first. New entries are
//! inserted at the front and the oldest entry falls off the back.

use crate::environment::EnvironmentCoordinate;
use crate::heap::{ObjectRef, ShapeRef, ValidityRef};

/// Entries per property lookup cache
pub const PROPERTY_LOOKUP_CACHE_ENTRIES: usize = 4;

/// One cached `(shape -> slot)` mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyCacheEntry {
    /// Receiver shape this entry applies to; `None` marks an empty entry
    pub shape: Option<ShapeRef>,
    /// Storage offset of the property in its holder
    pub property_offset: Option<u32>,
    /// Holder when the property lives on a prototype
    pub prototype: Option<ObjectRef>,
    /// Token that must still be valid for `prototype` entries
    pub prototype_chain_validity: Option<ValidityRef>,
}

impl PropertyCacheEntry {
    /// Entry for a property found on the receiver itself
    pub fn own(shape: ShapeRef, offset: u32) -> Self {
        Self {
            shape: Some(shape),
            property_offset: Some(offset),
            prototype: None,
            prototype_chain_validity: None,
        }
    }

    /// Entry for a property found on `prototype`
    pub fn in_prototype(shape: ShapeRef, offset: u32, prototype: ObjectRef, validity: ValidityRef) -> Self {
        Self {
            shape: Some(shape),
            property_offset: Some(offset),
            prototype: Some(prototype),
            prototype_chain_validity: Some(validity),
        }
    }

    fn check_invariant(&self) {
        assert_eq!(
            self.prototype.is_some(),
            self.prototype_chain_validity.is_some(),
            "prototype cache entry without validity token"
        );
    }
}

/// Polymorphic cache for named property reads and writes
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyLookupCache {
    /// Entries, most recently used first
    pub entries: [PropertyCacheEntry; PROPERTY_LOOKUP_CACHE_ENTRIES],
    /// Lookups answered by an entry
    pub hits: u64,
    /// Lookups that fell back to the full algorithm
    pub misses: u64,
}

impl PropertyLookupCache {
    /// Record a hit on entry `index` and move it to the front
    pub fn promote(&mut self, index: usize) {
        self.hits += 1;
        if index > 0 {
            self.entries[..=index].rotate_right(1);
        }
    }

    /// Insert `entry` at the front, evicting the oldest
    pub fn insert(&mut self, entry: PropertyCacheEntry) {
        entry.check_invariant();
        self.entries.rotate_right(1);
        self.entries[0] = entry;
    }

    /// Number of filled entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.shape.is_some()).count()
    }

    /// True when no entry is filled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache for `GetGlobal`/`SetGlobal`
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalVariableCache {
    /// Global object shape and slot, for names living on the global object
    pub entry: PropertyCacheEntry,
    /// Serial number of the global declarative record the entry was filled
    /// against
    pub environment_serial_number: u64,
    /// Binding index for names living in a declarative record
    pub environment_binding_index: Option<u32>,
    /// Whether the binding index refers to the module record
    pub in_module_environment: bool,
    /// Lookups answered by the cache
    pub hits: u64,
    /// Lookups that fell back to the full algorithm
    pub misses: u64,
}

/// Cache for binding instructions
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentCoordinateCache {
    /// Cached coordinate, `None` when invalid
    pub coordinate: Option<EnvironmentCoordinate>,
    /// Lookups answered by the cache
    pub hits: u64,
    /// Lookups that fell back to resolution
    pub misses: u64,
}

impl EnvironmentCoordinateCache {
    /// Mark the coordinate unusable
    pub fn invalidate(&mut self) {
        self.coordinate = None;
    }
}
