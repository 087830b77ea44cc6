//! Hidden classes (shapes) and prototype-chain validity tokens
//!
//! A shape records an object's property keys in insertion order, each key's
//! attributes, and the object's prototype. A property's storage offset is
//! its position in the shape. Adding a property follows a shared transition,
//! so objects built the same way end up with the same shape handle. Deleting
//! a property, reconfiguring one, or changing the prototype moves the object
//! to a fresh unique shape instead.

use crate::heap::{Heap, ObjectRef, ShapeRef, ValidityRef};
use crate::string::PropertyKey;
use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashMap};

/// Property attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// `[[Writable]]` (ignored for accessors)
    pub writable: bool,
    /// `[[Enumerable]]`
    pub enumerable: bool,
    /// `[[Configurable]]`
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Writable, enumerable, configurable
    pub const DEFAULT: Self = Self {
        writable: true,
        enumerable: true,
        configurable: true,
    };

    /// Writable and configurable but hidden from enumeration
    pub const HIDDEN: Self = Self {
        writable: true,
        enumerable: false,
        configurable: true,
    };

    /// Configurable only, as for a function's `length` and `name`
    pub const CONFIGURABLE: Self = Self {
        writable: false,
        enumerable: false,
        configurable: true,
    };

    /// Nothing allowed
    pub const FROZEN: Self = Self {
        writable: false,
        enumerable: false,
        configurable: false,
    };
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Where a property lives within a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMetadata {
    /// Storage offset
    pub offset: u32,
    /// Attributes
    pub attributes: PropertyAttributes,
}

type PropertyTable = IndexMap<PropertyKey, PropertyAttributes, FxBuildHasher>;

/// A hidden class
#[derive(Debug, Clone)]
pub struct Shape {
    properties: PropertyTable,
    prototype: Option<ObjectRef>,
    transitions: FxHashMap<(PropertyKey, PropertyAttributes), ShapeRef>,
    unique: bool,
}

impl Shape {
    fn empty(prototype: Option<ObjectRef>) -> Self {
        Self {
            properties: PropertyTable::default(),
            prototype,
            transitions: FxHashMap::default(),
            unique: false,
        }
    }

    /// Look up a property
    pub fn lookup(&self, key: &PropertyKey) -> Option<PropertyMetadata> {
        self.properties
            .get_full(key)
            .map(|(offset, _, attributes)| PropertyMetadata {
                offset: offset as u32,
                attributes: *attributes,
            })
    }

    /// The prototype objects with this shape have
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.prototype
    }

    /// Number of named properties
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.properties.keys()
    }

    /// True if this shape is not part of any transition tree
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn transition_targets(&self) -> impl Iterator<Item = ShapeRef> + '_ {
        self.transitions.values().copied()
    }

    pub(crate) fn retain_transitions(&mut self, mut keep: impl FnMut(ShapeRef) -> bool) {
        self.transitions.retain(|_, target| keep(*target));
    }

    fn unique_copy(&self) -> Self {
        Self {
            properties: self.properties.clone(),
            prototype: self.prototype,
            transitions: FxHashMap::default(),
            unique: true,
        }
    }
}

/// Token vouching that a prototype chain has not changed
///
/// Inline caches that found a property on a prototype keep the token of that
/// prototype. Any shape change of an object on the chain below (or at) the
/// holder flips the token, so the cache entry stops matching.
#[derive(Debug, Clone, Copy)]
pub struct PrototypeChainValidity {
    valid: bool,
}

impl PrototypeChainValidity {
    /// False once the chain has changed
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Heap {
    /// The empty shape for objects with the given prototype
    pub fn root_shape(&mut self, prototype: Option<ObjectRef>) -> ShapeRef {
        if let Some(shape) = self.root_shapes.get(&prototype) {
            return *shape;
        }
        let shape = self.allocate(Shape::empty(prototype));
        self.root_shapes.insert(prototype, shape);
        shape
    }

    /// Shape after adding `key` to an object of shape `from`
    pub(crate) fn shape_with_property(
        &mut self,
        from: ShapeRef,
        key: PropertyKey,
        attributes: PropertyAttributes,
    ) -> ShapeRef {
        let source = self.get(from);
        if source.unique {
            // Unique shapes have no transition tree; the result stays unique.
            let mut shape = source.clone();
            shape.properties.insert(key, attributes);
            return self.allocate(shape);
        }
        if let Some(target) = source.transitions.get(&(key.clone(), attributes)) {
            if self.contains(*target) {
                return *target;
            }
        }
        let mut shape = Shape::empty(source.prototype);
        shape.properties = source.properties.clone();
        shape.properties.insert(key.clone(), attributes);
        let target = self.allocate(shape);
        self.get_mut(from).transitions.insert((key, attributes), target);
        target
    }

    /// Unique shape without `key`
    pub(crate) fn shape_without_property(&mut self, from: ShapeRef, key: &PropertyKey) -> ShapeRef {
        let mut shape = self.get(from).unique_copy();
        shape.properties.shift_remove(key);
        self.allocate(shape)
    }

    /// Unique shape with `key` reconfigured
    pub(crate) fn shape_with_attributes(
        &mut self,
        from: ShapeRef,
        key: &PropertyKey,
        attributes: PropertyAttributes,
    ) -> ShapeRef {
        let mut shape = self.get(from).unique_copy();
        if let Some(slot) = shape.properties.get_mut(key) {
            *slot = attributes;
        }
        self.allocate(shape)
    }

    /// Shape after a prototype change
    pub(crate) fn shape_with_prototype(&mut self, from: ShapeRef, prototype: Option<ObjectRef>) -> ShapeRef {
        if self.get(from).property_count() == 0 {
            return self.root_shape(prototype);
        }
        let mut shape = self.get(from).unique_copy();
        shape.prototype = prototype;
        self.allocate(shape)
    }

    /// The validity token of a prototype object, created on first use
    pub(crate) fn prototype_chain_validity(&mut self, prototype: ObjectRef) -> ValidityRef {
        if let Some(token) = self.get(prototype).prototype_chain_validity {
            if self.get(token).valid {
                return token;
            }
        }
        let token = self.allocate(PrototypeChainValidity { valid: true });
        self.get_mut(prototype).prototype_chain_validity = Some(token);
        token
    }

    /// Invalidate tokens of `object` and every object above it
    ///
    /// Called before the shape of a prototype object changes.
    pub(crate) fn invalidate_prototype_chain(&mut self, object: ObjectRef) {
        let mut current = Some(object);
        while let Some(obj) = current {
            let cell = self.get_mut(obj);
            let token = cell.prototype_chain_validity.take();
            let shape = cell.shape;
            if let Some(token) = token {
                self.get_mut(token).valid = false;
            }
            current = self.get(shape).prototype;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_gc::GcConfig;

    #[test]
    fn test_transitions_are_shared() {
        let mut heap = Heap::new(&GcConfig::default());
        let root = heap.root_shape(None);
        let a = heap.shape_with_property(root, "x".into(), PropertyAttributes::DEFAULT);
        let b = heap.shape_with_property(root, "x".into(), PropertyAttributes::DEFAULT);
        assert_eq!(a, b);
        let c = heap.shape_with_property(root, "x".into(), PropertyAttributes::HIDDEN);
        assert_ne!(a, c);
        assert_eq!(heap.get(a).lookup(&"x".into()).map(|m| m.offset), Some(0));
    }

    #[test]
    fn test_delete_produces_unique_shape() {
        let mut heap = Heap::new(&GcConfig::default());
        let root = heap.root_shape(None);
        let a = heap.shape_with_property(root, "x".into(), PropertyAttributes::DEFAULT);
        let ab = heap.shape_with_property(a, "y".into(), PropertyAttributes::DEFAULT);
        let b = heap.shape_without_property(ab, &"x".into());
        assert!(heap.get(b).is_unique());
        assert_eq!(heap.get(b).lookup(&"y".into()).map(|m| m.offset), Some(0));
        assert!(heap.get(b).lookup(&"x".into()).is_none());
    }
}
