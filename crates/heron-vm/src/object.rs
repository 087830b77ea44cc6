//! Objects and their internal methods
//!
//! Named properties live in `storage` at the offset their shape assigns.
//! Array indices live in a separate [`IndexedStorage`], which is what the
//! by-value fast paths read directly.

use crate::error::VmResult;
use crate::executable::FunctionData;
use crate::generator::GeneratorObject;
use crate::iterator::{ArrayIterator, IteratorRecord, PropertyNameIterator, StringIterator};
use crate::heap::{
    EnvironmentRef, Heap, ObjectRef, PrivateEnvironmentRef, ShapeRef, ValidityRef,
};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::{JsString, PropertyKey};
use crate::typed_array::{ArrayBufferData, TypedArrayData};
use crate::value::{Accessor, Value};
use heron_bytecode::Builtin;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Largest hole a dense array may grow across before going sparse
const SPARSE_GAP: usize = 1024;

/// Arguments and receiver of a native call
#[derive(Debug, Clone)]
pub struct NativeCall {
    /// `this`
    pub this: Value,
    /// Arguments as passed
    pub arguments: SmallVec<[Value; 4]>,
    /// `new.target` when invoked as a constructor
    pub new_target: Option<ObjectRef>,
}

impl NativeCall {
    /// Argument `index`, or `undefined`
    pub fn arg(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }
}

/// Host function
pub type NativeFn = Arc<dyn Fn(&mut VmRuntime, &NativeCall) -> VmResult<Value> + Send + Sync>;

/// Function implemented by the host
#[derive(Clone)]
pub struct NativeFunction {
    /// `name`
    pub name: JsString,
    /// Implementation
    pub function: NativeFn,
    /// The recognized builtin this function implements, if any
    pub builtin: Option<Builtin>,
    /// Whether `new` is allowed
    pub is_constructor: bool,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("builtin", &self.builtin)
            .finish()
    }
}

/// Closure over compiled bytecode
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    /// Compiled body and flags
    pub data: Arc<FunctionData>,
    /// Environment captured at creation
    pub environment: Option<EnvironmentRef>,
    /// Private environment captured at creation
    pub private_environment: Option<PrivateEnvironmentRef>,
    /// Module record of the defining module
    pub module_environment: Option<EnvironmentRef>,
    /// Home object for `super` lookups
    pub home_object: Option<Value>,
    /// `this` captured by arrow functions
    pub this_value: Option<Value>,
}

/// Exotic behavior and internal slots of an object
#[derive(Debug, Default)]
pub enum ObjectKind {
    /// Plain object
    #[default]
    Ordinary,
    /// Array exotic object
    Array,
    /// Error instance
    Error,
    /// Arguments object
    Arguments,
    /// Bytecode function
    Function(ScriptFunction),
    /// Host function
    NativeFunction(NativeFunction),
    /// Generator instance
    Generator(Box<GeneratorObject>),
    /// ArrayBuffer
    ArrayBuffer(ArrayBufferData),
    /// Typed array view
    TypedArray(TypedArrayData),
    /// Boolean, Number, String, Symbol or BigInt object from ToObject
    PrimitiveWrapper(Value),
    /// Iterator record produced by `GetIterator`; never exposed to guest code
    IteratorRecord(IteratorRecord),
    /// `%ArrayIterator%` instance
    ArrayIterator(ArrayIterator),
    /// `%StringIterator%` instance
    StringIterator(StringIterator),
    /// Key iterator behind `for-in`
    PropertyNameIterator(Box<PropertyNameIterator>),
    /// Regular expression literal
    RegExp {
        /// Source
        pattern: JsString,
        /// Flags
        flags: JsString,
    },
}

/// Element storage for array-index keys
#[derive(Debug, Clone)]
pub enum IndexedStorage {
    /// Dense vector; holes are [`Value::Empty`]
    Simple(Vec<Value>),
    /// Sparse map plus explicit length
    Generic {
        /// Present elements
        elements: BTreeMap<u32, Value>,
        /// `length` (one past the highest index for arrays)
        length: u32,
    },
}

impl Default for IndexedStorage {
    fn default() -> Self {
        IndexedStorage::Simple(Vec::new())
    }
}

impl IndexedStorage {
    /// Element at `index`, if present
    pub fn get(&self, index: u32) -> Option<&Value> {
        match self {
            IndexedStorage::Simple(values) => {
                values.get(index as usize).filter(|v| !v.is_empty())
            }
            IndexedStorage::Generic { elements, .. } => elements.get(&index),
        }
    }

    /// Store `value` at `index`, growing the length if needed
    pub fn set(&mut self, index: u32, value: Value) {
        match self {
            IndexedStorage::Simple(values) => {
                let i = index as usize;
                if i < values.len() {
                    values[i] = value;
                    return;
                }
                if i - values.len() <= SPARSE_GAP {
                    values.resize(i, Value::Empty);
                    values.push(value);
                    return;
                }
                self.make_sparse();
                self.set(index, value);
            }
            IndexedStorage::Generic { elements, length } => {
                elements.insert(index, value);
                if index >= *length {
                    *length = index + 1;
                }
            }
        }
    }

    /// Remove the element at `index`, leaving a hole
    pub fn remove(&mut self, index: u32) {
        match self {
            IndexedStorage::Simple(values) => {
                if let Some(slot) = values.get_mut(index as usize) {
                    *slot = Value::Empty;
                }
            }
            IndexedStorage::Generic { elements, .. } => {
                elements.remove(&index);
            }
        }
    }

    /// One past the highest index
    pub fn length(&self) -> u32 {
        match self {
            IndexedStorage::Simple(values) => values.len() as u32,
            IndexedStorage::Generic { length, .. } => *length,
        }
    }

    /// Truncate or extend to `new_length`
    pub fn set_length(&mut self, new_length: u32) {
        match self {
            IndexedStorage::Simple(values) => {
                let n = new_length as usize;
                if n <= values.len() {
                    values.truncate(n);
                } else if n - values.len() <= SPARSE_GAP {
                    values.resize(n, Value::Empty);
                } else {
                    self.make_sparse();
                    self.set_length(new_length);
                }
            }
            IndexedStorage::Generic { elements, length } => {
                elements.retain(|i, _| *i < new_length);
                *length = new_length;
            }
        }
    }

    /// Present indices in ascending order
    pub fn indices(&self) -> Vec<u32> {
        match self {
            IndexedStorage::Simple(values) => values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_empty())
                .map(|(i, _)| i as u32)
                .collect(),
            IndexedStorage::Generic { elements, .. } => elements.keys().copied().collect(),
        }
    }

    fn make_sparse(&mut self) {
        if let IndexedStorage::Simple(values) = self {
            let length = values.len() as u32;
            let elements = std::mem::take(values)
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_empty())
                .map(|(i, v)| (i as u32, v))
                .collect();
            *self = IndexedStorage::Generic { elements, length };
        }
    }
}

/// A guest object
#[derive(Debug)]
pub struct JsObject {
    pub(crate) shape: ShapeRef,
    pub(crate) storage: Vec<Value>,
    pub(crate) indexed: IndexedStorage,
    pub(crate) kind: ObjectKind,
    pub(crate) extensible: bool,
    /// Set once any object uses this one as its prototype
    pub(crate) is_prototype: bool,
    pub(crate) prototype_chain_validity: Option<ValidityRef>,
    /// Private fields and accessors, keyed by private name id
    pub(crate) private_elements: Vec<PrivateElement>,
}

/// A private field or accessor stored on an object
#[derive(Debug, Clone)]
pub(crate) struct PrivateElement {
    pub id: u64,
    /// Field value, or [`Value::Accessor`] for a private accessor
    pub value: Value,
}

impl JsObject {
    /// The object's shape
    pub fn shape(&self) -> ShapeRef {
        self.shape
    }

    /// Exotic kind
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Element storage
    pub fn indexed(&self) -> &IndexedStorage {
        &self.indexed
    }

    /// True for array exotic objects
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array)
    }

    /// True if `[[Call]]` is present
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function(_) | ObjectKind::NativeFunction(_)
        )
    }
}

/// A property found on an object itself
#[derive(Debug, Clone)]
pub(crate) struct OwnProperty {
    pub value: Value,
    pub attributes: PropertyAttributes,
    /// Storage offset for shape-resident properties
    pub offset: Option<u32>,
}

/// How a property lookup can be replayed by an inline cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheablePropertyMetadata {
    /// The lookup went through exotic or indexed storage
    #[default]
    NotCacheable,
    /// Found on the object itself
    OwnProperty {
        /// Storage offset
        offset: u32,
    },
    /// Found on an object up the prototype chain
    InPrototypeChain {
        /// Storage offset in the holder
        offset: u32,
        /// The holder
        prototype: ObjectRef,
        /// Validity token of the holder, taken before any accessor ran
        validity: ValidityRef,
    },
}

impl Heap {
    /// Allocate an object with the given prototype
    pub fn alloc_object(&mut self, prototype: Option<ObjectRef>, kind: ObjectKind) -> ObjectRef {
        let shape = self.root_shape(prototype);
        if let Some(proto) = prototype {
            self.get_mut(proto).is_prototype = true;
        }
        self.allocate(JsObject {
            shape,
            storage: Vec::new(),
            indexed: IndexedStorage::default(),
            kind,
            extensible: true,
            is_prototype: false,
            prototype_chain_validity: None,
            private_elements: Vec::new(),
        })
    }

    /// The object's current shape
    #[inline]
    pub fn object_shape(&self, object: ObjectRef) -> ShapeRef {
        self.get(object).shape
    }

    /// `[[GetPrototypeOf]]` (never observable, so no guest calls)
    #[inline]
    pub fn prototype_of(&self, object: ObjectRef) -> Option<ObjectRef> {
        self.get(self.get(object).shape).prototype()
    }

    /// Read a shape-resident property slot
    #[inline]
    pub fn get_direct(&self, object: ObjectRef, offset: u32) -> Value {
        self.get(object).storage[offset as usize].clone()
    }

    /// Overwrite a shape-resident property slot
    #[inline]
    pub fn put_direct(&mut self, object: ObjectRef, offset: u32, value: Value) {
        self.get_mut(object).storage[offset as usize] = value;
    }

    /// Metadata for a property found on `holder` at `offset`
    ///
    /// The validity token must be taken here, while the holder still has the
    /// shape the offset was read from.
    pub(crate) fn cacheable_metadata(
        &mut self,
        own: bool,
        holder: ObjectRef,
        offset: u32,
    ) -> CacheablePropertyMetadata {
        if own {
            return CacheablePropertyMetadata::OwnProperty { offset };
        }
        CacheablePropertyMetadata::InPrototypeChain {
            offset,
            prototype: holder,
            validity: self.prototype_chain_validity(holder),
        }
    }

    pub(crate) fn set_object_shape(&mut self, object: ObjectRef, shape: ShapeRef) {
        if self.get(object).is_prototype {
            self.invalidate_prototype_chain(object);
        }
        self.get_mut(object).shape = shape;
    }

    /// Array length, or the element count of a typed array
    pub fn array_like_length(&self, object: ObjectRef) -> Option<u32> {
        let obj = self.get(object);
        match &obj.kind {
            ObjectKind::Array | ObjectKind::Arguments => Some(obj.indexed.length()),
            ObjectKind::TypedArray(view) => Some(view.length),
            _ => None,
        }
    }

    pub(crate) fn own_property(&self, object: ObjectRef, key: &PropertyKey) -> Option<OwnProperty> {
        let obj = self.get(object);
        if let PropertyKey::Index(index) = key {
            if let ObjectKind::TypedArray(_) = obj.kind {
                return self.typed_array_get(object, *index).map(|value| OwnProperty {
                    value,
                    attributes: PropertyAttributes {
                        writable: true,
                        enumerable: true,
                        configurable: true,
                    },
                    offset: None,
                });
            }
            return obj.indexed.get(*index).map(|value| OwnProperty {
                value: value.clone(),
                attributes: PropertyAttributes::DEFAULT,
                offset: None,
            });
        }
        if let PropertyKey::String(name) = key {
            if name.as_str() == "length" {
                let length = match &obj.kind {
                    ObjectKind::Array => Some((obj.indexed.length(), true)),
                    ObjectKind::TypedArray(view) => Some((view.length, false)),
                    _ => None,
                };
                if let Some((length, writable)) = length {
                    return Some(OwnProperty {
                        value: Value::number(f64::from(length)),
                        attributes: PropertyAttributes {
                            writable,
                            enumerable: false,
                            configurable: false,
                        },
                        offset: None,
                    });
                }
            }
        }
        let metadata = self.get(obj.shape).lookup(key)?;
        Some(OwnProperty {
            value: obj.storage[metadata.offset as usize].clone(),
            attributes: metadata.attributes,
            offset: Some(metadata.offset),
        })
    }

    /// Define or overwrite an own data property without any checks
    pub fn define_data_property_raw(
        &mut self,
        object: ObjectRef,
        key: PropertyKey,
        value: Value,
        attributes: PropertyAttributes,
    ) {
        if let PropertyKey::Index(index) = key {
            self.get_mut(object).indexed.set(index, value);
            return;
        }
        let shape = self.object_shape(object);
        match self.get(shape).lookup(&key) {
            Some(metadata) => {
                if metadata.attributes != attributes {
                    let reshaped = self.shape_with_attributes(shape, &key, attributes);
                    self.set_object_shape(object, reshaped);
                }
                self.put_direct(object, metadata.offset, value);
            }
            None => {
                let next = self.shape_with_property(shape, key, attributes);
                self.set_object_shape(object, next);
                self.get_mut(object).storage.push(value);
            }
        }
    }

    pub(crate) fn remove_property_raw(&mut self, object: ObjectRef, key: &PropertyKey) {
        if let PropertyKey::Index(index) = key {
            self.get_mut(object).indexed.remove(*index);
            return;
        }
        let shape = self.object_shape(object);
        if let Some(metadata) = self.get(shape).lookup(key) {
            let next = self.shape_without_property(shape, key);
            self.set_object_shape(object, next);
            self.get_mut(object).storage.remove(metadata.offset as usize);
        }
    }

    /// Own keys: indices ascending, then strings, then symbols, each in
    /// insertion order
    pub fn own_property_keys(&self, object: ObjectRef) -> Vec<PropertyKey> {
        let obj = self.get(object);
        let mut keys: Vec<PropertyKey> = match &obj.kind {
            ObjectKind::TypedArray(view) => (0..view.length).map(PropertyKey::Index).collect(),
            _ => obj.indexed.indices().into_iter().map(PropertyKey::Index).collect(),
        };
        if obj.is_array() {
            keys.push(PropertyKey::String(JsString::new("length")));
        }
        let shape = self.get(obj.shape);
        keys.extend(shape.keys().filter(|k| !k.is_symbol()).cloned());
        keys.extend(shape.keys().filter(|k| k.is_symbol()).cloned());
        keys
    }
}

impl VmRuntime {
    /// Create an object with `prototype`
    pub fn create_object(&mut self, prototype: Option<ObjectRef>, kind: ObjectKind) -> ObjectRef {
        self.heap.alloc_object(prototype, kind)
    }

    /// Create a plain object inheriting from `Object.prototype`
    pub fn new_object(&mut self) -> ObjectRef {
        let proto = self.realm.intrinsics.object_prototype;
        self.heap.alloc_object(Some(proto), ObjectKind::Ordinary)
    }

    /// Create an array holding `elements`
    pub fn new_array(&mut self, elements: Vec<Value>) -> ObjectRef {
        let proto = self.realm.intrinsics.array_prototype;
        let array = self.heap.alloc_object(Some(proto), ObjectKind::Array);
        self.heap.get_mut(array).indexed = IndexedStorage::Simple(elements);
        array
    }

    /// `[[GetPrototypeOf]]`
    pub fn get_prototype_of(&self, object: ObjectRef) -> Option<ObjectRef> {
        self.heap.prototype_of(object)
    }

    /// `[[SetPrototypeOf]]`
    pub fn set_prototype_of(&mut self, object: ObjectRef, prototype: Option<ObjectRef>) -> bool {
        let current = self.heap.prototype_of(object);
        if current == prototype {
            return true;
        }
        if !self.heap.get(object).extensible {
            return false;
        }
        let mut p = prototype;
        while let Some(candidate) = p {
            if candidate == object {
                return false;
            }
            p = self.heap.prototype_of(candidate);
        }
        let shape = self.heap.object_shape(object);
        let next = self.heap.shape_with_prototype(shape, prototype);
        self.heap.set_object_shape(object, next);
        if let Some(proto) = prototype {
            self.heap.get_mut(proto).is_prototype = true;
        }
        true
    }

    /// `[[PreventExtensions]]`
    pub fn prevent_extensions(&mut self, object: ObjectRef) {
        self.heap.get_mut(object).extensible = false;
    }

    /// `[[Get]]`, optionally reporting how the property was found
    pub fn internal_get(
        &mut self,
        object: ObjectRef,
        key: &PropertyKey,
        receiver: &Value,
        mut metadata: Option<&mut CacheablePropertyMetadata>,
    ) -> VmResult<Value> {
        let mut current = object;
        let mut own = true;
        loop {
            if let Some(property) = self.heap.own_property(current, key) {
                if let (Some(m), Some(offset)) = (metadata.as_deref_mut(), property.offset) {
                    *m = self.heap.cacheable_metadata(own, current, offset);
                }
                return self.resolve_slot_value(property.value, receiver);
            }
            if key.as_index().is_some()
                && matches!(self.heap.get(current).kind, ObjectKind::TypedArray(_))
            {
                return Ok(Value::Undefined);
            }
            match self.heap.prototype_of(current) {
                Some(proto) => {
                    current = proto;
                    own = false;
                }
                None => return Ok(Value::Undefined),
            }
        }
    }

    /// Unwrap a slot value, invoking the getter of an accessor
    pub(crate) fn resolve_slot_value(&mut self, value: Value, receiver: &Value) -> VmResult<Value> {
        match value {
            Value::Accessor(accessor) => match self.heap.get(accessor).getter {
                Some(getter) => self.call(&Value::Object(getter), receiver.clone(), &[]),
                None => Ok(Value::Undefined),
            },
            value => Ok(value),
        }
    }

    /// `[[Set]]`, optionally reporting how the property was found
    ///
    /// Returns `false` where strict code would throw.
    pub fn internal_set(
        &mut self,
        object: ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
        mut metadata: Option<&mut CacheablePropertyMetadata>,
    ) -> VmResult<bool> {
        if let Some(index) = key.as_index() {
            if matches!(self.heap.get(object).kind, ObjectKind::TypedArray(_))
                && receiver.as_object() == Some(object)
            {
                self.typed_array_set(object, index, &value)?;
                return Ok(true);
            }
        }
        let mut current = object;
        let mut own = true;
        loop {
            if let Some(property) = self.heap.own_property(current, key) {
                if let Value::Accessor(accessor) = property.value {
                    let Some(setter) = self.heap.get(accessor).setter else {
                        return Ok(false);
                    };
                    if let (Some(m), Some(offset)) = (metadata.as_deref_mut(), property.offset) {
                        *m = self.heap.cacheable_metadata(own, current, offset);
                    }
                    self.call(&Value::Object(setter), receiver.clone(), &[value])?;
                    return Ok(true);
                }
                if !property.attributes.writable {
                    return Ok(false);
                }
                if own && receiver.as_object() == Some(object) {
                    if let (Some(m), Some(offset)) = (metadata.as_deref_mut(), property.offset) {
                        *m = CacheablePropertyMetadata::OwnProperty { offset };
                    }
                    self.write_own_data(object, key, property.offset, value)?;
                    return Ok(true);
                }
                break;
            }
            match self.heap.prototype_of(current) {
                Some(proto) => {
                    current = proto;
                    own = false;
                }
                None => break,
            }
        }
        let Some(receiver) = receiver.as_object() else {
            return Ok(false);
        };
        if let Some(existing) = self.heap.own_property(receiver, key) {
            if matches!(existing.value, Value::Accessor(_)) || !existing.attributes.writable {
                return Ok(false);
            }
            self.write_own_data(receiver, key, existing.offset, value)?;
            return Ok(true);
        }
        self.create_data_property(receiver, key.clone(), value)
    }

    fn write_own_data(
        &mut self,
        object: ObjectRef,
        key: &PropertyKey,
        offset: Option<u32>,
        value: Value,
    ) -> VmResult<()> {
        if let Some(offset) = offset {
            self.heap.put_direct(object, offset, value);
            return Ok(());
        }
        match key {
            PropertyKey::Index(index) => {
                if matches!(self.heap.get(object).kind, ObjectKind::TypedArray(_)) {
                    return self.typed_array_set(object, *index, &value);
                }
                self.heap.get_mut(object).indexed.set(*index, value);
                Ok(())
            }
            _ if self.heap.get(object).is_array() => {
                let length = self.to_array_length(&value)?;
                self.heap.get_mut(object).indexed.set_length(length);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `CreateDataProperty`
    pub fn create_data_property(
        &mut self,
        object: ObjectRef,
        key: PropertyKey,
        value: Value,
    ) -> VmResult<bool> {
        self.define_own_property(object, key, value, PropertyAttributes::DEFAULT)
    }

    /// `[[DefineOwnProperty]]` for data properties
    pub fn define_own_property(
        &mut self,
        object: ObjectRef,
        key: PropertyKey,
        value: Value,
        attributes: PropertyAttributes,
    ) -> VmResult<bool> {
        if let Some(existing) = self.heap.own_property(object, &key) {
            if !existing.attributes.configurable {
                let compatible = !matches!(existing.value, Value::Accessor(_))
                    && existing.attributes == attributes
                    && (existing.attributes.writable || existing.value.same_value(&value));
                if !compatible {
                    return Ok(false);
                }
            }
            if existing.offset.is_none() {
                self.write_own_data(object, &key, None, value)?;
                return Ok(true);
            }
        } else if !self.heap.get(object).extensible {
            return Ok(false);
        } else if let (Some(index), ObjectKind::TypedArray(_)) =
            (key.as_index(), &self.heap.get(object).kind)
        {
            self.typed_array_set(object, index, &value)?;
            return Ok(true);
        }
        self.heap.define_data_property_raw(object, key, value, attributes);
        Ok(true)
    }

    /// Define (or complete) an accessor property
    pub fn define_accessor_property(
        &mut self,
        object: ObjectRef,
        key: PropertyKey,
        getter: Option<ObjectRef>,
        setter: Option<ObjectRef>,
        attributes: PropertyAttributes,
    ) -> bool {
        let mut accessor = Accessor { getter, setter };
        if let Some(existing) = self.heap.own_property(object, &key) {
            if !existing.attributes.configurable {
                return false;
            }
            if let Value::Accessor(previous) = existing.value {
                let previous = *self.heap.get(previous);
                accessor.getter = accessor.getter.or(previous.getter);
                accessor.setter = accessor.setter.or(previous.setter);
            }
        } else if !self.heap.get(object).extensible {
            return false;
        }
        let cell = self.heap.allocate(accessor);
        self.heap
            .define_data_property_raw(object, key, Value::Accessor(cell), attributes);
        true
    }

    /// `[[Delete]]`
    pub fn internal_delete(&mut self, object: ObjectRef, key: &PropertyKey) -> bool {
        let Some(existing) = self.heap.own_property(object, key) else {
            return true;
        };
        if !existing.attributes.configurable {
            return false;
        }
        if matches!(self.heap.get(object).kind, ObjectKind::TypedArray(_)) && key.as_index().is_some() {
            return false;
        }
        self.heap.remove_property_raw(object, key);
        true
    }

    /// `[[HasProperty]]`
    pub fn has_property(&self, object: ObjectRef, key: &PropertyKey) -> bool {
        let mut current = Some(object);
        while let Some(obj) = current {
            if self.heap.own_property(obj, key).is_some() {
                return true;
            }
            current = self.heap.prototype_of(obj);
        }
        false
    }

    /// `[[GetOwnProperty]]` reduced to presence
    pub fn has_own_property(&self, object: ObjectRef, key: &PropertyKey) -> bool {
        self.heap.own_property(object, key).is_some()
    }

    /// `Get(O, P)` for an object
    pub fn get(&mut self, object: ObjectRef, key: impl Into<PropertyKey>) -> VmResult<Value> {
        let key = key.into();
        self.internal_get(object, &key, &Value::Object(object), None)
    }

    /// `Set(O, P, V, false)`
    pub fn set(
        &mut self,
        object: ObjectRef,
        key: impl Into<PropertyKey>,
        value: Value,
    ) -> VmResult<bool> {
        let key = key.into();
        self.internal_set(object, &key, value, &Value::Object(object), None)
    }

    /// Property read on any value; primitives read through their prototype
    pub fn get_value_property(&mut self, base: &Value, key: &PropertyKey) -> VmResult<Value> {
        if let Value::String(s) = base {
            if let Some(value) = string_own_property(s, key) {
                return Ok(value);
            }
        }
        let object = self.to_object_for_access(base, key)?;
        self.internal_get(object, key, base, None)
    }
}

/// `length` and index reads on a primitive string
pub(crate) fn string_own_property(s: &JsString, key: &PropertyKey) -> Option<Value> {
    match key {
        PropertyKey::Index(index) => s.code_unit_string(*index as usize).map(Value::String),
        PropertyKey::String(name) if name.as_str() == "length" => {
            Some(Value::Int32(s.len() as i32))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_to_sparse() {
        let mut storage = IndexedStorage::default();
        storage.set(0, Value::Int32(1));
        storage.set(10_000, Value::Int32(2));
        assert!(matches!(storage, IndexedStorage::Generic { .. }));
        assert_eq!(storage.length(), 10_001);
        assert_eq!(storage.get(10_000), Some(&Value::Int32(2)));
        assert_eq!(storage.indices(), vec![0, 10_000]);
    }

    #[test]
    fn test_holes_read_as_absent() {
        let mut storage = IndexedStorage::default();
        storage.set(3, Value::Int32(1));
        assert_eq!(storage.length(), 4);
        assert!(storage.get(1).is_none());
        storage.set_length(2);
        assert!(storage.get(3).is_none());
        assert_eq!(storage.length(), 2);
    }

    #[test]
    fn test_own_and_inherited_lookup() {
        let mut vm = VmRuntime::new();
        let proto = vm.new_object();
        vm.set(proto, "inherited", Value::Int32(1)).unwrap();
        let obj = vm.create_object(Some(proto), ObjectKind::Ordinary);
        vm.set(obj, "own", Value::Int32(2)).unwrap();

        let mut metadata = CacheablePropertyMetadata::default();
        let value = vm
            .internal_get(obj, &"inherited".into(), &Value::Object(obj), Some(&mut metadata))
            .unwrap();
        assert_eq!(value, Value::Int32(1));
        match metadata {
            CacheablePropertyMetadata::InPrototypeChain {
                offset,
                prototype,
                validity,
            } => {
                assert_eq!((offset, prototype), (0, proto));
                assert!(vm.heap.get(validity).is_valid());
            }
            other => panic!("expected a prototype-chain hit, got {other:?}"),
        }

        let mut metadata = CacheablePropertyMetadata::default();
        vm.internal_get(obj, &"own".into(), &Value::Object(obj), Some(&mut metadata))
            .unwrap();
        assert_eq!(metadata, CacheablePropertyMetadata::OwnProperty { offset: 0 });
    }

    #[test]
    fn test_set_shadows_prototype_property() {
        let mut vm = VmRuntime::new();
        let proto = vm.new_object();
        vm.set(proto, "x", Value::Int32(1)).unwrap();
        let obj = vm.create_object(Some(proto), ObjectKind::Ordinary);
        assert!(vm.set(obj, "x", Value::Int32(5)).unwrap());
        assert_eq!(vm.get(proto, "x").unwrap(), Value::Int32(1));
        assert_eq!(vm.get(obj, "x").unwrap(), Value::Int32(5));
    }

    #[test]
    fn test_read_only_property_rejects_writes() {
        let mut vm = VmRuntime::new();
        let obj = vm.new_object();
        vm.define_own_property(obj, "k".into(), Value::Int32(1), PropertyAttributes::FROZEN)
            .unwrap();
        assert!(!vm.set(obj, "k", Value::Int32(2)).unwrap());
        assert!(!vm.internal_delete(obj, &"k".into()));
        assert_eq!(vm.get(obj, "k").unwrap(), Value::Int32(1));
    }

    #[test]
    fn test_array_length_truncates() {
        let mut vm = VmRuntime::new();
        let array = vm.new_array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
        vm.set(array, "length", Value::Int32(1)).unwrap();
        assert_eq!(vm.heap.array_like_length(array), Some(1));
        assert_eq!(vm.get(array, 1u32.to_string().as_str()).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_prototype_cycle_rejected() {
        let mut vm = VmRuntime::new();
        let a = vm.new_object();
        let b = vm.create_object(Some(a), ObjectKind::Ordinary);
        assert!(!vm.set_prototype_of(a, Some(b)));
    }
}
