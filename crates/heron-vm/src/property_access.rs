//! Property reads and writes with inline caching
//!
//! Named accesses (`GetById`, `GetLength`, `PutById`) consult the
//! instruction's [`PropertyLookupCache`](crate::inline_cache::PropertyLookupCache)
//! before running the full lookup. By-value accesses have no cache; they
//! take a direct path for integer indices into array and typed array
//! storage and otherwise fall back to the generic algorithm.

use crate::error::{VmError, VmResult};
use crate::executable::Executable;
use crate::heap::ObjectRef;
use crate::inline_cache::PropertyCacheEntry;
use crate::object::{CacheablePropertyMetadata, IndexedStorage, ObjectKind, string_own_property};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::PropertyKey;
use crate::value::Value;
use heron_bytecode::{IdentifierTableIndex, PropertyLookupCacheIndex, PutKind};

fn base_object_for_get(
    vm: &VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    key: &PropertyKey,
) -> VmResult<ObjectRef> {
    if let Value::Object(object) = base {
        return Ok(*object);
    }
    if base.is_nullish() {
        let base_text = vm.to_string_without_side_effects(base);
        return Err(VmError::type_error(match base_identifier {
            Some(identifier) => format!(
                "Cannot read property '{key}' of {base_text} ('{}')",
                executable.identifier(identifier)
            ),
            None => format!("Cannot read property '{key}' of {base_text}"),
        }));
    }
    vm.to_object_for_access(base, key)
}

fn base_object_for_put(
    vm: &VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    key: &PropertyKey,
) -> VmResult<ObjectRef> {
    if let Value::Object(object) = base {
        return Ok(*object);
    }
    if base.is_nullish() {
        let base_text = vm.to_string_without_side_effects(base);
        return Err(VmError::type_error(match base_identifier {
            Some(identifier) => format!(
                "Cannot set property '{key}' of {base_text} ('{}')",
                executable.identifier(identifier)
            ),
            None => format!("Cannot set property '{key}' of {base_text}"),
        }));
    }
    vm.to_object_for_access(base, key)
}

fn entry_is_valid(vm: &VmRuntime, entry: &PropertyCacheEntry) -> bool {
    match entry.prototype_chain_validity {
        Some(token) => vm.heap.contains(token) && vm.heap.get(token).is_valid(),
        None => false,
    }
}

/// Cached named read shared by `GetById`, `GetByIdWithThis` and `GetLength`
fn get_by_key_cached(
    vm: &mut VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    key: PropertyKey,
    this_value: &Value,
    cache: PropertyLookupCacheIndex,
) -> VmResult<Value> {
    if let Value::String(s) = base {
        if let Some(value) = string_own_property(s, &key) {
            return Ok(value);
        }
    }
    let object = base_object_for_get(vm, executable, base_identifier, base, &key)?;
    let shape = vm.heap.object_shape(object);

    let snapshot = executable.property_lookup_cache(cache);
    for (i, entry) in snapshot.entries.iter().enumerate() {
        if entry.shape != Some(shape) {
            continue;
        }
        let Some(offset) = entry.property_offset else {
            continue;
        };
        let value = match entry.prototype {
            None => vm.heap.get_direct(object, offset),
            Some(prototype) => {
                if !entry_is_valid(vm, entry) {
                    continue;
                }
                vm.heap.get_direct(prototype, offset)
            }
        };
        executable.update_property_lookup_cache(cache, |c| c.promote(i));
        return vm.resolve_slot_value(value, this_value);
    }

    tracing::trace!(target: "heron::inline_cache", cache = cache.0, %key, "property lookup cache miss");
    let mut metadata = CacheablePropertyMetadata::NotCacheable;
    let value = vm.internal_get(object, &key, this_value, Some(&mut metadata))?;
    let entry = if vm.heap.object_shape(object) == shape {
        match metadata {
            CacheablePropertyMetadata::OwnProperty { offset } => Some(PropertyCacheEntry::own(shape, offset)),
            CacheablePropertyMetadata::InPrototypeChain {
                offset,
                prototype,
                validity,
            } => Some(PropertyCacheEntry::in_prototype(shape, offset, prototype, validity)),
            CacheablePropertyMetadata::NotCacheable => None,
        }
    } else {
        None
    };
    executable.update_property_lookup_cache(cache, |c| {
        c.misses += 1;
        if let Some(entry) = entry {
            c.insert(entry);
        }
    });
    Ok(value)
}

/// `GetById` / `GetByIdWithThis`
pub(crate) fn get_by_id(
    vm: &mut VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    property: IdentifierTableIndex,
    this_value: &Value,
    cache: PropertyLookupCacheIndex,
) -> VmResult<Value> {
    let key = PropertyKey::string(executable.identifier(property).clone());
    get_by_key_cached(vm, executable, base_identifier, base, key, this_value, cache)
}

/// `GetLength`: arrays, typed arrays and strings answer directly
pub(crate) fn get_length(
    vm: &mut VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    cache: PropertyLookupCacheIndex,
) -> VmResult<Value> {
    match base {
        Value::String(s) => return Ok(Value::Int32(s.len() as i32)),
        Value::Object(object) if vm.heap.get(*object).is_array() => {
            let length = vm.heap.get(*object).indexed().length();
            return Ok(Value::number(f64::from(length)));
        }
        _ => {}
    }
    get_by_key_cached(vm, executable, base_identifier, base, "length".into(), base, cache)
}

/// `GetByValue`
pub(crate) fn get_by_value(
    vm: &mut VmRuntime,
    executable: &Executable,
    base_identifier: Option<IdentifierTableIndex>,
    base: &Value,
    property: &Value,
) -> VmResult<Value> {
    if let (Value::Object(object), Some(index)) = (base, property.as_int32()) {
        if index >= 0 {
            let index = index as u32;
            let obj = vm.heap.get(*object);
            if let ObjectKind::TypedArray(_) = obj.kind() {
                return Ok(vm.heap.typed_array_get(*object, index).unwrap_or_default());
            }
            if let Some(value) = obj.indexed().get(index) {
                if !matches!(value, Value::Accessor(_)) {
                    return Ok(value.clone());
                }
            }
        }
    }
    if let (Value::String(s), Some(index)) = (base, property.as_int32()) {
        if index >= 0 {
            if let Some(unit) = s.code_unit_string(index as usize) {
                return Ok(Value::String(unit));
            }
        }
    }

    let key = vm.to_property_key(property)?;
    if let Value::String(s) = base {
        if let Some(value) = string_own_property(s, &key) {
            return Ok(value);
        }
    }
    let object = base_object_for_get(vm, executable, base_identifier, base, &key)?;
    vm.internal_get(object, &key, base, None)
}

fn call_setter(vm: &mut VmRuntime, slot: &Value, receiver: &Value, value: Value, strict: bool, key: &PropertyKey) -> VmResult<()> {
    let Value::Accessor(accessor) = slot else {
        return Ok(());
    };
    match vm.heap.get(*accessor).setter {
        Some(setter) => {
            vm.call(&Value::Object(setter), receiver.clone(), &[value])?;
            Ok(())
        }
        None if strict => Err(VmError::type_error(format!(
            "Cannot set property '{key}' which has only a getter"
        ))),
        None => Ok(()),
    }
}

/// `PutById`, `PutByIdWithThis`, and the generic tail of `PutByValue`
#[allow(clippy::too_many_arguments)]
pub(crate) fn put_by_property_key(
    vm: &mut VmRuntime,
    executable: &Executable,
    strict: bool,
    base: &Value,
    this_value: &Value,
    value: Value,
    base_identifier: Option<IdentifierTableIndex>,
    key: PropertyKey,
    kind: PutKind,
    cache: Option<PropertyLookupCacheIndex>,
) -> VmResult<()> {
    let object = base_object_for_put(vm, executable, base_identifier, base, &key)?;
    match kind {
        PutKind::KeyValue => {}
        PutKind::DirectKeyValue => {
            let defined = vm.define_own_property(object, key.clone(), value, PropertyAttributes::DEFAULT)?;
            if !defined && strict {
                return Err(VmError::type_error(format!("Cannot define property '{key}'")));
            }
            return Ok(());
        }
        PutKind::Getter | PutKind::Setter => {
            let Value::Object(function) = value else {
                return Err(VmError::internal("accessor definition without a function"));
            };
            let (getter, setter, prefix) = if kind == PutKind::Getter {
                (Some(function), None, "get")
            } else {
                (None, Some(function), "set")
            };
            vm.heap.define_data_property_raw(
                function,
                "name".into(),
                Value::string(format!("{prefix} {key}")),
                PropertyAttributes::CONFIGURABLE,
            );
            if !vm.define_accessor_property(object, key.clone(), getter, setter, PropertyAttributes::DEFAULT)
                && strict
            {
                return Err(VmError::type_error(format!("Cannot redefine property '{key}'")));
            }
            return Ok(());
        }
        PutKind::ProtoSetter => {
            match value {
                Value::Object(prototype) => {
                    vm.set_prototype_of(object, Some(prototype));
                }
                Value::Null => {
                    vm.set_prototype_of(object, None);
                }
                _ => {}
            }
            return Ok(());
        }
    }

    let shape = vm.heap.object_shape(object);
    if let Some(cache) = cache {
        let snapshot = executable.property_lookup_cache(cache);
        for (i, entry) in snapshot.entries.iter().enumerate() {
            if entry.shape != Some(shape) {
                continue;
            }
            let Some(offset) = entry.property_offset else {
                continue;
            };
            match entry.prototype {
                None => {
                    if this_value.as_object() != Some(object) {
                        continue;
                    }
                    executable.update_property_lookup_cache(cache, |c| c.promote(i));
                    let slot = vm.heap.get_direct(object, offset);
                    if matches!(slot, Value::Accessor(_)) {
                        return call_setter(vm, &slot, this_value, value, strict, &key);
                    }
                    vm.heap.put_direct(object, offset, value);
                    return Ok(());
                }
                Some(prototype) => {
                    if !entry_is_valid(vm, entry) {
                        continue;
                    }
                    let slot = vm.heap.get_direct(prototype, offset);
                    if !matches!(slot, Value::Accessor(_)) {
                        continue;
                    }
                    executable.update_property_lookup_cache(cache, |c| c.promote(i));
                    return call_setter(vm, &slot, this_value, value, strict, &key);
                }
            }
        }
    }

    let mut metadata = CacheablePropertyMetadata::NotCacheable;
    let succeeded = vm.internal_set(object, &key, value, this_value, Some(&mut metadata))?;
    if !succeeded && strict {
        return Err(VmError::type_error(format!(
            "Cannot assign to read only property '{key}' of {}",
            vm.to_string_without_side_effects(base)
        )));
    }
    if let Some(cache) = cache {
        tracing::trace!(target: "heron::inline_cache", cache = cache.0, %key, "property store cache miss");
        let entry = if succeeded && vm.heap.object_shape(object) == shape {
            match metadata {
                CacheablePropertyMetadata::OwnProperty { offset } => Some(PropertyCacheEntry::own(shape, offset)),
                CacheablePropertyMetadata::InPrototypeChain {
                    offset,
                    prototype,
                    validity,
                } => Some(PropertyCacheEntry::in_prototype(shape, offset, prototype, validity)),
                CacheablePropertyMetadata::NotCacheable => None,
            }
        } else {
            None
        };
        executable.update_property_lookup_cache(cache, |c| {
            c.misses += 1;
            if let Some(entry) = entry {
                c.insert(entry);
            }
        });
    }
    Ok(())
}

/// `PutByValue`
#[allow(clippy::too_many_arguments)]
pub(crate) fn put_by_value(
    vm: &mut VmRuntime,
    executable: &Executable,
    strict: bool,
    base: &Value,
    property: &Value,
    value: Value,
    base_identifier: Option<IdentifierTableIndex>,
    kind: PutKind,
) -> VmResult<()> {
    if kind == PutKind::KeyValue {
        if let (Value::Object(object), Some(index)) = (base, property.as_int32()) {
            if index >= 0 {
                let (object, index) = (*object, index as u32);
                if let ObjectKind::TypedArray(view) = vm.heap.get(object).kind() {
                    let is_bigint = view.kind.is_bigint();
                    match &value {
                        Value::Int32(n) if vm.heap.typed_array_write_int32(object, index, *n) => return Ok(()),
                        Value::Double(n) if !is_bigint => {
                            vm.heap.typed_array_write_number(object, index, *n);
                            return Ok(());
                        }
                        _ => {}
                    }
                } else if let IndexedStorage::Simple(elements) = &mut vm.heap.get_mut(object).indexed {
                    if let Some(slot) = elements.get_mut(index as usize) {
                        if !slot.is_empty() && !matches!(slot, Value::Accessor(_)) {
                            *slot = value;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
    let key = vm.to_property_key(property)?;
    put_by_property_key(
        vm,
        executable,
        strict,
        base,
        base,
        value,
        base_identifier,
        key,
        kind,
        None,
    )
}

/// `GetByValueWithThis`: `super[property]`
pub(crate) fn get_by_value_with_this(
    vm: &mut VmRuntime,
    executable: &Executable,
    base: &Value,
    property: &Value,
    this_value: &Value,
) -> VmResult<Value> {
    let key = vm.to_property_key(property)?;
    let object = base_object_for_get(vm, executable, None, base, &key)?;
    vm.internal_get(object, &key, this_value, None)
}

/// `PutByValueWithThis`: `super[property] = value`
#[allow(clippy::too_many_arguments)]
pub(crate) fn put_by_value_with_this(
    vm: &mut VmRuntime,
    executable: &Executable,
    strict: bool,
    base: &Value,
    property: &Value,
    value: Value,
    this_value: &Value,
    kind: PutKind,
) -> VmResult<()> {
    let key = vm.to_property_key(property)?;
    put_by_property_key(vm, executable, strict, base, this_value, value, None, key, kind, None)
}

/// `DeleteById` / `DeleteByValue`
pub(crate) fn delete_by_key(vm: &mut VmRuntime, strict: bool, base: &Value, key: &PropertyKey) -> VmResult<bool> {
    let object = match base {
        Value::Object(object) => *object,
        Value::String(s) => {
            let own = string_own_property(s, key).is_some();
            if own && strict {
                return Err(VmError::type_error(format!("Cannot delete property '{key}' of string")));
            }
            return Ok(!own);
        }
        other if other.is_nullish() => {
            return Err(VmError::type_error(format!(
                "Cannot convert {} to object",
                vm.to_string_without_side_effects(other)
            )));
        }
        _ => return Ok(true),
    };
    let deleted = vm.internal_delete(object, key);
    if !deleted && strict {
        return Err(VmError::type_error(format!(
            "Cannot delete property '{key}' of {}",
            vm.to_string_without_side_effects(base)
        )));
    }
    Ok(deleted)
}
