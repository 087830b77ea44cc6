//! `GetGlobal` / `SetGlobal`
//!
//! Global names live in one of three places: the module record of the
//! running module, the declarative part of the global environment
//! (top-level `let`/`const`/`class`), or the global object. The cache
//! remembers which, and is only trusted while the serial number of the
//! global declarative record is unchanged.

use crate::environment::Environment;
use crate::error::{VmError, VmResult};
use crate::heap::EnvironmentRef;
use crate::inline_cache::{GlobalVariableCache, PropertyCacheEntry};
use crate::interpreter::Interpreter;
use crate::object::CacheablePropertyMetadata;
use crate::runtime::VmRuntime;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use heron_bytecode::{GlobalVariableCacheIndex, IdentifierTableIndex};

impl VmRuntime {
    /// Declarative part of the global environment
    pub(crate) fn global_declarative_environment(&self) -> EnvironmentRef {
        match self.heap.get(self.realm.global_environment) {
            Environment::Global(record) => record.declarative,
            _ => panic!("realm global environment is not a global record"),
        }
    }

    fn declarative_serial_number(&self, env: EnvironmentRef) -> u64 {
        self.heap
            .get(env)
            .as_declarative()
            .map(|record| record.serial_number())
            .unwrap_or_default()
    }

    fn find_declarative(&self, env: EnvironmentRef, name: &str) -> Option<u32> {
        self.heap.get(env).as_declarative().and_then(|record| record.find(name))
    }
}

/// Where a global name was found on a cache miss
enum GlobalLocation {
    Binding { env: EnvironmentRef, index: u32 },
    Object,
    Missing,
}

impl Interpreter<'_> {
    fn cached_global_binding(&self, cache: &GlobalVariableCache) -> Option<(EnvironmentRef, u32)> {
        let index = cache.environment_binding_index?;
        let env = if cache.in_module_environment {
            self.ctx.module_environment?
        } else {
            self.vm.global_declarative_environment()
        };
        Some((env, index))
    }

    /// Look the name up from scratch and refill the cache's binding part
    fn locate_global(&mut self, name: &JsString, index: GlobalVariableCacheIndex, serial: u64) -> GlobalLocation {
        let declarative = self.vm.global_declarative_environment();
        let module = self.ctx.module_environment;
        let found = module
            .and_then(|env| self.vm.find_declarative(env, name).map(|i| (env, i, true)))
            .or_else(|| {
                self.vm
                    .find_declarative(declarative, name)
                    .map(|i| (declarative, i, false))
            });
        tracing::trace!(target: "heron::inline_cache", cache = index.0, %name, "global variable cache miss");
        self.executable.update_global_variable_cache(index, |cache| {
            *cache = GlobalVariableCache {
                environment_serial_number: serial,
                environment_binding_index: found.map(|(_, i, _)| i),
                in_module_environment: found.is_some_and(|(_, _, in_module)| in_module),
                hits: cache.hits,
                misses: cache.misses + 1,
                ..GlobalVariableCache::default()
            };
        });
        if let Some((env, index, _)) = found {
            return GlobalLocation::Binding { env, index };
        }
        let global_object = self.vm.realm.global_object;
        if self.vm.has_property(global_object, &PropertyKey::string(name.clone())) {
            GlobalLocation::Object
        } else {
            GlobalLocation::Missing
        }
    }

    fn cache_global_object_entry(
        &self,
        index: GlobalVariableCacheIndex,
        shape: crate::heap::ShapeRef,
        metadata: CacheablePropertyMetadata,
    ) {
        if let CacheablePropertyMetadata::OwnProperty { offset } = metadata {
            self.executable
                .update_global_variable_cache(index, |cache| cache.entry = PropertyCacheEntry::own(shape, offset));
        }
    }

    pub(crate) fn get_global(
        &mut self,
        identifier: IdentifierTableIndex,
        index: GlobalVariableCacheIndex,
    ) -> VmResult<Value> {
        let global_object = self.vm.realm.global_object;
        let serial = self
            .vm
            .declarative_serial_number(self.vm.global_declarative_environment());
        let cache = self.executable.global_variable_cache(index);

        if cache.environment_serial_number == serial {
            let shape = self.vm.heap.object_shape(global_object);
            if let (Some(cached_shape), Some(offset)) = (cache.entry.shape, cache.entry.property_offset) {
                if cached_shape == shape {
                    self.executable.update_global_variable_cache(index, |c| c.hits += 1);
                    let value = self.vm.heap.get_direct(global_object, offset);
                    return self.vm.resolve_slot_value(value, &Value::Object(global_object));
                }
            }
            if let Some((env, binding)) = self.cached_global_binding(&cache) {
                self.executable.update_global_variable_cache(index, |c| c.hits += 1);
                return self.vm.get_binding_value_direct(env, binding);
            }
        }

        let name = self.executable.identifier(identifier).clone();
        match self.locate_global(&name, index, serial) {
            GlobalLocation::Binding { env, index } => self.vm.get_binding_value_direct(env, index),
            GlobalLocation::Object => {
                let shape = self.vm.heap.object_shape(global_object);
                let mut metadata = CacheablePropertyMetadata::NotCacheable;
                let value = self.vm.internal_get(
                    global_object,
                    &PropertyKey::string(name),
                    &Value::Object(global_object),
                    Some(&mut metadata),
                )?;
                if self.vm.heap.object_shape(global_object) == shape {
                    self.cache_global_object_entry(index, shape, metadata);
                }
                Ok(value)
            }
            GlobalLocation::Missing => Err(VmError::reference_error(format!("{name} is not defined"))),
        }
    }

    pub(crate) fn set_global(
        &mut self,
        identifier: IdentifierTableIndex,
        value: Value,
        index: GlobalVariableCacheIndex,
        strict: bool,
    ) -> VmResult<()> {
        let global_object = self.vm.realm.global_object;
        let serial = self
            .vm
            .declarative_serial_number(self.vm.global_declarative_environment());
        let cache = self.executable.global_variable_cache(index);
        let name = self.executable.identifier(identifier).clone();

        if cache.environment_serial_number == serial {
            let shape = self.vm.heap.object_shape(global_object);
            if let (Some(cached_shape), Some(offset)) = (cache.entry.shape, cache.entry.property_offset) {
                if cached_shape == shape {
                    self.executable.update_global_variable_cache(index, |c| c.hits += 1);
                    let slot = self.vm.heap.get_direct(global_object, offset);
                    if let Value::Accessor(accessor) = slot {
                        return match self.vm.heap.get(accessor).setter {
                            Some(setter) => {
                                self.vm
                                    .call(&Value::Object(setter), Value::Object(global_object), &[value])?;
                                Ok(())
                            }
                            None if strict => Err(VmError::type_error(format!(
                                "Cannot set property '{name}' which has only a getter"
                            ))),
                            None => Ok(()),
                        };
                    }
                    self.vm.heap.put_direct(global_object, offset, value);
                    return Ok(());
                }
            }
            if let Some((env, binding)) = self.cached_global_binding(&cache) {
                self.executable.update_global_variable_cache(index, |c| c.hits += 1);
                return self.vm.set_mutable_binding_direct(env, binding, value, strict);
            }
        }

        match self.locate_global(&name, index, serial) {
            GlobalLocation::Binding { env, index } => self.vm.set_mutable_binding_direct(env, index, value, strict),
            GlobalLocation::Object => {
                let shape = self.vm.heap.object_shape(global_object);
                let mut metadata = CacheablePropertyMetadata::NotCacheable;
                let succeeded = self.vm.internal_set(
                    global_object,
                    &PropertyKey::string(name.clone()),
                    value,
                    &Value::Object(global_object),
                    Some(&mut metadata),
                )?;
                if !succeeded {
                    if strict {
                        return Err(VmError::type_error(format!(
                            "Cannot assign to read only property '{name}' of global object"
                        )));
                    }
                    return Ok(());
                }
                if self.vm.heap.object_shape(global_object) == shape {
                    self.cache_global_object_entry(index, shape, metadata);
                }
                Ok(())
            }
            GlobalLocation::Missing => {
                let global_environment = self.vm.realm.global_environment;
                let reference = self.vm.resolve_binding(&name, Some(global_environment), strict);
                self.vm.put_reference_value(&reference, value)
            }
        }
    }
}
