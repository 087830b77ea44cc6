//! Environment records and identifier resolution
//!
//! Declarative records keep their bindings in a vector, so a binding found
//! through a declarative record has a stable `(hops, index)` coordinate that
//! the binding instructions cache. Resolution through an object record (a
//! `with` scope or the global object) never yields a coordinate.

use crate::error::{VmError, VmResult};
use crate::heap::{EnvironmentRef, ObjectRef, PrivateEnvironmentRef};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};

/// A binding in a declarative record
#[derive(Debug, Clone)]
pub struct Binding {
    /// Name
    pub name: JsString,
    /// Current value ([`Value::Empty`] until initialized)
    pub value: Value,
    /// `let`/`var` (true) or `const` (false)
    pub mutable: bool,
    /// False while in the temporal dead zone
    pub initialized: bool,
    /// Immutable bindings created as strict throw on assignment in any mode
    pub strict: bool,
    /// Removable by `delete`
    pub deletable: bool,
}

/// Declarative environment record
#[derive(Debug, Clone, Default)]
pub struct DeclarativeEnvironment {
    pub(crate) outer: Option<EnvironmentRef>,
    pub(crate) names: FxHashMap<JsString, u32>,
    pub(crate) bindings: Vec<Binding>,
    /// Bumped whenever the set of bindings changes
    pub(crate) serial_number: u64,
    pub(crate) permanently_screwed_by_eval: bool,
    pub(crate) is_module: bool,
}

impl DeclarativeEnvironment {
    /// Index of `name`, if bound here
    pub fn find(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    /// Binding at `index`
    pub fn binding(&self, index: u32) -> Option<&Binding> {
        self.bindings.get(index as usize)
    }

    /// Change counter used to validate global variable caches
    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    fn add(&mut self, binding: Binding) -> u32 {
        let index = self.bindings.len() as u32;
        self.names.insert(binding.name.clone(), index);
        self.bindings.push(binding);
        self.serial_number += 1;
        index
    }
}

/// Object environment record (`with` scopes)
#[derive(Debug, Clone)]
pub struct ObjectEnvironment {
    pub(crate) outer: Option<EnvironmentRef>,
    pub(crate) binding_object: ObjectRef,
    pub(crate) with_environment: bool,
    pub(crate) permanently_screwed_by_eval: bool,
}

/// Global environment record
#[derive(Debug, Clone)]
pub struct GlobalEnvironment {
    pub(crate) global_object: ObjectRef,
    /// Declarative part holding top-level `let`/`const`/`class`
    pub(crate) declarative: EnvironmentRef,
    pub(crate) var_names: FxHashSet<JsString>,
    pub(crate) permanently_screwed_by_eval: bool,
}

/// An environment record
#[derive(Debug, Clone)]
pub enum Environment {
    /// Function, block and module scopes
    Declarative(DeclarativeEnvironment),
    /// `with` scopes
    Object(ObjectEnvironment),
    /// The global scope
    Global(GlobalEnvironment),
}

impl Environment {
    /// The enclosing environment
    pub fn outer(&self) -> Option<EnvironmentRef> {
        match self {
            Environment::Declarative(env) => env.outer,
            Environment::Object(env) => env.outer,
            Environment::Global(_) => None,
        }
    }

    /// True once a sloppy direct eval may have added bindings here
    pub fn is_permanently_screwed_by_eval(&self) -> bool {
        match self {
            Environment::Declarative(env) => env.permanently_screwed_by_eval,
            Environment::Object(env) => env.permanently_screwed_by_eval,
            Environment::Global(env) => env.permanently_screwed_by_eval,
        }
    }

    fn set_permanently_screwed_by_eval(&mut self) {
        match self {
            Environment::Declarative(env) => env.permanently_screwed_by_eval = true,
            Environment::Object(env) => env.permanently_screwed_by_eval = true,
            Environment::Global(env) => env.permanently_screwed_by_eval = true,
        }
    }

    /// The declarative record, if this is one
    pub fn as_declarative(&self) -> Option<&DeclarativeEnvironment> {
        match self {
            Environment::Declarative(env) => Some(env),
            _ => None,
        }
    }

    fn as_declarative_mut(&mut self) -> Option<&mut DeclarativeEnvironment> {
        match self {
            Environment::Declarative(env) => Some(env),
            _ => None,
        }
    }
}

/// Private names of a class body
#[derive(Debug, Clone)]
pub struct PrivateEnvironment {
    /// Enclosing class body
    pub outer: Option<PrivateEnvironmentRef>,
    /// Declared names and their unique ids
    pub names: Vec<(JsString, u64)>,
}

/// Cached location of a binding: `hops` outward, then slot `index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentCoordinate {
    /// Environments to skip
    pub hops: u32,
    /// Binding index in the target declarative record
    pub index: u32,
}

/// Result of identifier resolution
#[derive(Debug, Clone)]
pub enum Reference {
    /// No environment binds the name
    Unresolvable {
        /// Name
        name: JsString,
        /// Strictness of the resolving code
        strict: bool,
    },
    /// Bound in `environment`
    Environment {
        /// Record holding the binding
        environment: EnvironmentRef,
        /// Name
        name: JsString,
        /// Strictness of the resolving code
        strict: bool,
        /// Cacheable coordinate, when resolution saw only declarative records
        coordinate: Option<EnvironmentCoordinate>,
    },
}

impl Reference {
    /// The coordinate to cache, if any
    pub fn coordinate(&self) -> Option<EnvironmentCoordinate> {
        match self {
            Reference::Environment { coordinate, .. } => *coordinate,
            Reference::Unresolvable { .. } => None,
        }
    }
}

fn not_initialized(name: &str) -> VmError {
    VmError::reference_error(format!("Binding {name} is not initialized"))
}

fn not_defined(name: &str) -> VmError {
    VmError::reference_error(format!("{name} is not defined"))
}

fn assign_to_constant(name: &str) -> VmError {
    VmError::type_error(format!("Invalid assignment to const '{name}'"))
}

impl VmRuntime {
    /// New declarative record enclosed by `outer`
    pub fn new_declarative_environment(&mut self, outer: Option<EnvironmentRef>) -> EnvironmentRef {
        self.heap.allocate(Environment::Declarative(DeclarativeEnvironment {
            outer,
            ..Default::default()
        }))
    }

    /// New module record enclosed by the global environment
    pub fn new_module_environment(&mut self) -> EnvironmentRef {
        let global = self.realm.global_environment;
        self.heap.allocate(Environment::Declarative(DeclarativeEnvironment {
            outer: Some(global),
            is_module: true,
            ..Default::default()
        }))
    }

    /// New object record over `object`
    pub fn new_object_environment(
        &mut self,
        object: ObjectRef,
        with_environment: bool,
        outer: Option<EnvironmentRef>,
    ) -> EnvironmentRef {
        self.heap.allocate(Environment::Object(ObjectEnvironment {
            outer,
            binding_object: object,
            with_environment,
            permanently_screwed_by_eval: false,
        }))
    }

    /// Mark `environment` and everything enclosing it as possibly altered
    /// by direct eval
    pub(crate) fn set_permanently_screwed_by_eval(&mut self, environment: EnvironmentRef) {
        let mut current = Some(environment);
        while let Some(env) = current {
            let record = self.heap.get_mut(env);
            if record.is_permanently_screwed_by_eval() {
                break;
            }
            record.set_permanently_screwed_by_eval();
            current = record.outer();
        }
    }

    fn declarative(&self, env: EnvironmentRef) -> &DeclarativeEnvironment {
        match self.heap.get(env).as_declarative() {
            Some(record) => record,
            None => panic!("environment {env:?} is not declarative"),
        }
    }

    fn declarative_mut(&mut self, env: EnvironmentRef) -> &mut DeclarativeEnvironment {
        match self.heap.get_mut(env).as_declarative_mut() {
            Some(record) => record,
            None => panic!("environment {env:?} is not declarative"),
        }
    }

    /// HasBinding, plus the binding index when the record is declarative
    pub fn has_binding(&self, env: EnvironmentRef, name: &JsString) -> (bool, Option<u32>) {
        match self.heap.get(env) {
            Environment::Declarative(record) => match record.find(name) {
                Some(index) => (true, Some(index)),
                None => (false, None),
            },
            Environment::Object(record) => {
                (self.has_property(record.binding_object, &PropertyKey::string(name.clone())), None)
            }
            Environment::Global(record) => {
                if self.declarative(record.declarative).find(name).is_some() {
                    return (true, None);
                }
                (self.has_property(record.global_object, &PropertyKey::string(name.clone())), None)
            }
        }
    }

    /// ResolveBinding starting at `env`
    pub fn resolve_binding(
        &self,
        name: &JsString,
        env: Option<EnvironmentRef>,
        strict: bool,
    ) -> Reference {
        let mut current = env;
        let mut hops = 0u32;
        let mut cacheable = true;
        while let Some(env) = current {
            let (found, index) = self.has_binding(env, name);
            if found {
                let coordinate = match index {
                    Some(index) if cacheable => Some(EnvironmentCoordinate { hops, index }),
                    _ => None,
                };
                return Reference::Environment {
                    environment: env,
                    name: name.clone(),
                    strict,
                    coordinate,
                };
            }
            let record = self.heap.get(env);
            if matches!(record, Environment::Object(_)) {
                cacheable = false;
            }
            current = record.outer();
            hops += 1;
        }
        Reference::Unresolvable {
            name: name.clone(),
            strict,
        }
    }

    /// Walk `hops` records outward from `env`
    pub(crate) fn environment_at(&self, env: EnvironmentRef, hops: u32) -> EnvironmentRef {
        let mut current = env;
        for _ in 0..hops {
            current = match self.heap.get(current).outer() {
                Some(outer) => outer,
                None => panic!("environment coordinate walks past the global environment"),
            };
        }
        current
    }

    /// CreateMutableBinding
    pub fn create_mutable_binding(&mut self, env: EnvironmentRef, name: JsString, deletable: bool) {
        match self.heap.get(env) {
            Environment::Declarative(record) => {
                if record.find(&name).is_some() {
                    return;
                }
                self.declarative_mut(env).add(Binding {
                    name,
                    value: Value::Empty,
                    mutable: true,
                    initialized: false,
                    strict: false,
                    deletable,
                });
            }
            Environment::Object(record) => {
                let object = record.binding_object;
                let attributes = PropertyAttributes {
                    configurable: deletable,
                    ..PropertyAttributes::DEFAULT
                };
                self.heap
                    .define_data_property_raw(object, PropertyKey::string(name), Value::Undefined, attributes);
            }
            Environment::Global(record) => {
                let declarative = record.declarative;
                self.create_mutable_binding(declarative, name, deletable);
            }
        }
    }

    /// CreateImmutableBinding
    pub fn create_immutable_binding(&mut self, env: EnvironmentRef, name: JsString, strict: bool) {
        let target = match self.heap.get(env) {
            Environment::Global(record) => record.declarative,
            _ => env,
        };
        let record = self.declarative_mut(target);
        if record.find(&name).is_some() {
            return;
        }
        record.add(Binding {
            name,
            value: Value::Empty,
            mutable: false,
            initialized: false,
            strict,
            deletable: false,
        });
    }

    /// CreateGlobalVarBinding
    pub fn create_global_var_binding(&mut self, name: JsString, deletable: bool) -> VmResult<()> {
        let global = self.realm.global_environment;
        let Environment::Global(record) = self.heap.get(global) else {
            return Err(VmError::internal("realm global environment is not global"));
        };
        let object = record.global_object;
        let key = PropertyKey::string(name.clone());
        if !self.has_own_property(object, &key) && self.heap.get(object).extensible {
            let attributes = PropertyAttributes {
                configurable: deletable,
                ..PropertyAttributes::DEFAULT
            };
            self.define_own_property(object, key, Value::Undefined, attributes)?;
        }
        if let Environment::Global(record) = self.heap.get_mut(global) {
            record.var_names.insert(name);
        }
        Ok(())
    }

    /// InitializeBinding
    pub fn initialize_binding(&mut self, env: EnvironmentRef, name: &JsString, value: Value) -> VmResult<()> {
        match self.heap.get(env) {
            Environment::Declarative(record) => match record.find(name) {
                Some(index) => {
                    self.initialize_binding_direct(env, index, value);
                    Ok(())
                }
                None => Err(VmError::internal(format!("no binding {name} to initialize"))),
            },
            Environment::Object(record) => {
                let object = record.binding_object;
                self.set(object, name.clone(), value)?;
                Ok(())
            }
            Environment::Global(record) => {
                let declarative = record.declarative;
                let object = record.global_object;
                if let Some(index) = self.declarative(declarative).find(name) {
                    self.initialize_binding_direct(declarative, index, value);
                    return Ok(());
                }
                self.set(object, name.clone(), value)?;
                Ok(())
            }
        }
    }

    /// InitializeBinding by coordinate
    pub fn initialize_binding_direct(&mut self, env: EnvironmentRef, index: u32, value: Value) {
        let record = self.declarative_mut(env);
        let binding = &mut record.bindings[index as usize];
        binding.value = value;
        binding.initialized = true;
    }

    /// GetBindingValue
    pub fn get_binding_value(&mut self, env: EnvironmentRef, name: &JsString, strict: bool) -> VmResult<Value> {
        match self.heap.get(env) {
            Environment::Declarative(record) => match record.find(name) {
                Some(index) => self.get_binding_value_direct(env, index),
                None => Err(not_defined(name)),
            },
            Environment::Object(record) => {
                let object = record.binding_object;
                let key = PropertyKey::string(name.clone());
                if !self.has_property(object, &key) {
                    return if strict { Err(not_defined(name)) } else { Ok(Value::Undefined) };
                }
                self.internal_get(object, &key, &Value::Object(object), None)
            }
            Environment::Global(record) => {
                let declarative = record.declarative;
                let object = record.global_object;
                if let Some(index) = self.declarative(declarative).find(name) {
                    return self.get_binding_value_direct(declarative, index);
                }
                let key = PropertyKey::string(name.clone());
                if !self.has_property(object, &key) {
                    return Err(not_defined(name));
                }
                self.internal_get(object, &key, &Value::Object(object), None)
            }
        }
    }

    /// GetBindingValue by coordinate
    pub fn get_binding_value_direct(&self, env: EnvironmentRef, index: u32) -> VmResult<Value> {
        let binding = &self.declarative(env).bindings[index as usize];
        if !binding.initialized {
            return Err(not_initialized(&binding.name));
        }
        Ok(binding.value.clone())
    }

    /// SetMutableBinding
    pub fn set_mutable_binding(
        &mut self,
        env: EnvironmentRef,
        name: &JsString,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        match self.heap.get(env) {
            Environment::Declarative(record) => match record.find(name) {
                Some(index) => self.set_mutable_binding_direct(env, index, value, strict),
                None if strict => Err(not_defined(name)),
                None => {
                    self.create_mutable_binding(env, name.clone(), true);
                    self.initialize_binding(env, name, value)
                }
            },
            Environment::Object(record) => {
                let object = record.binding_object;
                let key = PropertyKey::string(name.clone());
                let still_exists = self.has_property(object, &key);
                if !still_exists && strict {
                    return Err(not_defined(name));
                }
                let ok = self.internal_set(object, &key, value, &Value::Object(object), None)?;
                if !ok && strict {
                    return Err(VmError::type_error(format!(
                        "Cannot assign to read only property '{name}'"
                    )));
                }
                Ok(())
            }
            Environment::Global(record) => {
                let declarative = record.declarative;
                let object = record.global_object;
                if let Some(index) = self.declarative(declarative).find(name) {
                    return self.set_mutable_binding_direct(declarative, index, value, strict);
                }
                let key = PropertyKey::string(name.clone());
                if strict && !self.has_property(object, &key) {
                    return Err(not_defined(name));
                }
                let ok = self.internal_set(object, &key, value, &Value::Object(object), None)?;
                if !ok && strict {
                    return Err(VmError::type_error(format!(
                        "Cannot assign to read only property '{name}'"
                    )));
                }
                Ok(())
            }
        }
    }

    /// SetMutableBinding by coordinate
    pub fn set_mutable_binding_direct(
        &mut self,
        env: EnvironmentRef,
        index: u32,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        let record = self.declarative_mut(env);
        let binding = &mut record.bindings[index as usize];
        if !binding.initialized {
            return Err(not_initialized(&binding.name));
        }
        if binding.mutable {
            binding.value = value;
            return Ok(());
        }
        if binding.strict || strict {
            return Err(assign_to_constant(&binding.name));
        }
        Ok(())
    }

    /// DeleteBinding
    pub fn delete_binding(&mut self, env: EnvironmentRef, name: &JsString) -> bool {
        match self.heap.get(env) {
            Environment::Declarative(record) => {
                let Some(index) = record.find(name) else {
                    return true;
                };
                if !record.bindings[index as usize].deletable {
                    return false;
                }
                let record = self.declarative_mut(env);
                record.names.remove(name);
                // Indices of later bindings stay stable; the slot is orphaned.
                record.bindings[index as usize].initialized = false;
                record.serial_number += 1;
                true
            }
            Environment::Object(record) => {
                let object = record.binding_object;
                self.internal_delete(object, &PropertyKey::string(name.clone()))
            }
            Environment::Global(record) => {
                let declarative = record.declarative;
                let object = record.global_object;
                if self.declarative(declarative).find(name).is_some() {
                    return self.delete_binding(declarative, name);
                }
                let deleted = self.internal_delete(object, &PropertyKey::string(name.clone()));
                if deleted {
                    if let Environment::Global(record) = self.heap.get_mut(env) {
                        record.var_names.remove(name);
                    }
                }
                deleted
            }
        }
    }

    /// GetValue on a reference
    pub fn get_reference_value(&mut self, reference: &Reference) -> VmResult<Value> {
        match reference {
            Reference::Unresolvable { name, .. } => Err(not_defined(name)),
            Reference::Environment {
                environment,
                name,
                strict,
                ..
            } => self.get_binding_value(*environment, name, *strict),
        }
    }

    /// PutValue on a reference
    pub fn put_reference_value(&mut self, reference: &Reference, value: Value) -> VmResult<()> {
        match reference {
            Reference::Unresolvable { name, strict } => {
                if *strict {
                    return Err(not_defined(name));
                }
                let global = self.realm.global_object;
                self.set(global, name.clone(), value)?;
                Ok(())
            }
            Reference::Environment {
                environment,
                name,
                strict,
                ..
            } => self.set_mutable_binding(*environment, name, value, *strict),
        }
    }

    /// `this` for a call resolved through `env`: the binding object of a
    /// `with` scope, otherwise undefined
    pub(crate) fn with_base_object(&self, env: EnvironmentRef) -> Value {
        match self.heap.get(env) {
            Environment::Object(record) if record.with_environment => Value::Object(record.binding_object),
            _ => Value::Undefined,
        }
    }
}
