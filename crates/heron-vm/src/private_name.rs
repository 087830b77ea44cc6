//! Private names (`#field`)
//!
//! A class body's `AddPrivateName` mints one id per declared name; the id,
//! not the spelling, identifies the element, so two classes declaring `#x`
//! never see each other's fields. Elements live beside the object's shape in
//! a small list and are never visible to ordinary property operations.

use crate::error::{VmError, VmResult};
use crate::heap::{ObjectRef, PrivateEnvironmentRef};
use crate::interpreter::Interpreter;
use crate::object::PrivateElement;
use crate::runtime::VmRuntime;
use crate::string::JsString;
use crate::value::{Accessor, Value};
use heron_bytecode::{IdentifierTableIndex, PutKind};

/// A private name resolved against the running private environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateName {
    /// Unique id minted by `AddPrivateName`
    pub id: u64,
    /// Spelling, including the `#`
    pub description: JsString,
}

impl VmRuntime {
    /// `ResolvePrivateIdentifier`: innermost class body first
    pub fn resolve_private_identifier(
        &self,
        environment: Option<PrivateEnvironmentRef>,
        identifier: &JsString,
    ) -> Option<PrivateName> {
        let mut current = environment;
        while let Some(env) = current {
            let record = self.heap.get(env);
            if let Some((name, id)) = record.names.iter().find(|(name, _)| name == identifier) {
                return Some(PrivateName {
                    id: *id,
                    description: name.clone(),
                });
            }
            current = record.outer;
        }
        None
    }

    fn private_element(&self, object: ObjectRef, name: &PrivateName) -> Option<Value> {
        self.heap
            .get(object)
            .private_elements
            .iter()
            .find(|element| element.id == name.id)
            .map(|element| element.value.clone())
    }

    /// `PrivateElementFind(O, P) != empty`
    pub fn has_private_element(&self, object: ObjectRef, name: &PrivateName) -> bool {
        self.private_element(object, name).is_some()
    }

    /// `PrivateGet`
    pub fn private_get(&mut self, object: ObjectRef, name: &PrivateName) -> VmResult<Value> {
        let Some(value) = self.private_element(object, name) else {
            return Err(missing_element(name));
        };
        let Value::Accessor(accessor) = value else {
            return Ok(value);
        };
        match self.heap.get(accessor).getter {
            Some(getter) => self.call(&Value::Object(getter), Value::Object(object), &[]),
            None => Err(VmError::type_error(format!(
                "'{}' was defined without a getter",
                name.description
            ))),
        }
    }

    /// `PrivateSet`
    pub fn private_set(&mut self, object: ObjectRef, name: &PrivateName, value: Value) -> VmResult<()> {
        let Some(slot) = self.private_element(object, name) else {
            return Err(missing_element(name));
        };
        let Value::Accessor(accessor) = slot else {
            if let Some(element) = self
                .heap
                .get_mut(object)
                .private_elements
                .iter_mut()
                .find(|element| element.id == name.id)
            {
                element.value = value;
            }
            return Ok(());
        };
        match self.heap.get(accessor).setter {
            Some(setter) => {
                self.call(&Value::Object(setter), Value::Object(object), &[value])?;
                Ok(())
            }
            None => Err(VmError::type_error(format!(
                "'{}' was defined without a setter",
                name.description
            ))),
        }
    }

    /// `PrivateFieldAdd`
    pub fn private_field_add(&mut self, object: ObjectRef, name: &PrivateName, value: Value) -> VmResult<()> {
        if self.has_private_element(object, name) {
            return Err(VmError::type_error(format!(
                "Private field '{}' has already been declared",
                name.description
            )));
        }
        self.heap.get_mut(object).private_elements.push(PrivateElement { id: name.id, value });
        Ok(())
    }

    /// `PrivateMethodOrAccessorAdd` for one half of a `get`/`set` pair
    ///
    /// The second half of a pair completes the accessor the first one added.
    pub fn private_accessor_add(
        &mut self,
        object: ObjectRef,
        name: &PrivateName,
        getter: Option<ObjectRef>,
        setter: Option<ObjectRef>,
    ) -> VmResult<()> {
        let existing = self.private_element(object, name);
        let mut accessor = Accessor { getter, setter };
        match existing {
            None => {}
            Some(Value::Accessor(previous)) => {
                let previous = *self.heap.get(previous);
                let overlaps = (getter.is_some() && previous.getter.is_some())
                    || (setter.is_some() && previous.setter.is_some());
                if overlaps {
                    return Err(VmError::type_error(format!(
                        "Private accessor '{}' has already been declared",
                        name.description
                    )));
                }
                accessor.getter = accessor.getter.or(previous.getter);
                accessor.setter = accessor.setter.or(previous.setter);
            }
            Some(_) => {
                return Err(VmError::type_error(format!(
                    "Private field '{}' has already been declared",
                    name.description
                )));
            }
        }
        let cell = Value::Accessor(self.heap.allocate(accessor));
        let elements = &mut self.heap.get_mut(object).private_elements;
        match elements.iter_mut().find(|element| element.id == name.id) {
            Some(element) => element.value = cell,
            None => elements.push(PrivateElement { id: name.id, value: cell }),
        }
        Ok(())
    }
}

impl Interpreter<'_> {
    /// Resolve `#name` in the running context's private environment
    pub(crate) fn resolve_private_name(&self, identifier: IdentifierTableIndex) -> PrivateName {
        let identifier = self.executable.identifier(identifier);
        match self.vm.resolve_private_identifier(self.ctx.private_environment, identifier) {
            Some(name) => name,
            None => panic!("private name {identifier} is not declared in any enclosing class"),
        }
    }

    /// `PutPrivateById`: `kind` picks between assignment, field
    /// definition and accessor installation
    pub(crate) fn put_private(
        &mut self,
        object: ObjectRef,
        name: &PrivateName,
        value: Value,
        kind: PutKind,
    ) -> VmResult<()> {
        match kind {
            PutKind::KeyValue => self.vm.private_set(object, name, value),
            PutKind::DirectKeyValue => self.vm.private_field_add(object, name, value),
            PutKind::Getter | PutKind::Setter => {
                let Value::Object(function) = value else {
                    return Err(VmError::internal("private accessor definition without a function"));
                };
                if kind == PutKind::Getter {
                    self.vm.private_accessor_add(object, name, Some(function), None)
                } else {
                    self.vm.private_accessor_add(object, name, None, Some(function))
                }
            }
            PutKind::ProtoSetter => Err(VmError::internal("__proto__ store to a private name")),
        }
    }
}

fn missing_element(name: &PrivateName) -> VmError {
    VmError::type_error(format!(
        "Private field '{}' does not exist on this object",
        name.description
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::PrivateEnvironment;

    fn declare(vm: &mut VmRuntime, outer: Option<PrivateEnvironmentRef>, names: &[&str]) -> PrivateEnvironmentRef {
        let names = names
            .iter()
            .map(|name| (JsString::new(name), vm.next_private_name_id()))
            .collect();
        vm.heap.allocate(PrivateEnvironment { outer, names })
    }

    #[test]
    fn test_inner_class_shadows_outer_private_name() {
        let mut vm = VmRuntime::new();
        let outer = declare(&mut vm, None, &["#x", "#y"]);
        let inner = declare(&mut vm, Some(outer), &["#x"]);
        let outer_x = vm.resolve_private_identifier(Some(outer), &"#x".into()).unwrap();
        let inner_x = vm.resolve_private_identifier(Some(inner), &"#x".into()).unwrap();
        assert_ne!(outer_x.id, inner_x.id);
        let y = vm.resolve_private_identifier(Some(inner), &"#y".into()).unwrap();
        assert_eq!(y, vm.resolve_private_identifier(Some(outer), &"#y".into()).unwrap());
        assert!(vm.resolve_private_identifier(Some(inner), &"#z".into()).is_none());
    }

    #[test]
    fn test_fields_are_keyed_by_id_not_spelling() {
        let mut vm = VmRuntime::new();
        let first = declare(&mut vm, None, &["#x"]);
        let second = declare(&mut vm, None, &["#x"]);
        let a = vm.resolve_private_identifier(Some(first), &"#x".into()).unwrap();
        let b = vm.resolve_private_identifier(Some(second), &"#x".into()).unwrap();

        let object = vm.new_object();
        vm.private_field_add(object, &a, Value::Int32(1)).unwrap();
        assert_eq!(vm.private_get(object, &a).unwrap(), Value::Int32(1));
        assert!(!vm.has_private_element(object, &b));
        let error = vm.private_get(object, &b).unwrap_err();
        assert_eq!(
            error.to_string(),
            "TypeError: Private field '#x' does not exist on this object"
        );
        assert!(vm.private_field_add(object, &a, Value::Int32(2)).is_err());
        vm.private_set(object, &a, Value::Int32(3)).unwrap();
        assert_eq!(vm.private_get(object, &a).unwrap(), Value::Int32(3));
        assert!(vm.heap.own_property_keys(object).is_empty());
    }
}
