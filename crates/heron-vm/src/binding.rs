//! Binding instructions and environment management
//!
//! Each binding instruction carries an environment coordinate cache. A
//! cached `(hops, index)` pair is trusted until an environment on its path
//! is marked as possibly altered by a sloppy direct `eval`.

use crate::environment::Reference;
use crate::error::{VmError, VmResult};
use crate::heap::EnvironmentRef;
use crate::interpreter::{BindingTarget, Interpreter};
use crate::string::JsString;
use crate::value::Value;
use heron_bytecode::{EnvironmentCoordinateCacheIndex, EnvironmentMode, IdentifierTableIndex};

impl Interpreter<'_> {
    fn start_environment(&self, target: BindingTarget) -> Option<EnvironmentRef> {
        match target {
            BindingTarget::Lexical => self.ctx.lexical_environment,
            BindingTarget::Variable => self.ctx.variable_environment,
        }
    }

    /// The environment and binding index the cache points at, if still usable
    fn cached_binding(
        &mut self,
        cache: EnvironmentCoordinateCacheIndex,
        target: BindingTarget,
        name: &JsString,
    ) -> Option<(EnvironmentRef, u32)> {
        let coordinate = self.executable.environment_coordinate_cache(cache).coordinate?;
        let start = self.start_environment(target)?;
        let mut env = start;
        let mut usable = true;
        // An eval-introduced binding in any skipped record would shadow the
        // cached one, so every record on the path must be unscrewed.
        for _ in 0..coordinate.hops {
            let record = self.vm.heap.get(env);
            match record.outer() {
                Some(outer) if !record.is_permanently_screwed_by_eval() => env = outer,
                _ => {
                    usable = false;
                    break;
                }
            }
        }
        if usable {
            let record = self.vm.heap.get(env);
            usable = !record.is_permanently_screwed_by_eval()
                && record
                    .as_declarative()
                    .and_then(|d| d.binding(coordinate.index))
                    .is_some_and(|binding| binding.name == *name);
        }
        if usable {
            self.executable
                .update_environment_coordinate_cache(cache, |c| c.hits += 1);
            Some((env, coordinate.index))
        } else {
            self.executable
                .update_environment_coordinate_cache(cache, |c| c.invalidate());
            None
        }
    }

    fn resolve_and_cache(
        &mut self,
        name: &JsString,
        cache: EnvironmentCoordinateCacheIndex,
        target: BindingTarget,
        strict: bool,
    ) -> Reference {
        tracing::trace!(target: "heron::inline_cache", cache = cache.0, %name, "environment coordinate cache miss");
        let start = self.start_environment(target);
        let reference = self.vm.resolve_binding(name, start, strict);
        let coordinate = reference.coordinate();
        self.executable.update_environment_coordinate_cache(cache, |c| {
            c.coordinate = coordinate;
            c.misses += 1;
        });
        reference
    }

    pub(crate) fn get_binding(
        &mut self,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
        strict: bool,
    ) -> VmResult<Value> {
        let name = self.executable.identifier(identifier).clone();
        if let Some((env, index)) = self.cached_binding(cache, BindingTarget::Lexical, &name) {
            return self.vm.get_binding_value_direct(env, index);
        }
        let reference = self.resolve_and_cache(&name, cache, BindingTarget::Lexical, strict);
        self.vm.get_reference_value(&reference)
    }

    pub(crate) fn typeof_binding(
        &mut self,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
        strict: bool,
    ) -> VmResult<Value> {
        let name = self.executable.identifier(identifier).clone();
        let value = match self.cached_binding(cache, BindingTarget::Lexical, &name) {
            Some((env, index)) => self.vm.get_binding_value_direct(env, index)?,
            None => {
                let reference = self.resolve_and_cache(&name, cache, BindingTarget::Lexical, strict);
                if let Reference::Unresolvable { .. } = reference {
                    return Ok(Value::from("undefined"));
                }
                self.vm.get_reference_value(&reference)?
            }
        };
        Ok(Value::from(self.vm.typeof_value(&value)))
    }

    pub(crate) fn get_callee_and_this(
        &mut self,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
        strict: bool,
    ) -> VmResult<(Value, Value)> {
        let name = self.executable.identifier(identifier).clone();
        if let Some((env, index)) = self.cached_binding(cache, BindingTarget::Lexical, &name) {
            let callee = self.vm.get_binding_value_direct(env, index)?;
            return Ok((callee, Value::Undefined));
        }
        let reference = self.resolve_and_cache(&name, cache, BindingTarget::Lexical, strict);
        let callee = self.vm.get_reference_value(&reference)?;
        let this = match &reference {
            Reference::Environment { environment, .. } => self.vm.with_base_object(*environment),
            Reference::Unresolvable { .. } => Value::Undefined,
        };
        Ok((callee, this))
    }

    pub(crate) fn initialize_or_set_binding(
        &mut self,
        identifier: IdentifierTableIndex,
        value: Value,
        cache: EnvironmentCoordinateCacheIndex,
        target: BindingTarget,
        initialize: bool,
        strict: bool,
    ) -> VmResult<()> {
        let name = self.executable.identifier(identifier).clone();
        if let Some((env, index)) = self.cached_binding(cache, target, &name) {
            if initialize {
                self.vm.initialize_binding_direct(env, index, value);
                return Ok(());
            }
            return self.vm.set_mutable_binding_direct(env, index, value, strict);
        }
        let reference = self.resolve_and_cache(&name, cache, target, strict);
        if !initialize {
            return self.vm.put_reference_value(&reference, value);
        }
        match reference {
            Reference::Environment { environment, .. } => self.vm.initialize_binding(environment, &name, value),
            Reference::Unresolvable { .. } => {
                Err(VmError::internal(format!("no binding {name} to initialize")))
            }
        }
    }

    pub(crate) fn delete_variable(&mut self, identifier: IdentifierTableIndex, strict: bool) -> VmResult<bool> {
        let name = self.executable.identifier(identifier).clone();
        let reference = self.vm.resolve_binding(&name, self.ctx.lexical_environment, strict);
        match reference {
            Reference::Unresolvable { .. } => Ok(true),
            Reference::Environment { environment, .. } => Ok(self.vm.delete_binding(environment, &name)),
        }
    }

    pub(crate) fn create_variable(
        &mut self,
        identifier: IdentifierTableIndex,
        mode: EnvironmentMode,
        is_immutable: bool,
        is_global: bool,
        is_strict: bool,
    ) -> VmResult<()> {
        let name = self.executable.identifier(identifier).clone();
        let env = match mode {
            EnvironmentMode::Var if is_global => return self.vm.create_global_var_binding(name, false),
            EnvironmentMode::Var => self.ctx.variable_environment,
            EnvironmentMode::Lexical => self.ctx.lexical_environment,
        };
        let Some(env) = env else {
            return Err(VmError::internal(format!("no environment to declare {name} in")));
        };
        if is_immutable {
            self.vm.create_immutable_binding(env, name, is_strict);
        } else {
            self.vm.create_mutable_binding(env, name, false);
        }
        Ok(())
    }
}
