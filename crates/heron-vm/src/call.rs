//! The call protocol
//!
//! Every call site validates its callee, materializes the argument list and
//! hands off to [`VmRuntime::call`] or [`VmRuntime::construct`]. Script
//! functions get a fresh [`ExecutionContext`] whose argument region is
//! padded with `undefined` up to the declared parameter count.

use crate::context::ExecutionContext;
use crate::error::{VmError, VmResult};
use crate::executable::{Executable, FunctionData};
use crate::generator::GeneratorResult;
use crate::heap::{EnvironmentRef, ObjectRef, PrivateEnvironmentRef};
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::object::{IndexedStorage, NativeCall, ObjectKind, ScriptFunction};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use heron_bytecode::{
    ArgumentsKind, Builtin, CallType, FunctionKind, Instruction, Operand, Register, StringTableIndex,
};
use smallvec::SmallVec;
use std::sync::Arc;

type Arguments = SmallVec<[Value; 8]>;

/// Caller state a direct `eval` runs with
#[derive(Debug, Clone)]
pub(crate) struct EvalCaller {
    pub lexical_environment: Option<EnvironmentRef>,
    pub variable_environment: Option<EnvironmentRef>,
    pub private_environment: Option<PrivateEnvironmentRef>,
    pub module_environment: Option<EnvironmentRef>,
    pub this_value: Value,
    pub strict: bool,
}

impl VmRuntime {
    /// Whether `value` can be called
    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Object(object) => self.heap.get(*object).is_callable(),
            _ => false,
        }
    }

    /// Whether `value` can be used with `new`
    pub fn is_constructor(&self, value: &Value) -> bool {
        let Value::Object(object) = value else {
            return false;
        };
        match self.heap.get(*object).kind() {
            ObjectKind::Function(function) => function.data.is_constructor,
            ObjectKind::NativeFunction(function) => function.is_constructor,
            _ => false,
        }
    }

    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        if self.call_depth >= self.config.max_stack_depth {
            return Err(VmError::StackOverflow);
        }
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    /// `Call(F, V, args)`
    pub fn call(&mut self, callee: &Value, this_value: Value, arguments: &[Value]) -> VmResult<Value> {
        let Value::Object(function) = callee else {
            return Err(VmError::type_error(format!(
                "{} is not a function",
                self.to_string_without_side_effects(callee)
            )));
        };
        match self.heap.get(*function).kind() {
            ObjectKind::NativeFunction(native) => {
                let implementation = Arc::clone(&native.function);
                let call = NativeCall {
                    this: this_value,
                    arguments: arguments.iter().cloned().collect(),
                    new_target: None,
                };
                self.enter_call()?;
                let result = implementation(self, &call);
                self.exit_call();
                result
            }
            ObjectKind::Function(_) => self.call_script_function(*function, this_value, arguments, None),
            _ => Err(VmError::type_error(format!(
                "{} is not a function",
                self.to_string_without_side_effects(callee)
            ))),
        }
    }

    /// `Construct(F, args, newTarget)`
    pub fn construct(
        &mut self,
        callee: &Value,
        arguments: &[Value],
        new_target: Option<ObjectRef>,
    ) -> VmResult<Value> {
        let Value::Object(function) = callee else {
            return Err(VmError::type_error(format!(
                "{} is not a constructor",
                self.to_string_without_side_effects(callee)
            )));
        };
        if !self.is_constructor(callee) {
            return Err(VmError::type_error(format!(
                "{} is not a constructor",
                self.to_string_without_side_effects(callee)
            )));
        }
        let new_target = new_target.unwrap_or(*function);
        if let ObjectKind::NativeFunction(native) = self.heap.get(*function).kind() {
            let implementation = Arc::clone(&native.function);
            let call = NativeCall {
                this: Value::Undefined,
                arguments: arguments.iter().cloned().collect(),
                new_target: Some(new_target),
            };
            self.enter_call()?;
            let result = implementation(self, &call);
            self.exit_call();
            return result;
        }

        let prototype = match self.get(new_target, "prototype")? {
            Value::Object(prototype) => prototype,
            _ => self.realm.intrinsics.object_prototype,
        };
        let this = self.create_object(Some(prototype), ObjectKind::Ordinary);
        let result = self.call_script_function(*function, Value::Object(this), arguments, Some(new_target))?;
        if result.is_object() {
            return Ok(result);
        }
        Ok(Value::Object(this))
    }

    fn call_script_function(
        &mut self,
        function: ObjectRef,
        this_value: Value,
        arguments: &[Value],
        new_target: Option<ObjectRef>,
    ) -> VmResult<Value> {
        let ObjectKind::Function(closure) = self.heap.get(function).kind() else {
            return Err(VmError::internal("call_script_function on a non-script function"));
        };
        let closure = closure.clone();
        let data = Arc::clone(&closure.data);
        tracing::trace!(
            target: "heron::call",
            function = %data.name,
            argc = arguments.len(),
            "calling script function"
        );

        let formal = data.formal_parameter_count as usize;
        let mut context = ExecutionContext::new(Arc::clone(&data.executable), arguments.len().max(formal));
        context.arguments_mut()[..arguments.len()].clone_from_slice(arguments);
        context.passed_argument_count = arguments.len();
        context.function = Some(function);
        context.new_target = new_target;
        let environment = self.new_declarative_environment(closure.environment);
        context.lexical_environment = Some(environment);
        context.variable_environment = Some(environment);
        context.private_environment = closure.private_environment;
        context.module_environment = closure.module_environment;
        context.this_value = Some(if data.is_arrow {
            closure.this_value.clone().unwrap_or_default()
        } else if data.is_strict || this_value.is_object() {
            this_value
        } else if this_value.is_nullish() {
            Value::Object(self.realm.global_object)
        } else {
            Value::Object(self.to_object(&this_value)?)
        });

        match data.kind {
            FunctionKind::Normal => self.run_context(&mut context, false),
            FunctionKind::Async => self.run_context(&mut context, true),
            FunctionKind::Generator | FunctionKind::AsyncGenerator => {
                let generator = self
                    .create_generator_object(context, data.kind == FunctionKind::AsyncGenerator);
                if let Value::Object(prototype) = self.get(function, "prototype")? {
                    self.set_prototype_of(generator, Some(prototype));
                }
                Ok(Value::Object(generator))
            }
        }
    }

    /// Run a prepared context to completion
    pub(crate) fn run_context(&mut self, context: &mut ExecutionContext, settle_awaits: bool) -> VmResult<Value> {
        self.enter_call()?;
        let mut outcome = Interpreter::new(self, context).run(0, None);
        if settle_awaits {
            outcome = self.settle_awaits(context, outcome);
        }
        self.exit_call();
        match outcome {
            ExecutionResult::Value(value) => Ok(value),
            ExecutionResult::Thrown(value) => Err(self.throw_value(value)),
            ExecutionResult::Suspended(GeneratorResult { value, .. }) => Ok(value),
        }
    }

    /// Instantiate a closure
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_script_function(
        &mut self,
        data: Arc<FunctionData>,
        name: Option<JsString>,
        environment: Option<EnvironmentRef>,
        private_environment: Option<PrivateEnvironmentRef>,
        module_environment: Option<EnvironmentRef>,
        home_object: Option<Value>,
        this_value: Option<Value>,
    ) -> ObjectRef {
        let proto = self.realm.intrinsics.function_prototype;
        let name = name.unwrap_or_else(|| data.name.clone());
        let length = data.formal_parameter_count;
        let kind = data.kind;
        let is_constructor = data.is_constructor;
        let function = self.create_object(
            Some(proto),
            ObjectKind::Function(ScriptFunction {
                data,
                environment,
                private_environment,
                module_environment,
                home_object,
                this_value,
            }),
        );
        self.heap.define_data_property_raw(
            function,
            "length".into(),
            Value::number(f64::from(length)),
            PropertyAttributes::CONFIGURABLE,
        );
        self.heap
            .define_data_property_raw(function, "name".into(), Value::String(name), PropertyAttributes::CONFIGURABLE);

        let prototype_property = PropertyAttributes {
            writable: true,
            enumerable: false,
            configurable: false,
        };
        match kind {
            FunctionKind::Generator | FunctionKind::AsyncGenerator => {
                let generator_proto = self.realm.intrinsics.generator_prototype;
                let prototype = self.create_object(Some(generator_proto), ObjectKind::Ordinary);
                self.heap
                    .define_data_property_raw(function, "prototype".into(), Value::Object(prototype), prototype_property);
            }
            _ if is_constructor => {
                let prototype = self.new_object();
                self.heap.define_data_property_raw(
                    prototype,
                    "constructor".into(),
                    Value::Object(function),
                    PropertyAttributes::HIDDEN,
                );
                self.heap
                    .define_data_property_raw(function, "prototype".into(), Value::Object(prototype), prototype_property);
            }
            _ => {}
        }
        function
    }

    /// Evaluate `argument` as eval code
    ///
    /// With a caller this is a direct eval running in the caller's
    /// environments; without one it is an indirect eval in the global scope.
    pub(crate) fn perform_eval(&mut self, argument: Value, caller: Option<EvalCaller>) -> VmResult<Value> {
        let Value::String(source) = argument else {
            return Ok(argument);
        };
        let Some(compiler) = self.eval_compiler.clone() else {
            return Err(VmError::internal("eval is not available: no eval compiler installed"));
        };
        let program = compiler(source.as_str()).map_err(VmError::syntax_error)?;
        let program_is_strict = Instruction::decode(&program.bytecode, 0).is_ok_and(|first| first.strict);
        let executable = Executable::new(program)?;
        let mut context = ExecutionContext::new(executable, 0);
        tracing::debug!(target: "heron::call", direct = caller.is_some(), "evaluating eval code");

        match caller {
            Some(caller) => {
                let strict = caller.strict || program_is_strict;
                let lexical = self.new_declarative_environment(caller.lexical_environment);
                if !strict {
                    if let Some(variable) = caller.variable_environment {
                        self.set_permanently_screwed_by_eval(variable);
                    }
                }
                context.lexical_environment = Some(lexical);
                context.variable_environment = if strict {
                    Some(lexical)
                } else {
                    caller.variable_environment
                };
                context.private_environment = caller.private_environment;
                context.module_environment = caller.module_environment;
                context.this_value = Some(caller.this_value);
            }
            None => {
                let global = self.realm.global_environment;
                let lexical = self.new_declarative_environment(Some(global));
                context.lexical_environment = Some(lexical);
                context.variable_environment = if program_is_strict { Some(lexical) } else { Some(global) };
                context.this_value = Some(Value::Object(self.realm.global_object));
            }
        }
        self.run_context(&mut context, false)
    }

    fn array_elements(&mut self, value: &Value) -> VmResult<Vec<Value>> {
        match value {
            Value::Object(object) if self.heap.get(*object).is_array() => {
                let object = *object;
                if let IndexedStorage::Simple(elements) = self.heap.get(object).indexed() {
                    if elements.iter().all(|v| !v.is_empty() && !matches!(v, Value::Accessor(_))) {
                        return Ok(elements.clone());
                    }
                }
                self.iterate_to_list(value)
            }
            _ => Err(VmError::internal("argument array is not an array")),
        }
    }
}

impl Interpreter<'_> {
    fn expression_suffix(&self, expression: Option<StringTableIndex>) -> String {
        match expression {
            Some(index) => format!(" (evaluated from '{}')", self.executable.string(index)),
            None => String::new(),
        }
    }

    fn check_callable(&self, callee: &Value, expression: Option<StringTableIndex>) -> VmResult<()> {
        if self.vm.is_callable(callee) {
            return Ok(());
        }
        Err(VmError::type_error(format!(
            "{} is not a function{}",
            self.vm.to_string_without_side_effects(callee),
            self.expression_suffix(expression)
        )))
    }

    fn check_constructor(&self, callee: &Value, expression: Option<StringTableIndex>) -> VmResult<()> {
        if self.vm.is_constructor(callee) {
            return Ok(());
        }
        Err(VmError::type_error(format!(
            "{} is not a constructor{}",
            self.vm.to_string_without_side_effects(callee),
            self.expression_suffix(expression)
        )))
    }

    fn collect_arguments(&self, operands: &[Operand]) -> Arguments {
        operands.iter().map(|operand| self.get(*operand)).collect()
    }

    fn current_this(&self) -> Value {
        match self.ctx.reg(Register::THIS_VALUE) {
            Value::Empty => self.ctx.this_value.clone().unwrap_or_default(),
            this => this.clone(),
        }
    }

    /// `[[HomeObject]]` of the running function; arrows carry their
    /// enclosing method's
    pub(crate) fn home_object(&self) -> Option<Value> {
        let function = self.ctx.function?;
        match self.vm.heap.get(function).kind() {
            ObjectKind::Function(closure) => closure.home_object.clone(),
            _ => None,
        }
    }

    pub(crate) fn handle_call(
        &mut self,
        callee: Operand,
        this_value: Operand,
        arguments: &[Operand],
        expression: Option<StringTableIndex>,
    ) -> VmResult<Value> {
        let callee = self.get(callee);
        self.check_callable(&callee, expression)?;
        let this_value = self.get(this_value);
        let arguments = self.collect_arguments(arguments);
        self.vm.call(&callee, this_value, &arguments)
    }

    pub(crate) fn handle_construct(
        &mut self,
        callee: Operand,
        arguments: &[Operand],
        expression: Option<StringTableIndex>,
    ) -> VmResult<Value> {
        let callee = self.get(callee);
        self.check_constructor(&callee, expression)?;
        let arguments = self.collect_arguments(arguments);
        self.vm.construct(&callee, &arguments, None)
    }

    fn direct_eval_or_call(
        &mut self,
        callee: Value,
        this_value: Value,
        arguments: &[Value],
        expression: Option<StringTableIndex>,
        strict: bool,
    ) -> VmResult<Value> {
        self.check_callable(&callee, expression)?;
        if callee.as_object() != Some(self.vm.realm.intrinsics.eval_function) {
            return self.vm.call(&callee, this_value, arguments);
        }
        let caller = EvalCaller {
            lexical_environment: self.ctx.lexical_environment,
            variable_environment: self.ctx.variable_environment,
            private_environment: self.ctx.private_environment,
            module_environment: self.ctx.module_environment,
            this_value: self.current_this(),
            strict,
        };
        let argument = arguments.first().cloned().unwrap_or_default();
        self.vm.perform_eval(argument, Some(caller))
    }

    pub(crate) fn handle_direct_eval(
        &mut self,
        callee: Operand,
        this_value: Operand,
        arguments: &[Operand],
        expression: Option<StringTableIndex>,
        strict: bool,
    ) -> VmResult<Value> {
        let callee = self.get(callee);
        let this_value = self.get(this_value);
        let arguments = self.collect_arguments(arguments);
        self.direct_eval_or_call(callee, this_value, &arguments, expression, strict)
    }

    pub(crate) fn handle_call_builtin(
        &mut self,
        callee: Operand,
        this_value: Operand,
        builtin: Builtin,
        arguments: &[Operand],
        expression: Option<StringTableIndex>,
    ) -> VmResult<Value> {
        let callee_value = self.get(callee);
        let recognized = arguments.len() == builtin.arity()
            && callee_value.as_object().is_some()
            && callee_value.as_object() == self.vm.realm.intrinsics.builtin(builtin);
        if recognized {
            let arguments = self.collect_arguments(arguments);
            self.executable.record_builtin_fast_path_hit();
            return crate::builtins::call_math_builtin(self.vm, builtin, &arguments);
        }
        self.handle_call(callee, this_value, arguments, expression)
    }

    pub(crate) fn handle_call_with_argument_array(
        &mut self,
        callee: Operand,
        this_value: Operand,
        arguments: Operand,
        call_type: CallType,
        expression: Option<StringTableIndex>,
        strict: bool,
    ) -> VmResult<Value> {
        let callee = self.get(callee);
        let this_value = self.get(this_value);
        let array = self.get(arguments);
        let arguments = self.vm.array_elements(&array)?;
        match call_type {
            CallType::Call => {
                self.check_callable(&callee, expression)?;
                self.vm.call(&callee, this_value, &arguments)
            }
            CallType::Construct => {
                self.check_constructor(&callee, expression)?;
                self.vm.construct(&callee, &arguments, None)
            }
            CallType::DirectEval => self.direct_eval_or_call(callee, this_value, &arguments, expression, strict),
        }
    }

    pub(crate) fn create_arguments(
        &mut self,
        dst: Option<Operand>,
        kind: ArgumentsKind,
        is_immutable: bool,
    ) -> VmResult<()> {
        let passed = self.ctx.passed_arguments().to_vec();
        let length = passed.len();
        let proto = self.vm.realm.intrinsics.object_prototype;
        let arguments = self.vm.create_object(Some(proto), ObjectKind::Arguments);
        self.vm.heap.get_mut(arguments).indexed = IndexedStorage::Simple(passed);
        self.vm.heap.define_data_property_raw(
            arguments,
            "length".into(),
            Value::number(length as f64),
            PropertyAttributes::HIDDEN,
        );
        let intrinsics = &self.vm.realm.intrinsics;
        let (iterator, values) = (intrinsics.symbols.iterator, intrinsics.array_values_function);
        self.vm.heap.define_data_property_raw(
            arguments,
            PropertyKey::Symbol(iterator),
            Value::Object(values),
            PropertyAttributes::HIDDEN,
        );
        match kind {
            ArgumentsKind::Mapped => {
                let callee = self.ctx.function.map(Value::Object).unwrap_or_default();
                self.vm
                    .heap
                    .define_data_property_raw(arguments, "callee".into(), callee, PropertyAttributes::HIDDEN);
            }
            ArgumentsKind::Unmapped => {
                let thrower = self.vm.realm.intrinsics.throw_type_error;
                self.vm.define_accessor_property(
                    arguments,
                    "callee".into(),
                    Some(thrower),
                    Some(thrower),
                    PropertyAttributes {
                        writable: false,
                        enumerable: false,
                        configurable: false,
                    },
                );
            }
        }

        match dst {
            Some(dst) => self.set(dst, Value::Object(arguments)),
            None => {
                let Some(env) = self.ctx.lexical_environment else {
                    return Err(VmError::internal("arguments object without a function environment"));
                };
                let name = JsString::new("arguments");
                if is_immutable {
                    self.vm.create_immutable_binding(env, name.clone(), false);
                } else {
                    self.vm.create_mutable_binding(env, name.clone(), false);
                }
                self.vm.initialize_binding(env, &name, Value::Object(arguments))?;
            }
        }
        Ok(())
    }
}
