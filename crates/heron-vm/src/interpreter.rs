//! The dispatch loop and the unwind controller
//!
//! `run_loop` decodes the instruction at the program counter, executes it,
//! and either falls through, jumps, or exits. Any error raised by a handler
//! is materialized into a guest value and routed through
//! [`Interpreter::handle_exception`], which consults the executable's
//! handler table for the faulting offset.
//!
//! A frame finishes in one of three ways, reported as [`ExecutionResult`]:
//! a normal completion, an uncaught throw, or a generator/async suspension.

use crate::context::{ExecutionContext, UnwindContext};
use crate::error::{VmError, VmResult};
use crate::executable::Executable;
use crate::generator::{GeneratorResult, ResumeMode};
use crate::object::ObjectKind;
use crate::ops::{self, NumericOp};
use crate::runtime::VmRuntime;
use crate::shape::PropertyAttributes;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use heron_bytecode::{Instruction, Label, Op, Operand, Register};
use std::sync::Arc;

/// How a frame finished
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Normal completion
    Value(Value),
    /// Uncaught exception
    Thrown(Value),
    /// Suspended at a `Yield` or `Await`
    Suspended(GeneratorResult),
}

pub(crate) enum Flow {
    Next,
    Jump(usize),
    Exit,
}

/// Runs one execution context
pub struct Interpreter<'a> {
    pub(crate) vm: &'a mut VmRuntime,
    pub(crate) ctx: &'a mut ExecutionContext,
    pub(crate) executable: Arc<Executable>,
}

impl<'a> Interpreter<'a> {
    /// Bind the interpreter to a runtime and a context
    pub fn new(vm: &'a mut VmRuntime, ctx: &'a mut ExecutionContext) -> Self {
        let executable = Arc::clone(&ctx.executable);
        Self { vm, ctx, executable }
    }

    /// Run from `entry_point`, seeding the accumulator when given
    pub fn run(mut self, entry_point: usize, initial_accumulator: Option<Value>) -> ExecutionResult {
        tracing::debug!(
            target: "heron::interpreter",
            executable = %self.executable.name,
            entry_point,
            "entering executable"
        );
        self.prepare(initial_accumulator);
        self.run_loop(entry_point);
        self.finish()
    }

    /// Resume a suspended frame at `continuation`
    ///
    /// `Next` delivers `value` in the accumulator, `Throw` raises it at the
    /// continuation, `Return` completes the frame with it after running any
    /// enclosing finalizer.
    pub fn resume(mut self, continuation: usize, mode: ResumeMode, value: Value) -> ExecutionResult {
        match mode {
            ResumeMode::Next => return self.run(continuation, Some(value)),
            ResumeMode::Throw => {
                tracing::debug!(target: "heron::interpreter", executable = %self.executable.name, continuation, "resuming with throw");
                self.prepare(None);
                if let Flow::Jump(target) = self.handle_exception(continuation, value) {
                    self.run_loop(target);
                }
            }
            ResumeMode::Return => {
                tracing::debug!(target: "heron::interpreter", executable = %self.executable.name, continuation, "resuming with return");
                self.prepare(None);
                let finalizer = self
                    .executable
                    .exception_handlers_for_offset(continuation)
                    .and_then(|handlers| handlers.finalizer);
                match finalizer {
                    Some(finalizer) => {
                        self.ctx.set_reg(Register::SAVED_RETURN_VALUE, value);
                        self.run_loop(finalizer);
                    }
                    None => self.do_return(value),
                }
            }
        }
        self.finish()
    }

    fn prepare(&mut self, initial_accumulator: Option<Value>) {
        if let Some(value) = initial_accumulator {
            self.ctx.set_reg(Register::ACCUMULATOR, value);
        }
        self.ctx.set_reg(Register::RETURN_VALUE, Value::Empty);
        if self.ctx.reg(Register::THIS_VALUE).is_empty() {
            if let Some(this) = self.ctx.this_value.clone() {
                self.ctx.set_reg(Register::THIS_VALUE, this);
            }
        }
    }

    fn finish(self) -> ExecutionResult {
        tracing::debug!(target: "heron::interpreter", executable = %self.executable.name, "leaving executable");
        let exception = self.ctx.take_reg(Register::EXCEPTION);
        if !exception.is_empty() {
            return ExecutionResult::Thrown(exception);
        }
        let value = match self.ctx.take_reg(Register::RETURN_VALUE) {
            Value::Empty => Value::Undefined,
            value => value,
        };
        if let Value::GeneratorResult(result) = value {
            return ExecutionResult::Suspended(self.vm.heap.get(result).clone());
        }
        ExecutionResult::Value(value)
    }

    fn run_loop(&mut self, entry_point: usize) {
        let mut pc = entry_point;
        loop {
            self.ctx.program_counter = pc;
            let instruction = match Instruction::decode(&self.executable.bytecode, pc) {
                Ok(instruction) => instruction,
                Err(error) => panic!(
                    "malformed bytecode in {} at {pc:#x}: {error}",
                    self.executable.name
                ),
            };
            if tracing::enabled!(target: "heron::interpreter", tracing::Level::TRACE) {
                tracing::trace!(
                    target: "heron::interpreter",
                    "[{pc:#06x}] {}",
                    instruction.to_byte_string(&*self.executable)
                );
            }
            let next = pc + instruction.length();
            match self.execute(&instruction, pc) {
                Ok(Flow::Next) => pc = next,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Exit) => return,
                Err(error) => {
                    let value = self.vm.error_to_value(error);
                    match self.handle_exception(pc, value) {
                        Flow::Jump(target) => pc = target,
                        Flow::Next | Flow::Exit => return,
                    }
                }
            }
        }
    }

    /// Route a thrown value to the handler covering `pc`
    pub(crate) fn handle_exception(&mut self, pc: usize, value: Value) -> Flow {
        self.ctx.set_reg(Register::EXCEPTION, value);
        self.ctx.scheduled_jump = None;
        let Some(handlers) = self.executable.exception_handlers_for_offset(pc) else {
            tracing::debug!(target: "heron::interpreter", pc, "no handler, exception leaves the frame");
            return Flow::Exit;
        };
        let Some(unwind) = self.ctx.unwind_contexts.last() else {
            panic!("handler range at {pc:#x} without an active unwind context");
        };
        assert!(
            Arc::ptr_eq(&unwind.executable, &self.executable),
            "unwind context belongs to another executable"
        );
        tracing::debug!(target: "heron::interpreter", pc, ?handlers, "unwinding to handler");
        if let Some(handler) = handlers.handler {
            return Flow::Jump(handler);
        }
        if let Some(finalizer) = handlers.finalizer {
            return Flow::Jump(finalizer);
        }
        unreachable!("handler range at {pc:#x} has neither handler nor finalizer");
    }

    fn do_return(&mut self, value: Value) {
        self.ctx.set_reg(Register::RETURN_VALUE, value);
        self.ctx.set_reg(Register::EXCEPTION, Value::Empty);
    }

    fn finalizer_for(&self, pc: usize) -> Option<usize> {
        self.executable
            .exception_handlers_for_offset(pc)
            .and_then(|handlers| handlers.finalizer)
    }

    #[inline]
    pub(crate) fn get(&self, operand: Operand) -> Value {
        self.ctx.get(operand).clone()
    }

    #[inline]
    pub(crate) fn set(&mut self, operand: Operand, value: Value) {
        self.ctx.set(operand, value);
    }

    fn suspend(&mut self, value: Value, continuation: Option<usize>, is_await: bool) {
        let result = self.vm.heap.allocate(GeneratorResult {
            value,
            continuation,
            is_await,
        });
        self.do_return(Value::GeneratorResult(result));
    }

    fn numeric(&mut self, op: NumericOp, dst: Operand, lhs: Operand, rhs: Operand) -> VmResult<Flow> {
        let (l, r) = (self.get(lhs), self.get(rhs));
        let fast = match op {
            NumericOp::Sub => ops::sub_int32(&l, &r),
            NumericOp::Mul => ops::mul_int32(&l, &r),
            _ => None,
        };
        let value = match fast {
            Some(value) => value,
            None => self.vm.op_numeric(op, &l, &r)?,
        };
        self.set(dst, value);
        Ok(Flow::Next)
    }

    fn compare(
        &mut self,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
        op: fn(&mut VmRuntime, &Value, &Value) -> VmResult<bool>,
    ) -> VmResult<Flow> {
        let (l, r) = (self.get(lhs), self.get(rhs));
        let result = op(self.vm, &l, &r)?;
        self.set(dst, Value::Boolean(result));
        Ok(Flow::Next)
    }

    fn branch(&self, condition: bool, true_target: Label, false_target: Label) -> Flow {
        Flow::Jump(if condition {
            true_target.address()
        } else {
            false_target.address()
        })
    }

    fn execute(&mut self, instruction: &Instruction, pc: usize) -> VmResult<Flow> {
        let strict = instruction.strict || self.vm.config.strict_mode;
        match &instruction.op {
            Op::Mov { dst, src } => {
                let value = self.get(*src);
                self.set(*dst, value);
            }

            Op::Add { dst, lhs, rhs } => {
                let (l, r) = (self.get(*lhs), self.get(*rhs));
                let value = match ops::add_int32(&l, &r) {
                    Some(value) => value,
                    None => self.vm.op_add(&l, &r)?,
                };
                self.set(*dst, value);
            }
            Op::Sub { dst, lhs, rhs } => return self.numeric(NumericOp::Sub, *dst, *lhs, *rhs),
            Op::Mul { dst, lhs, rhs } => return self.numeric(NumericOp::Mul, *dst, *lhs, *rhs),
            Op::Div { dst, lhs, rhs } => return self.numeric(NumericOp::Div, *dst, *lhs, *rhs),
            Op::Mod { dst, lhs, rhs } => return self.numeric(NumericOp::Mod, *dst, *lhs, *rhs),
            Op::Exp { dst, lhs, rhs } => return self.numeric(NumericOp::Exp, *dst, *lhs, *rhs),
            Op::BitwiseAnd { dst, lhs, rhs } => {
                return self.numeric(NumericOp::BitwiseAnd, *dst, *lhs, *rhs);
            }
            Op::BitwiseOr { dst, lhs, rhs } => {
                return self.numeric(NumericOp::BitwiseOr, *dst, *lhs, *rhs);
            }
            Op::BitwiseXor { dst, lhs, rhs } => {
                return self.numeric(NumericOp::BitwiseXor, *dst, *lhs, *rhs);
            }
            Op::LeftShift { dst, lhs, rhs } => {
                return self.numeric(NumericOp::LeftShift, *dst, *lhs, *rhs);
            }
            Op::RightShift { dst, lhs, rhs } => {
                return self.numeric(NumericOp::RightShift, *dst, *lhs, *rhs);
            }
            Op::UnsignedRightShift { dst, lhs, rhs } => {
                return self.numeric(NumericOp::UnsignedRightShift, *dst, *lhs, *rhs);
            }
            Op::LessThan { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_less_than);
            }
            Op::LessThanEquals { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_less_than_equals);
            }
            Op::GreaterThan { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_greater_than);
            }
            Op::GreaterThanEquals { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_greater_than_equals);
            }
            Op::LooselyEquals { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_loosely_equals);
            }
            Op::LooselyInequals { dst, lhs, rhs } => {
                let (l, r) = (self.get(*lhs), self.get(*rhs));
                let equal = self.vm.op_loosely_equals(&l, &r)?;
                self.set(*dst, Value::Boolean(!equal));
            }
            Op::StrictlyEquals { dst, lhs, rhs } => {
                let equal = self.ctx.get(*lhs).strict_equals(self.ctx.get(*rhs));
                self.set(*dst, Value::Boolean(equal));
            }
            Op::StrictlyInequals { dst, lhs, rhs } => {
                let equal = self.ctx.get(*lhs).strict_equals(self.ctx.get(*rhs));
                self.set(*dst, Value::Boolean(!equal));
            }
            Op::In { dst, lhs, rhs } => return self.compare(*dst, *lhs, *rhs, VmRuntime::op_in),
            Op::InstanceOf { dst, lhs, rhs } => {
                return self.compare(*dst, *lhs, *rhs, VmRuntime::op_instance_of);
            }

            Op::Not { dst, src } => {
                let value = !self.ctx.get(*src).to_boolean();
                self.set(*dst, Value::Boolean(value));
            }
            Op::Typeof { dst, src } => {
                let name = self.vm.typeof_value(self.ctx.get(*src));
                self.set(*dst, Value::from(name));
            }
            Op::UnaryMinus { dst, src } => {
                let value = self.get(*src);
                let result = self.vm.op_unary_minus(&value)?;
                self.set(*dst, result);
            }
            Op::UnaryPlus { dst, src } => {
                let value = self.get(*src);
                let result = self.vm.op_unary_plus(&value)?;
                self.set(*dst, result);
            }
            Op::BitwiseNot { dst, src } => {
                let value = self.get(*src);
                let result = self.vm.op_bitwise_not(&value)?;
                self.set(*dst, result);
            }
            Op::ToNumeric { dst, src } => {
                let value = self.get(*src);
                let result = self.vm.op_to_numeric(&value)?;
                self.set(*dst, result);
            }
            Op::Increment { dst } => {
                let value = self.get(*dst);
                let result = self.vm.op_increment(&value)?;
                self.set(*dst, result);
            }
            Op::Decrement { dst } => {
                let value = self.get(*dst);
                let result = self.vm.op_decrement(&value)?;
                self.set(*dst, result);
            }
            Op::PostfixIncrement { dst, src } => {
                let value = self.get(*src);
                let old = self.vm.op_to_numeric(&value)?;
                let new = self.vm.op_increment(&old)?;
                self.set(*dst, old);
                self.set(*src, new);
            }
            Op::PostfixDecrement { dst, src } => {
                let value = self.get(*src);
                let old = self.vm.op_to_numeric(&value)?;
                let new = self.vm.op_decrement(&old)?;
                self.set(*dst, old);
                self.set(*src, new);
            }
            Op::ConcatString { dst, src } => {
                let (l, r) = (self.get(*dst), self.get(*src));
                let ls = self.vm.to_js_string(&l)?;
                let rs = self.vm.to_js_string(&r)?;
                self.set(*dst, Value::String(ls.concat(&rs)));
            }

            Op::NewObject { dst } => {
                let object = self.vm.new_object();
                self.set(*dst, Value::Object(object));
            }
            Op::NewArray { dst, elements } => {
                let values = elements.iter().map(|e| self.get(*e)).collect();
                let array = self.vm.new_array(values);
                self.set(*dst, Value::Object(array));
            }
            Op::ArrayAppend { dst, src, is_spread } => {
                let Value::Object(array) = self.get(*dst) else {
                    return Err(VmError::internal("ArrayAppend target is not an array"));
                };
                let value = self.get(*src);
                let values = if *is_spread {
                    self.vm.iterate_to_list(&value)?
                } else {
                    vec![value]
                };
                for value in values {
                    let index = self.vm.heap.get(array).indexed.length();
                    self.vm.heap.get_mut(array).indexed.set(index, value);
                }
            }
            Op::NewRegExp { dst, regex } => {
                let literal = &self.executable.regex_table[regex.index()];
                let (pattern, flags) = (JsString::new(&literal.pattern), JsString::new(&literal.flags));
                let proto = self.vm.realm.intrinsics.regexp_prototype;
                let object = self.vm.create_object(
                    Some(proto),
                    ObjectKind::RegExp { pattern, flags },
                );
                self.vm.heap.define_data_property_raw(
                    object,
                    PropertyKey::from("lastIndex"),
                    Value::Int32(0),
                    PropertyAttributes {
                        writable: true,
                        enumerable: false,
                        configurable: false,
                    },
                );
                self.set(*dst, Value::Object(object));
            }
            Op::NewFunction {
                dst,
                function,
                lhs_name,
                home_object,
            } => {
                let data = Arc::clone(&self.executable.functions[function.index()]);
                let name = match lhs_name {
                    Some(name) if data.name.is_empty() => Some(self.executable.identifier(*name).clone()),
                    _ => None,
                };
                let home_object = match home_object {
                    Some(home_object) => Some(self.get(*home_object)),
                    None if data.is_arrow => self.home_object(),
                    None => None,
                };
                let this_value = if data.is_arrow {
                    Some(self.ctx.reg(Register::THIS_VALUE).clone())
                } else {
                    None
                };
                let closure = self.vm.create_script_function(
                    data,
                    name,
                    self.ctx.lexical_environment,
                    self.ctx.private_environment,
                    self.ctx.module_environment,
                    home_object,
                    this_value,
                );
                self.set(*dst, Value::Object(closure));
            }
            Op::NewTypeError { dst, error_string } => {
                let message = self.executable.string(*error_string).clone();
                let error = self.vm.create_error_object(crate::realm::ErrorType::TypeError, &message);
                self.set(*dst, Value::Object(error));
            }

            Op::GetById {
                dst,
                base,
                property,
                base_identifier,
                cache,
            } => {
                let base = self.get(*base);
                let value = crate::property_access::get_by_id(
                    self.vm,
                    &self.executable,
                    *base_identifier,
                    &base,
                    *property,
                    &base,
                    *cache,
                )?;
                self.set(*dst, value);
            }
            Op::GetByIdWithThis {
                dst,
                base,
                property,
                this_value,
                cache,
            } => {
                let (base, this_value) = (self.get(*base), self.get(*this_value));
                let value = crate::property_access::get_by_id(
                    self.vm,
                    &self.executable,
                    None,
                    &base,
                    *property,
                    &this_value,
                    *cache,
                )?;
                self.set(*dst, value);
            }
            Op::GetLength {
                dst,
                base,
                base_identifier,
                cache,
            } => {
                let base = self.get(*base);
                let value = crate::property_access::get_length(
                    self.vm,
                    &self.executable,
                    *base_identifier,
                    &base,
                    *cache,
                )?;
                self.set(*dst, value);
            }
            Op::GetByValue {
                dst,
                base,
                property,
                base_identifier,
            } => {
                let (base, property) = (self.get(*base), self.get(*property));
                let value = crate::property_access::get_by_value(
                    self.vm,
                    &self.executable,
                    *base_identifier,
                    &base,
                    &property,
                )?;
                self.set(*dst, value);
            }
            Op::PutById {
                base,
                property,
                src,
                kind,
                cache,
                base_identifier,
            } => {
                let (base, value) = (self.get(*base), self.get(*src));
                let key = PropertyKey::string(self.executable.identifier(*property).clone());
                crate::property_access::put_by_property_key(
                    self.vm,
                    &self.executable,
                    strict,
                    &base,
                    &base,
                    value,
                    *base_identifier,
                    key,
                    *kind,
                    Some(*cache),
                )?;
            }
            Op::PutByIdWithThis {
                base,
                this_value,
                property,
                src,
                kind,
                cache,
            } => {
                let (base, this_value, value) = (self.get(*base), self.get(*this_value), self.get(*src));
                let key = PropertyKey::string(self.executable.identifier(*property).clone());
                crate::property_access::put_by_property_key(
                    self.vm,
                    &self.executable,
                    strict,
                    &base,
                    &this_value,
                    value,
                    None,
                    key,
                    *kind,
                    Some(*cache),
                )?;
            }
            Op::PutByValue {
                base,
                property,
                src,
                kind,
                base_identifier,
            } => {
                let (base, property, value) = (self.get(*base), self.get(*property), self.get(*src));
                crate::property_access::put_by_value(
                    self.vm,
                    &self.executable,
                    strict,
                    &base,
                    &property,
                    value,
                    *base_identifier,
                    *kind,
                )?;
            }
            Op::DeleteById { dst, base, property } => {
                let base = self.get(*base);
                let key = PropertyKey::string(self.executable.identifier(*property).clone());
                let deleted = crate::property_access::delete_by_key(self.vm, strict, &base, &key)?;
                self.set(*dst, Value::Boolean(deleted));
            }
            Op::DeleteByValue { dst, base, property } => {
                let (base, property) = (self.get(*base), self.get(*property));
                let key = self.vm.to_property_key(&property)?;
                let deleted = crate::property_access::delete_by_key(self.vm, strict, &base, &key)?;
                self.set(*dst, Value::Boolean(deleted));
            }

            Op::GetByValueWithThis {
                dst,
                base,
                property,
                this_value,
            } => {
                let (base, property, this_value) = (self.get(*base), self.get(*property), self.get(*this_value));
                let value = crate::property_access::get_by_value_with_this(
                    self.vm,
                    &self.executable,
                    &base,
                    &property,
                    &this_value,
                )?;
                self.set(*dst, value);
            }
            Op::PutByValueWithThis {
                base,
                property,
                src,
                this_value,
                kind,
            } => {
                let (base, property) = (self.get(*base), self.get(*property));
                let (value, this_value) = (self.get(*src), self.get(*this_value));
                crate::property_access::put_by_value_with_this(
                    self.vm,
                    &self.executable,
                    strict,
                    &base,
                    &property,
                    value,
                    &this_value,
                    *kind,
                )?;
            }
            Op::DeleteByIdWithThis { .. } | Op::DeleteByValueWithThis { .. } => {
                return Err(VmError::reference_error("Can't delete a property on 'super'"));
            }
            Op::GetPrivateById { dst, base, property } => {
                let base = self.get(*base);
                let object = self.vm.to_object(&base)?;
                let name = self.resolve_private_name(*property);
                let value = self.vm.private_get(object, &name)?;
                self.set(*dst, value);
            }
            Op::PutPrivateById {
                base,
                property,
                src,
                kind,
            } => {
                let (base, value) = (self.get(*base), self.get(*src));
                let object = self.vm.to_object(&base)?;
                let name = self.resolve_private_name(*property);
                self.put_private(object, &name, value, *kind)?;
            }
            Op::HasPrivateId { dst, base, property } => {
                let Value::Object(object) = self.get(*base) else {
                    return Err(VmError::type_error("Private name check on a non-object"));
                };
                let name = self.resolve_private_name(*property);
                let found = self.vm.has_private_element(object, &name);
                self.set(*dst, Value::Boolean(found));
            }
            Op::ResolveSuperBase { dst } => {
                let Some(home_object) = self.home_object() else {
                    return Err(VmError::syntax_error("'super' keyword unexpected here"));
                };
                let Value::Object(home_object) = home_object else {
                    return Err(VmError::internal("home object is not an object"));
                };
                let base = self.vm.get_prototype_of(home_object).map(Value::Object).unwrap_or(Value::Null);
                self.set(*dst, base);
            }

            Op::GetGlobal {
                dst,
                identifier,
                cache,
            } => {
                let value = self.get_global(*identifier, *cache)?;
                self.set(*dst, value);
            }
            Op::SetGlobal {
                identifier,
                src,
                cache,
            } => {
                let value = self.get(*src);
                self.set_global(*identifier, value, *cache, strict)?;
            }

            Op::GetBinding {
                dst,
                identifier,
                cache,
            }
            | Op::GetInitializedBinding {
                dst,
                identifier,
                cache,
            } => {
                let value = self.get_binding(*identifier, *cache, strict)?;
                self.set(*dst, value);
            }
            Op::TypeofBinding {
                dst,
                identifier,
                cache,
            } => {
                let value = self.typeof_binding(*identifier, *cache, strict)?;
                self.set(*dst, value);
            }
            Op::GetCalleeAndThisFromEnvironment {
                callee,
                this_value,
                identifier,
                cache,
            } => {
                let (function, this) = self.get_callee_and_this(*identifier, *cache, strict)?;
                self.set(*callee, function);
                self.set(*this_value, this);
            }
            Op::InitializeLexicalBinding {
                identifier,
                src,
                cache,
            } => {
                let value = self.get(*src);
                self.initialize_or_set_binding(*identifier, value, *cache, BindingTarget::Lexical, true, strict)?;
            }
            Op::InitializeVariableBinding {
                identifier,
                src,
                cache,
            } => {
                let value = self.get(*src);
                self.initialize_or_set_binding(*identifier, value, *cache, BindingTarget::Variable, true, strict)?;
            }
            Op::SetLexicalBinding {
                identifier,
                src,
                cache,
            } => {
                let value = self.get(*src);
                self.initialize_or_set_binding(*identifier, value, *cache, BindingTarget::Lexical, false, strict)?;
            }
            Op::SetVariableBinding {
                identifier,
                src,
                cache,
            } => {
                let value = self.get(*src);
                self.initialize_or_set_binding(*identifier, value, *cache, BindingTarget::Variable, false, strict)?;
            }
            Op::DeleteVariable { dst, identifier } => {
                let deleted = self.delete_variable(*identifier, strict)?;
                self.set(*dst, Value::Boolean(deleted));
            }
            Op::CreateVariable {
                identifier,
                mode,
                is_immutable,
                is_global,
                is_strict,
            } => {
                self.create_variable(*identifier, *mode, *is_immutable, *is_global, *is_strict)?;
            }
            Op::CreateLexicalEnvironment { .. } => {
                let current = self.ctx.lexical_environment;
                self.ctx.saved_lexical_environments.push(current);
                let env = self.vm.new_declarative_environment(current);
                self.ctx.lexical_environment = Some(env);
            }
            Op::CreateVariableEnvironment { .. } => {
                let env = self.vm.new_declarative_environment(self.ctx.lexical_environment);
                self.ctx.variable_environment = Some(env);
                self.ctx.lexical_environment = Some(env);
            }
            Op::LeaveLexicalEnvironment {} => {
                let Some(saved) = self.ctx.saved_lexical_environments.pop() else {
                    panic!("LeaveLexicalEnvironment without a saved environment");
                };
                self.ctx.lexical_environment = saved;
            }
            Op::EnterObjectEnvironment { object } => {
                let value = self.get(*object);
                let object = self.vm.to_object(&value)?;
                let current = self.ctx.lexical_environment;
                self.ctx.saved_lexical_environments.push(current);
                let env = self.vm.new_object_environment(object, true, current);
                self.ctx.lexical_environment = Some(env);
            }
            Op::CreatePrivateEnvironment {} => {
                let outer = self.ctx.private_environment;
                let env = self.vm.heap.allocate(crate::environment::PrivateEnvironment {
                    outer,
                    names: Vec::new(),
                });
                self.ctx.private_environment = Some(env);
            }
            Op::AddPrivateName { name } => {
                let Some(env) = self.ctx.private_environment else {
                    panic!("AddPrivateName outside a private environment");
                };
                let name = self.executable.identifier(*name).clone();
                let id = self.vm.next_private_name_id();
                self.vm.heap.get_mut(env).names.push((name, id));
            }
            Op::LeavePrivateEnvironment {} => {
                let Some(env) = self.ctx.private_environment else {
                    panic!("LeavePrivateEnvironment outside a private environment");
                };
                self.ctx.private_environment = self.vm.heap.get(env).outer;
            }

            Op::ResolveThisBinding {} => {
                if self.ctx.reg(Register::THIS_VALUE).is_empty() {
                    let this = self.ctx.this_value.clone().unwrap_or_default();
                    self.ctx.set_reg(Register::THIS_VALUE, this);
                }
            }
            Op::GetNewTarget { dst } => {
                let value = self.ctx.new_target.map(Value::Object).unwrap_or_default();
                self.set(*dst, value);
            }
            Op::CreateArguments {
                dst,
                kind,
                is_immutable,
            } => self.create_arguments(*dst, *kind, *is_immutable)?,
            Op::CreateRestParams { dst, rest_index } => {
                let rest = self
                    .ctx
                    .passed_arguments()
                    .get(*rest_index as usize..)
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                let array = self.vm.new_array(rest);
                self.set(*dst, Value::Object(array));
            }

            Op::GetIterator { dst, iterable, hint } => {
                let iterable = self.get(*iterable);
                let record = self.vm.get_iterator(&iterable, *hint)?;
                self.set(*dst, Value::Object(record));
            }
            Op::GetMethod { dst, object, property } => {
                let object = self.get(*object);
                let key = PropertyKey::string(self.executable.identifier(*property).clone());
                let method = self.vm.get_method(&object, &key)?;
                self.set(*dst, method.unwrap_or_default());
            }
            Op::GetObjectPropertyIterator { dst, object } => {
                let object = self.get(*object);
                let record = self.vm.get_object_property_iterator(&object)?;
                self.set(*dst, Value::Object(record));
            }
            Op::GetObjectFromIteratorRecord {
                object,
                iterator_record,
            } => {
                let (_, record) = self.vm.iterator_record(&self.get(*iterator_record))?;
                self.set(*object, record.iterator);
            }
            Op::GetNextMethodFromIteratorRecord {
                next_method,
                iterator_record,
            } => {
                let (_, record) = self.vm.iterator_record(&self.get(*iterator_record))?;
                self.set(*next_method, record.next_method);
            }
            Op::IteratorNext { dst, iterator_record } => {
                let record = self.get(*iterator_record);
                let result = self.vm.iterator_next(&record)?;
                self.set(*dst, Value::Object(result));
            }
            Op::IteratorNextUnpack {
                dst_value,
                dst_done,
                iterator_record,
            } => {
                let record = self.get(*iterator_record);
                let value = self.vm.iterator_step_value(&record)?;
                self.set(*dst_done, Value::Boolean(value.is_none()));
                self.set(*dst_value, value.unwrap_or_default());
            }
            Op::IteratorClose {
                iterator_record,
                completion_type,
                completion_value,
            } => {
                let record = self.get(*iterator_record);
                let value = completion_value.map(|v| self.get(v)).unwrap_or_default();
                self.vm.iterator_close(&record, *completion_type, value)?;
            }
            Op::IteratorToArray { dst, iterator_record } => {
                let record = self.get(*iterator_record);
                let values = self.vm.iterator_to_list(&record)?;
                let array = self.vm.new_array(values);
                self.set(*dst, Value::Object(array));
            }

            Op::Call {
                dst,
                callee,
                this_value,
                expression_string,
                arguments,
            } => {
                let result = self.handle_call(*callee, *this_value, arguments, *expression_string)?;
                self.set(*dst, result);
            }
            Op::CallConstruct {
                dst,
                callee,
                expression_string,
                arguments,
            } => {
                let result = self.handle_construct(*callee, arguments, *expression_string)?;
                self.set(*dst, result);
            }
            Op::CallDirectEval {
                dst,
                callee,
                this_value,
                expression_string,
                arguments,
            } => {
                let result =
                    self.handle_direct_eval(*callee, *this_value, arguments, *expression_string, strict)?;
                self.set(*dst, result);
            }
            Op::CallBuiltin {
                dst,
                callee,
                this_value,
                builtin,
                expression_string,
                arguments,
            } => {
                let result =
                    self.handle_call_builtin(*callee, *this_value, *builtin, arguments, *expression_string)?;
                self.set(*dst, result);
            }
            Op::CallWithArgumentArray {
                dst,
                callee,
                this_value,
                arguments,
                call_type,
                expression_string,
            } => {
                let result = self.handle_call_with_argument_array(
                    *callee,
                    *this_value,
                    *arguments,
                    *call_type,
                    *expression_string,
                    strict,
                )?;
                self.set(*dst, result);
            }

            Op::Jump { target } => return Ok(Flow::Jump(target.address())),
            Op::JumpIf {
                condition,
                true_target,
                false_target,
            } => {
                let truthy = self.ctx.get(*condition).to_boolean();
                return Ok(self.branch(truthy, *true_target, *false_target));
            }
            Op::JumpTrue { condition, target } => {
                if self.ctx.get(*condition).to_boolean() {
                    return Ok(Flow::Jump(target.address()));
                }
            }
            Op::JumpFalse { condition, target } => {
                if !self.ctx.get(*condition).to_boolean() {
                    return Ok(Flow::Jump(target.address()));
                }
            }
            Op::JumpNullish {
                condition,
                true_target,
                false_target,
            } => {
                let nullish = self.ctx.get(*condition).is_nullish();
                return Ok(self.branch(nullish, *true_target, *false_target));
            }
            Op::JumpUndefined {
                condition,
                true_target,
                false_target,
            } => {
                let undefined = self.ctx.get(*condition).is_undefined();
                return Ok(self.branch(undefined, *true_target, *false_target));
            }
            Op::JumpLessThan {
                lhs,
                rhs,
                true_target,
                false_target,
            } => {
                let (l, r) = (self.get(*lhs), self.get(*rhs));
                let less = self.vm.op_less_than(&l, &r)?;
                return Ok(self.branch(less, *true_target, *false_target));
            }
            Op::JumpStrictlyEquals {
                lhs,
                rhs,
                true_target,
                false_target,
            } => {
                let equal = self.ctx.get(*lhs).strict_equals(self.ctx.get(*rhs));
                return Ok(self.branch(equal, *true_target, *false_target));
            }

            Op::Throw { src } => {
                let value = self.get(*src);
                return Ok(self.handle_exception(pc, value));
            }
            Op::ThrowIfNullish { src } => {
                let value = self.get(*src);
                if value.is_nullish() {
                    return Err(VmError::type_error(format!(
                        "{} is not an object",
                        self.vm.to_string_without_side_effects(&value)
                    )));
                }
            }
            Op::ThrowIfNotObject { src } => {
                let value = self.get(*src);
                if !value.is_object() {
                    return Err(VmError::type_error(format!(
                        "{} is not an object",
                        self.vm.to_string_without_side_effects(&value)
                    )));
                }
            }
            Op::ThrowIfTDZ { src } => {
                if self.ctx.get(*src).is_empty() {
                    return Err(VmError::reference_error("Binding is not initialized"));
                }
            }
            Op::EnterUnwindContext { entry } => {
                self.ctx.unwind_contexts.push(UnwindContext {
                    executable: Arc::clone(&self.executable),
                    lexical_environment: self.ctx.lexical_environment,
                    handler_called: false,
                });
                let scheduled = self.ctx.scheduled_jump.take();
                self.ctx.previously_scheduled_jumps.push(scheduled);
                return Ok(Flow::Jump(entry.address()));
            }
            Op::LeaveUnwindContext {} => {
                if self.ctx.unwind_contexts.pop().is_none() {
                    panic!("LeaveUnwindContext without an active unwind context");
                }
            }
            Op::Catch { dst } => {
                let exception = self.ctx.take_reg(Register::EXCEPTION);
                self.set(*dst, exception);
                let Some(unwind) = self.ctx.unwind_contexts.last_mut() else {
                    panic!("Catch without an active unwind context");
                };
                assert!(!unwind.handler_called, "catch handler entered twice");
                unwind.handler_called = true;
                self.ctx.lexical_environment = unwind.lexical_environment;
            }
            Op::LeaveFinally {} => {
                self.ctx.set_reg(Register::EXCEPTION, Value::Empty);
                self.ctx.scheduled_jump = self.ctx.previously_scheduled_jumps.pop().flatten();
            }
            Op::ContinuePendingUnwind { resume_target } => {
                let exception = self.ctx.reg(Register::EXCEPTION).clone();
                if !exception.is_empty() {
                    return Ok(self.handle_exception(pc, exception));
                }
                let saved = self.ctx.take_reg(Register::SAVED_RETURN_VALUE);
                if !saved.is_empty() {
                    if let Some(finalizer) = self.finalizer_for(pc) {
                        self.ctx.set_reg(Register::SAVED_RETURN_VALUE, saved);
                        return Ok(Flow::Jump(finalizer));
                    }
                    self.do_return(saved);
                    return Ok(Flow::Exit);
                }
                let Some(previous) = self.ctx.previously_scheduled_jumps.pop() else {
                    panic!("ContinuePendingUnwind without a saved scheduled jump");
                };
                if let Some(target) = self.ctx.scheduled_jump.take() {
                    return Ok(Flow::Jump(target));
                }
                self.ctx.scheduled_jump = previous;
                return Ok(Flow::Jump(resume_target.address()));
            }
            Op::ScheduleJump { target } => {
                self.ctx.scheduled_jump = Some(target.address());
                let Some(finalizer) = self.finalizer_for(pc) else {
                    panic!("ScheduleJump at {pc:#x} outside a region with a finalizer");
                };
                return Ok(Flow::Jump(finalizer));
            }
            Op::RestoreScheduledJump {} => {
                self.ctx.scheduled_jump = self.ctx.previously_scheduled_jumps.pop().flatten();
            }

            Op::Return { value } => {
                let value = value.map(|v| self.get(v)).unwrap_or_default();
                if let Some(finalizer) = self.finalizer_for(pc) {
                    self.ctx.set_reg(Register::SAVED_RETURN_VALUE, value);
                    self.ctx.set_reg(Register::RETURN_VALUE, Value::Empty);
                    return Ok(Flow::Jump(finalizer));
                }
                self.do_return(value);
                return Ok(Flow::Exit);
            }
            Op::End { value } => {
                let value = self.get(*value);
                self.ctx.set_reg(Register::ACCUMULATOR, value.clone());
                self.do_return(value);
                return Ok(Flow::Exit);
            }
            Op::Yield { continuation, value } => {
                let value = self.get(*value);
                self.suspend(value, continuation.map(|c| c.address()), false);
                return Ok(Flow::Exit);
            }
            Op::PrepareYield { dst, value } => {
                let value = self.get(*value);
                let result = self.vm.heap.allocate(GeneratorResult {
                    value,
                    continuation: None,
                    is_await: false,
                });
                self.set(*dst, Value::GeneratorResult(result));
            }
            Op::Await {
                continuation,
                argument,
            } => {
                let value = self.get(*argument);
                self.suspend(value, Some(continuation.address()), true);
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Next)
    }
}

/// Which environment a binding instruction starts resolution from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingTarget {
    Lexical,
    Variable,
}
