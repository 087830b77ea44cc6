//! Execution contexts: one per activation
//!
//! The slot file is a single vector laid out as
//! `[registers | constants | locals | arguments]`; an [`Operand`] selects a
//! region and an index within it.

use crate::executable::Executable;
use crate::heap::{EnvironmentRef, ObjectRef, PrivateEnvironmentRef};
use crate::value::Value;
use heron_bytecode::{Operand, OperandKind, Register};
use std::sync::Arc;

/// A pending protected region
#[derive(Debug, Clone)]
pub struct UnwindContext {
    /// Executable the region belongs to
    pub executable: Arc<Executable>,
    /// Lexical environment at region entry, restored by `Catch`
    pub lexical_environment: Option<EnvironmentRef>,
    /// Set once the catch handler has started
    pub handler_called: bool,
}

/// State of one activation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Code being run
    pub executable: Arc<Executable>,
    /// The slot file
    pub registers: Vec<Value>,
    constants_start: usize,
    locals_start: usize,
    arguments_start: usize,
    /// Arguments the caller actually passed
    pub passed_argument_count: usize,
    /// Function object being run, if any
    pub function: Option<ObjectRef>,
    /// `new.target`
    pub new_target: Option<ObjectRef>,
    /// `this`, copied into the this register when execution starts
    pub this_value: Option<Value>,
    /// Current lexical environment
    pub lexical_environment: Option<EnvironmentRef>,
    /// Current variable environment
    pub variable_environment: Option<EnvironmentRef>,
    /// Current private environment
    pub private_environment: Option<PrivateEnvironmentRef>,
    /// Module record for `GetGlobal`/`SetGlobal`, when running a module
    pub module_environment: Option<EnvironmentRef>,
    /// Lexical environments to return to on `LeaveLexicalEnvironment`
    pub saved_lexical_environments: Vec<Option<EnvironmentRef>>,
    /// Active protected regions, innermost last
    pub unwind_contexts: Vec<UnwindContext>,
    /// Scheduled jumps of enclosing regions
    pub previously_scheduled_jumps: Vec<Option<usize>>,
    /// Jump to take once the current finalizer completes
    pub scheduled_jump: Option<usize>,
    /// Offset of the instruction being executed
    pub program_counter: usize,
}

impl ExecutionContext {
    /// Fresh context for `executable` with room for `argument_count`
    /// arguments
    pub fn new(executable: Arc<Executable>, argument_count: usize) -> Self {
        let register_count = executable.number_of_registers.max(Register::RESERVED_COUNT as usize);
        let constants_start = register_count;
        let locals_start = constants_start + executable.constants.len();
        let arguments_start = locals_start + executable.local_variable_names.len();
        let mut registers = Vec::with_capacity(arguments_start + argument_count);
        registers.resize(register_count, Value::Undefined);
        for reserved in [
            Register::EXCEPTION,
            Register::THIS_VALUE,
            Register::RETURN_VALUE,
            Register::SAVED_RETURN_VALUE,
        ] {
            registers[reserved.0 as usize] = Value::Empty;
        }
        registers.extend(executable.constants.iter().cloned());
        registers.resize(arguments_start, Value::Empty);
        registers.resize(arguments_start + argument_count, Value::Undefined);
        Self {
            executable,
            registers,
            constants_start,
            locals_start,
            arguments_start,
            passed_argument_count: 0,
            function: None,
            new_target: None,
            this_value: None,
            lexical_environment: None,
            variable_environment: None,
            private_environment: None,
            module_environment: None,
            saved_lexical_environments: Vec::new(),
            unwind_contexts: Vec::new(),
            previously_scheduled_jumps: Vec::new(),
            scheduled_jump: None,
            program_counter: 0,
        }
    }

    /// Slot index an operand addresses
    #[inline]
    pub fn slot_index(&self, operand: Operand) -> usize {
        let index = operand.index() as usize;
        match operand.kind() {
            OperandKind::Register => index,
            OperandKind::Constant => self.constants_start + index,
            OperandKind::Local => self.locals_start + index,
            OperandKind::Argument => self.arguments_start + index,
        }
    }

    /// Read an operand
    #[inline]
    pub fn get(&self, operand: Operand) -> &Value {
        &self.registers[self.slot_index(operand)]
    }

    /// Write an operand
    #[inline]
    pub fn set(&mut self, operand: Operand, value: Value) {
        let index = self.slot_index(operand);
        self.registers[index] = value;
    }

    /// Read a reserved register
    #[inline]
    pub fn reg(&self, register: Register) -> &Value {
        &self.registers[register.0 as usize]
    }

    /// Write a reserved register
    #[inline]
    pub fn set_reg(&mut self, register: Register, value: Value) {
        self.registers[register.0 as usize] = value;
    }

    /// Take a reserved register, leaving it empty
    #[inline]
    pub fn take_reg(&mut self, register: Register) -> Value {
        std::mem::replace(&mut self.registers[register.0 as usize], Value::Empty)
    }

    /// Argument slots (passed arguments first, then padding)
    pub fn arguments(&self) -> &[Value] {
        &self.registers[self.arguments_start..]
    }

    /// Mutable argument slots
    pub fn arguments_mut(&mut self) -> &mut [Value] {
        &mut self.registers[self.arguments_start..]
    }

    /// The arguments the caller passed
    pub fn passed_arguments(&self) -> &[Value] {
        &self.arguments()[..self.passed_argument_count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_bytecode::{Constant, Op, ProgramBuilder};

    #[test]
    fn test_slot_layout() {
        let mut builder = ProgramBuilder::new("layout");
        let c = builder.constant(Constant::Int32(7));
        let local = builder.local("x");
        let reg = builder.allocate_register();
        builder.emit(Op::Mov { dst: local, src: c });
        builder.emit(Op::End { value: reg });
        let executable = Executable::new(builder.finish().unwrap()).unwrap();

        let mut ctx = ExecutionContext::new(executable, 2);
        assert_eq!(ctx.get(c), &Value::Int32(7));
        assert!(ctx.get(local).is_empty());
        assert!(ctx.reg(Register::EXCEPTION).is_empty());
        assert_eq!(ctx.arguments().len(), 2);

        ctx.set(Operand::argument(1), Value::Int32(3));
        assert_eq!(ctx.arguments()[1], Value::Int32(3));
        ctx.set(reg, Value::Null);
        assert_eq!(ctx.get(reg), &Value::Null);
    }
}
