//! Compiled programs and the assembler that produces them

use crate::constant::Constant;
use crate::cursor::InstructionStreamIterator;
use crate::disasm::TableLookup;
use crate::error::{BytecodeError, Result};
use crate::instruction::{Instruction, Op};
use crate::operand::{
    EnvironmentCoordinateCacheIndex, FunctionTableIndex, GlobalVariableCacheIndex,
    IdentifierTableIndex, Label, Operand, PropertyLookupCacheIndex, RegexTableIndex, Register,
    StringTableIndex,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

/// A protected bytecode range and where control goes when it throws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered offset
    pub start: usize,
    /// One past the last covered offset
    pub end: usize,
    /// Catch entry
    pub handler: Option<usize>,
    /// Finally entry
    pub finalizer: Option<usize>,
}

impl ExceptionHandler {
    /// Whether `offset` lies in the protected range
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// A regular expression literal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexLiteral {
    /// Pattern source
    pub pattern: Box<str>,
    /// Flag characters
    pub flags: Box<str>,
}

/// Kind of function a template instantiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Ordinary function
    Normal,
    /// `function*`
    Generator,
    /// `async function`
    Async,
    /// `async function*`
    AsyncGenerator,
}

/// Everything `NewFunction` needs to build a closure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionTemplate {
    /// Function name (may be empty for anonymous functions)
    pub name: Box<str>,
    /// Body
    pub program: Arc<Program>,
    /// Number of declared formal parameters
    pub formal_parameter_count: u32,
    /// Function kind
    pub kind: FunctionKind,
    /// Strict-mode body
    pub is_strict: bool,
    /// Arrow function (lexical `this`)
    pub is_arrow: bool,
    /// Whether `new` is allowed
    pub is_constructor: bool,
}

impl FunctionTemplate {
    /// Ordinary, sloppy, constructible function template
    pub fn new(name: impl Into<Box<str>>, program: Arc<Program>, formal_parameter_count: u32) -> Self {
        Self {
            name: name.into(),
            program,
            formal_parameter_count,
            kind: FunctionKind::Normal,
            is_strict: false,
            is_arrow: false,
            is_constructor: true,
        }
    }

    /// Set the function kind; generators and async functions are not constructors
    pub fn with_kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        if kind != FunctionKind::Normal {
            self.is_constructor = false;
        }
        self
    }

    /// Mark the body strict
    pub fn strict(mut self) -> Self {
        self.is_strict = true;
        self
    }

    /// Make this an arrow function
    pub fn arrow(mut self) -> Self {
        self.is_arrow = true;
        self.is_constructor = false;
        self
    }
}

/// Compiler output: instruction bytes plus the side tables they index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Name for diagnostics
    pub name: Box<str>,
    /// Encoded instructions
    pub bytecode: Vec<u8>,
    /// Identifier table
    pub identifiers: Vec<Box<str>>,
    /// String table
    pub strings: Vec<Box<str>>,
    /// Regex literal table
    pub regexes: Vec<RegexLiteral>,
    /// Constants, addressed by `Operand::constant`
    pub constants: Vec<Constant>,
    /// Nested function templates
    pub functions: Vec<FunctionTemplate>,
    /// Protected ranges
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Register count, reserved registers included
    pub number_of_registers: u32,
    /// Local variable names, addressed by `Operand::local`
    pub local_variable_names: Vec<Box<str>>,
    /// Number of property-lookup caches the instructions reference
    pub property_lookup_cache_count: u32,
    /// Number of global-variable caches
    pub global_variable_cache_count: u32,
    /// Number of environment-coordinate caches
    pub environment_coordinate_cache_count: u32,
}

impl Program {
    /// Start assembling a program
    pub fn builder(name: impl Into<Box<str>>) -> ProgramBuilder {
        ProgramBuilder::new(name)
    }

    /// Cursor over the instruction stream
    pub fn instructions(&self) -> InstructionStreamIterator<'_> {
        InstructionStreamIterator::new(&self.bytecode)
    }

    /// Innermost protected range covering `offset`
    pub fn exception_handlers_for_offset(&self, offset: usize) -> Option<&ExceptionHandler> {
        self.exception_handlers
            .iter()
            .filter(|range| range.contains(offset))
            .min_by_key(|range| range.end - range.start)
    }

    /// Human-readable listing, one instruction per line
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for item in self.instructions() {
            match item {
                Ok((offset, insn)) => {
                    let _ = writeln!(out, "[{offset:4x}] {}", insn.to_byte_string(self));
                }
                Err(err) => {
                    let _ = writeln!(out, "<{err}>");
                }
            }
        }
        out
    }

    /// Decoded instruction stream as JSON
    pub fn dump_json(&self) -> serde_json::Result<String> {
        let decoded: Vec<(usize, Instruction)> =
            self.instructions().filter_map(|item| item.ok()).collect();
        serde_json::to_string_pretty(&decoded)
    }
}

impl TableLookup for Program {
    fn identifier(&self, index: IdentifierTableIndex) -> Option<&str> {
        self.identifiers.get(index.index()).map(|s| &**s)
    }

    fn string(&self, index: StringTableIndex) -> Option<&str> {
        self.strings.get(index.index()).map(|s| &**s)
    }
}

#[derive(Debug)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Option<Label>,
    finalizer: Option<Label>,
}

/// Assembler with symbolic labels
///
/// Labels returned by [`ProgramBuilder::new_label`] are placeholders until
/// [`ProgramBuilder::finish`] lays out the instructions and patches every
/// jump target and handler range with real byte offsets.
#[derive(Debug)]
pub struct ProgramBuilder {
    name: Box<str>,
    strict: bool,
    instructions: Vec<Instruction>,
    label_positions: Vec<Option<usize>>,
    identifiers: Vec<Box<str>>,
    identifier_map: FxHashMap<Box<str>, u32>,
    strings: Vec<Box<str>>,
    string_map: FxHashMap<Box<str>, u32>,
    regexes: Vec<RegexLiteral>,
    constants: Vec<Constant>,
    functions: Vec<FunctionTemplate>,
    handlers: Vec<PendingHandler>,
    next_register: u32,
    local_variable_names: Vec<Box<str>>,
    property_lookup_cache_count: u32,
    global_variable_cache_count: u32,
    environment_coordinate_cache_count: u32,
}

impl ProgramBuilder {
    /// Empty builder
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            strict: false,
            instructions: Vec::new(),
            label_positions: Vec::new(),
            identifiers: Vec::new(),
            identifier_map: FxHashMap::default(),
            strings: Vec::new(),
            string_map: FxHashMap::default(),
            regexes: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            handlers: Vec::new(),
            next_register: Register::RESERVED_COUNT,
            local_variable_names: Vec::new(),
            property_lookup_cache_count: 0,
            global_variable_cache_count: 0,
            environment_coordinate_cache_count: 0,
        }
    }

    /// Set the strict flag stamped on subsequently emitted instructions
    pub fn set_strict(&mut self, strict: bool) -> &mut Self {
        self.strict = strict;
        self
    }

    /// Intern an identifier
    pub fn identifier(&mut self, name: &str) -> IdentifierTableIndex {
        if let Some(&index) = self.identifier_map.get(name) {
            return IdentifierTableIndex(index);
        }
        let index = self.identifiers.len() as u32;
        self.identifiers.push(name.into());
        self.identifier_map.insert(name.into(), index);
        IdentifierTableIndex(index)
    }

    /// Intern a string literal
    pub fn string(&mut self, text: &str) -> StringTableIndex {
        if let Some(&index) = self.string_map.get(text) {
            return StringTableIndex(index);
        }
        let index = self.strings.len() as u32;
        self.strings.push(text.into());
        self.string_map.insert(text.into(), index);
        StringTableIndex(index)
    }

    /// Add a regex literal
    pub fn regex(&mut self, pattern: &str, flags: &str) -> RegexTableIndex {
        self.regexes.push(RegexLiteral {
            pattern: pattern.into(),
            flags: flags.into(),
        });
        RegexTableIndex(self.regexes.len() as u32 - 1)
    }

    /// Add a constant and return the operand that reads it
    pub fn constant(&mut self, constant: Constant) -> Operand {
        self.constants.push(constant);
        Operand::constant(self.constants.len() as u32 - 1)
    }

    /// Add a nested function template
    pub fn function(&mut self, template: FunctionTemplate) -> FunctionTableIndex {
        self.functions.push(template);
        FunctionTableIndex(self.functions.len() as u32 - 1)
    }

    /// Allocate a scratch register
    pub fn allocate_register(&mut self) -> Operand {
        let register = Register(self.next_register);
        self.next_register += 1;
        Operand::register(register)
    }

    /// Declare a local variable slot
    pub fn local(&mut self, name: &str) -> Operand {
        self.local_variable_names.push(name.into());
        Operand::local(self.local_variable_names.len() as u32 - 1)
    }

    /// Allocate a property-lookup cache
    pub fn property_lookup_cache(&mut self) -> PropertyLookupCacheIndex {
        self.property_lookup_cache_count += 1;
        PropertyLookupCacheIndex(self.property_lookup_cache_count - 1)
    }

    /// Allocate a global-variable cache
    pub fn global_variable_cache(&mut self) -> GlobalVariableCacheIndex {
        self.global_variable_cache_count += 1;
        GlobalVariableCacheIndex(self.global_variable_cache_count - 1)
    }

    /// Allocate an environment-coordinate cache
    pub fn environment_coordinate_cache(&mut self) -> EnvironmentCoordinateCacheIndex {
        self.environment_coordinate_cache_count += 1;
        EnvironmentCoordinateCacheIndex(self.environment_coordinate_cache_count - 1)
    }

    /// Fresh unbound label
    pub fn new_label(&mut self) -> Label {
        self.label_positions.push(None);
        Label(self.label_positions.len() as u32 - 1)
    }

    /// Bind `label` to the next emitted instruction
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.label_positions[label.address()] = Some(self.instructions.len());
        self
    }

    /// Emit an instruction with the current strict flag
    pub fn emit(&mut self, op: Op) -> &mut Self {
        self.instructions.push(Instruction {
            strict: self.strict,
            op,
        });
        self
    }

    /// Protect `[start, end)` with a catch and/or finally entry
    pub fn exception_handler(
        &mut self,
        start: Label,
        end: Label,
        handler: Option<Label>,
        finalizer: Option<Label>,
    ) -> &mut Self {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            finalizer,
        });
        self
    }

    /// Lay out instructions, resolve labels and produce the program
    pub fn finish(self) -> Result<Program> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0usize;
        for insn in &self.instructions {
            offsets.push(offset);
            offset += insn.length();
        }
        offsets.push(offset);

        let label_positions = &self.label_positions;
        let resolve = |label: Label| -> Result<usize> {
            label_positions
                .get(label.address())
                .copied()
                .flatten()
                .map(|index| offsets[index])
                .ok_or(BytecodeError::UnboundLabel(label.0))
        };

        let mut bytecode = Vec::with_capacity(offset);
        for mut insn in self.instructions {
            let mut failure = None;
            insn.visit_labels_mut(&mut |label| match resolve(*label) {
                Ok(target) => *label = Label(target as u32),
                Err(err) => failure = Some(err),
            });
            if let Some(err) = failure {
                return Err(err);
            }
            insn.encode(&mut bytecode);
        }

        let mut exception_handlers = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            let start = resolve(pending.start)?;
            let end = resolve(pending.end)?;
            if start >= end {
                return Err(BytecodeError::InvalidHandlerRange { start, end });
            }
            exception_handlers.push(ExceptionHandler {
                start,
                end,
                handler: pending.handler.map(resolve).transpose()?,
                finalizer: pending.finalizer.map(resolve).transpose()?,
            });
        }

        Ok(Program {
            name: self.name,
            bytecode,
            identifiers: self.identifiers,
            strings: self.strings,
            regexes: self.regexes,
            constants: self.constants,
            functions: self.functions,
            exception_handlers,
            number_of_registers: self.next_register,
            local_variable_names: self.local_variable_names,
            property_lookup_cache_count: self.property_lookup_cache_count,
            global_variable_cache_count: self.global_variable_cache_count,
            environment_coordinate_cache_count: self.environment_coordinate_cache_count,
        })
    }
}
