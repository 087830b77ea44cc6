//! # Heron Bytecode
//!
//! Program format consumed by the Heron VM.
//!
//! ## Design Principles
//!
//! - **Register-based**: operands address a flat per-call slot file
//! - **Self-describing length**: every encoded instruction knows its byte span,
//!   so a cursor can walk the stream without a side index
//! - **Side tables**: identifiers, strings, regex literals, constants and cache
//!   slots live next to the bytes and are referenced by index

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builtin;
pub mod constant;
pub mod cursor;
pub mod disasm;
mod encoding;
pub mod error;
pub mod instruction;
pub mod operand;
pub mod program;

pub use builtin::Builtin;
pub use constant::Constant;
pub use cursor::InstructionStreamIterator;
pub use disasm::{NoTables, TableLookup};
pub use error::BytecodeError;
pub use instruction::{
    ArgumentsKind, CallType, CompletionType, EnvironmentMode, Instruction, IteratorHint, Op, Opcode,
    PutKind,
};
pub use operand::{
    EnvironmentCoordinateCacheIndex, FunctionTableIndex, GlobalVariableCacheIndex,
    IdentifierTableIndex, Label, Operand, OperandKind, PropertyLookupCacheIndex, RegexTableIndex,
    Register, StringTableIndex,
};
pub use program::{
    ExceptionHandler, FunctionKind, FunctionTemplate, Program, ProgramBuilder, RegexLiteral,
};
