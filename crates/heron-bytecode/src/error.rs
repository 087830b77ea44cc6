//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while encoding, decoding or assembling bytecode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// Opcode byte does not name an instruction
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Instruction stream ended in the middle of an instruction
    #[error("Unexpected end of bytecode at offset {offset}")]
    UnexpectedEnd {
        /// Offset of the field that could not be read
        offset: usize,
    },

    /// Operand field holds a value outside its domain
    #[error("Invalid operand at offset {offset}")]
    InvalidOperand {
        /// Offset of the offending field
        offset: usize,
    },

    /// A label was referenced but never bound
    #[error("Label {0} was never bound")]
    UnboundLabel(u32),

    /// Exception handler range is empty or inverted
    #[error("Invalid exception handler range {start}..{end}")]
    InvalidHandlerRange {
        /// Range start (inclusive)
        start: usize,
        /// Range end (exclusive)
        end: usize,
    },
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
