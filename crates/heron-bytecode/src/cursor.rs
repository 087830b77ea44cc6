//! Instruction stream cursor

use crate::error::Result;
use crate::instruction::Instruction;

/// Walks a bytecode buffer one instruction at a time
///
/// The cursor only ever advances by the decoded instruction's own
/// [`Instruction::length`], so every position it reports is an instruction
/// boundary as long as the buffer was produced by the encoder.
#[derive(Debug, Clone)]
pub struct InstructionStreamIterator<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> InstructionStreamIterator<'a> {
    /// Cursor at the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Cursor at an arbitrary instruction boundary
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    /// Offset of the next instruction
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the cursor has consumed the whole buffer
    #[inline]
    pub fn at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    /// Decode the instruction under the cursor without advancing
    pub fn current(&self) -> Result<Instruction> {
        Instruction::decode(self.bytes, self.offset)
    }

    /// Move to another instruction boundary
    #[inline]
    pub fn jump(&mut self, offset: usize) {
        self.offset = offset;
    }
}

impl Iterator for InstructionStreamIterator<'_> {
    type Item = Result<(usize, Instruction)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_end() {
            return None;
        }
        let offset = self.offset;
        match Instruction::decode(self.bytes, offset) {
            Ok(instruction) => {
                self.offset += instruction.length();
                Some(Ok((offset, instruction)))
            }
            Err(err) => {
                self.offset = self.bytes.len();
                Some(Err(err))
            }
        }
    }
}
