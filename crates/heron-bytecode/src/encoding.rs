//! Field-level binary encoding
//!
//! Every operand field knows how to write itself, read itself back from a
//! [`Reader`], report its encoded size, and expose any operands or labels it
//! carries. Integers are little-endian. Optional fields carry a presence byte
//! and variable-length lists carry a `u32` count.

use crate::disasm::TableLookup;
use crate::error::{BytecodeError, Result};
use crate::operand::{
    EnvironmentCoordinateCacheIndex, FunctionTableIndex, GlobalVariableCacheIndex,
    IdentifierTableIndex, Label, Operand, PropertyLookupCacheIndex, RegexTableIndex,
    StringTableIndex,
};
use std::fmt::Write;

/// Bounds-checked reader over an instruction buffer
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or(BytecodeError::UnexpectedEnd { offset: self.offset })?;
        self.offset += 1;
        Ok(byte)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let end = self.offset + 4;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(BytecodeError::UnexpectedEnd { offset: self.offset })?;
        let value = u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]);
        self.offset = end;
        Ok(value)
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool> {
        let at = self.offset;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(BytecodeError::InvalidOperand { offset: at }),
        }
    }
}

/// One encodable instruction field
pub(crate) trait Field: Sized {
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;
    fn encoded_len(&self) -> usize;
    fn render(&self, tables: &dyn TableLookup, out: &mut String);

    fn visit_operands(&self, _visitor: &mut dyn FnMut(Operand)) {}
    fn visit_operands_mut(&mut self, _visitor: &mut dyn FnMut(&mut Operand)) {}
    fn visit_labels(&self, _visitor: &mut dyn FnMut(Label)) {}
    fn visit_labels_mut(&mut self, _visitor: &mut dyn FnMut(&mut Label)) {}
}

impl Field for u32 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_u32()
    }

    fn encoded_len(&self) -> usize {
        4
    }

    fn render(&self, _tables: &dyn TableLookup, out: &mut String) {
        let _ = write!(out, "{self}");
    }
}

impl Field for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_bool()
    }

    fn encoded_len(&self) -> usize {
        1
    }

    fn render(&self, _tables: &dyn TableLookup, out: &mut String) {
        let _ = write!(out, "{self}");
    }
}

impl Field for Operand {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.raw().to_le_bytes());
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let at = reader.offset();
        let raw = reader.read_u32()?;
        Operand::from_raw(raw).ok_or(BytecodeError::InvalidOperand { offset: at })
    }

    fn encoded_len(&self) -> usize {
        4
    }

    fn render(&self, _tables: &dyn TableLookup, out: &mut String) {
        let _ = write!(out, "{self}");
    }

    fn visit_operands(&self, visitor: &mut dyn FnMut(Operand)) {
        visitor(*self);
    }

    fn visit_operands_mut(&mut self, visitor: &mut dyn FnMut(&mut Operand)) {
        visitor(self);
    }
}

impl Field for Label {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_u32().map(Label)
    }

    fn encoded_len(&self) -> usize {
        4
    }

    fn render(&self, _tables: &dyn TableLookup, out: &mut String) {
        let _ = write!(out, "{self}");
    }

    fn visit_labels(&self, visitor: &mut dyn FnMut(Label)) {
        visitor(*self);
    }

    fn visit_labels_mut(&mut self, visitor: &mut dyn FnMut(&mut Label)) {
        visitor(self);
    }
}

impl<T: Field> Field for Option<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Some(inner) => {
                out.push(1);
                inner.encode(out);
            }
            None => out.push(0),
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        if reader.read_bool()? {
            T::decode(reader).map(Some)
        } else {
            Ok(None)
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.as_ref().map_or(0, Field::encoded_len)
    }

    fn render(&self, tables: &dyn TableLookup, out: &mut String) {
        match self {
            Some(inner) => inner.render(tables, out),
            None => out.push_str("none"),
        }
    }

    fn visit_operands(&self, visitor: &mut dyn FnMut(Operand)) {
        if let Some(inner) = self {
            inner.visit_operands(visitor);
        }
    }

    fn visit_operands_mut(&mut self, visitor: &mut dyn FnMut(&mut Operand)) {
        if let Some(inner) = self {
            inner.visit_operands_mut(visitor);
        }
    }

    fn visit_labels(&self, visitor: &mut dyn FnMut(Label)) {
        if let Some(inner) = self {
            inner.visit_labels(visitor);
        }
    }

    fn visit_labels_mut(&mut self, visitor: &mut dyn FnMut(&mut Label)) {
        if let Some(inner) = self {
            inner.visit_labels_mut(visitor);
        }
    }
}

impl Field for Vec<Operand> {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u32).encode(out);
        for operand in self {
            operand.encode(out);
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u32()? as usize;
        let mut operands = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            operands.push(Operand::decode(reader)?);
        }
        Ok(operands)
    }

    fn encoded_len(&self) -> usize {
        4 + 4 * self.len()
    }

    fn render(&self, _tables: &dyn TableLookup, out: &mut String) {
        out.push('[');
        for (i, operand) in self.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{operand}");
        }
        out.push(']');
    }

    fn visit_operands(&self, visitor: &mut dyn FnMut(Operand)) {
        for operand in self {
            visitor(*operand);
        }
    }

    fn visit_operands_mut(&mut self, visitor: &mut dyn FnMut(&mut Operand)) {
        for operand in self {
            visitor(operand);
        }
    }
}

macro_rules! index_field {
    ($name:ident, |$this:ident, $tables:ident, $out:ident| $render:expr) => {
        impl Field for $name {
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.0.to_le_bytes());
            }

            fn decode(reader: &mut Reader<'_>) -> Result<Self> {
                reader.read_u32().map($name)
            }

            fn encoded_len(&self) -> usize {
                4
            }

            fn render(&self, $tables: &dyn TableLookup, $out: &mut String) {
                let $this = self;
                $render;
            }
        }
    };
}

index_field!(IdentifierTableIndex, |this, tables, out| match tables
    .identifier(*this)
{
    Some(name) => out.push_str(name),
    None => {
        let _ = write!(out, "identifier#{}", this.0);
    }
});
index_field!(StringTableIndex, |this, tables, out| match tables.string(*this) {
    Some(text) => {
        let _ = write!(out, "{text:?}");
    }
    None => {
        let _ = write!(out, "string#{}", this.0);
    }
});
index_field!(RegexTableIndex, |this, _tables, out| {
    let _ = write!(out, "regex#{}", this.0);
});
index_field!(FunctionTableIndex, |this, _tables, out| {
    let _ = write!(out, "function#{}", this.0);
});
index_field!(PropertyLookupCacheIndex, |this, _tables, out| {
    let _ = write!(out, "plc#{}", this.0);
});
index_field!(GlobalVariableCacheIndex, |this, _tables, out| {
    let _ = write!(out, "gvc#{}", this.0);
});
index_field!(EnvironmentCoordinateCacheIndex, |this, _tables, out| {
    let _ = write!(out, "ecc#{}", this.0);
});

/// Implement [`Field`] for a fieldless enum encoded as one byte
macro_rules! byte_enum_field {
    ($name:ident { $($variant:ident = $byte:literal),* $(,)? }) => {
        impl $crate::encoding::Field for $name {
            fn encode(&self, out: &mut Vec<u8>) {
                out.push(*self as u8);
            }

            fn decode(reader: &mut $crate::encoding::Reader<'_>) -> $crate::error::Result<Self> {
                let at = reader.offset();
                match reader.read_u8()? {
                    $($byte => Ok($name::$variant),)*
                    _ => Err($crate::BytecodeError::InvalidOperand { offset: at }),
                }
            }

            fn encoded_len(&self) -> usize {
                1
            }

            fn render(&self, _tables: &dyn $crate::TableLookup, out: &mut String) {
                use std::fmt::Write as _;
                let _ = write!(out, "{self:?}");
            }
        }
    };
}

pub(crate) use byte_enum_field;
