//! Disassembly support

use crate::operand::{IdentifierTableIndex, StringTableIndex};

/// Resolves table indices while rendering instructions
pub trait TableLookup {
    /// Identifier text for `index`
    fn identifier(&self, index: IdentifierTableIndex) -> Option<&str>;

    /// String literal for `index`
    fn string(&self, index: StringTableIndex) -> Option<&str>;
}

/// Lookup that resolves nothing; indices render as raw numbers
pub struct NoTables;

impl TableLookup for NoTables {
    fn identifier(&self, _index: IdentifierTableIndex) -> Option<&str> {
        None
    }

    fn string(&self, _index: StringTableIndex) -> Option<&str> {
        None
    }
}
