//! Bytecode operands
//!
//! An [`Operand`] addresses one slot of the per-call slot file. The slot file
//! is laid out as `registers | constants | locals | arguments`, and the operand
//! kind selects the region while the index selects the slot within it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Region of the slot file an operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperandKind {
    /// Scratch or reserved register
    Register = 0,
    /// Local variable slot
    Local = 1,
    /// Spilled constant
    Constant = 2,
    /// Passed argument
    Argument = 3,
}

const KIND_SHIFT: u32 = 29;
const INDEX_MASK: u32 = (1 << KIND_SHIFT) - 1;

/// Packed (kind, index) reference into the slot file
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Operand(u32);

impl Operand {
    /// Largest index an operand can carry
    pub const MAX_INDEX: u32 = INDEX_MASK;

    /// Create an operand of the given kind
    #[inline]
    pub const fn new(kind: OperandKind, index: u32) -> Self {
        debug_assert!(index <= INDEX_MASK);
        Self(((kind as u32) << KIND_SHIFT) | (index & INDEX_MASK))
    }

    /// Register operand
    #[inline]
    pub const fn register(register: Register) -> Self {
        Self::new(OperandKind::Register, register.0)
    }

    /// Local variable operand
    #[inline]
    pub const fn local(index: u32) -> Self {
        Self::new(OperandKind::Local, index)
    }

    /// Constant operand
    #[inline]
    pub const fn constant(index: u32) -> Self {
        Self::new(OperandKind::Constant, index)
    }

    /// Argument operand
    #[inline]
    pub const fn argument(index: u32) -> Self {
        Self::new(OperandKind::Argument, index)
    }

    /// Raw encoded form
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild an operand from its encoded form, rejecting unknown kinds
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if (raw >> KIND_SHIFT) > OperandKind::Argument as u32 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Operand kind
    #[inline]
    pub const fn kind(self) -> OperandKind {
        match self.0 >> KIND_SHIFT {
            0 => OperandKind::Register,
            1 => OperandKind::Local,
            2 => OperandKind::Constant,
            _ => OperandKind::Argument,
        }
    }

    /// Index within the operand's region
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Whether this operand names the given register
    #[inline]
    pub fn is_register(self, register: Register) -> bool {
        self == Self::register(register)
    }
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Self::register(register)
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            OperandKind::Register => match Register(self.index()) {
                Register::ACCUMULATOR => f.write_str("acc"),
                Register::EXCEPTION => f.write_str("exception"),
                Register::THIS_VALUE => f.write_str("this"),
                Register::RETURN_VALUE => f.write_str("return_value"),
                Register::SAVED_RETURN_VALUE => f.write_str("saved_return_value"),
                Register(index) => write!(f, "reg{index}"),
            },
            OperandKind::Local => write!(f, "loc{}", self.index()),
            OperandKind::Constant => write!(f, "const{}", self.index()),
            OperandKind::Argument => write!(f, "arg{}", self.index()),
        }
    }
}

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u32);

impl Register {
    /// Result register of the last expression; also receives resumption values
    pub const ACCUMULATOR: Self = Self(0);
    /// Pending exception, empty when nothing is being thrown
    pub const EXCEPTION: Self = Self(1);
    /// Cached `this` value of the running frame
    pub const THIS_VALUE: Self = Self(2);
    /// Value handed back by `Return`/`Yield`/`Await`
    pub const RETURN_VALUE: Self = Self(3);
    /// Return value parked while a finalizer runs
    pub const SAVED_RETURN_VALUE: Self = Self(4);
    /// Number of reserved registers; scratch registers start here
    pub const RESERVED_COUNT: u32 = 5;

    /// Create a new register
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// The accumulator register
    #[inline]
    pub const fn accumulator() -> Self {
        Self::ACCUMULATOR
    }

    /// The exception register
    #[inline]
    pub const fn exception() -> Self {
        Self::EXCEPTION
    }

    /// The `this` register
    #[inline]
    pub const fn this_value() -> Self {
        Self::THIS_VALUE
    }

    /// The return-value register
    #[inline]
    pub const fn return_value() -> Self {
        Self::RETURN_VALUE
    }

    /// The saved-return-value register
    #[inline]
    pub const fn saved_return_value() -> Self {
        Self::SAVED_RETURN_VALUE
    }
}

/// Absolute byte offset of an instruction inside a program's bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Label(pub u32);

impl Label {
    /// Create a label pointing at `offset`
    #[inline]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Target offset
    #[inline]
    pub const fn address(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

macro_rules! table_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Create a new index
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get index value
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

table_index!(
    /// Index into the identifier table
    IdentifierTableIndex
);
table_index!(
    /// Index into the string table
    StringTableIndex
);
table_index!(
    /// Index into the regex literal table
    RegexTableIndex
);
table_index!(
    /// Index into the function template table
    FunctionTableIndex
);
table_index!(
    /// Index of a property-lookup cache
    PropertyLookupCacheIndex
);
table_index!(
    /// Index of a global-variable cache
    GlobalVariableCacheIndex
);
table_index!(
    /// Index of an environment-coordinate cache
    EnvironmentCoordinateCacheIndex
);
