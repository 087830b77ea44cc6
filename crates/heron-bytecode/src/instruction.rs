//! Instruction set
//!
//! Every instruction is encoded as a two-byte header (opcode, strict flag)
//! followed by its operand fields in declaration order. [`Instruction::length`]
//! always equals the number of bytes [`Instruction::encode`] writes, so a
//! cursor can step from one instruction boundary to the next.

use crate::builtin::Builtin;
use crate::disasm::TableLookup;
use crate::encoding::{Field, Reader, byte_enum_field};
use crate::error::{BytecodeError, Result};
use crate::operand::{
    EnvironmentCoordinateCacheIndex, FunctionTableIndex, GlobalVariableCacheIndex,
    IdentifierTableIndex, Label, Operand, PropertyLookupCacheIndex, RegexTableIndex,
    StringTableIndex,
};
use serde::{Deserialize, Serialize};

/// How a `PutById`/`PutByValue` stores its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PutKind {
    /// Ordinary `[[Set]]`
    KeyValue = 0,
    /// Define an own data property without consulting setters
    DirectKeyValue = 1,
    /// Install a getter
    Getter = 2,
    /// Install a setter
    Setter = 3,
    /// `__proto__: value` in an object literal
    ProtoSetter = 4,
}

byte_enum_field!(PutKind {
    KeyValue = 0,
    DirectKeyValue = 1,
    Getter = 2,
    Setter = 3,
    ProtoSetter = 4,
});

/// Call flavour of `CallWithArgumentArray`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallType {
    /// Plain call
    Call = 0,
    /// `new` call
    Construct = 1,
    /// Call that may be a direct `eval`
    DirectEval = 2,
}

byte_enum_field!(CallType {
    Call = 0,
    Construct = 1,
    DirectEval = 2,
});

/// Flavour of the `arguments` object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArgumentsKind {
    /// Sloppy-mode arguments with a `callee` data property
    Mapped = 0,
    /// Strict-mode arguments whose `callee` throws
    Unmapped = 1,
}

byte_enum_field!(ArgumentsKind {
    Mapped = 0,
    Unmapped = 1,
});

/// Binding flavour for `CreateVariable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvironmentMode {
    /// Bind in the lexical environment
    Lexical = 0,
    /// Bind in the variable environment
    Var = 1,
}

byte_enum_field!(EnvironmentMode { Lexical = 0, Var = 1 });

/// Which iterator method `GetIterator` looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IteratorHint {
    /// `[Symbol.iterator]`
    Sync = 0,
    /// `[Symbol.asyncIterator]`, falling back to the sync iterator
    Async = 1,
}

byte_enum_field!(IteratorHint { Sync = 0, Async = 1 });

/// Completion reported to an iterator by `IteratorClose`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompletionType {
    /// The loop finished or broke out normally
    Normal = 0,
    /// The loop body threw `completion_value`
    Throw = 1,
}

byte_enum_field!(CompletionType { Normal = 0, Throw = 1 });

macro_rules! define_instructions {
    ($(
        $(#[$doc:meta])*
        $name:ident { $($field:ident : $ty:ty),* $(,)? }
    ),* $(,)?) => {
        /// Instruction opcode
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $($(#[$doc])* $name,)*
        }

        impl Opcode {
            const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Decode an opcode byte
            #[inline]
            pub fn from_byte(byte: u8) -> Option<Self> {
                Self::ALL.get(byte as usize).copied()
            }

            /// Encoded opcode byte
            #[inline]
            pub const fn to_byte(self) -> u8 {
                self as u8
            }

            /// Mnemonic
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }

            /// Number of opcodes
            pub const fn count() -> usize {
                Self::ALL.len()
            }
        }

        /// Opcode together with its operand fields
        #[allow(missing_docs)]
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Op {
            $($(#[$doc])* $name { $($field: $ty),* },)*
        }

        impl Op {
            /// Opcode of this operation
            pub const fn opcode(&self) -> Opcode {
                match self {
                    $(Self::$name { .. } => Opcode::$name,)*
                }
            }

            fn encode_fields(&self, out: &mut Vec<u8>) {
                match self {
                    $(Self::$name { $($field),* } => {
                        $(Field::encode($field, out);)*
                    })*
                }
            }

            fn decode_fields(opcode: Opcode, reader: &mut Reader<'_>) -> Result<Self> {
                match opcode {
                    $(Opcode::$name => Ok(Self::$name {
                        $($field: <$ty as Field>::decode(reader)?,)*
                    }),)*
                }
            }

            fn fields_len(&self) -> usize {
                match self {
                    $(Self::$name { $($field),* } => 0 $(+ Field::encoded_len($field))*,)*
                }
            }

            /// Call `visitor` with every operand this operation reads or writes
            pub fn visit_operands(&self, visitor: &mut dyn FnMut(Operand)) {
                match self {
                    $(Self::$name { $($field),* } => {
                        $(Field::visit_operands($field, visitor);)*
                    })*
                }
            }

            /// Call `visitor` with a mutable reference to every operand
            pub fn visit_operands_mut(&mut self, visitor: &mut dyn FnMut(&mut Operand)) {
                match self {
                    $(Self::$name { $($field),* } => {
                        $(Field::visit_operands_mut($field, visitor);)*
                    })*
                }
            }

            /// Call `visitor` with every jump target
            pub fn visit_labels(&self, visitor: &mut dyn FnMut(Label)) {
                match self {
                    $(Self::$name { $($field),* } => {
                        $(Field::visit_labels($field, visitor);)*
                    })*
                }
            }

            /// Call `visitor` with a mutable reference to every jump target
            pub fn visit_labels_mut(&mut self, visitor: &mut dyn FnMut(&mut Label)) {
                match self {
                    $(Self::$name { $($field),* } => {
                        $(Field::visit_labels_mut($field, visitor);)*
                    })*
                }
            }

            #[allow(unused_mut, unused_assignments, unused_variables)]
            fn render_fields(&self, tables: &dyn TableLookup, out: &mut String) {
                match self {
                    $(Self::$name { $($field),* } => {
                        let mut first = true;
                        $(
                            out.push_str(if first { " " } else { ", " });
                            first = false;
                            out.push_str(stringify!($field));
                            out.push(':');
                            Field::render($field, tables, out);
                        )*
                    })*
                }
            }
        }
    };
}

define_instructions! {
    /// `dst = src`
    Mov { dst: Operand, src: Operand },

    /// `dst = lhs + rhs`
    Add { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs - rhs`
    Sub { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs * rhs`
    Mul { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs / rhs`
    Div { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs % rhs`
    Mod { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs ** rhs`
    Exp { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs & rhs`
    BitwiseAnd { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs | rhs`
    BitwiseOr { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs ^ rhs`
    BitwiseXor { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs << rhs`
    LeftShift { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs >> rhs`
    RightShift { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs >>> rhs`
    UnsignedRightShift { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs < rhs`
    LessThan { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs <= rhs`
    LessThanEquals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs > rhs`
    GreaterThan { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs >= rhs`
    GreaterThanEquals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs == rhs`
    LooselyEquals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs != rhs`
    LooselyInequals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs === rhs`
    StrictlyEquals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs !== rhs`
    StrictlyInequals { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs in rhs`
    In { dst: Operand, lhs: Operand, rhs: Operand },
    /// `dst = lhs instanceof rhs`
    InstanceOf { dst: Operand, lhs: Operand, rhs: Operand },

    /// `dst = !src`
    Not { dst: Operand, src: Operand },
    /// `dst = typeof src`
    Typeof { dst: Operand, src: Operand },
    /// `dst = -src`
    UnaryMinus { dst: Operand, src: Operand },
    /// `dst = +src`
    UnaryPlus { dst: Operand, src: Operand },
    /// `dst = ~src`
    BitwiseNot { dst: Operand, src: Operand },
    /// `dst = ToNumeric(src)`
    ToNumeric { dst: Operand, src: Operand },
    /// `dst = dst + 1`
    Increment { dst: Operand },
    /// `dst = dst - 1`
    Decrement { dst: Operand },
    /// `dst = ToNumeric(src); src = dst + 1`
    PostfixIncrement { dst: Operand, src: Operand },
    /// `dst = ToNumeric(src); src = dst - 1`
    PostfixDecrement { dst: Operand, src: Operand },
    /// `dst = dst + ToString(src)`
    ConcatString { dst: Operand, src: Operand },

    /// `dst = {}`
    NewObject { dst: Operand },
    /// `dst = [elements...]`
    NewArray { dst: Operand, elements: Vec<Operand> },
    /// Append `src` (or every element of `src` when spreading) to the array in `dst`
    ArrayAppend { dst: Operand, src: Operand, is_spread: bool },
    /// `dst = /pattern/flags`
    NewRegExp { dst: Operand, regex: RegexTableIndex },
    /// Instantiate a closure from a function template
    NewFunction {
        dst: Operand,
        function: FunctionTableIndex,
        lhs_name: Option<IdentifierTableIndex>,
        home_object: Option<Operand>,
    },
    /// `dst = new TypeError(string)`
    NewTypeError { dst: Operand, error_string: StringTableIndex },

    /// `dst = base.property`
    GetById {
        dst: Operand,
        base: Operand,
        property: IdentifierTableIndex,
        base_identifier: Option<IdentifierTableIndex>,
        cache: PropertyLookupCacheIndex,
    },
    /// `dst = base.property` with an explicit receiver
    GetByIdWithThis {
        dst: Operand,
        base: Operand,
        property: IdentifierTableIndex,
        this_value: Operand,
        cache: PropertyLookupCacheIndex,
    },
    /// `dst = base.length`
    GetLength {
        dst: Operand,
        base: Operand,
        base_identifier: Option<IdentifierTableIndex>,
        cache: PropertyLookupCacheIndex,
    },
    /// `dst = base[property]`
    GetByValue {
        dst: Operand,
        base: Operand,
        property: Operand,
        base_identifier: Option<IdentifierTableIndex>,
    },
    /// `base.property = src`
    PutById {
        base: Operand,
        property: IdentifierTableIndex,
        src: Operand,
        kind: PutKind,
        cache: PropertyLookupCacheIndex,
        base_identifier: Option<IdentifierTableIndex>,
    },
    /// `base.property = src` with an explicit receiver
    PutByIdWithThis {
        base: Operand,
        this_value: Operand,
        property: IdentifierTableIndex,
        src: Operand,
        kind: PutKind,
        cache: PropertyLookupCacheIndex,
    },
    /// `base[property] = src`
    PutByValue {
        base: Operand,
        property: Operand,
        src: Operand,
        kind: PutKind,
        base_identifier: Option<IdentifierTableIndex>,
    },
    /// `dst = delete base.property`
    DeleteById { dst: Operand, base: Operand, property: IdentifierTableIndex },
    /// `dst = delete base[property]`
    DeleteByValue { dst: Operand, base: Operand, property: Operand },
    /// `dst = base[property]` with an explicit receiver
    GetByValueWithThis { dst: Operand, base: Operand, property: Operand, this_value: Operand },
    /// `base[property] = src` with an explicit receiver
    PutByValueWithThis {
        base: Operand,
        property: Operand,
        src: Operand,
        this_value: Operand,
        kind: PutKind,
    },
    /// `delete super.property`, which always throws
    DeleteByIdWithThis {
        dst: Operand,
        base: Operand,
        this_value: Operand,
        property: IdentifierTableIndex,
    },
    /// `delete super[property]`, which always throws
    DeleteByValueWithThis { dst: Operand, base: Operand, this_value: Operand, property: Operand },
    /// `dst = base.#property`
    GetPrivateById { dst: Operand, base: Operand, property: IdentifierTableIndex },
    /// `base.#property = src`; `DirectKeyValue` adds a field, `Getter`/`Setter` an accessor
    PutPrivateById { base: Operand, property: IdentifierTableIndex, src: Operand, kind: PutKind },
    /// `dst = #property in base`
    HasPrivateId { dst: Operand, base: Operand, property: IdentifierTableIndex },
    /// `dst = [[HomeObject]].[[GetPrototypeOf]]()`
    ResolveSuperBase { dst: Operand },

    /// Read a global binding
    GetGlobal { dst: Operand, identifier: IdentifierTableIndex, cache: GlobalVariableCacheIndex },
    /// Write a global binding
    SetGlobal { identifier: IdentifierTableIndex, src: Operand, cache: GlobalVariableCacheIndex },

    /// Read a binding through the environment chain
    GetBinding {
        dst: Operand,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Read a binding the compiler proved initialized
    GetInitializedBinding {
        dst: Operand,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// `dst = typeof identifier`, tolerating unresolvable names
    TypeofBinding {
        dst: Operand,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Resolve a callee and the `this` its reference supplies
    GetCalleeAndThisFromEnvironment {
        callee: Operand,
        this_value: Operand,
        identifier: IdentifierTableIndex,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Initialize a lexical binding
    InitializeLexicalBinding {
        identifier: IdentifierTableIndex,
        src: Operand,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Initialize a `var` binding
    InitializeVariableBinding {
        identifier: IdentifierTableIndex,
        src: Operand,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Assign a lexical binding
    SetLexicalBinding {
        identifier: IdentifierTableIndex,
        src: Operand,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// Assign a `var` binding
    SetVariableBinding {
        identifier: IdentifierTableIndex,
        src: Operand,
        cache: EnvironmentCoordinateCacheIndex,
    },
    /// `dst = delete identifier`
    DeleteVariable { dst: Operand, identifier: IdentifierTableIndex },
    /// Declare a binding in the current lexical or variable environment
    CreateVariable {
        identifier: IdentifierTableIndex,
        mode: EnvironmentMode,
        is_immutable: bool,
        is_global: bool,
        is_strict: bool,
    },
    /// Push a fresh lexical environment
    CreateLexicalEnvironment { capacity: u32 },
    /// Create the function's variable environment
    CreateVariableEnvironment { capacity: u32 },
    /// Pop the lexical environment pushed by the matching create
    LeaveLexicalEnvironment {},
    /// Push an object environment (`with`)
    EnterObjectEnvironment { object: Operand },
    /// Push a private-name environment
    CreatePrivateEnvironment {},
    /// Declare a private name in the current private environment
    AddPrivateName { name: IdentifierTableIndex },
    /// Pop the current private-name environment
    LeavePrivateEnvironment {},

    /// Load the `this` binding into the `this` register
    ResolveThisBinding {},
    /// `dst = new.target`
    GetNewTarget { dst: Operand },
    /// Materialize the `arguments` object
    CreateArguments { dst: Option<Operand>, kind: ArgumentsKind, is_immutable: bool },
    /// `dst = [...arguments.slice(rest_index)]`
    CreateRestParams { dst: Operand, rest_index: u32 },

    /// `dst = GetIterator(iterable, hint)` as an iterator record
    GetIterator { dst: Operand, iterable: Operand, hint: IteratorHint },
    /// `dst = GetMethod(object, property)`, `undefined` when absent
    GetMethod { dst: Operand, object: Operand, property: IdentifierTableIndex },
    /// Iterator record over the enumerable string keys of `object` (`for-in`)
    GetObjectPropertyIterator { dst: Operand, object: Operand },
    /// `object = iterator_record.[[Iterator]]`
    GetObjectFromIteratorRecord { object: Operand, iterator_record: Operand },
    /// `next_method = iterator_record.[[NextMethod]]`
    GetNextMethodFromIteratorRecord { next_method: Operand, iterator_record: Operand },
    /// `dst = IteratorNext(iterator_record)`
    IteratorNext { dst: Operand, iterator_record: Operand },
    /// Step the iterator, splitting the result into `dst_done` and `dst_value`
    IteratorNextUnpack { dst_value: Operand, dst_done: Operand, iterator_record: Operand },
    /// `IteratorClose(iterator_record, completion)`; a throw completion is rethrown
    IteratorClose {
        iterator_record: Operand,
        completion_type: CompletionType,
        completion_value: Option<Operand>,
    },
    /// Drain the iterator into a fresh array
    IteratorToArray { dst: Operand, iterator_record: Operand },

    /// `dst = callee.call(this_value, arguments...)`
    Call {
        dst: Operand,
        callee: Operand,
        this_value: Operand,
        expression_string: Option<StringTableIndex>,
        arguments: Vec<Operand>,
    },
    /// `dst = new callee(arguments...)`
    CallConstruct {
        dst: Operand,
        callee: Operand,
        expression_string: Option<StringTableIndex>,
        arguments: Vec<Operand>,
    },
    /// `dst = eval(arguments...)` where the callee may be the realm's eval
    CallDirectEval {
        dst: Operand,
        callee: Operand,
        this_value: Operand,
        expression_string: Option<StringTableIndex>,
        arguments: Vec<Operand>,
    },
    /// Call that short-circuits when the callee is a known intrinsic
    CallBuiltin {
        dst: Operand,
        callee: Operand,
        this_value: Operand,
        builtin: Builtin,
        expression_string: Option<StringTableIndex>,
        arguments: Vec<Operand>,
    },
    /// Call with the arguments unpacked from an array (spread call)
    CallWithArgumentArray {
        dst: Operand,
        callee: Operand,
        this_value: Operand,
        arguments: Operand,
        call_type: CallType,
        expression_string: Option<StringTableIndex>,
    },

    /// Unconditional jump
    Jump { target: Label },
    /// Two-way branch on truthiness
    JumpIf { condition: Operand, true_target: Label, false_target: Label },
    /// Branch when truthy, fall through otherwise
    JumpTrue { condition: Operand, target: Label },
    /// Branch when falsy, fall through otherwise
    JumpFalse { condition: Operand, target: Label },
    /// Two-way branch on `null`/`undefined`
    JumpNullish { condition: Operand, true_target: Label, false_target: Label },
    /// Two-way branch on `undefined`
    JumpUndefined { condition: Operand, true_target: Label, false_target: Label },
    /// Fused `lhs < rhs` branch
    JumpLessThan { lhs: Operand, rhs: Operand, true_target: Label, false_target: Label },
    /// Fused `lhs === rhs` branch
    JumpStrictlyEquals { lhs: Operand, rhs: Operand, true_target: Label, false_target: Label },

    /// Throw `src`
    Throw { src: Operand },
    /// Throw a `TypeError` when `src` is nullish
    ThrowIfNullish { src: Operand },
    /// Throw a `TypeError` when `src` is not an object
    ThrowIfNotObject { src: Operand },
    /// Throw a `ReferenceError` when `src` is an uninitialized binding
    ThrowIfTDZ { src: Operand },
    /// Push an unwind context for the try whose body starts at `entry`, then jump there
    EnterUnwindContext { entry: Label },
    /// Pop the innermost unwind context
    LeaveUnwindContext {},
    /// Move the pending exception into `dst` and enter the catch body
    Catch { dst: Operand },
    /// Finish a finally body entered by an exception or scheduled jump
    LeaveFinally {},
    /// End of a finally body: rethrow, resume a return, or take the scheduled jump
    ContinuePendingUnwind { resume_target: Label },
    /// Record `target` and run the enclosing finalizer first
    ScheduleJump { target: Label },
    /// Re-arm the scheduled jump saved when the current try was entered
    RestoreScheduledJump {},

    /// Return from the function, running enclosing finalizers first
    Return { value: Option<Operand> },
    /// Terminate the executable with `value`
    End { value: Operand },
    /// Suspend a generator
    Yield { continuation: Option<Label>, value: Operand },
    /// Build the result of a yield without suspending
    PrepareYield { dst: Operand, value: Operand },
    /// Suspend an async function until `argument` settles
    Await { continuation: Label, argument: Operand },
}

/// One decoded instruction: the strict-mode flag plus the operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Whether the instruction was compiled from strict-mode code
    pub strict: bool,
    /// Opcode and operands
    pub op: Op,
}

impl Instruction {
    /// Bytes occupied by the fixed header
    pub const HEADER_LEN: usize = 2;

    /// Sloppy-mode instruction
    #[inline]
    pub fn new(op: Op) -> Self {
        Self { strict: false, op }
    }

    /// Strict-mode instruction
    #[inline]
    pub fn strict(op: Op) -> Self {
        Self { strict: true, op }
    }

    /// Opcode of this instruction
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.op.opcode()
    }

    /// Exact encoded size in bytes, including variable-length tails
    pub fn length(&self) -> usize {
        Self::HEADER_LEN + self.op.fields_len()
    }

    /// Append the encoded form to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_byte());
        out.push(u8::from(self.strict));
        self.op.encode_fields(out);
    }

    /// Decode the instruction starting at `offset`
    pub fn decode(bytes: &[u8], offset: usize) -> Result<Self> {
        let mut reader = Reader::new(bytes, offset);
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode(byte))?;
        let strict = reader.read_bool()?;
        let op = Op::decode_fields(opcode, &mut reader)?;
        Ok(Self { strict, op })
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.op,
            Op::Jump { .. }
                | Op::JumpIf { .. }
                | Op::JumpNullish { .. }
                | Op::JumpUndefined { .. }
                | Op::JumpLessThan { .. }
                | Op::JumpStrictlyEquals { .. }
                | Op::Throw { .. }
                | Op::EnterUnwindContext { .. }
                | Op::ContinuePendingUnwind { .. }
                | Op::ScheduleJump { .. }
                | Op::Return { .. }
                | Op::End { .. }
                | Op::Yield { .. }
                | Op::Await { .. }
        )
    }

    /// Call `visitor` with every operand
    pub fn visit_operands(&self, visitor: &mut dyn FnMut(Operand)) {
        self.op.visit_operands(visitor);
    }

    /// Call `visitor` with every jump target
    pub fn visit_labels(&self, visitor: &mut dyn FnMut(Label)) {
        self.op.visit_labels(visitor);
    }

    /// Call `visitor` with a mutable reference to every jump target
    pub fn visit_labels_mut(&mut self, visitor: &mut dyn FnMut(&mut Label)) {
        self.op.visit_labels_mut(visitor);
    }

    /// Render as `Mnemonic field:value, ...`
    pub fn to_byte_string(&self, tables: &dyn TableLookup) -> String {
        let mut out = String::from(self.opcode().name());
        self.op.render_fields(tables, &mut out);
        if self.strict {
            out.push_str(" (strict)");
        }
        out
    }
}

impl From<Op> for Instruction {
    fn from(op: Op) -> Self {
        Self::new(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::NoTables;
    use crate::operand::Register;

    fn reg(index: u32) -> Operand {
        Operand::register(Register(index))
    }

    #[test]
    fn test_opcode_roundtrip_byte() {
        for byte in 0..Opcode::count() as u8 {
            let opcode = Opcode::from_byte(byte).unwrap();
            assert_eq!(opcode.to_byte(), byte);
        }
        assert_eq!(Opcode::from_byte(Opcode::count() as u8), None);
    }

    #[test]
    fn test_length_matches_encoding_for_variable_length_call() {
        let insn = Instruction::strict(Op::Call {
            dst: reg(5),
            callee: reg(6),
            this_value: reg(7),
            expression_string: Some(StringTableIndex(0)),
            arguments: vec![reg(8), Operand::constant(0), Operand::argument(1)],
        });
        let mut bytes = Vec::new();
        insn.encode(&mut bytes);
        assert_eq!(bytes.len(), insn.length());
        assert_eq!(Instruction::decode(&bytes, 0).unwrap(), insn);
    }

    #[test]
    fn test_decode_rejects_bad_opcode_and_truncation() {
        assert_eq!(
            Instruction::decode(&[0xff, 0], 0),
            Err(BytecodeError::InvalidOpcode(0xff))
        );

        let mut bytes = Vec::new();
        Instruction::new(Op::Mov { dst: reg(5), src: reg(6) }).encode(&mut bytes);
        bytes.pop();
        assert!(matches!(
            Instruction::decode(&bytes, 0),
            Err(BytecodeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_visit_labels_and_operands() {
        let insn = Instruction::new(Op::JumpLessThan {
            lhs: reg(5),
            rhs: Operand::constant(1),
            true_target: Label(10),
            false_target: Label(20),
        });
        let mut labels = Vec::new();
        insn.visit_labels(&mut |label| labels.push(label));
        assert_eq!(labels, vec![Label(10), Label(20)]);

        let mut operands = Vec::new();
        insn.visit_operands(&mut |operand| operands.push(operand));
        assert_eq!(operands, vec![reg(5), Operand::constant(1)]);
    }

    #[test]
    fn test_iterator_close_encodes_its_completion() {
        let insn = Instruction::new(Op::IteratorClose {
            iterator_record: reg(5),
            completion_type: CompletionType::Throw,
            completion_value: Some(reg(6)),
        });
        let mut bytes = Vec::new();
        insn.encode(&mut bytes);
        assert_eq!(bytes.len(), insn.length());
        assert_eq!(Instruction::decode(&bytes, 0).unwrap(), insn);
        assert_eq!(
            insn.to_byte_string(&NoTables),
            "IteratorClose iterator_record:reg5, completion_type:Throw, completion_value:reg6"
        );

        let get = Instruction::new(Op::GetIterator {
            dst: reg(5),
            iterable: reg(6),
            hint: IteratorHint::Async,
        });
        assert_eq!(
            get.to_byte_string(&NoTables),
            "GetIterator dst:reg5, iterable:reg6, hint:Async"
        );
    }

    #[test]
    fn test_to_byte_string() {
        let insn = Instruction::strict(Op::Add {
            dst: reg(5),
            lhs: Operand::local(0),
            rhs: Operand::constant(2),
        });
        assert_eq!(
            insn.to_byte_string(&NoTables),
            "Add dst:reg5, lhs:loc0, rhs:const2 (strict)"
        );
        assert_eq!(
            Instruction::new(Op::LeaveUnwindContext {}).to_byte_string(&NoTables),
            "LeaveUnwindContext"
        );
    }
}
