//! Intrinsics that `CallBuiltin` can recognize statically

use crate::encoding::byte_enum_field;
use serde::{Deserialize, Serialize};

/// A statically known intrinsic function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Builtin {
    /// `Math.abs`
    MathAbs = 0,
    /// `Math.log`
    MathLog = 1,
    /// `Math.pow`
    MathPow = 2,
    /// `Math.exp`
    MathExp = 3,
    /// `Math.ceil`
    MathCeil = 4,
    /// `Math.floor`
    MathFloor = 5,
    /// `Math.imul`
    MathImul = 6,
    /// `Math.random`
    MathRandom = 7,
    /// `Math.round`
    MathRound = 8,
    /// `Math.sqrt`
    MathSqrt = 9,
    /// `Math.sin`
    MathSin = 10,
    /// `Math.cos`
    MathCos = 11,
    /// `Math.tan`
    MathTan = 12,
}

byte_enum_field!(Builtin {
    MathAbs = 0,
    MathLog = 1,
    MathPow = 2,
    MathExp = 3,
    MathCeil = 4,
    MathFloor = 5,
    MathImul = 6,
    MathRandom = 7,
    MathRound = 8,
    MathSqrt = 9,
    MathSin = 10,
    MathCos = 11,
    MathTan = 12,
});

impl Builtin {
    /// Every builtin, in encoding order
    pub const ALL: [Builtin; 13] = [
        Builtin::MathAbs,
        Builtin::MathLog,
        Builtin::MathPow,
        Builtin::MathExp,
        Builtin::MathCeil,
        Builtin::MathFloor,
        Builtin::MathImul,
        Builtin::MathRandom,
        Builtin::MathRound,
        Builtin::MathSqrt,
        Builtin::MathSin,
        Builtin::MathCos,
        Builtin::MathTan,
    ];

    /// Argument count the fast path handles
    pub const fn arity(self) -> usize {
        match self {
            Builtin::MathRandom => 0,
            Builtin::MathPow | Builtin::MathImul => 2,
            _ => 1,
        }
    }

    /// Property name on the `Math` object
    pub const fn property_name(self) -> &'static str {
        match self {
            Builtin::MathAbs => "abs",
            Builtin::MathLog => "log",
            Builtin::MathPow => "pow",
            Builtin::MathExp => "exp",
            Builtin::MathCeil => "ceil",
            Builtin::MathFloor => "floor",
            Builtin::MathImul => "imul",
            Builtin::MathRandom => "random",
            Builtin::MathRound => "round",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathSin => "sin",
            Builtin::MathCos => "cos",
            Builtin::MathTan => "tan",
        }
    }
}
