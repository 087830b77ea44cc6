//! Constant table entries

use serde::{Deserialize, Serialize};

/// A literal value spilled into the constant region of the slot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Uninitialized-binding marker
    Empty,
    /// Boolean literal
    Boolean(bool),
    /// Small integer literal
    Int32(i32),
    /// Number literal
    Double(f64),
    /// String literal
    String(Box<str>),
    /// BigInt literal in decimal form
    BigInt(Box<str>),
}

impl Constant {
    /// Create a number constant, keeping integral values in int32 form
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !(n == 0.0 && n.is_sign_negative())
        {
            Self::Int32(n as i32)
        } else {
            Self::Double(n)
        }
    }

    /// Create a string constant
    pub fn string(s: impl Into<Box<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create a BigInt constant from its decimal digits
    pub fn bigint(digits: impl Into<Box<str>>) -> Self {
        Self::BigInt(digits.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_normalization() {
        assert_eq!(Constant::number(3.0), Constant::Int32(3));
        assert_eq!(Constant::number(0.5), Constant::Double(0.5));
        assert!(matches!(Constant::number(-0.0), Constant::Double(d) if d.is_sign_negative()));
        assert!(matches!(Constant::number(4294967296.0), Constant::Double(_)));
    }
}
