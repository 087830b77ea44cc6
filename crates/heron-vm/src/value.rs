//! Guest values
//!
//! `Value` is a plain tagged enum. Heap-resident payloads are referenced by
//! generation-checked handles into the [`Heap`](crate::heap::Heap), so a
//! `Value` is cheap to clone and never owns an object graph.

use crate::heap::{AccessorRef, GeneratorResultRef, ObjectRef, SymbolRef};
use crate::string::JsString;
use num_bigint::BigInt;
use num_traits::Zero;
use std::sync::Arc;

/// A guest value
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Sentinel for "no value": uninitialized slots, TDZ locals, an empty
    /// exception register. Never observable by guest code.
    Empty,
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Number that fits an `i32`
    Int32(i32),
    /// Any other number
    Double(f64),
    /// String
    String(JsString),
    /// Symbol
    Symbol(SymbolRef),
    /// BigInt
    BigInt(Arc<BigInt>),
    /// Object
    Object(ObjectRef),
    /// Getter/setter pair stored in a property slot
    Accessor(AccessorRef),
    /// Suspension record produced by `Yield`, `Await` and `PrepareYield`
    GeneratorResult(GeneratorResultRef),
}

/// Symbol payload
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Description passed at creation
    pub description: Option<JsString>,
}

/// Getter/setter pair
#[derive(Debug, Clone, Copy, Default)]
pub struct Accessor {
    /// Getter function
    pub getter: Option<ObjectRef>,
    /// Setter function
    pub setter: Option<ObjectRef>,
}

impl Value {
    /// Build a number, canonicalizing integral doubles to `Int32`
    pub fn number(n: f64) -> Self {
        let i = n as i32;
        if i as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            Value::Int32(i)
        } else {
            Value::Double(n)
        }
    }

    /// Build a string value
    pub fn string(s: impl Into<JsString>) -> Self {
        Value::String(s.into())
    }

    /// Build a BigInt value
    pub fn bigint(n: BigInt) -> Self {
        Value::BigInt(Arc::new(n))
    }

    /// True for the internal empty sentinel
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// True for `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for `null` or `undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// True for numbers
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Double(_))
    }

    /// True for strings
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// True for objects
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Numeric payload as `f64`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(f64::from(*i)),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Object handle
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(o) => Some(*o),
            _ => None,
        }
    }

    /// String payload
    pub fn as_string(&self) -> Option<&JsString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Empty | Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Int32(i) => *i != 0,
            Value::Double(d) => !(*d == 0.0 || d.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::BigInt(b) => !b.is_zero(),
            Value::Symbol(_)
            | Value::Object(_)
            | Value::Accessor(_)
            | Value::GeneratorResult(_) => true,
        }
    }

    /// IsStrictlyEqual
    pub fn strict_equals(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Empty, Value::Empty) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Accessor(a), Value::Accessor(b)) => a == b,
            (Value::GeneratorResult(a), Value::GeneratorResult(b)) => a == b,
            _ => false,
        }
    }

    /// SameValue: like strict equality, except `NaN` equals itself and the
    /// zeroes are distinguished
    pub fn same_value(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            return a == b && a.is_sign_negative() == b.is_sign_negative();
        }
        self.strict_equals(other)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::new(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}
