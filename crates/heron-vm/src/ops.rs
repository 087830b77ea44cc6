//! Operators: arithmetic, bitwise, relational and equality
//!
//! The interpreter handles int32 operands inline; everything here is the
//! generic path with full conversions.

use crate::convert::{Numeric, PreferredType, f64_to_int32, f64_to_uint32, string_to_bigint};
use crate::error::{VmError, VmResult};
use crate::runtime::VmRuntime;
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};
use std::cmp::Ordering;

/// Binary numeric operators that share the ToNumeric path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Exp,
    /// `&`
    BitwiseAnd,
    /// `|`
    BitwiseOr,
    /// `^`
    BitwiseXor,
    /// `<<`
    LeftShift,
    /// `>>`
    RightShift,
    /// `>>>`
    UnsignedRightShift,
}

/// `Number::exponentiate`
pub fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() {
        return f64::NAN;
    }
    if exponent == 0.0 {
        return 1.0;
    }
    if (base == 1.0 || base == -1.0) && exponent.is_infinite() {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Int32 fast path for `+`; `None` when either side is not an int32
#[inline]
pub fn add_int32(lhs: &Value, rhs: &Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int32(a), Value::Int32(b)) => Some(match a.checked_add(*b) {
            Some(sum) => Value::Int32(sum),
            None => Value::Double(f64::from(*a) + f64::from(*b)),
        }),
        _ => None,
    }
}

/// Int32 fast path for `-`
#[inline]
pub fn sub_int32(lhs: &Value, rhs: &Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int32(a), Value::Int32(b)) => Some(match a.checked_sub(*b) {
            Some(diff) => Value::Int32(diff),
            None => Value::Double(f64::from(*a) - f64::from(*b)),
        }),
        _ => None,
    }
}

/// Int32 fast path for `*`
#[inline]
pub fn mul_int32(lhs: &Value, rhs: &Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int32(a), Value::Int32(b)) => Some(match a.checked_mul(*b) {
            Some(0) if *a < 0 || *b < 0 => Value::Double(-0.0),
            Some(product) => Value::Int32(product),
            None => Value::Double(f64::from(*a) * f64::from(*b)),
        }),
        _ => None,
    }
}

fn number_op(op: NumericOp, a: f64, b: f64) -> Value {
    match op {
        NumericOp::Sub => Value::number(a - b),
        NumericOp::Mul => Value::number(a * b),
        NumericOp::Div => Value::number(a / b),
        NumericOp::Mod => Value::number(a % b),
        NumericOp::Exp => Value::number(js_pow(a, b)),
        NumericOp::BitwiseAnd => Value::Int32(f64_to_int32(a) & f64_to_int32(b)),
        NumericOp::BitwiseOr => Value::Int32(f64_to_int32(a) | f64_to_int32(b)),
        NumericOp::BitwiseXor => Value::Int32(f64_to_int32(a) ^ f64_to_int32(b)),
        NumericOp::LeftShift => {
            Value::Int32(f64_to_int32(a).wrapping_shl(f64_to_uint32(b) & 31))
        }
        NumericOp::RightShift => {
            Value::Int32(f64_to_int32(a).wrapping_shr(f64_to_uint32(b) & 31))
        }
        NumericOp::UnsignedRightShift => {
            Value::number(f64::from(f64_to_uint32(a) >> (f64_to_uint32(b) & 31)))
        }
    }
}

fn bigint_shift(value: &BigInt, amount: &BigInt, left: bool) -> VmResult<BigInt> {
    let amount = amount
        .to_i64()
        .ok_or_else(|| VmError::range_error("Maximum BigInt size exceeded"))?;
    let left = if amount < 0 { !left } else { left };
    let bits = usize::try_from(amount.unsigned_abs())
        .map_err(|_| VmError::range_error("Maximum BigInt size exceeded"))?;
    Ok(if left { value << bits } else { value >> bits })
}

fn bigint_op(op: NumericOp, a: &BigInt, b: &BigInt) -> VmResult<Value> {
    let result = match op {
        NumericOp::Sub => a - b,
        NumericOp::Mul => a * b,
        NumericOp::Div | NumericOp::Mod if b.is_zero() => {
            return Err(VmError::range_error("Division by zero"));
        }
        NumericOp::Div => a / b,
        NumericOp::Mod => a % b,
        NumericOp::Exp => {
            let exponent = b
                .to_u32()
                .ok_or_else(|| VmError::range_error("Exponent must be non-negative"))?;
            a.pow(exponent)
        }
        NumericOp::BitwiseAnd => a & b,
        NumericOp::BitwiseOr => a | b,
        NumericOp::BitwiseXor => a ^ b,
        NumericOp::LeftShift => bigint_shift(a, b, true)?,
        NumericOp::RightShift => bigint_shift(a, b, false)?,
        NumericOp::UnsignedRightShift => {
            return Err(VmError::type_error(
                "BigInts have no unsigned right shift, use >> instead",
            ));
        }
    };
    Ok(Value::bigint(result))
}

fn mixed_bigint() -> VmError {
    VmError::type_error("Cannot mix BigInt and other types, use explicit conversions")
}

fn compare_bigint_number(b: &BigInt, n: f64) -> Option<Ordering> {
    if n.is_nan() {
        return None;
    }
    if n == f64::INFINITY {
        return Some(Ordering::Less);
    }
    if n == f64::NEG_INFINITY {
        return Some(Ordering::Greater);
    }
    let floor = n.floor();
    let integral = BigInt::from_f64(floor)?;
    match b.cmp(&integral) {
        Ordering::Equal if floor < n => Some(Ordering::Less),
        ordering => Some(ordering),
    }
}

impl VmRuntime {
    /// `+`
    pub fn op_add(&mut self, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        if let Some(sum) = add_int32(lhs, rhs) {
            return Ok(sum);
        }
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(Value::number(a + b));
        }
        let lp = self.to_primitive(lhs, PreferredType::Default)?;
        let rp = self.to_primitive(rhs, PreferredType::Default)?;
        if lp.is_string() || rp.is_string() {
            let ls = self.to_js_string(&lp)?;
            let rs = self.to_js_string(&rp)?;
            return Ok(Value::String(ls.concat(&rs)));
        }
        match (self.to_numeric(&lp)?, self.to_numeric(&rp)?) {
            (Numeric::Number(a), Numeric::Number(b)) => Ok(Value::number(a + b)),
            (Numeric::BigInt(a), Numeric::BigInt(b)) => Ok(Value::bigint(&*a + &*b)),
            _ => Err(mixed_bigint()),
        }
    }

    /// Any binary numeric operator other than `+`
    pub fn op_numeric(&mut self, op: NumericOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(number_op(op, a, b));
        }
        match (self.to_numeric(lhs)?, self.to_numeric(rhs)?) {
            (Numeric::Number(a), Numeric::Number(b)) => Ok(number_op(op, a, b)),
            (Numeric::BigInt(a), Numeric::BigInt(b)) => bigint_op(op, &a, &b),
            _ => Err(mixed_bigint()),
        }
    }

    /// Unary `-`
    pub fn op_unary_minus(&mut self, value: &Value) -> VmResult<Value> {
        match self.to_numeric(value)? {
            Numeric::Number(n) => Ok(Value::number(-n)),
            Numeric::BigInt(b) => Ok(Value::bigint(-&*b)),
        }
    }

    /// Unary `+`
    pub fn op_unary_plus(&mut self, value: &Value) -> VmResult<Value> {
        Ok(Value::number(self.to_number(value)?))
    }

    /// `~`
    pub fn op_bitwise_not(&mut self, value: &Value) -> VmResult<Value> {
        match self.to_numeric(value)? {
            Numeric::Number(n) => Ok(Value::Int32(!f64_to_int32(n))),
            Numeric::BigInt(b) => Ok(Value::bigint(-&*b - 1)),
        }
    }

    /// ToNumeric as an operator
    pub fn op_to_numeric(&mut self, value: &Value) -> VmResult<Value> {
        match self.to_numeric(value)? {
            Numeric::Number(n) => Ok(Value::number(n)),
            Numeric::BigInt(b) => Ok(Value::BigInt(b)),
        }
    }

    /// `x + 1` on an already-numeric operand
    pub fn op_increment(&mut self, value: &Value) -> VmResult<Value> {
        if let Value::Int32(i) = value {
            if let Some(next) = i.checked_add(1) {
                return Ok(Value::Int32(next));
            }
        }
        match self.to_numeric(value)? {
            Numeric::Number(n) => Ok(Value::number(n + 1.0)),
            Numeric::BigInt(b) => Ok(Value::bigint(&*b + 1)),
        }
    }

    /// `x - 1` on an already-numeric operand
    pub fn op_decrement(&mut self, value: &Value) -> VmResult<Value> {
        if let Value::Int32(i) = value {
            if let Some(next) = i.checked_sub(1) {
                return Ok(Value::Int32(next));
            }
        }
        match self.to_numeric(value)? {
            Numeric::Number(n) => Ok(Value::number(n - 1.0)),
            Numeric::BigInt(b) => Ok(Value::bigint(&*b - 1)),
        }
    }

    /// IsLessThan; `None` means undefined (a NaN was involved)
    fn is_less_than(&mut self, x: &Value, y: &Value, left_first: bool) -> VmResult<Option<bool>> {
        let (px, py) = if left_first {
            let px = self.to_primitive(x, PreferredType::Number)?;
            let py = self.to_primitive(y, PreferredType::Number)?;
            (px, py)
        } else {
            let py = self.to_primitive(y, PreferredType::Number)?;
            let px = self.to_primitive(x, PreferredType::Number)?;
            (px, py)
        };
        match (&px, &py) {
            (Value::String(a), Value::String(b)) => {
                return Ok(Some(a.cmp_code_units(b) == Ordering::Less));
            }
            (Value::BigInt(a), Value::String(b)) => {
                return Ok(string_to_bigint(b).map(|b| **a < b));
            }
            (Value::String(a), Value::BigInt(b)) => {
                return Ok(string_to_bigint(a).map(|a| a < **b));
            }
            _ => {}
        }
        let nx = self.to_numeric(&px)?;
        let ny = self.to_numeric(&py)?;
        Ok(match (nx, ny) {
            (Numeric::Number(a), Numeric::Number(b)) => {
                if a.is_nan() || b.is_nan() {
                    None
                } else {
                    Some(a < b)
                }
            }
            (Numeric::BigInt(a), Numeric::BigInt(b)) => Some(a < b),
            (Numeric::BigInt(a), Numeric::Number(b)) => {
                compare_bigint_number(&a, b).map(|o| o == Ordering::Less)
            }
            (Numeric::Number(a), Numeric::BigInt(b)) => {
                compare_bigint_number(&b, a).map(|o| o == Ordering::Greater)
            }
        })
    }

    /// `<`
    pub fn op_less_than(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            return Ok(a < b);
        }
        Ok(self.is_less_than(lhs, rhs, true)? == Some(true))
    }

    /// `<=`
    pub fn op_less_than_equals(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            return Ok(a <= b);
        }
        Ok(self.is_less_than(rhs, lhs, false)? == Some(false))
    }

    /// `>`
    pub fn op_greater_than(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            return Ok(a > b);
        }
        Ok(self.is_less_than(rhs, lhs, false)? == Some(true))
    }

    /// `>=`
    pub fn op_greater_than_equals(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        if let (Value::Int32(a), Value::Int32(b)) = (lhs, rhs) {
            return Ok(a >= b);
        }
        Ok(self.is_less_than(lhs, rhs, true)? == Some(false))
    }

    /// IsLooselyEqual
    pub fn op_loosely_equals(&mut self, x: &Value, y: &Value) -> VmResult<bool> {
        let same_type = matches!(
            (x, y),
            (
                Value::Int32(_) | Value::Double(_),
                Value::Int32(_) | Value::Double(_)
            ) | (Value::String(_), Value::String(_))
                | (Value::Boolean(_), Value::Boolean(_))
                | (Value::Object(_), Value::Object(_))
                | (Value::Symbol(_), Value::Symbol(_))
                | (Value::BigInt(_), Value::BigInt(_))
                | (Value::Undefined, Value::Undefined)
                | (Value::Null, Value::Null)
        );
        if same_type {
            return Ok(x.strict_equals(y));
        }
        if x.is_nullish() && y.is_nullish() {
            return Ok(true);
        }
        match (x, y) {
            (Value::Int32(_) | Value::Double(_), Value::String(s)) => {
                let n = crate::convert::string_to_number(s);
                Ok(x.as_number() == Some(n))
            }
            (Value::String(_), Value::Int32(_) | Value::Double(_)) => self.op_loosely_equals(y, x),
            (Value::BigInt(b), Value::String(s)) | (Value::String(s), Value::BigInt(b)) => {
                Ok(string_to_bigint(s).is_some_and(|n| n == **b))
            }
            (Value::Boolean(b), _) => {
                let n = Value::Int32(i32::from(*b));
                self.op_loosely_equals(&n, y)
            }
            (_, Value::Boolean(b)) => {
                let n = Value::Int32(i32::from(*b));
                self.op_loosely_equals(x, &n)
            }
            (
                Value::Int32(_) | Value::Double(_) | Value::String(_) | Value::BigInt(_) | Value::Symbol(_),
                Value::Object(_),
            ) => {
                let py = self.to_primitive(y, PreferredType::Default)?;
                self.op_loosely_equals(x, &py)
            }
            (
                Value::Object(_),
                Value::Int32(_) | Value::Double(_) | Value::String(_) | Value::BigInt(_) | Value::Symbol(_),
            ) => {
                let px = self.to_primitive(x, PreferredType::Default)?;
                self.op_loosely_equals(&px, y)
            }
            (Value::BigInt(b), Value::Int32(_) | Value::Double(_)) => {
                Ok(y.as_number().and_then(|n| compare_bigint_number(b, n)) == Some(Ordering::Equal))
            }
            (Value::Int32(_) | Value::Double(_), Value::BigInt(b)) => {
                Ok(x.as_number().and_then(|n| compare_bigint_number(b, n)) == Some(Ordering::Equal))
            }
            _ => Ok(false),
        }
    }

    /// `in`
    pub fn op_in(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let Value::Object(object) = rhs else {
            return Err(VmError::type_error(format!(
                "'in' operator used on non-object {}",
                self.to_string_without_side_effects(rhs)
            )));
        };
        let key = self.to_property_key(lhs)?;
        Ok(self.has_property(*object, &key))
    }

    /// `instanceof`
    pub fn op_instance_of(&mut self, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let Value::Object(constructor) = rhs else {
            return Err(VmError::type_error(format!(
                "Right-hand side of 'instanceof' is not an object: {}",
                self.to_string_without_side_effects(rhs)
            )));
        };
        if !self.is_callable(rhs) {
            return Err(VmError::type_error(format!(
                "{} is not a function",
                self.to_string_without_side_effects(rhs)
            )));
        }
        let Value::Object(instance) = lhs else {
            return Ok(false);
        };
        let prototype = self.get(*constructor, "prototype")?;
        let Value::Object(prototype) = prototype else {
            return Err(VmError::type_error("Function has non-object prototype in instanceof check"));
        };
        let mut current = self.heap.prototype_of(*instance);
        while let Some(object) = current {
            if object == prototype {
                return Ok(true);
            }
            current = self.heap.prototype_of(object);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_overflow_widens() {
        assert_eq!(
            add_int32(&Value::Int32(i32::MAX), &Value::Int32(1)),
            Some(Value::Double(2147483648.0))
        );
        assert_eq!(sub_int32(&Value::Int32(5), &Value::Int32(7)), Some(Value::Int32(-2)));
        assert_eq!(mul_int32(&Value::Int32(-3), &Value::Int32(0)), Some(Value::Double(-0.0)));
        assert_eq!(add_int32(&Value::Int32(1), &Value::Double(1.5)), None);
    }

    #[test]
    fn test_generic_arithmetic() {
        let mut vm = VmRuntime::new();
        assert_eq!(vm.op_add(&Value::from("a"), &Value::Int32(1)).unwrap(), Value::from("a1"));
        assert_eq!(
            vm.op_numeric(NumericOp::Mod, &Value::Int32(-7), &Value::Int32(2)).unwrap(),
            Value::Int32(-1)
        );
        assert_eq!(
            vm.op_numeric(NumericOp::UnsignedRightShift, &Value::Int32(-1), &Value::Int32(0))
                .unwrap(),
            Value::Double(4294967295.0)
        );
        assert!(matches!(
            vm.op_numeric(NumericOp::Sub, &Value::bigint(BigInt::from(1)), &Value::Int32(1)),
            Err(VmError::TypeError(_))
        ));
        assert!(js_pow(1.0, f64::INFINITY).is_nan());
    }

    #[test]
    fn test_loose_equality() {
        let mut vm = VmRuntime::new();
        assert!(vm.op_loosely_equals(&Value::Null, &Value::Undefined).unwrap());
        assert!(vm.op_loosely_equals(&Value::Int32(1), &Value::from("1")).unwrap());
        assert!(vm.op_loosely_equals(&Value::Boolean(true), &Value::Int32(1)).unwrap());
        assert!(!vm.op_loosely_equals(&Value::Null, &Value::Int32(0)).unwrap());
        assert!(vm
            .op_loosely_equals(&Value::bigint(BigInt::from(2)), &Value::Double(2.0))
            .unwrap());
    }

    #[test]
    fn test_bigint_number_comparison_is_exact_past_2_pow_53() {
        let mut vm = VmRuntime::new();
        // 2^53 + 1 has no double; the nearest double is 2^53.
        let big = Value::bigint(BigInt::from(9_007_199_254_740_993_i64));
        let two_53 = Value::Double(9_007_199_254_740_992.0);
        assert!(!vm.op_loosely_equals(&big, &two_53).unwrap());
        assert!(!vm.op_loosely_equals(&two_53, &big).unwrap());
        assert!(vm.op_less_than(&two_53, &big).unwrap());
        assert!(vm.op_greater_than(&big, &two_53).unwrap());
        assert!(!vm.op_less_than(&big, &two_53).unwrap());

        let exact = Value::bigint(BigInt::from(9_007_199_254_740_992_i64));
        assert!(vm.op_loosely_equals(&exact, &two_53).unwrap());
        assert!(vm.op_less_than_equals(&exact, &two_53).unwrap());

        // Fractions order between their neighbouring integers.
        let three = Value::bigint(BigInt::from(3));
        assert!(vm.op_less_than(&three, &Value::Double(3.5)).unwrap());
        assert!(vm.op_greater_than(&three, &Value::Double(2.5)).unwrap());
        assert!(vm.op_less_than(&Value::bigint(BigInt::from(-3)), &Value::Double(-2.5)).unwrap());
        assert!(!vm.op_loosely_equals(&three, &Value::Double(3.5)).unwrap());
        assert!(!vm.op_less_than(&three, &Value::Double(f64::NAN)).unwrap());
    }

    #[test]
    fn test_relational_with_nan_and_strings() {
        let mut vm = VmRuntime::new();
        let nan = Value::Double(f64::NAN);
        assert!(!vm.op_less_than(&nan, &Value::Int32(1)).unwrap());
        assert!(!vm.op_greater_than_equals(&nan, &Value::Int32(1)).unwrap());
        assert!(vm.op_less_than(&Value::from("a"), &Value::from("b")).unwrap());
        assert!(vm.op_less_than_equals(&Value::Int32(2), &Value::Double(2.0)).unwrap());
    }
}
