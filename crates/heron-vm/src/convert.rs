//! Type conversions (ToPrimitive, ToNumber, ToString, ...)

use crate::error::{VmError, VmResult};
use crate::heap::ObjectRef;
use crate::object::ObjectKind;
use crate::runtime::VmRuntime;
use crate::string::{JsString, PropertyKey};
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::Num;
use std::sync::Arc;

/// ToPrimitive hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No hint
    Default,
    /// `number`
    Number,
    /// `string`
    String,
}

/// Result of ToNumeric
#[derive(Debug, Clone)]
pub enum Numeric {
    /// A number
    Number(f64),
    /// A BigInt
    BigInt(Arc<BigInt>),
}

/// ToInt32 on an already-converted number
pub fn f64_to_int32(n: f64) -> i32 {
    if n.is_nan() || n.is_infinite() {
        return 0;
    }
    if n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
        return n as i32;
    }
    let int = n.trunc();
    let modulo = int.rem_euclid(4_294_967_296.0);
    (modulo as u32) as i32
}

/// ToUint32 on an already-converted number
pub fn f64_to_uint32(n: f64) -> u32 {
    f64_to_int32(n) as u32
}

/// Number::toString(10)
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }

    let mut ryu_buf = ryu::Buffer::new();
    let shortest = ryu_buf.format_finite(n.abs());
    let (mantissa, exponent) = match shortest.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (shortest, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut digits: String = int_part.chars().chain(frac_part.chars()).collect();
    let mut point = int_part.len() as i32 + exponent;
    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    point -= leading as i32;
    let trimmed = digits.trim_end_matches('0').len();
    digits.truncate(trimmed);

    let k = digits.len() as i32;
    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    if k <= point && point <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (point - k) as usize));
    } else if 0 < point && point <= 21 {
        out.push_str(&digits[..point as usize]);
        out.push('.');
        out.push_str(&digits[point as usize..]);
    } else if -6 < point && point <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-point) as usize));
        out.push_str(&digits);
    } else {
        let e = point - 1;
        out.push_str(&digits[..1]);
        if k > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if e < 0 { '-' } else { '+' });
        let mut buf = itoa::Buffer::new();
        out.push_str(buf.format(e.abs()));
    }
    out
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}'
}

/// StringToNumber
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        return match BigInt::from_str_radix(digits, radix) {
            Ok(n) if !digits.starts_with(['+', '-']) => {
                num_traits::ToPrimitive::to_f64(&n).unwrap_or(f64::NAN)
            }
            _ => f64::NAN,
        };
    }
    let valid = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && s.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// StringToBigInt
pub fn string_to_bigint(s: &str) -> Option<BigInt> {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return Some(BigInt::from(0));
    }
    let (digits, radix) = match s.get(..2) {
        Some("0x" | "0X") => (&s[2..], 16),
        Some("0o" | "0O") => (&s[2..], 8),
        Some("0b" | "0B") => (&s[2..], 2),
        _ => (s, 10),
    };
    if radix != 10 && digits.starts_with(['+', '-']) {
        return None;
    }
    BigInt::from_str_radix(digits, radix).ok()
}

impl VmRuntime {
    /// ToPrimitive
    pub fn to_primitive(&mut self, value: &Value, hint: PreferredType) -> VmResult<Value> {
        let Value::Object(object) = value else {
            return Ok(value.clone());
        };
        if let ObjectKind::PrimitiveWrapper(primitive) = self.heap.get(*object).kind() {
            if !self.has_own_property(*object, &PropertyKey::from("valueOf"))
                && !self.has_own_property(*object, &PropertyKey::from("toString"))
            {
                return Ok(primitive.clone());
            }
        }
        let order = match hint {
            PreferredType::String => ["toString", "valueOf"],
            PreferredType::Number | PreferredType::Default => ["valueOf", "toString"],
        };
        for name in order {
            let method = self.get(*object, name)?;
            if self.is_callable(&method) {
                let result = self.call(&method, value.clone(), &[])?;
                if !result.is_object() {
                    return Ok(result);
                }
            }
        }
        Err(VmError::type_error("Cannot convert object to primitive value"))
    }

    /// ToNumber
    pub fn to_number(&mut self, value: &Value) -> VmResult<f64> {
        match value {
            Value::Int32(i) => Ok(f64::from(*i)),
            Value::Double(d) => Ok(*d),
            Value::Undefined | Value::Empty => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => Ok(string_to_number(s)),
            Value::Symbol(_) => Err(VmError::type_error("Cannot convert a Symbol value to a number")),
            Value::BigInt(_) => Err(VmError::type_error("Cannot convert a BigInt value to a number")),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PreferredType::Number)?;
                self.to_number(&primitive)
            }
            Value::Accessor(_) | Value::GeneratorResult(_) => {
                Err(VmError::internal("internal value escaped into ToNumber"))
            }
        }
    }

    /// ToNumeric
    pub fn to_numeric(&mut self, value: &Value) -> VmResult<Numeric> {
        let primitive = self.to_primitive(value, PreferredType::Number)?;
        if let Value::BigInt(b) = primitive {
            return Ok(Numeric::BigInt(b));
        }
        Ok(Numeric::Number(self.to_number(&primitive)?))
    }

    /// ToBigInt
    pub fn to_bigint(&mut self, value: &Value) -> VmResult<BigInt> {
        let primitive = self.to_primitive(value, PreferredType::Number)?;
        match primitive {
            Value::BigInt(b) => Ok((*b).clone()),
            Value::Boolean(b) => Ok(BigInt::from(u8::from(b))),
            Value::String(s) => string_to_bigint(&s)
                .ok_or_else(|| VmError::syntax_error(format!("Cannot convert {s} to a BigInt"))),
            other => Err(VmError::type_error(format!(
                "Cannot convert {} to a BigInt",
                self.to_string_without_side_effects(&other)
            ))),
        }
    }

    /// ToInt32
    pub fn to_int32(&mut self, value: &Value) -> VmResult<i32> {
        if let Value::Int32(i) = value {
            return Ok(*i);
        }
        Ok(f64_to_int32(self.to_number(value)?))
    }

    /// ToUint32
    pub fn to_uint32(&mut self, value: &Value) -> VmResult<u32> {
        Ok(f64_to_uint32(self.to_number(value)?))
    }

    /// ToString
    pub fn to_js_string(&mut self, value: &Value) -> VmResult<JsString> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PreferredType::String)?;
                self.to_js_string(&primitive)
            }
            Value::Symbol(_) => Err(VmError::type_error("Cannot convert a Symbol value to a string")),
            other => Ok(JsString::new(self.to_string_without_side_effects(other))),
        }
    }

    /// ToPropertyKey
    pub fn to_property_key(&mut self, value: &Value) -> VmResult<PropertyKey> {
        match value {
            Value::Int32(i) if *i >= 0 => Ok(PropertyKey::Index(*i as u32)),
            Value::String(s) => Ok(PropertyKey::string(s.clone())),
            Value::Symbol(sym) => Ok(PropertyKey::Symbol(*sym)),
            _ => {
                let primitive = self.to_primitive(value, PreferredType::String)?;
                if let Value::Symbol(sym) = primitive {
                    return Ok(PropertyKey::Symbol(sym));
                }
                Ok(PropertyKey::string(self.to_js_string(&primitive)?))
            }
        }
    }

    /// ToObject
    ///
    /// Primitives get a fresh wrapper inheriting from their prototype.
    pub fn to_object(&mut self, value: &Value) -> VmResult<ObjectRef> {
        if let Value::Object(object) = value {
            return Ok(*object);
        }
        let proto = self.primitive_prototype(value).ok_or_else(|| {
            VmError::type_error(format!(
                "ToObject on {}",
                self.to_string_without_side_effects(value)
            ))
        })?;
        Ok(self.create_object(Some(proto), ObjectKind::PrimitiveWrapper(value.clone())))
    }

    /// The object a property read on `base` starts from
    pub(crate) fn to_object_for_access(&self, base: &Value, key: &PropertyKey) -> VmResult<ObjectRef> {
        if let Value::Object(object) = base {
            return Ok(*object);
        }
        self.primitive_prototype(base).ok_or_else(|| {
            VmError::type_error(format!(
                "Cannot read property '{key}' of {}",
                self.to_string_without_side_effects(base)
            ))
        })
    }

    fn primitive_prototype(&self, value: &Value) -> Option<ObjectRef> {
        let intrinsics = &self.realm.intrinsics;
        match value {
            Value::Boolean(_) => Some(intrinsics.boolean_prototype),
            Value::Int32(_) | Value::Double(_) => Some(intrinsics.number_prototype),
            Value::String(_) => Some(intrinsics.string_prototype),
            Value::Symbol(_) => Some(intrinsics.symbol_prototype),
            Value::BigInt(_) => Some(intrinsics.bigint_prototype),
            Value::Object(object) => Some(*object),
            _ => None,
        }
    }

    /// Validated array length (RangeError unless an exact uint32)
    pub(crate) fn to_array_length(&mut self, value: &Value) -> VmResult<u32> {
        let n = self.to_number(value)?;
        let length = f64_to_uint32(n);
        if f64::from(length) != n {
            return Err(VmError::range_error("Invalid array length"));
        }
        Ok(length)
    }

    /// `typeof`
    pub fn typeof_value(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined | Value::Empty => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Int32(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::BigInt(_) => "bigint",
            Value::Object(object) if self.heap.get(*object).is_callable() => "function",
            Value::Object(_) | Value::Accessor(_) | Value::GeneratorResult(_) => "object",
        }
    }

    /// Printable rendering that never runs guest code
    pub fn to_string_without_side_effects(&self, value: &Value) -> String {
        match value {
            Value::Empty => "<empty>".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Double(d) => number_to_string(*d),
            Value::String(s) => s.to_string(),
            Value::Symbol(sym) => match &self.heap.get(*sym).description {
                Some(description) => format!("Symbol({description})"),
                None => "Symbol()".to_string(),
            },
            Value::BigInt(b) => b.to_string(),
            Value::Object(object) => self.describe_object(*object),
            Value::Accessor(_) => "<accessor>".to_string(),
            Value::GeneratorResult(_) => "<generator result>".to_string(),
        }
    }

    fn describe_object(&self, object: ObjectRef) -> String {
        let obj = self.heap.get(object);
        match &obj.kind {
            ObjectKind::Function(function) => format!("function {}", function.data.name),
            ObjectKind::NativeFunction(function) => format!("function {}", function.name),
            ObjectKind::Array => "[object Array]".to_string(),
            ObjectKind::Error => {
                let field = |name: &str| {
                    self.heap
                        .own_property(object, &PropertyKey::from(name))
                        .and_then(|p| p.value.as_string().cloned())
                };
                let name = field("name")
                    .or_else(|| {
                        let proto = self.heap.prototype_of(object)?;
                        self.heap
                            .own_property(proto, &PropertyKey::from("name"))
                            .and_then(|p| p.value.as_string().cloned())
                    })
                    .unwrap_or_else(|| JsString::new("Error"));
                match field("message") {
                    Some(message) if !message.is_empty() => format!("{name}: {message}"),
                    _ => name.to_string(),
                }
            }
            ObjectKind::RegExp { pattern, flags } => format!("/{pattern}/{flags}"),
            ObjectKind::TypedArray(view) => format!("[object {}]", view.kind.name()),
            _ => "[object Object]".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(123.456), "123.456");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(2147483648.0), "2147483648");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42  "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert!(string_to_number("0x").is_nan());
    }

    #[test]
    fn test_int32_wrapping() {
        assert_eq!(f64_to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(f64_to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(f64_to_int32(-1.9), -1);
        assert_eq!(f64_to_uint32(-1.0), u32::MAX);
    }

    #[test]
    fn test_bigint_parsing() {
        assert_eq!(string_to_bigint("0x10"), Some(BigInt::from(16)));
        assert_eq!(string_to_bigint(" -7 "), Some(BigInt::from(-7)));
        assert_eq!(string_to_bigint("1.5"), None);
    }
}
