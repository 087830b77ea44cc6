//! Guest strings and property keys

use crate::heap::SymbolRef;
use std::fmt;
use std::sync::Arc;

/// Immutable, cheaply clonable guest string
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsString(Arc<str>);

impl JsString {
    /// Create a string from anything string-like
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    /// The empty string
    pub fn empty() -> Self {
        Self::new("")
    }

    /// Borrow as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in UTF-16 code units
    pub fn len(&self) -> usize {
        if self.0.is_ascii() {
            self.0.len()
        } else {
            self.0.encode_utf16().count()
        }
    }

    /// True if this is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The code unit at `index` as a one-unit string
    pub fn code_unit_string(&self, index: usize) -> Option<JsString> {
        if self.0.is_ascii() {
            return self.0.get(index..index + 1).map(JsString::new);
        }
        let unit = self.0.encode_utf16().nth(index)?;
        Some(JsString::new(String::from_utf16_lossy(&[unit])))
    }

    /// Concatenate two strings
    pub fn concat(&self, other: &JsString) -> JsString {
        let mut s = String::with_capacity(self.0.len() + other.0.len());
        s.push_str(&self.0);
        s.push_str(&other.0);
        JsString::new(s)
    }

    /// Compare by UTF-16 code units, as relational operators do
    pub fn cmp_code_units(&self, other: &JsString) -> std::cmp::Ordering {
        self.0.encode_utf16().cmp(other.0.encode_utf16())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for JsString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Property key
///
/// Canonical array indices (`0..=2^32-2`) are always stored as
/// [`PropertyKey::Index`], never as their string spelling.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String key
    String(JsString),
    /// Symbol key
    Symbol(SymbolRef),
    /// Array index
    Index(u32),
}

impl PropertyKey {
    /// Create a key from a string, canonicalizing array indices
    pub fn string(s: impl Into<JsString>) -> Self {
        let s = s.into();
        match parse_array_index(&s) {
            Some(index) => Self::Index(index),
            None => Self::String(s),
        }
    }

    /// Create a key from an integer
    pub fn index(index: u32) -> Self {
        if index == u32::MAX {
            Self::String(JsString::new(index.to_string()))
        } else {
            Self::Index(index)
        }
    }

    /// The array index, if this key is one
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// True for symbol keys
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    /// The string form of a non-symbol key
    pub fn to_js_string(&self) -> Option<JsString> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Index(i) => {
                let mut buf = itoa::Buffer::new();
                Some(JsString::new(buf.format(*i)))
            }
            Self::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<JsString> for PropertyKey {
    fn from(s: JsString) -> Self {
        Self::string(s)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Index(i) => write!(f, "{i}"),
            Self::Symbol(sym) => write!(f, "Symbol({sym:?})"),
        }
    }
}

fn parse_array_index(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 10 {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    if !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let value: u64 = s.parse().ok()?;
    if value < u64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_canonicalization() {
        assert_eq!(PropertyKey::string("0"), PropertyKey::Index(0));
        assert_eq!(PropertyKey::string("42"), PropertyKey::Index(42));
        assert_eq!(
            PropertyKey::string("4294967294"),
            PropertyKey::Index(4_294_967_294)
        );
        assert!(matches!(
            PropertyKey::string("4294967295"),
            PropertyKey::String(_)
        ));
        assert!(matches!(PropertyKey::string("01"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::string("-1"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::index(u32::MAX), PropertyKey::String(_)));
    }

    #[test]
    fn test_utf16_length() {
        assert_eq!(JsString::new("abc").len(), 3);
        assert_eq!(JsString::new("\u{1F600}").len(), 2);
        assert_eq!(
            JsString::new("héllo").code_unit_string(1).unwrap().as_str(),
            "é"
        );
    }
}
