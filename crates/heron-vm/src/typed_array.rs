//! ArrayBuffer storage and typed array element access

use crate::convert::f64_to_int32;
use crate::error::VmResult;
use crate::heap::{Heap, ObjectRef};
use crate::object::ObjectKind;
use crate::runtime::VmRuntime;
use crate::value::Value;
use half::f16;
use num_bigint::BigInt;

/// Element type of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    /// `Int8Array`
    Int8,
    /// `Uint8Array`
    Uint8,
    /// `Uint8ClampedArray`
    Uint8Clamped,
    /// `Int16Array`
    Int16,
    /// `Uint16Array`
    Uint16,
    /// `Int32Array`
    Int32,
    /// `Uint32Array`
    Uint32,
    /// `Float16Array`
    Float16,
    /// `Float32Array`
    Float32,
    /// `Float64Array`
    Float64,
    /// `BigInt64Array`
    BigInt64,
    /// `BigUint64Array`
    BigUint64,
}

impl TypedArrayKind {
    /// Bytes per element
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 | Self::Float16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// True for the BigInt element types
    pub const fn is_bigint(self) -> bool {
        matches!(self, Self::BigInt64 | Self::BigUint64)
    }

    /// Constructor name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float16 => "Float16Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
        }
    }
}

/// Backing store of an `ArrayBuffer`
#[derive(Debug, Clone, Default)]
pub struct ArrayBufferData {
    /// Contents
    pub bytes: Vec<u8>,
    /// Set by `detach`; views read as empty afterwards
    pub detached: bool,
}

/// A typed array's view onto its buffer
#[derive(Debug, Clone)]
pub struct TypedArrayData {
    /// Element type
    pub kind: TypedArrayKind,
    /// The viewed `ArrayBuffer`
    pub buffer: ObjectRef,
    /// Start of the view in bytes
    pub byte_offset: usize,
    /// Element count
    pub length: u32,
}

impl Heap {
    fn typed_array_slot(&self, object: ObjectRef, index: u32) -> Option<(TypedArrayKind, ObjectRef, usize)> {
        let ObjectKind::TypedArray(view) = &self.get(object).kind else {
            return None;
        };
        if index >= view.length {
            return None;
        }
        match &self.get(view.buffer).kind {
            ObjectKind::ArrayBuffer(data) if !data.detached => {}
            _ => return None,
        }
        let start = view.byte_offset + index as usize * view.kind.element_size();
        Some((view.kind, view.buffer, start))
    }

    fn buffer_bytes(&self, buffer: ObjectRef) -> &[u8] {
        match &self.get(buffer).kind {
            ObjectKind::ArrayBuffer(data) => &data.bytes,
            _ => &[],
        }
    }

    fn buffer_bytes_mut(&mut self, buffer: ObjectRef) -> Option<&mut Vec<u8>> {
        match &mut self.get_mut(buffer).kind {
            ObjectKind::ArrayBuffer(data) => Some(&mut data.bytes),
            _ => None,
        }
    }

    /// Element `index`, or `None` when out of bounds or detached
    pub fn typed_array_get(&self, object: ObjectRef, index: u32) -> Option<Value> {
        let (kind, buffer, start) = self.typed_array_slot(object, index)?;
        let bytes = self.buffer_bytes(buffer).get(start..start + kind.element_size())?;
        let value = match kind {
            TypedArrayKind::Int8 => Value::Int32(i32::from(bytes[0] as i8)),
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => Value::Int32(i32::from(bytes[0])),
            TypedArrayKind::Int16 => Value::Int32(i32::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
            TypedArrayKind::Uint16 => Value::Int32(i32::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            TypedArrayKind::Int32 => Value::Int32(i32::from_le_bytes(bytes.try_into().ok()?)),
            TypedArrayKind::Uint32 => {
                Value::number(f64::from(u32::from_le_bytes(bytes.try_into().ok()?)))
            }
            TypedArrayKind::Float16 => {
                Value::number(f16::from_le_bytes([bytes[0], bytes[1]]).to_f64())
            }
            TypedArrayKind::Float32 => {
                Value::number(f64::from(f32::from_le_bytes(bytes.try_into().ok()?)))
            }
            TypedArrayKind::Float64 => Value::number(f64::from_le_bytes(bytes.try_into().ok()?)),
            TypedArrayKind::BigInt64 => {
                Value::bigint(BigInt::from(i64::from_le_bytes(bytes.try_into().ok()?)))
            }
            TypedArrayKind::BigUint64 => {
                Value::bigint(BigInt::from(u64::from_le_bytes(bytes.try_into().ok()?)))
            }
        };
        Some(value)
    }

    /// Store an integer into a numeric typed array
    ///
    /// Returns `false` when the write must go through the generic path.
    pub fn typed_array_write_int32(&mut self, object: ObjectRef, index: u32, value: i32) -> bool {
        match self.typed_array_slot(object, index) {
            Some((kind, _, _)) if kind.is_bigint() => false,
            Some(_) => {
                self.typed_array_write_number(object, index, f64::from(value));
                true
            }
            None => false,
        }
    }

    /// Store a number; out-of-bounds writes are dropped
    pub fn typed_array_write_number(&mut self, object: ObjectRef, index: u32, value: f64) {
        let Some((kind, buffer, start)) = self.typed_array_slot(object, index) else {
            return;
        };
        let encoded: Vec<u8> = match kind {
            TypedArrayKind::Int8 => vec![f64_to_int32(value) as i8 as u8],
            TypedArrayKind::Uint8 => vec![f64_to_int32(value) as u8],
            TypedArrayKind::Uint8Clamped => vec![clamp_to_u8(value)],
            TypedArrayKind::Int16 => (f64_to_int32(value) as i16).to_le_bytes().to_vec(),
            TypedArrayKind::Uint16 => (f64_to_int32(value) as u16).to_le_bytes().to_vec(),
            TypedArrayKind::Int32 => f64_to_int32(value).to_le_bytes().to_vec(),
            TypedArrayKind::Uint32 => (f64_to_int32(value) as u32).to_le_bytes().to_vec(),
            TypedArrayKind::Float16 => f16::from_f64(value).to_le_bytes().to_vec(),
            TypedArrayKind::Float32 => (value as f32).to_le_bytes().to_vec(),
            TypedArrayKind::Float64 => value.to_le_bytes().to_vec(),
            TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 => return,
        };
        self.write_bytes(buffer, start, &encoded);
    }

    /// Store a BigInt, wrapping modulo 2^64
    pub fn typed_array_write_bigint(&mut self, object: ObjectRef, index: u32, value: &BigInt) {
        let Some((kind, buffer, start)) = self.typed_array_slot(object, index) else {
            return;
        };
        if !kind.is_bigint() {
            return;
        }
        let mut bytes = value.to_signed_bytes_le();
        let fill = if value.sign() == num_bigint::Sign::Minus { 0xff } else { 0 };
        bytes.resize(8, fill);
        let encoded = [
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ];
        self.write_bytes(buffer, start, &encoded);
    }

    fn write_bytes(&mut self, buffer: ObjectRef, start: usize, encoded: &[u8]) {
        if let Some(bytes) = self.buffer_bytes_mut(buffer) {
            if let Some(target) = bytes.get_mut(start..start + encoded.len()) {
                target.copy_from_slice(encoded);
            }
        }
    }
}

/// ToUint8Clamp: round half to even, saturating
fn clamp_to_u8(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= 255.0 {
        return 255;
    }
    let floor = value.floor();
    let diff = value - floor;
    let rounded = if diff > 0.5 || (diff == 0.5 && floor % 2.0 != 0.0) {
        floor + 1.0
    } else {
        floor
    };
    rounded as u8
}

impl VmRuntime {
    /// Create an `ArrayBuffer` of `byte_length` zero bytes
    pub fn create_array_buffer(&mut self, byte_length: usize) -> ObjectRef {
        let proto = self.realm.intrinsics.array_buffer_prototype;
        self.heap.alloc_object(
            Some(proto),
            ObjectKind::ArrayBuffer(ArrayBufferData {
                bytes: vec![0; byte_length],
                detached: false,
            }),
        )
    }

    /// Create a zero-filled typed array with its own buffer
    pub fn create_typed_array(&mut self, kind: TypedArrayKind, length: u32) -> ObjectRef {
        let buffer = self.create_array_buffer(length as usize * kind.element_size());
        let proto = self.realm.intrinsics.typed_array_prototype;
        self.heap.alloc_object(
            Some(proto),
            ObjectKind::TypedArray(TypedArrayData {
                kind,
                buffer,
                byte_offset: 0,
                length,
            }),
        )
    }

    /// Detach an `ArrayBuffer`, dropping its contents
    pub fn detach_array_buffer(&mut self, buffer: ObjectRef) {
        if let ObjectKind::ArrayBuffer(data) = &mut self.heap.get_mut(buffer).kind {
            data.bytes = Vec::new();
            data.detached = true;
        }
    }

    /// Integer-indexed element set with full value conversion
    pub(crate) fn typed_array_set(&mut self, object: ObjectRef, index: u32, value: &Value) -> VmResult<()> {
        let kind = match &self.heap.get(object).kind {
            ObjectKind::TypedArray(view) => view.kind,
            _ => return Ok(()),
        };
        if kind.is_bigint() {
            let n = self.to_bigint(value)?;
            self.heap.typed_array_write_bigint(object, index, &n);
        } else {
            let n = self.to_number(value)?;
            self.heap.typed_array_write_number(object, index, n);
        }
        Ok(())
    }
}
