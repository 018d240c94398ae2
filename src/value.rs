//! Field values, the generic field-map message and the capability trait the
//! codec is written against.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::schema::{FieldType, Schema};
use crate::wire;

/// A single field value.
///
/// Equality compares floats by bit pattern, so `NaN == NaN` when the payloads
/// match and `0.0 != -0.0`. Two values are equal exactly when they serialize
/// to the same bytes.
#[derive(Debug, Clone)]
pub enum Value {
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Enum(i32),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Double(_) => "double",
            Value::Float(_) => "float",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
        }
    }

    /// Returns `true` if this value can be stored in a field of type `ty`.
    pub fn fits(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Value::Double(_), FieldType::Double)
                | (Value::Float(_), FieldType::Float)
                | (
                    Value::Int32(_),
                    FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32
                )
                | (
                    Value::Int64(_),
                    FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64
                )
                | (Value::Uint32(_), FieldType::Uint32 | FieldType::Fixed32)
                | (Value::Uint64(_), FieldType::Uint64 | FieldType::Fixed64)
                | (Value::Bool(_), FieldType::Bool)
                | (Value::String(_), FieldType::String)
                | (Value::Bytes(_), FieldType::Bytes)
                | (Value::Enum(_), FieldType::Enum)
        )
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Uint64(a), Value::Uint64(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Field access the codec needs from a message.
///
/// Implemented by [`Message`] and by any hand-written record type. The codec
/// never mutates the values it encodes.
pub trait StructuredValue {
    /// Returns the value of field `number`, or `None` if it is absent.
    fn get_field(&self, number: u32) -> Option<Cow<'_, Value>>;

    /// Stores `value` in field `number`.
    fn set_field(&mut self, number: u32, value: Value) -> Result<()>;

    /// Makes field `number` absent.
    fn clear_field(&mut self, number: u32);

    /// Numbers of all present fields.
    fn field_numbers(&self) -> Vec<u32>;

    /// Serializes the present fields in protobuf wire form.
    fn marshal(&self, schema: &Schema) -> Result<Vec<u8>> {
        wire::marshal(self, schema)
    }
}

/// A message as a map from field number to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: BTreeMap<u32, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, number: u32, value: impl Into<Value>) -> Self {
        self.fields.insert(number, value.into());
        self
    }

    pub fn get(&self, number: u32) -> Option<&Value> {
        self.fields.get(&number)
    }

    pub fn insert(&mut self, number: u32, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(number, value.into())
    }

    pub fn remove(&mut self, number: u32) -> Option<Value> {
        self.fields.remove(&number)
    }

    pub fn contains(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in ascending field-number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }
}

impl StructuredValue for Message {
    fn get_field(&self, number: u32) -> Option<Cow<'_, Value>> {
        self.fields.get(&number).map(Cow::Borrowed)
    }

    fn set_field(&mut self, number: u32, value: Value) -> Result<()> {
        self.fields.insert(number, value);
        Ok(())
    }

    fn clear_field(&mut self, number: u32) {
        self.fields.remove(&number);
    }

    fn field_numbers(&self) -> Vec<u32> {
        self.fields.keys().copied().collect()
    }
}

impl FromIterator<(u32, Value)> for Message {
    fn from_iter<I: IntoIterator<Item = (u32, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Copies every field of `src` into a fresh `M`.
pub(crate) fn convert<M: StructuredValue + Default>(src: &Message) -> Result<M> {
    let mut out = M::default();
    for (number, value) in src.iter() {
        out.set_field(number, value.clone())?;
    }
    Ok(out)
}

/// Checks `value` against the declared type of field `number`.
pub(crate) fn check_type(schema: &Schema, number: u32, value: &Value) -> Result<()> {
    let field = schema
        .field(number)
        .ok_or(Error::UnknownField { field: number })?;
    if value.fits(field.field_type) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            field: number,
            expected: field.field_type,
            found: value.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        let quiet = f32::from_bits(0x7FC0_0001);
        let other = f32::from_bits(0x7FC0_0002);
        assert_ne!(Value::Float(quiet), Value::Float(other));
        assert_ne!(Value::Int32(1), Value::Enum(1));
    }

    #[test]
    fn fits_declared_types() {
        assert!(Value::Int32(-1).fits(FieldType::Sint32));
        assert!(Value::Uint64(1).fits(FieldType::Fixed64));
        assert!(!Value::Double(1.0).fits(FieldType::Float));
        assert!(!Value::Int64(1).fits(FieldType::Int32));
        assert!(!Value::Bool(true).fits(FieldType::Message));
    }

    #[test]
    fn message_builder_and_trait() {
        let mut msg = Message::new().with(2, "a").with(1, 10.0);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.field_numbers(), vec![1, 2]);
        assert_eq!(
            msg.get_field(2).as_deref(),
            Some(&Value::String("a".into()))
        );

        msg.set_field(3, Value::Bool(true)).unwrap();
        msg.clear_field(1);
        assert!(!msg.contains(1));
        assert_eq!(msg.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec![2, 3]);
    }
}
