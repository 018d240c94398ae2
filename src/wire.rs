//! Protobuf wire encoding for the general-field payload.
//!
//! Each present field is written as a key (`number << 3 | wire_type`) followed
//! by its value, in ascending field-number order. Presence is explicit: a field
//! holding its type's default value is still written.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::schema::{FieldDescriptor, FieldType, Schema, MAX_FIELD_NUMBER};
use crate::value::{check_type, Message, StructuredValue, Value};
use crate::varint::{
    read_uvarint, write_uvarint, zigzag_decode32, zigzag_decode64, zigzag_encode32,
    zigzag_encode64,
};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

fn wire_type(ty: FieldType) -> Option<u8> {
    match ty {
        FieldType::Int32
        | FieldType::Int64
        | FieldType::Uint32
        | FieldType::Uint64
        | FieldType::Sint32
        | FieldType::Sint64
        | FieldType::Bool
        | FieldType::Enum => Some(WIRE_VARINT),
        FieldType::Double | FieldType::Fixed64 | FieldType::Sfixed64 => Some(WIRE_FIXED64),
        FieldType::Float | FieldType::Fixed32 | FieldType::Sfixed32 => Some(WIRE_FIXED32),
        FieldType::String | FieldType::Bytes => Some(WIRE_LEN),
        FieldType::Message | FieldType::Map => None,
    }
}

/// Serializes every present field of `message`.
///
/// Fails if the message holds a field the schema does not declare or a value
/// that does not match its declared type.
pub fn marshal<M: StructuredValue + ?Sized>(message: &M, schema: &Schema) -> Result<Vec<u8>> {
    let mut numbers = message.field_numbers();
    numbers.sort_unstable();

    let mut buf = Vec::new();
    for number in numbers {
        let field = schema
            .field(number)
            .ok_or(Error::UnknownField { field: number })?;
        let Some(value) = message.get_field(number) else {
            continue;
        };
        write_field(&mut buf, field, &value)?;
    }
    Ok(buf)
}

fn write_field(buf: &mut Vec<u8>, field: &FieldDescriptor, value: &Value) -> Result<()> {
    let marshal_err = |reason: String| Error::Marshal {
        field: field.number,
        reason,
    };
    if field.repeated {
        return Err(marshal_err("repeated fields are not supported".into()));
    }
    let wt = wire_type(field.field_type)
        .ok_or_else(|| marshal_err(format!("{} fields are not supported", field.field_type)))?;
    check_type_of(field, value)?;

    write_uvarint(buf, ((field.number as u64) << 3) | wt as u64);
    let io = |e: std::io::Error| marshal_err(e.to_string());
    match (field.field_type, value) {
        (FieldType::Sint32, Value::Int32(v)) => write_uvarint(buf, zigzag_encode32(*v) as u64),
        (FieldType::Sint64, Value::Int64(v)) => write_uvarint(buf, zigzag_encode64(*v)),
        (FieldType::Sfixed32, Value::Int32(v)) => buf.write_i32::<LittleEndian>(*v).map_err(io)?,
        (FieldType::Sfixed64, Value::Int64(v)) => buf.write_i64::<LittleEndian>(*v).map_err(io)?,
        (FieldType::Fixed32, Value::Uint32(v)) => buf.write_u32::<LittleEndian>(*v).map_err(io)?,
        (FieldType::Fixed64, Value::Uint64(v)) => buf.write_u64::<LittleEndian>(*v).map_err(io)?,
        (_, Value::Double(v)) => buf.write_u64::<LittleEndian>(v.to_bits()).map_err(io)?,
        (_, Value::Float(v)) => buf.write_u32::<LittleEndian>(v.to_bits()).map_err(io)?,
        // Negative int32 and enum values are sign-extended to ten bytes.
        (_, Value::Int32(v)) | (_, Value::Enum(v)) => write_uvarint(buf, *v as i64 as u64),
        (_, Value::Int64(v)) => write_uvarint(buf, *v as u64),
        (_, Value::Uint32(v)) => write_uvarint(buf, *v as u64),
        (_, Value::Uint64(v)) => write_uvarint(buf, *v),
        (_, Value::Bool(v)) => write_uvarint(buf, *v as u64),
        (_, Value::String(s)) => {
            write_uvarint(buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        (_, Value::Bytes(b)) => {
            write_uvarint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
    }
    Ok(())
}

fn check_type_of(field: &FieldDescriptor, value: &Value) -> Result<()> {
    if value.fits(field.field_type) {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            field: field.number,
            expected: field.field_type,
            found: value.kind(),
        })
    }
}

/// Parses a payload produced by [`marshal`].
///
/// Unknown field numbers, mismatched wire types and truncated values are
/// errors. When a key repeats, the last value wins.
pub fn unmarshal(bytes: &[u8], schema: &Schema) -> Result<Message> {
    let mut buf = bytes;
    let mut message = Message::new();
    while !buf.is_empty() {
        let key = read_uvarint(&mut buf)
            .map_err(|e| Error::unmarshal(format!("reading field key: {e}")))?;
        let number = key >> 3;
        let wt = (key & 0x7) as u8;
        if number == 0 || number > MAX_FIELD_NUMBER as u64 {
            return Err(Error::unmarshal(format!("invalid field number {number}")));
        }
        let number = number as u32;
        let field = schema
            .field(number)
            .ok_or_else(|| Error::unmarshal(format!("field {number} is not in the schema")))?;
        let expected = wire_type(field.field_type).ok_or_else(|| {
            Error::unmarshal(format!("field {number} has unsupported type {}", field.field_type))
        })?;
        if wt != expected {
            return Err(Error::unmarshal(format!(
                "field {number} has wire type {wt}, expected {expected}"
            )));
        }
        let value = read_value(&mut buf, field.field_type)
            .map_err(|e| Error::unmarshal(format!("field {number}: {e}")))?;
        message.insert(number, value);
    }
    Ok(message)
}

fn read_value(buf: &mut &[u8], ty: FieldType) -> std::io::Result<Value> {
    use std::io::{Error as IoError, ErrorKind};

    let value = match ty {
        FieldType::Double => Value::Double(f64::from_bits(buf.read_u64::<LittleEndian>()?)),
        FieldType::Float => Value::Float(f32::from_bits(buf.read_u32::<LittleEndian>()?)),
        FieldType::Fixed64 => Value::Uint64(buf.read_u64::<LittleEndian>()?),
        FieldType::Sfixed64 => Value::Int64(buf.read_i64::<LittleEndian>()?),
        FieldType::Fixed32 => Value::Uint32(buf.read_u32::<LittleEndian>()?),
        FieldType::Sfixed32 => Value::Int32(buf.read_i32::<LittleEndian>()?),
        FieldType::Int32 => Value::Int32(read_uvarint(buf)? as i32),
        FieldType::Int64 => Value::Int64(read_uvarint(buf)? as i64),
        FieldType::Uint32 => Value::Uint32(read_uvarint(buf)? as u32),
        FieldType::Uint64 => Value::Uint64(read_uvarint(buf)?),
        FieldType::Sint32 => Value::Int32(zigzag_decode32(read_uvarint(buf)? as u32)),
        FieldType::Sint64 => Value::Int64(zigzag_decode64(read_uvarint(buf)?)),
        FieldType::Bool => Value::Bool(read_uvarint(buf)? != 0),
        FieldType::Enum => Value::Enum(read_uvarint(buf)? as i32),
        FieldType::String | FieldType::Bytes => {
            let len = read_uvarint(buf)?;
            if len > buf.len() as u64 {
                return Err(IoError::new(
                    ErrorKind::UnexpectedEof,
                    format!("length {len} exceeds the {} remaining bytes", buf.len()),
                ));
            }
            let (data, rest) = buf.split_at(len as usize);
            *buf = rest;
            if ty == FieldType::String {
                let s = std::str::from_utf8(data)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
                Value::String(s.to_owned())
            } else {
                Value::Bytes(data.to_vec())
            }
        }
        FieldType::Message | FieldType::Map => {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("{ty} fields are not supported"),
            ))
        }
    };
    Ok(value)
}

/// Checks every present field of `message` against the schema.
pub(crate) fn validate<M: StructuredValue + ?Sized>(message: &M, schema: &Schema) -> Result<()> {
    for number in message.field_numbers() {
        if let Some(value) = message.get_field(number) {
            check_type(schema, number, &value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "all",
            vec![
                FieldDescriptor::new(1, "i32", FieldType::Int32),
                FieldDescriptor::new(2, "s", FieldType::String),
                FieldDescriptor::new(3, "z32", FieldType::Sint32),
                FieldDescriptor::new(4, "d", FieldType::Double),
                FieldDescriptor::new(5, "f", FieldType::Float),
                FieldDescriptor::new(6, "u64", FieldType::Uint64),
                FieldDescriptor::new(7, "z64", FieldType::Sint64),
                FieldDescriptor::new(8, "fx32", FieldType::Fixed32),
                FieldDescriptor::new(9, "sfx64", FieldType::Sfixed64),
                FieldDescriptor::new(10, "b", FieldType::Bool),
                FieldDescriptor::new(11, "raw", FieldType::Bytes),
                FieldDescriptor::new(12, "kind", FieldType::Enum),
                FieldDescriptor::new(13, "i64", FieldType::Int64),
                FieldDescriptor::new(14, "u32", FieldType::Uint32),
                FieldDescriptor::new(15, "fx64", FieldType::Fixed64),
                FieldDescriptor::new(16, "sfx32", FieldType::Sfixed32),
            ],
        )
        .unwrap()
    }

    #[test]
    fn matches_protobuf_reference_bytes() {
        let s = schema();
        let msg = Message::new().with(1, 150i32);
        assert_eq!(marshal(&msg, &s).unwrap(), vec![0x08, 0x96, 0x01]);

        let msg = Message::new().with(2, "testing");
        let mut expected = vec![0x12, 0x07];
        expected.extend_from_slice(b"testing");
        assert_eq!(marshal(&msg, &s).unwrap(), expected);

        let msg = Message::new().with(3, -1i32);
        assert_eq!(marshal(&msg, &s).unwrap(), vec![0x18, 0x01]);

        let msg = Message::new().with(1, -1i32);
        let bytes = marshal(&msg, &s).unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[0], 0x08);
        assert_eq!(bytes[10], 0x01);
    }

    #[test]
    fn fields_written_in_number_order() {
        let s = schema();
        let msg = Message::new().with(10, false).with(1, 0i32);
        assert_eq!(marshal(&msg, &s).unwrap(), vec![0x08, 0x00, 0x50, 0x00]);
    }

    #[test]
    fn every_type_survives_unmarshal() {
        let s = schema();
        let msg = Message::new()
            .with(1, i32::MIN)
            .with(2, "héllo")
            .with(3, -12345i32)
            .with(4, Value::Double(f64::from_bits(0x7FF8_0000_0000_BEEF)))
            .with(5, -0.0f32)
            .with(6, u64::MAX)
            .with(7, i64::MIN)
            .with(8, Value::Uint32(0xDEAD_BEEF))
            .with(9, Value::Int64(-7))
            .with(10, true)
            .with(11, vec![0u8, 1, 2, 255])
            .with(12, Value::Enum(-3))
            .with(13, Value::Int64(1 << 40))
            .with(14, Value::Uint32(u32::MAX))
            .with(15, Value::Uint64(42))
            .with(16, Value::Int32(-42));
        let bytes = marshal(&msg, &s).unwrap();
        assert_eq!(unmarshal(&bytes, &s).unwrap(), msg);
    }

    #[test]
    fn empty_payload_is_empty_message() {
        assert!(unmarshal(&[], &schema()).unwrap().is_empty());
        assert!(marshal(&Message::new(), &schema()).unwrap().is_empty());
    }

    #[test]
    fn marshal_rejects_bad_values() {
        let s = schema();
        assert!(matches!(
            marshal(&Message::new().with(2, 1.5), &s),
            Err(Error::TypeMismatch { field: 2, expected: FieldType::String, found: "double" })
        ));
        assert!(matches!(
            marshal(&Message::new().with(99, true), &s),
            Err(Error::UnknownField { field: 99 })
        ));
    }

    #[test]
    fn unmarshal_rejects_malformed_input() {
        let s = schema();
        // Field 99 is not declared.
        assert!(matches!(unmarshal(&[0x98, 0x06, 0x01], &s), Err(Error::Unmarshal { .. })));
        // Field 1 with the length-delimited wire type.
        assert!(matches!(unmarshal(&[0x0A, 0x00], &s), Err(Error::Unmarshal { .. })));
        // String claims 5 bytes, 2 present.
        assert!(matches!(unmarshal(&[0x12, 0x05, b'a', b'b'], &s), Err(Error::Unmarshal { .. })));
        // Invalid UTF-8.
        assert!(matches!(unmarshal(&[0x12, 0x01, 0xFF], &s), Err(Error::Unmarshal { .. })));
        // Truncated double.
        assert!(matches!(unmarshal(&[0x21, 0x00, 0x00], &s), Err(Error::Unmarshal { .. })));
        // Field number 0.
        assert!(matches!(unmarshal(&[0x00, 0x00], &s), Err(Error::Unmarshal { .. })));
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let s = schema();
        let msg = unmarshal(&[0x08, 0x01, 0x08, 0x02], &s).unwrap();
        assert_eq!(msg.get(1), Some(&Value::Int32(2)));
    }
}
