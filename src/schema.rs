//! Message schemas and the numeric/general field classifier.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest field number the protobuf wire format can address.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Declared type of a schema field.
///
/// `Message` and `Map` can be declared but are rejected by [`classify`]:
/// the field-by-field diff has no meaning for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
    Map,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Uint32 => "uint32",
            FieldType::Uint64 => "uint64",
            FieldType::Sint32 => "sint32",
            FieldType::Sint64 => "sint64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Sfixed32 => "sfixed32",
            FieldType::Sfixed64 => "sfixed64",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
            FieldType::Enum => "enum",
            FieldType::Message => "message",
            FieldType::Map => "map",
        }
    }

    /// The float width this type is delta encoded with, if it is a float.
    pub fn float_width(&self) -> Option<FloatWidth> {
        match self {
            FieldType::Double => Some(FloatWidth::F64),
            FieldType::Float => Some(FloatWidth::F32),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Width of a numeric (XOR compressed) field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub number: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub repeated: bool,
}

impl FieldDescriptor {
    pub fn new(number: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            number,
            name: name.into(),
            field_type,
            repeated: false,
        }
    }

    /// Marks the field as repeated.
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }
}

/// An immutable, validated message schema.
///
/// Fields keep their declaration order; that order fixes the order numeric
/// fields appear in every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct Schema {
    name: String,
    fields: Vec<FieldDescriptor>,
    max_field_number: u32,
}

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl TryFrom<SchemaDef> for Schema {
    type Error = Error;

    fn try_from(def: SchemaDef) -> Result<Self> {
        Schema::new(def.name, def.fields)
    }
}

impl From<Schema> for SchemaDef {
    fn from(schema: Schema) -> Self {
        SchemaDef {
            name: schema.name,
            fields: schema.fields,
        }
    }
}

impl Schema {
    /// Builds a schema, checking that field numbers are unique and in
    /// `1..=MAX_FIELD_NUMBER`.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.number == 0 || field.number > MAX_FIELD_NUMBER {
                return Err(Error::InvalidSchema {
                    reason: format!(
                        "field '{}' has number {} outside 1..={}",
                        field.name, field.number, MAX_FIELD_NUMBER
                    ),
                });
            }
            if !seen.insert(field.number) {
                return Err(Error::InvalidSchema {
                    reason: format!("field number {} is declared twice", field.number),
                });
            }
        }
        let max_field_number = fields.iter().map(|f| f.number).max().unwrap_or(0);
        Ok(Self {
            name: name.into(),
            fields,
            max_field_number,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn contains(&self, number: u32) -> bool {
        self.field(number).is_some()
    }

    /// Highest declared field number, or 0 for an empty schema.
    pub fn max_field_number(&self) -> u32 {
        self.max_field_number
    }
}

/// A field compressed with the float XOR codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericField {
    pub number: u32,
    pub width: FloatWidth,
}

/// The result of [`classify`]: numeric fields and general fields, each in
/// schema declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPartition {
    pub numeric: Vec<NumericField>,
    pub general: Vec<u32>,
}

impl FieldPartition {
    pub fn is_numeric(&self, number: u32) -> bool {
        self.numeric.iter().any(|f| f.number == number)
    }

    pub fn is_general(&self, number: u32) -> bool {
        self.general.contains(&number)
    }
}

/// Splits a schema into float fields (XOR compressed) and everything else
/// (diffed and re-serialized).
///
/// Repeated, map and nested message fields are rejected.
pub fn classify(schema: &Schema) -> Result<FieldPartition> {
    let mut numeric = Vec::new();
    let mut general = Vec::new();
    for field in schema.fields() {
        if field.repeated {
            return Err(Error::UnsupportedSchema {
                field: field.number,
                reason: "repeated fields are not supported",
            });
        }
        match field.field_type {
            FieldType::Message => {
                return Err(Error::UnsupportedSchema {
                    field: field.number,
                    reason: "nested message fields are not supported",
                })
            }
            FieldType::Map => {
                return Err(Error::UnsupportedSchema {
                    field: field.number,
                    reason: "map fields are not supported",
                })
            }
            _ => {}
        }
        match field.field_type.float_width() {
            Some(width) => numeric.push(NumericField {
                number: field.number,
                width,
            }),
            None => general.push(field.number),
        }
    }
    Ok(FieldPartition { numeric, general })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_schema() -> Schema {
        Schema::new(
            "sensor",
            vec![
                FieldDescriptor::new(3, "host", FieldType::String),
                FieldDescriptor::new(1, "cpu", FieldType::Double),
                FieldDescriptor::new(7, "temp", FieldType::Float),
                FieldDescriptor::new(2, "up", FieldType::Bool),
                FieldDescriptor::new(5, "mem", FieldType::Double),
            ],
        )
        .unwrap()
    }

    #[test]
    fn classify_keeps_declaration_order() {
        let partition = classify(&sensor_schema()).unwrap();
        assert_eq!(
            partition.numeric,
            vec![
                NumericField { number: 1, width: FloatWidth::F64 },
                NumericField { number: 7, width: FloatWidth::F32 },
                NumericField { number: 5, width: FloatWidth::F64 },
            ]
        );
        assert_eq!(partition.general, vec![3, 2]);
        assert!(partition.is_numeric(7));
        assert!(partition.is_general(2));
        assert!(!partition.is_general(1));
    }

    #[test]
    fn classify_rejects_unsupported_fields() {
        let repeated = Schema::new(
            "r",
            vec![FieldDescriptor::new(1, "xs", FieldType::Double).repeated()],
        )
        .unwrap();
        assert!(matches!(
            classify(&repeated),
            Err(Error::UnsupportedSchema { field: 1, .. })
        ));

        let nested = Schema::new(
            "n",
            vec![
                FieldDescriptor::new(1, "v", FieldType::Double),
                FieldDescriptor::new(4, "inner", FieldType::Message),
            ],
        )
        .unwrap();
        assert!(matches!(
            classify(&nested),
            Err(Error::UnsupportedSchema { field: 4, .. })
        ));

        let map = Schema::new("m", vec![FieldDescriptor::new(2, "labels", FieldType::Map)]).unwrap();
        assert!(matches!(
            classify(&map),
            Err(Error::UnsupportedSchema { field: 2, .. })
        ));
    }

    #[test]
    fn schema_validation() {
        assert!(matches!(
            Schema::new("z", vec![FieldDescriptor::new(0, "zero", FieldType::Bool)]),
            Err(Error::InvalidSchema { .. })
        ));
        assert!(matches!(
            Schema::new(
                "dup",
                vec![
                    FieldDescriptor::new(1, "a", FieldType::Bool),
                    FieldDescriptor::new(1, "b", FieldType::Bool),
                ]
            ),
            Err(Error::InvalidSchema { .. })
        ));
        assert!(Schema::new(
            "big",
            vec![FieldDescriptor::new(MAX_FIELD_NUMBER + 1, "x", FieldType::Bool)]
        )
        .is_err());
    }

    #[test]
    fn lookups() {
        let schema = sensor_schema();
        assert_eq!(schema.name(), "sensor");
        assert_eq!(schema.max_field_number(), 7);
        assert_eq!(schema.field(7).map(|f| f.field_type), Some(FieldType::Float));
        assert!(!schema.contains(4));
        let empty = Schema::new("empty", Vec::new()).unwrap();
        assert_eq!(empty.max_field_number(), 0);
    }
}
