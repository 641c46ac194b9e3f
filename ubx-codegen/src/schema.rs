// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Schema model and validator.
//!
//! A schema record describes one UBX message: its class/id pair, its
//! payload length policy, and an ordered field list. Records are read
//! from the corpus as JSON and validated into [`MessageSchema`], the
//! input of the layout resolver.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// UBX wire types, as spelled in the interface descriptions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UbxType {
    U1,
    U2,
    U4,
    I1,
    I2,
    I4,
    I8,
    X1,
    X2,
    X4,
    R4,
    R8,
}

impl UbxType {
    /// Size of the type on the wire, in bytes.
    pub fn width(self) -> usize {
        match self {
            UbxType::U1 | UbxType::I1 | UbxType::X1 => 1,
            UbxType::U2 | UbxType::I2 | UbxType::X2 => 2,
            UbxType::U4 | UbxType::I4 | UbxType::X4 | UbxType::R4 => 4,
            UbxType::I8 | UbxType::R8 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, UbxType::I1 | UbxType::I2 | UbxType::I4 | UbxType::I8)
    }

    pub fn is_float(self) -> bool {
        matches!(self, UbxType::R4 | UbxType::R8)
    }

    /// True for the unsigned integer types (U and X families).
    pub fn is_unsigned(self) -> bool {
        !self.is_signed() && !self.is_float()
    }

    /// Largest raw value representable by an unsigned type.
    pub fn max_unsigned(self) -> u64 {
        debug_assert!(self.is_unsigned());
        match self.width() {
            1 => u8::MAX as u64,
            2 => u16::MAX as u64,
            4 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }

    /// The Rust type the field maps to in generated code.
    pub fn rust_type(self) -> &'static str {
        match self {
            UbxType::U1 | UbxType::X1 => "u8",
            UbxType::U2 | UbxType::X2 => "u16",
            UbxType::U4 | UbxType::X4 => "u32",
            UbxType::I1 => "i8",
            UbxType::I2 => "i16",
            UbxType::I4 => "i32",
            UbxType::I8 => "i64",
            UbxType::R4 => "f32",
            UbxType::R8 => "f64",
        }
    }
}

impl std::str::FromStr for UbxType {
    type Err = ();

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(match token {
            "U1" => UbxType::U1,
            "U2" => UbxType::U2,
            "U4" => UbxType::U4,
            "I1" => UbxType::I1,
            "I2" => UbxType::I2,
            "I4" => UbxType::I4,
            "I8" => UbxType::I8,
            "X1" => UbxType::X1,
            "X2" => UbxType::X2,
            "X4" => UbxType::X4,
            "R4" => UbxType::R4,
            "R8" => UbxType::R8,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for UbxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Message identifier: the class/id byte pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MessageId {
    pub class: u8,
    pub id: u8,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}/{:#04x}", self.class, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// The payload always has exactly this many bytes.
    Fixed(usize),
    /// The payload starts with `prefix_len` fixed bytes followed by a
    /// repeated trailing group.
    Variable { prefix_len: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumValueSchema {
    pub name: String,
    pub value: u64,
    pub description: Option<String>,
}

/// Declared domain of an enum-mapped field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDomain {
    /// Type name used for the generated enum declaration.
    pub type_name: String,
    pub values: Vec<EnumValueSchema>,
}

impl EnumDomain {
    pub fn contains(&self, raw: u64) -> bool {
        self.values.iter().any(|v| v.value == raw)
    }

    /// Smallest raw value outside the declared domain, used by the
    /// valid-mode strategy to exercise the decoder fallback path.
    pub fn known_invalid_raw(&self, underlying: UbxType) -> Option<u64> {
        (0..=underlying.max_unsigned()).find(|raw| !self.contains(*raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitSchema {
    pub name: String,
    pub bit_start: usize,
    pub bit_end: usize,
    pub description: Option<String>,
    pub reserved: bool,
}

impl BitSchema {
    pub fn bit_width(&self) -> usize {
        self.bit_end - self.bit_start + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar {
        ty: UbxType,
    },
    ByteArray {
        elem: UbxType,
        count: usize,
    },
    /// A scalar container carved into named bit ranges.
    BitField {
        container: UbxType,
        bits: Vec<BitSchema>,
    },
    /// A scalar interpreted against a closed set of named raw values.
    EnumMapped {
        underlying: UbxType,
        domain: EnumDomain,
    },
    /// A variable number of identical sub-records, count taken from
    /// an earlier field.
    RepeatedGroup {
        count_field: String,
        fields: Vec<FieldSchema>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub description: Option<String>,
    pub reserved: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSchema {
    /// Wire size of the field, `None` for repeated groups.
    pub fn fixed_size(&self) -> Option<usize> {
        match &self.kind {
            FieldKind::Scalar { ty } => Some(ty.width()),
            FieldKind::ByteArray { elem, count } => Some(elem.width() * count),
            FieldKind::BitField { container, .. } => Some(container.width()),
            FieldKind::EnumMapped { underlying, .. } => Some(underlying.width()),
            FieldKind::RepeatedGroup { .. } => None,
        }
    }
}

/// A validated message schema, ready for layout resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSchema {
    /// Mnemonic without the `UBX-` prefix, e.g. `MON-RXBUF`.
    pub name: String,
    pub description: Option<String>,
    pub ident: MessageId,
    pub payload_kind: PayloadKind,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message {message}: invalid {what} byte {value:?}")]
    BadIdentifier { message: String, what: &'static str, value: String },
    #[error("message {message}: field {field} has unrecognized type {token:?}")]
    UnrecognizedType { message: String, field: String, token: String },
    #[error("message {message}: field {field} has no data type")]
    MissingType { message: String, field: String },
    #[error("message {message}: duplicate field name {field}")]
    DuplicateField { message: String, field: String },
    #[error("message {message}: field {field} of type {container} cannot carry bits")]
    BadBitContainer { message: String, field: String, container: UbxType },
    #[error(
        "message {message}: bit range {bit}[{start}..={end}] does not fit a {container} container"
    )]
    BitRangeOutOfBounds {
        message: String,
        bit: String,
        start: usize,
        end: usize,
        container: UbxType,
    },
    #[error("message {message}: bit ranges {first} and {second} overlap in field {field}")]
    BitRangeOverlap { message: String, field: String, first: String, second: String },
    #[error("message {message}: enum field {field} has an empty domain")]
    EmptyEnumDomain { message: String, field: String },
    #[error("message {message}: enum value {value:#x} does not fit the {underlying} width of field {field}")]
    EnumValueOutOfRange { message: String, field: String, value: u64, underlying: UbxType },
    #[error("message {message}: enum field {field} declares {value:#x} twice")]
    DuplicateEnumValue { message: String, field: String, value: u64 },
    #[error("message {message}: field {field} of type {underlying} cannot be enum-mapped")]
    BadEnumUnderlying { message: String, field: String, underlying: UbxType },
    #[error("message {message}: group {field} count source {count_field} is not an earlier unsigned scalar field")]
    BadCountSource { message: String, field: String, count_field: String },
    #[error("message {message}: repeated group {field} must be the trailing field")]
    GroupNotTrailing { message: String, field: String },
    #[error("message {message}: repeated group {field} nests another repeated group")]
    NestedGroup { message: String, field: String },
    #[error("message {message}: repeated group {field} is empty")]
    EmptyGroup { message: String, field: String },
    #[error("message {message}: repeated group {field} has zero-size instances")]
    ZeroSizeGroup { message: String, field: String },
    #[error(
        "message {message}: declared payload length {declared} does not match the field list size {actual}"
    )]
    PayloadLengthMismatch { message: String, declared: usize, actual: usize },
    #[error("message {message}: declared fixed payload length but a repeated group is present")]
    FixedWithGroup { message: String },
}

/// Raw, unvalidated form of one corpus record.
///
/// Mirrors the JSON layout of the schema corpus; identifiers may be
/// numbers or `"0x.."` strings, and field types may be a bare type
/// token or an `{array_of, count}` object.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub name: String,
    pub class_id: RawByte,
    pub message_id: RawByte,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payload_length: Option<usize>,
    #[serde(default)]
    pub fields: Vec<RawField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<RawDataType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub bitfield: Option<RawBitfield>,
    #[serde(default)]
    pub enumeration: Option<RawEnumeration>,
    #[serde(default)]
    pub repeat: Option<RawRepeat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDataType {
    Simple(String),
    Array { array_of: String, count: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBitfield {
    pub bits: Vec<RawBit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBit {
    pub name: String,
    pub bit_start: usize,
    pub bit_end: usize,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reserved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEnumeration {
    #[serde(default)]
    pub name: Option<String>,
    pub values: Vec<RawEnumValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEnumValue {
    pub name: String,
    pub value: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRepeat {
    pub count_field: String,
    pub fields: Vec<RawField>,
}

/// Identifier byte, either a JSON number or a `"0x.."` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawByte {
    Int(u64),
    Text(String),
}

impl RawByte {
    fn to_u8(&self) -> Option<u8> {
        match self {
            RawByte::Int(value) => u8::try_from(*value).ok(),
            RawByte::Text(text) => {
                let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
                u8::from_str_radix(digits, 16).ok()
            }
        }
    }
}

impl MessageSchema {
    /// Parse and validate one corpus record from JSON text.
    pub fn parse(text: &str) -> Result<MessageSchema, SchemaValidationError> {
        let raw: RawMessage = serde_json::from_str(text)?;
        validate(&raw)
    }

    /// Mnemonic converted to a Rust type name, e.g. `MonRxbuf`.
    pub fn struct_name(&self) -> String {
        use heck::ToUpperCamelCase;
        self.name.replace('-', "_").to_upper_camel_case()
    }

    /// Mnemonic converted to a module/file name, e.g. `mon_rxbuf`.
    pub fn module_name(&self) -> String {
        use heck::ToSnakeCase;
        self.name.replace('-', "_").to_snake_case()
    }
}

/// Validate a raw record into a [`MessageSchema`].
///
/// Pure function; a failure is local to this one record and never
/// affects the rest of a corpus batch.
pub fn validate(raw: &RawMessage) -> Result<MessageSchema, SchemaValidationError> {
    let name = raw.name.strip_prefix("UBX-").unwrap_or(&raw.name).to_owned();

    let class = raw.class_id.to_u8().ok_or_else(|| SchemaValidationError::BadIdentifier {
        message: name.clone(),
        what: "class",
        value: format!("{:?}", raw.class_id),
    })?;
    let id = raw.message_id.to_u8().ok_or_else(|| SchemaValidationError::BadIdentifier {
        message: name.clone(),
        what: "id",
        value: format!("{:?}", raw.message_id),
    })?;

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(raw.fields.len());
    for (index, field) in raw.fields.iter().enumerate() {
        let trailing = index + 1 == raw.fields.len();
        let validated = validate_field(&name, field, &fields, &mut seen, trailing, true)?;
        fields.push(validated);
    }

    // Fixed size of everything before a trailing group, which is the
    // whole payload when no group is present.
    let prefix_len: usize = fields.iter().filter_map(FieldSchema::fixed_size).sum();
    let has_group =
        fields.iter().any(|f| matches!(f.kind, FieldKind::RepeatedGroup { .. }));

    let payload_kind = if has_group {
        if raw.payload_length.is_some() {
            return Err(SchemaValidationError::FixedWithGroup { message: name });
        }
        PayloadKind::Variable { prefix_len }
    } else {
        if let Some(declared) = raw.payload_length {
            if declared != prefix_len {
                return Err(SchemaValidationError::PayloadLengthMismatch {
                    message: name,
                    declared,
                    actual: prefix_len,
                });
            }
        }
        PayloadKind::Fixed(prefix_len)
    };

    Ok(MessageSchema {
        name,
        description: raw.description.clone(),
        ident: MessageId { class, id },
        payload_kind,
        fields,
    })
}

fn validate_field(
    message: &str,
    raw: &RawField,
    earlier: &[FieldSchema],
    seen: &mut HashSet<String>,
    trailing: bool,
    allow_group: bool,
) -> Result<FieldSchema, SchemaValidationError> {
    if !seen.insert(raw.name.clone()) {
        return Err(SchemaValidationError::DuplicateField {
            message: message.to_owned(),
            field: raw.name.clone(),
        });
    }

    let kind = if let Some(repeat) = &raw.repeat {
        if !allow_group {
            return Err(SchemaValidationError::NestedGroup {
                message: message.to_owned(),
                field: raw.name.clone(),
            });
        }
        if !trailing {
            return Err(SchemaValidationError::GroupNotTrailing {
                message: message.to_owned(),
                field: raw.name.clone(),
            });
        }
        if repeat.fields.is_empty() {
            return Err(SchemaValidationError::EmptyGroup {
                message: message.to_owned(),
                field: raw.name.clone(),
            });
        }
        // The count source must resolve to an earlier unsigned
        // scalar of the fixed prefix.
        let source_ok = earlier.iter().any(|f| {
            f.name == repeat.count_field
                && matches!(f.kind, FieldKind::Scalar { ty } if ty.is_unsigned())
        });
        if !source_ok {
            return Err(SchemaValidationError::BadCountSource {
                message: message.to_owned(),
                field: raw.name.clone(),
                count_field: repeat.count_field.clone(),
            });
        }
        let mut inner = Vec::with_capacity(repeat.fields.len());
        for inner_raw in &repeat.fields {
            let validated = validate_field(message, inner_raw, &inner, seen, false, false)?;
            inner.push(validated);
        }
        // An instance must occupy at least one byte, otherwise the
        // payload length carries no count information and decoding
        // would have to divide by a zero stride.
        let instance_size: usize = inner.iter().filter_map(FieldSchema::fixed_size).sum();
        if instance_size == 0 {
            return Err(SchemaValidationError::ZeroSizeGroup {
                message: message.to_owned(),
                field: raw.name.clone(),
            });
        }
        FieldKind::RepeatedGroup { count_field: repeat.count_field.clone(), fields: inner }
    } else {
        let data_type = raw.data_type.as_ref().ok_or_else(|| {
            SchemaValidationError::MissingType {
                message: message.to_owned(),
                field: raw.name.clone(),
            }
        })?;
        match data_type {
            RawDataType::Array { array_of, count } => {
                let elem = parse_type(message, &raw.name, array_of)?;
                FieldKind::ByteArray { elem, count: *count }
            }
            RawDataType::Simple(token) => {
                let ty = parse_type(message, &raw.name, token)?;
                if let Some(bitfield) = &raw.bitfield {
                    validate_bitfield(message, raw, ty, bitfield)?
                } else if let Some(enumeration) = &raw.enumeration {
                    validate_enumeration(message, raw, ty, enumeration)?
                } else {
                    FieldKind::Scalar { ty }
                }
            }
        }
    };

    Ok(FieldSchema {
        name: raw.name.clone(),
        description: raw.description.clone(),
        reserved: raw.reserved,
        kind,
    })
}

fn parse_type(
    message: &str,
    field: &str,
    token: &str,
) -> Result<UbxType, SchemaValidationError> {
    token.parse().map_err(|_| SchemaValidationError::UnrecognizedType {
        message: message.to_owned(),
        field: field.to_owned(),
        token: token.to_owned(),
    })
}

fn validate_bitfield(
    message: &str,
    raw: &RawField,
    container: UbxType,
    bitfield: &RawBitfield,
) -> Result<FieldKind, SchemaValidationError> {
    if !container.is_unsigned() {
        return Err(SchemaValidationError::BadBitContainer {
            message: message.to_owned(),
            field: raw.name.clone(),
            container,
        });
    }
    let container_bits = container.width() * 8;
    let mut bits = Vec::with_capacity(bitfield.bits.len());
    for bit in &bitfield.bits {
        if bit.bit_start > bit.bit_end || bit.bit_end >= container_bits {
            return Err(SchemaValidationError::BitRangeOutOfBounds {
                message: message.to_owned(),
                bit: bit.name.clone(),
                start: bit.bit_start,
                end: bit.bit_end,
                container,
            });
        }
        bits.push(BitSchema {
            name: bit.name.clone(),
            bit_start: bit.bit_start,
            bit_end: bit.bit_end,
            description: bit.description.clone(),
            reserved: bit.reserved,
        });
    }
    bits.sort_by_key(|b| b.bit_start);
    for pair in bits.windows(2) {
        if pair[1].bit_start <= pair[0].bit_end {
            return Err(SchemaValidationError::BitRangeOverlap {
                message: message.to_owned(),
                field: raw.name.clone(),
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }
    }
    Ok(FieldKind::BitField { container, bits })
}

fn validate_enumeration(
    message: &str,
    raw: &RawField,
    underlying: UbxType,
    enumeration: &RawEnumeration,
) -> Result<FieldKind, SchemaValidationError> {
    use heck::ToUpperCamelCase;

    if !underlying.is_unsigned() {
        return Err(SchemaValidationError::BadEnumUnderlying {
            message: message.to_owned(),
            field: raw.name.clone(),
            underlying,
        });
    }
    if enumeration.values.is_empty() {
        return Err(SchemaValidationError::EmptyEnumDomain {
            message: message.to_owned(),
            field: raw.name.clone(),
        });
    }
    let mut values = Vec::with_capacity(enumeration.values.len());
    let mut seen = HashSet::new();
    for value in &enumeration.values {
        if value.value > underlying.max_unsigned() {
            return Err(SchemaValidationError::EnumValueOutOfRange {
                message: message.to_owned(),
                field: raw.name.clone(),
                value: value.value,
                underlying,
            });
        }
        if !seen.insert(value.value) {
            return Err(SchemaValidationError::DuplicateEnumValue {
                message: message.to_owned(),
                field: raw.name.clone(),
                value: value.value,
            });
        }
        values.push(EnumValueSchema {
            name: value.name.clone(),
            value: value.value,
            description: value.description.clone(),
        });
    }
    let type_name = enumeration
        .name
        .clone()
        .unwrap_or_else(|| raw.name.to_upper_camel_case());
    Ok(FieldKind::EnumMapped {
        underlying,
        domain: EnumDomain { type_name, values },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MON_RXBUF: &str = r#"{
        "name": "UBX-MON-RXBUF",
        "class_id": "0x0a",
        "message_id": "0x07",
        "description": "Receiver buffer status",
        "payload_length": 24,
        "fields": [
            {"name": "pending", "data_type": {"array_of": "U2", "count": 6}},
            {"name": "usage", "data_type": {"array_of": "U1", "count": 6}},
            {"name": "peakUsage", "data_type": {"array_of": "U1", "count": 6}}
        ]
    }"#;

    #[test]
    fn mon_rxbuf_validates() {
        let schema = MessageSchema::parse(MON_RXBUF).unwrap();
        assert_eq!(schema.name, "MON-RXBUF");
        assert_eq!(schema.ident, MessageId { class: 0x0a, id: 0x07 });
        assert_eq!(schema.payload_kind, PayloadKind::Fixed(24));
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.struct_name(), "MonRxbuf");
        assert_eq!(schema.module_name(), "mon_rxbuf");
    }

    #[test]
    fn declared_length_mismatch_is_rejected() {
        let text = r#"{
            "name": "UBX-ACK-ACK",
            "class_id": 5,
            "message_id": 1,
            "payload_length": 3,
            "fields": [
                {"name": "clsId", "data_type": "U1"},
                {"name": "msgId", "data_type": "U1"}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::PayloadLengthMismatch { declared: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "a", "data_type": "U1"},
                {"name": "a", "data_type": "U2"}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::DuplicateField { .. })
        ));
    }

    #[test]
    fn overlapping_bit_ranges_are_rejected() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "flags", "data_type": "X1", "bitfield": {"bits": [
                    {"name": "a", "bit_start": 0, "bit_end": 2},
                    {"name": "b", "bit_start": 2, "bit_end": 3}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::BitRangeOverlap { .. })
        ));
    }

    #[test]
    fn bit_range_must_fit_container() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "flags", "data_type": "X1", "bitfield": {"bits": [
                    {"name": "a", "bit_start": 6, "bit_end": 8}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::BitRangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn enum_value_must_fit_underlying_width() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "mode", "data_type": "U1", "enumeration": {"values": [
                    {"name": "tooBig", "value": 256}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::EnumValueOutOfRange { value: 256, .. })
        ));
    }

    #[test]
    fn group_count_source_must_be_earlier_unsigned_scalar() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "blocks", "repeat": {"count_field": "numBlocks", "fields": [
                    {"name": "x", "data_type": "U1"}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::BadCountSource { .. })
        ));
    }

    #[test]
    fn trailing_group_makes_payload_variable() {
        let text = r#"{
            "name": "UBX-MON-SPAN",
            "class_id": "0x0a",
            "message_id": "0x31",
            "fields": [
                {"name": "version", "data_type": "U1"},
                {"name": "numRfBlocks", "data_type": "U1"},
                {"name": "reserved0", "data_type": {"array_of": "U1", "count": 2}},
                {"name": "blocks", "repeat": {"count_field": "numRfBlocks", "fields": [
                    {"name": "spectrum", "data_type": {"array_of": "U1", "count": 4}},
                    {"name": "span", "data_type": "U4"},
                    {"name": "res", "data_type": "U4"},
                    {"name": "center", "data_type": "U4"},
                    {"name": "pga", "data_type": "U1"},
                    {"name": "reserved1", "data_type": {"array_of": "U1", "count": 3}}
                ]}}
            ]
        }"#;
        let schema = MessageSchema::parse(text).unwrap();
        assert_eq!(schema.payload_kind, PayloadKind::Variable { prefix_len: 4 });
    }

    #[test]
    fn group_must_be_trailing() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "count", "data_type": "U1"},
                {"name": "blocks", "repeat": {"count_field": "count", "fields": [
                    {"name": "x", "data_type": "U1"}
                ]}},
                {"name": "after", "data_type": "U1"}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::GroupNotTrailing { .. })
        ));
    }

    #[test]
    fn zero_size_group_instances_are_rejected() {
        // Zero-count arrays are legal on their own, but a group made
        // only of them would resolve to a zero-byte stride.
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "count", "data_type": "U1"},
                {"name": "blocks", "repeat": {"count_field": "count", "fields": [
                    {"name": "x", "data_type": {"array_of": "U1", "count": 0}}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::ZeroSizeGroup { .. })
        ));
    }

    #[test]
    fn nested_groups_are_rejected() {
        let text = r#"{
            "name": "UBX-TEST",
            "class_id": 1,
            "message_id": 2,
            "fields": [
                {"name": "count", "data_type": "U1"},
                {"name": "blocks", "repeat": {"count_field": "count", "fields": [
                    {"name": "inner", "repeat": {"count_field": "count", "fields": [
                        {"name": "x", "data_type": "U1"}
                    ]}}
                ]}}
            ]
        }"#;
        assert!(matches!(
            MessageSchema::parse(text),
            Err(SchemaValidationError::NestedGroup { .. })
        ));
    }
}
