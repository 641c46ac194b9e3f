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

//! Layout resolution.
//!
//! Converts a validated [`MessageSchema`] into a [`ResolvedLayout`]:
//! absolute byte offsets, sizes, and a codec operation per field.
//! Both backend emitters consume the same resolved layout, which is
//! what keeps the generated codec and the generated test strategy
//! consistent with each other.

use crate::schema::{
    EnumDomain, FieldKind, FieldSchema, MessageId, MessageSchema, PayloadKind, UbxType,
};
use serde::Serialize;

/// One named bit range within a bitfield container, reduced to the
/// shift/mask form used by both emitters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitSpec {
    pub name: String,
    pub description: Option<String>,
    pub reserved: bool,
    /// Right shift applied after loading the container.
    pub shift: usize,
    /// Number of bits; the mask is `(1 << width) - 1` post shift.
    pub width: usize,
}

impl BitSpec {
    pub fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

/// How to read or write one resolved field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    /// Little-endian scalar of the given wire type.
    Scalar { ty: UbxType },
    /// `count` consecutive little-endian scalars.
    Array { elem: UbxType, count: usize },
    /// A container scalar carved into disjoint bit ranges. The
    /// container is consumed once for all of its bits.
    Bits { container: UbxType, bits: Vec<BitSpec> },
    /// A scalar mapped against a closed set of named raw values.
    Enum { underlying: UbxType, domain: EnumDomain },
    /// A repeated trailing group; `inner` offsets are relative to the
    /// start of each instance.
    Group { count_field: String, inner: GroupLayout },
}

/// Parametric sub-layout of one repeated group instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupLayout {
    /// Byte size of one instance.
    pub stride: usize,
    pub fields: Vec<ResolvedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub name: String,
    pub description: Option<String>,
    pub reserved: bool,
    pub offset: usize,
    pub size: usize,
    pub op: FieldOp,
}

/// Total payload length policy of a resolved layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalLen {
    Fixed(usize),
    /// `prefix` fixed bytes followed by `count * stride` group bytes,
    /// the count read from the named prefix field.
    Variable { prefix: usize, stride: usize, count_field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLayout {
    pub name: String,
    pub description: Option<String>,
    pub ident: MessageId,
    pub total_len: TotalLen,
    pub fields: Vec<ResolvedField>,
}

impl ResolvedLayout {
    /// Length of the fixed prefix (the whole payload for fixed
    /// messages).
    pub fn prefix_len(&self) -> usize {
        match &self.total_len {
            TotalLen::Fixed(len) => *len,
            TotalLen::Variable { prefix, .. } => *prefix,
        }
    }

    /// The trailing group, when the payload is variable.
    pub fn group(&self) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| matches!(f.op, FieldOp::Group { .. }))
    }

    /// Wire type of the group count field, when the payload is
    /// variable.
    pub fn count_field_type(&self) -> Option<UbxType> {
        let TotalLen::Variable { count_field, .. } = &self.total_len else {
            return None;
        };
        self.fields.iter().find_map(|f| match &f.op {
            FieldOp::Scalar { ty } if &f.name == count_field => Some(*ty),
            _ => None,
        })
    }

    /// Largest payload length any instance count can produce, capped
    /// at the envelope's 16-bit length field.
    pub fn max_payload_len(&self) -> usize {
        match &self.total_len {
            TotalLen::Fixed(len) => *len,
            TotalLen::Variable { prefix, stride, .. } => {
                let max_count = self
                    .count_field_type()
                    .map(|ty| ty.max_unsigned() as usize)
                    .unwrap_or(u8::MAX as usize);
                (prefix + stride * max_count).min(ubx_frame::MAX_PAYLOAD_LEN)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutConflictError {
    #[error("message {message}: resolved fields cover {resolved} bytes, payload declares {declared}")]
    LengthMismatch { message: String, declared: usize, resolved: usize },
    #[error("message {message}: repeated group {field} is illegal in a fixed-length payload")]
    GroupInFixedPayload { message: String, field: String },
    #[error("message {message}: bit ranges of {field} overlap or exceed the container")]
    BitConflict { message: String, field: String },
    #[error("message {message}: count source {count_field} of group {field} is not part of the fixed prefix")]
    CountSourceNotResolved { message: String, field: String, count_field: String },
}

/// Resolve a validated schema into a concrete byte layout.
///
/// Walks the fields in declaration order with a running byte cursor.
/// Pure and idempotent; repeated calls on the same schema yield the
/// same layout.
pub fn resolve(schema: &MessageSchema) -> Result<ResolvedLayout, LayoutConflictError> {
    let mut cursor = 0usize;
    let mut fields = Vec::with_capacity(schema.fields.len());
    let mut total_len = match schema.payload_kind {
        PayloadKind::Fixed(len) => TotalLen::Fixed(len),
        // Prefix and stride are filled in while walking.
        PayloadKind::Variable { prefix_len } => TotalLen::Variable {
            prefix: prefix_len,
            stride: 0,
            count_field: String::new(),
        },
    };

    for field in &schema.fields {
        let resolved = resolve_field(&schema.name, field, &mut cursor, &fields)?;
        if let FieldOp::Group { count_field, inner } = &resolved.op {
            match &mut total_len {
                TotalLen::Fixed(_) => {
                    return Err(LayoutConflictError::GroupInFixedPayload {
                        message: schema.name.clone(),
                        field: field.name.clone(),
                    })
                }
                TotalLen::Variable { stride, count_field: slot, .. } => {
                    *stride = inner.stride;
                    *slot = count_field.clone();
                }
            }
        }
        fields.push(resolved);
    }

    // The cursor must land exactly on the declared prefix; both an
    // undershoot and an overshoot are conflicts.
    let declared = match &total_len {
        TotalLen::Fixed(len) => *len,
        TotalLen::Variable { prefix, .. } => *prefix,
    };
    if cursor != declared {
        return Err(LayoutConflictError::LengthMismatch {
            message: schema.name.clone(),
            declared,
            resolved: cursor,
        });
    }

    Ok(ResolvedLayout {
        name: schema.name.clone(),
        description: schema.description.clone(),
        ident: schema.ident,
        total_len,
        fields,
    })
}

fn resolve_field(
    message: &str,
    field: &FieldSchema,
    cursor: &mut usize,
    earlier: &[ResolvedField],
) -> Result<ResolvedField, LayoutConflictError> {
    let offset = *cursor;
    let (size, op) = match &field.kind {
        FieldKind::Scalar { ty } => (ty.width(), FieldOp::Scalar { ty: *ty }),
        FieldKind::ByteArray { elem, count } => {
            (elem.width() * count, FieldOp::Array { elem: *elem, count: *count })
        }
        FieldKind::BitField { container, bits } => {
            let container_bits = container.width() * 8;
            let mut specs = Vec::with_capacity(bits.len());
            let mut used = 0u64;
            for bit in bits {
                let width = bit.bit_width();
                if bit.bit_end >= container_bits {
                    return Err(LayoutConflictError::BitConflict {
                        message: message.to_owned(),
                        field: field.name.clone(),
                    });
                }
                let mask = if width >= 64 { u64::MAX } else { ((1u64 << width) - 1) << bit.bit_start };
                if used & mask != 0 {
                    return Err(LayoutConflictError::BitConflict {
                        message: message.to_owned(),
                        field: field.name.clone(),
                    });
                }
                used |= mask;
                specs.push(BitSpec {
                    name: bit.name.clone(),
                    description: bit.description.clone(),
                    reserved: bit.reserved,
                    shift: bit.bit_start,
                    width,
                });
            }
            specs.sort_by_key(|b| b.shift);
            (container.width(), FieldOp::Bits { container: *container, bits: specs })
        }
        FieldKind::EnumMapped { underlying, domain } => (
            underlying.width(),
            FieldOp::Enum { underlying: *underlying, domain: domain.clone() },
        ),
        FieldKind::RepeatedGroup { count_field, fields: inner_fields } => {
            // The count source must already be resolved in the prefix.
            if !earlier
                .iter()
                .any(|f| &f.name == count_field && matches!(f.op, FieldOp::Scalar { .. }))
            {
                return Err(LayoutConflictError::CountSourceNotResolved {
                    message: message.to_owned(),
                    field: field.name.clone(),
                    count_field: count_field.clone(),
                });
            }
            // Resolve the inner schema once, offsets relative to the
            // group instance start.
            let mut inner_cursor = 0usize;
            let mut inner = Vec::with_capacity(inner_fields.len());
            for inner_field in inner_fields {
                let resolved = resolve_field(message, inner_field, &mut inner_cursor, &inner)?;
                inner.push(resolved);
            }
            let group = GroupLayout { stride: inner_cursor, fields: inner };
            // The group consumes no prefix bytes; its extent is
            // count * stride past the prefix.
            (0, FieldOp::Group { count_field: count_field.clone(), inner: group })
        }
    };
    *cursor += size;
    Ok(ResolvedField {
        name: field.name.clone(),
        description: field.description.clone(),
        reserved: field.reserved,
        offset,
        size,
        op,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MessageSchema;

    fn mon_rxbuf() -> MessageSchema {
        MessageSchema::parse(
            r#"{
                "name": "UBX-MON-RXBUF",
                "class_id": "0x0a",
                "message_id": "0x07",
                "payload_length": 24,
                "fields": [
                    {"name": "pending", "data_type": {"array_of": "U2", "count": 6}},
                    {"name": "usage", "data_type": {"array_of": "U1", "count": 6}},
                    {"name": "peakUsage", "data_type": {"array_of": "U1", "count": 6}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn mon_rxbuf_offsets() {
        let layout = resolve(&mon_rxbuf()).unwrap();
        assert_eq!(layout.total_len, TotalLen::Fixed(24));
        let ranges: Vec<(usize, usize)> =
            layout.fields.iter().map(|f| (f.offset, f.offset + f.size)).collect();
        assert_eq!(ranges, vec![(0, 12), (12, 18), (18, 24)]);
    }

    #[test]
    fn fixed_layout_is_gap_free() {
        let layout = resolve(&mon_rxbuf()).unwrap();
        let mut cursor = 0;
        for field in &layout.fields {
            assert_eq!(field.offset, cursor);
            cursor += field.size;
        }
        assert_eq!(cursor, 24);
    }

    #[test]
    fn resolution_is_idempotent() {
        let schema = mon_rxbuf();
        assert_eq!(resolve(&schema).unwrap(), resolve(&schema).unwrap());
    }

    #[test]
    fn bitfield_container_consumed_once() {
        let schema = MessageSchema::parse(
            r#"{
                "name": "UBX-TEST",
                "class_id": 1,
                "message_id": 2,
                "fields": [
                    {"name": "flags", "data_type": "X1", "bitfield": {"bits": [
                        {"name": "b", "bit_start": 4, "bit_end": 6},
                        {"name": "a", "bit_start": 0, "bit_end": 0}
                    ]}},
                    {"name": "next", "data_type": "U1"}
                ]
            }"#,
        )
        .unwrap();
        let layout = resolve(&schema).unwrap();
        assert_eq!(layout.fields[0].size, 1);
        assert_eq!(layout.fields[1].offset, 1);
        let FieldOp::Bits { bits, .. } = &layout.fields[0].op else {
            panic!("expected a bits op");
        };
        // Sorted by bit offset.
        assert_eq!(bits[0].name, "a");
        assert_eq!(bits[0].shift, 0);
        assert_eq!(bits[0].width, 1);
        assert_eq!(bits[1].name, "b");
        assert_eq!(bits[1].shift, 4);
        assert_eq!(bits[1].mask(), 0b111);
    }

    #[test]
    fn enum_field_size_is_underlying_width() {
        let schema = MessageSchema::parse(
            r#"{
                "name": "UBX-TEST",
                "class_id": 1,
                "message_id": 2,
                "fields": [
                    {"name": "mode", "data_type": "U2", "enumeration": {"values": [
                        {"name": "off", "value": 0},
                        {"name": "on", "value": 1}
                    ]}}
                ]
            }"#,
        )
        .unwrap();
        let layout = resolve(&schema).unwrap();
        assert_eq!(layout.fields[0].size, 2);
        let FieldOp::Enum { domain, .. } = &layout.fields[0].op else {
            panic!("expected an enum op");
        };
        assert!(domain.contains(0) && domain.contains(1) && !domain.contains(2));
    }

    #[test]
    fn variable_layout_records_prefix_and_stride() {
        let schema = MessageSchema::parse(
            r#"{
                "name": "UBX-MON-SPAN",
                "class_id": "0x0a",
                "message_id": "0x31",
                "fields": [
                    {"name": "version", "data_type": "U1"},
                    {"name": "numRfBlocks", "data_type": "U1"},
                    {"name": "reserved0", "data_type": {"array_of": "U1", "count": 2}},
                    {"name": "blocks", "repeat": {"count_field": "numRfBlocks", "fields": [
                        {"name": "span", "data_type": "U4"},
                        {"name": "pga", "data_type": "U1"},
                        {"name": "reserved1", "data_type": {"array_of": "U1", "count": 3}}
                    ]}}
                ]
            }"#,
        )
        .unwrap();
        let layout = resolve(&schema).unwrap();
        assert_eq!(
            layout.total_len,
            TotalLen::Variable {
                prefix: 4,
                stride: 8,
                count_field: "numRfBlocks".to_owned()
            }
        );
        assert_eq!(layout.count_field_type(), Some(UbxType::U1));
        assert_eq!(layout.max_payload_len(), 4 + 8 * 255);
        let FieldOp::Group { inner, .. } = &layout.group().unwrap().op else {
            panic!("expected a group op");
        };
        // Inner offsets are relative to the instance start.
        assert_eq!(inner.fields[0].offset, 0);
        assert_eq!(inner.fields[1].offset, 4);
        assert_eq!(inner.fields[2].offset, 5);
        assert_eq!(inner.stride, 8);
    }
}
