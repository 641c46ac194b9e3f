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

//! Logical message values.
//!
//! The expected-value half of a `(expected value, frame bytes)` pair:
//! what a decoder is supposed to produce for a payload, and what the
//! strategy emitter samples before serializing.

use serde::Serialize;

/// Decoded value of one enum-mapped field.
///
/// Raw values outside the declared domain decode to [`Unrecognized`]
/// rather than failing; this is the decoder fallback path the chaos
/// strategy exists to exercise.
///
/// [`Unrecognized`]: EnumValue::Unrecognized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EnumValue {
    Known { raw: u64, name: String },
    Unrecognized { raw: u64 },
}

impl EnumValue {
    pub fn raw(&self) -> u64 {
        match self {
            EnumValue::Known { raw, .. } | EnumValue::Unrecognized { raw } => *raw,
        }
    }
}

/// Decoded value of one field.
///
/// Floats compare by bit pattern so that a round trip through NaN
/// payload bytes still satisfies `decode(encode(v)) == v`.
#[derive(Debug, Clone, Serialize)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    F32(f32),
    F64(f64),
    Array(Vec<FieldValue>),
    Enum(EnumValue),
    /// Bit range values keyed by bit name, ordered by bit offset.
    Bits(Vec<(String, u64)>),
    Groups(Vec<MessageValue>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Unsigned(a), FieldValue::Unsigned(b)) => a == b,
            (FieldValue::Signed(a), FieldValue::Signed(b)) => a == b,
            (FieldValue::F32(a), FieldValue::F32(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::F64(a), FieldValue::F64(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Array(a), FieldValue::Array(b)) => a == b,
            (FieldValue::Enum(a), FieldValue::Enum(b)) => a == b,
            (FieldValue::Bits(a), FieldValue::Bits(b)) => a == b,
            (FieldValue::Groups(a), FieldValue::Groups(b)) => a == b,
            _ => false,
        }
    }
}

/// Decoded value of a whole message payload, in field declaration
/// order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MessageValue {
    pub fields: Vec<(String, FieldValue)>,
}

impl MessageValue {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_floats_compare_by_bits() {
        let nan = f32::from_bits(0x7fc0_0001);
        assert_eq!(FieldValue::F32(nan), FieldValue::F32(f32::from_bits(0x7fc0_0001)));
        assert_ne!(FieldValue::F32(nan), FieldValue::F32(f32::from_bits(0x7fc0_0002)));
        assert_eq!(FieldValue::F32(0.0), FieldValue::F32(0.0));
        // Positive and negative zero are distinct payloads.
        assert_ne!(FieldValue::F32(0.0), FieldValue::F32(-0.0));
    }

    #[test]
    fn lookup_by_name() {
        let mut value = MessageValue::default();
        value.push("a", FieldValue::Unsigned(1));
        value.push("b", FieldValue::Signed(-2));
        assert_eq!(value.get("b"), Some(&FieldValue::Signed(-2)));
        assert_eq!(value.get("c"), None);
    }
}
