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

//! Codec emitter.
//!
//! Consumes a [`ResolvedLayout`] and produces a [`CodecDescriptor`]:
//! the message envelope metadata plus per-field decode and encode
//! operations. The descriptor renders to a declarative packet
//! definition consumed by the downstream derive layer, and doubles as
//! the reference implementation of that contract through
//! [`CodecDescriptor::decode_payload`] and
//! [`CodecDescriptor::encode_payload`].

use crate::backends::{
    check_group_fields, doc_line, field_ident, hex_lit, singular, usize_lit, variant_ident,
    ToIdent, ToSnakeCase, ToUpperCamelCase, UnsupportedFieldError,
};
use crate::layout::{FieldOp, GroupLayout, ResolvedField, ResolvedLayout, TotalLen};
use crate::schema::{EnumDomain, MessageId, UbxType};
use crate::value::{EnumValue, FieldValue, MessageValue};
use quote::{format_ident, quote};
use serde::Serialize;

/// Payload length policy carried in the `#[ubx(..)]` envelope
/// attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadLenPolicy {
    Fixed(usize),
    Max(usize),
}

/// Declarative codec definition for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodecDescriptor {
    pub struct_name: String,
    pub module_name: String,
    pub payload_len: PayloadLenPolicy,
    layout: ResolvedLayout,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadDecodeError {
    #[error("payload has {got} bytes, expected {expected}")]
    WrongLength { got: usize, expected: usize },
    #[error("payload has {got} bytes, shorter than the {prefix} byte fixed prefix")]
    ShortPrefix { got: usize, prefix: usize },
    #[error("trailing {got} group bytes do not divide into {stride} byte instances")]
    RaggedGroup { got: usize, stride: usize },
    #[error("count field {count_field} declares {declared} instances, payload carries {got}")]
    CountMismatch { count_field: String, declared: u64, got: usize },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadEncodeError {
    #[error("value is missing field {field}")]
    MissingField { field: String },
    #[error("field {field} value does not have the expected shape")]
    ShapeMismatch { field: String },
    #[error("field {field} value {value:#x} exceeds its wire width")]
    ValueOutOfRange { field: String, value: u64 },
    #[error("field {field} has {got} array elements, layout declares {expected}")]
    ArityMismatch { field: String, expected: usize, got: usize },
    #[error("count field {count_field} holds {declared} but {got} group instances were given")]
    CountMismatch { count_field: String, declared: u64, got: usize },
}

/// Derive the codec descriptor from a resolved layout.
///
/// Fails with [`UnsupportedFieldError`] when the layout uses a shape
/// the declarative output cannot express yet (enum or bitfield ops
/// inside a repeated group).
pub fn emit_codec(layout: &ResolvedLayout) -> Result<CodecDescriptor, UnsupportedFieldError> {
    check_group_fields(layout)?;

    let struct_name = layout.name.replace('-', "_").to_upper_camel_case();
    let module_name = layout.name.replace('-', "_").to_snake_case();
    let payload_len = match &layout.total_len {
        TotalLen::Fixed(len) => PayloadLenPolicy::Fixed(*len),
        TotalLen::Variable { .. } => PayloadLenPolicy::Max(layout.max_payload_len()),
    };
    Ok(CodecDescriptor {
        struct_name,
        module_name,
        payload_len,
        layout: layout.clone(),
    })
}

impl CodecDescriptor {
    pub fn ident(&self) -> MessageId {
        self.layout.ident
    }

    pub fn layout(&self) -> &ResolvedLayout {
        &self.layout
    }

    /// Decode a payload according to the descriptor's field ops.
    ///
    /// Arbitrary bytes of a consistent length always decode; raw enum
    /// values outside their domain become
    /// [`EnumValue::Unrecognized`]. Length inconsistencies are
    /// structured errors, never panics.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<MessageValue, PayloadDecodeError> {
        decode_payload(&self.layout, payload)
    }

    /// Serialize a logical value back into payload bytes.
    pub fn encode_payload(&self, value: &MessageValue) -> Result<Vec<u8>, PayloadEncodeError> {
        encode_payload(&self.layout, value)
    }

    /// Render the codec artifact.
    pub fn generate(&self) -> String {
        let header = format!(
            "//! Auto-generated from ubx-protocol-schema\n//!\n//! {} message definition\n\n",
            self.layout.name
        );
        let tokens = self.generate_tokens();
        let syntax_tree = syn::parse2(tokens).expect("generated code is valid Rust");
        format!("{header}{}", prettyplease::unparse(&syntax_tree))
    }

    /// Build the declarative packet definition as a token stream.
    pub fn generate_tokens(&self) -> proc_macro2::TokenStream {
        let mut items = quote! {
            use ublox_derive::{ubx_extend, ubx_packet_recv};
        };

        // Bitfield accessor structs and enum declarations come first,
        // in field declaration order.
        for field in &self.layout.fields {
            match &field.op {
                FieldOp::Bits { container, bits } => {
                    items.extend(self.generate_bitfield_struct(field, *container, bits))
                }
                FieldOp::Enum { underlying, domain } => {
                    items.extend(generate_enum_decl(*underlying, domain))
                }
                _ => (),
            }
        }

        // A variable message declares its group instance struct
        // before the packet struct referencing it.
        if let Some(group) = self.layout.group() {
            if let FieldOp::Group { inner, .. } = &group.op {
                items.extend(self.generate_group_struct(group, inner));
            }
        }

        items.extend(self.generate_packet_struct());
        items
    }

    fn bitfield_type_name(&self, field: &ResolvedField) -> proc_macro2::Ident {
        format_ident!("{}{}", self.struct_name, field.name.to_upper_camel_case())
    }

    fn group_type_name(&self, field: &ResolvedField) -> proc_macro2::Ident {
        format_ident!(
            "{}{}",
            self.struct_name,
            singular(&field.name.to_upper_camel_case())
        )
    }

    fn generate_bitfield_struct(
        &self,
        field: &ResolvedField,
        container: UbxType,
        bits: &[crate::layout::BitSpec],
    ) -> proc_macro2::TokenStream {
        let name = self.bitfield_type_name(field);
        let raw_type = container.rust_type().to_ident();
        let doc = format!(" Bitfield accessor for {}", field.name);

        let mut struct_fields = Vec::new();
        let mut from_fields = Vec::new();
        for bit in bits.iter().filter(|b| !b.reserved) {
            let bit_name = field_ident(&bit.name);
            let bit_type = bit_rust_type(bit.width).to_ident();
            let bit_doc = bit.description.as_deref().map(|d| {
                let line = doc_line(d, 80);
                quote! { #[doc = #line] }
            });
            struct_fields.push(quote! {
                #bit_doc
                pub #bit_name: #bit_type,
            });
            let shift = usize_lit(bit.shift);
            from_fields.push(if bit.width == 1 {
                quote! { #bit_name: (val >> #shift) & 0x01 != 0, }
            } else {
                let mask = syn::parse_str::<syn::LitInt>(&format!("{:#x}", bit.mask()))
                    .expect("valid mask literal");
                quote! { #bit_name: ((val >> #shift) & #mask) as _, }
            });
        }

        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone, Copy)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            pub struct #name {
                #(#struct_fields)*
            }

            impl From<#raw_type> for #name {
                fn from(val: #raw_type) -> Self {
                    Self {
                        #(#from_fields)*
                    }
                }
            }
        }
    }

    fn generate_group_struct(
        &self,
        field: &ResolvedField,
        inner: &GroupLayout,
    ) -> proc_macro2::TokenStream {
        let name = self.group_type_name(field);
        let doc = format!(" Repeated group of {}", self.layout.name);
        let fields = inner.fields.iter().map(generate_struct_field);
        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone)]
            struct #name {
                #(#fields)*
            }
        }
    }

    fn generate_packet_struct(&self) -> proc_macro2::TokenStream {
        let name = format_ident!("{}", self.struct_name);
        let class = hex_lit(self.layout.ident.class);
        let id = hex_lit(self.layout.ident.id);
        let len_attr = match self.payload_len {
            PayloadLenPolicy::Fixed(len) => {
                let len = usize_lit(len);
                quote! { fixed_payload_len = #len }
            }
            PayloadLenPolicy::Max(len) => {
                let len = usize_lit(len);
                quote! { max_payload_len = #len }
            }
        };
        let doc = doc_line(
            self.layout.description.as_deref().unwrap_or(&format!("{} message", self.layout.name)),
            80,
        );

        let fields = self.layout.fields.iter().map(|field| match &field.op {
            FieldOp::Bits { container, .. } => {
                let field_name = field_ident(&field.name);
                let map_type = self.bitfield_type_name(field);
                let raw_type = container.rust_type().to_ident();
                let field_doc = struct_field_doc(field);
                quote! {
                    #field_doc
                    #[ubx(map_type = #map_type)]
                    #field_name: #raw_type,
                }
            }
            FieldOp::Enum { underlying, domain } => {
                let field_name = field_ident(&field.name);
                let map_type = format_ident!("{}", domain.type_name);
                let raw_type = underlying.rust_type().to_ident();
                let field_doc = struct_field_doc(field);
                quote! {
                    #field_doc
                    #[ubx(map_type = #map_type)]
                    #field_name: #raw_type,
                }
            }
            FieldOp::Group { count_field, .. } => {
                let field_name = field_ident(&field.name);
                let count = field_ident(count_field);
                let group_type = self.group_type_name(field);
                let field_doc = struct_field_doc(field);
                quote! {
                    #field_doc
                    #[ubx(count_field = #count)]
                    #field_name: Vec<#group_type>,
                }
            }
            _ => generate_struct_field(field),
        });

        quote! {
            #[doc = #doc]
            #[ubx_packet_recv]
            #[ubx(class = #class, id = #id, #len_attr)]
            struct #name {
                #(#fields)*
            }
        }
    }
}

fn generate_struct_field(field: &ResolvedField) -> proc_macro2::TokenStream {
    let name = field_ident(&field.name);
    let doc = struct_field_doc(field);
    match &field.op {
        FieldOp::Scalar { ty } => {
            let ty = ty.rust_type().to_ident();
            quote! { #doc #name: #ty, }
        }
        FieldOp::Array { elem, count } => {
            let elem = elem.rust_type().to_ident();
            let count = usize_lit(*count);
            quote! { #doc #name: [#elem; #count], }
        }
        // Bits, Enum and Group fields carry extra attributes and are
        // rendered by the packet struct generator.
        _ => quote! {},
    }
}

fn struct_field_doc(field: &ResolvedField) -> Option<proc_macro2::TokenStream> {
    field.description.as_deref().map(|d| {
        let line = doc_line(d, 80);
        quote! { #[doc = #line] }
    })
}

fn generate_enum_decl(underlying: UbxType, domain: &EnumDomain) -> proc_macro2::TokenStream {
    let name = format_ident!("{}", domain.type_name);
    let repr = underlying.rust_type().to_ident();
    let doc = format!(" {} enumeration", domain.type_name);
    let variants = domain.values.iter().map(|value| {
        let variant = variant_ident(&value.name);
        let raw = proc_macro2::Literal::u64_unsuffixed(value.value);
        let variant_doc = value.description.as_deref().map(|d| {
            let line = doc_line(d, 80);
            quote! { #[doc = #line] }
        });
        quote! {
            #variant_doc
            #variant = #raw,
        }
    });
    quote! {
        #[doc = #doc]
        #[ubx_extend]
        #[ubx(from, rest_reserved)]
        #[repr(#repr)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum #name {
            #(#variants)*
        }
    }
}

/// Rust type backing a bit range of the given width.
fn bit_rust_type(width: usize) -> &'static str {
    match width {
        1 => "bool",
        2..=8 => "u8",
        9..=16 => "u16",
        _ => "u32",
    }
}

/// Decode a payload against a resolved layout.
pub fn decode_payload(
    layout: &ResolvedLayout,
    payload: &[u8],
) -> Result<MessageValue, PayloadDecodeError> {
    let instances = match &layout.total_len {
        TotalLen::Fixed(len) => {
            if payload.len() != *len {
                return Err(PayloadDecodeError::WrongLength {
                    got: payload.len(),
                    expected: *len,
                });
            }
            0
        }
        TotalLen::Variable { prefix, stride, .. } => {
            if payload.len() < *prefix {
                return Err(PayloadDecodeError::ShortPrefix {
                    got: payload.len(),
                    prefix: *prefix,
                });
            }
            let rest = payload.len() - prefix;
            // Validation rejects zero-size group instances; treat a
            // zero stride as unable to absorb any trailing bytes.
            if *stride == 0 || rest % stride != 0 {
                return Err(PayloadDecodeError::RaggedGroup { got: rest, stride: *stride });
            }
            rest / stride
        }
    };

    let mut value = MessageValue::default();
    for field in &layout.fields {
        let decoded = match &field.op {
            FieldOp::Group { count_field, inner } => {
                let declared = match value.get(count_field) {
                    Some(FieldValue::Unsigned(count)) => *count,
                    // Validated schemas always put an unsigned scalar
                    // count field in the prefix.
                    _ => 0,
                };
                if declared != instances as u64 {
                    return Err(PayloadDecodeError::CountMismatch {
                        count_field: count_field.clone(),
                        declared,
                        got: instances,
                    });
                }
                let base = layout.prefix_len();
                let mut groups = Vec::with_capacity(instances);
                for index in 0..instances {
                    let start = base + index * inner.stride;
                    let mut group_value = MessageValue::default();
                    for inner_field in &inner.fields {
                        let bytes = &payload[start + inner_field.offset..][..inner_field.size];
                        group_value.push(inner_field.name.clone(), decode_op(&inner_field.op, bytes));
                    }
                    groups.push(group_value);
                }
                FieldValue::Groups(groups)
            }
            op => {
                let bytes = &payload[field.offset..][..field.size];
                decode_op(op, bytes)
            }
        };
        value.push(field.name.clone(), decoded);
    }
    Ok(value)
}

fn decode_op(op: &FieldOp, bytes: &[u8]) -> FieldValue {
    match op {
        FieldOp::Scalar { ty } => decode_scalar(*ty, bytes),
        FieldOp::Array { elem, count } => {
            let width = elem.width();
            FieldValue::Array(
                (0..*count)
                    .map(|i| decode_scalar(*elem, &bytes[i * width..][..width]))
                    .collect(),
            )
        }
        FieldOp::Bits { bits, .. } => {
            let raw = read_unsigned(bytes);
            FieldValue::Bits(
                bits.iter()
                    .map(|bit| (bit.name.clone(), (raw >> bit.shift) & bit.mask()))
                    .collect(),
            )
        }
        FieldOp::Enum { domain, .. } => {
            let raw = read_unsigned(bytes);
            let decoded = match domain.values.iter().find(|v| v.value == raw) {
                Some(value) => EnumValue::Known { raw, name: value.name.clone() },
                None => EnumValue::Unrecognized { raw },
            };
            FieldValue::Enum(decoded)
        }
        FieldOp::Group { .. } => unreachable!("groups are decoded by the payload walker"),
    }
}

fn decode_scalar(ty: UbxType, bytes: &[u8]) -> FieldValue {
    match ty {
        UbxType::R4 => FieldValue::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
        UbxType::R8 => FieldValue::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
        _ if ty.is_signed() => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            // Sign extend from the wire width.
            let shift = 64 - bytes.len() * 8;
            FieldValue::Signed((i64::from_le_bytes(buf) << shift) >> shift)
        }
        _ => FieldValue::Unsigned(read_unsigned(bytes)),
    }
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Serialize a logical value against a resolved layout.
///
/// This is the exact inverse of [`decode_payload`]; the strategy
/// emitter serializes its sampled values through this same function
/// so generated frames and generated codecs can never drift apart.
pub fn encode_payload(
    layout: &ResolvedLayout,
    value: &MessageValue,
) -> Result<Vec<u8>, PayloadEncodeError> {
    let mut payload = vec![0u8; layout.prefix_len()];
    for field in &layout.fields {
        let field_value = value
            .get(&field.name)
            .ok_or_else(|| PayloadEncodeError::MissingField { field: field.name.clone() })?;
        match &field.op {
            FieldOp::Group { count_field, inner } => {
                let FieldValue::Groups(groups) = field_value else {
                    return Err(PayloadEncodeError::ShapeMismatch { field: field.name.clone() });
                };
                let declared = match value.get(count_field) {
                    Some(FieldValue::Unsigned(count)) => *count,
                    _ => 0,
                };
                if declared != groups.len() as u64 {
                    return Err(PayloadEncodeError::CountMismatch {
                        count_field: count_field.clone(),
                        declared,
                        got: groups.len(),
                    });
                }
                for group in groups {
                    let base = payload.len();
                    payload.resize(base + inner.stride, 0);
                    for inner_field in &inner.fields {
                        let inner_value = group.get(&inner_field.name).ok_or_else(|| {
                            PayloadEncodeError::MissingField { field: inner_field.name.clone() }
                        })?;
                        let slot = &mut payload[base + inner_field.offset..][..inner_field.size];
                        encode_op(&inner_field.name, &inner_field.op, inner_value, slot)?;
                    }
                }
            }
            op => {
                let slot = &mut payload[field.offset..][..field.size];
                encode_op(&field.name, op, field_value, slot)?;
            }
        }
    }
    Ok(payload)
}

fn encode_op(
    name: &str,
    op: &FieldOp,
    value: &FieldValue,
    slot: &mut [u8],
) -> Result<(), PayloadEncodeError> {
    match (op, value) {
        (FieldOp::Scalar { ty }, _) => encode_scalar(name, *ty, value, slot),
        (FieldOp::Array { elem, count }, FieldValue::Array(values)) => {
            if values.len() != *count {
                return Err(PayloadEncodeError::ArityMismatch {
                    field: name.to_owned(),
                    expected: *count,
                    got: values.len(),
                });
            }
            let width = elem.width();
            for (i, element) in values.iter().enumerate() {
                encode_scalar(name, *elem, element, &mut slot[i * width..][..width])?;
            }
            Ok(())
        }
        (FieldOp::Bits { bits, .. }, FieldValue::Bits(values)) => {
            let mut raw = 0u64;
            for bit in bits {
                let bit_value = values
                    .iter()
                    .find(|(n, _)| n == &bit.name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| PayloadEncodeError::MissingField {
                        field: format!("{name}.{}", bit.name),
                    })?;
                if bit_value > bit.mask() {
                    return Err(PayloadEncodeError::ValueOutOfRange {
                        field: format!("{name}.{}", bit.name),
                        value: bit_value,
                    });
                }
                raw |= bit_value << bit.shift;
            }
            write_unsigned(raw, slot);
            Ok(())
        }
        (FieldOp::Enum { underlying, .. }, FieldValue::Enum(value)) => {
            let raw = value.raw();
            if raw > underlying.max_unsigned() {
                return Err(PayloadEncodeError::ValueOutOfRange {
                    field: name.to_owned(),
                    value: raw,
                });
            }
            write_unsigned(raw, slot);
            Ok(())
        }
        _ => Err(PayloadEncodeError::ShapeMismatch { field: name.to_owned() }),
    }
}

fn encode_scalar(
    name: &str,
    ty: UbxType,
    value: &FieldValue,
    slot: &mut [u8],
) -> Result<(), PayloadEncodeError> {
    match (ty, value) {
        (UbxType::R4, FieldValue::F32(v)) => {
            slot.copy_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (UbxType::R8, FieldValue::F64(v)) => {
            slot.copy_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (_, FieldValue::Signed(v)) if ty.is_signed() => {
            let width = ty.width();
            let min = -(1i64 << (width * 8 - 1));
            let max = (1i64 << (width * 8 - 1)) - 1;
            if width < 8 && (*v < min || *v > max) {
                return Err(PayloadEncodeError::ValueOutOfRange {
                    field: name.to_owned(),
                    value: *v as u64,
                });
            }
            slot.copy_from_slice(&v.to_le_bytes()[..width]);
            Ok(())
        }
        (_, FieldValue::Unsigned(v)) if ty.is_unsigned() => {
            if *v > ty.max_unsigned() {
                return Err(PayloadEncodeError::ValueOutOfRange {
                    field: name.to_owned(),
                    value: *v,
                });
            }
            write_unsigned(*v, slot);
            Ok(())
        }
        _ => Err(PayloadEncodeError::ShapeMismatch { field: name.to_owned() }),
    }
}

fn write_unsigned(value: u64, slot: &mut [u8]) {
    slot.copy_from_slice(&value.to_le_bytes()[..slot.len()]);
}
