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

//! Strategy emitter.
//!
//! Consumes the same [`ResolvedLayout`] the codec emitter consumed and
//! produces a [`StrategyDescriptor`]: a generative test definition for
//! the message. The descriptor renders to a proptest fuzz harness, and
//! its runtime strategies ([`StrategyDescriptor::valid_frames`],
//! [`StrategyDescriptor::chaos_payloads`]) sample `(expected value,
//! frame bytes)` pairs through the codec's own serialization rules, so
//! the two artifacts of a message cannot drift apart.

use crate::backends::{
    check_group_fields, field_ident, hex_lit, singular, usize_lit, ToIdent, ToSnakeCase,
    ToUpperCamelCase, UnsupportedFieldError,
};
use crate::layout::{FieldOp, GroupLayout, ResolvedField, ResolvedLayout, TotalLen};
use crate::schema::{EnumDomain, UbxType};
use quote::{format_ident, quote};
use serde::Serialize;

/// Number of strategies proptest composes into one tuple.
const MAX_TUPLE_SIZE: usize = 12;
/// Tuple chunk width used when a message exceeds [`MAX_TUPLE_SIZE`].
const TUPLE_CHUNK: usize = 10;

/// Generative test definition for one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyDescriptor {
    pub struct_name: String,
    pub module_name: String,
    layout: ResolvedLayout,
}

/// Derive the strategy descriptor from a resolved layout.
pub fn emit_strategy(layout: &ResolvedLayout) -> Result<StrategyDescriptor, UnsupportedFieldError> {
    check_group_fields(layout)?;
    Ok(StrategyDescriptor {
        struct_name: layout.name.replace('-', "_").to_upper_camel_case(),
        module_name: layout.name.replace('-', "_").to_snake_case(),
        layout: layout.clone(),
    })
}

impl StrategyDescriptor {
    pub fn layout(&self) -> &ResolvedLayout {
        &self.layout
    }

    /// Render the fuzz harness artifact.
    pub fn generate(&self) -> String {
        let header = format!(
            "//! Fuzz test for {}\n//!\n//! Auto-generated from ubx-protocol-schema\n\n",
            self.layout.name
        );
        let tokens = self.generate_tokens();
        let syntax_tree = syn::parse2(tokens).expect("generated code is valid Rust");
        format!("{header}{}\n{}", prettyplease::unparse(&syntax_tree), self.proptest_block())
    }

    /// Everything of the harness that is plain items: the expected
    /// value struct, its serializer, and the strategy functions. The
    /// `proptest!` test block is appended textually by [`generate`].
    ///
    /// [`generate`]: StrategyDescriptor::generate
    pub fn generate_tokens(&self) -> proc_macro2::TokenStream {
        let expected = format_ident!("Expected{}", self.struct_name);
        let expected_doc = format!(" Expected values for {}", self.layout.name);
        let count_field = match &self.layout.total_len {
            TotalLen::Variable { count_field, .. } => Some(count_field.as_str()),
            TotalLen::Fixed(_) => None,
        };

        let mut items = quote! {
            use proptest::prelude::*;
            use ublox::ParserBuilder;
        };

        // The per-instance struct and strategy of a repeated group
        // come first.
        let group = self.layout.group();
        if let Some(field) = group {
            if let FieldOp::Group { inner, .. } = &field.op {
                items.extend(self.generate_block_items(field, inner));
            }
        }

        // Expected value struct.
        let struct_fields = self.layout.fields.iter().map(|field| {
            let name = field_ident(&field.name);
            let ty = self.expected_ty(field);
            quote! { pub #name: #ty, }
        });
        items.extend(quote! {
            #[doc = #expected_doc]
            #[derive(Debug, Clone)]
            pub struct #expected {
                #(#struct_fields)*
            }
        });

        // Serializer, field writes in declaration order.
        let writes = self.layout.fields.iter().map(|field| {
            let name = field_ident(&field.name);
            match &field.op {
                FieldOp::Group { inner, .. } => {
                    let inner_writes = inner.fields.iter().map(|inner_field| {
                        let inner_name = field_ident(&inner_field.name);
                        write_stmt(quote! { block.#inner_name }, &inner_field.op)
                    });
                    quote! {
                        for block in &self.#name {
                            #(#inner_writes)*
                        }
                    }
                }
                op => write_stmt(quote! { self.#name }, op),
            }
        });
        items.extend(quote! {
            impl #expected {
                pub fn to_bytes(&self) -> Vec<u8> {
                    let mut wtr = Vec::new();
                    #(#writes)*
                    wtr
                }
            }
        });

        // Value strategy. The group count field is not sampled; it is
        // derived from the sampled instance vector so the declared
        // count always matches the serialized payload.
        let entries: Vec<(proc_macro2::Ident, proc_macro2::TokenStream)> = self
            .layout
            .fields
            .iter()
            .filter(|field| Some(field.name.as_str()) != count_field)
            .map(|field| (field_ident(&field.name), self.sample_expr(field)))
            .collect();
        let ctor = self.layout.fields.iter().map(|field| {
            let name = field_ident(&field.name);
            if Some(field.name.as_str()) == count_field {
                let group_name = field_ident(&group.expect("variable layouts have a group").name);
                let count_ty = self
                    .layout
                    .count_field_type()
                    .expect("variable layouts resolve their count field")
                    .rust_type()
                    .to_ident();
                quote! { #name: #group_name.len() as #count_ty, }
            } else {
                quote! { #name, }
            }
        });
        let strategy_fn = format_ident!("{}_strategy", self.module_name);
        let strategy_doc = format!(" Proptest strategy for {}", self.struct_name);
        let body = render_strategy_body(&entries, &expected, quote! { #(#ctor)* });
        items.extend(quote! {
            #[doc = #strategy_doc]
            fn #strategy_fn() -> impl Strategy<Value = #expected> {
                #body
            }
        });

        // Frame builder and the valid/chaos frame strategies.
        let class = hex_lit(self.layout.ident.class);
        let id = hex_lit(self.layout.ident.id);
        let build_fn = format_ident!("build_{}_frame", self.module_name);
        let frame_fn = format_ident!("{}_frame_strategy", self.module_name);
        let chaos_fn = format_ident!("{}_chaos_frame_strategy", self.module_name);
        items.extend(quote! {
            fn #build_fn(expected: &#expected) -> Vec<u8> {
                ubx_frame::build_frame(#class, #id, &expected.to_bytes())
            }

            pub fn #frame_fn() -> impl Strategy<Value = (#expected, Vec<u8>)> {
                #strategy_fn().prop_map(|expected| {
                    let frame = #build_fn(&expected);
                    (expected, frame)
                })
            }
        });

        let chaos_body = match &self.layout.total_len {
            TotalLen::Fixed(len) => {
                let len = usize_lit(*len);
                quote! {
                    prop::collection::vec(any::<u8>(), #len)
                        .prop_map(|payload| ubx_frame::build_frame(#class, #id, &payload))
                }
            }
            TotalLen::Variable { prefix, stride, count_field } => {
                let prefix = usize_lit(*prefix);
                let stride = usize_lit(*stride);
                let count = self
                    .layout
                    .fields
                    .iter()
                    .find(|f| &f.name == count_field)
                    .expect("variable layouts resolve their count field");
                let patch = patch_count_stmt(count);
                quote! {
                    (0usize..=16).prop_flat_map(|count| {
                        prop::collection::vec(any::<u8>(), #prefix + count * #stride)
                            .prop_map(move |mut payload| {
                                #patch
                                ubx_frame::build_frame(#class, #id, &payload)
                            })
                    })
                }
            }
        };
        items.extend(quote! {
            pub fn #chaos_fn() -> impl Strategy<Value = Vec<u8>> {
                #chaos_body
            }
        });

        items
    }

    fn generate_block_items(
        &self,
        field: &ResolvedField,
        inner: &GroupLayout,
    ) -> proc_macro2::TokenStream {
        let block_ty = self.block_type_name(field);
        let block_fn = self.block_strategy_name(field);
        let doc = format!(" One {} instance of {}", field.name, self.layout.name);
        let struct_fields = inner.fields.iter().map(|inner_field| {
            let name = field_ident(&inner_field.name);
            let ty = self.expected_ty(inner_field);
            quote! { pub #name: #ty, }
        });
        let entries: Vec<(proc_macro2::Ident, proc_macro2::TokenStream)> = inner
            .fields
            .iter()
            .map(|inner_field| (field_ident(&inner_field.name), self.sample_expr(inner_field)))
            .collect();
        let ctor = inner.fields.iter().map(|inner_field| {
            let name = field_ident(&inner_field.name);
            quote! { #name, }
        });
        let body = render_strategy_body(&entries, &block_ty, quote! { #(#ctor)* });
        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone)]
            pub struct #block_ty {
                #(#struct_fields)*
            }

            fn #block_fn() -> impl Strategy<Value = #block_ty> {
                #body
            }
        }
    }

    fn block_type_name(&self, field: &ResolvedField) -> proc_macro2::Ident {
        format_ident!(
            "Expected{}{}",
            self.struct_name,
            singular(&field.name).to_upper_camel_case()
        )
    }

    fn block_strategy_name(&self, field: &ResolvedField) -> proc_macro2::Ident {
        format_ident!(
            "{}_{}_strategy",
            self.module_name,
            singular(&field.name).to_snake_case()
        )
    }

    fn expected_ty(&self, field: &ResolvedField) -> proc_macro2::TokenStream {
        match &field.op {
            FieldOp::Scalar { ty } => {
                let ty = ty.rust_type().to_ident();
                quote! { #ty }
            }
            FieldOp::Array { elem, count } => {
                let elem = elem.rust_type().to_ident();
                if *count <= 32 {
                    let count = usize_lit(*count);
                    quote! { [#elem; #count] }
                } else {
                    quote! { Vec<#elem> }
                }
            }
            FieldOp::Bits { container, .. } => {
                let ty = container.rust_type().to_ident();
                quote! { #ty }
            }
            FieldOp::Enum { underlying, .. } => {
                let ty = underlying.rust_type().to_ident();
                quote! { #ty }
            }
            FieldOp::Group { .. } => {
                let block_ty = self.block_type_name(field);
                quote! { Vec<#block_ty> }
            }
        }
    }

    fn sample_expr(&self, field: &ResolvedField) -> proc_macro2::TokenStream {
        match &field.op {
            FieldOp::Scalar { ty } | FieldOp::Bits { container: ty, .. } => {
                let ty = ty.rust_type().to_ident();
                quote! { any::<#ty>() }
            }
            FieldOp::Array { elem, count } => {
                let ty = elem.rust_type().to_ident();
                if *count <= 32 {
                    let uniform = format_ident!("uniform{}", count);
                    quote! { prop::array::#uniform(any::<#ty>()) }
                } else {
                    let count = usize_lit(*count);
                    quote! { prop::collection::vec(any::<#ty>(), #count) }
                }
            }
            FieldOp::Enum { underlying, domain } => enum_sample_expr(*underlying, domain),
            FieldOp::Group { .. } => {
                let block_fn = self.block_strategy_name(field);
                quote! { prop::collection::vec(#block_fn(), 0..=16) }
            }
        }
    }

    fn proptest_block(&self) -> String {
        format!(
            r#"proptest! {{
    #[test]
    fn test_{module}_roundtrip(
        (expected, frame) in {module}_frame_strategy()
    ) {{
        prop_assert_eq!(frame.len(), expected.to_bytes().len() + 8);

        // Parse the generated frame
        let mut parser = ParserBuilder::default().build();
        let mut it = parser.consume_ubx(&frame);

        match it.next() {{
            Some(Ok(_packet)) => {{}}
            Some(Err(e)) => prop_assert!(false, "Parse error: {{:?}}", e),
            None => prop_assert!(false, "No packet parsed"),
        }}
    }}

    #[test]
    fn test_{module}_chaos(
        frame in {module}_chaos_frame_strategy()
    ) {{
        let mut parser = ParserBuilder::default().build();
        let mut it = parser.consume_ubx(&frame);
        prop_assert!(it.next().is_some());
    }}
}}
"#,
            module = self.module_name
        )
    }
}

/// Enum fields sample their declared raw values, with a 1-in-10 bias
/// toward one raw value outside the domain when the domain is not
/// already full, so the decoder fallback path stays exercised.
fn enum_sample_expr(underlying: UbxType, domain: &EnumDomain) -> proc_macro2::TokenStream {
    let suffix = underlying.rust_type();
    let known: Vec<syn::LitInt> = domain
        .values
        .iter()
        .map(|v| {
            syn::parse_str(&format!("{}{}", v.value, suffix)).expect("valid enum raw literal")
        })
        .collect();
    let select = quote! { prop::sample::select(vec![#(#known),*]) };
    match domain.known_invalid_raw(underlying) {
        Some(raw) => {
            let invalid: syn::LitInt =
                syn::parse_str(&format!("{raw}{suffix}")).expect("valid enum raw literal");
            quote! { prop_oneof![9 => #select, 1 => Just(#invalid)] }
        }
        None => select,
    }
}

/// Little-endian write of one expected field into the `wtr` buffer.
fn write_stmt(receiver: proc_macro2::TokenStream, op: &FieldOp) -> proc_macro2::TokenStream {
    let scalar = |ty: UbxType| match ty {
        UbxType::U1 | UbxType::X1 => quote! { wtr.push(#receiver); },
        UbxType::I1 => quote! { wtr.push(#receiver as u8); },
        _ => quote! { wtr.extend_from_slice(&#receiver.to_le_bytes()); },
    };
    match op {
        FieldOp::Scalar { ty } => scalar(*ty),
        FieldOp::Bits { container, .. } => scalar(*container),
        FieldOp::Enum { underlying, .. } => scalar(*underlying),
        FieldOp::Array { elem, .. } => match elem {
            UbxType::U1 | UbxType::X1 => quote! { wtr.extend_from_slice(&#receiver); },
            _ => quote! {
                for v in &#receiver {
                    wtr.extend_from_slice(&v.to_le_bytes());
                }
            },
        },
        FieldOp::Group { .. } => unreachable!("group writes are rendered by the caller"),
    }
}

/// Tuple composition of field strategies, chunked when the field count
/// exceeds what proptest composes into one tuple.
fn render_strategy_body(
    entries: &[(proc_macro2::Ident, proc_macro2::TokenStream)],
    expected: &proc_macro2::Ident,
    ctor: proc_macro2::TokenStream,
) -> proc_macro2::TokenStream {
    match entries.len() {
        0 => quote! { Just(#expected {}) },
        1 => {
            let (pat, strat) = &entries[0];
            quote! { #strat.prop_map(|#pat| #expected { #ctor }) }
        }
        n if n <= MAX_TUPLE_SIZE => {
            let strats = entries.iter().map(|(_, s)| s);
            let pats = entries.iter().map(|(p, _)| p);
            quote! {
                ( #(#strats),* ).prop_map(|( #(#pats),* )| #expected { #ctor })
            }
        }
        _ => {
            let strat_chunks = entries.chunks(TUPLE_CHUNK).map(|chunk| {
                let strats = chunk.iter().map(|(_, s)| s);
                quote! { ( #(#strats),* ) }
            });
            let pat_chunks = entries.chunks(TUPLE_CHUNK).map(|chunk| {
                let pats = chunk.iter().map(|(p, _)| p);
                quote! { ( #(#pats),* ) }
            });
            quote! {
                ( #(#strat_chunks),* ).prop_map(|( #(#pat_chunks),* )| #expected { #ctor })
            }
        }
    }
}

/// Overwrite the sampled count field bytes with the actual instance
/// count in a chaos payload, keeping the payload structurally
/// consistent while every other byte stays arbitrary.
fn patch_count_stmt(count: &ResolvedField) -> proc_macro2::TokenStream {
    let offset = usize_lit(count.offset);
    if count.size == 1 {
        quote! { payload[#offset] = count as u8; }
    } else {
        let end = usize_lit(count.offset + count.size);
        let ty = match count.size {
            2 => quote! { u16 },
            _ => quote! { u32 },
        };
        quote! {
            payload[#offset..#end].copy_from_slice(&(count as #ty).to_le_bytes());
        }
    }
}

/// Runtime strategies over descriptor values, used by the in-crate
/// property tests and by downstream fuzzing behind the `fuzz` feature.
#[cfg(any(test, feature = "fuzz"))]
mod runtime {
    use super::*;
    use crate::backends::codec::encode_payload;
    use crate::value::{EnumValue, FieldValue, MessageValue};
    use proptest::prelude::*;

    /// Upper bound on sampled repeated-group instance counts.
    pub const MAX_GROUP_INSTANCES: usize = 16;

    impl StrategyDescriptor {
        /// Valid mode: every field within its declared domain, group
        /// counts consistent with the count field, enum raws biased
        /// 9:1 toward declared values.
        pub fn valid_values(&self) -> BoxedStrategy<MessageValue> {
            let mut strat = message_value_strategy(&self.layout.fields);
            if let TotalLen::Variable { count_field, .. } = &self.layout.total_len {
                let count_field = count_field.clone();
                strat = strat
                    .prop_map(move |mut value| {
                        let count = value
                            .fields
                            .iter()
                            .find_map(|(_, v)| match v {
                                FieldValue::Groups(groups) => Some(groups.len() as u64),
                                _ => None,
                            })
                            .unwrap_or(0);
                        for (name, v) in value.fields.iter_mut() {
                            if name == &count_field {
                                *v = FieldValue::Unsigned(count);
                            }
                        }
                        value
                    })
                    .boxed();
            }
            strat
        }

        /// Valid mode, serialized: `(expected value, full frame)`
        /// pairs built through the codec's encode rules and the frame
        /// envelope.
        pub fn valid_frames(&self) -> BoxedStrategy<(MessageValue, Vec<u8>)> {
            let layout = self.layout.clone();
            self.valid_values()
                .prop_map(move |value| {
                    let payload = encode_payload(&layout, &value)
                        .expect("sampled values always encode");
                    let frame =
                        ubx_frame::build_frame(layout.ident.class, layout.ident.id, &payload);
                    (value, frame)
                })
                .boxed()
        }

        /// Chaos mode: payloads of a structurally consistent length
        /// with every other byte arbitrary.
        pub fn chaos_payloads(&self) -> BoxedStrategy<Vec<u8>> {
            match &self.layout.total_len {
                TotalLen::Fixed(len) => prop::collection::vec(any::<u8>(), *len).boxed(),
                TotalLen::Variable { prefix, stride, count_field } => {
                    let prefix = *prefix;
                    let stride = *stride;
                    let (offset, size) = self
                        .layout
                        .fields
                        .iter()
                        .find(|f| &f.name == count_field)
                        .map(|f| (f.offset, f.size))
                        .expect("variable layouts resolve their count field");
                    (0usize..=MAX_GROUP_INSTANCES)
                        .prop_flat_map(move |count| {
                            prop::collection::vec(any::<u8>(), prefix + count * stride).prop_map(
                                move |mut payload| {
                                    payload[offset..offset + size].copy_from_slice(
                                        &(count as u64).to_le_bytes()[..size],
                                    );
                                    payload
                                },
                            )
                        })
                        .boxed()
                }
            }
        }

        /// Chaos mode payloads wrapped in well-formed frames.
        pub fn chaos_frames(&self) -> BoxedStrategy<Vec<u8>> {
            let class = self.layout.ident.class;
            let id = self.layout.ident.id;
            self.chaos_payloads()
                .prop_map(move |payload| ubx_frame::build_frame(class, id, &payload))
                .boxed()
        }
    }

    fn message_value_strategy(fields: &[ResolvedField]) -> BoxedStrategy<MessageValue> {
        let mut strat: BoxedStrategy<MessageValue> = Just(MessageValue::default()).boxed();
        for field in fields {
            let name = field.name.clone();
            let field_strat = op_strategy(&field.op);
            strat = (strat, field_strat)
                .prop_map(move |(mut value, field_value)| {
                    value.push(name.clone(), field_value);
                    value
                })
                .boxed();
        }
        strat
    }

    fn op_strategy(op: &FieldOp) -> BoxedStrategy<FieldValue> {
        match op {
            FieldOp::Scalar { ty } => scalar_strategy(*ty),
            FieldOp::Array { elem, count } => {
                prop::collection::vec(scalar_strategy(*elem), *count)
                    .prop_map(FieldValue::Array)
                    .boxed()
            }
            FieldOp::Bits { bits, .. } => {
                let mut strat: BoxedStrategy<Vec<(String, u64)>> = Just(Vec::new()).boxed();
                for bit in bits {
                    let name = bit.name.clone();
                    strat = (strat, 0..=bit.mask())
                        .prop_map(move |(mut values, v)| {
                            values.push((name.clone(), v));
                            values
                        })
                        .boxed();
                }
                strat.prop_map(FieldValue::Bits).boxed()
            }
            FieldOp::Enum { underlying, domain } => {
                let known = prop::sample::select(domain.values.clone())
                    .prop_map(|v| {
                        FieldValue::Enum(EnumValue::Known { raw: v.value, name: v.name })
                    })
                    .boxed();
                match domain.known_invalid_raw(*underlying) {
                    Some(raw) => prop_oneof![
                        9 => known,
                        1 => Just(FieldValue::Enum(EnumValue::Unrecognized { raw })),
                    ]
                    .boxed(),
                    None => known,
                }
            }
            FieldOp::Group { inner, .. } => {
                prop::collection::vec(message_value_strategy(&inner.fields), 0..=MAX_GROUP_INSTANCES)
                    .prop_map(FieldValue::Groups)
                    .boxed()
            }
        }
    }

    fn scalar_strategy(ty: UbxType) -> BoxedStrategy<FieldValue> {
        match ty {
            UbxType::R4 => any::<f32>().prop_map(FieldValue::F32).boxed(),
            UbxType::R8 => any::<f64>().prop_map(FieldValue::F64).boxed(),
            UbxType::I1 => any::<i8>().prop_map(|v| FieldValue::Signed(v as i64)).boxed(),
            UbxType::I2 => any::<i16>().prop_map(|v| FieldValue::Signed(v as i64)).boxed(),
            UbxType::I4 => any::<i32>().prop_map(|v| FieldValue::Signed(v as i64)).boxed(),
            UbxType::I8 => any::<i64>().prop_map(FieldValue::Signed).boxed(),
            _ => (0..=ty.max_unsigned()).prop_map(FieldValue::Unsigned).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::codec::decode_payload;
    use crate::layout::resolve;
    use crate::schema::MessageSchema;
    use crate::value::FieldValue;
    use proptest::prelude::*;

    const MON_RXBUF: &str = r#"{
        "name": "UBX-MON-RXBUF",
        "class_id": "0x0a",
        "message_id": "0x07",
        "payload_length": 24,
        "fields": [
            {"name": "pending", "data_type": {"array_of": "U2", "count": 6}},
            {"name": "usage", "data_type": {"array_of": "U1", "count": 6}},
            {"name": "peakUsage", "data_type": {"array_of": "U1", "count": 6}}
        ]
    }"#;

    const MON_SPAN: &str = r#"{
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
    }"#;

    const ESF_STATUS: &str = r#"{
        "name": "UBX-ESF-STATUS",
        "class_id": "0x10",
        "message_id": "0x10",
        "fields": [
            {"name": "fusionMode", "data_type": "U1", "enumeration": {"values": [
                {"name": "initializing", "value": 0},
                {"name": "fusion", "value": 1},
                {"name": "suspended", "value": 2},
                {"name": "disabled", "value": 3}
            ]}},
            {"name": "flags", "data_type": "X1", "bitfield": {"bits": [
                {"name": "wtInit", "bit_start": 0, "bit_end": 1},
                {"name": "mntAlg", "bit_start": 2, "bit_end": 4}
            ]}},
            {"name": "temperature", "data_type": "I2"}
        ]
    }"#;

    fn descriptor(text: &str) -> StrategyDescriptor {
        let schema = MessageSchema::parse(text).unwrap();
        emit_strategy(&resolve(&schema).unwrap()).unwrap()
    }

    proptest! {
        #[test]
        fn fixed_valid_frames_roundtrip((value, frame) in descriptor(MON_RXBUF).valid_frames()) {
            let parsed = ubx_frame::Frame::parse(&frame).unwrap();
            prop_assert_eq!(parsed.class, 0x0a);
            prop_assert_eq!(parsed.id, 0x07);
            let desc = descriptor(MON_RXBUF);
            let decoded = decode_payload(desc.layout(), parsed.payload).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn variable_valid_frames_roundtrip((value, frame) in descriptor(MON_SPAN).valid_frames()) {
            let parsed = ubx_frame::Frame::parse(&frame).unwrap();
            let desc = descriptor(MON_SPAN);
            let decoded = decode_payload(desc.layout(), parsed.payload).unwrap();
            prop_assert_eq!(&decoded, &value);

            // The declared count always matches the instance vector.
            let Some(FieldValue::Groups(groups)) = value.get("blocks") else {
                panic!("expected sampled groups");
            };
            let Some(FieldValue::Unsigned(count)) = value.get("numRfBlocks") else {
                panic!("expected a sampled count");
            };
            prop_assert_eq!(*count as usize, groups.len());
            prop_assert!(groups.len() <= 16);
        }

        #[test]
        fn enum_and_bitfield_valid_frames_roundtrip(
            (value, frame) in descriptor(ESF_STATUS).valid_frames()
        ) {
            let parsed = ubx_frame::Frame::parse(&frame).unwrap();
            let desc = descriptor(ESF_STATUS);
            let decoded = decode_payload(desc.layout(), parsed.payload).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn chaos_payloads_always_decode(payload in descriptor(ESF_STATUS).chaos_payloads()) {
            let desc = descriptor(ESF_STATUS);
            decode_payload(desc.layout(), &payload).unwrap();
        }

        #[test]
        fn variable_chaos_payloads_always_decode(
            payload in descriptor(MON_SPAN).chaos_payloads()
        ) {
            let desc = descriptor(MON_SPAN);
            decode_payload(desc.layout(), &payload).unwrap();
        }

        #[test]
        fn chaos_frames_carry_valid_checksums(frame in descriptor(MON_RXBUF).chaos_frames()) {
            let parsed = ubx_frame::Frame::parse(&frame).unwrap();
            prop_assert_eq!(parsed.payload.len(), 24);
        }
    }

    #[test]
    fn fixed_artifact_shape() {
        let code = descriptor(MON_RXBUF).generate();
        assert!(code.starts_with("//! Fuzz test for MON-RXBUF"));
        assert!(code.contains("pub struct ExpectedMonRxbuf"));
        assert!(code.contains("uniform6"));
        assert!(code.contains("pub fn to_bytes(&self) -> Vec<u8>"));
        assert!(code.contains("ubx_frame::build_frame("));
        assert!(code.contains("fn test_mon_rxbuf_roundtrip"));
        assert!(code.contains("fn test_mon_rxbuf_chaos"));
    }

    #[test]
    fn variable_artifact_derives_count_from_instances() {
        let code = descriptor(MON_SPAN).generate();
        assert!(code.contains("pub struct ExpectedMonSpanBlock"));
        assert!(code.contains("mon_span_block_strategy"));
        assert!(code.contains("blocks.len() as u8"));
        assert!(code.contains("0..=16"));
    }

    #[test]
    fn enum_sampling_is_biased_toward_declared_values() {
        let code = descriptor(ESF_STATUS).generate();
        assert!(code.contains("prop_oneof!"));
        assert!(code.contains("prop::sample::select"));
        // 4 is the smallest raw outside the declared domain.
        assert!(code.contains("4u8"));
    }

    #[test]
    fn wide_messages_chunk_their_strategy_tuple() {
        let fields: Vec<String> = (0..15)
            .map(|i| format!(r#"{{"name": "field{i}", "data_type": "U1"}}"#))
            .collect();
        let text = format!(
            r#"{{"name": "UBX-TEST-WIDE", "class_id": 1, "message_id": 2, "fields": [{}]}}"#,
            fields.join(",")
        );
        // Rendering parses the generated tokens, so an ill-formed
        // tuple nesting would panic here.
        let code = descriptor(&text).generate();
        assert!(code.contains("field14"));
    }

    #[test]
    fn generation_is_deterministic() {
        let desc = descriptor(MON_SPAN);
        assert_eq!(desc.generate(), desc.generate());
    }
}
