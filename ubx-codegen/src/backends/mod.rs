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

//! Backend emitters.
//!
//! Both emitters consume the same [`ResolvedLayout`] instance; a
//! codec descriptor and a strategy descriptor are never derived from
//! two separate resolutions of a schema.
//!
//! [`ResolvedLayout`]: crate::layout::ResolvedLayout

use crate::layout::{FieldOp, ResolvedLayout};
use quote::format_ident;

pub mod codec;
pub mod strategy;

pub use heck::{ToSnakeCase, ToUpperCamelCase};

/// A field shape the emitters cannot express yet. The message is
/// skipped with a diagnostic instead of failing the whole batch.
#[derive(Debug, thiserror::Error)]
#[error("message {message}: field {field} is not supported by the emitters: {reason}")]
pub struct UnsupportedFieldError {
    pub message: String,
    pub field: String,
    pub reason: &'static str,
}

/// Both emitters only render plain scalars and byte arrays inside
/// repeated group instances.
pub(crate) fn check_group_fields(layout: &ResolvedLayout) -> Result<(), UnsupportedFieldError> {
    for field in &layout.fields {
        let FieldOp::Group { inner, .. } = &field.op else { continue };
        for inner_field in &inner.fields {
            let reason = match inner_field.op {
                FieldOp::Enum { .. } => "enum-mapped fields inside repeated groups",
                FieldOp::Bits { .. } => "bitfields inside repeated groups",
                _ => continue,
            };
            return Err(UnsupportedFieldError {
                message: layout.name.clone(),
                field: inner_field.name.clone(),
                reason,
            });
        }
    }
    Ok(())
}

/// Strip a plural `s` from a group field name so the per-instance
/// type name reads naturally (`blocks` -> `Block`).
pub(crate) fn singular(name: &str) -> &str {
    name.strip_suffix('s').filter(|s| !s.is_empty()).unwrap_or(name)
}

pub trait ToIdent {
    /// Generate a sanitized rust identifier.
    /// Rust specific keywords are renamed for validity.
    fn to_ident(self) -> proc_macro2::Ident;
}

impl ToIdent for &'_ str {
    fn to_ident(self) -> proc_macro2::Ident {
        match self {
            "as" | "break" | "const" | "continue" | "crate" | "else" | "enum" | "extern"
            | "false" | "fn" | "for" | "if" | "impl" | "in" | "let" | "loop" | "match" | "mod"
            | "move" | "mut" | "pub" | "ref" | "return" | "self" | "Self" | "static" | "struct"
            | "super" | "trait" | "true" | "type" | "unsafe" | "use" | "where" | "while"
            | "async" | "await" | "dyn" | "abstract" | "become" | "box" | "do" | "final"
            | "macro" | "override" | "priv" | "typeof" | "unsized" | "virtual" | "yield"
            | "try" => format_ident!("r#{}", self),
            _ => format_ident!("{}", self),
        }
    }
}

/// Snake-case identifier for a schema field name.
pub fn field_ident(name: &str) -> proc_macro2::Ident {
    name.to_snake_case().as_str().to_ident()
}

/// Enum variant identifier for a declared value name. Non-alphanumeric
/// characters are stripped and a leading digit gets a `V` prefix.
pub fn variant_ident(name: &str) -> proc_macro2::Ident {
    let camel: String =
        name.to_upper_camel_case().chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let camel = if camel.is_empty() { "Value".to_owned() } else { camel };
    if camel.starts_with(|c: char| c.is_ascii_digit()) {
        format_ident!("V{}", camel)
    } else {
        format_ident!("{}", camel)
    }
}

/// Format a byte as the `0x..` literal used in `#[ubx(..)]` attributes.
pub fn hex_lit(value: u8) -> syn::LitInt {
    syn::parse_str::<syn::LitInt>(&format!("{value:#04x}")).expect("valid hex literal")
}

pub fn usize_lit(value: usize) -> proc_macro2::Literal {
    proc_macro2::Literal::usize_unsuffixed(value)
}

/// Truncate a schema description for use as a one-line doc comment.
pub fn doc_line(description: &str, limit: usize) -> String {
    if description.len() > limit {
        let cut = description
            .char_indices()
            .take_while(|(i, _)| *i < limit - 3)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!(" {}...", &description[..cut])
    } else {
        format!(" {description}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_escaped() {
        assert_eq!("type".to_ident().to_string(), "r#type");
        assert_eq!("version".to_ident().to_string(), "version");
    }

    #[test]
    fn variant_names_are_sanitized() {
        assert_eq!(variant_ident("gpsL1C/A").to_string(), "GpsL1CA");
        assert_eq!(variant_ident("2d-fix").to_string(), "V2dFix");
        assert_eq!(variant_ident("noFix").to_string(), "NoFix");
    }

    #[test]
    fn doc_lines_are_truncated() {
        assert_eq!(doc_line("short", 80), " short");
        let long = "x".repeat(100);
        let line = doc_line(&long, 80);
        assert!(line.ends_with("..."));
        assert!(line.len() <= 81);
    }
}
