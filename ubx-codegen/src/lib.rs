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

//! UBX message schema compiler.
//!
//! Turns declarative JSON schemas of u-blox UBX messages into two
//! mechanically correlated artifacts per message: a codec definition
//! and a proptest fuzz harness. Schemas are validated
//! ([`schema`]), resolved into a concrete byte layout ([`layout`]),
//! and handed to the two emitters ([`backends::codec`],
//! [`backends::strategy`]), which both read the very same resolved
//! layout. The [`generator`] module ties the pipeline to the schema
//! corpus on disk.

pub mod backends;
pub mod generator;
pub mod layout;
pub mod schema;
pub mod value;
