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

//! Generation pipeline.
//!
//! Loads a schema corpus from disk, runs each record through the
//! resolver and both emitters, and writes the artifact pair of every
//! message. A failure is local to its record: the batch continues and
//! the failures are reported together at the end.

use crate::backends::codec::emit_codec;
use crate::backends::strategy::emit_strategy;
use crate::backends::UnsupportedFieldError;
use crate::layout::{resolve, LayoutConflictError};
use crate::schema::{MessageId, MessageSchema, SchemaValidationError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("no schema named {0} in the corpus")]
    UnknownMessage(String),
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
    #[error(transparent)]
    Layout(#[from] LayoutConflictError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFieldError),
    #[error("message {name} reuses identifier {ident} already claimed by {existing}")]
    DuplicateIdent { name: String, ident: MessageId, existing: String },
    #[error("message {0} is declared by more than one corpus record")]
    DuplicateName(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An in-memory schema corpus, keyed by message mnemonic.
#[derive(Debug, Default)]
pub struct Corpus {
    records: BTreeMap<String, MessageSchema>,
}

impl Corpus {
    /// Load every `*.json` record of a corpus directory.
    ///
    /// Records are visited in file name order so repeated loads see
    /// the corpus identically. Invalid records and identifier clashes
    /// are collected and returned next to the corpus; only a failure
    /// to read the directory itself aborts the load.
    pub fn load(dir: &Path) -> Result<(Corpus, Vec<(PathBuf, GenerateError)>), GenerateError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| GenerateError::Io { path: dir.to_owned(), source })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut corpus = Corpus::default();
        let mut failures = Vec::new();
        let mut idents: BTreeMap<MessageId, String> = BTreeMap::new();
        for path in paths {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(source) => {
                    let err = GenerateError::Io { path: path.clone(), source };
                    log::warn!("{err}");
                    failures.push((path, err));
                    continue;
                }
            };
            match MessageSchema::parse(&text) {
                Ok(schema) => {
                    // The mnemonic is the corpus key; a second record
                    // under the same name must not shadow the first.
                    if corpus.records.contains_key(&schema.name) {
                        let err = GenerateError::DuplicateName(schema.name.clone());
                        log::warn!("{}: {err}", path.display());
                        failures.push((path, err));
                        continue;
                    }
                    if let Some(existing) = idents.get(&schema.ident) {
                        let err = GenerateError::DuplicateIdent {
                            name: schema.name.clone(),
                            ident: schema.ident,
                            existing: existing.clone(),
                        };
                        log::warn!("{}: {err}", path.display());
                        failures.push((path, err));
                        continue;
                    }
                    idents.insert(schema.ident, schema.name.clone());
                    corpus.records.insert(schema.name.clone(), schema);
                }
                Err(err) => {
                    log::warn!("{}: {err}", path.display());
                    failures.push((path, err.into()));
                }
            }
        }
        Ok((corpus, failures))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Message mnemonics in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Look up a record by mnemonic, with or without the `UBX-`
    /// prefix.
    pub fn get(&self, name: &str) -> Option<&MessageSchema> {
        self.records.get(name.strip_prefix("UBX-").unwrap_or(name))
    }
}

/// The two rendered artifacts of one message.
#[derive(Debug, Clone)]
pub struct ArtifactPair {
    pub message: String,
    pub module_name: String,
    pub codec: String,
    pub strategy: String,
}

impl ArtifactPair {
    pub fn codec_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join("packets").join(format!("{}.rs", self.module_name))
    }

    pub fn strategy_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join("tests").join(format!("fuzz_{}.rs", self.module_name))
    }

    /// Write both artifacts under `out_dir`.
    pub fn write(&self, out_dir: &Path) -> Result<(), GenerateError> {
        write_atomic(&self.codec_path(out_dir), &self.codec)?;
        write_atomic(&self.strategy_path(out_dir), &self.strategy)
    }
}

/// Run one schema through the resolver and both emitters.
///
/// Both descriptors are derived from the same resolved layout.
pub fn generate_message(schema: &MessageSchema) -> Result<ArtifactPair, GenerateError> {
    let layout = resolve(schema)?;
    let codec = emit_codec(&layout)?;
    let strategy = emit_strategy(&layout)?;
    debug_assert_eq!(codec.module_name, strategy.module_name);
    Ok(ArtifactPair {
        message: schema.name.clone(),
        module_name: codec.module_name.clone(),
        codec: codec.generate(),
        strategy: strategy.generate(),
    })
}

/// Generate and write the artifact pairs of the selected messages, or
/// of the whole corpus when the selection is empty.
///
/// Failures never stop the batch; they come back paired with the name
/// that caused them.
pub fn generate_all(
    corpus: &Corpus,
    selection: &[String],
    out_dir: &Path,
) -> (Vec<ArtifactPair>, Vec<(String, GenerateError)>) {
    let mut written = Vec::new();
    let mut failures = Vec::new();

    let selected: Vec<&MessageSchema> = if selection.is_empty() {
        corpus.records.values().collect()
    } else {
        let mut selected = Vec::with_capacity(selection.len());
        for name in selection {
            match corpus.get(name) {
                Some(schema) => selected.push(schema),
                None => {
                    let err = GenerateError::UnknownMessage(name.clone());
                    log::warn!("{err}");
                    failures.push((name.clone(), err));
                }
            }
        }
        selected
    };

    for schema in selected {
        let result = generate_message(schema).and_then(|pair| {
            pair.write(out_dir)?;
            Ok(pair)
        });
        match result {
            Ok(pair) => {
                log::info!(
                    "generated {} -> {}",
                    pair.message,
                    pair.codec_path(out_dir).display()
                );
                written.push(pair);
            }
            Err(err) => {
                log::warn!("skipping {}: {err}", schema.name);
                failures.push((schema.name.clone(), err));
            }
        }
    }
    (written, failures)
}

/// Write a file through a rename so readers never observe a partial
/// artifact.
fn write_atomic(path: &Path, contents: &str) -> Result<(), GenerateError> {
    let io_err = |source| GenerateError::Io { path: path.to_owned(), source };
    let dir = path.parent().expect("artifact paths have a parent");
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents.as_bytes()).map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    const ACK_ACK: &str = r#"{
        "name": "UBX-ACK-ACK",
        "class_id": 5,
        "message_id": 1,
        "payload_length": 2,
        "fields": [
            {"name": "clsId", "data_type": "U1"},
            {"name": "msgId", "data_type": "U1"}
        ]
    }"#;

    fn seed_corpus(dir: &Path) {
        fs::write(dir.join("mon_rxbuf.json"), MON_RXBUF).unwrap();
        fs::write(dir.join("ack_ack.json"), ACK_ACK).unwrap();
    }

    #[test]
    fn load_collects_record_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (corpus, failures) = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, GenerateError::Schema(_)));
        assert_eq!(corpus.names().collect::<Vec<_>>(), vec!["ACK-ACK", "MON-RXBUF"]);
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        // Same class/id as ACK-ACK under a different mnemonic.
        fs::write(
            dir.path().join("zz_clash.json"),
            r#"{"name": "UBX-ACK-CLONE", "class_id": 5, "message_id": 1,
                "fields": [{"name": "x", "data_type": "U2"}]}"#,
        )
        .unwrap();

        let (corpus, failures) = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(matches!(failures[0].1, GenerateError::DuplicateIdent { .. }));
    }

    #[test]
    fn duplicate_mnemonics_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        // Same mnemonic as ACK-ACK under a fresh class/id pair; the
        // file sorts last so the original record is loaded first.
        fs::write(
            dir.path().join("zz_retake.json"),
            r#"{"name": "UBX-ACK-ACK", "class_id": 5, "message_id": 2,
                "fields": [{"name": "x", "data_type": "U2"}]}"#,
        )
        .unwrap();

        let (corpus, failures) = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, GenerateError::DuplicateName(_)));
        // The first record keeps the mnemonic.
        assert_eq!(corpus.get("ACK-ACK").unwrap().ident.id, 1);
    }

    #[test]
    fn lookup_accepts_both_spellings() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        let (corpus, _) = Corpus::load(dir.path()).unwrap();
        assert!(corpus.get("MON-RXBUF").is_some());
        assert!(corpus.get("UBX-MON-RXBUF").is_some());
        assert!(corpus.get("MON-NOPE").is_none());
    }

    #[test]
    fn unknown_selection_is_reported_without_stopping_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        let (corpus, _) = Corpus::load(dir.path()).unwrap();
        let out = tempfile::tempdir().unwrap();

        let selection = vec!["MON-RXBUF".to_owned(), "MON-NOPE".to_owned()];
        let (written, failures) = generate_all(&corpus, &selection, out.path());
        assert_eq!(written.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, GenerateError::UnknownMessage(_)));
    }

    #[test]
    fn artifacts_land_in_packets_and_tests_trees() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        let (corpus, _) = Corpus::load(dir.path()).unwrap();
        let out = tempfile::tempdir().unwrap();

        let (written, failures) = generate_all(&corpus, &[], out.path());
        assert!(failures.is_empty());
        assert_eq!(written.len(), 2);
        assert!(out.path().join("packets/mon_rxbuf.rs").is_file());
        assert!(out.path().join("tests/fuzz_mon_rxbuf.rs").is_file());
        assert!(out.path().join("packets/ack_ack.rs").is_file());
        assert!(out.path().join("tests/fuzz_ack_ack.rs").is_file());
    }

    #[test]
    fn regeneration_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        let (corpus, _) = Corpus::load(dir.path()).unwrap();
        let out = tempfile::tempdir().unwrap();

        generate_all(&corpus, &[], out.path());
        let first = fs::read(out.path().join("packets/mon_rxbuf.rs")).unwrap();
        generate_all(&corpus, &[], out.path());
        let second = fs::read(out.path().join("packets/mon_rxbuf.rs")).unwrap();
        assert_eq!(first, second);
    }
}
