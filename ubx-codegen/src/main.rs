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

//! UBX schema compiler CLI.

use argh::FromArgs;
use std::path::PathBuf;

use ubx_codegen::generator::{generate_all, Corpus};

#[derive(FromArgs, Debug)]
/// UBX message schema compiler.
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option)]
    /// directory containing the JSON schema corpus.
    schema_dir: Option<PathBuf>,

    #[argh(switch)]
    /// list the corpus messages and exit.
    list: bool,

    #[argh(option)]
    /// generate only this message (mnemonic, with or without the
    /// "UBX-" prefix). May be repeated; defaults to the whole corpus.
    message: Vec<String>,

    #[argh(switch)]
    /// generate the whole corpus (the default when no --message is
    /// given).
    all: bool,

    #[argh(option, default = "PathBuf::from(\"generated\")")]
    /// directory receiving the generated packets/ and tests/ trees.
    output: PathBuf,
}

fn main() -> Result<(), String> {
    env_logger::init();
    let opt: Opt = argh::from_env();

    if opt.version {
        println!("ubx-codegen {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(schema_dir) = opt.schema_dir.as_ref() else {
        return Err("No schema directory is specified".to_owned());
    };

    let (corpus, load_failures) =
        Corpus::load(schema_dir).map_err(|err| err.to_string())?;

    if opt.list {
        for name in corpus.names() {
            println!("UBX-{name}");
        }
        return Ok(());
    }

    if corpus.is_empty() {
        return Err(format!("No usable schema records in {}", schema_dir.display()));
    }
    if opt.all && !opt.message.is_empty() {
        return Err("--all and --message are mutually exclusive".to_owned());
    }

    let (written, failures) = generate_all(&corpus, &opt.message, &opt.output);
    println!(
        "generated {} message(s) into {}",
        written.len(),
        opt.output.display()
    );

    let failed = load_failures.len() + failures.len();
    if failed > 0 {
        return Err(format!("{failed} record(s) failed, see warnings above"));
    }
    Ok(())
}
