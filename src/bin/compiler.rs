// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the WEFT project (Work-stealing Execution Fabric for Tiles).

//! Bytecode compiler CLI: analyze a source program and emit its
//! JSON-Lines instruction stream next to the input as `<input>.jsonl`.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use weft::compiler;

#[derive(Parser, Debug)]
#[command(name = "compiler")]
#[command(about = "Compile a source program to WEFT bytecode", long_about = None)]
#[command(version)]
struct Cli {
    /// Input source file to compile.
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match compiler::compile_to_jsonl(&cli.input) {
        Ok(out_path) => {
            println!("compiled {} -> {}", cli.input.display(), out_path.display());
        }
        Err(err) => {
            eprintln!("compilation failed: {err}");
            process::exit(1);
        }
    }
}
