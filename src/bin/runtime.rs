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

//! Bytecode runtime CLI: interpret a `.jsonl` instruction stream, reading
//! matrix data from standard input and writing results to standard output.
//! The execution report goes to standard error.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use weft::{ExecConfig, Program, Runtime};

#[derive(Parser, Debug)]
#[command(name = "runtime")]
#[command(about = "Execute a WEFT bytecode program", long_about = None)]
#[command(version)]
struct Cli {
    /// Bytecode file (JSON Lines) to execute.
    input: PathBuf,

    /// Accepted for compatibility; large-matrix placement is governed by
    /// the DISTRIBUTION and GPU_ONLY environment variables.
    #[arg(long)]
    use_gpu_for_large: bool,

    /// Accepted for compatibility; the NA device is reserved in this
    /// release.
    #[arg(long)]
    use_ane_for_large: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.use_gpu_for_large {
        warn!("--use-gpu-for-large acknowledged; placement is env-driven");
    }
    if cli.use_ane_for_large {
        warn!("--use-ane-for-large acknowledged; the NA device is reserved");
    }

    let file = match File::open(&cli.input) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open {}: {err}", cli.input.display());
            process::exit(1);
        }
    };
    let program = match Program::from_jsonl(BufReader::new(file)) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("error parsing bytecode: {err}");
            process::exit(1);
        }
    };

    let mut runtime = Runtime::new(ExecConfig::from_env());
    let mut stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    let outcome = runtime.execute(&program, &mut stdin, &mut stdout);
    runtime.profiler().print_report();
    if let Err(err) = outcome {
        eprintln!("runtime error: {err}");
        process::exit(1);
    }
}
