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

//! Bytecode front-end: source analysis and instruction-stream generation.
//!
//! The front-end recognizes the matrix-multiplication program shape —
//! integer input, two matrix reads, a triply nested multiply-accumulate,
//! and matrix output — and emits the canonical instruction stream for it.
//! Detection is heuristic over the source text; a source that does not look
//! like a multiplication still compiles (with a warning) to the canonical
//! stream, matching the front-end's single-program scope.

use std::path::Path;

use tracing::{debug, warn};

use crate::bytecode::{opt, Instruction, Opcode, Program};

/// Operations detected in a source program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceAnalysis {
    /// Integer input from standard input.
    pub reads_input: bool,
    /// Matrix-shaped allocations seen.
    pub matrix_allocs: usize,
    /// A triply nested loop performing multiply-accumulate.
    pub has_multiply_pattern: bool,
    /// Output to standard output.
    pub writes_output: bool,
}

/// Errors from the compiler front-end.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Bytecode(#[from] crate::bytecode::BytecodeError),
}

/// Scan source text for the operations the bytecode format can express.
pub fn analyze_source(source: &str) -> SourceAnalysis {
    let mut analysis = SourceAnalysis::default();
    let mut loop_depth = 0usize;
    let mut max_loop_depth = 0usize;
    let mut multiply_in_loop = false;
    let mut accumulate_in_loop = false;

    for line in source.lines() {
        let line = line.trim();
        if line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        if line.contains("cin >>") || line.contains("scanf") || line.contains("read_line") {
            analysis.reads_input = true;
        }
        if line.contains("cout <<") || line.contains("printf") || line.contains("println") {
            analysis.writes_output = true;
        }
        if (line.contains("matrix") || line.contains("result"))
            && (line.contains("vector") || line.contains("Vec") || line.contains("new "))
        {
            analysis.matrix_allocs += 1;
        }
        if line.starts_with("for ") || line.starts_with("for(") || line.starts_with("while ") {
            loop_depth += 1;
            max_loop_depth = max_loop_depth.max(loop_depth);
        }
        if loop_depth >= 3 {
            if line.contains('*') {
                multiply_in_loop = true;
            }
            if line.contains("+=") || line.contains("sum") {
                accumulate_in_loop = true;
            }
        }
        // Closing braces unwind nesting; a coarse count is enough here.
        loop_depth = loop_depth.saturating_sub(line.matches('}').count());
    }

    analysis.has_multiply_pattern = max_loop_depth >= 3 && multiply_in_loop && accumulate_in_loop;
    debug!(?analysis, "source analysis complete");
    analysis
}

/// Emit the canonical instruction stream for a multiplication program.
pub fn generate_program(analysis: &SourceAnalysis) -> Program {
    if !analysis.has_multiply_pattern {
        warn!("no multiply pattern detected; emitting canonical stream anyway");
    }
    Program {
        instructions: vec![
            Instruction::new(Opcode::ReadInteger, vec![], ""),
            Instruction::new(Opcode::ReadMatrix, vec![0], "matrix1"),
            Instruction::new(Opcode::ReadMatrix, vec![1], "matrix2"),
            Instruction::new(Opcode::AllocMatrix, vec![2], "result"),
            Instruction::new(Opcode::MatrixMultiply, vec![0, 1, 2], ""),
            Instruction::new(Opcode::WriteMatrix, vec![2], "result"),
            Instruction::new(Opcode::Terminate, vec![], ""),
        ],
    }
}

/// Compile a source file into an optimized bytecode program.
pub fn compile_file(path: &Path) -> Result<Program, CompileError> {
    let source = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let analysis = analyze_source(&source);
    let mut program = generate_program(&analysis);
    opt::optimize(&mut program);
    Ok(program)
}

/// Compile `path` and write the bytecode next to it as `<path>.jsonl`.
/// Returns the output path.
pub fn compile_to_jsonl(path: &Path) -> Result<std::path::PathBuf, CompileError> {
    let program = compile_file(path)?;
    let mut out_path = path.as_os_str().to_owned();
    out_path.push(".jsonl");
    let out_path = std::path::PathBuf::from(out_path);
    let mut file =
        std::fs::File::create(&out_path).map_err(|source| CompileError::Write {
            path: out_path.display().to_string(),
            source,
        })?;
    program.to_jsonl(&mut file)?;
    Ok(out_path)
}
