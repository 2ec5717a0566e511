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

//! The bytecode instruction stream and its JSON-Lines encoding.
//!
//! Each line of a bytecode file is one instruction object:
//!
//! ```json
//! {"operation": "READ_MATRIX", "operands": [0], "label": "matrix1"}
//! ```
//!
//! Fourteen opcodes are defined; only the matrix I/O subset plus
//! `TERMINATE` is interpreted by the runtime today, the rest are reserved.
//! Unknown operation strings deserialize to `TERMINATE` so newer producers
//! degrade instead of failing to load.

pub mod opt;

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

/// Bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    ReadInteger,
    ReadMatrix,
    AllocMatrix,
    WriteMatrix,
    MatrixMultiply,
    Add,
    Sub,
    Jump,
    JumpIfZero,
    LoopBegin,
    LoopEnd,
    Store,
    Load,
    #[serde(other)]
    Terminate,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::ReadInteger => "READ_INTEGER",
            Opcode::ReadMatrix => "READ_MATRIX",
            Opcode::AllocMatrix => "ALLOC_MATRIX",
            Opcode::WriteMatrix => "WRITE_MATRIX",
            Opcode::MatrixMultiply => "MATRIX_MULTIPLY",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfZero => "JUMP_IF_ZERO",
            Opcode::LoopBegin => "LOOP_BEGIN",
            Opcode::LoopEnd => "LOOP_END",
            Opcode::Store => "STORE",
            Opcode::Load => "LOAD",
            Opcode::Terminate => "TERMINATE",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub operation: Opcode,
    #[serde(default)]
    pub operands: Vec<i64>,
    #[serde(default)]
    pub label: String,
}

impl Instruction {
    pub fn new(operation: Opcode, operands: Vec<i64>, label: impl Into<String>) -> Self {
        Instruction {
            operation,
            operands,
            label: label.into(),
        }
    }
}

/// A linear bytecode program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

/// Errors loading or storing bytecode.
#[derive(Debug, thiserror::Error)]
pub enum BytecodeError {
    #[error("invalid bytecode at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("bytecode I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Program {
    /// Parse a JSON-Lines bytecode stream. Blank lines are skipped.
    pub fn from_jsonl(reader: impl BufRead) -> Result<Program, BytecodeError> {
        let mut instructions = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let instr = serde_json::from_str(&line)
                .map_err(|source| BytecodeError::Parse { line: idx + 1, source })?;
            instructions.push(instr);
        }
        Ok(Program { instructions })
    }

    /// Serialize as JSON Lines, one instruction per line.
    pub fn to_jsonl(&self, writer: &mut impl Write) -> Result<(), BytecodeError> {
        for instr in &self.instructions {
            let json = serde_json::to_string(instr)
                .map_err(|source| BytecodeError::Parse { line: 0, source })?;
            writeln!(writer, "{json}")?;
        }
        Ok(())
    }
}
