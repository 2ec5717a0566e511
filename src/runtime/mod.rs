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

//! Bytecode interpreter.
//!
//! Executes the matrix subset of the instruction set over injected input
//! and output streams: `READ_INTEGER` binds `n`, `READ_MATRIX` and
//! `ALLOC_MATRIX` create named buffers, `MATRIX_MULTIPLY` dispatches to the
//! coordinator, `WRITE_MATRIX` emits `result` row-major, and `TERMINATE`
//! destroys all live buffers. The eight reserved opcodes are rejected
//! rather than silently skipped.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing::debug;

use crate::bytecode::{Instruction, Opcode, Program};
use crate::config::ExecConfig;
use crate::coordinator::Coordinator;
use crate::exec::ExecError;
use crate::matrix::{MatrixBuffer, MatrixError};
use crate::profiler::Profiler;

/// Errors surfaced while interpreting a program.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Input ended or held a malformed token.
    #[error("failed to read {what}")]
    Input { what: &'static str },
    /// An underlying stream failed.
    #[error("I/O failed while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// `n` is unset, zero, or negative at a matrix instruction.
    #[error("invalid matrix size {0}")]
    InvalidMatrixSize(i64),
    /// A named buffer was required but never created.
    #[error("matrix '{0}' not found")]
    MissingMatrix(String),
    /// An instruction arrived with the wrong operand shape.
    #[error("invalid operands for {0}")]
    InvalidOperands(Opcode),
    /// A reserved opcode reached the interpreter.
    #[error("instruction {0} is reserved and not interpreted")]
    UnsupportedInstruction(Opcode),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Whitespace-token reader over a buffered input stream, matching the
/// stream-extraction semantics the bytecode's I/O instructions assume.
struct Tokens<'a, R: BufRead> {
    reader: &'a mut R,
    pending: Vec<String>,
}

impl<'a, R: BufRead> Tokens<'a, R> {
    fn new(reader: &'a mut R) -> Self {
        Tokens {
            reader,
            pending: Vec::new(),
        }
    }

    fn next_i64(&mut self, what: &'static str) -> Result<i64, RuntimeError> {
        loop {
            if let Some(token) = self.pending.pop() {
                return token
                    .parse::<i64>()
                    .map_err(|_| RuntimeError::Input { what });
            }
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|source| RuntimeError::Io {
                    context: "reading input",
                    source,
                })?;
            if read == 0 {
                return Err(RuntimeError::Input { what });
            }
            self.pending
                .extend(line.split_whitespace().rev().map(str::to_string));
        }
    }

    fn next_i32(&mut self, what: &'static str) -> Result<i32, RuntimeError> {
        let value = self.next_i64(what)?;
        i32::try_from(value).map_err(|_| RuntimeError::Input { what })
    }
}

/// Bytecode interpreter holding the live buffers and the device stack.
pub struct Runtime {
    coordinator: Coordinator,
    matrices: HashMap<String, Arc<MatrixBuffer>>,
    variables: HashMap<String, i64>,
}

impl Runtime {
    pub fn new(config: ExecConfig) -> Self {
        Runtime {
            coordinator: Coordinator::new(config),
            matrices: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        self.coordinator.profiler()
    }

    /// Interpret `program` over the given input and output streams.
    pub fn execute<R: BufRead, W: Write>(
        &mut self,
        program: &Program,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), RuntimeError> {
        debug!(
            instructions = program.instructions.len(),
            "starting program execution"
        );
        let mut tokens = Tokens::new(input);
        for instr in &program.instructions {
            debug!(op = %instr.operation, "executing instruction");
            self.profiler().start_timer(instr.operation.as_str());
            let outcome = self.execute_instruction(instr, &mut tokens, output);
            self.profiler().stop_timer(instr.operation.as_str());
            outcome?;
        }
        debug!("program execution complete");
        Ok(())
    }

    fn execute_instruction<R: BufRead, W: Write>(
        &mut self,
        instr: &Instruction,
        tokens: &mut Tokens<'_, R>,
        output: &mut W,
    ) -> Result<(), RuntimeError> {
        match instr.operation {
            Opcode::ReadInteger => {
                let value = tokens.next_i64("integer")?;
                self.variables.insert("n".to_string(), value);
                Ok(())
            }
            Opcode::ReadMatrix => {
                let n = self.matrix_size()?;
                self.read_matrix(n, &instr.label, tokens)
            }
            Opcode::AllocMatrix => {
                let n = self.matrix_size()?;
                if !self.matrices.contains_key(&instr.label) {
                    self.matrices
                        .insert(instr.label.clone(), Arc::new(MatrixBuffer::new(n)?));
                }
                Ok(())
            }
            Opcode::MatrixMultiply => {
                if instr.operands.len() < 3 {
                    return Err(RuntimeError::InvalidOperands(Opcode::MatrixMultiply));
                }
                let a = self.named_matrix("matrix1")?;
                let b = self.named_matrix("matrix2")?;
                let result = self.named_matrix("result")?;
                self.coordinator
                    .execute_matrix_multiplication(&a, &b, &result)?;
                Ok(())
            }
            Opcode::WriteMatrix => {
                let matrix = self.named_matrix("result")?;
                self.write_matrix(&matrix, output)
            }
            Opcode::Terminate => {
                self.matrices.clear();
                Ok(())
            }
            reserved => Err(RuntimeError::UnsupportedInstruction(reserved)),
        }
    }

    fn matrix_size(&self) -> Result<usize, RuntimeError> {
        let n = self.variables.get("n").copied().unwrap_or(0);
        if n <= 0 {
            return Err(RuntimeError::InvalidMatrixSize(n));
        }
        Ok(n as usize)
    }

    fn named_matrix(&self, name: &str) -> Result<Arc<MatrixBuffer>, RuntimeError> {
        self.matrices
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingMatrix(name.to_string()))
    }

    fn read_matrix<R: BufRead>(
        &mut self,
        n: usize,
        label: &str,
        tokens: &mut Tokens<'_, R>,
    ) -> Result<(), RuntimeError> {
        if !self.matrices.contains_key(label) {
            self.matrices
                .insert(label.to_string(), Arc::new(MatrixBuffer::new(n)?));
        }
        let matrix = self.named_matrix(label)?;
        let view = matrix.cpu_write();
        for idx in 0..n * n {
            match tokens.next_i32("matrix element") {
                Ok(value) => view.store(idx / n, idx % n, value),
                Err(err) => {
                    // Drop the partial write claim before surfacing.
                    matrix.release_cpu_access();
                    return Err(err);
                }
            }
        }
        matrix.release_cpu_access();
        Ok(())
    }

    fn write_matrix<W: Write>(
        &self,
        matrix: &MatrixBuffer,
        output: &mut W,
    ) -> Result<(), RuntimeError> {
        let n = matrix.size();
        let view = matrix.cpu_read();
        let io_err = |source| RuntimeError::Io {
            context: "writing matrix output",
            source,
        };
        for i in 0..n {
            for j in 0..n {
                let sep = if j + 1 < n { " " } else { "" };
                if let Err(e) = write!(output, "{}{sep}", view.at(i, j)) {
                    matrix.release_cpu_access();
                    return Err(io_err(e));
                }
            }
            if let Err(e) = writeln!(output) {
                matrix.release_cpu_access();
                return Err(io_err(e));
            }
        }
        matrix.release_cpu_access();
        Ok(())
    }
}
