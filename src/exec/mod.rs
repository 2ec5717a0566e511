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

//! Device executors.
//!
//! Each executor drives one device: it pulls chunks from the scheduler,
//! applies its kernel, and reports per-chunk timing back. The CPU executor
//! runs a short-lived worker pool, the GPU executor is a single driver
//! worker over a [`GpuBackend`], and the NA executor is the reserved no-op.

pub mod cpu;
pub mod gpu;
pub mod na;

pub use cpu::CpuExecutor;
pub use gpu::{GpuBackend, GpuError, GpuExecutor, UnifiedGpuBackend};
pub use na::NaExecutor;

/// Errors raised while orchestrating a multiplication.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Operand matrices disagree on their side length.
    #[error("matrix size mismatch: a={a}, b={b}, result={result}")]
    SizeMismatch { a: usize, b: usize, result: usize },
}
