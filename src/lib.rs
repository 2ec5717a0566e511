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

//! WEFT core library: heterogeneous tiled integer matrix multiplication.
//!
//! The system is split into a tiny bytecode front-end and a runtime that
//! executes the resulting instruction stream across devices:
//!
//! * **Bytecode** → a JSON-Lines instruction format produced by the
//!   `compiler` binary and consumed by the `runtime` binary.
//! * **Matrix buffers** → shared row-major `i32` storage with an
//!   access-state machine arbitrating CPU/GPU/NA reader and writer roles.
//! * **Tiling** → a multiplication is partitioned into disjoint half-open
//!   output tiles sized by matrix magnitude.
//! * **Scheduler** → per-device FIFO queues, work stealing with tile
//!   subdivision, a background balance monitor, and stall recovery.
//! * **Executors** → a CPU worker pool, a single GPU driver worker behind
//!   the [`exec::GpuBackend`] trait, and a reserved no-op NA device.
//! * **Coordinator** → per-multiplication orchestration: tile, partition,
//!   launch one executor per device, join, wait for completion.
//!
//! Devices are scheduled symmetrically: the NA (neural accelerator) device
//! is a first-class member of the scheduling model even though its executor
//! is permanently a no-op in this release.
//!
//! Diagnostics are emitted through `tracing`; both binaries install an
//! `EnvFilter`-driven subscriber, so `RUST_LOG=weft=debug` surfaces the full
//! scheduler trace.

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod exec;
pub mod matrix;
pub mod partition;
pub mod profiler;
pub mod runtime;
pub mod sched;

pub use bytecode::{BytecodeError, Instruction, Opcode, Program};
pub use config::ExecConfig;
pub use coordinator::Coordinator;
pub use matrix::chunks::{block_size_for, create_work_chunks, WorkChunk};
pub use matrix::{AccessState, MatrixBuffer, MatrixError};
pub use partition::partition_work;
pub use profiler::Profiler;
pub use runtime::{Runtime, RuntimeError};
pub use sched::scheduler::Scheduler;
pub use sched::Device;
