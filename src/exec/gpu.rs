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

//! GPU executor: a single driver worker dispatching tiles to a backend.
//!
//! The backend contract is abstract so a discrete-device implementation can
//! be substituted; the in-tree [`UnifiedGpuBackend`] executes the tiled
//! kernel over the buffer's unified device mirror on the driver thread.
//! Each chunk maps to a two-dimensional dispatch grid in tiles of side 16.
//!
//! The GPU path computes exactly its own chunks (it does not recompute the
//! whole matrix), so its output region never overlaps the CPU's.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::matrix::chunks::WorkChunk;
use crate::matrix::MatrixBuffer;
use crate::profiler::Profiler;
use crate::sched::scheduler::Scheduler;
use crate::sched::Device;

/// Threadgroup side length of the dispatch grid.
const TILE: usize = 16;

/// Structured failure from a GPU backend.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// No usable device behind this backend.
    #[error("GPU backend unavailable: {0}")]
    Unavailable(String),
    /// A dispatch was rejected or failed on the device.
    #[error("GPU dispatch failed: {0}")]
    Dispatch(String),
}

/// Abstract contract for GPU execution backends.
///
/// A concrete implementation owns command submission and the device-side
/// kernel; the executor handles queue pulls, access-state transitions, and
/// timing around it.
pub trait GpuBackend: Send + Sync {
    /// Compute `result[chunk] = a · b` on the device mirror.
    fn dispatch(
        &self,
        a: &MatrixBuffer,
        b: &MatrixBuffer,
        result: &MatrixBuffer,
        chunk: WorkChunk,
    ) -> Result<(), GpuError>;

    /// Block until all prior dispatches are visible.
    fn synchronize(&self) -> Result<(), GpuError>;
}

/// In-process backend over the unified device mirror.
///
/// Dispatch walks the chunk's 16×16 grid the way a threadgroup launch
/// would, accumulating in two's-complement 32-bit arithmetic.
#[derive(Debug, Default)]
pub struct UnifiedGpuBackend;

impl GpuBackend for UnifiedGpuBackend {
    fn dispatch(
        &self,
        a: &MatrixBuffer,
        b: &MatrixBuffer,
        result: &MatrixBuffer,
        chunk: WorkChunk,
    ) -> Result<(), GpuError> {
        let n = a.size();
        let av = a.device_view();
        let bv = b.device_view();
        let rv = result.device_view();

        let mut ti = chunk.start_row;
        while ti < chunk.end_row {
            let i_end = (ti + TILE).min(chunk.end_row);
            let mut tj = chunk.start_col;
            while tj < chunk.end_col {
                let j_end = (tj + TILE).min(chunk.end_col);
                for i in ti..i_end {
                    for j in tj..j_end {
                        let mut acc = 0i32;
                        for k in 0..n {
                            acc = acc.wrapping_add(av.load(i, k).wrapping_mul(bv.load(k, j)));
                        }
                        rv.store(i, j, acc);
                    }
                }
                tj = j_end;
            }
            ti = i_end;
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<(), GpuError> {
        // Unified memory: stores are already ordered by the buffer's
        // release fences.
        Ok(())
    }
}

/// GPU device executor. See the module docs.
pub struct GpuExecutor {
    backend: Box<dyn GpuBackend>,
}

impl Default for GpuExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuExecutor {
    /// Executor over the in-process unified backend.
    pub fn new() -> Self {
        GpuExecutor {
            backend: Box::new(UnifiedGpuBackend),
        }
    }

    /// Executor over a caller-provided backend.
    pub fn with_backend(backend: Box<dyn GpuBackend>) -> Self {
        GpuExecutor { backend }
    }

    /// Run the GPU side of one multiplication to completion. The calling
    /// thread is the device's single orchestrating worker.
    pub fn execute(
        &self,
        a: &Arc<MatrixBuffer>,
        b: &Arc<MatrixBuffer>,
        result: &Arc<MatrixBuffer>,
        scheduler: &Arc<Scheduler>,
        profiler: &Arc<Profiler>,
    ) {
        while let Some(chunk) = scheduler.get_work(Device::Gpu) {
            trace!(%chunk, "GPU driver processing chunk");
            let started = Instant::now();

            a.prepare_for_gpu_access(true);
            b.prepare_for_gpu_access(true);
            result.prepare_for_gpu_access(false);

            let dispatched = self
                .backend
                .dispatch(a, b, result, chunk)
                .and_then(|()| self.backend.synchronize());

            a.release_gpu_access();
            b.release_gpu_access();
            result.release_gpu_access();

            match dispatched {
                Ok(()) => {
                    let seconds = started.elapsed().as_secs_f64();
                    profiler.record_chunk_execution(Device::Gpu, chunk.area());
                    scheduler.record_chunk_processing_time(Device::Gpu, seconds);
                }
                Err(err) => {
                    // The chunk's output region is left unwritten; surface
                    // loudly rather than silently producing zeros.
                    error!(%chunk, %err, "GPU dispatch failed, chunk dropped");
                }
            }
        }

        scheduler.force_idle(Device::Gpu);
        debug!("GPU executor finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_backend_computes_a_tile() {
        let a = MatrixBuffer::new(2).unwrap();
        let b = MatrixBuffer::new(2).unwrap();
        let r = MatrixBuffer::new(2).unwrap();
        for (i, j, v) in [(0, 0, 1), (0, 1, 2), (1, 0, 3), (1, 1, 4)] {
            a.set(i, j, v).unwrap();
        }
        // b = identity
        b.set(0, 0, 1).unwrap();
        b.set(1, 1, 1).unwrap();
        UnifiedGpuBackend
            .dispatch(&a, &b, &r, WorkChunk::new(0, 2, 0, 2))
            .unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_eq!(r.get(i, j).unwrap(), a.get(i, j).unwrap());
            }
        }
    }

    #[test]
    fn dispatch_covers_ragged_tiles() {
        // 18x18 with an 18-wide chunk exercises the partial 16-tile edges.
        let n = 18;
        let a = MatrixBuffer::new(n).unwrap();
        let b = MatrixBuffer::new(n).unwrap();
        let r = MatrixBuffer::new(n).unwrap();
        for i in 0..n {
            for j in 0..n {
                a.set(i, j, 1).unwrap();
                b.set(i, j, if i == j { 1 } else { 0 }).unwrap();
            }
        }
        UnifiedGpuBackend
            .dispatch(&a, &b, &r, WorkChunk::new(0, n, 0, n))
            .unwrap();
        for i in 0..n {
            for j in 0..n {
                assert_eq!(r.get(i, j).unwrap(), 1);
            }
        }
    }
}
