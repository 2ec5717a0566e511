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

//! Initial distribution of work chunks across device queues.

use tracing::debug;

use crate::config::ExecConfig;
use crate::matrix::chunks::WorkChunk;
use crate::profiler::Profiler;
use crate::sched::Device;

/// Split `chunks` into `(cpu, gpu, na)` allocations in chunk-list order:
/// the first block of chunks goes to the CPU, the next to the GPU, and the
/// NA device receives none. Under `GPU_ONLY` everything goes to the GPU and
/// steal-event recording is switched off.
///
/// Initial allocations are recorded in the profiler as they are computed.
pub fn partition_work(
    chunks: &[WorkChunk],
    config: &ExecConfig,
    profiler: &Profiler,
) -> (Vec<WorkChunk>, Vec<WorkChunk>, Vec<WorkChunk>) {
    let total = chunks.len();

    let (cpu_count, gpu_count) = if config.gpu_only {
        debug!(total, "GPU_ONLY: all chunks to GPU, stealing disabled");
        profiler.disable_work_stealing();
        (0, total)
    } else {
        let gpu = total * config.gpu_share as usize / 100;
        debug!(
            total,
            gpu_share = config.gpu_share,
            cpu = total - gpu,
            gpu,
            "partitioned chunks across devices"
        );
        (total - gpu, gpu)
    };

    profiler.record_initial_allocation(Device::Cpu, cpu_count);
    profiler.record_initial_allocation(Device::Gpu, gpu_count);
    profiler.record_initial_allocation(Device::Na, 0);

    let cpu = chunks[..cpu_count].to_vec();
    let gpu = chunks[cpu_count..cpu_count + gpu_count].to_vec();
    let na = chunks[cpu_count + gpu_count..].to_vec();
    (cpu, gpu, na)
}
