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

//! Per-multiplication orchestration across the three devices.
//!
//! The coordinator owns the scheduler, the profiler, and one executor per
//! device, and outlives all of them; the executors hold only borrowed
//! handles for the duration of a call. For each multiplication it tiles the
//! output, partitions the tiles across device queues (strictly before any
//! executor starts), launches one orchestrator thread per device, joins
//! them, and finally joins on scheduler completion.

use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::config::ExecConfig;
use crate::exec::{CpuExecutor, ExecError, GpuExecutor, NaExecutor};
use crate::matrix::chunks::{block_size_for, coordinator_chunks};
use crate::matrix::MatrixBuffer;
use crate::partition::partition_work;
use crate::profiler::Profiler;
use crate::sched::scheduler::Scheduler;
use crate::sched::Device;

/// Orchestrates matrix multiplications across the CPU, GPU, and NA devices.
pub struct Coordinator {
    scheduler: Arc<Scheduler>,
    profiler: Arc<Profiler>,
    cpu: CpuExecutor,
    gpu: GpuExecutor,
    na: NaExecutor,
    config: ExecConfig,
}

impl Coordinator {
    /// Build the device stack and start the scheduler's balance monitor.
    pub fn new(config: ExecConfig) -> Self {
        let profiler = Arc::new(Profiler::new());
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&profiler), config.clone()));
        Arc::clone(&scheduler).initialize();
        Coordinator {
            scheduler,
            profiler,
            cpu: CpuExecutor::new(),
            gpu: GpuExecutor::new(),
            na: NaExecutor::new(),
            config,
        }
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Compute `result = a · b`, dispatching tiles across devices.
    pub fn execute_matrix_multiplication(
        &self,
        a: &Arc<MatrixBuffer>,
        b: &Arc<MatrixBuffer>,
        result: &Arc<MatrixBuffer>,
    ) -> Result<(), ExecError> {
        let n = a.size();
        if b.size() != n || result.size() != n {
            return Err(ExecError::SizeMismatch {
                a: n,
                b: b.size(),
                result: result.size(),
            });
        }
        self.profiler.start_timer("device_execution");
        self.log_input_samples(a, b);

        let chunks = coordinator_chunks(n);
        debug!(
            n,
            block_size = block_size_for(n),
            chunk_count = chunks.len(),
            "tiled multiplication"
        );

        let (cpu_work, gpu_work, na_work) =
            partition_work(&chunks, &self.config, &self.profiler);
        self.scheduler
            .record_initial_allocation(Device::Cpu, cpu_work.len());
        self.scheduler
            .record_initial_allocation(Device::Gpu, gpu_work.len());
        self.scheduler
            .record_initial_allocation(Device::Na, na_work.len());

        // Queues are fully populated before any executor thread starts, so
        // the CPU's startup steal always sees the real GPU backlog.
        self.scheduler.add_work(&cpu_work, Device::Cpu);
        self.scheduler.add_work(&gpu_work, Device::Gpu);
        self.scheduler.add_work(&na_work, Device::Na);

        thread::scope(|scope| {
            let cpu = scope.spawn(|| {
                self.run_device(Device::Cpu, "cpu_execution", || {
                    self.cpu
                        .execute(a, b, result, &self.scheduler, &self.profiler)
                })
            });
            let gpu = scope.spawn(|| {
                self.run_device(Device::Gpu, "gpu_execution", || {
                    self.gpu
                        .execute(a, b, result, &self.scheduler, &self.profiler)
                })
            });
            let na = scope.spawn(|| {
                self.run_device(Device::Na, "na_execution", || {
                    self.na
                        .execute(a, b, result, &self.scheduler, &self.profiler)
                })
            });
            let _ = cpu.join();
            self.scheduler.mark_thread_exited(Device::Cpu);
            let _ = gpu.join();
            self.scheduler.mark_thread_exited(Device::Gpu);
            let _ = na.join();
            self.scheduler.mark_thread_exited(Device::Na);
        });

        debug!("all executor threads joined, waiting for completion");
        self.scheduler.wait_for_completion();
        self.profiler.stop_timer("device_execution");
        self.log_result_samples(result);
        Ok(())
    }

    /// Run one device's executor, timing it only when its queue held work.
    fn run_device(&self, device: Device, timer: &str, run: impl FnOnce()) {
        debug!(device = %device, "starting device orchestrator");
        if self.scheduler.has_work(device) {
            self.profiler.start_timer(timer);
            run();
            self.profiler.stop_timer(timer);
        } else {
            run();
            self.profiler.record_zero_time(timer);
        }
    }

    // First-element telemetry for large runs; mirrors what the kernels see.
    fn log_input_samples(&self, a: &MatrixBuffer, b: &MatrixBuffer) {
        let n = a.size();
        if n < 1024 || !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let head = |m: &MatrixBuffer| -> Vec<i32> {
            let view = m.cpu_read();
            let vals = (0..5.min(n)).map(|j| view.at(0, j)).collect();
            m.release_cpu_access();
            vals
        };
        debug!(a_head = ?head(a), b_head = ?head(b), "input samples");
    }

    fn log_result_samples(&self, result: &MatrixBuffer) {
        let n = result.size();
        if n < 1024 || !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let view = result.cpu_read();
        let mut nonzero = 0usize;
        let mut checked = 0usize;
        for region in 0..4usize {
            let row = n / 4 * region;
            for j in 0..10.min(n) {
                if view.at(row, j) != 0 {
                    nonzero += 1;
                }
                checked += 1;
            }
        }
        result.release_cpu_access();
        debug!(nonzero, checked, "result sampling");
        if nonzero == 0 {
            tracing::warn!("result matrix sampled all zeros");
        }
    }
}
