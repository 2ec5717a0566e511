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

//! CPU executor: a short-lived worker pool over the scheduler's CPU queue.
//!
//! The integer kernel overwrites each output tile and accumulates over the
//! shared dimension in cache-sized strips, in two's-complement (wrapping)
//! 32-bit arithmetic. Before launching its pool the executor opportunistically
//! pulls a batch of chunks off the GPU queue, sized by how loaded that queue
//! looks; the coordinator has fully populated every queue by this point.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::matrix::chunks::WorkChunk;
use crate::matrix::MatrixBuffer;
use crate::profiler::Profiler;
use crate::sched::scheduler::Scheduler;
use crate::sched::Device;

/// Attempts the startup steal makes before giving up.
const STARTUP_STEAL_ATTEMPTS: usize = 30;
/// Pause between startup steal attempts.
const STARTUP_STEAL_PAUSE: Duration = Duration::from_millis(5);
/// Strip width of the kernel's k-loop.
const K_STRIP: usize = 64;

/// CPU device executor. See the module docs.
pub struct CpuExecutor {
    num_workers: usize,
}

impl Default for CpuExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuExecutor {
    pub fn new() -> Self {
        let available = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let num_workers = worker_count(available);
        debug!(num_workers, "CPU executor initialized");
        CpuExecutor { num_workers }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run the CPU side of one multiplication to completion.
    pub fn execute(
        &self,
        a: &Arc<MatrixBuffer>,
        b: &Arc<MatrixBuffer>,
        result: &Arc<MatrixBuffer>,
        scheduler: &Arc<Scheduler>,
        profiler: &Arc<Profiler>,
    ) {
        if scheduler.stealing_enabled() {
            self.startup_steal(scheduler, profiler);
        }

        thread::scope(|scope| {
            for worker in 0..self.num_workers {
                scope.spawn(move || {
                    trace!(worker, "CPU worker started");
                    while let Some(chunk) = scheduler.get_work(Device::Cpu) {
                        let started = Instant::now();
                        multiply_chunk(a, b, result, chunk);
                        let seconds = started.elapsed().as_secs_f64();
                        profiler.record_chunk_execution(Device::Cpu, chunk.area());
                        scheduler.record_chunk_processing_time(Device::Cpu, seconds);
                    }
                    trace!(worker, "CPU worker exiting");
                });
            }
        });

        scheduler.force_idle(Device::Cpu);
        debug!("CPU executor finished");
    }

    /// Pull an early batch of chunks off the GPU queue so CPU workers start
    /// warm instead of waiting for the monitor to notice imbalance.
    fn startup_steal(&self, scheduler: &Arc<Scheduler>, profiler: &Arc<Profiler>) {
        let target = match scheduler.queue(Device::Gpu).len() {
            0..=19 => 2,
            20..=99 => 10,
            100..=499 => 30,
            _ => 100,
        };
        let mut stolen = 0usize;
        for _ in 0..STARTUP_STEAL_ATTEMPTS {
            if stolen >= target {
                break;
            }
            if let Some(chunk) = scheduler.steal(Device::Gpu, Device::Cpu) {
                profiler.record_steal_event(Device::Gpu, Device::Cpu);
                scheduler.add_work(&[chunk], Device::Cpu);
                stolen += 1;
            }
            thread::sleep(STARTUP_STEAL_PAUSE);
        }
        debug!(stolen, target, "CPU startup steal complete");
    }
}

/// Worker count for a machine with `available` logical cores: leave
/// headroom for the GPU driver and monitor threads, and stay small on
/// big.LITTLE parts where extra workers land on efficiency cores.
fn worker_count(available: usize) -> usize {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        if available >= 8 {
            5
        } else if available >= 6 {
            4
        } else {
            available.saturating_sub(1).max(1)
        }
    } else {
        available.saturating_sub(2).max(1)
    }
}

/// Compute `result[tile] = a · b` over one output tile.
///
/// Rows of the tile are fully overwritten: zeroed, then accumulated across
/// k-strips with wrap-on-overflow semantics. Access claims on all three
/// buffers are released before returning.
pub fn multiply_chunk(
    a: &MatrixBuffer,
    b: &MatrixBuffer,
    result: &MatrixBuffer,
    chunk: WorkChunk,
) {
    let n = a.size();
    let av = a.cpu_read();
    let bv = b.cpu_read();
    let rv = result.cpu_write();

    for i in chunk.start_row..chunk.end_row {
        for j in chunk.start_col..chunk.end_col {
            rv.store(i, j, 0);
        }
    }

    let mut kk = 0;
    while kk < n {
        let k_end = (kk + K_STRIP).min(n);
        for i in chunk.start_row..chunk.end_row {
            for k in kk..k_end {
                let a_ik = av.at(i, k);
                if a_ik == 0 {
                    continue;
                }
                for j in chunk.start_col..chunk.end_col {
                    rv.accumulate(i, j, a_ik.wrapping_mul(bv.at(k, j)));
                }
            }
        }
        kk = k_end;
    }

    a.release_cpu_access();
    b.release_cpu_access();
    result.release_cpu_access();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_has_floor_of_one() {
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(2), 1);
        assert!(worker_count(16) >= 1);
    }

    #[test]
    fn kernel_multiplies_a_tile() {
        let a = MatrixBuffer::new(2).unwrap();
        let b = MatrixBuffer::new(2).unwrap();
        let r = MatrixBuffer::new(2).unwrap();
        for (i, j, v) in [(0, 0, 1), (0, 1, 2), (1, 0, 3), (1, 1, 4)] {
            a.set(i, j, v).unwrap();
        }
        for (i, j, v) in [(0, 0, 5), (0, 1, 6), (1, 0, 7), (1, 1, 8)] {
            b.set(i, j, v).unwrap();
        }
        multiply_chunk(&a, &b, &r, WorkChunk::new(0, 2, 0, 2));
        assert_eq!(r.get(0, 0).unwrap(), 19);
        assert_eq!(r.get(0, 1).unwrap(), 22);
        assert_eq!(r.get(1, 0).unwrap(), 43);
        assert_eq!(r.get(1, 1).unwrap(), 50);
    }

    #[test]
    fn kernel_wraps_on_overflow() {
        let a = MatrixBuffer::new(1).unwrap();
        let b = MatrixBuffer::new(1).unwrap();
        let r = MatrixBuffer::new(1).unwrap();
        a.set(0, 0, i32::MAX).unwrap();
        b.set(0, 0, 2).unwrap();
        multiply_chunk(&a, &b, &r, WorkChunk::new(0, 1, 0, 1));
        assert_eq!(r.get(0, 0).unwrap(), i32::MAX.wrapping_mul(2));
    }
}
