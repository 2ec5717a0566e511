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

//! NA (neural accelerator) executor.
//!
//! The NA device is reserved: its queue is empty in every normal run and
//! the scheduler never hands it work. The executor exists so the device
//! stays first-class in the scheduling model; on execute it yields anything
//! that somehow landed on its queue back to the CPU and reports zero time.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::matrix::MatrixBuffer;
use crate::profiler::Profiler;
use crate::sched::scheduler::Scheduler;
use crate::sched::Device;

/// Reserved no-op executor for the NA device.
#[derive(Debug, Default)]
pub struct NaExecutor;

impl NaExecutor {
    pub fn new() -> Self {
        NaExecutor
    }

    pub fn execute(
        &self,
        _a: &Arc<MatrixBuffer>,
        _b: &Arc<MatrixBuffer>,
        _result: &Arc<MatrixBuffer>,
        scheduler: &Arc<Scheduler>,
        profiler: &Arc<Profiler>,
    ) {
        let orphaned = scheduler.drain_queue(Device::Na);
        if !orphaned.is_empty() {
            warn!(
                count = orphaned.len(),
                "chunks found on the reserved NA queue; yielding to CPU"
            );
            scheduler.add_work(&orphaned, Device::Cpu);
        }
        scheduler.force_idle(Device::Na);
        profiler.record_zero_time("na_execution");
        debug!("NA executor finished (no-op)");
    }
}
