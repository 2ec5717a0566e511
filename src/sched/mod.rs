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

//! Scheduling surface: devices, per-device queues, and queue metrics.

pub mod scheduler;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::warn;

use crate::matrix::chunks::WorkChunk;

/// Logical device on which chunks are executed.
///
/// The NA (neural accelerator) device is reserved: it participates in the
/// scheduling model but its queue stays permanently empty in this release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu,
    Na,
}

impl Device {
    /// All devices, in queue-index order.
    pub const ALL: [Device; 3] = [Device::Cpu, Device::Gpu, Device::Na];

    pub fn index(self) -> usize {
        match self {
            Device::Cpu => 0,
            Device::Gpu => 1,
            Device::Na => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Gpu => "GPU",
            Device::Na => "NA",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock a mutex, recovering from poison left by a panicked worker.
///
/// A panicked kernel must not wedge the scheduler; the queue state itself
/// stays consistent because every mutation completes before the guards drop.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("mutex poisoned by a panicked worker; recovering");
        poisoned.into_inner()
    })
}

/// Mutable queue state guarded by the queue mutex.
#[derive(Debug, Default)]
pub(crate) struct QueueInner {
    /// FIFO of pending chunks.
    pub queue: VecDeque<WorkChunk>,
    /// Exponential moving average of per-chunk processing time, seconds.
    /// Weight 0.7 on the newest sample; the first sample replaces zero.
    pub avg_processing_time: f64,
    /// Monotonic count of chunks completed on this device.
    pub chunks_processed: u64,
}

/// One device's queue plus scheduling metrics.
#[derive(Debug)]
pub struct DeviceQueue {
    pub(crate) inner: Mutex<QueueInner>,
    pub(crate) ready: Condvar,
    /// Workers currently holding a get-work token on this queue.
    pub(crate) active_workers: AtomicI64,
    /// Chunks assigned at partition time; reporting only.
    pub(crate) initial_allocation: AtomicI64,
    /// Net chunks gained (+) or lost (−) through stealing.
    pub(crate) steal_delta: AtomicI64,
    /// Milliseconds since scheduler start of the last successful get-work;
    /// zero when the device has never pulled work.
    pub(crate) last_work_ms: AtomicI64,
}

impl DeviceQueue {
    pub(crate) fn new() -> Self {
        DeviceQueue {
            inner: Mutex::new(QueueInner::default()),
            ready: Condvar::new(),
            active_workers: AtomicI64::new(0),
            initial_allocation: AtomicI64::new(0),
            steal_delta: AtomicI64::new(0),
            last_work_ms: AtomicI64::new(0),
        }
    }

    /// Queue length under lock.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers currently active on this queue.
    pub fn active_workers(&self) -> i64 {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Chunks assigned to this device at partition time.
    pub fn initial_allocation(&self) -> i64 {
        self.initial_allocation.load(Ordering::SeqCst)
    }

    /// Net chunk count gained or lost through stealing.
    pub fn steal_delta(&self) -> i64 {
        self.steal_delta.load(Ordering::SeqCst)
    }

    /// Chunks completed on this device.
    pub fn chunks_processed(&self) -> u64 {
        lock_or_recover(&self.inner).chunks_processed
    }

    /// Current average per-chunk processing time, seconds.
    pub fn avg_processing_time(&self) -> f64 {
        lock_or_recover(&self.inner).avg_processing_time
    }
}
