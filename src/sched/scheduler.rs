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

//! Work-stealing scheduler across the CPU, GPU, and NA device queues.
//!
//! The scheduler owns three FIFO queues and a `total_work` counter that
//! tracks the sum of their lengths. Device workers pull chunks with
//! [`Scheduler::get_work`], idle devices steal from busy ones (subdividing
//! large tiles on the way), and a background monitor rebalances queues and
//! detects stalled workers. [`Scheduler::wait_for_completion`] drives the
//! whole system to a clean termination even under skewed device speeds.
//!
//! `total_work` is eventually consistent with the queue lengths; the
//! completion loop reconciles any drift toward the observed sum.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, TryLockError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::ExecConfig;
use crate::matrix::chunks::WorkChunk;
use crate::profiler::Profiler;
use crate::sched::{lock_or_recover, Device, DeviceQueue};

/// Cumulative wait cap in [`Scheduler::get_work`] before a worker gives up.
const MAX_WORK_WAIT: Duration = Duration::from_secs(10);
/// Condition-variable wait slice in `get_work`.
const WAIT_SLICE: Duration = Duration::from_millis(100);
/// Waiting workers attempt a direct steal once per this interval.
const DIRECT_STEAL_INTERVAL: Duration = Duration::from_secs(1);
/// Monitor cadence, and the slow cadence used under `GPU_ONLY`.
const MONITOR_INTERVAL: Duration = Duration::from_millis(20);
const MONITOR_INTERVAL_GPU_ONLY: Duration = Duration::from_millis(500);
/// Grace the monitor gives the coordinator to populate queues at startup.
const MONITOR_STARTUP_GRACE: Duration = Duration::from_millis(200);
/// Monitor cycles to skip after a successful steal.
const STEAL_COOLDOWN_CYCLES: u32 = 5;
/// A worker silent for longer than this is considered stalled.
const STALL_THRESHOLD: Duration = Duration::from_secs(5);
/// Poll interval of the completion loop.
const COMPLETION_POLL: Duration = Duration::from_millis(100);
/// Floor applied to a queue's average processing time when scoring steal
/// targets, so untimed queues still rank.
const MIN_SCORING_AVG_SECS: f64 = 0.010;

/// Heterogeneous work-stealing scheduler. See the module docs.
pub struct Scheduler {
    queues: [DeviceQueue; 3],
    total_work: AtomicI64,
    shutdown: AtomicBool,
    monitor_active: Arc<AtomicBool>,
    thread_exited: [AtomicBool; 3],
    emergency_fired: AtomicBool,
    profiler: Arc<Profiler>,
    config: ExecConfig,
    started: Instant,
}

impl Scheduler {
    pub fn new(profiler: Arc<Profiler>, config: ExecConfig) -> Self {
        debug!(gpu_only = config.gpu_only, "scheduler initialized");
        Scheduler {
            queues: [DeviceQueue::new(), DeviceQueue::new(), DeviceQueue::new()],
            total_work: AtomicI64::new(0),
            shutdown: AtomicBool::new(false),
            monitor_active: Arc::new(AtomicBool::new(false)),
            thread_exited: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
            emergency_fired: AtomicBool::new(false),
            profiler,
            config,
            started: Instant::now(),
        }
    }

    /// Start the background balance monitor. Consumes one strong handle;
    /// the monitor thread itself holds only a weak one, so dropping the
    /// last external `Arc` shuts it down.
    pub fn initialize(self: Arc<Self>) {
        self.monitor_active.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(&self);
        let active = Arc::clone(&self.monitor_active);
        let spawned = thread::Builder::new()
            .name("weft-monitor".into())
            .spawn(move || {
                Scheduler::monitor(&weak);
                active.store(false, Ordering::SeqCst);
            });
        if let Err(err) = spawned {
            self.monitor_active.store(false, Ordering::SeqCst);
            warn!(%err, "failed to spawn balance monitor; running without it");
        }
    }

    pub fn queue(&self, device: Device) -> &DeviceQueue {
        &self.queues[device.index()]
    }

    /// Chunks currently accounted for across all queues.
    pub fn total_work(&self) -> i64 {
        self.total_work.load(Ordering::SeqCst)
    }

    pub fn stealing_enabled(&self) -> bool {
        self.config.stealing_enabled()
    }

    /// Record the partition-time allocation for a device (reporting only;
    /// steal accounting lives in the queue's separate `steal_delta`).
    pub fn record_initial_allocation(&self, device: Device, count: usize) {
        self.queue(device)
            .initial_allocation
            .store(count as i64, Ordering::SeqCst);
    }

    /// Mark a device's orchestrator thread as joined.
    pub fn mark_thread_exited(&self, device: Device) {
        self.thread_exited[device.index()].store(true, Ordering::SeqCst);
    }

    /// Push chunks onto a device queue and wake its waiters.
    pub fn add_work(&self, chunks: &[WorkChunk], device: Device) {
        if chunks.is_empty() {
            return;
        }
        let q = self.queue(device);
        let mut inner = lock_or_recover(&q.inner);
        for chunk in chunks {
            inner.queue.push_back(*chunk);
        }
        self.total_work
            .fetch_add(chunks.len() as i64, Ordering::SeqCst);
        q.ready.notify_all();
    }

    /// Queue non-empty under lock.
    pub fn has_work(&self, device: Device) -> bool {
        !self.queue(device).is_empty()
    }

    /// Snapshot of a device's pending chunks, front first.
    pub fn queued_chunks(&self, device: Device) -> Vec<WorkChunk> {
        lock_or_recover(&self.queue(device).inner)
            .queue
            .iter()
            .copied()
            .collect()
    }

    /// Pull the next chunk for `device`, blocking while work remains
    /// elsewhere in the system. Returns `None` once the system has drained,
    /// after the cumulative wait cap, or immediately for the NA device.
    ///
    /// Waiting workers attempt a direct steal from the busiest device once
    /// per second (unless stealing is disabled).
    pub fn get_work(&self, device: Device) -> Option<WorkChunk> {
        if device == Device::Na {
            trace!("NA is inactive for pull, returning no work");
            return None;
        }
        let q = self.queue(device);
        let mut inner = lock_or_recover(&q.inner);
        if inner.queue.is_empty() && self.total_work() == 0 {
            return None;
        }
        q.active_workers.fetch_add(1, Ordering::SeqCst);

        let mut waited = Duration::ZERO;
        let mut since_steal = Duration::ZERO;
        while inner.queue.is_empty() && self.total_work() > 0 && waited < MAX_WORK_WAIT {
            trace!(device = %device, remaining = self.total_work(), "waiting for work");
            let (guard, _timeout) = q
                .ready
                .wait_timeout(inner, WAIT_SLICE)
                .unwrap_or_else(|poisoned| {
                    warn!("queue mutex poisoned during wait; recovering");
                    poisoned.into_inner()
                });
            inner = guard;
            waited += WAIT_SLICE;
            since_steal += WAIT_SLICE;

            if self.stealing_enabled() && since_steal >= DIRECT_STEAL_INTERVAL {
                since_steal = Duration::ZERO;
                drop(inner);
                let busy = self.select_device_to_steal_from(device);
                if busy != device {
                    debug!(idle = %device, busy = %busy, "waiting worker attempts direct steal");
                    if let Some(stolen) = self.steal(busy, device) {
                        self.profiler.record_steal_event(busy, device);
                        self.add_work(&[stolen], device);
                    }
                }
                inner = lock_or_recover(&q.inner);
            }
        }

        if inner.queue.is_empty() {
            if q.active_workers.load(Ordering::SeqCst) > 0 {
                q.active_workers.fetch_sub(1, Ordering::SeqCst);
            } else {
                warn!(device = %device, "worker count already at zero on empty pull");
            }
            return None;
        }

        let chunk = inner.queue.pop_front()?;
        self.total_work.fetch_sub(1, Ordering::SeqCst);
        q.last_work_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
        trace!(device = %device, %chunk, remaining = self.total_work(), "dispatched chunk");
        Some(chunk)
    }

    /// Move one chunk from `from` to `to`, subdividing large tiles.
    ///
    /// Non-blocking: returns `None` when the source queue is contended,
    /// holds one chunk or fewer, or either side is NA, and always when
    /// stealing is disabled. On success the caller owns the returned chunk
    /// and is responsible for re-enqueueing it via [`Scheduler::add_work`].
    pub fn steal(&self, from: Device, to: Device) -> Option<WorkChunk> {
        if !self.stealing_enabled() {
            trace!("stealing disabled, skipping steal");
            return None;
        }
        if from == Device::Na || to == Device::Na {
            trace!("NA takes no part in stealing");
            return None;
        }
        let from_q = self.queue(from);
        let mut inner = match from_q.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                trace!(from = %from, "source queue contended, steal skipped");
                return None;
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("source queue mutex poisoned; recovering");
                poisoned.into_inner()
            }
        };
        if inner.queue.len() <= 1 {
            trace!(from = %from, len = inner.queue.len(), "source too small to steal from");
            return None;
        }

        // Take the largest pending tile; keep the rest in size order.
        let mut chunks: Vec<WorkChunk> = inner.queue.drain(..).collect();
        chunks.sort_by(|a, b| b.area().cmp(&a.area()));
        let chunk = chunks.remove(0);
        inner.queue.extend(chunks);

        from_q.steal_delta.fetch_sub(1, Ordering::SeqCst);
        self.queue(to).steal_delta.fetch_add(1, Ordering::SeqCst);

        let rows = chunk.rows();
        let cols = chunk.cols();
        // `total_work` adjustments keep the counter equal to the sum of
        // queue lengths once the caller's add_work contributes its +1.
        let stolen = if rows <= 4 && cols <= 4 {
            self.total_work.fetch_sub(1, Ordering::SeqCst);
            debug!(from = %from, to = %to, %chunk, "stole chunk whole (too small to split)");
            chunk
        } else if rows >= 32 || cols >= 32 {
            // Halve along the longer axis; the near half stays home.
            let (near, far) = if rows > cols {
                let mid = chunk.start_row + rows / 2;
                (
                    WorkChunk::new(chunk.start_row, mid, chunk.start_col, chunk.end_col),
                    WorkChunk::new(mid, chunk.end_row, chunk.start_col, chunk.end_col),
                )
            } else {
                let mid = chunk.start_col + cols / 2;
                (
                    WorkChunk::new(chunk.start_row, chunk.end_row, chunk.start_col, mid),
                    WorkChunk::new(chunk.start_row, chunk.end_row, mid, chunk.end_col),
                )
            };
            inner.queue.push_back(near);
            debug!(from = %from, to = %to, stolen = %far, "split large chunk, stole far half");
            far
        } else {
            // Quadrant split; three pieces stay home, the top-left travels.
            let mid_row = chunk.start_row + rows / 2;
            let mid_col = chunk.start_col + cols / 2;
            let q1 = WorkChunk::new(chunk.start_row, mid_row, chunk.start_col, mid_col);
            let q2 = WorkChunk::new(chunk.start_row, mid_row, mid_col, chunk.end_col);
            let q3 = WorkChunk::new(mid_row, chunk.end_row, chunk.start_col, mid_col);
            let q4 = WorkChunk::new(mid_row, chunk.end_row, mid_col, chunk.end_col);
            inner.queue.push_back(q2);
            inner.queue.push_back(q3);
            inner.queue.push_back(q4);
            self.total_work.fetch_add(2, Ordering::SeqCst);
            debug!(from = %from, to = %to, stolen = %q1, "quadrant-split chunk, stole top-left");
            q1
        };
        from_q.ready.notify_all();
        Some(stolen)
    }

    /// Score other devices as steal sources for `idle` and return the best,
    /// or `idle` itself when none qualifies.
    ///
    /// Score = queue length × max(avg processing time, 10 ms) / active
    /// workers. Values are read under the source queue's lock but may be
    /// stale by the time the steal runs; the monitor's retry cadence absorbs
    /// that.
    pub fn select_device_to_steal_from(&self, idle: Device) -> Device {
        if !self.stealing_enabled() || idle == Device::Na {
            return idle;
        }
        let mut best = idle;
        let mut max_score = 0.0f64;
        for other in Device::ALL {
            if other == idle || other == Device::Na {
                continue;
            }
            let q = self.queue(other);
            let (queue_len, avg) = {
                let inner = lock_or_recover(&q.inner);
                (inner.queue.len(), inner.avg_processing_time)
            };
            if queue_len <= 1 {
                continue;
            }
            let avg = if avg <= 0.0001 { MIN_SCORING_AVG_SECS } else { avg };
            let workers = q.active_workers.load(Ordering::SeqCst).max(1);
            let score = queue_len as f64 * avg / workers as f64;
            trace!(candidate = %other, queue_len, avg, workers, score, "steal target scored");
            if score > max_score {
                max_score = score;
                best = other;
            }
        }
        best
    }

    /// Fold one processing-time sample into the device's moving average and
    /// bump its processed counter.
    pub fn record_chunk_processing_time(&self, device: Device, seconds: f64) {
        let q = self.queue(device);
        let mut inner = lock_or_recover(&q.inner);
        if inner.chunks_processed == 0 {
            inner.avg_processing_time = seconds;
        } else {
            const WEIGHT: f64 = 0.7;
            inner.avg_processing_time =
                inner.avg_processing_time * (1.0 - WEIGHT) + seconds * WEIGHT;
        }
        inner.chunks_processed += 1;
        q.last_work_ms.store(self.elapsed_ms(), Ordering::SeqCst);
        trace!(
            device = %device,
            sample_ms = seconds * 1e3,
            avg_ms = inner.avg_processing_time * 1e3,
            "chunk processing time recorded"
        );
    }

    /// Drain a device's queue, removing its chunks from the work count.
    /// Used by the NA executor to yield its (nominally empty) queue back.
    pub fn drain_queue(&self, device: Device) -> Vec<WorkChunk> {
        let q = self.queue(device);
        let mut inner = lock_or_recover(&q.inner);
        let drained: Vec<WorkChunk> = inner.queue.drain(..).collect();
        self.total_work
            .fetch_sub(drained.len() as i64, Ordering::SeqCst);
        drained
    }

    /// Zero a device's worker count after its executor has joined its pool.
    pub fn force_idle(&self, device: Device) {
        let stuck = self
            .queue(device)
            .active_workers
            .swap(0, Ordering::SeqCst);
        if stuck > 0 {
            debug!(device = %device, stuck, "executor reset residual worker count");
        }
    }

    /// Block until every queue is empty and every worker count has reached
    /// zero, rebalancing orphaned queues and reconciling counter drift on
    /// the way.
    pub fn wait_for_completion(&self) {
        debug!(remaining = self.total_work(), "waiting for completion");
        let mut polls = 0u32;
        while self.total_work() > 0 {
            thread::sleep(COMPLETION_POLL);
            if self.rebalance_orphaned() {
                continue;
            }
            if self.total_work() <= 0 {
                break;
            }
            polls += 1;
            if polls >= 10 {
                polls = 0;
                if !self.reconcile() {
                    return;
                }
            }
        }
        self.drain_workers();
        debug!("all work processed and workers idle");
    }

    /// Move chunks off queues whose executor has gone idle. Returns true
    /// when a move happened. When work remains but no device has an active
    /// worker, the work count is cleared and the wait ends.
    fn rebalance_orphaned(&self) -> bool {
        for from in [Device::Cpu, Device::Gpu] {
            let from_q = self.queue(from);
            if from_q.active_workers() != 0 || from_q.is_empty() {
                continue;
            }
            let target = Device::ALL
                .into_iter()
                .find(|&d| d != from && self.queue(d).active_workers() > 0);
            match target {
                Some(to) => {
                    let moved: Vec<WorkChunk> = {
                        let mut inner = lock_or_recover(&from_q.inner);
                        inner.queue.drain(..).collect()
                    };
                    if moved.is_empty() {
                        continue;
                    }
                    warn!(
                        from = %from,
                        to = %to,
                        count = moved.len(),
                        "executor exited with work queued; rebalancing"
                    );
                    let to_q = self.queue(to);
                    let mut inner = lock_or_recover(&to_q.inner);
                    inner.queue.extend(moved);
                    to_q.ready.notify_all();
                    return true;
                }
                None => {
                    warn!(
                        remaining = self.total_work(),
                        "no active device left; clearing work counter"
                    );
                    self.total_work.store(0, Ordering::SeqCst);
                    return false;
                }
            }
        }
        false
    }

    /// Compare `total_work` against the observed queue sum and correct
    /// drift. Returns false when the wait should end immediately.
    fn reconcile(&self) -> bool {
        let actual: i64 = Device::ALL
            .into_iter()
            .map(|d| self.queue(d).len() as i64)
            .sum();
        let counted = self.total_work();
        let all_idle = Device::ALL
            .into_iter()
            .all(|d| self.queue(d).active_workers() == 0);

        if all_idle {
            if actual == 0 {
                if counted != 0 {
                    warn!(counted, "workers idle and queues empty; clearing stale counter");
                    self.total_work.store(0, Ordering::SeqCst);
                }
                return false;
            }
            warn!(
                counted,
                actual, "workers idle with orphaned work; engaging emergency path"
            );
            self.total_work.store(actual, Ordering::SeqCst);
            self.run_emergency_worker();
            return true;
        }

        if actual != counted {
            warn!(counted, actual, "work count drift detected; reconciling");
            self.total_work.store(actual, Ordering::SeqCst);
        }
        true
    }

    /// Last-resort recovery: gather every orphaned chunk onto the CPU queue
    /// and advertise one active CPU worker so a straggling pool can drain
    /// it. If nothing picks the work up within a grace period, the chunks
    /// are dropped and the counters cleared so termination is guaranteed.
    /// Fires at most once per scheduler.
    fn run_emergency_worker(&self) {
        if self.emergency_fired.swap(true, Ordering::SeqCst) {
            warn!("emergency path already used; forcing completion");
            for device in Device::ALL {
                let q = self.queue(device);
                lock_or_recover(&q.inner).queue.clear();
                q.active_workers.store(0, Ordering::SeqCst);
            }
            self.total_work.store(0, Ordering::SeqCst);
            return;
        }
        // The scheduler owns no kernel, so the emergency worker can only
        // requeue and wait for a surviving pool; the timeout below keeps a
        // fully dead system terminating.
        for device in [Device::Gpu, Device::Na] {
            let moved = self.drain_queue(device);
            if !moved.is_empty() {
                self.add_work(&moved, Device::Cpu);
            }
        }
        let cpu = self.queue(Device::Cpu);
        cpu.active_workers.store(1, Ordering::SeqCst);
        cpu.ready.notify_all();

        let before = cpu.chunks_processed();
        thread::sleep(Duration::from_millis(1000));
        let cpu = self.queue(Device::Cpu);
        if cpu.chunks_processed() == before && !cpu.is_empty() {
            let dropped = {
                let mut inner = lock_or_recover(&cpu.inner);
                let n = inner.queue.len() as i64;
                inner.queue.clear();
                n
            };
            warn!(dropped, "no worker picked up emergency work; forcing completion");
            self.total_work.fetch_sub(dropped, Ordering::SeqCst);
        }
        cpu.active_workers.store(0, Ordering::SeqCst);
        if self.total_work() < 0 {
            self.total_work.store(0, Ordering::SeqCst);
        }
    }

    /// After the queues drain, wait for worker counts to reach zero,
    /// force-clearing any device whose orchestrator has exited or whose
    /// workers have been silent past the stall threshold.
    fn drain_workers(&self) {
        for device in Device::ALL {
            let q = self.queue(device);
            loop {
                let workers = q.active_workers();
                if workers <= 0 {
                    break;
                }
                trace!(device = %device, workers, "waiting for workers to finish");
                thread::sleep(COMPLETION_POLL);
                let exited = self.thread_exited[device.index()].load(Ordering::SeqCst);
                let last = q.last_work_ms.load(Ordering::SeqCst);
                let stalled = last > 0
                    && self.elapsed_ms().saturating_sub(last) > STALL_THRESHOLD.as_millis() as i64;
                if exited || stalled {
                    warn!(
                        device = %device,
                        workers,
                        exited,
                        stalled,
                        "stuck worker detected; forcing count to zero"
                    );
                    q.active_workers.store(0, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Background balance loop; runs until the system drains or the
    /// scheduler shuts down. Holds only a weak handle so scheduler teardown
    /// is never blocked on the monitor.
    fn monitor(weak: &Weak<Scheduler>) {
        debug!("balance monitor started");
        thread::sleep(MONITOR_STARTUP_GRACE);
        let mut cooldown = 0u32;
        loop {
            let Some(sched) = weak.upgrade() else {
                break;
            };
            if sched.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let busy = sched.total_work() > 0
                || Device::ALL
                    .into_iter()
                    .any(|d| sched.queue(d).active_workers() > 0);
            if !busy {
                break;
            }
            if sched.config.gpu_only {
                drop(sched);
                thread::sleep(MONITOR_INTERVAL_GPU_ONLY);
                continue;
            }
            thread::sleep(MONITOR_INTERVAL);
            cooldown = cooldown.saturating_sub(1);

            // Idle devices with live workers get work first.
            for idle in [Device::Cpu, Device::Gpu] {
                if sched.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if sched.has_work(idle)
                    || sched.total_work() <= 0
                    || sched.queue(idle).active_workers() <= 0
                {
                    continue;
                }
                let busy = sched.select_device_to_steal_from(idle);
                if busy == idle {
                    continue;
                }
                if let Some(stolen) = sched.steal(busy, idle) {
                    debug!(from = %busy, to = %idle, "monitor stole for idle device");
                    sched.profiler.record_steal_event(busy, idle);
                    sched.add_work(&[stolen], idle);
                    cooldown = STEAL_COOLDOWN_CYCLES;
                }
            }

            if cooldown == 0 {
                // Proactive pass: feed devices running ahead of their queue.
                for device in [Device::Cpu, Device::Gpu] {
                    if sched.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let queue_len = sched.queue(device).len();
                    let workers = sched.queue(device).active_workers();
                    if workers <= 0 || (sched.total_work() as f64) <= queue_len as f64 * 1.2 {
                        continue;
                    }
                    let target = sched.select_device_to_steal_from(device);
                    if target == device {
                        continue;
                    }
                    if let Some(stolen) = sched.steal(target, device) {
                        debug!(from = %target, to = %device, "monitor stole proactively");
                        sched.profiler.record_steal_event(target, device);
                        sched.add_work(&[stolen], device);
                        cooldown = STEAL_COOLDOWN_CYCLES;
                    }
                }
            }
            drop(sched);
        }
        debug!("balance monitor exiting");
    }

    fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if thread::current().name() == Some("weft-monitor") {
            // The monitor held the last handle; it cannot wait on itself.
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.monitor_active.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if self.monitor_active.load(Ordering::SeqCst) {
            warn!("balance monitor did not exit cleanly");
        }
    }
}
