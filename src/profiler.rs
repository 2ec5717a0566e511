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

//! Timing and counter aggregation for heterogeneous execution.
//!
//! The profiler is shared by the coordinator, the scheduler's monitor, and
//! the device executors; each counter family sits behind its own lock.
//! The textual report goes to standard error so `WRITE_MATRIX` output on
//! standard out stays machine-readable.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::sched::{lock_or_recover, Device};

#[derive(Debug, Default, Clone)]
struct TimerData {
    started: Option<Instant>,
    total_secs: f64,
    count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceStats {
    chunks_processed: u64,
    total_cells: u64,
    allocated_chunks: u64,
}

/// Shared timing and counter aggregation. See the module docs.
#[derive(Debug, Default)]
pub struct Profiler {
    timers: Mutex<HashMap<String, TimerData>>,
    devices: Mutex<HashMap<Device, DeviceStats>>,
    steals: Mutex<HashMap<(Device, Device), u64>>,
    stealing_disabled: AtomicBool,
}

impl Profiler {
    pub fn new() -> Self {
        Profiler::default()
    }

    pub fn start_timer(&self, name: &str) {
        let mut timers = lock_or_recover(&self.timers);
        timers.entry(name.to_string()).or_default().started = Some(Instant::now());
    }

    pub fn stop_timer(&self, name: &str) {
        let mut timers = lock_or_recover(&self.timers);
        let entry = timers.entry(name.to_string()).or_default();
        if let Some(started) = entry.started.take() {
            entry.total_secs += started.elapsed().as_secs_f64();
            entry.count += 1;
        }
    }

    /// Record a zero-duration sample for a phase that never ran, so the
    /// report still lists it.
    pub fn record_zero_time(&self, name: &str) {
        let mut timers = lock_or_recover(&self.timers);
        timers.entry(name.to_string()).or_insert(TimerData {
            started: None,
            total_secs: 0.0,
            count: 1,
        });
    }

    /// Total accumulated seconds for a timer, zero when absent.
    pub fn total_time(&self, name: &str) -> f64 {
        lock_or_recover(&self.timers)
            .get(name)
            .map(|t| t.total_secs)
            .unwrap_or(0.0)
    }

    pub fn record_chunk_execution(&self, device: Device, cells: usize) {
        let mut devices = lock_or_recover(&self.devices);
        let stats = devices.entry(device).or_default();
        stats.chunks_processed += 1;
        stats.total_cells += cells as u64;
    }

    pub fn record_initial_allocation(&self, device: Device, chunks: usize) {
        let mut devices = lock_or_recover(&self.devices);
        let stats = devices.entry(device).or_default();
        stats.chunks_processed = 0;
        stats.total_cells = 0;
        stats.allocated_chunks = chunks as u64;
    }

    pub fn record_steal_event(&self, from: Device, to: Device) {
        if self.stealing_disabled.load(Ordering::SeqCst) {
            return;
        }
        let mut steals = lock_or_recover(&self.steals);
        *steals.entry((from, to)).or_insert(0) += 1;
    }

    /// Stop recording steal events and forget any already seen.
    pub fn disable_work_stealing(&self) {
        self.stealing_disabled.store(true, Ordering::SeqCst);
        lock_or_recover(&self.steals).clear();
    }

    /// Total steal events recorded across all device pairs.
    pub fn steal_event_count(&self) -> u64 {
        lock_or_recover(&self.steals).values().sum()
    }

    pub fn chunks_processed(&self, device: Device) -> u64 {
        lock_or_recover(&self.devices)
            .get(&device)
            .map(|s| s.chunks_processed)
            .unwrap_or(0)
    }

    pub fn allocated_chunks(&self, device: Device) -> u64 {
        lock_or_recover(&self.devices)
            .get(&device)
            .map(|s| s.allocated_chunks)
            .unwrap_or(0)
    }

    /// Write the execution report.
    pub fn report(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "=== HETEROGENEOUS EXECUTION SUMMARY ===")?;

        let devices = lock_or_recover(&self.devices).clone();
        let total_processed: u64 = devices.values().map(|s| s.chunks_processed).sum();
        let total_allocated: u64 = devices.values().map(|s| s.allocated_chunks).sum();

        writeln!(out, "\nchunk allocation and execution:")?;
        for device in Device::ALL {
            let stats = devices.get(&device).copied().unwrap_or_default();
            if stats.allocated_chunks == 0 && stats.chunks_processed == 0 {
                continue;
            }
            let alloc_pct = percent(stats.allocated_chunks, total_allocated);
            let proc_pct = percent(stats.chunks_processed, total_processed);
            let delta = stats.chunks_processed as i64 - stats.allocated_chunks as i64;
            writeln!(
                out,
                "  {:<4} allocated {:>5} ({alloc_pct:>5.1}%)  processed {:>5} ({proc_pct:>5.1}%)  delta {delta:+}",
                device.name(),
                stats.allocated_chunks,
                stats.chunks_processed,
            )?;
        }
        if total_processed == 0 {
            writeln!(out, "  no chunks were processed")?;
        }

        let steals = lock_or_recover(&self.steals).clone();
        if !steals.is_empty() {
            writeln!(out, "\nwork stealing events:")?;
            let mut pairs: Vec<_> = steals.into_iter().collect();
            pairs.sort_by_key(|((from, to), _)| (from.index(), to.index()));
            let mut total = 0;
            for ((from, to), count) in pairs {
                writeln!(out, "  {}->{}: {count} chunks", from.name(), to.name())?;
                total += count;
            }
            writeln!(out, "  total: {total} chunks stolen")?;
        } else if self.stealing_disabled.load(Ordering::SeqCst) {
            writeln!(out, "\nwork stealing disabled (GPU_ONLY)")?;
        }

        let timers = lock_or_recover(&self.timers).clone();
        if !timers.is_empty() {
            writeln!(out, "\ntiming measurements:")?;
            let mut rows: Vec<_> = timers.into_iter().collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, data) in rows {
                let avg = data.total_secs / data.count.max(1) as f64;
                writeln!(
                    out,
                    "  {name:<24} {:>12}  (avg {}, count {})",
                    format_time(data.total_secs),
                    format_time(avg),
                    data.count
                )?;
            }
        }
        writeln!(out, "\n=======================================")?;
        Ok(())
    }

    /// Render the report to standard error, swallowing write failures.
    pub fn print_report(&self) {
        let mut err = std::io::stderr().lock();
        let _ = self.report(&mut err);
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

fn format_time(seconds: f64) -> String {
    if seconds < 0.001 {
        format!("{:.0} µs", seconds * 1e6)
    } else if seconds < 1.0 {
        format!("{:.1} ms", seconds * 1e3)
    } else {
        format!("{seconds:.3} s")
    }
}
