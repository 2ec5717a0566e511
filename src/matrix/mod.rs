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

//! Shared matrix buffers with a cross-device access-state machine.
//!
//! A [`MatrixBuffer`] is a single contiguous `N×N` row-major block of `i32`
//! storage shared by every device. One state variable records which device
//! role currently holds the buffer; transitions synchronize the
//! device-visible mirror where the state machine requires it. On this
//! backend the mirror is a unified view of host storage, so the upload and
//! download steps reduce to publish fences plus trace logs, but they are
//! performed on exactly the transitions the state machine names so a
//! discrete-memory backend can slot in behind the same surface.
//!
//! Concurrent workers of the same role may hold views at once; data
//! disjointness comes from the tiling contract (output tiles of one
//! multiplication never overlap). The state machine arbitrates *roles*
//! across devices, not element-level aliasing.

pub mod chunks;

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, Ordering};
use std::sync::Mutex;

use tracing::trace;

use crate::sched::lock_or_recover;

/// Current legal reader/writer role of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Shared,
    CpuReading,
    CpuWriting,
    GpuReading,
    GpuWriting,
    NaReading,
    NaWriting,
}

/// Errors raised by matrix storage.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// Backing storage could not be obtained.
    #[error("failed to allocate {size}x{size} matrix storage")]
    Allocation { size: usize },
    /// Index outside `[0, N)`.
    #[error("matrix index ({row}, {col}) out of bounds for size {size}")]
    OutOfBounds { row: usize, col: usize, size: usize },
}

/// `i32` cell writable through a shared reference.
///
/// Soundness relies on the access-state discipline: concurrent writers only
/// ever touch disjoint cells (per the tiling contract), and cross-device
/// visibility is established by the release/prepare fences.
#[repr(transparent)]
struct SharedCell(UnsafeCell<i32>);

// SAFETY: all mutation goes through raw pointer writes to disjoint cells,
// ordered across threads by the buffer's access-state fences.
unsafe impl Sync for SharedCell {}

/// An `N×N` row-major integer matrix shared across devices.
pub struct MatrixBuffer {
    size: usize,
    storage: Box<[SharedCell]>,
    state: Mutex<AccessState>,
}

impl MatrixBuffer {
    /// Allocate zeroed `size × size` storage in the `Shared` state.
    ///
    /// Fails with [`MatrixError::Allocation`] when storage cannot be
    /// obtained; nothing is left partially initialized in that case.
    pub fn new(size: usize) -> Result<Self, MatrixError> {
        let cells = size
            .checked_mul(size)
            .ok_or(MatrixError::Allocation { size })?;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(cells)
            .map_err(|_| MatrixError::Allocation { size })?;
        storage.resize_with(cells, || SharedCell(UnsafeCell::new(0)));
        Ok(MatrixBuffer {
            size,
            storage: storage.into_boxed_slice(),
            state: Mutex::new(AccessState::Shared),
        })
    }

    /// Side length of the matrix.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Snapshot of the current access state.
    pub fn access_state(&self) -> AccessState {
        *lock_or_recover(&self.state)
    }

    /// Bounds-checked element read. Does not transition the access state.
    pub fn get(&self, row: usize, col: usize) -> Result<i32, MatrixError> {
        self.check_bounds(row, col)?;
        // SAFETY: index validated above; reads of i32 cells are atomic enough
        // under the single-writer-per-cell discipline.
        Ok(unsafe { *self.storage[row * self.size + col].0.get() })
    }

    /// Bounds-checked element write. Does not transition the access state.
    pub fn set(&self, row: usize, col: usize, value: i32) -> Result<(), MatrixError> {
        self.check_bounds(row, col)?;
        // SAFETY: index validated above; callers honor the tiling contract.
        unsafe { *self.storage[row * self.size + col].0.get() = value };
        Ok(())
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), MatrixError> {
        if row >= self.size || col >= self.size {
            return Err(MatrixError::OutOfBounds {
                row,
                col,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Claim CPU read access; downloads pending device stores first.
    pub fn cpu_read(&self) -> MatrixView<'_> {
        let mut state = lock_or_recover(&self.state);
        if matches!(*state, AccessState::GpuWriting | AccessState::NaWriting) {
            self.download(*state);
        }
        *state = AccessState::CpuReading;
        MatrixView { buf: self }
    }

    /// Claim CPU write access; downloads pending device stores first.
    pub fn cpu_write(&self) -> MatrixViewMut<'_> {
        let mut state = lock_or_recover(&self.state);
        if matches!(*state, AccessState::GpuWriting | AccessState::NaWriting) {
            self.download(*state);
        }
        *state = AccessState::CpuWriting;
        MatrixViewMut { buf: self }
    }

    /// Return a CPU role to `Shared`. No-op in any non-CPU state.
    pub fn release_cpu_access(&self) {
        let mut state = lock_or_recover(&self.state);
        if matches!(*state, AccessState::CpuReading | AccessState::CpuWriting) {
            *state = AccessState::Shared;
        }
    }

    /// Transition into a GPU role; uploads pending CPU stores first.
    pub fn prepare_for_gpu_access(&self, read_only: bool) {
        let mut state = lock_or_recover(&self.state);
        if *state == AccessState::CpuWriting {
            self.upload();
        }
        *state = if read_only {
            AccessState::GpuReading
        } else {
            AccessState::GpuWriting
        };
    }

    /// Return a GPU role to `Shared`, publishing device stores on the way
    /// out of `GpuWriting`.
    pub fn release_gpu_access(&self) {
        let mut state = lock_or_recover(&self.state);
        if matches!(*state, AccessState::GpuReading | AccessState::GpuWriting) {
            if *state == AccessState::GpuWriting {
                self.publish();
            }
            *state = AccessState::Shared;
        }
    }

    /// Transition into an NA role; uploads pending CPU stores first.
    pub fn prepare_for_na_access(&self, read_only: bool) {
        let mut state = lock_or_recover(&self.state);
        if *state == AccessState::CpuWriting {
            self.upload();
        }
        *state = if read_only {
            AccessState::NaReading
        } else {
            AccessState::NaWriting
        };
    }

    /// Return an NA role to `Shared`, publishing device stores on the way
    /// out of `NaWriting`.
    pub fn release_na_access(&self) {
        let mut state = lock_or_recover(&self.state);
        if matches!(*state, AccessState::NaReading | AccessState::NaWriting) {
            if *state == AccessState::NaWriting {
                self.publish();
            }
            *state = AccessState::Shared;
        }
    }

    /// Device-visible view of the buffer. Valid only between a
    /// `prepare_for_*_access` and the matching release.
    pub fn device_view(&self) -> DeviceView<'_> {
        DeviceView { buf: self }
    }

    // Unified memory: host storage is the device mirror, so the upload step
    // is a release fence making host stores visible to the device worker.
    fn upload(&self) {
        fence(Ordering::Release);
        trace!(size = self.size, "upload: published host stores to device mirror");
    }

    // Download after a device write: acquire fence before host reads.
    fn download(&self, from: AccessState) {
        fence(Ordering::Acquire);
        trace!(size = self.size, ?from, "download: synchronized device stores to host");
    }

    // Publish device stores on release of a writing role.
    fn publish(&self) {
        fence(Ordering::Release);
        trace!(size = self.size, "publish: device stores visible for host readers");
    }
}

impl std::fmt::Debug for MatrixBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixBuffer")
            .field("size", &self.size)
            .field("state", &self.access_state())
            .finish()
    }
}

/// Borrowed read view, valid until the access claim is released.
#[derive(Clone, Copy)]
pub struct MatrixView<'a> {
    buf: &'a MatrixBuffer,
}

impl MatrixView<'_> {
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> i32 {
        debug_assert!(row < self.buf.size && col < self.buf.size);
        // SAFETY: bounds hold for every tile handed out by the partitioner.
        unsafe { *self.buf.storage[row * self.buf.size + col].0.get() }
    }
}

/// Borrowed write view, valid until the access claim is released.
#[derive(Clone, Copy)]
pub struct MatrixViewMut<'a> {
    buf: &'a MatrixBuffer,
}

impl MatrixViewMut<'_> {
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> i32 {
        debug_assert!(row < self.buf.size && col < self.buf.size);
        // SAFETY: as for `MatrixView::at`.
        unsafe { *self.buf.storage[row * self.buf.size + col].0.get() }
    }

    #[inline]
    pub fn store(&self, row: usize, col: usize, value: i32) {
        debug_assert!(row < self.buf.size && col < self.buf.size);
        // SAFETY: concurrent writers touch disjoint tiles.
        unsafe { *self.buf.storage[row * self.buf.size + col].0.get() = value };
    }

    /// Two's-complement accumulate into one cell.
    #[inline]
    pub fn accumulate(&self, row: usize, col: usize, delta: i32) {
        self.store(row, col, self.at(row, col).wrapping_add(delta));
    }
}

/// Device-side view over the unified mirror.
#[derive(Clone, Copy)]
pub struct DeviceView<'a> {
    buf: &'a MatrixBuffer,
}

impl DeviceView<'_> {
    #[inline]
    pub fn load(&self, row: usize, col: usize) -> i32 {
        debug_assert!(row < self.buf.size && col < self.buf.size);
        // SAFETY: as for `MatrixView::at`.
        unsafe { *self.buf.storage[row * self.buf.size + col].0.get() }
    }

    #[inline]
    pub fn store(&self, row: usize, col: usize, value: i32) {
        debug_assert!(row < self.buf.size && col < self.buf.size);
        // SAFETY: dispatch grids cover disjoint output tiles.
        unsafe { *self.buf.storage[row * self.buf.size + col].0.get() = value };
    }
}
