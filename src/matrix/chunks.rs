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

//! Work chunks and tile generation.
//!
//! A multiplication is cut into two-dimensional half-open output tiles.
//! Tiles of one multiplication are pairwise disjoint and their union covers
//! the whole `N×N` output, so devices can compute them in any interleaving.
//!
//! Two sizings exist: [`create_work_chunks`] sizes by a chunk-count hint,
//! while [`block_size_for`] is the coordinator's table keyed on matrix
//! magnitude. The coordinator's sizing is the authoritative one for
//! `MATRIX_MULTIPLY`.

/// Half-open output rectangle `[start_row, end_row) × [start_col, end_col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkChunk {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl WorkChunk {
    pub fn new(start_row: usize, end_row: usize, start_col: usize, end_col: usize) -> Self {
        debug_assert!(start_row < end_row && start_col < end_col);
        WorkChunk {
            start_row,
            end_row,
            start_col,
            end_col,
        }
    }

    pub fn rows(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn cols(&self) -> usize {
        self.end_col - self.start_col
    }

    /// Output cells covered by this chunk.
    pub fn area(&self) -> usize {
        self.rows() * self.cols()
    }
}

impl std::fmt::Display for WorkChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}]",
            self.start_row, self.end_row, self.start_col, self.end_col
        )
    }
}

/// Row-major cover of `[0, n) × [0, n)` with `block`-sized tiles, ragged at
/// the edges.
fn tile(n: usize, block: usize) -> Vec<WorkChunk> {
    let mut chunks = Vec::new();
    let mut i = 0;
    while i < n {
        let end_row = (i + block).min(n);
        let mut j = 0;
        while j < n {
            let end_col = (j + block).min(n);
            chunks.push(WorkChunk::new(i, end_row, j, end_col));
            j += block;
        }
        i += block;
    }
    chunks
}

/// Tile an `n×n` multiplication, sizing blocks by a chunk-count hint.
///
/// For `n ≤ 128` the block is the largest of `{32, 28, …, 4}` that both
/// divides `n` and is at most `n / 4`; failing that, the largest candidate
/// not exceeding `n`, and for very small matrices a single `n`-sized tile.
/// For larger matrices the block is `max(4, n / ⌊√hint⌋)`.
pub fn create_work_chunks(n: usize, hint: usize) -> Vec<WorkChunk> {
    if n == 0 {
        return Vec::new();
    }
    let block = if n <= 128 {
        small_matrix_block(n)
    } else {
        let columns = (hint.max(1) as f64).sqrt().floor() as usize;
        (n / columns.max(1)).max(4)
    };
    tile(n, block)
}

fn small_matrix_block(n: usize) -> usize {
    let candidates = (1..=8).rev().map(|c| c * 4); // 32, 28, ..., 4
    if let Some(block) = candidates.clone().find(|&b| b <= n / 4 && n % b == 0) {
        return block;
    }
    candidates.clone().find(|&b| b <= n).unwrap_or(n)
}

/// The coordinator's block size for an `n×n` multiplication.
///
/// This table is the authoritative sizing for `MATRIX_MULTIPLY`.
pub fn block_size_for(n: usize) -> usize {
    if n <= 128 {
        let mut block = 32;
        while n % block != 0 && block > 8 {
            block -= 4;
        }
        block
    } else if n >= 1024 {
        128
    } else if n >= 512 {
        96
    } else {
        64
    }
}

/// Tile an `n×n` multiplication with the coordinator's block size.
pub fn coordinator_chunks(n: usize) -> Vec<WorkChunk> {
    if n == 0 {
        return Vec::new();
    }
    tile(n, block_size_for(n))
}
