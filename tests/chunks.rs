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

use weft::{block_size_for, create_work_chunks, WorkChunk};

/// Every cell of `[0,n)×[0,n)` must be covered by exactly one chunk.
fn assert_exact_tiling(n: usize, chunks: &[WorkChunk]) {
    let mut covered = vec![0u8; n * n];
    for chunk in chunks {
        assert!(chunk.start_row < chunk.end_row && chunk.end_row <= n, "bad rows in {chunk}");
        assert!(chunk.start_col < chunk.end_col && chunk.end_col <= n, "bad cols in {chunk}");
        for i in chunk.start_row..chunk.end_row {
            for j in chunk.start_col..chunk.end_col {
                covered[i * n + j] += 1;
            }
        }
    }
    assert!(
        covered.iter().all(|&c| c == 1),
        "tiling of n={n} has gaps or overlaps"
    );
    let total_area: usize = chunks.iter().map(WorkChunk::area).sum();
    assert_eq!(total_area, n * n);
}

#[test]
fn hint_sized_chunks_tile_exactly() {
    for n in [1, 2, 7, 16, 64, 128, 513, 1024] {
        for hint in [1, 16, 64, 256] {
            assert_exact_tiling(n, &create_work_chunks(n, hint));
        }
    }
}

#[test]
fn coordinator_sized_chunks_tile_exactly() {
    for n in [1, 2, 7, 16, 64, 100, 128, 129, 256, 512, 513, 1024, 2048] {
        let block = block_size_for(n);
        let mut chunks = Vec::new();
        let mut i = 0;
        while i < n {
            let mut j = 0;
            while j < n {
                chunks.push(WorkChunk::new(
                    i,
                    (i + block).min(n),
                    j,
                    (j + block).min(n),
                ));
                j += block;
            }
            i += block;
        }
        assert_exact_tiling(n, &chunks);
    }
}

#[test]
fn chunks_are_emitted_row_major() {
    let chunks = create_work_chunks(64, 16);
    for pair in chunks.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(
            a.start_row < b.start_row || (a.start_row == b.start_row && a.start_col < b.start_col),
            "chunks out of row-major order: {a} then {b}"
        );
    }
}

#[test]
fn small_matrix_blocks_divide_when_possible() {
    // 128 admits 32 (divides, and 32 <= 128/4).
    let chunks = create_work_chunks(128, 64);
    assert!(chunks.iter().all(|c| c.rows() == 32 && c.cols() == 32));
    // 64 admits 16.
    let chunks = create_work_chunks(64, 64);
    assert!(chunks.iter().all(|c| c.rows() == 16 && c.cols() == 16));
}

#[test]
fn large_matrix_blocks_follow_the_hint() {
    // n=1024, hint=64 -> sqrt(64)=8 -> block 128.
    let chunks = create_work_chunks(1024, 64);
    assert_eq!(chunks.len(), 64);
    assert!(chunks.iter().all(|c| c.rows() == 128 && c.cols() == 128));
}

#[test]
fn coordinator_block_table() {
    assert_eq!(block_size_for(64), 32);
    assert_eq!(block_size_for(128), 32);
    assert_eq!(block_size_for(200), 64);
    assert_eq!(block_size_for(256), 64);
    assert_eq!(block_size_for(512), 96);
    assert_eq!(block_size_for(1024), 128);
    assert_eq!(block_size_for(2048), 128);
    assert_eq!(block_size_for(8192), 128);
}
