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

//! Bytecode peephole cleanup. Idempotent: running it twice yields the same
//! program as running it once.

use std::collections::HashSet;

use crate::bytecode::{Opcode, Program};

/// Remove duplicate `ALLOC_MATRIX` instructions: each label is allocated at
/// most once, keeping the first occurrence.
pub fn elide_duplicate_allocs(program: &mut Program) {
    let mut allocated: HashSet<String> = HashSet::new();
    program.instructions.retain(|instr| {
        if instr.operation != Opcode::AllocMatrix {
            return true;
        }
        allocated.insert(instr.label.clone())
    });
}

/// All optimization passes, in order.
pub fn optimize(program: &mut Program) {
    elide_duplicate_allocs(program);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    fn alloc(label: &str) -> Instruction {
        Instruction::new(Opcode::AllocMatrix, vec![0], label)
    }

    #[test]
    fn duplicate_allocs_are_elided() {
        let mut program = Program {
            instructions: vec![
                alloc("result"),
                alloc("result"),
                Instruction::new(Opcode::Terminate, vec![], ""),
                alloc("scratch"),
            ],
        };
        optimize(&mut program);
        let allocs: Vec<_> = program
            .instructions
            .iter()
            .filter(|i| i.operation == Opcode::AllocMatrix)
            .map(|i| i.label.as_str())
            .collect();
        assert_eq!(allocs, ["result", "scratch"]);
    }

    #[test]
    fn optimize_is_idempotent() {
        let mut program = Program {
            instructions: vec![alloc("result"), alloc("result"), alloc("m")],
        };
        optimize(&mut program);
        let once = program.clone();
        optimize(&mut program);
        assert_eq!(program, once);
    }
}
