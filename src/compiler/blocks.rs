//! Basic block partitioning
//!
//! A function's flat instruction stream is cut into maximal straight-line
//! runs. Control enters a block only at its leader and leaves only at its
//! last instruction.

use super::ir::Instruction;
use std::collections::BTreeSet;
use std::ops::Range;

/// Contiguous index range `[start, end)` of a function's instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicBlock {
    /// Index of the leader
    pub start: usize,
    /// One past the last instruction
    pub end: usize,
}

impl BasicBlock {
    /// Number of instructions
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True for a block with no instructions (never produced by [`partition`])
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Instruction indices covered by the block
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Index of the last instruction
    pub fn last(&self) -> usize {
        self.end - 1
    }

    /// Instructions of this block within `code`
    pub fn slice<'a>(&self, code: &'a [Instruction]) -> &'a [Instruction] {
        &code[self.range()]
    }
}

/// Leader indices of `code` in ascending order
///
/// Instruction 0, every label, and every instruction following a control
/// transfer (branch, jump, call, return, halt, or float compare) leads a
/// block. A control transfer at the very end adds nothing.
pub fn leaders(code: &[Instruction]) -> BTreeSet<usize> {
    let mut leaders = BTreeSet::new();
    if code.is_empty() {
        return leaders;
    }
    leaders.insert(0);
    for (i, inst) in code.iter().enumerate() {
        if inst.is_label() {
            leaders.insert(i);
        }
        if inst.opcode().is_some_and(|op| op.ends_block()) && i + 1 < code.len() {
            leaders.insert(i + 1);
        }
    }
    leaders
}

/// Split `code` into basic blocks covering every instruction exactly once
pub fn partition(code: &[Instruction]) -> Vec<BasicBlock> {
    let leaders: Vec<usize> = leaders(code).into_iter().collect();
    leaders
        .iter()
        .enumerate()
        .map(|(k, &start)| BasicBlock {
            start,
            end: leaders.get(k + 1).copied().unwrap_or(code.len()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Opcode, Operand, PhysReg};

    fn li(id: u32) -> Instruction {
        Instruction::op2(Opcode::Li, Operand::int_temp(id), Operand::Imm(1))
    }

    #[test]
    fn test_empty_stream_has_no_blocks() {
        assert!(partition(&[]).is_empty());
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let code = vec![li(1), li(2), li(3)];
        assert_eq!(partition(&code), vec![BasicBlock { start: 0, end: 3 }]);
    }

    #[test]
    fn test_labels_and_transfers_start_blocks() {
        let code = vec![
            Instruction::label("loop_main_1"),
            li(1),
            Instruction::branch(
                Opcode::Bge,
                Operand::int_temp(1),
                PhysReg::ZERO.into(),
                "out_main_1",
            ),
            li(2),
            Instruction::jump(Opcode::J, "loop_main_1"),
            Instruction::label("out_main_1"),
        ];
        let blocks = partition(&code);
        assert_eq!(
            blocks.iter().map(|b| (b.start, b.end)).collect::<Vec<_>>(),
            vec![(0, 3), (3, 5), (5, 6)]
        );
    }

    #[test]
    fn test_branch_before_label_collapses() {
        let code = vec![
            li(1),
            Instruction::jump(Opcode::J, "out"),
            Instruction::label("out"),
            Instruction::nullary(Opcode::Ret),
        ];
        let blocks = partition(&code);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].start, 2);
        assert_eq!(blocks.iter().map(BasicBlock::len).sum::<usize>(), code.len());
    }

    #[test]
    fn test_adjacent_labels_stay_separate_entries() {
        let code = vec![Instruction::label("else"), Instruction::label("out"), li(1)];
        assert_eq!(partition(&code).len(), 2);
    }

    #[test]
    fn test_float_compare_ends_block() {
        let code = vec![
            Instruction::op3(
                Opcode::Feq,
                Operand::int_temp(1),
                Operand::float_temp(1),
                Operand::float_temp(2),
            ),
            Instruction::branch(Opcode::Beq, Operand::int_temp(1), PhysReg::ZERO.into(), "out"),
        ];
        assert_eq!(partition(&code).len(), 2);
    }
}
