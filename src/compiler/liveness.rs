//! Block liveness over the function's control-flow graph
//!
//! For every instruction the table records the named operands (temps,
//! locals, globals) whose current value may still be read afterwards. Each
//! block is walked backwards from its boundary set:
//!
//! ```text
//! live_out(last) = boundary(block)
//! live_in(i)     = (live_out(i) - def(i)) ∪ uses(i)
//! live_out(i)    = live_in(i + 1)
//! ```
//!
//! The boundary set holds every local and global the function names (their
//! home is memory, so their value must survive the block) plus the live-in
//! sets of the block's successors, iterated to a fixed point so temps carried
//! around loop back edges stay live at the jump.

use super::blocks::BasicBlock;
use super::ir::{Instruction, Opcode, Operand};
use std::collections::{HashMap, HashSet};

/// Live-after sets for one function's instruction stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessTable {
    live_after: Vec<HashSet<Operand>>,
}

impl LivenessTable {
    /// Operands live immediately after instruction `index`
    pub fn live_after(&self, index: usize) -> &HashSet<Operand> {
        &self.live_after[index]
    }

    /// True if `operand` is live immediately after instruction `index`
    pub fn is_live_after(&self, index: usize, operand: &Operand) -> bool {
        self.live_after
            .get(index)
            .is_some_and(|set| set.contains(operand))
    }

    /// Operands live on entry to instruction `index`
    pub fn live_before(&self, code: &[Instruction], index: usize) -> HashSet<Operand> {
        let mut set = self.live_after[index].clone();
        if let Some(def) = code[index].defs() {
            set.remove(def);
        }
        set.extend(code[index].uses().cloned());
        set
    }

    /// Number of instructions covered
    pub fn len(&self) -> usize {
        self.live_after.len()
    }

    /// True when the function has no instructions
    pub fn is_empty(&self) -> bool {
        self.live_after.is_empty()
    }
}

/// Indices of the blocks control may reach from the end of block `b`
///
/// A call (`JR`) returns to the next block. Jumps to labels outside the
/// function (the shared epilogue) and `RET`/`HALT` leave the function.
pub fn successors(
    code: &[Instruction],
    blocks: &[BasicBlock],
    labels: &HashMap<&str, usize>,
    b: usize,
) -> Vec<usize> {
    let last = &code[blocks[b].last()];
    let fall = (b + 1 < blocks.len()).then_some(b + 1);
    let target = last.jump_target().and_then(|t| labels.get(t).copied());
    match last.opcode() {
        Some(Opcode::J) => target.into_iter().collect(),
        Some(Opcode::Ret) | Some(Opcode::Halt) => Vec::new(),
        Some(op) if op.is_branch() => {
            let mut next: Vec<usize> = fall.into_iter().chain(target).collect();
            next.dedup();
            next
        }
        _ => fall.into_iter().collect(),
    }
}

/// Block index of every label that leads a block
fn label_blocks<'a>(code: &'a [Instruction], blocks: &[BasicBlock]) -> HashMap<&'a str, usize> {
    blocks
        .iter()
        .enumerate()
        .flat_map(|(b, block)| {
            block
                .slice(code)
                .iter()
                .filter_map(Instruction::label_name)
                .map(move |name| (name, b))
        })
        .collect()
}

/// Walk `block` backwards from `live`, leaving its live-in set
fn transfer(code: &[Instruction], block: &BasicBlock, mut live: HashSet<Operand>) -> HashSet<Operand> {
    for i in block.range().rev() {
        if let Some(def) = code[i].defs() {
            live.remove(def);
        }
        live.extend(code[i].uses().cloned());
    }
    live
}

/// Named operands live at the end of each block
pub fn boundary_sets(code: &[Instruction], blocks: &[BasicBlock]) -> Vec<HashSet<Operand>> {
    let variables: HashSet<Operand> = code
        .iter()
        .flat_map(Instruction::operands)
        .filter(|op| op.is_variable())
        .cloned()
        .collect();

    let labels = label_blocks(code, blocks);
    let succ: Vec<Vec<usize>> = (0..blocks.len())
        .map(|b| successors(code, blocks, &labels, b))
        .collect();

    let mut live_in: Vec<HashSet<Operand>> = vec![HashSet::new(); blocks.len()];
    let mut boundary: Vec<HashSet<Operand>> = vec![variables.clone(); blocks.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..blocks.len()).rev() {
            let mut out = variables.clone();
            for &s in &succ[b] {
                out.extend(live_in[s].iter().cloned());
            }
            let inn = transfer(code, &blocks[b], out.clone());
            if inn != live_in[b] || out != boundary[b] {
                live_in[b] = inn;
                boundary[b] = out;
                changed = true;
            }
        }
    }
    boundary
}

/// Compute the liveness table for `code` partitioned into `blocks`
pub fn analyze(code: &[Instruction], blocks: &[BasicBlock]) -> LivenessTable {
    let boundaries = boundary_sets(code, blocks);
    let mut live_after = vec![HashSet::new(); code.len()];

    for (block, boundary) in blocks.iter().zip(boundaries) {
        let mut live = boundary;
        for i in block.range().rev() {
            live_after[i] = live.clone();
            if let Some(def) = code[i].defs() {
                live.remove(def);
            }
            live.extend(code[i].uses().cloned());
        }
    }

    LivenessTable { live_after }
}
