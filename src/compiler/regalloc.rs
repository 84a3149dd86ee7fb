//! # Block-Local Register Allocator
//!
//! Maps the named operands of a function's three-address code onto a fixed
//! physical register file, one basic block at a time:
//!
//! 1. `ensure` each source: reuse its register, or bind one and emit the
//!    materializing load (`LW`/`FLW` from the frame for locals and spilled
//!    temps, `LA x3` + `LW`/`FLW 0(x3)` for globals, `LA` for strings)
//! 2. release the retain bits and free every source that is dead afterwards
//! 3. `ensure` the destination without a load and mark it dirty
//! 4. rewrite the operands to registers and emit
//!
//! Register selection prefers a free register, then a clean one (its value
//! is already in memory), and finally evicts the lowest-numbered candidate,
//! storing it first when it is dirty and still needed.
//!
//! At each block end dirty locals and globals are written home and dirty
//! live temps are spilled to frame slots, after which every binding is
//! dropped. The one exception is a block ending in a float compare that
//! falls through into an unlabeled block: the compare's result stays in its
//! register for the branch that consumes it.
//!
//! Loads and stores through computed pointers are memory barriers. Dirty
//! variables are written home before them, and a store drops every cached
//! variable afterwards since it may have overwritten one.

use super::blocks::{partition, BasicBlock};
use super::ir::{FunctionIr, Instruction, Opcode, Operand, PhysReg, RegClass, ValueKind};
use super::liveness::{analyze, LivenessTable};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

// =============================================================================
// REGISTER FILE
// =============================================================================

/// State of one physical register
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    /// The register described
    pub reg: PhysReg,
    /// Operand currently held (`None` = free)
    pub bound: Option<Operand>,
    /// Register value is newer than the operand's home in memory
    pub dirty: bool,
    /// Permanently pinned (`x0`, `ra`, `sp`, `x3`, `fp`)
    pub reserved: bool,
    /// Pinned for the duration of the current instruction
    pub retained: bool,
}

impl RegisterDescriptor {
    /// True when the register can be handed out without evicting anything
    pub fn is_free(&self) -> bool {
        self.bound.is_none() && !self.reserved && !self.retained
    }

    fn is_candidate(&self) -> bool {
        !self.reserved && !self.retained
    }
}

/// How a register was obtained by [`RegisterFile::choose`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Nothing was bound
    Free,
    /// A clean value was dropped (memory already holds it)
    Clean,
    /// A dirty value must be stored first if still needed
    Evict,
}

/// Flat descriptor table for one register class
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterFile {
    class: RegClass,
    regs: Vec<RegisterDescriptor>,
}

impl RegisterFile {
    /// Register file with `count` registers; reserved ones are pinned
    pub fn new(class: RegClass, count: usize) -> Self {
        let regs = (0..count)
            .map(|i| {
                let reg = PhysReg {
                    class,
                    index: i as u8,
                };
                RegisterDescriptor {
                    reg,
                    bound: None,
                    dirty: false,
                    reserved: reg.is_reserved(),
                    retained: false,
                }
            })
            .collect();
        Self { class, regs }
    }

    /// Register class
    pub fn class(&self) -> RegClass {
        self.class
    }

    /// All descriptors, indexed by register number
    pub fn descriptors(&self) -> &[RegisterDescriptor] {
        &self.regs
    }

    /// Number of registers the allocator may hand out
    pub fn allocatable(&self) -> usize {
        self.regs.iter().filter(|r| !r.reserved).count()
    }

    /// Register number holding `operand`
    pub fn find(&self, operand: &Operand) -> Option<usize> {
        self.regs
            .iter()
            .position(|r| r.bound.as_ref() == Some(operand))
    }

    /// Physical register at `index`
    pub fn reg(&self, index: usize) -> PhysReg {
        self.regs[index].reg
    }

    /// Descriptor at `index`
    pub fn get(&self, index: usize) -> &RegisterDescriptor {
        &self.regs[index]
    }

    /// Pick a register: free, then clean, then the lowest candidate
    pub fn choose(&self) -> Option<(usize, Choice)> {
        let candidates = || self.regs.iter().enumerate().filter(|(_, r)| r.is_candidate());
        if let Some((i, _)) = candidates().find(|(_, r)| r.bound.is_none()) {
            return Some((i, Choice::Free));
        }
        if let Some((i, _)) = candidates().find(|(_, r)| !r.dirty) {
            return Some((i, Choice::Clean));
        }
        candidates().next().map(|(i, _)| (i, Choice::Evict))
    }

    /// Bind `operand` to register `index`
    pub fn bind(&mut self, index: usize, operand: Operand, dirty: bool) {
        let desc = &mut self.regs[index];
        desc.bound = Some(operand);
        desc.dirty = dirty;
    }

    /// Drop the binding of register `index`, returning the operand it held
    pub fn unbind(&mut self, index: usize) -> Option<Operand> {
        let desc = &mut self.regs[index];
        desc.dirty = false;
        desc.bound.take()
    }

    /// Set or clear the dirty bit
    pub fn set_dirty(&mut self, index: usize, dirty: bool) {
        self.regs[index].dirty = dirty;
    }

    /// Pin register `index` for the current instruction
    pub fn retain(&mut self, index: usize) {
        self.regs[index].retained = true;
    }

    /// Clear every retain bit
    pub fn release(&mut self) {
        for r in &mut self.regs {
            r.retained = false;
        }
    }

    /// Drop every binding
    pub fn reset(&mut self) {
        for r in &mut self.regs {
            r.bound = None;
            r.dirty = false;
            r.retained = false;
        }
    }

    /// Check the descriptor invariants
    pub fn check(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for r in &self.regs {
            if r.reserved && r.bound.is_some() {
                return Err(format!("reserved register {} is bound", r.reg));
            }
            if r.retained && r.is_free() {
                return Err(format!("retained register {} reported free", r.reg));
            }
            if r.dirty && r.bound.is_none() {
                return Err(format!("unbound register {} is dirty", r.reg));
            }
            if let Some(op) = &r.bound {
                if op.reg_class() != Some(self.class) {
                    return Err(format!("{} bound to {}", op, r.reg));
                }
                if !seen.insert(op) {
                    return Err(format!("{} bound to two registers", op));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Result of allocating one function
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Physical instruction stream (no prologue or epilogue)
    pub code: Vec<Instruction>,
    /// Allocatable registers written or read, in first-use order
    pub used_registers: Vec<PhysReg>,
    /// Local area size in words, including spill slots
    pub frame_words: usize,
    /// Frame offset assigned to each spilled temp
    pub spill_slots: HashMap<Operand, i32>,
    /// Stores emitted because a live value lost its register
    pub spills: usize,
}

/// Block-local register allocator
#[derive(Debug, Clone)]
pub struct RegisterAllocator {
    int_registers: usize,
    float_registers: usize,
    word: i32,
}

impl RegisterAllocator {
    /// Allocator for a machine with the given register files and word size
    pub fn new(int_registers: usize, float_registers: usize, word_size: u32) -> Self {
        Self {
            int_registers,
            float_registers,
            word: word_size as i32,
        }
    }

    /// Allocate registers for one function
    ///
    /// The register file starts empty for every call, so one allocator can
    /// serve any number of functions, including concurrently.
    pub fn allocate(&self, function: &FunctionIr) -> Result<Allocation> {
        let code = &function.code;
        let blocks = partition(code);
        let liveness = analyze(code, &blocks);

        let mut state = AllocState {
            code,
            liveness: &liveness,
            ints: RegisterFile::new(RegClass::Int, self.int_registers),
            floats: RegisterFile::new(RegClass::Float, self.float_registers),
            word: self.word,
            num_locals: function.num_locals,
            spill_slots: HashMap::new(),
            used: Vec::new(),
            out: Vec::with_capacity(code.len()),
            spills: 0,
        };

        for (b, block) in blocks.iter().enumerate() {
            state.block(block, blocks.get(b + 1))?;
        }

        debug!(
            function = %function.name,
            blocks = blocks.len(),
            instructions = state.out.len(),
            spills = state.spills,
            registers = state.used.len(),
            "allocated registers"
        );

        let frame_words = state.num_locals + state.spill_slots.len();
        Ok(Allocation {
            code: state.out,
            used_registers: state.used,
            frame_words,
            spill_slots: state.spill_slots,
            spills: state.spills,
        })
    }
}

struct AllocState<'a> {
    code: &'a [Instruction],
    liveness: &'a LivenessTable,
    ints: RegisterFile,
    floats: RegisterFile,
    word: i32,
    num_locals: usize,
    spill_slots: HashMap<Operand, i32>,
    used: Vec<PhysReg>,
    out: Vec<Instruction>,
    spills: usize,
}

fn load_opcode(class: RegClass) -> Opcode {
    match class {
        RegClass::Int => Opcode::Lw,
        RegClass::Float => Opcode::Flw,
    }
}

fn store_opcode(class: RegClass) -> Opcode {
    match class {
        RegClass::Int => Opcode::Sw,
        RegClass::Float => Opcode::Fsw,
    }
}

impl<'a> AllocState<'a> {
    fn file(&self, class: RegClass) -> &RegisterFile {
        match class {
            RegClass::Int => &self.ints,
            RegClass::Float => &self.floats,
        }
    }

    fn file_mut(&mut self, class: RegClass) -> &mut RegisterFile {
        match class {
            RegClass::Int => &mut self.ints,
            RegClass::Float => &mut self.floats,
        }
    }

    fn class_of(&self, operand: &Operand) -> Result<RegClass> {
        operand
            .reg_class()
            .ok_or_else(|| Error::unsupported_operand("register operand", operand))
    }

    fn block(&mut self, block: &BasicBlock, next: Option<&BasicBlock>) -> Result<()> {
        let code = self.code;
        for i in block.range() {
            let last = i == block.last();
            match &code[i] {
                Instruction::Label(_) => {
                    self.out.push(code[i].clone());
                    if last {
                        self.end_block(i, false);
                    }
                }
                Instruction::Op {
                    opcode,
                    dest,
                    src1,
                    src2,
                    offset,
                } => {
                    let carry = last
                        && opcode.is_float_compare()
                        && next.is_some_and(|n| !code[n.start].is_label());
                    let step = Step {
                        index: i,
                        opcode: *opcode,
                        last,
                        carry,
                    };
                    self.instruction(step, dest.as_ref(), src1.as_ref(), src2.as_ref(), *offset)?;
                }
            }
        }
        Ok(())
    }

    fn instruction(
        &mut self,
        step: Step,
        dest: Option<&Operand>,
        src1: Option<&Operand>,
        src2: Option<&Operand>,
        offset: i32,
    ) -> Result<()> {
        let Step {
            index: i, opcode, ..
        } = step;

        let through_pointer = (opcode.is_load() && src1.is_some_and(Operand::is_temp))
            || (opcode.is_store() && src2.is_some_and(Operand::is_temp));
        if through_pointer {
            self.write_back_variables();
        }

        let s1 = self.ensure_source(i, src1)?;
        let s2 = self.ensure_source(i, src2)?;
        self.ints.release();
        self.floats.release();

        for src in [src1, src2].into_iter().flatten() {
            if src.is_named() && !self.liveness.is_live_after(i, src) {
                self.free_operand(i, src)?;
            }
        }

        // Control leaves the block here, so write back before the transfer
        let transfers = step.last && opcode.ends_block() && !opcode.is_float_compare();
        if transfers {
            self.flush(i, false);
        }

        let d = if opcode.writes_dest() {
            self.ensure_dest(i, dest)?
        } else {
            dest.cloned()
        };

        // A move whose source register was handed to its destination is a no-op
        let self_move = matches!(opcode, Opcode::Mv | Opcode::FMv) && d.is_some() && d == s1;
        if !self_move {
            self.out.push(Instruction::Op {
                opcode,
                dest: d,
                src1: s1,
                src2: s2,
                offset,
            });
        }

        if let Some(def) = dest.filter(|d| d.is_named() && opcode.writes_dest()) {
            if !self.liveness.is_live_after(i, def) {
                self.free_operand(i, def)?;
            }
        }

        if through_pointer && opcode.is_store() {
            self.invalidate_variables();
        }

        if step.last {
            if !transfers {
                self.flush(i, step.carry);
            }
            self.end_block(i, step.carry);
        }

        self.ints
            .check()
            .and_then(|_| self.floats.check())
            .map_err(|msg| Error::register_file(i, msg))
    }

    /// Bring a source operand into a register and retain it
    fn ensure_source(&mut self, i: usize, operand: Option<&Operand>) -> Result<Option<Operand>> {
        let Some(op) = operand else {
            return Ok(None);
        };
        if !op.is_named() {
            return Ok(Some(op.clone()));
        }

        let class = self.class_of(op)?;
        if let Some(idx) = self.file(class).find(op) {
            self.file_mut(class).retain(idx);
            return Ok(Some(self.file(class).reg(idx).into()));
        }

        let idx = self.take_register(i, class)?;
        let reg = self.file(class).reg(idx);
        self.materialize(reg, op)?;
        let file = self.file_mut(class);
        file.bind(idx, op.clone(), false);
        file.retain(idx);
        self.mark_used(reg);
        trace!(operand = %op, register = %reg, "loaded source");
        Ok(Some(reg.into()))
    }

    /// Bind the destination operand without loading it and mark it dirty
    fn ensure_dest(&mut self, i: usize, operand: Option<&Operand>) -> Result<Option<Operand>> {
        let Some(op) = operand else {
            return Ok(None);
        };
        if !op.is_named() {
            return Ok(Some(op.clone()));
        }

        let class = self.class_of(op)?;
        let idx = match self.file(class).find(op) {
            Some(idx) => idx,
            None => {
                let idx = self.take_register(i, class)?;
                self.file_mut(class).bind(idx, op.clone(), true);
                idx
            }
        };
        self.file_mut(class).set_dirty(idx, true);
        let reg = self.file(class).reg(idx);
        self.mark_used(reg);
        Ok(Some(reg.into()))
    }

    /// Select a register of `class`, evicting its current value if needed
    fn take_register(&mut self, i: usize, class: RegClass) -> Result<usize> {
        let (idx, choice) = self
            .file(class)
            .choose()
            .ok_or_else(|| Error::register_file(i, format!("no eligible {:?} register", class)))?;

        if choice != Choice::Free {
            let desc = self.file(class).get(idx).clone();
            if let Some(victim) = desc.bound {
                if desc.dirty && self.needed(i, &victim) {
                    self.store(desc.reg, &victim);
                    self.spills += 1;
                    trace!(operand = %victim, register = %desc.reg, "spilled on eviction");
                }
                self.file_mut(class).unbind(idx);
            }
        }
        Ok(idx)
    }

    /// Value of `operand` may be read by instruction `i` or later
    ///
    /// A variable may also be read through a pointer, which liveness cannot
    /// see, so its memory copy is always kept current.
    fn needed(&self, i: usize, operand: &Operand) -> bool {
        operand.is_variable()
            || self.liveness.is_live_after(i, operand)
            || self.code[i].uses().any(|u| u == operand)
    }

    /// Release the register holding `operand`, storing it if dirty and live
    fn free_operand(&mut self, i: usize, operand: &Operand) -> Result<()> {
        let class = self.class_of(operand)?;
        if let Some(idx) = self.file(class).find(operand) {
            let desc = self.file(class).get(idx).clone();
            if desc.dirty && (operand.is_variable() || self.liveness.is_live_after(i, operand)) {
                self.store(desc.reg, operand);
            }
            self.file_mut(class).unbind(idx);
        }
        Ok(())
    }

    fn mark_used(&mut self, reg: PhysReg) {
        if !self.used.contains(&reg) {
            self.used.push(reg);
        }
    }

    // =========================================================================
    // MEMORY TRAFFIC
    // =========================================================================

    /// Emit the load that brings `operand` into `reg`
    fn materialize(&mut self, reg: PhysReg, operand: &Operand) -> Result<()> {
        let load = load_opcode(reg.class);
        match operand {
            Operand::Local { offset, .. } => {
                self.out
                    .push(Instruction::load(load, reg.into(), PhysReg::FP.into(), *offset));
            }
            Operand::Global {
                address,
                kind: ValueKind::Addr,
                ..
            } => {
                self.out.push(Instruction::op2(
                    Opcode::La,
                    reg.into(),
                    Operand::Address(*address as u32),
                ));
            }
            Operand::Global { address, .. } => {
                self.out.push(Instruction::op2(
                    Opcode::La,
                    PhysReg::ADDR.into(),
                    Operand::Address(*address as u32),
                ));
                self.out
                    .push(Instruction::load(load, reg.into(), PhysReg::ADDR.into(), 0));
            }
            Operand::Temp { .. } => {
                let slot = *self
                    .spill_slots
                    .get(operand)
                    .ok_or_else(|| Error::UndefinedTemporary {
                        name: operand.to_string(),
                    })?;
                self.out
                    .push(Instruction::load(load, reg.into(), PhysReg::FP.into(), slot));
            }
            other => return Err(Error::unsupported_operand(load, other)),
        }
        Ok(())
    }

    /// Emit the store that writes `reg` back to `operand`'s home
    fn store(&mut self, reg: PhysReg, operand: &Operand) {
        let store = store_opcode(reg.class);
        match operand {
            Operand::Local { offset, .. } => {
                self.out
                    .push(Instruction::store(store, reg.into(), PhysReg::FP.into(), *offset));
            }
            // String symbols are constants
            Operand::Global {
                kind: ValueKind::Addr,
                ..
            } => {}
            Operand::Global { address, .. } => {
                self.out.push(Instruction::op2(
                    Opcode::La,
                    PhysReg::ADDR.into(),
                    Operand::Address(*address as u32),
                ));
                self.out
                    .push(Instruction::store(store, reg.into(), PhysReg::ADDR.into(), 0));
            }
            Operand::Temp { .. } => {
                let slot = self.spill_slot(operand);
                self.out
                    .push(Instruction::store(store, reg.into(), PhysReg::FP.into(), slot));
            }
            _ => {}
        }
    }

    /// Frame slot for a spilled temp, growing the local area on first use
    fn spill_slot(&mut self, operand: &Operand) -> i32 {
        if let Some(&slot) = self.spill_slots.get(operand) {
            return slot;
        }
        let k = (self.num_locals + self.spill_slots.len()) as i32;
        let slot = -self.word * (k + 1);
        self.spill_slots.insert(operand.clone(), slot);
        debug!(operand = %operand, slot, "assigned spill slot");
        slot
    }

    /// Bound `(register, operand, dirty)` triples of both files
    fn bindings(&self) -> Vec<(PhysReg, Operand, bool)> {
        self.ints
            .descriptors()
            .iter()
            .chain(self.floats.descriptors())
            .filter_map(|d| d.bound.clone().map(|op| (d.reg, op, d.dirty)))
            .collect()
    }

    /// Store every dirty local and global and mark it clean
    fn write_back_variables(&mut self) {
        for (reg, op, dirty) in self.bindings() {
            if dirty && op.is_variable() {
                self.store(reg, &op);
                self.file_mut(reg.class).set_dirty(reg.index as usize, false);
            }
        }
    }

    /// Drop cached locals and globals (after a store through a pointer)
    fn invalidate_variables(&mut self) {
        for (reg, op, _) in self.bindings() {
            if op.is_variable() {
                self.file_mut(reg.class).unbind(reg.index as usize);
            }
        }
    }

    /// Block-end write-back; live temps are spilled unless carried over
    fn flush(&mut self, i: usize, carry: bool) {
        self.write_back_variables();
        if carry {
            return;
        }
        for (reg, op, dirty) in self.bindings() {
            if dirty && op.is_temp() && self.liveness.is_live_after(i, &op) {
                self.store(reg, &op);
                self.spills += 1;
                self.file_mut(reg.class).set_dirty(reg.index as usize, false);
                trace!(operand = %op, register = %reg, "spilled at block end");
            }
        }
    }

    fn end_block(&mut self, i: usize, carry: bool) {
        if carry {
            trace!(index = i, "carrying bindings into fall-through block");
            return;
        }
        self.ints.reset();
        self.floats.reset();
    }
}

#[derive(Debug, Clone, Copy)]
struct Step {
    index: usize,
    opcode: Opcode,
    last: bool,
    carry: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;
    use crate::compiler::interp::{Interpreter, Word};

    fn local(offset: i32) -> Operand {
        Operand::Local {
            offset,
            kind: ValueKind::Int,
        }
    }

    fn t(id: u32) -> Operand {
        Operand::int_temp(id)
    }

    fn function(num_locals: usize, code: Vec<Instruction>) -> FunctionIr {
        FunctionIr {
            name: "main".into(),
            params: vec![],
            ret: Type::Void,
            num_locals,
            code,
        }
    }

    fn render(code: &[Instruction]) -> Vec<String> {
        code.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_register_file_reserves_pinned_registers() {
        let file = RegisterFile::new(RegClass::Int, 10);
        assert_eq!(file.allocatable(), 5);
        assert!(file.get(8).reserved);
        assert_eq!(file.choose(), Some((4, Choice::Free)));

        let floats = RegisterFile::new(RegClass::Float, 4);
        assert_eq!(floats.allocatable(), 4);
        assert_eq!(floats.choose(), Some((0, Choice::Free)));
    }

    #[test]
    fn test_choose_prefers_clean_over_dirty() {
        let mut file = RegisterFile::new(RegClass::Int, 6);
        file.bind(4, t(1), true);
        file.bind(5, t(2), false);
        assert_eq!(file.choose(), Some((5, Choice::Clean)));
        file.set_dirty(5, true);
        assert_eq!(file.choose(), Some((4, Choice::Evict)));
        file.retain(4);
        file.retain(5);
        assert_eq!(file.choose(), None);
    }

    #[test]
    fn test_check_rejects_double_binding() {
        let mut file = RegisterFile::new(RegClass::Int, 6);
        file.bind(4, t(1), false);
        file.bind(5, t(1), false);
        assert!(file.check().is_err());
    }

    #[test]
    fn test_straight_line_reuses_freed_register() {
        // t1 = a + b; t2 = t1 * c; d = t2
        let code = vec![
            Instruction::op3(Opcode::Add, t(1), local(-4), local(-8)),
            Instruction::op3(Opcode::Mul, t(2), t(1), local(-12)),
            Instruction::op2(Opcode::Mv, local(-16), t(2)),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(4, code))
            .unwrap();
        assert_eq!(
            render(&alloc.code),
            vec![
                "LW x4, -4(fp)",
                "LW x5, -8(fp)",
                "ADD x4, x4, x5",
                "LW x5, -12(fp)",
                "MUL x4, x4, x5",
                "SW x4, -16(fp)",
            ]
        );
        assert_eq!(alloc.spills, 0);
        assert_eq!(alloc.used_registers, vec![PhysReg::int(4), PhysReg::int(5)]);
        assert_eq!(alloc.frame_words, 4);
    }

    #[test]
    fn test_global_materialization_uses_scratch_register() {
        let g = Operand::Global {
            name: "count".into(),
            address: 0x2000,
            kind: ValueKind::Int,
        };
        let code = vec![
            Instruction::op3(Opcode::Add, t(1), g.clone(), g.clone()),
            Instruction::op2(Opcode::Mv, g, t(1)),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(0, code))
            .unwrap();
        assert_eq!(
            render(&alloc.code),
            vec![
                "LA x3, 0x2000",
                "LW x4, 0(x3)",
                "ADD x5, x4, x4",
                "MV x4, x5",
                "LA x3, 0x2000",
                "SW x4, 0(x3)",
            ]
        );
    }

    #[test]
    fn test_temp_live_across_call_is_spilled_and_reloaded() {
        let code = vec![
            Instruction::op2(Opcode::Li, t(1), Operand::Imm(5)),
            Instruction::jump(Opcode::Jr, "func_f"),
            Instruction::op2(Opcode::Mv, local(-4), t(1)),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(1, code))
            .unwrap();
        assert_eq!(
            render(&alloc.code),
            vec![
                "LI x4, 5",
                "SW x4, -8(fp)",
                "JR func_f",
                "LW x4, -8(fp)",
                "SW x4, -4(fp)",
            ]
        );
        assert_eq!(alloc.spills, 1);
        assert_eq!(alloc.frame_words, 2);
        assert_eq!(alloc.spill_slots.get(&t(1)), Some(&-8));
    }

    #[test]
    fn test_float_compare_result_carries_into_branch() {
        let x = Operand::Local {
            offset: -4,
            kind: ValueKind::Float,
        };
        let y = Operand::Local {
            offset: -8,
            kind: ValueKind::Float,
        };
        let code = vec![
            Instruction::label("loop_main_1"),
            Instruction::op3(Opcode::Feq, t(1), x, y),
            Instruction::branch(Opcode::Beq, t(1), PhysReg::ZERO.into(), "out_main_1"),
            Instruction::jump(Opcode::J, "loop_main_1"),
            Instruction::label("out_main_1"),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(2, code))
            .unwrap();
        assert_eq!(
            render(&alloc.code),
            vec![
                "loop_main_1:",
                "FLW f0, -4(fp)",
                "FLW f1, -8(fp)",
                "FEQ.S x4, f0, f1",
                "BEQ x4, x0, out_main_1",
                "J loop_main_1",
                "out_main_1:",
            ]
        );
        assert_eq!(alloc.spills, 0);
    }

    #[test]
    fn test_eviction_stores_dirty_live_value() {
        // Two allocatable registers, three simultaneously live temps
        let code = vec![
            Instruction::op2(Opcode::Li, t(1), Operand::Imm(1)),
            Instruction::op2(Opcode::Li, t(2), Operand::Imm(2)),
            Instruction::op2(Opcode::Li, t(3), Operand::Imm(3)),
            Instruction::op3(Opcode::Add, t(4), t(1), t(2)),
            Instruction::op3(Opcode::Add, t(5), t(4), t(3)),
            Instruction::op2(Opcode::Mv, local(-4), t(5)),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(1, code))
            .unwrap();
        assert!(alloc.spills >= 1);
        assert!(alloc.code.iter().all(|i| !i.is_virtual()));
        assert!(alloc.frame_words > 1);
    }

    #[test]
    fn test_undefined_temporary_is_reported() {
        let code = vec![Instruction::op2(Opcode::Mv, local(-4), t(9))];
        let err = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(1, code))
            .unwrap_err();
        assert!(matches!(err, Error::UndefinedTemporary { .. }));
    }

    #[test]
    fn test_store_through_pointer_invalidates_cached_variables() {
        let code = vec![
            Instruction::sink(Opcode::PutI, local(-4)),
            Instruction::addi(t(1), PhysReg::FP, -4),
            Instruction::op2(Opcode::Li, t(2), Operand::Imm(9)),
            Instruction::store(Opcode::Sw, t(2), t(1), 0),
            Instruction::sink(Opcode::PutI, local(-4)),
        ];
        let alloc = RegisterAllocator::new(8, 2, 4)
            .allocate(&function(1, code))
            .unwrap();
        let text = render(&alloc.code);
        // The local is read from memory again after the store
        let reloads = text.iter().filter(|l| l.as_str() == "LW x4, -4(fp)").count();
        assert_eq!(reloads, 2);
        assert_eq!(text.last().map(String::as_str), Some("PUTI x4"));
    }
    #[test]
    fn test_self_move_is_dropped() {
        let f = Operand::Local {
            offset: -4,
            kind: ValueKind::Float,
        };
        let code = vec![
            Instruction::op2(Opcode::FImm, Operand::float_temp(1), Operand::float_imm(2.5)),
            Instruction::op2(Opcode::FMv, f, Operand::float_temp(1)),
        ];
        let alloc = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(1, code))
            .unwrap();
        assert_eq!(render(&alloc.code), vec!["FIMM.S f0, 2.5", "FSW f0, -4(fp)"]);
    }

    #[test]
    fn test_loop_carried_temps_survive_back_edge() {
        // t1 = 0; t2 = 0; loop: a = t1; if t2 >= 3 goto out;
        // t2 += 1; t1 += 10; goto loop; out:
        let code = vec![
            Instruction::op2(Opcode::Li, t(1), Operand::Imm(0)),
            Instruction::op2(Opcode::Li, t(2), Operand::Imm(0)),
            Instruction::label("loop"),
            Instruction::op2(Opcode::Mv, local(-4), t(1)),
            Instruction::op2(Opcode::Li, t(3), Operand::Imm(3)),
            Instruction::branch(Opcode::Bge, t(2), t(3), "out"),
            Instruction::op3(Opcode::Addi, t(2), t(2), Operand::Imm(1)),
            Instruction::op3(Opcode::Addi, t(1), t(1), Operand::Imm(10)),
            Instruction::jump(Opcode::J, "loop"),
            Instruction::label("out"),
        ];

        let mut virtual_run = Interpreter::new(code.clone()).unwrap();
        virtual_run.run().unwrap();
        assert_eq!(virtual_run.frame_slot(-4), Word::Int(30));

        let alloc = RegisterAllocator::new(8, 2, 4)
            .allocate(&function(1, code))
            .unwrap();
        assert!(alloc.code.iter().all(|i| !i.is_virtual()));
        // Both carried temps are written back before the jump
        let text = render(&alloc.code);
        let jump = text.iter().position(|l| l == "J loop").unwrap();
        let stores = text[..jump]
            .iter()
            .rev()
            .take_while(|l| l.starts_with("SW"))
            .count();
        assert_eq!(stores, 2);

        let mut vm = Interpreter::new(alloc.code)
            .unwrap()
            .with_step_limit(1_000);
        vm.run().unwrap();
        assert_eq!(vm.frame_slot(-4), Word::Int(30));
    }
}
