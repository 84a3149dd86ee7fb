//! Stack frame layout and prologue/epilogue synthesis
//!
//! ```text
//!   8 + w*(n-k)(fp)  parameter k of n (k = 0 is the leftmost)
//!          8(fp)     return value slot
//!          4(fp)     caller's return address
//!          0(fp)     caller's frame pointer
//!  -w*(i+1)(fp)      local i, then spill slots
//!                    saved registers (pushed at sp)
//! ```
//!
//! Offsets above assume the default word size `w = 4`. The prologue is
//! generated after register allocation because spilling can grow the local
//! area and because the saved-register list is only known then.

use super::ir::{entry_label, return_label, Instruction, Opcode, PhysReg, RegClass};

/// Frame shape of one compiled function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Function name
    pub name: String,
    /// Local area size in words (locals plus spill slots)
    pub frame_words: usize,
    /// Registers pushed by the prologue, in push order
    pub saved: Vec<PhysReg>,
    /// Bytes per stack word
    pub word: i64,
}

impl FrameLayout {
    /// Layout for `name` with the allocator's results
    pub fn new(name: impl Into<String>, frame_words: usize, saved: Vec<PhysReg>, word: u32) -> Self {
        Self {
            name: name.into(),
            frame_words,
            saved,
            word: i64::from(word),
        }
    }

    /// Frame offset of the return value slot
    pub fn return_slot(&self) -> i64 {
        2 * self.word
    }

    /// Frame offset of parameter `k` (0-based, left to right) of `n`
    pub fn param_offset(&self, k: usize, n: usize) -> i64 {
        2 * self.word + self.word * (n - k) as i64
    }

    /// Frame offset of local slot `i`
    pub fn local_offset(&self, i: usize) -> i64 {
        -self.word * (i as i64 + 1)
    }

    /// Bytes reserved below the saved frame pointer (including its slot)
    pub fn stack_bytes(&self) -> i64 {
        self.word * (1 + self.frame_words as i64 + self.saved.len() as i64)
    }
}

fn store_for(reg: PhysReg) -> Opcode {
    match reg.class {
        RegClass::Int => Opcode::Sw,
        RegClass::Float => Opcode::Fsw,
    }
}

fn load_for(reg: PhysReg) -> Opcode {
    match reg.class {
        RegClass::Int => Opcode::Lw,
        RegClass::Float => Opcode::Flw,
    }
}

/// Function entry: save `fp`, set up the frame, reserve locals, save registers
pub fn prologue(layout: &FrameLayout) -> Vec<Instruction> {
    let w = layout.word;
    let mut code = vec![
        Instruction::label(entry_label(&layout.name)),
        Instruction::store(Opcode::Sw, PhysReg::FP.into(), PhysReg::SP.into(), 0),
        Instruction::op2(Opcode::Mv, PhysReg::FP.into(), PhysReg::SP.into()),
        Instruction::addi(PhysReg::SP, PhysReg::SP, -w),
        Instruction::addi(PhysReg::SP, PhysReg::SP, -w * layout.frame_words as i64),
    ];
    for &reg in &layout.saved {
        code.push(Instruction::store(store_for(reg), reg.into(), PhysReg::SP.into(), 0));
        code.push(Instruction::addi(PhysReg::SP, PhysReg::SP, -w));
    }
    code
}

/// Shared exit path: restore registers in reverse, tear down the frame, return
pub fn epilogue(layout: &FrameLayout) -> Vec<Instruction> {
    let w = layout.word;
    let mut code = vec![Instruction::label(return_label(&layout.name))];
    for &reg in layout.saved.iter().rev() {
        code.push(Instruction::addi(PhysReg::SP, PhysReg::SP, w));
        code.push(Instruction::load(load_for(reg), reg.into(), PhysReg::SP.into(), 0));
    }
    code.push(Instruction::op2(Opcode::Mv, PhysReg::SP.into(), PhysReg::FP.into()));
    code.push(Instruction::load(Opcode::Lw, PhysReg::FP.into(), PhysReg::FP.into(), 0));
    code.push(Instruction::nullary(Opcode::Ret));
    code
}

/// Program entry: establish the first frame, call `main`, stop
pub fn entry_stub() -> Vec<Instruction> {
    vec![
        Instruction::op2(Opcode::Mv, PhysReg::FP.into(), PhysReg::SP.into()),
        Instruction::jump(Opcode::Jr, entry_label("main")),
        Instruction::nullary(Opcode::Halt),
    ]
}

/// Sum of `ADDI sp, sp, k` adjustments in `code`
pub fn net_sp_adjustment(code: &[Instruction]) -> i64 {
    code.iter().filter_map(Instruction::sp_adjustment).sum()
}
