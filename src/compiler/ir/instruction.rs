//! Instruction and operand definitions
//!
//! One [`Instruction`] type serves both stages of the pipeline. Lowering emits
//! three-address code whose operands are *named* (temps, locals, globals);
//! the register allocator rewrites every named operand into a [`PhysReg`].
//! An instruction with no named operand is physical.

use crate::ast::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// REGISTERS
// =============================================================================

/// Register file an operand lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegClass {
    /// General-purpose integer registers `x0..xN`
    Int,
    /// Floating-point registers `f0..fN`
    Float,
}

/// Physical machine register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysReg {
    /// Register file
    pub class: RegClass,
    /// Index within the file
    pub index: u8,
}

impl PhysReg {
    /// Hard-wired zero
    pub const ZERO: PhysReg = PhysReg::int(0);
    /// Return address
    pub const RA: PhysReg = PhysReg::int(1);
    /// Stack pointer
    pub const SP: PhysReg = PhysReg::int(2);
    /// Scratch register for global address materialization
    pub const ADDR: PhysReg = PhysReg::int(3);
    /// Frame pointer
    pub const FP: PhysReg = PhysReg::int(8);

    /// Integer register `x<index>`
    pub const fn int(index: u8) -> Self {
        Self {
            class: RegClass::Int,
            index,
        }
    }

    /// Float register `f<index>`
    pub const fn float(index: u8) -> Self {
        Self {
            class: RegClass::Float,
            index,
        }
    }

    /// True for registers the allocator never hands out
    pub fn is_reserved(&self) -> bool {
        self.class == RegClass::Int && matches!(self.index, 0 | 1 | 2 | 3 | 8)
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class, self.index) {
            (RegClass::Int, 1) => write!(f, "ra"),
            (RegClass::Int, 2) => write!(f, "sp"),
            (RegClass::Int, 8) => write!(f, "fp"),
            (RegClass::Int, n) => write!(f, "x{}", n),
            (RegClass::Float, n) => write!(f, "f{}", n),
        }
    }
}

// =============================================================================
// OPERANDS
// =============================================================================

/// How a named variable is materialized into a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Int or pointer: loaded with `LW`
    Int,
    /// Float: loaded with `FLW`
    Float,
    /// String constant: the register holds the symbol's address (`LA`)
    Addr,
}

impl ValueKind {
    /// Kind used to hold a value of static type `ty`
    pub fn from_type(ty: &Type) -> Self {
        match ty {
            Type::Float => ValueKind::Float,
            Type::Str => ValueKind::Addr,
            Type::Int | Type::Void | Type::Ptr(_) => ValueKind::Int,
        }
    }

    /// Register file holding this kind
    pub fn reg_class(self) -> RegClass {
        match self {
            ValueKind::Float => RegClass::Float,
            ValueKind::Int | ValueKind::Addr => RegClass::Int,
        }
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Virtual temporary (`$t<id>` or `$f<id>`)
    Temp {
        /// Per-function sequence number
        id: u32,
        /// Register file
        class: RegClass,
    },
    /// Frame-relative variable (`$l<offset>`)
    Local {
        /// Offset from the frame pointer
        offset: i32,
        /// Materialization kind
        kind: ValueKind,
    },
    /// Global variable (`$g<name>`)
    Global {
        /// Symbol name
        name: String,
        /// Absolute address
        address: i32,
        /// Materialization kind
        kind: ValueKind,
    },
    /// Physical register
    Reg(PhysReg),
    /// Integer immediate
    Imm(i64),
    /// Float immediate (IEEE-754 bits of an `f64`)
    FloatImm(u64),
    /// Absolute data address
    Address(u32),
    /// Code label
    Label(String),
}

impl Operand {
    /// Integer temp
    pub fn int_temp(id: u32) -> Self {
        Operand::Temp {
            id,
            class: RegClass::Int,
        }
    }

    /// Float temp
    pub fn float_temp(id: u32) -> Self {
        Operand::Temp {
            id,
            class: RegClass::Float,
        }
    }

    /// Float immediate from a value
    pub fn float_imm(value: f64) -> Self {
        Operand::FloatImm(value.to_bits())
    }

    /// Label operand
    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    /// True for operands tracked by liveness and rewritten by the allocator
    pub fn is_named(&self) -> bool {
        matches!(
            self,
            Operand::Temp { .. } | Operand::Local { .. } | Operand::Global { .. }
        )
    }

    /// True for virtual temporaries
    pub fn is_temp(&self) -> bool {
        matches!(self, Operand::Temp { .. })
    }

    /// True for locals and globals (variables with a home in memory)
    pub fn is_variable(&self) -> bool {
        matches!(self, Operand::Local { .. } | Operand::Global { .. })
    }

    /// Register file for register-like operands
    pub fn reg_class(&self) -> Option<RegClass> {
        match self {
            Operand::Temp { class, .. } => Some(*class),
            Operand::Local { kind, .. } | Operand::Global { kind, .. } => Some(kind.reg_class()),
            Operand::Reg(reg) => Some(reg.class),
            _ => None,
        }
    }

    /// Physical register, if this operand is one
    pub fn as_reg(&self) -> Option<PhysReg> {
        match self {
            Operand::Reg(reg) => Some(*reg),
            _ => None,
        }
    }

    /// Label name, if this operand is one
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Operand::Label(name) => Some(name),
            _ => None,
        }
    }
}

impl From<PhysReg> for Operand {
    fn from(reg: PhysReg) -> Self {
        Operand::Reg(reg)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp {
                id,
                class: RegClass::Int,
            } => write!(f, "$t{}", id),
            Operand::Temp {
                id,
                class: RegClass::Float,
            } => write!(f, "$f{}", id),
            Operand::Local { offset, .. } => write!(f, "$l{}", offset),
            Operand::Global { name, .. } => write!(f, "$g{}", name),
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::FloatImm(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Operand::Address(addr) => write!(f, "0x{:x}", addr),
            Operand::Label(name) => write!(f, "{}", name),
        }
    }
}

// =============================================================================
// OPCODES
// =============================================================================

/// Machine opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Integer arithmetic
    /// `dest = src1 + src2`
    Add,
    /// `dest = src1 - src2`
    Sub,
    /// `dest = src1 * src2`
    Mul,
    /// `dest = src1 / src2`
    Div,
    /// `dest = src1 + imm`
    Addi,
    /// `dest = -src1`
    Neg,

    // Float arithmetic
    /// `dest = src1 + src2` (float)
    FAdd,
    /// `dest = src1 - src2` (float)
    FSub,
    /// `dest = src1 * src2` (float)
    FMul,
    /// `dest = src1 / src2` (float)
    FDiv,
    /// `dest = -src1` (float)
    FNeg,

    // Constants and moves
    /// Load integer immediate
    Li,
    /// Load float immediate
    FImm,
    /// Load absolute address
    La,
    /// Integer register copy
    Mv,
    /// Float register copy
    FMv,
    /// Int to float conversion
    ImovF,
    /// Float to int conversion
    FmovI,

    // Memory
    /// `dest = mem[src1 + offset]`
    Lw,
    /// `dest = mem[src1 + offset]` (float)
    Flw,
    /// `mem[src2 + offset] = src1`
    Sw,
    /// `mem[src2 + offset] = src1` (float)
    Fsw,

    // Control flow
    /// Branch if `src1 == src2`
    Beq,
    /// Branch if `src1 != src2`
    Bne,
    /// Branch if `src1 < src2`
    Blt,
    /// Branch if `src1 <= src2`
    Ble,
    /// Branch if `src1 > src2`
    Bgt,
    /// Branch if `src1 >= src2`
    Bge,
    /// `dest = (src1 == src2)` on floats
    Feq,
    /// `dest = (src1 < src2)` on floats
    Flt,
    /// `dest = (src1 <= src2)` on floats
    Fle,
    /// Unconditional jump
    J,
    /// Jump and link (`ra` = return point)
    Jr,
    /// Jump to `ra`
    Ret,
    /// Stop the machine
    Halt,

    // Runtime services
    /// `dest = malloc(src1)`
    Malloc,
    /// `free(src1)`
    Free,
    /// Read an int into `dest`
    GetI,
    /// Read a float into `dest`
    GetF,
    /// Print the int in `src1`
    PutI,
    /// Print the float in `src1`
    PutF,
    /// Print the string at the address in `src1`
    PutS,
}

impl Opcode {
    /// Assembly mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Addi => "ADDI",
            Opcode::Neg => "NEG",
            Opcode::FAdd => "FADD.S",
            Opcode::FSub => "FSUB.S",
            Opcode::FMul => "FMUL.S",
            Opcode::FDiv => "FDIV.S",
            Opcode::FNeg => "FNEG.S",
            Opcode::Li => "LI",
            Opcode::FImm => "FIMM.S",
            Opcode::La => "LA",
            Opcode::Mv => "MV",
            Opcode::FMv => "FMV.S",
            Opcode::ImovF => "IMOVF.S",
            Opcode::FmovI => "FMOVI.S",
            Opcode::Lw => "LW",
            Opcode::Flw => "FLW",
            Opcode::Sw => "SW",
            Opcode::Fsw => "FSW",
            Opcode::Beq => "BEQ",
            Opcode::Bne => "BNE",
            Opcode::Blt => "BLT",
            Opcode::Ble => "BLE",
            Opcode::Bgt => "BGT",
            Opcode::Bge => "BGE",
            Opcode::Feq => "FEQ.S",
            Opcode::Flt => "FLT.S",
            Opcode::Fle => "FLE.S",
            Opcode::J => "J",
            Opcode::Jr => "JR",
            Opcode::Ret => "RET",
            Opcode::Halt => "HALT",
            Opcode::Malloc => "MALLOC",
            Opcode::Free => "FREE",
            Opcode::GetI => "GETI",
            Opcode::GetF => "GETF",
            Opcode::PutI => "PUTI",
            Opcode::PutF => "PUTF",
            Opcode::PutS => "PUTS",
        }
    }

    /// Conditional branches
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Ble | Opcode::Bgt | Opcode::Bge
        )
    }

    /// Float compares that feed a branch
    pub fn is_float_compare(self) -> bool {
        matches!(self, Opcode::Feq | Opcode::Flt | Opcode::Fle)
    }

    /// Instructions after which a new basic block starts
    pub fn ends_block(self) -> bool {
        self.is_branch()
            || self.is_float_compare()
            || matches!(self, Opcode::J | Opcode::Jr | Opcode::Ret | Opcode::Halt)
    }

    /// Loads from memory
    pub fn is_load(self) -> bool {
        matches!(self, Opcode::Lw | Opcode::Flw)
    }

    /// Stores to memory
    pub fn is_store(self) -> bool {
        matches!(self, Opcode::Sw | Opcode::Fsw)
    }

    /// True when the `dest` slot is written (rather than a label or unused)
    pub fn writes_dest(self) -> bool {
        !(self.is_branch()
            || self.is_store()
            || matches!(
                self,
                Opcode::J
                    | Opcode::Jr
                    | Opcode::Ret
                    | Opcode::Halt
                    | Opcode::Free
                    | Opcode::PutI
                    | Opcode::PutF
                    | Opcode::PutS
            ))
    }

    /// Integer branch that tests `op`
    pub fn branch_for(op: crate::ast::CmpOp) -> Self {
        use crate::ast::CmpOp;
        match op {
            CmpOp::Eq => Opcode::Beq,
            CmpOp::Ne => Opcode::Bne,
            CmpOp::Lt => Opcode::Blt,
            CmpOp::Le => Opcode::Ble,
            CmpOp::Gt => Opcode::Bgt,
            CmpOp::Ge => Opcode::Bge,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// INSTRUCTIONS
// =============================================================================

/// A label or an operation with up to three operand slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Jump target
    Label(String),
    /// Machine operation
    Op {
        /// Opcode
        opcode: Opcode,
        /// Destination slot (branch/jump target label for control flow)
        dest: Option<Operand>,
        /// First source (stored value for stores, base for loads)
        src1: Option<Operand>,
        /// Second source (base for stores)
        src2: Option<Operand>,
        /// Memory offset for loads and stores
        offset: i32,
    },
}

impl Instruction {
    /// Label marker
    pub fn label(name: impl Into<String>) -> Self {
        Instruction::Label(name.into())
    }

    /// `OP dest, src1, src2`
    pub fn op3(opcode: Opcode, dest: Operand, src1: Operand, src2: Operand) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(dest),
            src1: Some(src1),
            src2: Some(src2),
            offset: 0,
        }
    }

    /// `OP dest, src1`
    pub fn op2(opcode: Opcode, dest: Operand, src1: Operand) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(dest),
            src1: Some(src1),
            src2: None,
            offset: 0,
        }
    }

    /// `ADDI dest, src, imm`
    pub fn addi(dest: impl Into<Operand>, src: impl Into<Operand>, imm: i64) -> Self {
        Self::op3(Opcode::Addi, dest.into(), src.into(), Operand::Imm(imm))
    }

    /// `LW/FLW dest, offset(base)`
    pub fn load(opcode: Opcode, dest: Operand, base: Operand, offset: i32) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(dest),
            src1: Some(base),
            src2: None,
            offset,
        }
    }

    /// `SW/FSW value, offset(base)`
    pub fn store(opcode: Opcode, value: Operand, base: Operand, offset: i32) -> Self {
        Instruction::Op {
            opcode,
            dest: None,
            src1: Some(value),
            src2: Some(base),
            offset,
        }
    }

    /// Conditional branch `OP a, b, target`
    pub fn branch(opcode: Opcode, a: Operand, b: Operand, target: impl Into<String>) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(Operand::Label(target.into())),
            src1: Some(a),
            src2: Some(b),
            offset: 0,
        }
    }

    /// `J target` or `JR target`
    pub fn jump(opcode: Opcode, target: impl Into<String>) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(Operand::Label(target.into())),
            src1: None,
            src2: None,
            offset: 0,
        }
    }

    /// Single-operand instruction writing `dest` (`GETI`)
    pub fn source(opcode: Opcode, dest: Operand) -> Self {
        Instruction::Op {
            opcode,
            dest: Some(dest),
            src1: None,
            src2: None,
            offset: 0,
        }
    }

    /// Single-operand instruction reading `src` (`PUTI`, `FREE`)
    pub fn sink(opcode: Opcode, src: Operand) -> Self {
        Instruction::Op {
            opcode,
            dest: None,
            src1: Some(src),
            src2: None,
            offset: 0,
        }
    }

    /// Operand-less instruction (`RET`, `HALT`)
    pub fn nullary(opcode: Opcode) -> Self {
        Instruction::Op {
            opcode,
            dest: None,
            src1: None,
            src2: None,
            offset: 0,
        }
    }

    /// Opcode, or `None` for labels
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instruction::Label(_) => None,
            Instruction::Op { opcode, .. } => Some(*opcode),
        }
    }

    /// Label name if this is a label marker
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Instruction::Label(name) => Some(name),
            Instruction::Op { .. } => None,
        }
    }

    /// True for label markers
    pub fn is_label(&self) -> bool {
        matches!(self, Instruction::Label(_))
    }

    /// Target label of a branch or jump
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            Instruction::Op {
                opcode,
                dest: Some(Operand::Label(target)),
                ..
            } if opcode.is_branch() || matches!(opcode, Opcode::J | Opcode::Jr) => Some(target),
            _ => None,
        }
    }

    /// Source operands, in slot order
    pub fn sources(&self) -> impl Iterator<Item = &Operand> {
        let (a, b) = match self {
            Instruction::Op { src1, src2, .. } => (src1.as_ref(), src2.as_ref()),
            Instruction::Label(_) => (None, None),
        };
        a.into_iter().chain(b)
    }

    /// Operand written by this instruction
    pub fn defined(&self) -> Option<&Operand> {
        match self {
            Instruction::Op {
                opcode,
                dest: Some(dest),
                ..
            } if opcode.writes_dest() => Some(dest),
            _ => None,
        }
    }

    /// Named operands read by this instruction
    pub fn uses(&self) -> impl Iterator<Item = &Operand> {
        self.sources().filter(|op| op.is_named())
    }

    /// Named operand written by this instruction
    pub fn defs(&self) -> Option<&Operand> {
        self.defined().filter(|op| op.is_named())
    }

    /// Every operand in dest, src1, src2 order
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        let (d, a, b) = match self {
            Instruction::Op {
                dest, src1, src2, ..
            } => (dest.as_ref(), src1.as_ref(), src2.as_ref()),
            Instruction::Label(_) => (None, None, None),
        };
        d.into_iter().chain(a).chain(b)
    }

    /// True if any operand is still virtual (three-address form)
    pub fn is_virtual(&self) -> bool {
        self.operands().any(Operand::is_named)
    }

    /// Net stack-pointer adjustment made by this instruction (`ADDI sp, sp, k`)
    pub fn sp_adjustment(&self) -> Option<i64> {
        match self {
            Instruction::Op {
                opcode: Opcode::Addi,
                dest: Some(Operand::Reg(PhysReg::SP)),
                src1: Some(Operand::Reg(PhysReg::SP)),
                src2: Some(Operand::Imm(k)),
                ..
            } => Some(*k),
            _ => None,
        }
    }
}

fn slot(op: &Option<Operand>) -> String {
    op.as_ref().map(|o| o.to_string()).unwrap_or_default()
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (opcode, dest, src1, src2, offset) = match self {
            Instruction::Label(name) => return write!(f, "{}:", name),
            Instruction::Op {
                opcode,
                dest,
                src1,
                src2,
                offset,
            } => (*opcode, dest, src1, src2, *offset),
        };

        let m = opcode.mnemonic();
        if opcode.is_load() {
            return write!(f, "{} {}, {}({})", m, slot(dest), offset, slot(src1));
        }
        if opcode.is_store() {
            return write!(f, "{} {}, {}({})", m, slot(src1), offset, slot(src2));
        }
        if opcode.is_branch() {
            return write!(f, "{} {}, {}, {}", m, slot(src1), slot(src2), slot(dest));
        }

        let parts: Vec<String> = [dest, src1, src2]
            .into_iter()
            .filter_map(|o| o.as_ref().map(|o| o.to_string()))
            .collect();
        if parts.is_empty() {
            write!(f, "{}", m)
        } else {
            write!(f, "{} {}", m, parts.join(", "))
        }
    }
}
