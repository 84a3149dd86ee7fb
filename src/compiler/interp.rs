//! # Reference Interpreter
//!
//! Executes instruction streams directly, both before and after register
//! allocation. Named operands are resolved against the same machine state a
//! physical register would be: locals live at `fp + offset`, globals at their
//! absolute address, and temps in a side environment. Running a block in
//! both forms and comparing memory is how allocation transparency is tested.
//!
//! Memory is a sparse map from byte address to [`Word`]; each store writes
//! one whole word regardless of the configured word size.

use super::ir::{AssemblyProgram, Instruction, Opcode, Operand, PhysReg, ValueKind};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, trace};

/// Initial stack pointer; the stack grows down from here
pub const STACK_TOP: i64 = 0x7fff_0000;

/// First address handed out by `MALLOC`
pub const HEAP_BASE: i64 = 0x1000_0000;

/// Default bound on executed instructions
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// Contents of a register or memory word
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Word {
    /// Integer or address
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Never written
    Undef,
}

impl Word {
    fn as_int(self, pc: usize) -> Result<i64> {
        match self {
            Word::Int(v) => Ok(v),
            Word::Float(_) => Err(Error::interpreter(pc, "expected an int, found a float")),
            Word::Undef => Err(Error::interpreter(pc, "read of an undefined value")),
        }
    }

    fn as_float(self, pc: usize) -> Result<f64> {
        match self {
            Word::Float(v) => Ok(v),
            Word::Int(_) => Err(Error::interpreter(pc, "expected a float, found an int")),
            Word::Undef => Err(Error::interpreter(pc, "read of an undefined value")),
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Int(v) => write!(f, "{}", v),
            Word::Float(v) => write!(f, "{}", v),
            Word::Undef => write!(f, "undef"),
        }
    }
}

/// Executor for virtual and physical [`Instruction`] streams
#[derive(Debug, Clone)]
pub struct Interpreter {
    code: Vec<Instruction>,
    labels: HashMap<String, usize>,
    pc: usize,
    regs: HashMap<PhysReg, Word>,
    temps: HashMap<Operand, Word>,
    memory: HashMap<i64, Word>,
    strings: HashMap<i64, String>,
    input: VecDeque<Word>,
    output: Vec<String>,
    heap_next: i64,
    live_blocks: HashSet<i64>,
    word: i64,
    steps: usize,
    step_limit: usize,
    halted: bool,
}

impl Interpreter {
    /// Interpreter over `code` with `sp` and `fp` at [`STACK_TOP`]
    pub fn new(code: Vec<Instruction>) -> Result<Self> {
        let mut labels = HashMap::new();
        for (i, inst) in code.iter().enumerate() {
            if let Some(name) = inst.label_name() {
                if labels.insert(name.to_string(), i).is_some() {
                    return Err(Error::interpreter(i, format!("duplicate label {}", name)));
                }
            }
        }

        let mut regs = HashMap::new();
        regs.insert(PhysReg::SP, Word::Int(STACK_TOP));
        regs.insert(PhysReg::FP, Word::Int(STACK_TOP));

        Ok(Self {
            code,
            labels,
            pc: 0,
            regs,
            temps: HashMap::new(),
            memory: HashMap::new(),
            strings: HashMap::new(),
            input: VecDeque::new(),
            output: Vec::new(),
            heap_next: HEAP_BASE,
            live_blocks: HashSet::new(),
            word: 4,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            halted: false,
        })
    }

    /// Interpreter over a compiled program's entry stub and functions
    pub fn for_program(program: &AssemblyProgram) -> Result<Self> {
        Self::new(program.instructions().cloned().collect())
    }

    /// Queue values for `GETI`/`GETF`
    pub fn with_input(mut self, input: impl IntoIterator<Item = Word>) -> Self {
        self.input.extend(input);
        self
    }

    /// Register a string constant printed by `PUTS` at `address`
    pub fn with_string(mut self, address: i64, text: impl Into<String>) -> Self {
        self.strings.insert(address, text.into());
        self
    }

    /// Bound the number of executed instructions
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Set the machine word size in bytes
    pub fn with_word_size(mut self, word: u32) -> Self {
        self.word = i64::from(word);
        self
    }

    /// Current value of a register (`x0` always reads zero)
    pub fn reg(&self, reg: PhysReg) -> Word {
        if reg == PhysReg::ZERO {
            return Word::Int(0);
        }
        self.regs.get(&reg).copied().unwrap_or(Word::Undef)
    }

    /// Overwrite a register
    pub fn set_reg(&mut self, reg: PhysReg, value: Word) {
        if reg != PhysReg::ZERO {
            self.regs.insert(reg, value);
        }
    }

    /// Word stored at `address`
    pub fn load(&self, address: i64) -> Word {
        self.memory.get(&address).copied().unwrap_or(Word::Undef)
    }

    /// Write a word to memory
    pub fn store(&mut self, address: i64, value: Word) {
        self.memory.insert(address, value);
    }

    /// Word stored at `offset(fp)`
    pub fn frame_slot(&self, offset: i64) -> Word {
        match self.reg(PhysReg::FP) {
            Word::Int(fp) => self.load(fp + offset),
            _ => Word::Undef,
        }
    }

    /// Lines printed so far
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Instructions executed so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// True once `HALT` executed
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Run until `HALT`, the end of the stream, or a fault
    pub fn run(&mut self) -> Result<()> {
        while !self.halted && self.pc < self.code.len() {
            if self.steps >= self.step_limit {
                return Err(Error::interpreter(
                    self.pc,
                    format!("step limit of {} exceeded", self.step_limit),
                ));
            }
            self.steps += 1;
            self.step()?;
        }
        debug!(steps = self.steps, output = self.output.len(), "interpreter stopped");
        Ok(())
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    fn step(&mut self) -> Result<()> {
        let pc = self.pc;
        let (opcode, dest, src1, src2, offset) = match &self.code[pc] {
            Instruction::Label(_) => {
                self.pc += 1;
                return Ok(());
            }
            Instruction::Op {
                opcode,
                dest,
                src1,
                src2,
                offset,
            } => (*opcode, dest.clone(), src1.clone(), src2.clone(), i64::from(*offset)),
        };
        trace!(pc, instruction = %self.code[pc], "step");

        let dest = dest.as_ref();
        let a = src1.as_ref();
        let b = src2.as_ref();
        let mut next = pc + 1;

        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Addi => {
                let x = self.read(pc, a)?.as_int(pc)?;
                let y = self.read(pc, b)?.as_int(pc)?;
                let v = match opcode {
                    Opcode::Add | Opcode::Addi => x.wrapping_add(y),
                    Opcode::Sub => x.wrapping_sub(y),
                    Opcode::Mul => x.wrapping_mul(y),
                    _ => {
                        if y == 0 {
                            return Err(Error::interpreter(pc, "integer division by zero"));
                        }
                        x.wrapping_div(y)
                    }
                };
                self.write(pc, dest, Word::Int(v))?;
            }
            Opcode::Neg => {
                let x = self.read(pc, a)?.as_int(pc)?;
                self.write(pc, dest, Word::Int(x.wrapping_neg()))?;
            }
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let x = self.read(pc, a)?.as_float(pc)?;
                let y = self.read(pc, b)?.as_float(pc)?;
                let v = match opcode {
                    Opcode::FAdd => x + y,
                    Opcode::FSub => x - y,
                    Opcode::FMul => x * y,
                    _ => x / y,
                };
                self.write(pc, dest, Word::Float(v))?;
            }
            Opcode::FNeg => {
                let x = self.read(pc, a)?.as_float(pc)?;
                self.write(pc, dest, Word::Float(-x))?;
            }

            Opcode::Li | Opcode::FImm | Opcode::La | Opcode::Mv | Opcode::FMv => {
                let v = self.read(pc, a)?;
                self.write(pc, dest, v)?;
            }
            Opcode::ImovF => {
                let x = self.read(pc, a)?.as_int(pc)?;
                self.write(pc, dest, Word::Float(x as f64))?;
            }
            Opcode::FmovI => {
                let x = self.read(pc, a)?.as_float(pc)?;
                self.write(pc, dest, Word::Int(x as i64))?;
            }

            Opcode::Lw | Opcode::Flw => {
                let base = self.read(pc, a)?.as_int(pc)?;
                let v = self.load(base + offset);
                self.write(pc, dest, v)?;
            }
            Opcode::Sw | Opcode::Fsw => {
                let v = self.read(pc, a)?;
                let base = self.read(pc, b)?.as_int(pc)?;
                self.store(base + offset, v);
            }

            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Ble | Opcode::Bgt | Opcode::Bge => {
                let x = self.read(pc, a)?.as_int(pc)?;
                let y = self.read(pc, b)?.as_int(pc)?;
                let taken = match opcode {
                    Opcode::Beq => x == y,
                    Opcode::Bne => x != y,
                    Opcode::Blt => x < y,
                    Opcode::Ble => x <= y,
                    Opcode::Bgt => x > y,
                    _ => x >= y,
                };
                if taken {
                    next = self.target(pc, dest)?;
                }
            }
            Opcode::Feq | Opcode::Flt | Opcode::Fle => {
                let x = self.read(pc, a)?.as_float(pc)?;
                let y = self.read(pc, b)?.as_float(pc)?;
                let holds = match opcode {
                    Opcode::Feq => x == y,
                    Opcode::Flt => x < y,
                    _ => x <= y,
                };
                self.write(pc, dest, Word::Int(i64::from(holds)))?;
            }
            Opcode::J => next = self.target(pc, dest)?,
            Opcode::Jr => {
                self.set_reg(PhysReg::RA, Word::Int(pc as i64 + 1));
                next = self.target(pc, dest)?;
            }
            Opcode::Ret => {
                let ra = self.reg(PhysReg::RA).as_int(pc)?;
                next = usize::try_from(ra)
                    .map_err(|_| Error::interpreter(pc, format!("bad return address {}", ra)))?;
            }
            Opcode::Halt => self.halted = true,

            Opcode::Malloc => {
                let size = self.read(pc, a)?.as_int(pc)?;
                if size < 0 {
                    return Err(Error::interpreter(pc, format!("malloc of {} bytes", size)));
                }
                let address = self.heap_next;
                let words = (size + self.word - 1) / self.word;
                self.heap_next += self.word * words.max(1);
                self.live_blocks.insert(address);
                self.write(pc, dest, Word::Int(address))?;
            }
            Opcode::Free => {
                let address = self.read(pc, a)?.as_int(pc)?;
                if !self.live_blocks.remove(&address) {
                    return Err(Error::interpreter(
                        pc,
                        format!("free of unallocated pointer 0x{:x}", address),
                    ));
                }
            }
            Opcode::GetI | Opcode::GetF => {
                let v = self
                    .input
                    .pop_front()
                    .ok_or_else(|| Error::interpreter(pc, "input exhausted"))?;
                let v = match (opcode, v) {
                    (Opcode::GetI, Word::Float(f)) => Word::Int(f as i64),
                    (Opcode::GetF, Word::Int(i)) => Word::Float(i as f64),
                    (_, v) => v,
                };
                self.write(pc, dest, v)?;
            }
            Opcode::PutI => {
                let v = self.read(pc, a)?.as_int(pc)?;
                self.output.push(v.to_string());
            }
            Opcode::PutF => {
                let v = self.read(pc, a)?.as_float(pc)?;
                self.output.push(v.to_string());
            }
            Opcode::PutS => {
                let address = self.read(pc, a)?.as_int(pc)?;
                let text = self.strings.get(&address).cloned().ok_or_else(|| {
                    Error::interpreter(pc, format!("no string at 0x{:x}", address))
                })?;
                self.output.push(text);
            }
        }

        self.pc = next;
        Ok(())
    }

    fn target(&self, pc: usize, dest: Option<&Operand>) -> Result<usize> {
        let label = dest
            .and_then(Operand::as_label)
            .ok_or_else(|| Error::interpreter(pc, "jump without a label"))?;
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::interpreter(pc, format!("undefined label {}", label)))
    }

    fn frame_address(&self, pc: usize, offset: i32) -> Result<i64> {
        Ok(self.reg(PhysReg::FP).as_int(pc)? + i64::from(offset))
    }

    fn read(&self, pc: usize, operand: Option<&Operand>) -> Result<Word> {
        let operand = operand.ok_or_else(|| Error::interpreter(pc, "missing operand"))?;
        match operand {
            Operand::Reg(reg) => Ok(self.reg(*reg)),
            Operand::Imm(v) => Ok(Word::Int(*v)),
            Operand::FloatImm(bits) => Ok(Word::Float(f64::from_bits(*bits))),
            Operand::Address(address) => Ok(Word::Int(i64::from(*address))),
            Operand::Temp { .. } => Ok(self.temps.get(operand).copied().unwrap_or(Word::Undef)),
            Operand::Local { offset, .. } => Ok(self.load(self.frame_address(pc, *offset)?)),
            Operand::Global {
                address,
                kind: ValueKind::Addr,
                ..
            } => Ok(Word::Int(i64::from(*address))),
            Operand::Global { address, .. } => Ok(self.load(i64::from(*address))),
            Operand::Label(name) => Err(Error::interpreter(
                pc,
                format!("label {} used as a value", name),
            )),
        }
    }

    fn write(&mut self, pc: usize, operand: Option<&Operand>, value: Word) -> Result<()> {
        let operand = operand.ok_or_else(|| Error::interpreter(pc, "missing destination"))?;
        match operand {
            Operand::Reg(reg) => self.set_reg(*reg, value),
            Operand::Temp { .. } => {
                self.temps.insert(operand.clone(), value);
            }
            Operand::Local { offset, .. } => {
                let address = self.frame_address(pc, *offset)?;
                self.store(address, value);
            }
            Operand::Global {
                kind: ValueKind::Addr,
                name,
                ..
            } => {
                return Err(Error::interpreter(
                    pc,
                    format!("write to string constant {}", name),
                ))
            }
            Operand::Global { address, .. } => self.store(i64::from(*address), value),
            other => {
                return Err(Error::interpreter(
                    pc,
                    format!("{} is not writable", other),
                ))
            }
        }
        Ok(())
    }
}
