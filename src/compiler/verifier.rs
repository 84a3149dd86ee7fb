//! # Output Verifier
//!
//! Validates allocated functions before they are handed to an assembler:
//! no virtual operand survives allocation, every register exists in the
//! configured files, jumps land on defined labels, call sequences leave the
//! stack pointer where they found it, and the epilogue undoes the prologue.

use super::frame::net_sp_adjustment;
use super::ir::{
    entry_label, return_label, AssemblyFunction, AssemblyProgram, Instruction, Opcode, Operand,
    PhysReg, RegClass,
};
use crate::{Error, Result};
use std::collections::HashSet;

/// Verification result with warnings
#[derive(Debug)]
pub struct VerifyResult {
    /// Output is valid
    pub valid: bool,
    /// Violations
    pub errors: Vec<VerifyError>,
    /// Non-fatal observations
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: FunctionStats,
}

impl VerifyResult {
    /// Convert into `Err(Error::Verification)` naming the first violation
    pub fn into_result(self, function: &str) -> Result<FunctionStats> {
        match self.errors.first() {
            Some(err) => Err(Error::Verification {
                function: function.to_string(),
                message: err.to_string(),
            }),
            None if !self.valid => Err(Error::Verification {
                function: function.to_string(),
                message: self.warnings.join("; "),
            }),
            None => Ok(self.stats),
        }
    }
}

/// Per-function statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FunctionStats {
    /// Total instruction count (labels included)
    pub instruction_count: usize,
    /// Number of `JR` calls
    pub call_count: usize,
    /// Registers saved by the prologue
    pub saved_registers: usize,
    /// Spill stores inserted by the allocator
    pub spills: usize,
}

/// Verification error types
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// A named operand survived allocation
    VirtualOperand {
        /// Instruction index
        index: usize,
        /// Rendered instruction
        instruction: String,
    },

    /// Register number outside the configured file
    RegisterOutOfRange {
        /// Instruction index
        index: usize,
        /// Rendered register
        reg: String,
    },

    /// Branch or jump to a label the function does not define
    UndefinedLabel {
        /// Instruction index
        index: usize,
        /// Missing label
        label: String,
    },

    /// Function does not start with its entry label
    MissingEntry,

    /// Function has no shared epilogue
    MissingEpilogue,

    /// The body's stack adjustments do not cancel out
    UnbalancedStack {
        /// Net adjustment in bytes
        net: i64,
    },

    /// Epilogue does not restore the prologue's saved registers in reverse
    FrameAsymmetry {
        /// Registers pushed, in order
        pushed: Vec<String>,
        /// Registers popped, in order
        popped: Vec<String>,
    },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::VirtualOperand { index, instruction } => {
                write!(f, "Virtual operand at #{}: {}", index, instruction)
            }
            VerifyError::RegisterOutOfRange { index, reg } => {
                write!(f, "Register {} at #{} is outside the register file", reg, index)
            }
            VerifyError::UndefinedLabel { index, label } => {
                write!(f, "Jump at #{} targets undefined label {}", index, label)
            }
            VerifyError::MissingEntry => write!(f, "Function has no entry label"),
            VerifyError::MissingEpilogue => write!(f, "Function has no epilogue"),
            VerifyError::UnbalancedStack { net } => {
                write!(f, "Body leaves the stack pointer moved by {} bytes", net)
            }
            VerifyError::FrameAsymmetry { pushed, popped } => write!(
                f,
                "Epilogue restores [{}] but prologue saved [{}]",
                popped.join(", "),
                pushed.join(", ")
            ),
        }
    }
}

/// Allocated-output verifier
#[derive(Debug, Clone)]
pub struct Verifier {
    int_registers: usize,
    float_registers: usize,
    word: i64,
    strict: bool,
}

impl Verifier {
    /// Verifier for the given register file sizes
    pub fn new(int_registers: usize, float_registers: usize) -> Self {
        Self {
            int_registers,
            float_registers,
            word: 4,
            strict: false,
        }
    }

    /// Set the stack word size in bytes
    pub fn word_size(mut self, word: u32) -> Self {
        self.word = i64::from(word);
        self
    }

    /// Enable strict mode (warnings fail verification)
    ///
    /// Spill stores are the only warning, so a strict verifier rejects any
    /// function the allocator had to spill.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Verify one allocated function
    pub fn verify(&self, function: &AssemblyFunction) -> VerifyResult {
        let code = &function.instructions;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let stats = FunctionStats {
            instruction_count: code.len(),
            call_count: code
                .iter()
                .filter(|i| i.opcode() == Some(Opcode::Jr))
                .count(),
            saved_registers: function.saved_registers.len(),
            spills: function.spills,
        };

        let labels: HashSet<&str> = code.iter().filter_map(Instruction::label_name).collect();

        for (index, inst) in code.iter().enumerate() {
            if inst.is_virtual() {
                errors.push(VerifyError::VirtualOperand {
                    index,
                    instruction: inst.to_string(),
                });
            }
            for op in inst.operands() {
                if let Operand::Reg(reg) = op {
                    let limit = match reg.class {
                        RegClass::Int => self.int_registers,
                        RegClass::Float => self.float_registers,
                    };
                    if usize::from(reg.index) >= limit && !reg.is_reserved() {
                        errors.push(VerifyError::RegisterOutOfRange {
                            index,
                            reg: reg.to_string(),
                        });
                    }
                }
            }
            // Calls leave the function; their targets are checked program-wide
            if inst.opcode() != Some(Opcode::Jr) {
                if let Some(target) = inst.jump_target() {
                    if !labels.contains(target) {
                        errors.push(VerifyError::UndefinedLabel {
                            index,
                            label: target.to_string(),
                        });
                    }
                }
            }
        }

        let entry = entry_label(&function.name);
        if code.first().and_then(Instruction::label_name) != Some(entry.as_str()) {
            errors.push(VerifyError::MissingEntry);
        }

        let ret = return_label(&function.name);
        match code
            .iter()
            .position(|i| i.label_name() == Some(ret.as_str()))
        {
            None => errors.push(VerifyError::MissingEpilogue),
            Some(epilogue_start) => {
                let saved = function.saved_registers.len();
                let body_start = (5 + 2 * saved).min(epilogue_start);
                let prologue = &code[..body_start];
                let body = &code[body_start..epilogue_start];
                let epilogue = &code[epilogue_start..];

                let net = net_sp_adjustment(body);
                if net != 0 {
                    errors.push(VerifyError::UnbalancedStack { net });
                }

                let pushed = saved_by(prologue, |op| op.is_store());
                let popped = saved_by(epilogue, |op| op.is_load());
                let restored_in_reverse = pushed.iter().eq(popped.iter().rev());

                // The prologue also reserves the fp slot and the local area,
                // which `MV sp, fp` releases in one step
                let frame_bytes = self.word * (1 + function.frame_words as i64);
                let pushes = -net_sp_adjustment(prologue) - frame_bytes;
                let pops = net_sp_adjustment(epilogue);
                if !restored_in_reverse || pushes != pops {
                    errors.push(VerifyError::FrameAsymmetry { pushed, popped });
                }
            }
        }

        if stats.spills > 0 {
            warnings.push(format!(
                "{} spill stores in {}",
                stats.spills, function.name
            ));
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());
        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }

    /// Verify every function plus the call targets between them
    pub fn verify_program(&self, program: &AssemblyProgram) -> Vec<(String, VerifyResult)> {
        let defined: HashSet<String> = program
            .functions
            .iter()
            .map(|f| entry_label(&f.name))
            .collect();

        program
            .functions
            .iter()
            .map(|function| {
                let mut result = self.verify(function);
                for (index, inst) in function.instructions.iter().enumerate() {
                    if inst.opcode() == Some(Opcode::Jr) {
                        if let Some(target) = inst.jump_target() {
                            if !defined.contains(target) {
                                result.errors.push(VerifyError::UndefinedLabel {
                                    index,
                                    label: target.to_string(),
                                });
                                result.valid = false;
                            }
                        }
                    }
                }
                (function.name.clone(), result)
            })
            .collect()
    }
}

/// Registers saved to or restored from `0(sp)`, excluding the frame pointer
fn saved_by(code: &[Instruction], pick: impl Fn(Opcode) -> bool) -> Vec<String> {
    code.iter()
        .filter_map(|inst| match inst {
            Instruction::Op {
                opcode,
                dest,
                src1,
                src2,
                ..
            } if pick(*opcode) => {
                let (reg, base) = if opcode.is_store() {
                    (src1, src2)
                } else {
                    (dest, src1)
                };
                match (reg, base) {
                    (Some(Operand::Reg(reg)), Some(Operand::Reg(base)))
                        if *base == PhysReg::SP && *reg != PhysReg::FP =>
                    {
                        Some(reg.to_string())
                    }
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}
