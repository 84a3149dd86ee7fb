//! # rvlower Compiler - typed AST to register-allocated assembly
//!
//! This module turns a typed, symbol-resolved [`Program`] into RISC-V-style
//! assembly for a machine with a configurable number of integer and float
//! registers.
//!
//! ## Architecture
//!
//! ```text
//! AST → 3AC (ir) → Basic Blocks → Liveness → Register Allocation → Frame → Verify
//! ```
//!
//! Every stage after the AST works on one function at a time and keeps all
//! of its mutable state local to that function, so functions are compiled
//! in parallel on a rayon pool and reassembled in source order.
//!
//! ## Usage
//!
//! ```ignore
//! use rvlower::compiler::{Compiler, CompileOptions};
//!
//! let program = rvlower::ast::Program::from_json(&json)?;
//! let compiler = Compiler::new(CompileOptions::default())?;
//! let result = compiler.compile(&program)?;
//! print!("{}", result.program);
//! ```

pub mod blocks;
pub mod frame;
pub mod interp;
pub mod ir;
pub mod liveness;
pub mod regalloc;
pub mod verifier;

pub use blocks::{partition, BasicBlock};
pub use frame::{entry_stub, epilogue, prologue, FrameLayout};
pub use interp::{Interpreter, Word};
pub use ir::{
    AssemblyFunction, AssemblyProgram, FunctionIr, Instruction, IrGenerator, Opcode, Operand,
    PhysReg, RegClass,
};
pub use liveness::{analyze, LivenessTable};
pub use regalloc::{Allocation, RegisterAllocator, RegisterDescriptor, RegisterFile};
pub use verifier::{FunctionStats, Verifier, VerifyError, VerifyResult};

use crate::ast::{Function, Program};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Largest register file addressable by an 8-bit register number
pub const MAX_REGISTERS: usize = 256;

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Integer register file size, reserved registers included
    pub int_registers: usize,
    /// Float register file size
    pub float_registers: usize,
    /// Bytes per stack word
    pub word_size: u32,
    /// Compile functions concurrently
    pub parallel: bool,
    /// Worker threads for parallel compilation (default: num_cpus)
    pub jobs: usize,
    /// Run the output verifier on every function
    pub verify: bool,
    /// Treat verifier warnings as errors
    ///
    /// The verifier warns when a function stores spilled values, so strict
    /// mode rejects any function that does not fit in the register file.
    pub strict: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            int_registers: 32,
            float_registers: 32,
            word_size: 4,
            parallel: true,
            jobs: num_cpus::get(),
            verify: true,
            strict: false,
        }
    }
}

impl CompileOptions {
    /// Options for a machine with the given register file sizes
    pub fn with_registers(int_registers: usize, float_registers: usize) -> Self {
        Self {
            int_registers,
            float_registers,
            ..Self::default()
        }
    }

    /// Reject option combinations the allocator cannot work with
    ///
    /// An instruction may need two source registers at once, so each file
    /// must leave at least two registers after the reserved ones.
    pub fn validate(&self) -> Result<()> {
        for (class, count) in [
            (RegClass::Int, self.int_registers),
            (RegClass::Float, self.float_registers),
        ] {
            if count > MAX_REGISTERS {
                return Err(Error::InvalidOptions(format!(
                    "{:?} register file of {} exceeds {}",
                    class, count, MAX_REGISTERS
                )));
            }
            let allocatable = RegisterFile::new(class, count).allocatable();
            if allocatable < 2 {
                return Err(Error::InvalidOptions(format!(
                    "{:?} register file of {} leaves {} allocatable registers, need at least 2",
                    class, count, allocatable
                )));
            }
        }
        if !self.word_size.is_power_of_two() {
            return Err(Error::InvalidOptions(format!(
                "word size {} is not a power of two",
                self.word_size
            )));
        }
        if self.jobs == 0 {
            return Err(Error::InvalidOptions("jobs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Entry stub plus allocated functions
    pub program: AssemblyProgram,
    /// Three-address code of each function, before allocation
    pub ir: Vec<FunctionIr>,
    /// Verifier statistics per function (empty when verification is off)
    pub stats: Vec<(String, FunctionStats)>,
    /// Non-fatal verifier observations
    pub warnings: Vec<String>,
}

impl CompileResult {
    /// Assembly text, one instruction per line
    pub fn assembly(&self) -> String {
        self.program.to_string()
    }

    /// Number of emitted instructions, labels included
    pub fn instruction_count(&self) -> usize {
        self.program.instructions().count()
    }

    /// Total spill stores across all functions
    pub fn spills(&self) -> usize {
        self.program.functions.iter().map(|f| f.spills).sum()
    }
}

/// Typed AST to assembly compiler
#[derive(Debug, Clone)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a compiler, validating the options
    pub fn new(options: CompileOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    /// Options in effect
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Parse a JSON program and compile it
    pub fn compile_json(&self, source: &str) -> Result<CompileResult> {
        let program = Program::from_json(source)?;
        self.compile(&program)
    }

    /// Lower every function to three-address code without allocating
    pub fn lower(&self, program: &Program) -> Result<Vec<FunctionIr>> {
        IrGenerator::new(program, self.options.word_size).generate(program)
    }

    /// Compile a whole translation unit
    ///
    /// Any error aborts the unit; no partial program is returned.
    pub fn compile(&self, program: &Program) -> Result<CompileResult> {
        let generator = IrGenerator::new(program, self.options.word_size);
        let allocator = RegisterAllocator::new(
            self.options.int_registers,
            self.options.float_registers,
            self.options.word_size,
        );
        let compile_one = |f: &Function| self.compile_function(&generator, &allocator, f);

        let compiled: Vec<(FunctionIr, AssemblyFunction)> =
            if self.options.parallel && program.functions.len() > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.jobs.min(program.functions.len()))
                    .build()
                    .map_err(|e| Error::compiler(format!("Failed to create thread pool: {}", e)))?;
                pool.install(|| {
                    program
                        .functions
                        .par_iter()
                        .map(compile_one)
                        .collect::<Result<Vec<_>>>()
                })?
            } else {
                program
                    .functions
                    .iter()
                    .map(compile_one)
                    .collect::<Result<Vec<_>>>()?
            };

        let (ir, functions): (Vec<_>, Vec<_>) = compiled.into_iter().unzip();
        let assembly = AssemblyProgram {
            entry: entry_stub(),
            functions,
        };

        let mut stats = Vec::new();
        let mut warnings = Vec::new();
        if self.options.verify {
            let mut verifier = Verifier::new(self.options.int_registers, self.options.float_registers)
                .word_size(self.options.word_size);
            if self.options.strict {
                verifier = verifier.strict();
            }
            for (name, result) in verifier.verify_program(&assembly) {
                for w in &result.warnings {
                    warn!(function = %name, "{}", w);
                }
                warnings.extend(result.warnings.iter().cloned());
                stats.push((name.clone(), result.into_result(&name)?));
            }
        }

        info!(
            functions = assembly.functions.len(),
            instructions = assembly.instructions().count(),
            parallel = self.options.parallel,
            "compiled program"
        );

        Ok(CompileResult {
            program: assembly,
            ir,
            stats,
            warnings,
        })
    }

    /// Lower, allocate and frame one function
    fn compile_function(
        &self,
        generator: &IrGenerator,
        allocator: &RegisterAllocator,
        function: &Function,
    ) -> Result<(FunctionIr, AssemblyFunction)> {
        let ir = generator.lower_function(function)?;
        let allocation = allocator.allocate(&ir)?;

        let layout = FrameLayout::new(
            ir.name.clone(),
            allocation.frame_words,
            allocation.used_registers.clone(),
            self.options.word_size,
        );
        let mut instructions = prologue(&layout);
        instructions.extend(allocation.code);
        instructions.extend(epilogue(&layout));

        debug!(
            function = %ir.name,
            frame_words = layout.frame_words,
            saved = layout.saved.len(),
            instructions = instructions.len(),
            "framed function"
        );

        let compiled = AssemblyFunction {
            name: ir.name.clone(),
            frame_words: layout.frame_words,
            saved_registers: layout.saved,
            spills: allocation.spills,
            instructions,
        };
        Ok((ir, compiled))
    }
}
