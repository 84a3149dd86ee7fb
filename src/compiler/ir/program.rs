//! Function and program containers

use super::instruction::{Instruction, PhysReg};
use crate::ast::Type;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One function lowered to three-address code (no prologue or epilogue yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIr {
    /// Function name
    pub name: String,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
    /// Local slots declared by the frontend
    pub num_locals: usize,
    /// Virtual instruction stream
    pub code: Vec<Instruction>,
}

impl FunctionIr {
    /// Entry label (`func_<name>`)
    pub fn entry_label(&self) -> String {
        entry_label(&self.name)
    }

    /// Shared epilogue label (`func_ret_<name>`)
    pub fn return_label(&self) -> String {
        return_label(&self.name)
    }
}

/// Entry label of a function
pub fn entry_label(name: &str) -> String {
    format!("func_{}", name)
}

/// Epilogue label of a function
pub fn return_label(name: &str) -> String {
    format!("func_ret_{}", name)
}

/// One function after allocation and frame synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyFunction {
    /// Function name
    pub name: String,
    /// Local area size in words, including spill slots
    pub frame_words: usize,
    /// Registers saved by the prologue, in first-use order
    pub saved_registers: Vec<PhysReg>,
    /// Stores emitted because a live value lost its register
    pub spills: usize,
    /// Prologue, allocated body and epilogue
    pub instructions: Vec<Instruction>,
}

/// Whole translation unit ready for emission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyProgram {
    /// Entry stub run before `main`
    pub entry: Vec<Instruction>,
    /// Compiled functions in source order
    pub functions: Vec<AssemblyFunction>,
}

impl AssemblyProgram {
    /// Every instruction in emission order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entry
            .iter()
            .chain(self.functions.iter().flat_map(|f| f.instructions.iter()))
    }

    /// Look up a compiled function by name
    pub fn function(&self, name: &str) -> Option<&AssemblyFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Serialize for golden comparison
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for AssemblyProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in self.instructions() {
            writeln!(f, "{}", inst)?;
        }
        Ok(())
    }
}
