//! # Intermediate Representation
//!
//! The typed AST is lowered to three-address code whose operands are named
//! values (temps, locals, globals). The same [`Instruction`] type carries the
//! physical code produced by the register allocator.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── instruction.rs  # RegClass, PhysReg, ValueKind, Operand, Opcode, Instruction
//! ├── code_object.rs  # Value, Condition, CodeObject (per-subtree results)
//! ├── program.rs      # FunctionIr, AssemblyFunction, AssemblyProgram
//! └── generator.rs    # NamingContext, IrGenerator (AST lowering)
//! ```
//!
//! ## Key Types
//!
//! - [`Operand`] - Named value, physical register, immediate, address or label
//! - [`Instruction`] - Label or opcode with dest/src1/src2 slots and an offset
//! - [`CodeObject`] - Instructions plus the address-or-data result of a subtree
//! - [`IrGenerator`] - AST-to-3AC transformer

mod code_object;
mod generator;
mod instruction;
mod program;

pub use code_object::{CodeObject, Condition, Value};
pub use generator::{symbol_operand, IrGenerator, NamingContext};
pub use instruction::{Instruction, Opcode, Operand, PhysReg, RegClass, ValueKind};
pub use program::{entry_label, return_label, AssemblyFunction, AssemblyProgram, FunctionIr};
