//! Per-subtree lowering results
//!
//! Every AST node lowers to a [`CodeObject`]: the instructions computing it
//! plus a [`Value`] saying where the result is and whether it is an address
//! (an l-value) or data (an r-value). [`CodeObject::load`] and
//! [`CodeObject::address_of`] are the only transitions between the two.

use super::generator::NamingContext;
use super::instruction::{Instruction, Opcode, Operand, PhysReg};
use crate::ast::{CmpOp, Type};
use crate::{Error, Result};

/// Location and nature of a subtree's result
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The operand designates a storage location holding a value of the type.
    /// Named operands (locals, globals) are their own location; any other
    /// operand holds a computed pointer.
    Address(Operand, Type),
    /// The operand holds the value itself
    Data(Operand, Type),
    /// Statements and void calls
    Unit,
}

impl Value {
    /// Static type of the designated value
    pub fn ty(&self) -> Type {
        match self {
            Value::Address(_, ty) | Value::Data(_, ty) => ty.clone(),
            Value::Unit => Type::Void,
        }
    }
}

/// A lowered comparison, consumed only by `if`/`while` lowering
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Relational operator as written in the source
    pub op: CmpOp,
    /// Left operand (loaded)
    pub lhs: Operand,
    /// Right operand (loaded)
    pub rhs: Operand,
    /// Both operands live in float registers
    pub is_float: bool,
}

/// Instruction sequence plus the value it produces
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    /// Instructions in execution order
    pub code: Vec<Instruction>,
    /// Result of the code
    pub value: Value,
}

impl CodeObject {
    /// Code object with no instructions and no value
    pub fn empty() -> Self {
        Self {
            code: Vec::new(),
            value: Value::Unit,
        }
    }

    /// Code object with no instructions holding `value`
    pub fn of(value: Value) -> Self {
        Self {
            code: Vec::new(),
            value,
        }
    }

    /// Append one instruction
    pub fn push(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    /// Append a child's code and return its value
    pub fn absorb(&mut self, child: CodeObject) -> Value {
        self.code.extend(child.code);
        child.value
    }

    /// Append a child's instructions, discarding its value
    pub fn extend(&mut self, code: Vec<Instruction>) {
        self.code.extend(code);
    }

    /// Static type of the result
    pub fn ty(&self) -> Type {
        self.value.ty()
    }

    /// Turn an address into data, returning the data operand and its type
    ///
    /// A named address is already a value in three-address code and emits
    /// nothing. A computed address emits `LW`/`FLW` through the pointer.
    pub fn load(&mut self, names: &mut NamingContext) -> Result<(Operand, Type)> {
        let (operand, ty) = match std::mem::replace(&mut self.value, Value::Unit) {
            Value::Data(op, ty) => (op, ty),
            Value::Address(op, ty) if op.is_variable() => (op, ty),
            Value::Address(ptr, ty) => {
                let dest = names.temp_for(&ty);
                let opcode = if ty.is_float() {
                    Opcode::Flw
                } else {
                    Opcode::Lw
                };
                self.push(Instruction::load(opcode, dest.clone(), ptr, 0));
                (dest, ty)
            }
            Value::Unit => return Err(Error::type_mismatch("load", "value", Type::Void)),
        };
        self.value = Value::Data(operand.clone(), ty.clone());
        Ok((operand, ty))
    }

    /// Turn an address into a pointer value
    ///
    /// Locals compute `fp + offset`, globals load their absolute address, and
    /// a computed address already is the pointer.
    pub fn address_of(&mut self, names: &mut NamingContext) -> Result<(Operand, Type)> {
        let (pointer, ty) = match std::mem::replace(&mut self.value, Value::Unit) {
            Value::Address(Operand::Local { offset, .. }, ty) => {
                let dest = names.int_temp();
                self.push(Instruction::addi(dest.clone(), PhysReg::FP, i64::from(offset)));
                (dest, ty)
            }
            Value::Address(Operand::Global { address, .. }, ty) => {
                let dest = names.int_temp();
                self.push(Instruction::op2(
                    Opcode::La,
                    dest.clone(),
                    Operand::Address(address as u32),
                ));
                (dest, ty)
            }
            Value::Address(ptr, ty) => (ptr, ty),
            Value::Data(op, _) => return Err(Error::unsupported_operand("address-of", op)),
            Value::Unit => return Err(Error::type_mismatch("address-of", "l-value", Type::Void)),
        };
        let ptr_ty = Type::ptr(ty);
        self.value = Value::Data(pointer.clone(), ptr_ty.clone());
        Ok((pointer, ptr_ty))
    }
}
