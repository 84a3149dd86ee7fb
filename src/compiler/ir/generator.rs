//! IR Generator - lowers the typed AST to three-address code
//!
//! Lowering is a single post-order traversal. Each node builds a
//! [`CodeObject`] from its children's code objects by value, so the only
//! state threaded through the walk is the per-function [`NamingContext`].
//!
//! | Section | Search Term |
//! |---------|-------------|
//! | Naming | `NAMING` |
//! | Expressions | `EXPRESSIONS` |
//! | Calls | `CALL SEQUENCE` |
//! | Statements | `STATEMENTS` |
//! | Conditions | `CONDITIONS` |

use super::code_object::{CodeObject, Condition, Value};
use super::instruction::{Instruction, Opcode, Operand, PhysReg, RegClass, ValueKind};
use super::program::{entry_label, return_label, FunctionIr};
use crate::ast::{
    BinaryOp, CmpOp, Cond, Expr, ExprKind, Function, Program, Stmt, Storage, Symbol, Type,
    UnaryOp,
};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, trace};

// =============================================================================
// NAMING
// =============================================================================

/// Fresh temporaries and labels for one function
///
/// Counters start at 1 and are never shared between functions, so lowering
/// different functions concurrently yields the same names as lowering them
/// one after another. Labels carry the function name (`else_main_1`) and are
/// therefore unique across the whole program.
#[derive(Debug, Clone)]
pub struct NamingContext {
    function: String,
    next_int: u32,
    next_float: u32,
    labels: HashMap<&'static str, u32>,
}

impl NamingContext {
    /// Fresh context for `function`
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            next_int: 0,
            next_float: 0,
            labels: HashMap::new(),
        }
    }

    /// Next integer temp (`$t<n>`)
    pub fn int_temp(&mut self) -> Operand {
        self.next_int += 1;
        Operand::int_temp(self.next_int)
    }

    /// Next float temp (`$f<n>`)
    pub fn float_temp(&mut self) -> Operand {
        self.next_float += 1;
        Operand::float_temp(self.next_float)
    }

    /// Next temp in the given register file
    pub fn temp(&mut self, class: RegClass) -> Operand {
        match class {
            RegClass::Int => self.int_temp(),
            RegClass::Float => self.float_temp(),
        }
    }

    /// Next temp able to hold a value of type `ty`
    pub fn temp_for(&mut self, ty: &Type) -> Operand {
        self.temp(ValueKind::from_type(ty).reg_class())
    }

    /// Next label of the given kind (`loop`, `else`, `out`)
    pub fn label(&mut self, kind: &'static str) -> String {
        let n = self.labels.entry(kind).or_insert(0);
        *n += 1;
        format!("{}_{}_{}", kind, self.function, n)
    }

    /// Number of temps handed out so far
    pub fn temps_issued(&self) -> u32 {
        self.next_int + self.next_float
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

#[derive(Debug, Clone)]
struct Signature {
    params: Vec<Type>,
    ret: Type,
}

/// AST-to-3AC transformer
///
/// Holds only the read-only signature table of the program; all mutable
/// lowering state lives in a per-call [`NamingContext`], so one generator can
/// be shared across threads.
#[derive(Debug, Clone)]
pub struct IrGenerator {
    signatures: HashMap<String, Signature>,
    word_size: i64,
}

impl IrGenerator {
    /// Create a generator for `program` with the given word size in bytes
    pub fn new(program: &Program, word_size: u32) -> Self {
        let signatures = program
            .functions
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    Signature {
                        params: f.params.clone(),
                        ret: f.ret.clone(),
                    },
                )
            })
            .collect();
        Self {
            signatures,
            word_size: i64::from(word_size),
        }
    }

    /// Lower every function of the program in source order
    pub fn generate(&self, program: &Program) -> Result<Vec<FunctionIr>> {
        program
            .functions
            .iter()
            .map(|f| self.lower_function(f))
            .collect()
    }

    /// Lower one function body to three-address code
    pub fn lower_function(&self, function: &Function) -> Result<FunctionIr> {
        let mut lowering = FunctionLowering {
            signatures: &self.signatures,
            word: self.word_size,
            function,
            names: NamingContext::new(function.name.clone()),
        };

        let mut code = Vec::new();
        for stmt in &function.body {
            code.extend(lowering.stmt(stmt)?.code);
        }

        debug!(
            function = %function.name,
            instructions = code.len(),
            temps = lowering.names.temps_issued(),
            "lowered function to 3AC"
        );

        Ok(FunctionIr {
            name: function.name.clone(),
            params: function.params.clone(),
            ret: function.ret.clone(),
            num_locals: function.num_locals,
            code,
        })
    }
}

/// Operand naming a symbol's storage
pub fn symbol_operand(symbol: &Symbol) -> Operand {
    let kind = ValueKind::from_type(&symbol.ty);
    match symbol.storage {
        Storage::Local => Operand::Local {
            offset: symbol.address,
            kind,
        },
        Storage::Global => Operand::Global {
            name: symbol.name.clone(),
            address: symbol.address,
            kind,
        },
    }
}

fn load_opcode(ty: &Type) -> Opcode {
    if ty.is_float() {
        Opcode::Flw
    } else {
        Opcode::Lw
    }
}

fn store_opcode(ty: &Type) -> Opcode {
    if ty.is_float() {
        Opcode::Fsw
    } else {
        Opcode::Sw
    }
}

fn move_opcode(ty: &Type) -> Opcode {
    if ty.is_float() {
        Opcode::FMv
    } else {
        Opcode::Mv
    }
}

struct FunctionLowering<'a> {
    signatures: &'a HashMap<String, Signature>,
    word: i64,
    function: &'a Function,
    names: NamingContext,
}

impl FunctionLowering<'_> {
    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn expr(&mut self, expr: &Expr) -> Result<CodeObject> {
        match &expr.kind {
            ExprKind::Var(symbol) => Ok(CodeObject::of(Value::Address(
                symbol_operand(symbol),
                symbol.ty.clone(),
            ))),

            ExprKind::IntLit(value) => {
                let dest = self.names.int_temp();
                let mut co = CodeObject::of(Value::Data(dest.clone(), Type::Int));
                co.push(Instruction::op2(Opcode::Li, dest, Operand::Imm(*value)));
                Ok(co)
            }

            ExprKind::FloatLit(value) => {
                let dest = self.names.float_temp();
                let mut co = CodeObject::of(Value::Data(dest.clone(), Type::Float));
                co.push(Instruction::op2(
                    Opcode::FImm,
                    dest,
                    Operand::float_imm(*value),
                ));
                Ok(co)
            }

            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),

            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let mut co = self.expr(operand)?;
                let (src, ty) = co.load(&mut self.names)?;
                let opcode = match &ty {
                    Type::Int => Opcode::Neg,
                    Type::Float => Opcode::FNeg,
                    other => {
                        return Err(Error::unknown_operator(
                            "-",
                            format!("negation of {}", other),
                        ))
                    }
                };
                let dest = self.names.temp_for(&ty);
                co.push(Instruction::op2(opcode, dest.clone(), src));
                co.value = Value::Data(dest, ty);
                Ok(co)
            }

            ExprKind::Cast(inner) => {
                let mut co = self.expr(inner)?;
                let (src, from) = co.load(&mut self.names)?;
                let converted = self.coerce(&mut co, src, &from, &expr.ty, "cast")?;
                co.value = Value::Data(converted, expr.ty.clone());
                Ok(co)
            }

            ExprKind::Call { func, args } => self.call(func, args, &expr.ty),

            ExprKind::Deref(pointer) => {
                let mut co = self.expr(pointer)?;
                let (ptr, ty) = co.load(&mut self.names)?;
                let pointee = ty
                    .pointee()
                    .cloned()
                    .ok_or_else(|| Error::type_mismatch("dereference", "pointer", &ty))?;
                // A named operand as an address means the variable itself, so
                // a pointer held in a variable is copied into a temp first
                let ptr = if ptr.is_variable() {
                    let copy = self.names.int_temp();
                    co.push(Instruction::op2(Opcode::Mv, copy.clone(), ptr));
                    copy
                } else {
                    ptr
                };
                co.value = Value::Address(ptr, pointee);
                Ok(co)
            }

            ExprKind::AddrOf(target) => {
                let mut co = self.expr(target)?;
                co.address_of(&mut self.names)?;
                Ok(co)
            }

            ExprKind::Malloc(size) => {
                let mut co = self.expr(size)?;
                let (src, ty) = co.load(&mut self.names)?;
                let bytes = self.coerce(&mut co, src, &ty, &Type::Int, "malloc size")?;
                let dest = self.names.int_temp();
                co.push(Instruction::op2(Opcode::Malloc, dest.clone(), bytes));
                co.value = Value::Data(dest, expr.ty.clone());
                Ok(co)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<CodeObject> {
        let mut co = CodeObject::empty();

        let mut left = self.expr(lhs)?;
        let (lop, lty) = left.load(&mut self.names)?;
        co.absorb(left);
        let mut right = self.expr(rhs)?;
        let (rop, rty) = right.load(&mut self.names)?;
        co.absorb(right);

        if !lty.is_numeric() || !rty.is_numeric() {
            return Err(Error::unknown_operator(op, format!("{} {} {}", lty, op, rty)));
        }

        // Mixed operands widen the int side
        let ty = if lty.is_float() || rty.is_float() {
            Type::Float
        } else {
            Type::Int
        };
        let lop = self.coerce(&mut co, lop, &lty, &ty, "binary operand")?;
        let rop = self.coerce(&mut co, rop, &rty, &ty, "binary operand")?;

        let opcode = match (op, ty.is_float()) {
            (BinaryOp::Add, false) => Opcode::Add,
            (BinaryOp::Sub, false) => Opcode::Sub,
            (BinaryOp::Mul, false) => Opcode::Mul,
            (BinaryOp::Div, false) => Opcode::Div,
            (BinaryOp::Add, true) => Opcode::FAdd,
            (BinaryOp::Sub, true) => Opcode::FSub,
            (BinaryOp::Mul, true) => Opcode::FMul,
            (BinaryOp::Div, true) => Opcode::FDiv,
        };
        let dest = self.names.temp_for(&ty);
        co.push(Instruction::op3(opcode, dest.clone(), lop, rop));
        co.value = Value::Data(dest, ty);
        Ok(co)
    }

    /// Convert `src` from one static type to another, emitting the
    /// conversion into `co` when the register file changes
    fn coerce(
        &mut self,
        co: &mut CodeObject,
        src: Operand,
        from: &Type,
        to: &Type,
        context: &str,
    ) -> Result<Operand> {
        if from == to {
            return Ok(src);
        }
        match (from, to) {
            (Type::Int, Type::Float) => {
                let dest = self.names.float_temp();
                co.push(Instruction::op2(Opcode::ImovF, dest.clone(), src));
                Ok(dest)
            }
            (Type::Float, Type::Int) => {
                let dest = self.names.int_temp();
                co.push(Instruction::op2(Opcode::FmovI, dest.clone(), src));
                Ok(dest)
            }
            (Type::Int, Type::Ptr(_)) | (Type::Ptr(_), Type::Int) | (Type::Ptr(_), Type::Ptr(_)) => {
                Ok(src)
            }
            _ => Err(Error::type_mismatch(context, to, from)),
        }
    }

    // =========================================================================
    // CALL SEQUENCE
    // =========================================================================

    fn call(&mut self, func: &str, args: &[Expr], ret: &Type) -> Result<CodeObject> {
        let word = self.word;
        let signature = self.signatures.get(func).cloned();
        let params = signature.as_ref().map(|s| s.params.clone());
        let ret = signature.map(|s| s.ret).unwrap_or_else(|| ret.clone());
        let mut co = CodeObject::empty();

        for (i, arg) in args.iter().enumerate() {
            let mut arg_co = self.expr(arg)?;
            let (src, ty) = arg_co.load(&mut self.names)?;
            co.absorb(arg_co);
            let param_ty = params
                .as_ref()
                .and_then(|p| p.get(i))
                .cloned()
                .unwrap_or_else(|| ty.clone());
            let src = self.coerce(&mut co, src, &ty, &param_ty, "call argument")?;
            co.push(Instruction::store(
                store_opcode(&param_ty),
                src,
                PhysReg::SP.into(),
                0,
            ));
            co.push(Instruction::addi(PhysReg::SP, PhysReg::SP, -word));
        }

        // Return slot, then the caller's return address
        co.push(Instruction::addi(PhysReg::SP, PhysReg::SP, -word));
        co.push(Instruction::store(
            Opcode::Sw,
            PhysReg::RA.into(),
            PhysReg::SP.into(),
            0,
        ));
        co.push(Instruction::addi(PhysReg::SP, PhysReg::SP, -word));
        co.push(Instruction::jump(Opcode::Jr, entry_label(func)));
        co.push(Instruction::addi(PhysReg::SP, PhysReg::SP, word));
        co.push(Instruction::load(
            Opcode::Lw,
            PhysReg::RA.into(),
            PhysReg::SP.into(),
            0,
        ));
        co.push(Instruction::addi(PhysReg::SP, PhysReg::SP, word));

        if ret != Type::Void {
            let dest = self.names.temp_for(&ret);
            co.push(Instruction::load(
                load_opcode(&ret),
                dest.clone(),
                PhysReg::SP.into(),
                0,
            ));
            co.value = Value::Data(dest, ret.clone());
        }
        if !args.is_empty() {
            co.push(Instruction::addi(
                PhysReg::SP,
                PhysReg::SP,
                word * args.len() as i64,
            ));
        }

        trace!(callee = func, args = args.len(), "lowered call");
        Ok(co)
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn stmt(&mut self, stmt: &Stmt) -> Result<CodeObject> {
        match stmt {
            Stmt::Assign { target, value } => {
                let mut co = CodeObject::empty();
                let (dest, dest_ty) = match co.absorb(self.expr(target)?) {
                    Value::Address(op, ty) => (op, ty),
                    other => {
                        return Err(Error::unsupported_operand(
                            "assignment",
                            format!("{:?}", other),
                        ))
                    }
                };
                if dest_ty == Type::Str {
                    return Err(Error::type_mismatch("assignment", "scalar", &dest_ty));
                }

                let mut rhs = self.expr(value)?;
                let (src, src_ty) = rhs.load(&mut self.names)?;
                co.absorb(rhs);
                let src = self.coerce(&mut co, src, &src_ty, &dest_ty, "assignment")?;

                if dest.is_variable() {
                    co.push(Instruction::op2(move_opcode(&dest_ty), dest, src));
                } else {
                    co.push(Instruction::store(store_opcode(&dest_ty), src, dest, 0));
                }
                Ok(co)
            }

            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.names.label("else");
                let out_label = self.names.label("out");

                let (mut co, condition) = self.condition(cond)?;
                self.branch_if_false(&mut co, condition, &else_label);
                for s in then_branch {
                    let child = self.stmt(s)?;
                    co.absorb(child);
                }
                co.push(Instruction::jump(Opcode::J, out_label.clone()));
                co.push(Instruction::label(else_label));
                for s in else_branch {
                    let child = self.stmt(s)?;
                    co.absorb(child);
                }
                co.push(Instruction::label(out_label));
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::While { cond, body } => {
                let loop_label = self.names.label("loop");
                let out_label = self.names.label("out");

                let mut co = CodeObject::empty();
                co.push(Instruction::label(loop_label.clone()));
                let (cond_co, condition) = self.condition(cond)?;
                co.absorb(cond_co);
                self.branch_if_false(&mut co, condition, &out_label);
                for s in body {
                    let child = self.stmt(s)?;
                    co.absorb(child);
                }
                co.push(Instruction::jump(Opcode::J, loop_label));
                co.push(Instruction::label(out_label));
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::Return(value) => {
                let mut co = CodeObject::empty();
                let ret = self.function.ret.clone();
                if let Some(expr) = value {
                    if ret == Type::Void {
                        return Err(Error::type_mismatch("return", Type::Void, &expr.ty));
                    }
                    let mut val = self.expr(expr)?;
                    let (src, ty) = val.load(&mut self.names)?;
                    co.absorb(val);
                    let src = self.coerce(&mut co, src, &ty, &ret, "return")?;
                    co.push(Instruction::store(
                        store_opcode(&ret),
                        src,
                        PhysReg::FP.into(),
                        (2 * self.word) as i32,
                    ));
                }
                co.push(Instruction::jump(
                    Opcode::J,
                    return_label(&self.function.name),
                ));
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::Read(target) => {
                let mut co = CodeObject::empty();
                let (dest, ty) = match co.absorb(self.expr(target)?) {
                    Value::Address(op, ty) => (op, ty),
                    other => {
                        return Err(Error::unsupported_operand("read", format!("{:?}", other)))
                    }
                };
                let opcode = match &ty {
                    Type::Int => Opcode::GetI,
                    Type::Float => Opcode::GetF,
                    other => return Err(Error::type_mismatch("read", "int or float", other)),
                };
                if dest.is_variable() {
                    co.push(Instruction::source(opcode, dest));
                } else {
                    let tmp = self.names.temp_for(&ty);
                    co.push(Instruction::source(opcode, tmp.clone()));
                    co.push(Instruction::store(store_opcode(&ty), tmp, dest, 0));
                }
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::Write(expr) => {
                let mut co = self.expr(expr)?;
                let (src, ty) = co.load(&mut self.names)?;
                let opcode = match ty {
                    Type::Int | Type::Ptr(_) => Opcode::PutI,
                    Type::Float => Opcode::PutF,
                    Type::Str => Opcode::PutS,
                    Type::Void => return Err(Error::type_mismatch("write", "value", Type::Void)),
                };
                co.push(Instruction::sink(opcode, src));
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::Free(expr) => {
                let mut co = self.expr(expr)?;
                let (ptr, ty) = co.load(&mut self.names)?;
                if ty.pointee().is_none() {
                    return Err(Error::type_mismatch("free", "pointer", ty));
                }
                co.push(Instruction::sink(Opcode::Free, ptr));
                co.value = Value::Unit;
                Ok(co)
            }

            Stmt::Expr(expr) => {
                let mut co = self.expr(expr)?;
                co.value = Value::Unit;
                Ok(co)
            }
        }
    }

    // =========================================================================
    // CONDITIONS
    // =========================================================================

    fn condition(&mut self, cond: &Cond) -> Result<(CodeObject, Condition)> {
        let mut co = CodeObject::empty();

        let mut left = self.expr(&cond.lhs)?;
        let (lop, lty) = left.load(&mut self.names)?;
        co.absorb(left);
        let mut right = self.expr(&cond.rhs)?;
        let (rop, rty) = right.load(&mut self.names)?;
        co.absorb(right);

        let comparable = |ty: &Type| ty.is_numeric() || ty.pointee().is_some();
        if !comparable(&lty) || !comparable(&rty) {
            return Err(Error::unknown_operator(
                cond.op,
                format!("comparison of {} and {}", lty, rty),
            ));
        }

        let is_float = lty.is_float() || rty.is_float();
        let (lhs, rhs) = if is_float {
            (
                self.coerce(&mut co, lop, &lty, &Type::Float, "comparison")?,
                self.coerce(&mut co, rop, &rty, &Type::Float, "comparison")?,
            )
        } else {
            (lop, rop)
        };

        co.value = Value::Unit;
        Ok((
            co,
            Condition {
                op: cond.op,
                lhs,
                rhs,
                is_float,
            },
        ))
    }

    /// Emit the branch to `target` taken when `cond` does not hold
    fn branch_if_false(&mut self, co: &mut CodeObject, cond: Condition, target: &str) {
        if !cond.is_float {
            let opcode = Opcode::branch_for(cond.op.reversed());
            co.push(Instruction::branch(opcode, cond.lhs, cond.rhs, target));
            return;
        }

        // Float compares materialize the truth value, then branch on it
        let flag = self.names.int_temp();
        let (compare, a, b) = match cond.op {
            CmpOp::Eq | CmpOp::Ne => (Opcode::Feq, cond.lhs, cond.rhs),
            CmpOp::Lt => (Opcode::Flt, cond.lhs, cond.rhs),
            CmpOp::Le => (Opcode::Fle, cond.lhs, cond.rhs),
            CmpOp::Gt => (Opcode::Flt, cond.rhs, cond.lhs),
            CmpOp::Ge => (Opcode::Fle, cond.rhs, cond.lhs),
        };
        let branch = if cond.op == CmpOp::Ne {
            Opcode::Bne
        } else {
            Opcode::Beq
        };
        co.push(Instruction::op3(compare, flag.clone(), a, b));
        co.push(Instruction::branch(
            branch,
            flag,
            PhysReg::ZERO.into(),
            target,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Scope;

    fn function(name: &str, ret: Type, num_locals: usize, body: Vec<Stmt>) -> Function {
        Function {
            name: name.into(),
            params: vec![],
            ret,
            num_locals,
            scope: Scope::new(name),
            body,
        }
    }

    fn lower(f: Function) -> Vec<String> {
        let program = Program {
            globals: Scope::new("global"),
            functions: vec![f.clone()],
        };
        IrGenerator::new(&program, 4)
            .lower_function(&f)
            .unwrap()
            .code
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn test_naming_context_counters() {
        let mut names = NamingContext::new("main");
        assert_eq!(names.int_temp(), Operand::int_temp(1));
        assert_eq!(names.float_temp(), Operand::float_temp(1));
        assert_eq!(names.int_temp(), Operand::int_temp(2));
        assert_eq!(names.label("else"), "else_main_1");
        assert_eq!(names.label("out"), "out_main_1");
        assert_eq!(names.label("else"), "else_main_2");
        assert_eq!(names.temps_issued(), 3);
    }

    #[test]
    fn test_straight_line_assignment() {
        let a = Symbol::local("a", Type::Int, -4);
        let b = Symbol::local("b", Type::Int, -8);
        let d = Symbol::local("d", Type::Int, -12);
        let body = vec![Stmt::Assign {
            target: Expr::var(&d),
            value: Expr::binary(BinaryOp::Add, Expr::var(&a), Expr::var(&b)),
        }];
        assert_eq!(
            lower(function("main", Type::Void, 3, body)),
            vec!["ADD $t1, $l-4, $l-8", "MV $l-12, $t1"]
        );
    }

    #[test]
    fn test_mixed_arithmetic_widens_int_operand() {
        let a = Symbol::local("a", Type::Int, -4);
        let x = Symbol::local("x", Type::Float, -8);
        let body = vec![Stmt::Assign {
            target: Expr::var(&x),
            value: Expr::binary(BinaryOp::Mul, Expr::var(&a), Expr::var(&x)),
        }];
        assert_eq!(
            lower(function("main", Type::Void, 2, body)),
            vec![
                "IMOVF.S $f1, $l-4",
                "FMUL.S $f2, $f1, $l-8",
                "FMV.S $l-8, $f2"
            ]
        );
    }

    #[test]
    fn test_assignment_truncates_float_to_int() {
        let a = Symbol::local("a", Type::Int, -4);
        let body = vec![Stmt::Assign {
            target: Expr::var(&a),
            value: Expr::float(2.5),
        }];
        assert_eq!(
            lower(function("main", Type::Void, 1, body)),
            vec!["FIMM.S $f1, 2.5", "FMOVI.S $t1, $f1", "MV $l-4, $t1"]
        );
    }

    #[test]
    fn test_if_uses_reversed_branch() {
        let a = Symbol::local("a", Type::Int, -4);
        let body = vec![Stmt::If {
            cond: Cond::new(CmpOp::Lt, Expr::var(&a), Expr::int(10)),
            then_branch: vec![Stmt::Write(Expr::var(&a))],
            else_branch: vec![],
        }];
        assert_eq!(
            lower(function("main", Type::Void, 1, body)),
            vec![
                "LI $t1, 10",
                "BGE $l-4, $t1, else_main_1",
                "PUTI $l-4",
                "J out_main_1",
                "else_main_1:",
                "out_main_1:"
            ]
        );
    }

    #[test]
    fn test_float_greater_than_swaps_operands() {
        let x = Symbol::local("x", Type::Float, -4);
        let y = Symbol::local("y", Type::Float, -8);
        let body = vec![Stmt::While {
            cond: Cond::new(CmpOp::Gt, Expr::var(&x), Expr::var(&y)),
            body: vec![],
        }];
        assert_eq!(
            lower(function("main", Type::Void, 2, body)),
            vec![
                "loop_main_1:",
                "FLT.S $t1, $l-8, $l-4",
                "BEQ $t1, x0, out_main_1",
                "J loop_main_1",
                "out_main_1:"
            ]
        );
    }

    #[test]
    fn test_call_sequence() {
        let body = vec![Stmt::Return(Some(Expr::call(
            "f",
            vec![Expr::int(1)],
            Type::Int,
        )))];
        assert_eq!(
            lower(function("main", Type::Int, 0, body)),
            vec![
                "LI $t1, 1",
                "SW $t1, 0(sp)",
                "ADDI sp, sp, -4",
                "ADDI sp, sp, -4",
                "SW ra, 0(sp)",
                "ADDI sp, sp, -4",
                "JR func_f",
                "ADDI sp, sp, 4",
                "LW ra, 0(sp)",
                "ADDI sp, sp, 4",
                "LW $t2, 0(sp)",
                "ADDI sp, sp, 4",
                "SW $t2, 8(fp)",
                "J func_ret_main"
            ]
        );
    }

    #[test]
    fn test_pointer_store_and_address_of() {
        let x = Symbol::local("x", Type::Int, -4);
        let p = Symbol::local("p", Type::ptr(Type::Int), -8);
        let body = vec![
            Stmt::Assign {
                target: Expr::var(&p),
                value: Expr::addr_of(Expr::var(&x)),
            },
            Stmt::Assign {
                target: Expr::deref(Expr::var(&p)),
                value: Expr::int(7),
            },
        ];
        assert_eq!(
            lower(function("main", Type::Void, 2, body)),
            vec![
                "ADDI $t1, fp, -4",
                "MV $l-8, $t1",
                "MV $t2, $l-8",
                "LI $t3, 7",
                "SW $t3, 0($t2)"
            ]
        );
    }

    #[test]
    fn test_write_string_uses_puts() {
        let s = Symbol::global("msg", Type::Str, 0x100);
        let body = vec![Stmt::Write(Expr::var(&s))];
        assert_eq!(
            lower(function("main", Type::Void, 0, body)),
            vec!["PUTS $gmsg"]
        );
    }

    #[test]
    fn test_pointer_arithmetic_is_rejected() {
        let p = Symbol::local("p", Type::ptr(Type::Int), -4);
        let body = vec![Stmt::Write(Expr::binary(
            BinaryOp::Add,
            Expr::var(&p),
            Expr::int(1),
        ))];
        let f = function("main", Type::Void, 1, body);
        let program = Program {
            globals: Scope::new("global"),
            functions: vec![f.clone()],
        };
        let err = IrGenerator::new(&program, 4).lower_function(&f).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator { .. }));
    }
}
