//! Typed, symbol-resolved AST consumed by the backend
//!
//! The frontend (lexer, parser, symbol-table construction, type checker) is an
//! external collaborator. By the time a [`Program`] reaches this crate every
//! expression carries its resolved static [`Type`] and every variable
//! reference carries its resolved [`Symbol`].
//!
//! The tree is a closed set of tagged variants so lowering can match on it
//! exhaustively. All types derive serde so a frontend written in any language
//! can hand the backend a JSON document (see [`Program::from_json`]).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// TYPES AND SYMBOLS
// =============================================================================

/// Static type of an expression or symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// 32-bit integer
    Int,
    /// Single-precision float
    Float,
    /// String constant (a symbol whose value is its address)
    Str,
    /// No value (statements, void functions)
    Void,
    /// Pointer to the inner type
    Ptr(Box<Type>),
}

impl Type {
    /// Pointer to `inner`
    pub fn ptr(inner: Type) -> Self {
        Type::Ptr(Box::new(inner))
    }

    /// Element type of a pointer, if this is one
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// True for values held in the float register file
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float)
    }

    /// True for int and float
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Ptr(inner) => write!(f, "{}*", inner),
        }
    }
}

/// Storage class of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Storage {
    /// Frame-relative slot (locals and parameters)
    Local,
    /// Absolute address in the data segment
    Global,
}

/// Resolved symbol-table entry attached to every variable reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Source name
    pub name: String,
    /// Declared type
    pub ty: Type,
    /// Local or global
    pub storage: Storage,
    /// Frame offset (locals, negative; parameters, positive) or absolute
    /// address (globals)
    pub address: i32,
}

impl Symbol {
    /// Local variable or parameter at a frame offset
    pub fn local(name: impl Into<String>, ty: Type, offset: i32) -> Self {
        Self {
            name: name.into(),
            ty,
            storage: Storage::Local,
            address: offset,
        }
    }

    /// Global variable at an absolute address
    pub fn global(name: impl Into<String>, ty: Type, address: i32) -> Self {
        Self {
            name: name.into(),
            ty,
            storage: Storage::Global,
            address,
        }
    }

    /// True for frame-relative symbols
    pub fn is_local(&self) -> bool {
        self.storage == Storage::Local
    }

    /// Address as written in assembly: decimal offset for locals, hex for
    /// globals
    pub fn address_string(&self) -> String {
        match self.storage {
            Storage::Local => self.address.to_string(),
            Storage::Global => format!("0x{:x}", self.address),
        }
    }
}

/// Symbols visible inside a function (its locals plus the globals)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Scope name (the function name, or "global")
    pub name: String,
    /// Entries in declaration order
    pub symbols: Vec<Symbol>,
}

impl Scope {
    /// Create an empty scope
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
        }
    }

    /// Add a symbol, returning the scope for chaining
    pub fn with(mut self, symbol: Symbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    /// Look up a symbol by name
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Look up a local by frame offset
    pub fn lookup_local(&self, offset: i32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|s| s.is_local() && s.address == offset)
    }

    /// Number of locals with a negative frame offset (parameters excluded)
    pub fn num_locals(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| s.is_local() && s.address < 0)
            .count()
    }
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Arithmetic binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Arithmetic unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
}

/// Relational operators used in conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// The operator that holds exactly when this one does not
    pub fn reversed(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Typed expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Node kind and children
    pub kind: ExprKind,
    /// Resolved static type
    pub ty: Type,
}

/// Expression node kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Variable reference with its resolved symbol
    Var(Symbol),
    /// Integer literal
    IntLit(i64),
    /// Float literal
    FloatLit(f64),
    /// Binary arithmetic
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Unary arithmetic
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Explicit conversion to the node's type
    Cast(Box<Expr>),
    /// Function call
    Call {
        /// Callee name
        func: String,
        /// Arguments, left to right
        args: Vec<Expr>,
    },
    /// `*expr`
    Deref(Box<Expr>),
    /// `&expr`
    AddrOf(Box<Expr>),
    /// `malloc(size)`
    Malloc(Box<Expr>),
}

impl Expr {
    /// Reference to a resolved symbol
    pub fn var(symbol: &Symbol) -> Self {
        Self {
            ty: symbol.ty.clone(),
            kind: ExprKind::Var(symbol.clone()),
        }
    }

    /// Integer literal
    pub fn int(value: i64) -> Self {
        Self {
            kind: ExprKind::IntLit(value),
            ty: Type::Int,
        }
    }

    /// Float literal
    pub fn float(value: f64) -> Self {
        Self {
            kind: ExprKind::FloatLit(value),
            ty: Type::Float,
        }
    }

    /// Binary expression; the result is float if either side is
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let ty = if lhs.ty.is_float() || rhs.ty.is_float() {
            Type::Float
        } else {
            lhs.ty.clone()
        };
        Self {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        }
    }

    /// Negation
    pub fn neg(operand: Expr) -> Self {
        Self {
            ty: operand.ty.clone(),
            kind: ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            },
        }
    }

    /// Explicit cast to `ty`
    pub fn cast(ty: Type, operand: Expr) -> Self {
        Self {
            kind: ExprKind::Cast(Box::new(operand)),
            ty,
        }
    }

    /// Call returning `ty`
    pub fn call(func: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Self {
            kind: ExprKind::Call {
                func: func.into(),
                args,
            },
            ty,
        }
    }

    /// Dereference of a pointer-typed expression
    pub fn deref(pointer: Expr) -> Self {
        let ty = pointer.ty.pointee().cloned().unwrap_or(Type::Void);
        Self {
            kind: ExprKind::Deref(Box::new(pointer)),
            ty,
        }
    }

    /// Address of an addressable expression
    pub fn addr_of(target: Expr) -> Self {
        Self {
            ty: Type::ptr(target.ty.clone()),
            kind: ExprKind::AddrOf(Box::new(target)),
        }
    }

    /// Heap allocation yielding `ty` (a pointer type)
    pub fn malloc(size: Expr, ty: Type) -> Self {
        Self {
            kind: ExprKind::Malloc(Box::new(size)),
            ty,
        }
    }
}

/// Comparison used as an `if`/`while` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cond {
    /// Relational operator
    pub op: CmpOp,
    /// Left operand
    pub lhs: Expr,
    /// Right operand
    pub rhs: Expr,
}

impl Cond {
    /// Build a condition
    pub fn new(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Self { op, lhs, rhs }
    }
}

// =============================================================================
// STATEMENTS AND FUNCTIONS
// =============================================================================

/// Statement nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `target = value`
    Assign {
        /// Addressable left-hand side (variable or dereference)
        target: Expr,
        /// Right-hand side
        value: Expr,
    },
    /// `if (cond) { then } else { else }`
    If {
        /// Condition
        cond: Cond,
        /// Taken when the condition holds
        then_branch: Vec<Stmt>,
        /// Taken otherwise (may be empty)
        else_branch: Vec<Stmt>,
    },
    /// `while (cond) { body }`
    While {
        /// Loop condition
        cond: Cond,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `return expr;` or `return;`
    Return(Option<Expr>),
    /// `read(var)`
    Read(Expr),
    /// `write(expr)`
    Write(Expr),
    /// `free(ptr)`
    Free(Expr),
    /// Expression evaluated for its side effects (calls)
    Expr(Expr),
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Parameter types, left to right
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
    /// Number of local slots reserved below the frame pointer
    pub num_locals: usize,
    /// Symbol lookup scope (locals, parameters, visible globals)
    pub scope: Scope,
    /// Body statements
    pub body: Vec<Stmt>,
}

/// Translation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Global symbols (read-only during compilation)
    pub globals: Scope,
    /// Function definitions
    pub functions: Vec<Function>,
}

impl Program {
    /// Parse a program from the JSON document produced by a frontend
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
