//! # rvlower - Typed AST to RISC-V-style Assembly
//!
//! The back end of a small C-like language: it takes a typed,
//! symbol-resolved syntax tree and produces register-allocated assembly for
//! a RISC-V-flavoured machine with a configurable register file.
//!
//! ## Features
//!
//! - **Three-address lowering** of arithmetic, pointers, calls, `if`/`while`,
//!   `read`/`write` and heap allocation
//! - **Block-local register allocation** with liveness-driven freeing and
//!   spilling to frame slots
//! - **Frame synthesis** (prologue, shared epilogue, caller-side call
//!   sequence) generated after allocation
//! - **Verification** of the physical output and a **reference interpreter**
//!   that runs both virtual and allocated code
//! - **Parallel compilation** of independent functions on a rayon pool
//!
//! ## Quick Start
//!
//! ```rust
//! use rvlower::ast::{BinaryOp, Expr, Function, Program, Scope, Stmt, Symbol, Type};
//! use rvlower::{CompileOptions, Compiler, Interpreter};
//!
//! # fn main() -> rvlower::Result<()> {
//! let x = Symbol::local("x", Type::Int, -4);
//! let main = Function {
//!     name: "main".into(),
//!     params: vec![],
//!     ret: Type::Void,
//!     num_locals: 1,
//!     scope: Scope::new("main").with(x.clone()),
//!     body: vec![
//!         Stmt::Assign {
//!             target: Expr::var(&x),
//!             value: Expr::binary(BinaryOp::Mul, Expr::int(6), Expr::int(7)),
//!         },
//!         Stmt::Write(Expr::var(&x)),
//!     ],
//! };
//! let program = Program {
//!     globals: Scope::new("global"),
//!     functions: vec![main],
//! };
//!
//! let result = Compiler::new(CompileOptions::default())?.compile(&program)?;
//! println!("{}", result.assembly());
//!
//! let mut vm = Interpreter::for_program(&result.program)?;
//! vm.run()?;
//! assert_eq!(vm.output(), ["42"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Program (JSON or built in code)
//!   → IrGenerator        three-address code with named operands
//!   → partition          basic blocks
//!   → analyze            per-instruction live-after sets
//!   → RegisterAllocator  physical registers, spill slots
//!   → prologue/epilogue  frame around the allocated body
//!   → Verifier           structural checks on the output
//! ```
//!
//! ### Main Components
//!
//! - [`ast`] - Typed input tree (serde-deserializable)
//! - [`compiler::ir`] - Instructions, operands, lowering
//! - [`compiler::regalloc`] - Register files and the allocator
//! - [`Compiler`] - Pipeline driver configured by [`CompileOptions`]
//! - [`Interpreter`] - Executes instruction streams for testing
//!
//! ## Error Handling
//!
//! Every failure is an internal-invariant violation reported as an
//! [`Error`]; the whole translation unit is rejected and no partial output is
//! returned.

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ast;
pub mod compiler;
pub mod error;

// Re-export main types
pub use compiler::{CompileOptions, CompileResult, Compiler, Interpreter, Word};
pub use error::{Error, Result};
