//! Error types for the rvlower backend
//!
//! Every error the backend can raise is an internal-invariant violation: the
//! type-checking frontend should already have rejected the program. Errors are
//! therefore fatal for the whole translation unit and carry enough context to
//! identify the offending node or instruction.

use thiserror::Error;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Operator the lowering pass does not know how to translate
    ///
    /// **Triggered by:** an AST operator with no instruction mapping
    /// (e.g. a pointer type reaching binary arithmetic)
    #[error("Unrecognized operator {op} in {context}")]
    UnknownOperator {
        /// Operator as written in the AST
        op: String,
        /// Node or instruction being lowered
        context: String,
    },

    /// Static types that should have been unified by the type checker
    #[error("Type mismatch in {context}: expected {expected}, got {got}")]
    TypeMismatch {
        /// Node being lowered
        context: String,
        /// Type required at this point
        expected: String,
        /// Type actually found
        got: String,
    },

    /// Operand class not supported by an opcode (e.g. a float temp as a
    /// branch operand, an immediate as a store destination)
    #[error("Unsupported operand {operand} for {opcode}")]
    UnsupportedOperand {
        /// Mnemonic of the instruction
        opcode: String,
        /// Rendered operand
        operand: String,
    },

    /// Register file invariant violated (no eligible register, double binding)
    #[error("Register file error at instruction #{index}: {message}")]
    RegisterFile {
        /// Index of the instruction being allocated
        index: usize,
        /// Description of the violated invariant
        message: String,
    },

    /// A temporary was read before any definition reached it
    #[error("Temporary {name} used before it was defined or spilled")]
    UndefinedTemporary {
        /// Stable operand name (`$t3`, `$f1`)
        name: String,
    },

    /// Compile options rejected during validation
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Output failed post-allocation verification
    #[error("Verification failed for {function}: {message}")]
    Verification {
        /// Function whose output was rejected
        function: String,
        /// First violated check
        message: String,
    },

    /// Reference interpreter fault (bad jump, uninitialised read, step limit)
    #[error("Interpreter error at pc {pc}: {message}")]
    Interpreter {
        /// Program counter of the faulting instruction
        pc: usize,
        /// Fault description
        message: String,
    },

    /// JSON (de)serialization of AST input or instruction output
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal compiler error
    #[error("Compiler error: {0}")]
    CompilerError(String),
}

impl Error {
    /// Create a compiler error with a message
    pub fn compiler(msg: impl Into<String>) -> Self {
        Error::CompilerError(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        got: impl std::fmt::Display,
    ) -> Self {
        Error::TypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    /// Create an unknown operator error
    pub fn unknown_operator(op: impl std::fmt::Display, context: impl Into<String>) -> Self {
        Error::UnknownOperator {
            op: op.to_string(),
            context: context.into(),
        }
    }

    /// Create an unsupported operand error
    pub fn unsupported_operand(
        opcode: impl std::fmt::Display,
        operand: impl std::fmt::Display,
    ) -> Self {
        Error::UnsupportedOperand {
            opcode: opcode.to_string(),
            operand: operand.to_string(),
        }
    }

    /// Create a register file error
    pub fn register_file(index: usize, msg: impl Into<String>) -> Self {
        Error::RegisterFile {
            index,
            message: msg.into(),
        }
    }

    /// Create an interpreter fault
    pub fn interpreter(pc: usize, msg: impl Into<String>) -> Self {
        Error::Interpreter {
            pc,
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, Error>;
