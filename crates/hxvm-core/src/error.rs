//! VM error types

use hxvm_bytecode::{BytecodeError, Opcode, ValueKind};
use thiserror::Error;

/// Failure class reported to the host
///
/// Every error aborts the run; the class exists for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad header, undecodable instruction, or runaway program counter
    MalformedProgram,
    /// Operand kind not accepted by the operator
    Type,
    /// Stack over/underflow or bad register index
    Stack,
    /// Integer division or modulo by zero
    Arithmetic,
    /// Trigger data used by a periodic run
    Context,
}

impl ErrorKind {
    /// Lowercase name for logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::MalformedProgram => "malformed_program",
            Self::Type => "type",
            Self::Stack => "stack",
            Self::Arithmetic => "arithmetic",
            Self::Context => "context",
        }
    }
}

/// VM execution errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Operand kinds rejected by an instruction
    #[error("TypeError: {opcode} does not accept {found}")]
    TypeMismatch {
        /// Instruction that failed
        opcode: Opcode,
        /// Offending operand kind
        found: ValueKind,
    },

    /// Push beyond the usable stack depth
    #[error("StackError: operand stack overflow (limit {limit})")]
    StackOverflow {
        /// Usable depth at the time of the push
        limit: usize,
    },

    /// Fewer operands than the instruction needs
    #[error("StackError: {opcode} needs {needed} operands, stack holds {depth}")]
    StackUnderflow {
        /// Instruction that failed
        opcode: Opcode,
        /// Operands required
        needed: usize,
        /// Operands available
        depth: usize,
    },

    /// Register index past the register file
    #[error("StackError: register {0} out of range")]
    InvalidRegister(u8),

    /// Integer `DIV` or `MOD` with a zero divisor
    #[error("ArithmeticError: {0} by zero")]
    DivisionByZero(Opcode),

    /// Trigger load during a periodic run
    #[error("ContextError: {0} without a trigger")]
    MissingTrigger(Opcode),

    /// Program counter advanced past the program
    #[error("MalformedProgram: program counter {pc} out of range (length {len})")]
    PcOutOfRange {
        /// Counter that would have been used next
        pc: usize,
        /// Program length
        len: usize,
    },

    /// Header or instruction decode failure
    #[error("MalformedProgram: {0}")]
    Bytecode(#[from] BytecodeError),
}

impl VmError {
    /// Create a type mismatch
    pub fn type_mismatch(opcode: Opcode, found: ValueKind) -> Self {
        Self::TypeMismatch { opcode, found }
    }

    /// Create a stack underflow
    pub fn underflow(opcode: Opcode, needed: usize, depth: usize) -> Self {
        Self::StackUnderflow {
            opcode,
            needed,
            depth,
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeMismatch { .. } => ErrorKind::Type,
            Self::StackOverflow { .. } | Self::StackUnderflow { .. } | Self::InvalidRegister(_) => {
                ErrorKind::Stack
            }
            Self::DivisionByZero(_) => ErrorKind::Arithmetic,
            Self::MissingTrigger(_) => ErrorKind::Context,
            Self::PcOutOfRange { .. } | Self::Bytecode(_) => ErrorKind::MalformedProgram,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
