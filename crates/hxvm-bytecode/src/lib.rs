//! # Hexabus VM Bytecode
//!
//! This crate defines the program format run by the Hexabus rule VM.
//!
//! ## Design Principles
//!
//! - **Stack-based**: Operations consume and produce typed values on an operand stack
//! - **Compact**: Operand width is fixed per opcode, from 0 to 16 extra bytes
//! - **Big-endian**: Multi-byte fields match the wire protocol's byte order
//! - **Forward-only**: Jump skips are unsigned, so control flow cannot loop
//!
//! Decoding is a pure function of the program bytes and an offset. Nothing in
//! this crate executes instructions; see `hxvm-core` for the interpreter.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod cursor;
pub mod disasm;
pub mod error;
pub mod instruction;
pub mod program;
pub mod value;

pub use builder::ProgramBuilder;
pub use cursor::Cursor;
pub use disasm::disassemble;
pub use error::BytecodeError;
pub use instruction::{
    ArithOp, BitOp, DtCompare, Instruction, JumpCondition, Opcode, SwitchTable, SwitchWidth,
    decode,
};
pub use program::{EntryVector, Program};
pub use value::{Datetime, DtMask, Value, ValueKind};

/// Program format version expected in the first header byte
pub const PROGRAM_VERSION: u8 = 0;

/// Length of the program header: version byte plus two 16-bit entry offsets
pub const HEADER_LEN: usize = 5;

/// Largest program the 16-bit address space can hold
pub const MAX_PROGRAM_LEN: usize = u16::MAX as usize + 1;
