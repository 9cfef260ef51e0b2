//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while reading a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// A read ran past the end of the program
    #[error("Unexpected end of program at offset {offset:#06x}")]
    UnexpectedEnd {
        /// Offset of the first byte that could not be read
        offset: usize,
    },

    /// Opcode byte with no matching instruction
    #[error("Invalid opcode {opcode:#04x} at offset {offset:#06x}")]
    InvalidOpcode {
        /// The offending byte
        opcode: u8,
        /// Where it was found
        offset: usize,
    },

    /// Block compare whose range is inverted or runs past byte 15
    #[error("Invalid block range {first}..={last}")]
    InvalidBlockRange {
        /// First compared byte
        first: u8,
        /// Last compared byte
        last: u8,
    },

    /// Block compare literal whose length does not match its range
    #[error("Block literal of {found} bytes for a range of {expected}")]
    BlockLengthMismatch {
        /// Bytes covered by the range
        expected: usize,
        /// Bytes supplied
        found: usize,
    },

    /// Switch table with more cases than the count byte holds
    #[error("Switch table of {0} cases exceeds 255")]
    TooManyCases(usize),

    /// Short jump whose skip does not fit one byte
    #[error("Short jump skip {0} exceeds 255")]
    ShortSkipOutOfRange(u16),

    /// Header version byte is not the supported version
    #[error("Unsupported program version: {0}")]
    UnsupportedVersion(u8),

    /// Entry vector pointing outside the program
    #[error("Entry offset {entry:#06x} is outside the program")]
    EntryOutOfBounds {
        /// The entry offset read from the header
        entry: u16,
    },

    /// Program does not fit the 16-bit address space
    #[error("Program of {0} bytes exceeds the address space")]
    ProgramTooLarge(usize),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
