//! Program assembler
//!
//! Hosts that ship fixed rules, and the test suites, assemble programs here
//! instead of writing bytes by hand.

use crate::error::{BytecodeError, Result};
use crate::instruction::{Instruction, SwitchTable, SwitchWidth};
use crate::program::{EntryVector, Program};
use crate::{HEADER_LEN, PROGRAM_VERSION};

/// Builder for program images
///
/// The first operand that cannot be encoded is kept and reported by
/// [`ProgramBuilder::build`]; later calls are ignored.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    code: Vec<u8>,
    error: Option<BytecodeError>,
}

impl ProgramBuilder {
    /// Create a builder with an empty header
    ///
    /// Both entry vectors point at the first instruction until marked.
    pub fn new() -> Self {
        let mut code = vec![0u8; HEADER_LEN];
        code[0] = PROGRAM_VERSION;
        let start = (HEADER_LEN as u16).to_be_bytes();
        code[1..3].copy_from_slice(&start);
        code[3..5].copy_from_slice(&start);
        Self { code, error: None }
    }

    /// Offset the next instruction will be written at
    #[inline]
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Point `vector` at the current offset
    pub fn entry(mut self, vector: EntryVector) -> Self {
        if self.error.is_some() {
            return self;
        }
        match u16::try_from(self.code.len()) {
            Ok(offset) => {
                let at = vector.header_offset();
                self.code[at..at + 2].copy_from_slice(&offset.to_be_bytes());
            }
            Err(_) => self.error = Some(BytecodeError::ProgramTooLarge(self.code.len())),
        }
        self
    }

    /// Point the packet entry at the current offset
    pub fn packet_entry(self) -> Self {
        self.entry(EntryVector::Packet)
    }

    /// Point the periodic entry at the current offset
    pub fn periodic_entry(self) -> Self {
        self.entry(EntryVector::Periodic)
    }

    /// Append an instruction
    pub fn instruction(mut self, instruction: Instruction<'_>) -> Self {
        if self.error.is_none() {
            self.error = instruction.encode(&mut self.code).err();
        }
        self
    }

    /// Append several instructions
    pub fn instructions<'p>(self, instructions: impl IntoIterator<Item = Instruction<'p>>) -> Self {
        instructions
            .into_iter()
            .fold(self, |builder, insn| builder.instruction(insn))
    }

    /// Append a switch over `(value, skip)` cases
    ///
    /// Case values are truncated to `width`. More than 255 cases fail the
    /// build.
    pub fn switch(self, width: SwitchWidth, cases: &[(u32, u16)]) -> Self {
        let mut table = Vec::with_capacity(cases.len() * width.entry_len());
        for &(value, skip) in cases {
            let value = value.to_be_bytes();
            table.extend_from_slice(&value[4 - width.bytes()..]);
            table.extend_from_slice(&skip.to_be_bytes());
        }
        self.instruction(Instruction::Switch(SwitchTable::new(width, &table)))
    }

    /// Append a block compare of `data` against bytes `first..first + data.len()`
    ///
    /// Empty literals and ranges running past byte 15 fail the build.
    pub fn cmp_block(self, first: u8, data: &[u8]) -> Self {
        let last = match data.len() {
            0 => first,
            len => u8::try_from(usize::from(first) + len - 1).unwrap_or(u8::MAX),
        };
        self.instruction(Instruction::CmpBlock { first, last, data })
    }

    /// Append raw bytes
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Build the program, or report the first encoding failure
    pub fn build(self) -> Result<Program> {
        match self.error {
            Some(err) => Err(err),
            None => Program::new(self.code),
        }
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}
