//! Human-readable listing of a program

use std::fmt::Write as _;

use crate::HEADER_LEN;
use crate::error::Result;
use crate::instruction::decode;
use crate::program::{EntryVector, Program};

/// Disassemble a program into one line per instruction
///
/// Lines read `offset  opcode  MNEMONIC operands`; entry points are tagged
/// with `<packet>` / `<periodic>`. Decoding is linear from the end of the
/// header and stops at the first undecodable byte with its error.
pub fn disassemble(program: &Program) -> Result<String> {
    let packet = usize::from(program.entry(EntryVector::Packet)?);
    let periodic = usize::from(program.entry(EntryVector::Periodic)?);
    let bytes = program.as_bytes();

    let mut out = String::new();
    let mut offset = HEADER_LEN;
    while offset < bytes.len() {
        let (insn, len) = decode(bytes, offset)?;
        let _ = write!(out, "{:04x}  {:02x}  {}", offset, bytes[offset], insn);
        if offset == packet {
            out.push_str("  <packet>");
        }
        if offset == periodic {
            out.push_str("  <periodic>");
        }
        out.push('\n');
        offset += len;
    }

    if out.is_empty() {
        out.push_str("(empty program)\n");
    }

    Ok(out)
}
