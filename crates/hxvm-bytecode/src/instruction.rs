//! Bytecode instructions (opcodes)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::{BytecodeError, Result};
use crate::value::{Datetime, DtMask, Value, ValueKind};

/// Bytecode opcodes
///
/// Stack-based instruction set. Operands, where present, follow the opcode
/// byte in big-endian order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Execution context ====================
    /// Push the trigger's source address (Block16)
    LdSourceIp = 0x00,
    /// Push the trigger's endpoint id (U32)
    LdSourceEid = 0x01,
    /// Push the trigger's value
    LdSourceVal = 0x02,
    /// Push the current state (U32)
    LdCurState = 0x03,
    /// Push seconds spent in the current state (U32)
    LdCurStateTime = 0x04,

    // ==================== Immediates ====================
    /// Push `false`
    LdFalse = 0x05,
    /// Push `true`
    LdTrue = 0x06,
    /// Push imm8 as U8
    LdU8 = 0x07,
    /// Push imm16 as U32
    LdU16 = 0x08,
    /// Push imm32 as U32
    LdU32 = 0x09,
    /// Push imm32 bits as Float
    LdFloat = 0x0A,
    /// Push a datetime literal; only masked fields are encoded
    LdDt = 0x0B,
    /// Push the wall-clock time as Datetime
    LdSysTime = 0x0C,

    // ==================== Registers ====================
    /// Push a copy of register\[imm8\]
    LdReg = 0x0D,
    /// Pop into register\[imm8\]
    StReg = 0x0E,

    // ==================== Arithmetic ====================
    /// lhs * rhs
    Mul = 0x0F,
    /// lhs / rhs
    Div = 0x10,
    /// lhs % rhs
    Mod = 0x11,
    /// lhs + rhs
    Add = 0x12,
    /// lhs - rhs
    Sub = 0x13,
    /// Seconds between two datetimes
    DtDiff = 0x14,

    // ==================== Bitwise ====================
    /// lhs & rhs
    And = 0x15,
    /// lhs | rhs
    Or = 0x16,
    /// lhs ^ rhs
    Xor = 0x17,
    /// !src
    Not = 0x18,
    /// lhs << rhs
    Shl = 0x19,
    /// lhs >> rhs
    Shr = 0x1A,

    // ==================== Stack ====================
    /// Duplicate the top value
    Dup = 0x1B,
    /// Duplicate the value imm8 below the top
    DupI = 0x1C,
    /// Swap the top two values
    Rot = 0x1D,
    /// Rotate the top imm8+1 values
    RotI = 0x1E,
    /// Push masked fields of a datetime
    DtDecompose = 0x1F,
    /// Replace a value by its type tag
    GetType = 0x20,
    /// Multi-way branch on 8-bit case values
    Switch8 = 0x21,
    /// Multi-way branch on 16-bit case values
    Switch16 = 0x22,
    /// Multi-way branch on 32-bit case values
    Switch32 = 0x23,

    // ==================== Comparison ====================
    /// Compare a byte range of a block against a literal
    CmpBlock = 0x24,
    /// Block is the unspecified address `::`
    CmpIpUndef = 0x25,
    /// Block is the loopback address `::1`
    CmpIpLo = 0x26,
    /// lhs < rhs
    CmpLt = 0x27,
    /// lhs <= rhs
    ///
    /// Older firmware evaluated `>=` here. Programs compiled against that
    /// behaviour must emit `CMP_GE` instead.
    CmpLe = 0x28,
    /// lhs > rhs
    CmpGt = 0x29,
    /// lhs >= rhs
    CmpGe = 0x2A,
    /// lhs == rhs
    CmpEq = 0x2B,
    /// lhs != rhs
    CmpNeq = 0x2C,
    /// Masked datetime less-than
    CmpDtLt = 0x2D,
    /// Masked datetime greater-or-equal
    CmpDtGe = 0x2E,

    // ==================== Conversion ====================
    /// Convert to Bool
    ConvB = 0x2F,
    /// Convert to U8
    ConvU8 = 0x30,
    /// Convert to U32
    ConvU32 = 0x31,
    /// Convert to Float
    ConvF = 0x32,

    // ==================== Control Flow ====================
    /// Skip imm16 bytes if non-zero
    Jnz = 0x33,
    /// Skip imm16 bytes if zero
    Jz = 0x34,
    /// Skip imm16 bytes
    Jump = 0x35,
    /// Skip imm8 bytes if non-zero
    JnzS = 0x36,
    /// Skip imm8 bytes if zero
    JzS = 0x37,
    /// Skip imm8 bytes
    JumpS = 0x38,

    // ==================== Effects ====================
    /// Write a value to an endpoint, push the result code
    Write = 0x39,
    /// Discard the top value
    Pop = 0x3A,
    /// Finish, moving to the popped state
    RetChange = 0x3B,
    /// Finish in the current state
    RetStay = 0x3C,
}

impl Opcode {
    /// Convert from raw byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::LdSourceIp),
            0x01 => Some(Self::LdSourceEid),
            0x02 => Some(Self::LdSourceVal),
            0x03 => Some(Self::LdCurState),
            0x04 => Some(Self::LdCurStateTime),
            0x05 => Some(Self::LdFalse),
            0x06 => Some(Self::LdTrue),
            0x07 => Some(Self::LdU8),
            0x08 => Some(Self::LdU16),
            0x09 => Some(Self::LdU32),
            0x0A => Some(Self::LdFloat),
            0x0B => Some(Self::LdDt),
            0x0C => Some(Self::LdSysTime),

            0x0D => Some(Self::LdReg),
            0x0E => Some(Self::StReg),

            0x0F => Some(Self::Mul),
            0x10 => Some(Self::Div),
            0x11 => Some(Self::Mod),
            0x12 => Some(Self::Add),
            0x13 => Some(Self::Sub),
            0x14 => Some(Self::DtDiff),

            0x15 => Some(Self::And),
            0x16 => Some(Self::Or),
            0x17 => Some(Self::Xor),
            0x18 => Some(Self::Not),
            0x19 => Some(Self::Shl),
            0x1A => Some(Self::Shr),

            0x1B => Some(Self::Dup),
            0x1C => Some(Self::DupI),
            0x1D => Some(Self::Rot),
            0x1E => Some(Self::RotI),
            0x1F => Some(Self::DtDecompose),
            0x20 => Some(Self::GetType),
            0x21 => Some(Self::Switch8),
            0x22 => Some(Self::Switch16),
            0x23 => Some(Self::Switch32),

            0x24 => Some(Self::CmpBlock),
            0x25 => Some(Self::CmpIpUndef),
            0x26 => Some(Self::CmpIpLo),
            0x27 => Some(Self::CmpLt),
            0x28 => Some(Self::CmpLe),
            0x29 => Some(Self::CmpGt),
            0x2A => Some(Self::CmpGe),
            0x2B => Some(Self::CmpEq),
            0x2C => Some(Self::CmpNeq),
            0x2D => Some(Self::CmpDtLt),
            0x2E => Some(Self::CmpDtGe),

            0x2F => Some(Self::ConvB),
            0x30 => Some(Self::ConvU8),
            0x31 => Some(Self::ConvU32),
            0x32 => Some(Self::ConvF),

            0x33 => Some(Self::Jnz),
            0x34 => Some(Self::Jz),
            0x35 => Some(Self::Jump),
            0x36 => Some(Self::JnzS),
            0x37 => Some(Self::JzS),
            0x38 => Some(Self::JumpS),

            0x39 => Some(Self::Write),
            0x3A => Some(Self::Pop),
            0x3B => Some(Self::RetChange),
            0x3C => Some(Self::RetStay),

            _ => None,
        }
    }

    /// Convert to raw byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Assembler mnemonic
    pub const fn name(self) -> &'static str {
        match self {
            Self::LdSourceIp => "LD_SOURCE_IP",
            Self::LdSourceEid => "LD_SOURCE_EID",
            Self::LdSourceVal => "LD_SOURCE_VAL",
            Self::LdCurState => "LD_CURSTATE",
            Self::LdCurStateTime => "LD_CURSTATETIME",
            Self::LdFalse => "LD_FALSE",
            Self::LdTrue => "LD_TRUE",
            Self::LdU8 => "LD_U8",
            Self::LdU16 => "LD_U16",
            Self::LdU32 => "LD_U32",
            Self::LdFloat => "LD_FLOAT",
            Self::LdDt => "LD_DT",
            Self::LdSysTime => "LD_SYSTIME",
            Self::LdReg => "LD_REG",
            Self::StReg => "ST_REG",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::DtDiff => "DT_DIFF",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Dup => "DUP",
            Self::DupI => "DUP_I",
            Self::Rot => "ROT",
            Self::RotI => "ROT_I",
            Self::DtDecompose => "DT_DECOMPOSE",
            Self::GetType => "GETTYPE",
            Self::Switch8 => "SWITCH_8",
            Self::Switch16 => "SWITCH_16",
            Self::Switch32 => "SWITCH_32",
            Self::CmpBlock => "CMP_BLOCK",
            Self::CmpIpUndef => "CMP_IP_UNDEF",
            Self::CmpIpLo => "CMP_IP_LO",
            Self::CmpLt => "CMP_LT",
            Self::CmpLe => "CMP_LE",
            Self::CmpGt => "CMP_GT",
            Self::CmpGe => "CMP_GE",
            Self::CmpEq => "CMP_EQ",
            Self::CmpNeq => "CMP_NEQ",
            Self::CmpDtLt => "CMP_DT_LT",
            Self::CmpDtGe => "CMP_DT_GE",
            Self::ConvB => "CONV_B",
            Self::ConvU8 => "CONV_U8",
            Self::ConvU32 => "CONV_U32",
            Self::ConvF => "CONV_F",
            Self::Jnz => "JNZ",
            Self::Jz => "JZ",
            Self::Jump => "JUMP",
            Self::JnzS => "JNZ_S",
            Self::JzS => "JZ_S",
            Self::JumpS => "JUMP_S",
            Self::Write => "WRITE",
            Self::Pop => "POP",
            Self::RetChange => "RET_CHANGE",
            Self::RetStay => "RET_STAY",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary operators that follow arithmetic promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Mod,
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
    /// Equal
    Eq,
    /// Not equal
    Neq,
}

/// Binary operators restricted to integer operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise exclusive or
    Xor,
    /// Left shift
    Shl,
    /// Logical right shift
    Shr,
}

/// Masked datetime comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtCompare {
    /// Not every masked field is `>=`
    Lt,
    /// Every masked field is `>=`
    Ge,
}

/// When a conditional jump applies its skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpCondition {
    /// Unconditional
    Always,
    /// Popped value is zero
    Zero,
    /// Popped value is non-zero
    NonZero,
}

/// Width of the case values in a switch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchWidth {
    /// One byte per case value
    W8,
    /// Two bytes per case value
    W16,
    /// Four bytes per case value
    W32,
}

impl SwitchWidth {
    /// Bytes per case value
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
        }
    }

    /// Bytes per (value, target) entry
    #[inline]
    pub const fn entry_len(self) -> usize {
        self.bytes() + 2
    }
}

/// Inline switch table borrowed from the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTable<'p> {
    width: SwitchWidth,
    entries: &'p [u8],
}

impl<'p> SwitchTable<'p> {
    /// Wrap raw entry bytes; `entries` must hold whole entries
    pub fn new(width: SwitchWidth, entries: &'p [u8]) -> Self {
        debug_assert_eq!(entries.len() % width.entry_len(), 0);
        Self { width, entries }
    }

    /// Case value width
    #[inline]
    pub fn width(&self) -> SwitchWidth {
        self.width
    }

    /// Number of cases
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len() / self.width.entry_len()
    }

    /// Whether the table has no cases
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entry bytes
    #[inline]
    pub fn raw(&self) -> &'p [u8] {
        self.entries
    }

    /// Cases in encoded order as (value, skip)
    pub fn cases(self) -> impl Iterator<Item = (u32, u16)> + 'p {
        let width = self.width;
        self.entries.chunks_exact(width.entry_len()).map(move |entry| {
            let (value, target) = entry.split_at(width.bytes());
            let value = value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            (value, u16::from_be_bytes([target[0], target[1]]))
        })
    }

    /// Skip for the first case equal to `value`
    pub fn lookup(&self, value: u32) -> Option<u16> {
        self.cases()
            .find_map(|(case, skip)| (case == value).then_some(skip))
    }
}

/// A decoded instruction
///
/// Operands that live inside the program (switch tables, block literals) are
/// borrowed rather than copied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction<'p> {
    // Execution context
    /// `LD_SOURCE_IP`
    LdSourceIp,
    /// `LD_SOURCE_EID`
    LdSourceEid,
    /// `LD_SOURCE_VAL`
    LdSourceVal,
    /// `LD_CURSTATE`
    LdCurState,
    /// `LD_CURSTATETIME`
    LdCurStateTime,
    /// `LD_SYSTIME`
    LdSysTime,

    // Immediates
    /// `LD_FALSE`
    LdFalse,
    /// `LD_TRUE`
    LdTrue,
    /// `LD_U8 imm8`
    LdU8(u8),
    /// `LD_U16 imm16`, pushed as U32
    LdU16(u16),
    /// `LD_U32 imm32`
    LdU32(u32),
    /// `LD_FLOAT imm32`
    LdFloat(f32),
    /// `LD_DT mask fields...`; unmasked fields are zero
    LdDt {
        /// Fields present in the encoding
        mask: DtMask,
        /// Literal with unmasked fields zeroed
        value: Datetime,
    },

    // Registers
    /// `LD_REG index`
    LdReg(u8),
    /// `ST_REG index`
    StReg(u8),

    // Operators
    /// Promoting arithmetic and comparisons
    Arith(ArithOp),
    /// Integer-only bit operations
    Bitwise(BitOp),
    /// `NOT`
    Not,
    /// `DT_DIFF`
    DtDiff,
    /// `CMP_DT_LT mask` / `CMP_DT_GE mask`
    DtCompare {
        /// Which comparison
        op: DtCompare,
        /// Fields taking part
        mask: DtMask,
    },

    // Stack
    /// `DUP`
    Dup,
    /// `DUP_I offset`
    DupI(u8),
    /// `ROT`
    Rot,
    /// `ROT_I offset`
    RotI(u8),
    /// `DT_DECOMPOSE mask`
    DtDecompose(DtMask),
    /// `GETTYPE`
    GetType,
    /// `POP`
    Pop,

    // Branching
    /// `SWITCH_8/16/32`
    Switch(SwitchTable<'p>),
    /// Conditional and unconditional forward jumps
    Jump {
        /// When the skip applies
        cond: JumpCondition,
        /// Bytes skipped past the end of this instruction
        skip: u16,
        /// Encoded with an 8-bit skip
        short: bool,
    },

    // Block predicates
    /// `CMP_BLOCK range literal`
    CmpBlock {
        /// First byte index compared
        first: u8,
        /// Last byte index compared, inclusive
        last: u8,
        /// `last - first + 1` literal bytes
        data: &'p [u8],
    },
    /// `CMP_IP_UNDEF`
    CmpIpUndef,
    /// `CMP_IP_LO`
    CmpIpLo,

    /// Conversion to one of the arithmetic kinds
    Convert(ValueKind),

    // Effects and terminals
    /// `WRITE`
    Write,
    /// `RET_CHANGE`
    RetChange,
    /// `RET_STAY`
    RetStay,
}

impl Instruction<'_> {
    /// Opcode this instruction is encoded with
    pub fn opcode(&self) -> Opcode {
        match *self {
            Self::LdSourceIp => Opcode::LdSourceIp,
            Self::LdSourceEid => Opcode::LdSourceEid,
            Self::LdSourceVal => Opcode::LdSourceVal,
            Self::LdCurState => Opcode::LdCurState,
            Self::LdCurStateTime => Opcode::LdCurStateTime,
            Self::LdSysTime => Opcode::LdSysTime,
            Self::LdFalse => Opcode::LdFalse,
            Self::LdTrue => Opcode::LdTrue,
            Self::LdU8(_) => Opcode::LdU8,
            Self::LdU16(_) => Opcode::LdU16,
            Self::LdU32(_) => Opcode::LdU32,
            Self::LdFloat(_) => Opcode::LdFloat,
            Self::LdDt { .. } => Opcode::LdDt,
            Self::LdReg(_) => Opcode::LdReg,
            Self::StReg(_) => Opcode::StReg,
            Self::Arith(op) => match op {
                ArithOp::Mul => Opcode::Mul,
                ArithOp::Div => Opcode::Div,
                ArithOp::Mod => Opcode::Mod,
                ArithOp::Add => Opcode::Add,
                ArithOp::Sub => Opcode::Sub,
                ArithOp::Lt => Opcode::CmpLt,
                ArithOp::Le => Opcode::CmpLe,
                ArithOp::Gt => Opcode::CmpGt,
                ArithOp::Ge => Opcode::CmpGe,
                ArithOp::Eq => Opcode::CmpEq,
                ArithOp::Neq => Opcode::CmpNeq,
            },
            Self::Bitwise(op) => match op {
                BitOp::And => Opcode::And,
                BitOp::Or => Opcode::Or,
                BitOp::Xor => Opcode::Xor,
                BitOp::Shl => Opcode::Shl,
                BitOp::Shr => Opcode::Shr,
            },
            Self::Not => Opcode::Not,
            Self::DtDiff => Opcode::DtDiff,
            Self::DtCompare { op: DtCompare::Lt, .. } => Opcode::CmpDtLt,
            Self::DtCompare { op: DtCompare::Ge, .. } => Opcode::CmpDtGe,
            Self::Dup => Opcode::Dup,
            Self::DupI(_) => Opcode::DupI,
            Self::Rot => Opcode::Rot,
            Self::RotI(_) => Opcode::RotI,
            Self::DtDecompose(_) => Opcode::DtDecompose,
            Self::GetType => Opcode::GetType,
            Self::Pop => Opcode::Pop,
            Self::Switch(table) => match table.width() {
                SwitchWidth::W8 => Opcode::Switch8,
                SwitchWidth::W16 => Opcode::Switch16,
                SwitchWidth::W32 => Opcode::Switch32,
            },
            Self::Jump { cond, short, .. } => match (cond, short) {
                (JumpCondition::NonZero, false) => Opcode::Jnz,
                (JumpCondition::Zero, false) => Opcode::Jz,
                (JumpCondition::Always, false) => Opcode::Jump,
                (JumpCondition::NonZero, true) => Opcode::JnzS,
                (JumpCondition::Zero, true) => Opcode::JzS,
                (JumpCondition::Always, true) => Opcode::JumpS,
            },
            Self::CmpBlock { .. } => Opcode::CmpBlock,
            Self::CmpIpUndef => Opcode::CmpIpUndef,
            Self::CmpIpLo => Opcode::CmpIpLo,
            Self::Convert(kind) => match kind {
                ValueKind::Bool => Opcode::ConvB,
                ValueKind::U8 => Opcode::ConvU8,
                ValueKind::U32 => Opcode::ConvU32,
                _ => Opcode::ConvF,
            },
            Self::Write => Opcode::Write,
            Self::RetChange => Opcode::RetChange,
            Self::RetStay => Opcode::RetStay,
        }
    }

    /// Literal pushed by an immediate load
    pub fn immediate(&self) -> Option<Value> {
        match *self {
            Self::LdFalse => Some(Value::Bool(false)),
            Self::LdTrue => Some(Value::Bool(true)),
            Self::LdU8(v) => Some(Value::U8(v)),
            Self::LdU16(v) => Some(Value::U32(v.into())),
            Self::LdU32(v) => Some(Value::U32(v)),
            Self::LdFloat(v) => Some(Value::Float(v)),
            Self::LdDt { value, .. } => Some(Value::Datetime(value)),
            _ => None,
        }
    }

    /// Append the encoded form to `out`
    ///
    /// Fails, leaving `out` untouched, for operands the encoding cannot
    /// represent: block ranges outside `0..=15` or not matching the literal,
    /// switch tables over 255 cases and short jumps over 255 bytes.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.check_operands()?;
        out.push(self.opcode().to_byte());
        match *self {
            Self::LdU8(v) | Self::LdReg(v) | Self::StReg(v) | Self::DupI(v) | Self::RotI(v) => {
                out.push(v)
            }
            Self::LdU16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::LdU32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::LdFloat(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::LdDt { mask, value } => {
                out.push(mask.bits());
                if mask.contains(DtMask::SECOND) {
                    out.push(value.second);
                }
                if mask.contains(DtMask::MINUTE) {
                    out.push(value.minute);
                }
                if mask.contains(DtMask::HOUR) {
                    out.push(value.hour);
                }
                if mask.contains(DtMask::DAY) {
                    out.push(value.day);
                }
                if mask.contains(DtMask::MONTH) {
                    out.push(value.month);
                }
                if mask.contains(DtMask::YEAR) {
                    out.extend_from_slice(&value.year.to_be_bytes());
                }
                if mask.contains(DtMask::WEEKDAY) {
                    out.push(value.weekday);
                }
            }
            Self::DtCompare { mask, .. } | Self::DtDecompose(mask) => out.push(mask.bits()),
            Self::Switch(table) => {
                // counts and short skips were range checked above
                out.push(table.len() as u8);
                out.extend_from_slice(table.raw());
            }
            Self::Jump { skip, short, .. } => {
                if short {
                    out.push(skip as u8);
                } else {
                    out.extend_from_slice(&skip.to_be_bytes());
                }
            }
            Self::CmpBlock { first, last, data } => {
                out.push((first << 4) | last);
                out.extend_from_slice(data);
            }
            _ => {}
        }
        Ok(())
    }

    fn check_operands(&self) -> Result<()> {
        match *self {
            Self::Switch(table) if table.len() > usize::from(u8::MAX) => {
                Err(BytecodeError::TooManyCases(table.len()))
            }
            Self::Jump {
                skip, short: true, ..
            } if skip > u16::from(u8::MAX) => Err(BytecodeError::ShortSkipOutOfRange(skip)),
            Self::CmpBlock { first, last, data } => {
                if first > last || last > 0x0F {
                    return Err(BytecodeError::InvalidBlockRange { first, last });
                }
                let expected = usize::from(last - first) + 1;
                if data.len() != expected {
                    return Err(BytecodeError::BlockLengthMismatch {
                        expected,
                        found: data.len(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match *self {
            Self::LdU8(v) | Self::LdReg(v) | Self::StReg(v) | Self::DupI(v) | Self::RotI(v) => {
                write!(f, "{name} {v}")
            }
            Self::LdU16(v) => write!(f, "{name} {v}"),
            Self::LdU32(v) => write!(f, "{name} {v}"),
            Self::LdFloat(v) => write!(f, "{name} {v}"),
            Self::LdDt { mask, value } => write!(f, "{name} mask={:#04x} {value}", mask.bits()),
            Self::DtCompare { mask, .. } | Self::DtDecompose(mask) => {
                write!(f, "{name} mask={:#04x}", mask.bits())
            }
            Self::Switch(table) => {
                write!(f, "{name} [")?;
                for (i, (value, skip)) in table.cases().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value} => +{skip}")?;
                }
                f.write_str("]")
            }
            Self::Jump { skip, .. } => write!(f, "{name} +{skip}"),
            Self::CmpBlock { first, last, data } => {
                write!(f, "{name} [{first}..={last}] ")?;
                for b in data {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            _ => f.write_str(name),
        }
    }
}

/// Decode the instruction at `offset`
///
/// Returns the instruction and its encoded length. Fails on truncated
/// operands, unknown opcodes, and block compares whose range is inverted.
pub fn decode(program: &[u8], offset: usize) -> Result<(Instruction<'_>, usize)> {
    let mut cursor = Cursor::new(program, offset);
    let byte = cursor.read_u8()?;
    let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode {
        opcode: byte,
        offset,
    })?;

    let instruction = match opcode {
        Opcode::LdSourceIp => Instruction::LdSourceIp,
        Opcode::LdSourceEid => Instruction::LdSourceEid,
        Opcode::LdSourceVal => Instruction::LdSourceVal,
        Opcode::LdCurState => Instruction::LdCurState,
        Opcode::LdCurStateTime => Instruction::LdCurStateTime,
        Opcode::LdSysTime => Instruction::LdSysTime,

        Opcode::LdFalse => Instruction::LdFalse,
        Opcode::LdTrue => Instruction::LdTrue,
        Opcode::LdU8 => Instruction::LdU8(cursor.read_u8()?),
        Opcode::LdU16 => Instruction::LdU16(cursor.read_u16()?),
        Opcode::LdU32 => Instruction::LdU32(cursor.read_u32()?),
        Opcode::LdFloat => Instruction::LdFloat(cursor.read_f32()?),
        Opcode::LdDt => {
            let mask = DtMask(cursor.read_u8()?);
            let mut value = Datetime::default();
            if mask.contains(DtMask::SECOND) {
                value.second = cursor.read_u8()?;
            }
            if mask.contains(DtMask::MINUTE) {
                value.minute = cursor.read_u8()?;
            }
            if mask.contains(DtMask::HOUR) {
                value.hour = cursor.read_u8()?;
            }
            if mask.contains(DtMask::DAY) {
                value.day = cursor.read_u8()?;
            }
            if mask.contains(DtMask::MONTH) {
                value.month = cursor.read_u8()?;
            }
            if mask.contains(DtMask::YEAR) {
                value.year = cursor.read_u16()?;
            }
            if mask.contains(DtMask::WEEKDAY) {
                value.weekday = cursor.read_u8()?;
            }
            Instruction::LdDt { mask, value }
        }

        Opcode::LdReg => Instruction::LdReg(cursor.read_u8()?),
        Opcode::StReg => Instruction::StReg(cursor.read_u8()?),

        Opcode::Mul => Instruction::Arith(ArithOp::Mul),
        Opcode::Div => Instruction::Arith(ArithOp::Div),
        Opcode::Mod => Instruction::Arith(ArithOp::Mod),
        Opcode::Add => Instruction::Arith(ArithOp::Add),
        Opcode::Sub => Instruction::Arith(ArithOp::Sub),
        Opcode::CmpLt => Instruction::Arith(ArithOp::Lt),
        Opcode::CmpLe => Instruction::Arith(ArithOp::Le),
        Opcode::CmpGt => Instruction::Arith(ArithOp::Gt),
        Opcode::CmpGe => Instruction::Arith(ArithOp::Ge),
        Opcode::CmpEq => Instruction::Arith(ArithOp::Eq),
        Opcode::CmpNeq => Instruction::Arith(ArithOp::Neq),

        Opcode::And => Instruction::Bitwise(BitOp::And),
        Opcode::Or => Instruction::Bitwise(BitOp::Or),
        Opcode::Xor => Instruction::Bitwise(BitOp::Xor),
        Opcode::Shl => Instruction::Bitwise(BitOp::Shl),
        Opcode::Shr => Instruction::Bitwise(BitOp::Shr),
        Opcode::Not => Instruction::Not,

        Opcode::DtDiff => Instruction::DtDiff,
        Opcode::CmpDtLt => Instruction::DtCompare {
            op: DtCompare::Lt,
            mask: DtMask(cursor.read_u8()?),
        },
        Opcode::CmpDtGe => Instruction::DtCompare {
            op: DtCompare::Ge,
            mask: DtMask(cursor.read_u8()?),
        },

        Opcode::Dup => Instruction::Dup,
        Opcode::DupI => Instruction::DupI(cursor.read_u8()?),
        Opcode::Rot => Instruction::Rot,
        Opcode::RotI => Instruction::RotI(cursor.read_u8()?),
        Opcode::DtDecompose => Instruction::DtDecompose(DtMask(cursor.read_u8()?)),
        Opcode::GetType => Instruction::GetType,
        Opcode::Pop => Instruction::Pop,

        Opcode::Switch8 | Opcode::Switch16 | Opcode::Switch32 => {
            let width = match opcode {
                Opcode::Switch8 => SwitchWidth::W8,
                Opcode::Switch16 => SwitchWidth::W16,
                _ => SwitchWidth::W32,
            };
            let count = usize::from(cursor.read_u8()?);
            let entries = cursor.read_slice(count * width.entry_len())?;
            Instruction::Switch(SwitchTable::new(width, entries))
        }

        Opcode::Jnz => jump(JumpCondition::NonZero, cursor.read_u16()?, false),
        Opcode::Jz => jump(JumpCondition::Zero, cursor.read_u16()?, false),
        Opcode::Jump => jump(JumpCondition::Always, cursor.read_u16()?, false),
        Opcode::JnzS => jump(JumpCondition::NonZero, cursor.read_u8()?.into(), true),
        Opcode::JzS => jump(JumpCondition::Zero, cursor.read_u8()?.into(), true),
        Opcode::JumpS => jump(JumpCondition::Always, cursor.read_u8()?.into(), true),

        Opcode::CmpBlock => {
            let range = cursor.read_u8()?;
            let (first, last) = (range >> 4, range & 0x0F);
            if first > last {
                return Err(BytecodeError::InvalidBlockRange { first, last });
            }
            let data = cursor.read_slice(usize::from(last - first) + 1)?;
            Instruction::CmpBlock { first, last, data }
        }
        Opcode::CmpIpUndef => Instruction::CmpIpUndef,
        Opcode::CmpIpLo => Instruction::CmpIpLo,

        Opcode::ConvB => Instruction::Convert(ValueKind::Bool),
        Opcode::ConvU8 => Instruction::Convert(ValueKind::U8),
        Opcode::ConvU32 => Instruction::Convert(ValueKind::U32),
        Opcode::ConvF => Instruction::Convert(ValueKind::Float),

        Opcode::Write => Instruction::Write,
        Opcode::RetChange => Instruction::RetChange,
        Opcode::RetStay => Instruction::RetStay,
    };

    Ok((instruction, cursor.position() - offset))
}

fn jump<'p>(cond: JumpCondition, skip: u16, short: bool) -> Instruction<'p> {
    Instruction::Jump { cond, skip, short }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0x00..=0x3C {
            let op = Opcode::from_byte(byte).unwrap();
            assert_eq!(op.to_byte(), byte);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_byte(0x3D), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
        assert_eq!(
            decode(&[0x00, 0xFF], 1),
            Err(BytecodeError::InvalidOpcode {
                opcode: 0xFF,
                offset: 1
            })
        );
    }

    #[test]
    fn test_opcode_name() {
        assert_eq!(Opcode::LdCurStateTime.name(), "LD_CURSTATETIME");
        assert_eq!(Opcode::Switch16.name(), "SWITCH_16");
        assert_eq!(Opcode::RetChange.name(), "RET_CHANGE");
    }

    #[test]
    fn test_decode_immediates() {
        let code = [0x08, 0x12, 0x34, 0x0A, 0x3F, 0xC0, 0x00, 0x00];
        let (insn, len) = decode(&code, 0).unwrap();
        assert_eq!(insn, Instruction::LdU16(0x1234));
        assert_eq!(len, 3);
        assert_eq!(insn.immediate(), Some(Value::U32(0x1234)));

        let (insn, len) = decode(&code, 3).unwrap();
        assert_eq!(insn.immediate(), Some(Value::Float(1.5)));
        assert_eq!(len, 5);
    }

    #[test]
    fn test_decode_partial_datetime() {
        // hour 7, year 2013; everything else stays zero
        let code = [0x0B, 0x24, 7, 0x07, 0xDD];
        let (insn, len) = decode(&code, 0).unwrap();
        assert_eq!(len, 5);
        let Instruction::LdDt { mask, value } = insn else {
            panic!("expected LD_DT, got {insn:?}");
        };
        assert_eq!(mask, DtMask::HOUR | DtMask::YEAR);
        assert_eq!(value.hour, 7);
        assert_eq!(value.year, 2013);
        assert_eq!((value.second, value.day, value.weekday), (0, 0, 0));
    }

    #[test]
    fn test_decode_truncated_operand() {
        assert!(matches!(
            decode(&[0x09, 0x00, 0x01], 0),
            Err(BytecodeError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            decode(&[0x0B, 0x20, 0x07], 0),
            Err(BytecodeError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            decode(&[0x12], 1),
            Err(BytecodeError::UnexpectedEnd { offset: 1 })
        ));
    }

    #[test]
    fn test_decode_switch_table() {
        // two 16-bit cases: 7 => +3, 0x0102 => +9
        let code = [0x22, 2, 0x00, 0x07, 0x00, 0x03, 0x01, 0x02, 0x00, 0x09];
        let (insn, len) = decode(&code, 0).unwrap();
        assert_eq!(len, code.len());
        let Instruction::Switch(table) = insn else {
            panic!("expected switch, got {insn:?}");
        };
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(7), Some(3));
        assert_eq!(table.lookup(0x0102), Some(9));
        assert_eq!(table.lookup(8), None);
    }

    #[test]
    fn test_decode_switch_first_match_wins() {
        let code = [0x21, 2, 5, 0x00, 0x01, 5, 0x00, 0x02];
        let (Instruction::Switch(table), _) = decode(&code, 0).unwrap() else {
            panic!("expected switch");
        };
        assert_eq!(table.lookup(5), Some(1));
    }

    #[test]
    fn test_decode_switch_truncated_table() {
        let code = [0x23, 1, 0x00, 0x00, 0x00, 0x01, 0x00];
        assert!(matches!(
            decode(&code, 0),
            Err(BytecodeError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_decode_block_compare() {
        // bytes 14..=15 must equal 00 01
        let code = [0x24, 0xEF, 0x00, 0x01];
        let (insn, len) = decode(&code, 0).unwrap();
        assert_eq!(len, 4);
        assert_eq!(
            insn,
            Instruction::CmpBlock {
                first: 14,
                last: 15,
                data: &[0x00, 0x01]
            }
        );
    }

    #[test]
    fn test_decode_block_compare_inverted_range() {
        assert_eq!(
            decode(&[0x24, 0x51, 0, 0, 0, 0, 0], 0),
            Err(BytecodeError::InvalidBlockRange { first: 5, last: 1 })
        );
    }

    #[test]
    fn test_decode_jumps() {
        let (insn, len) = decode(&[0x34, 0x01, 0x00], 0).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            insn,
            Instruction::Jump {
                cond: JumpCondition::Zero,
                skip: 256,
                short: false
            }
        );
        let (insn, len) = decode(&[0x38, 0x07], 0).unwrap();
        assert_eq!(len, 2);
        assert_eq!(insn.opcode(), Opcode::JumpS);
    }

    #[test]
    fn test_encode_matches_decode() {
        let table = [0x00, 0x00, 0x00, 0x2A, 0x00, 0x10];
        let block = [0xAA, 0xBB, 0xCC];
        let samples = [
            Instruction::LdU32(0xDEAD_BEEF),
            Instruction::LdDt {
                mask: DtMask::ALL,
                value: Datetime::from_calendar(2015, 6, 1, 12, 30, 45).unwrap(),
            },
            Instruction::Switch(SwitchTable::new(SwitchWidth::W32, &table)),
            Instruction::CmpBlock {
                first: 2,
                last: 4,
                data: &block,
            },
            Instruction::Convert(ValueKind::Float),
        ];
        for insn in samples {
            let mut bytes = Vec::new();
            insn.encode(&mut bytes).unwrap();
            let (decoded, len) = decode(&bytes, 0).unwrap();
            assert_eq!(decoded, insn);
            assert_eq!(len, bytes.len());
        }
    }

    #[test]
    fn test_encode_rejects_unrepresentable_block() {
        let mut out = Vec::new();
        let empty = Instruction::CmpBlock {
            first: 3,
            last: 3,
            data: &[],
        };
        assert_eq!(
            empty.encode(&mut out),
            Err(BytecodeError::BlockLengthMismatch {
                expected: 1,
                found: 0
            })
        );
        let past_end = Instruction::CmpBlock {
            first: 14,
            last: 16,
            data: &[1, 2, 3],
        };
        assert_eq!(
            past_end.encode(&mut out),
            Err(BytecodeError::InvalidBlockRange { first: 14, last: 16 })
        );
        let wide_first = Instruction::CmpBlock {
            first: 16,
            last: 16,
            data: &[1],
        };
        assert!(wide_first.encode(&mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_encode_rejects_oversized_switch() {
        let table = vec![0u8; 256 * 3];
        let insn = Instruction::Switch(SwitchTable::new(SwitchWidth::W8, &table));
        let mut out = Vec::new();
        assert_eq!(insn.encode(&mut out), Err(BytecodeError::TooManyCases(256)));
        assert!(out.is_empty());

        let table = vec![0u8; 255 * 3];
        let insn = Instruction::Switch(SwitchTable::new(SwitchWidth::W8, &table));
        insn.encode(&mut out).unwrap();
        assert_eq!(out[1], 255);
    }

    #[test]
    fn test_encode_rejects_long_short_jump() {
        let insn = Instruction::Jump {
            cond: JumpCondition::Always,
            skip: 256,
            short: true,
        };
        let mut out = Vec::new();
        assert_eq!(
            insn.encode(&mut out),
            Err(BytecodeError::ShortSkipOutOfRange(256))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::LdU8(10).to_string(), "LD_U8 10");
        assert_eq!(
            Instruction::Jump {
                cond: JumpCondition::Zero,
                skip: 2,
                short: true
            }
            .to_string(),
            "JZ_S +2"
        );
        assert_eq!(Instruction::Arith(ArithOp::Gt).to_string(), "CMP_GT");
    }
}
