//! Typed values and their promotion rules
//!
//! Programs manipulate a small closed set of value kinds. Arithmetic between
//! different kinds widens both operands to the higher-ranked kind first; the
//! rank follows the type tag (`Bool < U8 < U32 < Float`). `Datetime` and
//! `Block16` never take part in arithmetic and only convert to themselves.

use std::fmt;
use std::ops::BitOr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Kind tag of a [`Value`]
///
/// The discriminants are the protocol's data type tags and are what
/// `GETTYPE` pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    /// No value; only seen in registers that were never stored to
    Undefined = 0x00,
    /// Boolean
    Bool = 0x01,
    /// Unsigned 8-bit integer
    U8 = 0x02,
    /// Unsigned 32-bit integer
    U32 = 0x03,
    /// Packed calendar date and time
    Datetime = 0x04,
    /// IEEE-754 single precision float
    Float = 0x05,
    /// Raw 16-byte block, usually an IPv6 address
    Block16 = 0x09,
}

impl ValueKind {
    /// Protocol type tag
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Bool, U8 or U32
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Bool | Self::U8 | Self::U32)
    }

    /// Integer kinds plus Float
    #[inline]
    pub const fn is_arithmetic(self) -> bool {
        self.is_integer() || matches!(self, Self::Float)
    }

    /// Short lowercase name, as used in listings and logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U32 => "u32",
            Self::Datetime => "datetime",
            Self::Float => "float",
            Self::Block16 => "block16",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common kind two arithmetic operands are widened to
///
/// Returns `None` unless both kinds are arithmetic.
pub fn promote_arith(a: ValueKind, b: ValueKind) -> Option<ValueKind> {
    if !a.is_arithmetic() || !b.is_arithmetic() {
        return None;
    }
    Some(if a.tag() >= b.tag() { a } else { b })
}

/// Common kind two integer operands are widened to
///
/// Returns `None` unless both kinds are integers.
pub fn promote_int(a: ValueKind, b: ValueKind) -> Option<ValueKind> {
    if !a.is_integer() || !b.is_integer() {
        return None;
    }
    Some(if a.tag() >= b.tag() { a } else { b })
}

/// Selects datetime fields for `LD_DT`, `DT_DECOMPOSE` and masked compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DtMask(pub u8);

impl DtMask {
    /// Seconds field
    pub const SECOND: Self = Self(0x01);
    /// Minutes field
    pub const MINUTE: Self = Self(0x02);
    /// Hours field
    pub const HOUR: Self = Self(0x04);
    /// Day of month
    pub const DAY: Self = Self(0x08);
    /// Month
    pub const MONTH: Self = Self(0x10);
    /// 16-bit year
    pub const YEAR: Self = Self(0x20);
    /// Day of week, 0 is Sunday
    pub const WEEKDAY: Self = Self(0x40);
    /// Every field
    pub const ALL: Self = Self(0x7F);
    /// No field
    pub const NONE: Self = Self(0);

    /// Raw mask byte
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DtMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Packed calendar date and time
///
/// Field ranges are not enforced; programs may carry any byte in any field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Datetime {
    /// 0..=59
    pub second: u8,
    /// 0..=59
    pub minute: u8,
    /// 0..=23
    pub hour: u8,
    /// 1..=31
    pub day: u8,
    /// 1..=12
    pub month: u8,
    /// Full year
    pub year: u16,
    /// 0..=6, Sunday first
    pub weekday: u8,
}

impl Datetime {
    /// Build from calendar fields, deriving the weekday
    ///
    /// Returns `None` for dates that do not exist.
    pub fn from_calendar(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Option<Self> {
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
            .and_then(|date| date.and_hms_opt(hour.into(), minute.into(), second.into()))
            .map(Self::from)
    }
}

impl From<NaiveDateTime> for Datetime {
    fn from(dt: NaiveDateTime) -> Self {
        Self {
            second: dt.second() as u8,
            minute: dt.minute() as u8,
            hour: dt.hour() as u8,
            day: dt.day() as u8,
            month: dt.month() as u8,
            year: u16::try_from(dt.year().max(0)).unwrap_or(u16::MAX),
            weekday: dt.weekday().num_days_from_sunday() as u8,
        }
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} wd{}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.weekday
        )
    }
}

/// A typed value on the operand stack, in a register, or in a trigger
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value
    #[default]
    Undefined,
    /// Boolean
    Bool(bool),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Single precision float
    Float(f32),
    /// Calendar date and time
    Datetime(Datetime),
    /// Raw 16 bytes
    Block16([u8; 16]),
}

impl Value {
    /// Kind tag of this value
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Undefined => ValueKind::Undefined,
            Self::Bool(_) => ValueKind::Bool,
            Self::U8(_) => ValueKind::U8,
            Self::U32(_) => ValueKind::U32,
            Self::Float(_) => ValueKind::Float,
            Self::Datetime(_) => ValueKind::Datetime,
            Self::Block16(_) => ValueKind::Block16,
        }
    }

    /// Integer payload widened to `u32`
    pub const fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::Bool(b) => Some(b as u32),
            Self::U8(v) => Some(v as u32),
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    /// Arithmetic payload widened to `f32`
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            _ => self.as_u32().map(|v| v as f32),
        }
    }

    /// Zero test for integers and floats
    pub fn is_zero(&self) -> Option<bool> {
        match *self {
            Self::Float(v) => Some(v == 0.0),
            _ => self.as_u32().map(|v| v == 0),
        }
    }

    /// Build an integer value of `kind` from a raw `u32`
    ///
    /// Bool takes the non-zero test and U8 keeps the low byte.
    pub fn from_u32(kind: ValueKind, raw: u32) -> Option<Self> {
        match kind {
            ValueKind::Bool => Some(Self::Bool(raw != 0)),
            ValueKind::U8 => Some(Self::U8((raw & 0xFF) as u8)),
            ValueKind::U32 => Some(Self::U32(raw)),
            _ => None,
        }
    }

    /// Explicit conversion between the arithmetic kinds
    ///
    /// Returns `None` when either side is not Bool, U8, U32 or Float.
    pub fn convert(&self, target: ValueKind) -> Option<Self> {
        if !target.is_arithmetic() || !self.kind().is_arithmetic() {
            return None;
        }
        if self.kind() == target {
            return Some(*self);
        }
        match *self {
            Self::Float(f) => match target {
                ValueKind::Bool => Some(Self::Bool(f != 0.0)),
                ValueKind::U8 => Some(Self::U8(((f as u32) & 0xFF) as u8)),
                ValueKind::U32 => Some(Self::U32(f as u32)),
                _ => None,
            },
            _ => {
                let raw = self.as_u32()?;
                match target {
                    ValueKind::Float => Some(Self::Float(raw as f32)),
                    _ => Self::from_u32(target, raw),
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::U8(v) => write!(f, "{v}u8"),
            Self::U32(v) => write!(f, "{v}u32"),
            Self::Float(v) => write!(f, "{v}f"),
            Self::Datetime(dt) => write!(f, "{dt}"),
            Self::Block16(bytes) => {
                for (i, pair) in bytes.chunks(2).enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:02x}{:02x}", pair[0], pair[1])?;
                }
                Ok(())
            }
        }
    }
}
