//! Program image and header

use crate::cursor::Cursor;
use crate::error::{BytecodeError, Result};
use crate::{HEADER_LEN, MAX_PROGRAM_LEN, PROGRAM_VERSION};

/// Which header slot a run starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryVector {
    /// Run caused by a received packet
    Packet,
    /// Run caused by the periodic timer
    Periodic,
}

impl EntryVector {
    /// Byte offset of the 16-bit entry field in the header
    #[inline]
    pub const fn header_offset(self) -> usize {
        match self {
            Self::Packet => 1,
            Self::Periodic => 3,
        }
    }

    /// Lowercase name for logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Packet => "packet",
            Self::Periodic => "periodic",
        }
    }
}

/// An immutable program image
///
/// Layout: version byte, packet entry (u16), periodic entry (u16), then the
/// instruction stream. Entry offsets are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Box<[u8]>,
}

impl Program {
    /// Wrap program bytes
    ///
    /// Only the size is checked here; the header is checked on every run, or
    /// up front with [`Program::validate`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_PROGRAM_LEN {
            return Err(BytecodeError::ProgramTooLarge(bytes.len()));
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// Raw program bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Program length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the program has no bytes at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Version byte, checked against [`PROGRAM_VERSION`]
    pub fn version(&self) -> Result<u8> {
        let version = Cursor::new(&self.bytes, 0).read_u8()?;
        if version != PROGRAM_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        Ok(version)
    }

    /// Start offset for a run entering through `vector`
    pub fn entry(&self, vector: EntryVector) -> Result<u16> {
        self.version()?;
        Cursor::new(&self.bytes, vector.header_offset()).read_u16()
    }

    /// Check the header without running anything
    ///
    /// Both entry offsets must point past the header and inside the program.
    pub fn validate(&self) -> Result<()> {
        for vector in [EntryVector::Packet, EntryVector::Periodic] {
            let entry = self.entry(vector)?;
            let at = usize::from(entry);
            if at < HEADER_LEN || at >= self.len() {
                return Err(BytecodeError::EntryOutOfBounds { entry });
            }
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Program {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
