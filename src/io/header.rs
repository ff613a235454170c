//! Format header shared by the binary tree formats.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic (0x4d415259, "MARY")
//! 4       4     Version
//! 8       4     Content type
//! ```

use std::io::{Read, Write};

use super::data::{DataReader, DataWriter};
use super::FormatError;

/// Magic number at the start of every binary tree file.
pub const MAGIC: u32 = 0x4d41_5259;

/// Format version written and accepted.
pub const VERSION: i32 = 40;

/// Content type declared in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FileType {
    Unknown = 0,
    /// Classification and regression trees.
    Carts = 100,
    /// Directed graphs with shared nodes.
    DirectedGraph = 110,
}

impl FileType {
    /// Convert from the on-disk value, returning None for unknown values.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            100 => Some(Self::Carts),
            110 => Some(Self::DirectedGraph),
            _ => None,
        }
    }
}

/// 12-byte header: magic, version and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaryHeader {
    pub version: i32,
    pub file_type: FileType,
}

impl MaryHeader {
    /// Create a header with the current version.
    pub fn new(file_type: FileType) -> Self {
        Self {
            version: VERSION,
            file_type,
        }
    }

    /// Read and check a header, failing before any field after a bad one
    /// is consumed.
    pub fn read_expecting<R: Read>(
        reader: &mut DataReader<R>,
        expected: FileType,
    ) -> Result<Self, FormatError> {
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(FormatError::NotACart { found: magic });
        }
        let version = reader.read_i32()?;
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion {
                found: version,
                expected: VERSION,
            });
        }
        let raw_type = reader.read_i32()?;
        match FileType::from_i32(raw_type) {
            Some(file_type) if file_type == expected => Ok(Self { version, file_type }),
            _ => Err(FormatError::TypeMismatch {
                expected,
                actual: raw_type,
            }),
        }
    }

    pub fn write<W: Write>(&self, writer: &mut DataWriter<W>) -> std::io::Result<()> {
        writer.write_u32(MAGIC)?;
        writer.write_i32(self.version)?;
        writer.write_i32(self.file_type as i32)
    }
}
