//! Persistence codecs.
//!
//! Three incompatible grammars map onto the same in-memory trees:
//!
//! - [`binary`]: compact big-endian format with a flat node table
//! - [`wagon`]: nested-parenthesis text format and its length-prefixed
//!   binary packing
//! - [`hts`]: per-state text trees with id-based node resolution
//!
//! Every load either returns a complete, counted tree or an error; no
//! partial tree is ever handed out.

pub mod binary;
pub mod data;
pub mod header;
pub mod hts;
pub mod pdf;
pub mod properties;
pub mod schema;
pub mod wagon;

use thiserror::Error;

use crate::repr::{GraphError, LeafKind, SymbolTableError};
use crate::schema::SchemaError;

pub use binary::{BinaryReadOptions, BinaryReader, BinaryWriter};
pub use header::{FileType, MaryHeader, MAGIC, VERSION};
pub use hts::{HtsReadOptions, HtsReader, HtsTrees, SymbolTranslator};
pub use pdf::{PdfFormat, PdfTables};
pub use wagon::{WagonReadOptions, WagonReader, WagonTreeType, WagonWriteOptions, WagonWriter};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a tree.
#[derive(Debug, Error)]
pub enum FormatError {
    /// I/O error during reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream does not start with the expected magic number.
    #[error("not a tree file (magic {found:#010x})")]
    NotACart { found: u32 },

    /// Stream was written by an incompatible format version.
    #[error("unsupported format version {found}, expected {expected}")]
    UnsupportedVersion { found: i32, expected: i32 },

    /// Header declares a different content type.
    #[error("content type mismatch: expected {expected:?}, got {actual}")]
    TypeMismatch { expected: FileType, actual: i32 },

    /// Stream ended in the middle of a record.
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("unknown decision node tag {0}")]
    UnknownDecisionTag(i32),

    #[error("unknown leaf tag {0}")]
    UnknownLeafTag(i32),

    /// Leaf kind that the format can describe but not load.
    #[error("reading {} leaves is not supported", .0.type_name())]
    UnsupportedLeaf(LeafKind),

    /// N-ary node whose child count disagrees with the schema.
    #[error("feature '{feature}' has {expected} values, but decision node {node} has {actual} children")]
    ChildCountMismatch {
        node: usize,
        feature: String,
        expected: usize,
        actual: usize,
    },

    /// Child reference pointing outside the node tables.
    #[error("child reference {reference} out of range ({decisions} decision nodes, {leaves} leaves)")]
    DanglingReference {
        reference: i32,
        decisions: usize,
        leaves: usize,
    },

    /// Opening and closing brackets do not balance.
    #[error("bracket mismatch at line {line}: {message}")]
    BracketMismatch { line: usize, message: String },

    #[error("invalid line {line}: {message}")]
    InvalidLine { line: usize, message: String },

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unknown operator '{operator}' at line {line}")]
    UnknownOperator { line: usize, operator: String },

    /// Reference to a node id that has not been declared.
    #[error("unknown node id '{id}' at line {line}")]
    UnknownNode { line: usize, id: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Structure(#[from] GraphError),

    #[error(transparent)]
    SymbolTable(#[from] SymbolTableError),
}

impl FormatError {
    pub(crate) fn line(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidLine {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn value(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

/// Errors that can occur while writing a tree.
#[derive(Debug, Error)]
pub enum WriteError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Node or leaf kind the target format cannot hold.
    #[error("cannot write {0}")]
    Unsupported(String),

    #[error(transparent)]
    SymbolTable(#[from] SymbolTableError),
}
