//! Error types for archive construction.

use thiserror::Error;

use crate::writer::State;

/// Errors that can occur while encoding headers or producing an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The path cannot be represented in the USTAR name/prefix fields, or a
    /// link target does not fit in the linkname field.
    #[error("name too long for ustar header ({len} bytes): {name}")]
    NameTooLong {
        /// The offending path or link target.
        name: String,
        /// Its length in bytes.
        len: usize,
    },

    /// A numeric value does not fit in the octal capacity of its field.
    #[error("{field} value {value} exceeds field capacity (max {limit})")]
    FieldOverflow {
        /// Header field name.
        field: &'static str,
        /// Value that was supplied.
        value: u64,
        /// Largest value the field can hold.
        limit: u64,
    },

    /// The metadata is structurally invalid for its entry type.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The content source yielded a different number of bytes than declared.
    #[error("size mismatch for {name}: declared {declared} bytes, source yielded {actual}")]
    SizeMismatch {
        /// Entry path.
        name: String,
        /// Size from the entry metadata.
        declared: u64,
        /// Bytes actually read before the mismatch was detected.
        actual: u64,
    },

    /// The operation is not permitted in the writer's current state.
    #[error("cannot {operation} while writer is {state:?}")]
    InvalidState {
        /// State the writer was in.
        state: State,
        /// The rejected operation.
        operation: &'static str,
    },

    /// I/O error from a content source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ArchiveError> for std::io::Error {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
