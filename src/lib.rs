//! Streaming writer for POSIX USTAR archives.
//!
//! Entries are queued on an [`ArchiveWriter`] as metadata plus a lazily opened
//! [`Content`] source. The archive is then produced incrementally, either as
//! an iterator of byte chunks ([`ArchiveWriter::produce`]) or through
//! [`std::io::Read`] ([`ArchiveWriter::into_reader`]). Each entry is laid out
//! as a 512-byte header block followed by its content padded to a whole
//! number of blocks, and the archive ends with two zero blocks.
//!
//! ```
//! use std::io::Read;
//! use ustar_stream::{ArchiveWriter, Content, EntryMetadata};
//!
//! let mut writer = ArchiveWriter::new();
//! writer.append(EntryMetadata::directory("dir/"), Content::empty())?;
//! writer.append(EntryMetadata::file("dir/b.txt", 1), Content::from("x"))?;
//! writer.finalize();
//!
//! let mut archive = Vec::new();
//! writer.into_reader().read_to_end(&mut archive)?;
//! assert_eq!(archive.len(), 512 + 512 + 512 + 1024);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only plain USTAR headers are generated. Paths longer than 100 bytes are
//! stored using the USTAR prefix field; paths that cannot be split that way
//! are rejected with [`ArchiveError::NameTooLong`].

mod content;
mod error;
pub mod header;
mod options;
mod reader;
mod writer;

pub use content::Content;
pub use error::{ArchiveError, Result};
pub use header::{EntryMetadata, EntryType, HeaderBlock, BLOCK_SIZE, HEADER_SIZE};
pub use options::{Options, DEFAULT_CHUNK_SIZE};
pub use reader::ArchiveReader;
pub use writer::{ArchiveStream, ArchiveWriter, Entry, State, END_OF_ARCHIVE_LEN};
