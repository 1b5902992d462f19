//! `std::io::Read` adapter over an [`ArchiveWriter`].

use std::io::{self, Read};

use log::debug;

use crate::writer::ArchiveWriter;

/// Reads the archive produced by an [`ArchiveWriter`].
///
/// Each `read` pulls at most one chunk from the writer, so copying from this
/// reader into a slow sink never runs ahead of the sink. Production errors
/// are returned as [`io::Error`]s wrapping the [`ArchiveError`].
///
/// [`ArchiveError`]: crate::ArchiveError
#[derive(Debug)]
pub struct ArchiveReader {
    writer: ArchiveWriter,
    chunk: Vec<u8>,
    pos: usize,
}

impl ArchiveReader {
    pub(crate) fn new(writer: ArchiveWriter) -> Self {
        Self {
            writer,
            chunk: Vec::new(),
            pos: 0,
        }
    }

    /// Recover the writer.
    ///
    /// If the archive was only partly read, the writer is aborted: unread
    /// bytes of the current chunk are gone, so production cannot resume.
    pub fn into_inner(mut self) -> ArchiveWriter {
        if self.pos < self.chunk.len() || self.writer.is_mid_production() {
            debug!(
                "archive reader released with {} unread buffered bytes",
                self.chunk.len() - self.pos
            );
            self.writer.abort();
        }
        self.writer
    }
}

impl Read for ArchiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.chunk.len() {
            match self.writer.next_chunk()? {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArchiveError, Content, EntryMetadata, State};

    #[test]
    fn test_read_matches_to_bytes() {
        let build = || {
            let mut writer = ArchiveWriter::new();
            writer
                .append(
                    EntryMetadata::file("a.txt", 3).with_mtime(7),
                    Content::from("abc"),
                )
                .unwrap();
            writer
                .append(EntryMetadata::directory("dir/").with_mtime(7), Content::empty())
                .unwrap();
            writer
        };

        let expected = build().to_bytes().unwrap();

        let mut reader = build().into_reader();
        let mut actual = Vec::new();
        // odd buffer size to cross chunk boundaries
        let mut buf = [0u8; 333];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            actual.extend_from_slice(&buf[..n]);
        }
        assert_eq!(actual, expected);
        assert_eq!(reader.into_inner().state(), State::Closed);
    }

    #[test]
    fn test_partial_read_aborts_recovered_writer() {
        let mut writer = ArchiveWriter::new();
        for name in ["a.txt", "b.txt"] {
            writer
                .append(EntryMetadata::file(name, 3), Content::from("abc"))
                .unwrap();
        }
        let mut reader = writer.into_reader();
        let mut buf = [0u8; 100];
        assert_eq!(reader.read(&mut buf).unwrap(), 100);

        let mut writer = reader.into_inner();
        assert_eq!(writer.state(), State::Aborted);
        assert!(matches!(
            writer.to_bytes(),
            Err(ArchiveError::InvalidState {
                state: State::Aborted,
                ..
            })
        ));
    }

    #[test]
    fn test_unread_writer_is_recovered_intact() {
        let mut writer = ArchiveWriter::new();
        writer
            .append(EntryMetadata::file("a.txt", 3), Content::from("abc"))
            .unwrap();
        let mut writer = writer.into_reader().into_inner();
        assert_eq!(writer.state(), State::Open);
        assert_eq!(writer.to_bytes().unwrap().len(), 2048);
    }

    #[test]
    fn test_error_surfaces_as_io_error() {
        let mut writer = ArchiveWriter::new();
        writer
            .append(EntryMetadata::file("short", 10), Content::from("abc"))
            .unwrap();
        let mut out = Vec::new();
        let err = io::copy(&mut writer.into_reader(), &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        let inner = err.into_inner().unwrap();
        assert!(matches!(
            inner.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::SizeMismatch { .. })
        ));
    }
}
