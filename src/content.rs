//! Lazily opened, single-use content sources.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

type Opener = Box<dyn FnOnce() -> io::Result<Box<dyn Read + Send>> + Send>;

/// The byte content of one archive entry.
///
/// A `Content` is opened at most once, when emission reaches its entry, and
/// then read until exhaustion. Any backing store works: memory, a file on
/// disk, or an arbitrary reader.
pub struct Content {
    open: Opener,
}

impl Content {
    /// Content produced by calling `open` when the entry is emitted.
    pub fn lazy<F, R>(open: F) -> Self
    where
        F: FnOnce() -> io::Result<R> + Send + 'static,
        R: Read + Send + 'static,
    {
        Self {
            open: Box::new(move || -> io::Result<Box<dyn Read + Send>> {
                Ok(Box::new(open()?))
            }),
        }
    }

    /// Content with no bytes, for directories, links and device nodes.
    pub fn empty() -> Self {
        Self::from_reader(io::empty())
    }

    /// Content held in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self::lazy(move || Ok(Cursor::new(bytes)))
    }

    /// Content read from an already open reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::lazy(move || Ok(reader))
    }

    /// Content of the file at `path`. The file is not opened until the
    /// entry is emitted.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::lazy(move || File::open(path))
    }

    pub(crate) fn open(self) -> io::Result<Box<dyn Read + Send>> {
        (self.open)()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").finish_non_exhaustive()
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for Content {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_reader(bytes)
    }
}

impl From<&'static str> for Content {
    fn from(text: &'static str) -> Self {
        Self::from_reader(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    fn read_all(content: Content) -> Vec<u8> {
        let mut buf = vec![];
        content.open().unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(read_all(Content::from_bytes(b"abc".to_vec())), b"abc");
        assert_eq!(read_all(Content::from("xyz")), b"xyz");
        assert!(read_all(Content::empty()).is_empty());
    }

    #[test]
    fn test_lazy_is_not_opened_until_read() {
        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);
        let content = Content::lazy(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(Cursor::new(vec![1, 2, 3]))
        });
        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(read_all(content), [1, 2, 3]);
        assert!(opened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"on disk").unwrap();
        assert_eq!(read_all(Content::from_path(file.path())), b"on disk");
    }

    #[test]
    fn test_missing_path_fails_on_open() {
        let content = Content::from_path("/nonexistent/ustar-stream/file");
        assert!(content.open().is_err());
    }
}
