//! Tunables for archive production.

/// Default upper bound on content bytes per produced chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for an [`ArchiveWriter`](crate::ArchiveWriter).
///
/// # Example
///
/// ```
/// use ustar_stream::Options;
///
/// let options = Options {
///     chunk_size: 4096,
///     ..Default::default()
/// };
/// assert_eq!(options.default_mtime, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Maximum number of content bytes read from a source per pulled chunk.
    ///
    /// Headers, padding and the end-of-archive marker are emitted as their
    /// own chunks and are not bounded by this value. Zero is treated as one.
    ///
    /// Default: 64 KiB.
    pub chunk_size: usize,

    /// Modification time stamped on entries built from the filesystem,
    /// overriding the on-disk value. Useful for reproducible archives.
    ///
    /// Default: `None` (use each file's own mtime).
    pub default_mtime: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_mtime: None,
        }
    }
}

impl Options {
    /// Create `Options` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that read content one block at a time, keeping the
    /// per-pull memory footprint at a minimum.
    #[must_use]
    pub fn small_chunks() -> Self {
        Self {
            chunk_size: crate::header::BLOCK_SIZE,
            ..Self::default()
        }
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.chunk_size, 64 * 1024);
        assert_eq!(options.default_mtime, None);
        assert_eq!(Options::new(), options);
    }

    #[test]
    fn test_small_chunks() {
        assert_eq!(Options::small_chunks().chunk_size, 512);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let options = Options {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(options.effective_chunk_size(), 1);
    }
}
