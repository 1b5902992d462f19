//! Pull-based archive producer.
//!
//! An [`ArchiveWriter`] collects entries and turns them into the tar byte
//! stream one chunk at a time. Nothing is read from a content source until a
//! consumer pulls the chunk that needs it, so a slow consumer throttles the
//! whole pipeline and the archive is never held in memory at once.
//!
//! ```
//! use ustar_stream::{ArchiveWriter, Content, EntryMetadata};
//!
//! let mut writer = ArchiveWriter::new();
//! writer
//!     .append(EntryMetadata::file("hello.txt", 5), Content::from("hello"))
//!     .unwrap();
//! writer.finalize();
//!
//! let mut total = 0;
//! for chunk in writer.produce() {
//!     total += chunk.unwrap().len();
//! }
//! assert_eq!(total, 1536);
//! ```

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;

use log::{debug, trace};

use crate::content::Content;
use crate::error::{ArchiveError, Result};
use crate::header::{padded_len, EntryMetadata, BLOCK_SIZE};
use crate::options::Options;
use crate::reader::ArchiveReader;

/// Size of the end-of-archive marker: two zero blocks.
pub const END_OF_ARCHIVE_LEN: usize = 2 * BLOCK_SIZE;

/// Lifecycle of an [`ArchiveWriter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Accepting entries.
    Open,
    /// No more entries; the pending ones are being (or will be) emitted.
    Finalizing,
    /// The end-of-archive marker has been produced.
    Closed,
    /// Production failed or was cancelled; nothing more will be produced.
    Aborted,
}

/// One archive member: its metadata and the source of its bytes.
#[derive(Debug)]
pub struct Entry {
    pub metadata: EntryMetadata,
    pub content: Content,
}

/// Where the producer is within the archive.
enum Emit {
    /// Between entries: the next pull starts an entry or ends the archive.
    Idle,
    /// Streaming the content of an entry whose header has been produced.
    Content(InFlight),
    /// Nothing more to produce.
    Done,
}

struct InFlight {
    name: String,
    reader: Box<dyn Read + Send>,
    declared: u64,
    emitted: u64,
}

impl InFlight {
    /// Read the next content chunk, or `None` once the source is exhausted
    /// and its length matched the declared size.
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Option<Vec<u8>>> {
        let remaining = self.declared - self.emitted;
        // With nothing left to read, still ask for one byte to catch sources
        // that run past their declared size.
        let want = usize::try_from(remaining)
            .map_or(chunk_size, |r| r.min(chunk_size))
            .max(1);
        let mut buf = vec![0u8; want];

        let n = loop {
            match self.reader.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n == 0 {
            if self.emitted != self.declared {
                return Err(self.mismatch(self.emitted));
            }
            return Ok(None);
        }
        if remaining == 0 {
            return Err(self.mismatch(self.declared + n as u64));
        }

        self.emitted += n as u64;
        buf.truncate(n);
        trace!("{}: {} content bytes ({}/{})", self.name, n, self.emitted, self.declared);
        Ok(Some(buf))
    }

    fn mismatch(&self, actual: u64) -> ArchiveError {
        ArchiveError::SizeMismatch {
            name: self.name.clone(),
            declared: self.declared,
            actual,
        }
    }
}

/// Builds a USTAR archive from queued entries, producing it on demand.
///
/// Lifecycle: `Open → (append)* → finalize → Finalizing → Closed`. A failed
/// or cancelled production moves the writer to [`State::Aborted`].
pub struct ArchiveWriter {
    pending: VecDeque<Entry>,
    state: State,
    emit: Emit,
    options: Options,
    entries_started: usize,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("entries_started", &self.entries_started)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Create an open writer with default [`Options`].
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            pending: VecDeque::new(),
            state: State::Open,
            emit: Emit::Idle,
            options,
            entries_started: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Entries not yet started, in emission order.
    pub fn pending(&self) -> impl ExactSizeIterator<Item = &EntryMetadata> {
        self.pending.iter().map(|entry| &entry.metadata)
    }

    /// Queue an entry at the end of the archive.
    ///
    /// The header is encoded once here so that invalid metadata is reported
    /// immediately; the content is not touched. On error the writer is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::InvalidState`] once [`finalize`](Self::finalize) has
    /// been called or production has started, or any header encoding error.
    pub fn append(&mut self, metadata: EntryMetadata, content: impl Into<Content>) -> Result<()> {
        if self.state != State::Open {
            return Err(ArchiveError::InvalidState {
                state: self.state,
                operation: "append",
            });
        }
        metadata.encode()?;
        trace!("queued {} ({} bytes)", metadata.name, metadata.size);
        self.pending.push_back(Entry {
            metadata,
            content: content.into(),
        });
        Ok(())
    }

    /// Stop accepting entries. Idempotent.
    pub fn finalize(&mut self) {
        if self.state == State::Open {
            debug!("finalizing archive with {} entries", self.pending.len());
            self.state = State::Finalizing;
        }
    }

    /// Exact number of bytes the whole archive will occupy: each entry's
    /// header and block-padded content, plus the end-of-archive marker.
    ///
    /// Computed from declared sizes only, without opening any source.
    /// Returns `None` once production has started (or the writer is closed
    /// or aborted), since part of the archive has already been handed out.
    #[must_use]
    pub fn archive_size(&self) -> Option<u64> {
        let started = match self.state {
            State::Open | State::Finalizing => self.entries_started > 0,
            State::Closed | State::Aborted => true,
        };
        if started {
            return None;
        }
        let entries: u64 = self.pending().map(EntryMetadata::archived_len).sum();
        Some(entries + END_OF_ARCHIVE_LEN as u64)
    }

    /// Pull-based view of the archive bytes.
    ///
    /// Each call to `next` on the returned stream does just enough work to
    /// produce one chunk: a header block, one content chunk of at most
    /// [`Options::chunk_size`] bytes, an entry's zero padding, or the
    /// end-of-archive marker. An open writer is finalized implicitly.
    ///
    /// After the archive is complete the stream is empty. After a failure or
    /// cancellation it yields a single [`ArchiveError::InvalidState`].
    pub fn produce(&mut self) -> ArchiveStream<'_> {
        ArchiveStream {
            writer: self,
            done: false,
        }
    }

    /// Drain [`produce`](Self::produce) into one buffer.
    ///
    /// The buffer grows with the bytes actually produced, never with the
    /// declared sizes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.produce()
            .try_fold(Vec::new(), |mut buf, chunk| {
                buf.extend_from_slice(&chunk?);
                Ok(buf)
            })
    }

    /// Turn this writer into a [`std::io::Read`] over the archive bytes.
    pub fn into_reader(self) -> ArchiveReader {
        ArchiveReader::new(self)
    }

    pub(crate) fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.state {
            State::Closed => return Ok(None),
            State::Aborted => {
                return Err(ArchiveError::InvalidState {
                    state: State::Aborted,
                    operation: "produce",
                })
            }
            State::Open => self.finalize(),
            State::Finalizing => {}
        }

        self.step().inspect_err(|err| {
            debug!("archive production failed: {err}");
            self.abort();
        })
    }

    fn step(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk_size = self.options.effective_chunk_size();
        loop {
            match &mut self.emit {
                Emit::Idle => {
                    let Some(entry) = self.pending.pop_front() else {
                        debug!("wrote {} entries, ending archive", self.entries_started);
                        self.emit = Emit::Done;
                        self.state = State::Closed;
                        return Ok(Some(vec![0u8; END_OF_ARCHIVE_LEN]));
                    };

                    let header = entry.metadata.encode()?;
                    debug!(
                        "entry {}: {} ({} bytes)",
                        self.entries_started, entry.metadata.name, entry.metadata.size
                    );
                    let reader = entry.content.open()?;
                    self.entries_started += 1;
                    self.emit = Emit::Content(InFlight {
                        name: entry.metadata.name,
                        reader,
                        declared: entry.metadata.size,
                        emitted: 0,
                    });
                    return Ok(Some(header.as_bytes().to_vec()));
                }
                Emit::Content(in_flight) => {
                    if let Some(chunk) = in_flight.read_chunk(chunk_size)? {
                        return Ok(Some(chunk));
                    }
                    let padding = padded_len(in_flight.declared) - in_flight.declared;
                    self.emit = Emit::Idle;
                    if padding > 0 {
                        return Ok(Some(vec![0u8; padding as usize]));
                    }
                }
                Emit::Done => return Ok(None),
            }
        }
    }

    /// Release any in-flight source and refuse further production.
    pub(crate) fn abort(&mut self) {
        if let Emit::Content(in_flight) = std::mem::replace(&mut self.emit, Emit::Done) {
            debug!(
                "releasing {} after {} of {} bytes",
                in_flight.name, in_flight.emitted, in_flight.declared
            );
        }
        self.state = State::Aborted;
    }

    pub(crate) fn is_mid_production(&self) -> bool {
        self.state == State::Finalizing && self.entries_started > 0
    }
}

/// Lazy sequence of archive chunks, see [`ArchiveWriter::produce`].
///
/// Dropping the stream after production has begun, or calling
/// [`cancel`](Self::cancel), aborts the writer and closes the in-flight
/// content source.
pub struct ArchiveStream<'a> {
    writer: &'a mut ArchiveWriter,
    done: bool,
}

impl ArchiveStream<'_> {
    /// Stop production, releasing the current content source.
    pub fn cancel(mut self) {
        if !matches!(self.writer.state, State::Closed | State::Aborted) {
            debug!("archive production cancelled");
            self.writer.abort();
        }
        self.done = true;
    }
}

impl Iterator for ArchiveStream<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.writer.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for ArchiveStream<'_> {}

impl Drop for ArchiveStream<'_> {
    fn drop(&mut self) {
        if self.writer.is_mid_production() {
            debug!("archive stream dropped mid-production");
            self.writer.abort();
        }
    }
}
