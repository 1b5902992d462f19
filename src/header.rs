//! USTAR header encoding.
//!
//! A USTAR header is a single 512-byte block laid out as follows (all numeric
//! fields are NUL-terminated zero-padded octal ASCII, all text fields are
//! NUL-padded bytes):
//!
//! | Offset | Size | Field     |
//! |--------|------|-----------|
//! | 0      | 100  | name      |
//! | 100    | 8    | mode      |
//! | 108    | 8    | uid       |
//! | 116    | 8    | gid       |
//! | 124    | 12   | size      |
//! | 136    | 12   | mtime     |
//! | 148    | 8    | checksum  |
//! | 156    | 1    | typeflag  |
//! | 157    | 100  | linkname  |
//! | 257    | 6    | magic     |
//! | 263    | 2    | version   |
//! | 265    | 32   | uname     |
//! | 297    | 32   | gname     |
//! | 329    | 8    | devmajor  |
//! | 337    | 8    | devminor  |
//! | 345    | 155  | prefix    |
//!
//! Paths longer than 100 bytes are split across `prefix` and `name` at a `/`.
//! Paths that cannot be split that way are rejected; no GNU or PAX long-name
//! records are generated.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::{ArchiveError, Result};

/// Size of a tar block (header or content) in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Size of a tar header block in bytes.
pub const HEADER_SIZE: usize = BLOCK_SIZE;

/// Magic string for UStar format headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version field for UStar format headers ("00").
pub const USTAR_VERSION: &[u8; 2] = b"00";

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;
const LINKNAME_LEN: usize = 100;
const OWNER_NAME_LEN: usize = 32;
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// Raw USTAR header block with named fields.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub prefix: [u8; 155],
    pub pad: [u8; 12],
}

impl Default for UstarHeader {
    fn default() -> Self {
        let mut header = Self::new_zeroed();
        header.magic.copy_from_slice(USTAR_MAGIC);
        header.version.copy_from_slice(USTAR_VERSION);
        header
    }
}

/// Tar entry type, stored as the single `typeflag` byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntryType {
    /// Regular file (type '0', or '\0' in old archives).
    #[default]
    Regular,
    /// Hard link to an earlier entry (type '1').
    Link,
    /// Symbolic link (type '2').
    Symlink,
    /// Character device (type '3').
    Char,
    /// Block device (type '4').
    Block,
    /// Directory (type '5').
    Directory,
    /// FIFO/named pipe (type '6').
    Fifo,
    /// Contiguous file (type '7').
    Continuous,
    /// PAX global extended header (type 'g').
    XGlobalHeader,
    /// PAX extended header for the next entry (type 'x').
    XHeader,
}

impl EntryType {
    /// Parse an entry type from its raw byte, if it is one we know.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'0' | b'\0' => EntryType::Regular,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Continuous,
            b'g' => EntryType::XGlobalHeader,
            b'x' => EntryType::XHeader,
            _ => return None,
        })
    }

    /// Convert to the raw typeflag byte. `Regular` is written as '0'.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Continuous => b'7',
            EntryType::XGlobalHeader => b'g',
            EntryType::XHeader => b'x',
        }
    }

    /// Whether entries of this type may carry content bytes.
    #[must_use]
    pub fn has_content(self) -> bool {
        matches!(
            self,
            EntryType::Regular
                | EntryType::Continuous
                | EntryType::XGlobalHeader
                | EntryType::XHeader
        )
    }

    /// Whether this type refers to another path through `link_name`.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(self, EntryType::Link | EntryType::Symlink)
    }

    /// Whether this type is a device node with major/minor numbers.
    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self, EntryType::Char | EntryType::Block)
    }
}

/// Per-entry metadata from which a header block is derived.
///
/// The `prefix` header field is not part of the metadata; the encoder
/// derives it from `name` when the path is longer than 100 bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMetadata {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Exact number of bytes the entry's content source will yield.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: u64,
    pub entry_type: EntryType,
    pub link_name: Option<String>,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub dev_major: Option<u32>,
    pub dev_minor: Option<u32>,
}

impl EntryMetadata {
    /// Metadata for an entry of the given type with default mode `0o644`
    /// and the current time as mtime.
    pub fn new(name: impl Into<String>, entry_type: EntryType, size: u64) -> Self {
        Self {
            name: name.into(),
            mode: 0o644,
            uid: 0,
            gid: 0,
            size,
            mtime: now(),
            entry_type,
            link_name: None,
            uname: None,
            gname: None,
            dev_major: None,
            dev_minor: None,
        }
    }

    /// A regular file of `size` bytes.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, EntryType::Regular, size)
    }

    /// A directory (mode `0o755`).
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Directory, 0).with_mode(0o755)
    }

    /// A symbolic link pointing at `target` (mode `0o777`).
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, EntryType::Symlink, 0)
            .with_mode(0o777)
            .with_link_name(target)
    }

    /// A hard link to an earlier entry named `target`.
    pub fn hard_link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, EntryType::Link, 0).with_link_name(target)
    }

    /// A FIFO.
    pub fn fifo(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Fifo, 0)
    }

    /// A character or block device node.
    pub fn device(name: impl Into<String>, entry_type: EntryType, major: u32, minor: u32) -> Self {
        let mut meta = Self::new(name, entry_type, 0);
        meta.dev_major = Some(major);
        meta.dev_minor = Some(minor);
        meta
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    #[must_use]
    pub fn with_owner_names(mut self, uname: impl Into<String>, gname: impl Into<String>) -> Self {
        self.uname = Some(uname.into());
        self.gname = Some(gname.into());
        self
    }

    #[must_use]
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    #[must_use]
    pub fn with_link_name(mut self, target: impl Into<String>) -> Self {
        self.link_name = Some(target.into());
        self
    }

    /// Number of bytes this entry occupies in the archive: one header block
    /// plus the content rounded up to whole blocks.
    #[must_use]
    pub fn archived_len(&self) -> u64 {
        HEADER_SIZE as u64 + padded_len(self.size)
    }

    /// Encode this metadata as a USTAR header block.
    pub fn encode(&self) -> Result<HeaderBlock> {
        HeaderBlock::encode(self)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ArchiveError::InvalidMetadata("empty entry name".into()));
        }
        if !self.entry_type.has_content() && self.size != 0 {
            return Err(ArchiveError::InvalidMetadata(format!(
                "{:?} entry {} cannot carry {} content bytes",
                self.entry_type, self.name, self.size
            )));
        }
        if self.entry_type.is_link() && self.link_name.as_deref().is_none_or(str::is_empty) {
            return Err(ArchiveError::InvalidMetadata(format!(
                "{:?} entry {} has no link target",
                self.entry_type, self.name
            )));
        }
        for (field, value) in [("uname", &self.uname), ("gname", &self.gname)] {
            if let Some(value) = value {
                if value.len() > OWNER_NAME_LEN {
                    return Err(ArchiveError::InvalidMetadata(format!(
                        "{field} {value:?} longer than {OWNER_NAME_LEN} bytes"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An encoded 512-byte USTAR header.
///
/// This is a derived value: it is computed from [`EntryMetadata`] on demand
/// and carries no identity of its own.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct HeaderBlock {
    raw: UstarHeader,
}

impl HeaderBlock {
    /// Build the header block for `meta`, including the checksum.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::NameTooLong`] if the path cannot be split into the
    /// prefix/name fields or the link target exceeds 100 bytes,
    /// [`ArchiveError::FieldOverflow`] if a numeric value does not fit its
    /// octal field, and [`ArchiveError::InvalidMetadata`] for structurally
    /// invalid metadata.
    pub fn encode(meta: &EntryMetadata) -> Result<Self> {
        meta.validate()?;

        let mut raw = UstarHeader::default();

        let (prefix, name) = split_path(meta.name.as_bytes()).ok_or_else(|| {
            ArchiveError::NameTooLong {
                name: meta.name.clone(),
                len: meta.name.len(),
            }
        })?;
        raw.name[..name.len()].copy_from_slice(name);
        raw.prefix[..prefix.len()].copy_from_slice(prefix);

        write_octal(&mut raw.mode, "mode", u64::from(meta.mode))?;
        write_octal(&mut raw.uid, "uid", u64::from(meta.uid))?;
        write_octal(&mut raw.gid, "gid", u64::from(meta.gid))?;
        write_octal(&mut raw.size, "size", meta.size)?;
        write_octal(&mut raw.mtime, "mtime", meta.mtime)?;
        raw.typeflag = meta.entry_type.to_byte();

        if let Some(target) = meta.link_name.as_ref().filter(|_| meta.entry_type.is_link()) {
            if target.len() > LINKNAME_LEN {
                return Err(ArchiveError::NameTooLong {
                    name: target.clone(),
                    len: target.len(),
                });
            }
            raw.linkname[..target.len()].copy_from_slice(target.as_bytes());
        }
        if let Some(uname) = &meta.uname {
            raw.uname[..uname.len()].copy_from_slice(uname.as_bytes());
        }
        if let Some(gname) = &meta.gname {
            raw.gname[..gname.len()].copy_from_slice(gname.as_bytes());
        }
        if meta.entry_type.is_device() {
            write_octal(
                &mut raw.devmajor,
                "devmajor",
                u64::from(meta.dev_major.unwrap_or(0)),
            )?;
            write_octal(
                &mut raw.devminor,
                "devminor",
                u64::from(meta.dev_minor.unwrap_or(0)),
            )?;
        }

        let mut block = Self { raw };
        let checksum = block.compute_checksum();
        // Six octal digits, NUL, space: the layout every tar reader accepts.
        block
            .raw
            .checksum
            .copy_from_slice(format!("{checksum:06o}\0 ").as_bytes());
        Ok(block)
    }

    /// Reinterpret the first 512 bytes of `bytes` as a header block.
    ///
    /// Returns `None` if fewer than 512 bytes are available.
    #[must_use]
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        let raw = UstarHeader::read_from_bytes(bytes.get(..HEADER_SIZE)?).ok()?;
        Some(Self { raw })
    }

    /// The raw 512 header bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    /// The named-field view of the header.
    #[must_use]
    pub fn as_ustar(&self) -> &UstarHeader {
        &self.raw
    }

    /// Compute the header checksum: the unsigned sum of all header bytes with
    /// the checksum field counted as spaces (0x20).
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        self.as_bytes()
            .iter()
            .enumerate()
            .map(|(i, &byte)| {
                if CHECKSUM_RANGE.contains(&i) {
                    u64::from(b' ')
                } else {
                    u64::from(byte)
                }
            })
            .sum()
    }

    /// Whether the stored checksum matches the computed one.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        parse_octal(&self.raw.checksum) == Some(self.compute_checksum())
    }

    /// The full path, joining `prefix` and `name` with `/` when a prefix is
    /// present.
    #[must_use]
    pub fn path(&self) -> Vec<u8> {
        let name = truncate_null(&self.raw.name);
        let prefix = truncate_null(&self.raw.prefix);
        if prefix.is_empty() {
            return name.to_vec();
        }
        let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
        path.extend_from_slice(prefix);
        path.push(b'/');
        path.extend_from_slice(name);
        path
    }

    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        truncate_null(&self.raw.name)
    }

    #[must_use]
    pub fn prefix_bytes(&self) -> &[u8] {
        truncate_null(&self.raw.prefix)
    }

    #[must_use]
    pub fn link_name_bytes(&self) -> &[u8] {
        truncate_null(&self.raw.linkname)
    }

    #[must_use]
    pub fn entry_type(&self) -> Option<EntryType> {
        EntryType::from_byte(self.raw.typeflag)
    }

    #[must_use]
    pub fn mode(&self) -> Option<u32> {
        parse_octal(&self.raw.mode).and_then(|v| u32::try_from(v).ok())
    }

    #[must_use]
    pub fn uid(&self) -> Option<u32> {
        parse_octal(&self.raw.uid).and_then(|v| u32::try_from(v).ok())
    }

    #[must_use]
    pub fn gid(&self) -> Option<u32> {
        parse_octal(&self.raw.gid).and_then(|v| u32::try_from(v).ok())
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        parse_octal(&self.raw.size)
    }

    #[must_use]
    pub fn mtime(&self) -> Option<u64> {
        parse_octal(&self.raw.mtime)
    }
}

impl fmt::Debug for HeaderBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderBlock")
            .field("path", &String::from_utf8_lossy(&self.path()))
            .field("entry_type", &self.entry_type())
            .field("size", &self.size())
            .field("mode", &self.mode().map(|m| format!("{m:04o}")))
            .finish_non_exhaustive()
    }
}

/// Round `size` up to a whole number of blocks.
#[must_use]
pub fn padded_len(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Split a path into the USTAR `(prefix, name)` pair.
///
/// Paths of at most 100 bytes go verbatim into `name`. Longer paths are split
/// at the last `/` that leaves a non-empty name of at most 100 bytes and a
/// non-empty prefix of at most 155 bytes. Returns `None` when no such split
/// exists.
#[must_use]
pub fn split_path(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.len() <= NAME_LEN {
        return Some((&[], path));
    }
    path.iter()
        .enumerate()
        .rev()
        .filter(|&(_, &b)| b == b'/')
        .map(|(i, _)| (&path[..i], &path[i + 1..]))
        .take_while(|(_, name)| name.len() <= NAME_LEN)
        .find(|(prefix, name)| !name.is_empty() && !prefix.is_empty() && prefix.len() <= PREFIX_LEN)
}

/// Write `value` as zero-padded octal into `field`, leaving the last byte as
/// the NUL terminator.
fn write_octal(field: &mut [u8], name: &'static str, value: u64) -> Result<()> {
    let digits = field.len() - 1;
    let limit = (1u64 << (3 * digits)) - 1;
    if value > limit {
        return Err(ArchiveError::FieldOverflow {
            field: name,
            value,
            limit,
        });
    }
    let text = format!("{value:0digits$o}");
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Ok(())
}

/// Parse an octal ASCII field, skipping leading spaces and stopping at the
/// first space or NUL. An empty field parses as zero.
#[must_use]
pub fn parse_octal(bytes: &[u8]) -> Option<u64> {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    let end = bytes[start..]
        .iter()
        .position(|&b| b == b' ' || b == b'\0')
        .map_or(bytes.len(), |i| start + i);

    bytes[start..end].iter().try_fold(0u64, |value, &byte| {
        if !(b'0'..=b'7').contains(&byte) {
            return None;
        }
        value.checked_mul(8)?.checked_add(u64::from(byte - b'0'))
    })
}

/// Truncate a byte slice at the first NUL byte.
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
