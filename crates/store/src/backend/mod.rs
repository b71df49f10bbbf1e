//! Storage backend abstraction for the store engine.
//!
//! A backend is one append-only byte segment. The transaction log and the
//! Merkle node store each own one, so both file-based (production) and
//! in-memory (testing) implementations plug in under the same engine.
//!
//! # Segment Layout
//!
//! Every segment starts with a fixed [`SegmentHeader`]:
//!
//! ```text
//! bytes 0-7    magic "PROOFKV\0"
//! bytes 8-9    format version (LE)
//! byte  10     segment kind (1 = log, 2 = nodes)
//! bytes 11-23  reserved (zero)
//! bytes 24-31  XXH3-64 of bytes 0-23 (LE)
//! ```
//!
//! Data is only ever appended after the header. Truncation is used solely to
//! discard an unsynced tail during recovery or rollback.

mod file;
mod memory;

use std::sync::Arc;

pub use file::FileBackend;
pub use memory::InMemoryBackend;
use tracing::warn;

use crate::error::{Error, Result};

/// Segment header size in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Magic number for proofkv segment files.
pub const MAGIC: &[u8; 8] = b"PROOFKV\0";

/// Current segment format version.
pub const FORMAT_VERSION: u16 = 1;

/// Storage backend trait: an append-only byte segment.
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `buf.len()` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails or runs past the end.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Appends `data` at the end of the segment and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails. A failed append may leave a
    /// partial tail that the caller must truncate.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Shrinks the segment to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the truncation fails.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Flushes all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Returns the current segment length in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn len(&self) -> Result<u64>;

    /// Whether the segment holds no bytes at all.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        (**self).append(data)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        (**self).truncate(len)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }

    fn len(&self) -> Result<u64> {
        (**self).len()
    }
}

/// What a segment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    /// Transaction log frames.
    Log = 1,
    /// Fixed-size Merkle node records.
    Nodes = 2,
}

/// Fixed header at the start of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Format version.
    pub version: u16,
    /// Segment kind.
    pub kind: SegmentKind,
}

impl SegmentHeader {
    /// Total header size on disk.
    pub const SIZE: usize = SEGMENT_HEADER_SIZE;

    /// Size of the checksum-protected region.
    const CHECKSUMMED_SIZE: usize = 24;

    /// Creates a header for the current format version.
    pub fn new(kind: SegmentKind) -> Self {
        Self { version: FORMAT_VERSION, kind }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10] = self.kind as u8;
        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]);
        buf[24..32].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes and validates a header of the expected kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMagic`, `Error::ChecksumMismatch`,
    /// `Error::UnsupportedVersion` or `Error::SegmentKindMismatch`.
    pub fn from_bytes(buf: &[u8; Self::SIZE], expected: SegmentKind) -> Result<Self> {
        if buf[0..8] != MAGIC[..] {
            return Err(Error::InvalidMagic);
        }

        let stored = u64::from_le_bytes(read_array(buf, 24));
        let actual = xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]);
        if stored != actual {
            return Err(Error::ChecksumMismatch { offset: 0, expected: stored, actual });
        }

        let version = u16::from_le_bytes(read_array(buf, 8));
        if version == 0 || version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }

        if buf[10] != expected as u8 {
            return Err(Error::SegmentKindMismatch { expected: expected as u8, found: buf[10] });
        }

        Ok(Self { version, kind: expected })
    }
}

/// Copies `N` bytes starting at `at` out of a buffer known to be long enough.
pub(crate) fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

/// Writes a fresh header to an empty segment, or validates the existing one.
///
/// A segment shorter than a header can only come from a crash during
/// creation; it is reset and initialized again.
///
/// # Errors
///
/// Returns a header validation error or `Error::Io`.
pub fn init_segment<B: StorageBackend + ?Sized>(backend: &B, kind: SegmentKind) -> Result<()> {
    let len = backend.len()?;
    if len > 0 && len < SEGMENT_HEADER_SIZE as u64 {
        warn!(len, kind = ?kind, "Discarding partially written segment header");
        backend.truncate(0)?;
    }

    if backend.is_empty()? {
        backend.append(&SegmentHeader::new(kind).to_bytes())?;
        backend.sync()?;
        return Ok(());
    }

    let mut buf = [0u8; SEGMENT_HEADER_SIZE];
    backend.read_exact_at(0, &mut buf)?;
    SegmentHeader::from_bytes(&buf, kind)?;
    Ok(())
}
