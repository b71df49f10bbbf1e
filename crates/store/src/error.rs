//! Error types for the segment, log and node-store layers.
//!
//! These never cross the public `Store` API directly: [`From<Error> for
//! StoreError`](proofkv_types::StoreError) folds them into the public taxonomy,
//! integrity failures as `Corrupted` and everything else as `Storage`.

use std::io;

use proofkv_types::{StoreError, codec::CodecError};
use snafu::Snafu;

/// Result type alias for storage-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by backends, the transaction log and the node store.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Segment content is structurally invalid.
    #[snafu(display("Corrupted segment: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// A frame or header failed its xxh3 checksum.
    #[snafu(display("Checksum mismatch at offset {offset}: expected {expected:#018x}, found {actual:#018x}"))]
    ChecksumMismatch {
        /// Byte offset of the frame or header.
        offset: u64,
        /// Stored checksum.
        expected: u64,
        /// Recomputed checksum.
        actual: u64,
    },

    /// Invalid magic number in a segment header.
    #[snafu(display("Invalid segment magic number"))]
    InvalidMagic,

    /// Unsupported segment format version.
    #[snafu(display("Unsupported format version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u16,
    },

    /// Segment header names another segment kind.
    #[snafu(display("Segment kind mismatch: expected {expected}, found {found}"))]
    SegmentKindMismatch {
        /// Expected kind byte.
        expected: u8,
        /// Kind byte found on disk.
        found: u8,
    },

    /// Appended transaction id does not follow the log's latest id.
    #[snafu(display("Out-of-order transaction: expected id {expected}, got {found}"))]
    OutOfOrder {
        /// Next id the log expects.
        expected: u64,
        /// Id that was offered.
        found: u64,
    },

    /// Transaction record could not be encoded or decoded.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
    },
}

impl Error {
    /// Whether this error reports damaged persisted data rather than a failed
    /// operation.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. }
                | Self::ChecksumMismatch { .. }
                | Self::InvalidMagic
                | Self::UnsupportedVersion { .. }
                | Self::SegmentKindMismatch { .. }
                | Self::Codec { source: CodecError::Decode { .. } }
        )
    }
}

// Provide automatic conversion from io::Error to Error::Io for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<CodecError> for Error {
    fn from(source: CodecError) -> Self {
        Error::Codec { source }
    }
}

impl From<Error> for StoreError {
    #[track_caller]
    fn from(err: Error) -> Self {
        if err.is_integrity() {
            return StoreError::Corrupted { message: err.to_string() };
        }
        let loc = std::panic::Location::caller();
        StoreError::Storage {
            message: err.to_string(),
            location: snafu::Location::new(loc.file(), loc.line(), loc.column()),
        }
    }
}
