//! Append-only transaction log.
//!
//! Each committed [`Transaction`] is one frame after the segment header:
//!
//! ```text
//! [payload_len: u32 LE][xxh3_64(payload): u64 LE][payload = postcard(Transaction)]
//! ```
//!
//! Ids are contiguous from 1, so the in-memory offset table turns `read(id)`
//! into a single positional read. Recovery scans frames in order; a torn or
//! checksum-failing frame at the very end is an interrupted append and is
//! truncated, anything damaged before valid data is corruption.

use proofkv_types::{Transaction, TxId, codec};
use tracing::{debug, warn};

use crate::{
    backend::{SEGMENT_HEADER_SIZE, SegmentKind, StorageBackend, init_segment, read_array},
    error::{Error, Result},
};

/// Frame header: payload length plus checksum.
const FRAME_HEADER_SIZE: usize = 12;

/// Upper bound on one encoded transaction, guarding recovery against garbage lengths.
const MAX_FRAME_PAYLOAD: u32 = u32::MAX - 1;

/// What recovery found while opening the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRecovery {
    /// Transactions recovered.
    pub transactions: u64,
    /// Bytes of torn tail discarded.
    pub truncated_bytes: u64,
}

/// Durable, strictly ordered sequence of committed transactions.
pub struct TxLog<B: StorageBackend> {
    backend: B,
    /// `offsets[i]` is the frame offset of transaction `i + 1`.
    offsets: Vec<u64>,
    /// End of the last complete frame.
    end: u64,
}

impl<B: StorageBackend> TxLog<B> {
    /// Opens the log, replaying every committed transaction through `visit`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` (or a checksum/header error) if damage is
    /// found before the tail, or ids are not contiguous from 1. Errors from
    /// `visit` abort the open.
    pub fn open<F>(backend: B, mut visit: F) -> Result<(Self, LogRecovery)>
    where
        F: FnMut(&Transaction) -> Result<()>,
    {
        init_segment(&backend, SegmentKind::Log)?;

        let file_len = backend.len()?;
        let mut offsets = Vec::new();
        let mut offset = SEGMENT_HEADER_SIZE as u64;

        while offset < file_len {
            let frame = match read_frame(&backend, offset, file_len)? {
                FrameRead::Complete(frame) => frame,
                FrameRead::Torn => break,
            };

            let next = offset + (FRAME_HEADER_SIZE + frame.payload.len()) as u64;
            if frame.stored_checksum != frame.actual_checksum {
                if next == file_len {
                    // Last frame: the append never finished.
                    break;
                }
                return Err(Error::ChecksumMismatch {
                    offset,
                    expected: frame.stored_checksum,
                    actual: frame.actual_checksum,
                });
            }

            let tx: Transaction = codec::decode(&frame.payload)?;
            let expected = offsets.len() as u64 + 1;
            if tx.header.id != expected {
                return Err(Error::Corrupted {
                    reason: format!(
                        "transaction id {} at offset {offset}, expected {expected}",
                        tx.header.id
                    ),
                });
            }
            visit(&tx)?;
            offsets.push(offset);
            offset = next;
        }

        let truncated_bytes = file_len - offset;
        if truncated_bytes > 0 {
            warn!(
                offset,
                truncated_bytes,
                transactions = offsets.len(),
                "Truncating torn transaction log tail"
            );
            backend.truncate(offset)?;
            backend.sync()?;
        }

        let recovery = LogRecovery { transactions: offsets.len() as u64, truncated_bytes };
        Ok((Self { backend, offsets, end: offset }, recovery))
    }

    /// Id of the latest committed transaction; 0 when empty.
    pub fn latest(&self) -> TxId {
        self.offsets.len() as TxId
    }

    /// Appends `tx`, which must carry id `latest() + 1`.
    ///
    /// `latest()` only advances once the frame is written (and synced when
    /// `sync` is set). On failure the partial frame is truncated away.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfOrder` for a wrong id, or the backend's error.
    pub fn append(&mut self, tx: &Transaction, sync: bool) -> Result<TxId> {
        let expected = self.latest() + 1;
        if tx.header.id != expected {
            return Err(Error::OutOfOrder { expected, found: tx.header.id });
        }

        let payload = codec::encode(tx)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_PAYLOAD)
            .ok_or_else(|| Error::Corrupted {
                reason: format!("transaction record of {} bytes is too large", payload.len()),
            })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&xxhash_rust::xxh3::xxh3_64(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let written = self.backend.append(&frame).and_then(|offset| {
            if offset != self.end {
                return Err(Error::Corrupted {
                    reason: format!("log append landed at {offset}, expected {}", self.end),
                });
            }
            if sync {
                self.backend.sync()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => {
                self.offsets.push(offset);
                self.end = offset + frame.len() as u64;
                debug!(tx_id = expected, bytes = frame.len(), "Appended transaction frame");
                Ok(expected)
            },
            Err(err) => {
                // Best effort; the next open discards the tail anyway.
                if let Err(rollback) = self.backend.truncate(self.end) {
                    warn!(error = %rollback, "Failed to truncate partial log frame");
                }
                Err(err)
            },
        }
    }

    /// Reads transaction `id`; `None` if it was never committed.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChecksumMismatch` if the frame was altered on disk.
    pub fn read(&self, id: TxId) -> Result<Option<Transaction>> {
        let Some(offset) = id.checked_sub(1).and_then(|i| self.offsets.get(i as usize)) else {
            return Ok(None);
        };
        let frame = match read_frame(&self.backend, *offset, self.end)? {
            FrameRead::Complete(frame) => frame,
            FrameRead::Torn => {
                return Err(Error::Corrupted {
                    reason: format!("frame of transaction {id} is truncated"),
                });
            },
        };
        if frame.stored_checksum != frame.actual_checksum {
            return Err(Error::ChecksumMismatch {
                offset: *offset,
                expected: frame.stored_checksum,
                actual: frame.actual_checksum,
            });
        }
        Ok(Some(codec::decode(&frame.payload)?))
    }

    /// Discards every transaction after `id`.
    ///
    /// Used to roll back a transaction whose Merkle update failed.
    ///
    /// # Errors
    ///
    /// Returns the backend's error. The in-memory table is trimmed either way,
    /// so readers never see the discarded transactions.
    pub fn truncate_after(&mut self, id: TxId) -> Result<()> {
        let keep = id as usize;
        if keep >= self.offsets.len() {
            return Ok(());
        }
        self.end = self.offsets[keep];
        self.offsets.truncate(keep);
        self.backend.truncate(self.end)?;
        self.backend.sync()
    }

    /// Truncates bytes left past the last committed frame by a failed append.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn discard_tail(&self) -> Result<()> {
        if self.backend.len()? != self.end {
            self.backend.truncate(self.end)?;
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Flushes the segment.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }

    /// Bytes used by committed frames, header included.
    pub fn size_bytes(&self) -> u64 {
        self.end
    }
}

struct Frame {
    stored_checksum: u64,
    actual_checksum: u64,
    payload: Vec<u8>,
}

enum FrameRead {
    Complete(Frame),
    /// The frame extends past `limit`.
    Torn,
}

fn read_frame<B: StorageBackend>(backend: &B, offset: u64, limit: u64) -> Result<FrameRead> {
    if limit - offset < FRAME_HEADER_SIZE as u64 {
        return Ok(FrameRead::Torn);
    }
    let mut header = [0u8; FRAME_HEADER_SIZE];
    backend.read_exact_at(offset, &mut header)?;
    let len = u32::from_le_bytes(read_array(&header, 0));
    let stored_checksum = u64::from_le_bytes(read_array(&header, 4));

    if limit - offset - (FRAME_HEADER_SIZE as u64) < u64::from(len) {
        return Ok(FrameRead::Torn);
    }
    let mut payload = vec![0u8; len as usize];
    backend.read_exact_at(offset + FRAME_HEADER_SIZE as u64, &mut payload)?;
    let actual_checksum = xxhash_rust::xxh3::xxh3_64(&payload);
    Ok(FrameRead::Complete(Frame { stored_checksum, actual_checksum, payload }))
}
