//! Merkle authenticated index over committed transactions.
//!
//! Leaf `i` (0-based) is `leaf_hash(entry_hash)` of transaction `i + 1`. The
//! tree lives in a node segment of fixed 32-byte records written strictly in
//! append order: appending leaf `j` writes the leaf itself followed by every
//! perfect subtree it completes. Node `(level l, index i)` therefore sits at
//!
//! ```text
//! record(l, i) = 2j - popcount(j) + l    where j = (i + 1) * 2^l - 1
//! ```
//!
//! and after `n` leaves the segment holds exactly `2n - popcount(n)` records.
//! Nodes off the new leaf's path are never touched again.
//!
//! An in-memory [`Frontier`] of peaks answers `root()` without I/O; roots of
//! earlier sizes and all proofs are folded from stored nodes through the
//! generic [`proofkv_types::merkle`] algorithms.

use proofkv_types::{EMPTY_HASH, Hash, MerklePath, SubtreeSource, merkle, node_hash};
use tracing::warn;

use crate::{
    backend::{SEGMENT_HEADER_SIZE, SegmentKind, StorageBackend, init_segment},
    error::{Error, Result},
};

/// Size of one node record.
pub const NODE_SIZE: usize = 32;

/// Record position of node `(level, index)`.
#[inline]
pub fn node_position(level: u32, index: u64) -> u64 {
    let j = ((index + 1) << level) - 1;
    2 * j - u64::from(j.count_ones()) + u64::from(level)
}

/// Records stored once `leaves` leaves have been appended.
#[inline]
pub fn records_for(leaves: u64) -> u64 {
    2 * leaves - u64::from(leaves.count_ones())
}

/// Largest leaf count whose records fit in `records`.
fn leaves_within(records: u64) -> u64 {
    // records_for is strictly increasing, so binary search works.
    let (mut lo, mut hi) = (0u64, records);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if records_for(mid) <= records {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Peaks of the perfect subtrees covering the leaves appended so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    /// `(level, hash)` from the largest (leftmost) subtree down.
    peaks: Vec<(u32, Hash)>,
    leaves: u64,
}

impl Frontier {
    /// Number of leaves folded in.
    pub fn leaves(&self) -> u64 {
        self.leaves
    }

    /// Folds in a leaf and returns the node records it completes, leaf first.
    pub fn push(&mut self, leaf: Hash) -> Vec<Hash> {
        let mut records = Vec::with_capacity(1 + self.leaves.trailing_ones() as usize);
        records.push(leaf);
        let mut acc = leaf;
        let mut level = 0;
        while let Some(&(peak_level, peak)) = self.peaks.last() {
            if peak_level != level {
                break;
            }
            self.peaks.pop();
            acc = node_hash(&peak, &acc);
            records.push(acc);
            level += 1;
        }
        self.peaks.push((level, acc));
        self.leaves += 1;
        records
    }

    /// Root of the leaves folded in so far.
    pub fn root(&self) -> Hash {
        let mut iter = self.peaks.iter().rev();
        let Some(&(_, mut acc)) = iter.next() else {
            return EMPTY_HASH;
        };
        for (_, peak) in iter {
            acc = node_hash(peak, &acc);
        }
        acc
    }
}

/// Persisted, incrementally maintained Merkle tree over transaction digests.
pub struct MerkleIndex<B: StorageBackend> {
    backend: B,
    frontier: Frontier,
}

impl<B: StorageBackend> MerkleIndex<B> {
    /// Opens the node segment and recovers the leaf count.
    ///
    /// A trailing partial record, or parents missing after the last leaf, are
    /// the remains of an interrupted append and are truncated away.
    ///
    /// # Errors
    ///
    /// Returns a header validation error or `Error::Io`.
    pub fn open(backend: B) -> Result<Self> {
        init_segment(&backend, SegmentKind::Nodes)?;

        let data_len = backend.len()? - SEGMENT_HEADER_SIZE as u64;
        let records = data_len / NODE_SIZE as u64;
        let leaves = leaves_within(records);
        let keep = records_for(leaves);
        if keep != records || data_len % NODE_SIZE as u64 != 0 {
            warn!(
                records,
                kept_records = keep,
                leaves,
                "Truncating partially written Merkle nodes"
            );
            backend.truncate(Self::offset_of_record(keep))?;
            backend.sync()?;
        }

        let mut index = Self { backend, frontier: Frontier::default() };
        index.frontier = index.frontier_at(leaves)?;
        Ok(index)
    }

    fn offset_of_record(record: u64) -> u64 {
        SEGMENT_HEADER_SIZE as u64 + record * NODE_SIZE as u64
    }

    /// Rebuilds the frontier for the first `leaves` leaves from stored peaks.
    fn frontier_at(&self, leaves: u64) -> Result<Frontier> {
        let mut peaks = Vec::with_capacity(leaves.count_ones() as usize);
        let mut covered = 0u64;
        for level in (0..u64::BITS).rev() {
            if leaves & (1 << level) != 0 {
                peaks.push((level, self.node(level, covered >> level)?));
                covered += 1 << level;
            }
        }
        Ok(Frontier { peaks, leaves })
    }

    /// Reads node `(level, index)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the record is outside the segment.
    pub fn node(&self, level: u32, index: u64) -> Result<Hash> {
        let mut hash = [0u8; NODE_SIZE];
        self.backend
            .read_exact_at(Self::offset_of_record(node_position(level, index)), &mut hash)?;
        Ok(hash)
    }

    /// Reads the stored leaf for transaction `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the leaf has not been appended.
    pub fn leaf(&self, tx_id: u64) -> Result<Hash> {
        self.node(0, tx_id - 1)
    }

    /// Leaves appended so far, equal to the latest folded tx id.
    pub fn leaf_count(&self) -> u64 {
        self.frontier.leaves
    }

    /// Current root.
    pub fn root(&self) -> Hash {
        self.frontier.root()
    }

    /// Root the tree would have after appending `leaf`, without writing it.
    pub fn root_with(&self, leaf: Hash) -> Hash {
        let mut next = self.frontier.clone();
        next.push(leaf);
        next.root()
    }

    /// Root after the first `size` leaves; `size` must not exceed `leaf_count()`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a node cannot be read.
    pub fn root_at(&self, size: u64) -> Result<Hash> {
        if size == self.leaf_count() {
            return Ok(self.root());
        }
        merkle::root_of(self, size)
    }

    /// Appends a leaf and its completed parents in one write.
    ///
    /// The in-memory frontier only moves once the write (and sync) succeeded;
    /// a failed write is truncated back.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Corrupted` if the records did not land
    /// where the layout requires.
    pub fn append(&mut self, leaf: Hash, sync: bool) -> Result<Hash> {
        let mut next = self.frontier.clone();
        let records = next.push(leaf);
        let mut bytes = Vec::with_capacity(records.len() * NODE_SIZE);
        for record in &records {
            bytes.extend_from_slice(record);
        }

        let end = Self::offset_of_record(records_for(self.frontier.leaves));
        let written = self.backend.append(&bytes).and_then(|offset| {
            if offset != end {
                return Err(Error::Corrupted {
                    reason: format!("node append landed at {offset}, expected {end}"),
                });
            }
            if sync {
                self.backend.sync()?;
            }
            Ok(())
        });

        if let Err(err) = written {
            if let Err(rollback) = self.backend.truncate(end) {
                warn!(error = %rollback, "Failed to truncate partial Merkle nodes");
            }
            return Err(err);
        }
        self.frontier = next;
        Ok(self.frontier.root())
    }

    /// Drops every leaf after the first `leaves`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io`; the index is unchanged then.
    pub fn truncate_leaves(&mut self, leaves: u64) -> Result<()> {
        if leaves >= self.leaf_count() {
            return Ok(());
        }
        let frontier = self.frontier_at(leaves)?;
        self.backend.truncate(Self::offset_of_record(records_for(leaves)))?;
        self.backend.sync()?;
        self.frontier = frontier;
        Ok(())
    }

    /// Truncates records left past the last complete leaf by a failed append.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn discard_tail(&self) -> Result<()> {
        let end = Self::offset_of_record(records_for(self.frontier.leaves));
        if self.backend.len()? != end {
            self.backend.truncate(end)?;
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Audit path for transaction `tx_id` in the tree of `size` transactions.
    ///
    /// Callers guarantee `1 <= tx_id <= size <= leaf_count()`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a node cannot be read.
    pub fn inclusion_path(&self, tx_id: u64, size: u64) -> Result<MerklePath> {
        let leaf_index = tx_id - 1;
        let hashes = merkle::inclusion_path(self, leaf_index, size)?;
        Ok(MerklePath { leaf_index, tree_size: size, hashes })
    }

    /// Consistency path between the trees of `old_size` and `new_size` leaves.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a node cannot be read.
    pub fn consistency_path(&self, old_size: u64, new_size: u64) -> Result<Vec<Hash>> {
        merkle::consistency_path(self, old_size, new_size)
    }

    /// Flushes the node segment.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }
}

impl<B: StorageBackend> SubtreeSource for MerkleIndex<B> {
    type Error = Error;

    fn leaf_count(&self) -> u64 {
        self.frontier.leaves
    }

    fn subtree(&self, level: u32, index: u64) -> Result<Hash> {
        self.node(level, index)
    }
}
