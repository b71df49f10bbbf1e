//! Entry codec: the frozen byte encoding that feeds every digest.
//!
//! Changing anything here invalidates every proof ever issued, so the layout
//! is versioned by [`ENTRY_ENCODING_VERSION`] and never goes through serde.
//!
//! ```text
//! entry     = [version:1][key_len:u32 BE][stored key][value_len:u32 BE][stored value]
//! plain key = 0x00 [user key]
//! z member  = 0x01 [set_len:u64 BE][set][score:u64 sortable][key_len:u64 BE][key][at_tx:u64 BE]
//! value     = 0x00 [payload]              plain value
//!           | 0x01 [at_tx:u64 BE][target]  reference
//! ```

use crate::{
    hash::{Hash, leaf_hash},
    merkle::MerkleTree,
    types::TxId,
};

/// Version byte prefixed to every encoded entry.
pub const ENTRY_ENCODING_VERSION: u8 = 1;

/// Namespace prefix for plain keys and reference names.
pub const PLAIN_KEY_PREFIX: u8 = 0x00;

/// Namespace prefix for sorted-set member keys.
pub const ZSET_KEY_PREFIX: u8 = 0x01;

/// Kind prefix for plain values.
pub const PLAIN_VALUE_PREFIX: u8 = 0x00;

/// Kind prefix for reference values.
pub const REFERENCE_VALUE_PREFIX: u8 = 0x01;

/// Encodes a stored key/value pair into the bytes that are leaf-hashed.
pub fn encode_entry(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + key.len() + 4 + value.len());
    out.push(ENTRY_ENCODING_VERSION);
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Leaf hash of one stored entry.
#[inline]
pub fn entry_leaf(key: &[u8], value: &[u8]) -> Hash {
    leaf_hash(&encode_entry(key, value))
}

/// Entry-hash of a transaction: the Merkle root over its entry leaves, in
/// commit order.
pub fn entry_hash<'a, I>(entries: I) -> Hash
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    MerkleTree::from_leaf_hashes(entries.into_iter().map(|(k, v)| entry_leaf(k, v)).collect())
        .root()
}

/// Stored form of a plain user key.
pub fn plain_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + key.len());
    out.push(PLAIN_KEY_PREFIX);
    out.extend_from_slice(key);
    out
}

/// Stored form of a plain value.
pub fn plain_value(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + value.len());
    out.push(PLAIN_VALUE_PREFIX);
    out.extend_from_slice(value);
    out
}

/// Stored form of a reference value pointing at `target`.
pub fn reference_value(at_tx: TxId, target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + target.len());
    out.push(REFERENCE_VALUE_PREFIX);
    out.extend_from_slice(&at_tx.to_be_bytes());
    out.extend_from_slice(target);
    out
}

/// Stored key of a sorted-set member.
pub fn zset_key(set: &[u8], score: f64, key: &[u8], at_tx: TxId) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + set.len() + 8 + 8 + key.len() + 8);
    out.push(ZSET_KEY_PREFIX);
    out.extend_from_slice(&(set.len() as u64).to_be_bytes());
    out.extend_from_slice(set);
    out.extend_from_slice(&score_to_sortable(score).to_be_bytes());
    out.extend_from_slice(&(key.len() as u64).to_be_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&at_tx.to_be_bytes());
    out
}

/// Exact bytes hashed for a plain user key/value write.
///
/// Clients use this to rebuild the entry encoding they verify against.
pub fn encode_kv(key: &[u8], value: &[u8]) -> Vec<u8> {
    encode_entry(&plain_key(key), &plain_value(value))
}

/// Maps a finite score to a `u64` whose unsigned order matches numeric order.
///
/// `-0.0` is folded into `0.0` so both encode identically.
pub fn score_to_sortable(score: f64) -> u64 {
    let score = if score == 0.0 { 0.0 } else { score };
    let bits = score.to_bits();
    if bits & (1 << 63) != 0 { !bits } else { bits ^ (1 << 63) }
}

/// Inverse of [`score_to_sortable`].
pub fn sortable_to_score(sortable: u64) -> f64 {
    let bits = if sortable & (1 << 63) != 0 { sortable ^ (1 << 63) } else { !sortable };
    f64::from_bits(bits)
}

/// Decoded view of a stored key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoredKey<'a> {
    /// Plain key or reference name.
    Plain(&'a [u8]),
    /// Sorted-set member.
    ZMember {
        /// Set name.
        set: &'a [u8],
        /// Member score.
        score: f64,
        /// Member key.
        key: &'a [u8],
        /// Pinned transaction, 0 when unpinned.
        at_tx: TxId,
    },
}

/// Decoded view of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredValue<'a> {
    /// Plain payload.
    Plain(&'a [u8]),
    /// Reference to another key.
    Reference {
        /// Pinned transaction, 0 when unpinned.
        at_tx: TxId,
        /// Target key.
        target: &'a [u8],
    },
}

fn split_u64(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let (head, rest) = bytes.split_first_chunk::<8>()?;
    Some((u64::from_be_bytes(*head), rest))
}

fn split_len_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (len, rest) = split_u64(bytes)?;
    let len = usize::try_from(len).ok()?;
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

/// Parses a stored key. Returns `None` for unknown prefixes or truncated input.
pub fn parse_key(stored: &[u8]) -> Option<StoredKey<'_>> {
    let (prefix, rest) = stored.split_first()?;
    match *prefix {
        PLAIN_KEY_PREFIX => Some(StoredKey::Plain(rest)),
        ZSET_KEY_PREFIX => {
            let (set, rest) = split_len_prefixed(rest)?;
            let (sortable, rest) = split_u64(rest)?;
            let (key, rest) = split_len_prefixed(rest)?;
            let (at_tx, rest) = split_u64(rest)?;
            if !rest.is_empty() {
                return None;
            }
            Some(StoredKey::ZMember { set, score: sortable_to_score(sortable), key, at_tx })
        },
        _ => None,
    }
}

/// Parses a stored value. Returns `None` for unknown prefixes or truncated input.
pub fn parse_value(stored: &[u8]) -> Option<StoredValue<'_>> {
    let (prefix, rest) = stored.split_first()?;
    match *prefix {
        PLAIN_VALUE_PREFIX => Some(StoredValue::Plain(rest)),
        REFERENCE_VALUE_PREFIX => {
            let (at_tx, target) = split_u64(rest)?;
            Some(StoredValue::Reference { at_tx, target })
        },
        _ => None,
    }
}
