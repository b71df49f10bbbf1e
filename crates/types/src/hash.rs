//! Cryptographic hashing functions for proofkv.
//!
//! All digests are SHA-256. Tree hashing uses the RFC 6962 domain separation
//! prefixes so that a leaf can never be confused with an internal node:
//! - leaf: `SHA-256(0x00 || data)`
//! - node: `SHA-256(0x01 || left || right)`

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Hash of empty input: SHA-256("").
///
/// This is the root of the empty tree (`root(0)`), NOT zero bytes.
pub const EMPTY_HASH: Hash = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

/// Zero hash: 32 zero bytes. Placeholder only, never a valid root.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Domain separation prefix for leaf hashes.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain separation prefix for internal node hashes.
pub const NODE_PREFIX: u8 = 0x01;

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes a leaf payload: `SHA-256(0x00 || data)`.
#[inline]
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes two children into their parent: `SHA-256(0x01 || left || right)`.
#[inline]
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Constant-time hash comparison.
///
/// Use this for every comparison between a recomputed digest and a claimed one.
#[inline]
pub fn hash_eq(a: &Hash, b: &Hash) -> bool {
    a.ct_eq(b).into()
}

/// Lowercase hex rendering of a digest, for logs and error messages.
pub fn to_hex(hash: &Hash) -> String {
    use std::fmt::Write;

    hash.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_sha256_of_nothing() {
        assert_eq!(sha256(b""), EMPTY_HASH);
        assert_ne!(EMPTY_HASH, ZERO_HASH);
    }

    #[test]
    fn test_leaf_and_node_are_domain_separated() {
        let a = sha256(b"a");
        let b = sha256(b"b");

        let mut concat = Vec::with_capacity(64);
        concat.extend_from_slice(&a);
        concat.extend_from_slice(&b);

        // A leaf over the concatenation must never equal the node over the pair
        assert_ne!(leaf_hash(&concat), node_hash(&a, &b));
        assert_ne!(sha256(&concat), node_hash(&a, &b));
    }

    #[test]
    fn test_node_hash_is_order_dependent() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        assert_ne!(node_hash(&a, &b), node_hash(&b, &a));
    }

    #[test]
    fn test_hash_eq() {
        let a = sha256(b"x");
        let mut b = a;
        assert!(hash_eq(&a, &b));
        b[31] ^= 1;
        assert!(!hash_eq(&a, &b));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(
            to_hex(&EMPTY_HASH),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
