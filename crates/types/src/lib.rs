//! Core types, errors, and cryptographic primitives for proofkv.
//!
//! This crate is everything a client needs to check a proof without trusting
//! the store that produced it:
//! - The frozen entry codec that feeds every digest
//! - SHA-256 hashing with RFC 6962 domain separation
//! - Merkle root, audit path and consistency proof algorithms
//! - Transaction, operation and proof types
//! - Pure verification functions
//! - Error types using snafu and store configuration

pub mod codec;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod types;
pub mod verify;

// Re-export commonly used types at crate root
pub use error::{ErrorCode, ErrorKind, Result, StoreError};
pub use hash::{EMPTY_HASH, Hash, ZERO_HASH, hash_eq, leaf_hash, node_hash, sha256};
pub use merkle::{MerklePath, MerkleTree, SubtreeSource};
pub use types::*;
pub use verify::{
    verify_consistency, verify_inclusion, verify_tx_inclusion, verify_verifiable_entry,
    verify_verifiable_tx,
};
