//! proofkv-store: the tamper-evident key-value engine.
//!
//! Every committed batch becomes one numbered transaction. Each transaction's
//! entry-hash is appended as a leaf of an RFC 6962 Merkle tree, so any value,
//! any transaction and any later state can be proven against a root a client
//! already trusts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Store API / SessionManager            │
//! │  (set, exec_all, get, zscan, proofs, ...)   │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Atomic Batch Executor             │
//! │   (stateless validation, target resolution) │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │  Transaction Log  │  Merkle Index  │ Indexes │
//! │  (framed records) │ (node records) │ (key, Z)│
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Storage Backend                   │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use proofkv_store::Store;
//! use proofkv_types::{KeyRequest, KeyValue, config::StoreConfig};
//!
//! let store = Store::open_in_memory(StoreConfig::default())?;
//! let header = store.set(vec![KeyValue::new("key", "value")])?;
//!
//! let entry = store.get(&KeyRequest::new("key"))?;
//! assert_eq!(entry.tx, header.id);
//!
//! let proof = store.inclusion_proof(header.id, store.latest())?;
//! # Ok::<(), proofkv_types::StoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::field_reassign_with_default))]

pub mod backend;
pub mod error;
pub mod executor;
pub mod index;
pub mod log;
pub mod metrics;
pub mod proof;
pub mod scan;
pub mod session;
pub mod store;
pub mod tree;
pub mod zindex;

// Re-export commonly used types
pub use backend::{
    FORMAT_VERSION, FileBackend, InMemoryBackend, MAGIC, SEGMENT_HEADER_SIZE, SegmentHeader,
    SegmentKind, StorageBackend,
};
pub use error::{Error, Result};
pub use executor::UnpinnedResolution;
pub use scan::ZScan;
pub use session::{SessionError, SessionManager};
pub use store::{LOG_FILE, NODES_FILE, Store};
