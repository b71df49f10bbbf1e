//! Core type definitions for proofkv.
//!
//! - Transactions as they are persisted and hashed
//! - Batch operations and their wire form
//! - Read requests and results
//! - Proof types returned by verifiable reads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    codec,
    encoding::{
        self, ENTRY_ENCODING_VERSION, StoredKey, StoredValue, encode_entry, encode_kv, plain_key,
        reference_value,
    },
    error::{IllegalArgumentSnafu, StoreError},
    hash::{EMPTY_HASH, Hash, leaf_hash},
    merkle::{MerklePath, MerkleTree},
};

// ============================================================================
// Transactions
// ============================================================================

/// Transaction identifier. Strictly increasing from 1; 0 means "none".
pub type TxId = u64;

/// One stored entry of a transaction.
///
/// Both fields carry their namespace/kind prefix (see [`crate::encoding`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    /// Stored key.
    pub key: Vec<u8>,
    /// Stored value.
    pub value: Vec<u8>,
}

impl TxEntry {
    /// Bytes that are leaf-hashed into the transaction's entry-hash.
    pub fn encoding(&self) -> Vec<u8> {
        encode_entry(&self.key, &self.value)
    }

    /// Leaf hash of this entry.
    pub fn leaf(&self) -> Hash {
        leaf_hash(&self.encoding())
    }

    /// Decoded key.
    pub fn stored_key(&self) -> Option<StoredKey<'_>> {
        encoding::parse_key(&self.key)
    }

    /// Decoded value.
    pub fn stored_value(&self) -> Option<StoredValue<'_>> {
        encoding::parse_value(&self.value)
    }
}

/// Transaction metadata returned by every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHeader {
    /// Entry encoding version the entry-hash was computed with.
    pub version: u8,
    /// Transaction id.
    pub id: TxId,
    /// Commit timestamp. Not part of the authenticated digest.
    pub timestamp: DateTime<Utc>,
    /// Number of stored entries.
    pub nentries: u32,
    /// Merkle root over the transaction's entries.
    pub entry_hash: Hash,
    /// Authenticated index root after folding this transaction in.
    pub root_hash: Hash,
}

impl TxHeader {
    /// Leaf of this transaction in the authenticated index.
    pub fn leaf(&self) -> Hash {
        leaf_hash(&self.entry_hash)
    }
}

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction header.
    pub header: TxHeader,
    /// Stored entries in commit order.
    pub entries: Vec<TxEntry>,
}

impl Transaction {
    /// Builds the in-memory Merkle tree over this transaction's entries.
    pub fn entry_tree(&self) -> MerkleTree {
        MerkleTree::from_leaf_hashes(self.entries.iter().map(TxEntry::leaf).collect())
    }

    /// Recomputes the entry-hash from the entries.
    pub fn compute_entry_hash(&self) -> Hash {
        if self.entries.is_empty() {
            return EMPTY_HASH;
        }
        self.entry_tree().root()
    }

    /// Audit path from entry `index` to the entry-hash.
    pub fn entry_proof(&self, index: usize) -> Option<MerklePath> {
        self.entry_tree().proof(index as u64)
    }

    /// Finds the plain entry for a user key.
    pub fn find_plain(&self, user_key: &[u8]) -> Option<(usize, &TxEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| matches!(e.stored_key(), Some(StoredKey::Plain(k)) if k == user_key))
    }

    /// Encoding version used by this transaction.
    pub fn version(&self) -> u8 {
        self.header.version
    }
}

/// Current encoding version for new transactions.
pub const TX_VERSION: u8 = ENTRY_ENCODING_VERSION;

// ============================================================================
// Operations
// ============================================================================

/// Direct key/value write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// User key (non-empty).
    pub key: Vec<u8>,
    /// Value (may be empty).
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Creates a key/value write.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Adds `key` to sorted set `set` with `score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZAddRequest {
    /// Set name.
    pub set: Vec<u8>,
    /// Member score (finite).
    pub score: f64,
    /// Member key.
    pub key: Vec<u8>,
    /// Transaction holding the key's value; 0 resolves in-batch and is stored
    /// pinned to the committing transaction.
    pub at_tx: TxId,
}

impl ZAddRequest {
    /// Creates a ZAdd.
    pub fn new(set: impl Into<Vec<u8>>, score: f64, key: impl Into<Vec<u8>>, at_tx: TxId) -> Self {
        Self { set: set.into(), score, key: key.into(), at_tx }
    }
}

/// Aliases `key` to `referenced_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRequest {
    /// Reference name.
    pub key: Vec<u8>,
    /// Target key.
    pub referenced_key: Vec<u8>,
    /// Transaction holding the target; 0 follows the target's latest value.
    pub at_tx: TxId,
}

impl ReferenceRequest {
    /// Creates a reference.
    pub fn new(key: impl Into<Vec<u8>>, referenced_key: impl Into<Vec<u8>>, at_tx: TxId) -> Self {
        Self { key: key.into(), referenced_key: referenced_key.into(), at_tx }
    }
}

/// One element of a batch. Exactly one variant is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Direct key/value write.
    Kv(KeyValue),
    /// Sorted-set index entry.
    ZAdd(ZAddRequest),
    /// Key reference.
    Reference(ReferenceRequest),
}

impl Operation {
    /// Encodes the operation for transport.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        codec::encode(self)
            .map_err(|e| IllegalArgumentSnafu { message: format!("operation: {e}") }.build())
    }

    /// Decodes an operation, rejecting unknown variant tags.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for malformed bytes or an unrecognized variant.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        codec::decode(bytes)
            .map_err(|e| IllegalArgumentSnafu { message: format!("operation: {e}") }.build())
    }
}

/// Wire form of a batch element: three optional slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpRequest {
    /// Direct write slot.
    pub kv: Option<KeyValue>,
    /// ZAdd slot.
    pub zadd: Option<ZAddRequest>,
    /// Reference slot.
    pub reference: Option<ReferenceRequest>,
}

impl TryFrom<OpRequest> for Operation {
    type Error = StoreError;

    fn try_from(req: OpRequest) -> Result<Self, Self::Error> {
        match (req.kv, req.zadd, req.reference) {
            (Some(kv), None, None) => Ok(Self::Kv(kv)),
            (None, Some(zadd), None) => Ok(Self::ZAdd(zadd)),
            (None, None, Some(reference)) => Ok(Self::Reference(reference)),
            (None, None, None) => IllegalArgumentSnafu { message: "operation is not set" }.fail(),
            _ => IllegalArgumentSnafu { message: "operation sets more than one variant" }.fail(),
        }
    }
}

impl From<KeyValue> for Operation {
    fn from(kv: KeyValue) -> Self {
        Self::Kv(kv)
    }
}

impl From<ZAddRequest> for Operation {
    fn from(zadd: ZAddRequest) -> Self {
        Self::ZAdd(zadd)
    }
}

impl From<ReferenceRequest> for Operation {
    fn from(reference: ReferenceRequest) -> Self {
        Self::Reference(reference)
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Point lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// User key.
    pub key: Vec<u8>,
    /// Fail with `TxNotFound` unless the store has reached this tx.
    pub since_tx: TxId,
    /// Read the value written exactly in this tx; 0 means latest.
    pub at_tx: TxId,
}

impl KeyRequest {
    /// Latest value of `key`.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), since_tx: 0, at_tx: 0 }
    }

    /// Requires the store to have reached `tx`.
    #[must_use]
    pub fn since(mut self, tx: TxId) -> Self {
        self.since_tx = tx;
        self
    }

    /// Reads the value written in `tx`.
    #[must_use]
    pub fn at(mut self, tx: TxId) -> Self {
        self.at_tx = tx;
        self
    }
}

/// History of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// User key.
    pub key: Vec<u8>,
    /// Versions to skip.
    pub offset: u64,
    /// Maximum versions to return; 0 means the configured maximum.
    pub limit: u64,
    /// Newest first.
    pub desc: bool,
}

impl HistoryRequest {
    /// Full ascending history of `key`.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), ..Self::default() }
    }
}

/// Where a value was reached through a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    /// Reference name.
    pub key: Vec<u8>,
    /// Transaction that wrote the reference.
    pub tx: TxId,
    /// Pinned target transaction, 0 when unpinned.
    pub at_tx: TxId,
}

/// A user-visible value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// User key holding the value.
    pub key: Vec<u8>,
    /// Value payload.
    pub value: Vec<u8>,
    /// Transaction that wrote the value.
    pub tx: TxId,
    /// Set when the value was reached through a reference.
    pub referenced_by: Option<ReferenceInfo>,
}

impl Entry {
    /// Encoding of the stored entry a proof for this value covers.
    ///
    /// Through a reference that is the reference entry itself.
    pub fn proof_encoding(&self) -> Vec<u8> {
        match &self.referenced_by {
            None => encode_kv(&self.key, &self.value),
            Some(reference) => {
                encode_entry(&plain_key(&reference.key), &reference_value(reference.at_tx, &self.key))
            },
        }
    }

    /// Transaction the proof for this value covers.
    pub fn proof_tx(&self) -> TxId {
        self.referenced_by.as_ref().map_or(self.tx, |reference| reference.tx)
    }
}

/// Restart position of a sorted-set scan. The scan resumes strictly after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZCursor {
    /// Member score.
    pub score: f64,
    /// Member key.
    pub key: Vec<u8>,
    /// Member pin.
    pub at_tx: TxId,
}

/// Sorted-set range scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScanRequest {
    /// Set name.
    pub set: Vec<u8>,
    /// Fail with `TxNotFound` unless the store has reached this tx.
    pub since_tx: TxId,
    /// Maximum entries; 0 means the configured maximum.
    pub limit: u64,
    /// Highest score first.
    pub desc: bool,
    /// Inclusive lower score bound.
    pub min_score: Option<f64>,
    /// Inclusive upper score bound.
    pub max_score: Option<f64>,
    /// Resume strictly after this member.
    pub after: Option<ZCursor>,
}

impl ZScanRequest {
    /// Ascending scan over the whole set.
    pub fn new(set: impl Into<Vec<u8>>) -> Self {
        Self {
            set: set.into(),
            since_tx: 0,
            limit: 0,
            desc: false,
            min_score: None,
            max_score: None,
            after: None,
        }
    }
}

/// One sorted-set member with its resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZEntry {
    /// Set name.
    pub set: Vec<u8>,
    /// Member key.
    pub key: Vec<u8>,
    /// Member score.
    pub score: f64,
    /// Transaction holding the member's value.
    pub at_tx: TxId,
    /// Transaction that first added the member.
    pub tx: TxId,
    /// Resolved value of the member key.
    pub entry: Entry,
}

impl ZEntry {
    /// Cursor for resuming a scan after this entry.
    pub fn cursor(&self) -> ZCursor {
        ZCursor { score: self.score, key: self.key.clone(), at_tx: self.at_tx }
    }
}

// ============================================================================
// Proofs
// ============================================================================

/// A trusted `(tx, root)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableState {
    /// Transaction id; 0 for the empty store.
    pub tx_id: TxId,
    /// Authenticated root at `tx_id`.
    pub root: Hash,
}

impl ImmutableState {
    /// State of the empty store.
    pub const EMPTY: Self = Self { tx_id: 0, root: EMPTY_HASH };
}

/// Proof that one transaction's entry-hash folds to a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInclusionProof {
    /// Proven transaction.
    pub tx_id: TxId,
    /// Transaction whose root the proof targets.
    pub root_tx_id: TxId,
    /// Path from `leaf_hash(entry_hash)` to `root(root_tx_id)`.
    pub path: MerklePath,
}

/// Proof that one entry is included in a root: entry → entry-hash → root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Transaction containing the entry.
    pub tx_id: TxId,
    /// Transaction whose root the proof targets.
    pub root_tx_id: TxId,
    /// Path from the entry leaf to the transaction's entry-hash.
    pub entry: MerklePath,
    /// Path from the transaction leaf to `root(root_tx_id)`.
    pub tx: MerklePath,
}

/// Proof that the tree at `old_tx_id` is a prefix of the tree at `new_tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    /// Older transaction id.
    pub old_tx_id: TxId,
    /// Root at `old_tx_id`.
    pub old_root: Hash,
    /// Newer transaction id.
    pub new_tx_id: TxId,
    /// Root at `new_tx_id`.
    pub new_root: Hash,
    /// RFC 6962 consistency path.
    pub hashes: Vec<Hash>,
}

/// A value with everything needed to verify it against a trusted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableEntry {
    /// The value.
    pub entry: Entry,
    /// Header of the transaction the proof covers.
    pub tx: TxHeader,
    /// Entry → root proof.
    pub inclusion: InclusionProof,
    /// Trusted root → current root, when a trusted tx was supplied.
    pub consistency: Option<ConsistencyProof>,
    /// State the proofs target.
    pub state: ImmutableState,
}

/// A whole transaction with its inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableTx {
    /// The transaction.
    pub tx: Transaction,
    /// Transaction → root proof.
    pub inclusion: TxInclusionProof,
    /// Trusted root → current root, when a trusted tx was supplied.
    pub consistency: Option<ConsistencyProof>,
    /// State the proofs target.
    pub state: ImmutableState,
}
