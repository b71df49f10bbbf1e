//! The `Store` facade: one lock-guarded aggregate of log, tree and indexes.
//!
//! # Concurrency
//!
//! All mutable state lives in a single [`StoreState`] behind a
//! `parking_lot::RwLock`:
//!
//! - Stateless batch validation runs before any lock is taken.
//! - Target resolution, the log append, the Merkle append and the index
//!   updates run under the write lock, so `latest()` and `root(latest())` are
//!   always observed together.
//! - Reads take the read lock and never block each other.
//!
//! # Failure model
//!
//! A commit writes the log frame, then the Merkle nodes. If either write
//! fails, both segments are rolled back to the previous transaction. If the
//! rollback itself fails the store marks itself failed: further writes return
//! `Storage` until it is reopened, while reads keep working.

use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard};
use proofkv_types::{
    ConsistencyProof, EMPTY_HASH, Entry, Hash, HistoryRequest, ImmutableState, KeyRequest,
    KeyValue, Operation, ReferenceInfo, ReferenceRequest, Result, TX_VERSION, Transaction,
    TxEntry, TxHeader, TxId, TxInclusionProof, VerifiableEntry, VerifiableTx, ZAddRequest, ZEntry,
    ZScanRequest,
    config::StoreConfig,
    encoding::StoredValue,
    error::{
        IllegalArgumentSnafu, InternalSnafu, KeyNotFoundSnafu, ReferenceUnresolvedSnafu,
        StorageSnafu, TxNotFoundSnafu,
    },
    hash::to_hex,
};
use snafu::OptionExt;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{FileBackend, InMemoryBackend, StorageBackend},
    error::{self, Error},
    executor::{self, UnpinnedResolution},
    index::{KeyIndex, KeyVersion},
    log::TxLog,
    metrics, proof,
    scan::ZScan,
    tree::{Frontier, MerkleIndex, NODE_SIZE},
    zindex::{ZIndex, ZIndexKey},
};

/// Transaction log file name inside a store directory.
pub const LOG_FILE: &str = "tx.log";

/// Merkle node file name inside a store directory.
pub const NODES_FILE: &str = "tree.nodes";

/// Everything the append section mutates.
pub(crate) struct StoreState<B: StorageBackend> {
    pub(crate) log: TxLog<B>,
    pub(crate) tree: MerkleIndex<B>,
    pub(crate) keys: KeyIndex,
    pub(crate) zindex: ZIndex,
}

impl<B: StorageBackend> StoreState<B> {
    pub(crate) fn latest(&self) -> TxId {
        self.log.latest()
    }

    pub(crate) fn immutable_state(&self) -> ImmutableState {
        ImmutableState { tx_id: self.latest(), root: self.tree.root() }
    }

    pub(crate) fn read_tx(&self, tx_id: TxId) -> Result<Transaction> {
        self.log.read(tx_id)?.context(TxNotFoundSnafu { tx_id })
    }

    /// Reads a version that must hold a plain value.
    fn plain_entry(&self, key: &[u8], version: &KeyVersion) -> Result<Entry> {
        let tx = self.read_tx(version.tx)?;
        let stored = tx.entries.get(version.index as usize).context(InternalSnafu {
            message: format!("transaction {} has no entry {}", version.tx, version.index),
        })?;
        match stored.stored_value() {
            Some(StoredValue::Plain(value)) => Ok(Entry {
                key: key.to_vec(),
                value: value.to_vec(),
                tx: version.tx,
                referenced_by: None,
            }),
            _ => InternalSnafu {
                message: format!(
                    "entry {} of transaction {} is not a plain value",
                    version.index, version.tx
                ),
            }
            .fail(),
        }
    }

    /// Materializes a version, following a reference one hop.
    ///
    /// Unpinned reference targets resolve as of `snapshot`.
    pub(crate) fn entry_for_version(
        &self,
        key: &[u8],
        version: &KeyVersion,
        snapshot: TxId,
    ) -> Result<Entry> {
        if !version.is_reference {
            return self.plain_entry(key, version);
        }

        let tx = self.read_tx(version.tx)?;
        let Some(StoredValue::Reference { at_tx, target }) = tx
            .entries
            .get(version.index as usize)
            .and_then(|entry| entry.stored_value())
        else {
            return InternalSnafu {
                message: format!(
                    "entry {} of transaction {} is not a reference",
                    version.index, version.tx
                ),
            }
            .fail();
        };

        let target_version = if at_tx == 0 {
            self.keys.latest_at(target, snapshot)
        } else {
            self.keys.in_tx(target, at_tx)
        };
        let target_version = match target_version {
            Some(v) if !v.is_reference => *v,
            _ => return ReferenceUnresolvedSnafu { key: target.to_vec(), at_tx }.fail(),
        };

        let mut entry = self.plain_entry(target, &target_version)?;
        entry.referenced_by = Some(ReferenceInfo { key: key.to_vec(), tx: version.tx, at_tx });
        Ok(entry)
    }

    pub(crate) fn get(&self, req: &KeyRequest) -> Result<Entry> {
        let latest = self.latest();
        if req.since_tx > latest {
            return TxNotFoundSnafu { tx_id: req.since_tx }.fail();
        }
        if req.key.is_empty() {
            return IllegalArgumentSnafu { message: "key must not be empty" }.fail();
        }
        let version = if req.at_tx == 0 {
            self.keys.latest_at(&req.key, latest)
        } else {
            if req.at_tx > latest {
                return TxNotFoundSnafu { tx_id: req.at_tx }.fail();
            }
            self.keys.in_tx(&req.key, req.at_tx)
        };
        let version = *version.context(KeyNotFoundSnafu { key: req.key.clone() })?;
        self.entry_for_version(&req.key, &version, latest)
    }

    /// Materializes one sorted-set member with the value it was pinned to.
    pub(crate) fn zentry(
        &self,
        set: &[u8],
        member: &ZIndexKey,
        first_tx: TxId,
        snapshot: TxId,
    ) -> Result<ZEntry> {
        let version = *self
            .keys
            .in_tx(&member.key, member.at_tx)
            .context(KeyNotFoundSnafu { key: member.key.clone() })?;
        let entry = self.entry_for_version(&member.key, &version, snapshot)?;
        Ok(ZEntry {
            set: set.to_vec(),
            key: member.key.clone(),
            score: member.score_f64(),
            at_tx: member.at_tx,
            tx: first_tx,
            entry,
        })
    }
}

/// Checks a replayed transaction against its own header.
fn check_transaction(tx: &Transaction) -> error::Result<()> {
    let id = tx.header.id;
    let corrupted = |reason: String| Err(Error::Corrupted { reason });
    if tx.header.version != TX_VERSION {
        return corrupted(format!("transaction {id} has unknown version {}", tx.header.version));
    }
    if tx.entries.is_empty() || tx.header.nentries as usize != tx.entries.len() {
        return corrupted(format!(
            "transaction {id} declares {} entries, holds {}",
            tx.header.nentries,
            tx.entries.len()
        ));
    }
    if tx.entries.iter().any(|e| e.stored_key().is_none() || e.stored_value().is_none()) {
        return corrupted(format!("transaction {id} holds an undecodable entry"));
    }
    if tx.compute_entry_hash() != tx.header.entry_hash {
        return corrupted(format!("transaction {id} entry hash mismatch"));
    }
    Ok(())
}

/// Tamper-evident key-value store.
///
/// # Example
///
/// ```no_run
/// use proofkv_store::Store;
/// use proofkv_types::{KeyRequest, KeyValue, config::StoreConfig, verify_verifiable_entry};
///
/// let store = Store::open("/tmp/proofkv", StoreConfig::default())?;
/// store.set(vec![KeyValue::new("key", "value")])?;
///
/// let verified = store.verifiable_get(&KeyRequest::new("key"), None)?;
/// assert_eq!(verify_verifiable_entry(&verified, None), Some(store.state()));
/// # Ok::<(), proofkv_types::StoreError>(())
/// ```
pub struct Store<B: StorageBackend> {
    state: RwLock<StoreState<B>>,
    config: StoreConfig,
    failed: AtomicBool,
}

impl<B: StorageBackend> std::fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Store<FileBackend> {
    /// Opens (or creates) a store in `dir`.
    ///
    /// # Errors
    ///
    /// `Storage` if the directory or files cannot be opened, `Corrupted` if
    /// recovery finds damaged data, `IllegalArgument` for an invalid config.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(Error::from)?;
        let log = FileBackend::open(dir.join(LOG_FILE))?;
        let nodes = FileBackend::open(dir.join(NODES_FILE))?;
        Self::from_backends(log, nodes, config)
    }
}

impl Store<InMemoryBackend> {
    /// Creates an empty, non-durable store.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an invalid config.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        Self::from_backends(InMemoryBackend::new(), InMemoryBackend::new(), config)
    }
}

impl<B: StorageBackend> Store<B> {
    /// Opens a store over explicit log and node segments, running recovery.
    ///
    /// Recovery replays every transaction, checks its entry hash and recorded
    /// root, rebuilds Merkle nodes missing after a crash and drops nodes for
    /// transactions the log never made durable.
    ///
    /// # Errors
    ///
    /// `Corrupted` if any check fails, `Storage` on I/O errors.
    pub fn from_backends(log: B, nodes: B, config: StoreConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IllegalArgumentSnafu { message: e.to_string() }.build())?;
        let start = Instant::now();

        let mut tree = MerkleIndex::open(nodes)?;
        let stored_leaves = tree.leaf_count();
        let mut frontier = Frontier::default();
        let mut keys = KeyIndex::new();
        let mut zindex = ZIndex::new();
        let mut rebuilt = 0u64;

        let (log, recovery) = TxLog::open(log, |tx| {
            check_transaction(tx)?;
            let id = tx.header.id;
            let leaf = tx.header.leaf();
            frontier.push(leaf);
            if frontier.root() != tx.header.root_hash {
                return Err(Error::Corrupted {
                    reason: format!("transaction {id} root hash does not match its history"),
                });
            }
            if id <= stored_leaves {
                if tree.leaf(id)? != leaf {
                    return Err(Error::Corrupted {
                        reason: format!("stored Merkle leaf {id} does not match the log"),
                    });
                }
            } else {
                tree.append(leaf, false)?;
                rebuilt += 1;
            }
            keys.apply(tx);
            zindex.apply(tx);
            Ok(())
        })?;

        let latest = log.latest();
        let mut dropped = 0;
        if tree.leaf_count() > latest {
            dropped = tree.leaf_count() - latest;
            warn!(tree_leaves = tree.leaf_count(), latest, "Dropping Merkle leaves beyond the log");
            tree.truncate_leaves(latest)?;
        }
        if rebuilt > 0 {
            warn!(rebuilt, latest, "Rebuilt Merkle nodes missing from the node store");
            tree.sync()?;
        }
        metrics::record_recovery_repairs(rebuilt + dropped);

        if tree.root() != frontier.root() {
            return Err(Error::Corrupted {
                reason: "Merkle node store root does not match the transaction log".to_string(),
            }
            .into());
        }

        info!(
            latest,
            root = %to_hex(&tree.root()),
            keys = keys.len(),
            truncated_bytes = recovery.truncated_bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Opened store"
        );
        metrics::set_latest_tx(latest);
        metrics::set_store_failed(false);

        Ok(Self {
            state: RwLock::new(StoreState { log, tree, keys, zindex }),
            config,
            failed: AtomicBool::new(false),
        })
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, StoreState<B>> {
        self.state.read()
    }

    /// Whether an unrecoverable write error disabled writes.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Writes plain key/values as one transaction.
    ///
    /// # Errors
    ///
    /// See [`Store::exec_all`].
    #[instrument(skip(self, kvs), fields(batch_size = kvs.len()))]
    pub fn set(&self, kvs: Vec<KeyValue>) -> Result<TxHeader> {
        self.commit(kvs.into_iter().map(Operation::Kv).collect(), UnpinnedResolution::BatchOnly)
    }

    /// Commits a heterogeneous batch atomically.
    ///
    /// Unpinned ZAdd and reference targets must be written by the batch.
    ///
    /// # Errors
    ///
    /// `EmptyBatch`, `IllegalArgument`, `DuplicateKey`, `DuplicateZAdd`,
    /// `TxNotFound`, `KeyNotFound` or `ReferenceUnresolved` when the batch is
    /// rejected; `Storage` when the write fails. Nothing is committed then.
    #[instrument(skip(self, ops), fields(batch_size = ops.len()))]
    pub fn exec_all(&self, ops: Vec<Operation>) -> Result<TxHeader> {
        self.commit(ops, UnpinnedResolution::BatchOnly)
    }

    /// Adds `key` to sorted set `set`.
    ///
    /// Without `at_tx` the member is pinned to the key's latest committed
    /// value.
    ///
    /// # Errors
    ///
    /// See [`Store::exec_all`].
    #[instrument(skip(self, set, key))]
    pub fn zadd(
        &self,
        set: impl Into<Vec<u8>>,
        score: f64,
        key: impl Into<Vec<u8>>,
        at_tx: Option<TxId>,
    ) -> Result<TxHeader> {
        let op = ZAddRequest::new(set, score, key, at_tx.unwrap_or(0));
        self.commit(vec![op.into()], UnpinnedResolution::BatchThenCommitted)
    }

    /// Makes `name` an alias of `target`.
    ///
    /// # Errors
    ///
    /// See [`Store::exec_all`].
    #[instrument(skip(self, name, target))]
    pub fn set_reference(
        &self,
        name: impl Into<Vec<u8>>,
        target: impl Into<Vec<u8>>,
        at_tx: Option<TxId>,
    ) -> Result<TxHeader> {
        let op = ReferenceRequest::new(name, target, at_tx.unwrap_or(0));
        self.commit(vec![op.into()], UnpinnedResolution::BatchThenCommitted)
    }

    /// Commits `ops` with the given resolution of unpinned targets.
    pub(crate) fn commit(&self, ops: Vec<Operation>, mode: UnpinnedResolution) -> Result<TxHeader> {
        let start = Instant::now();
        let batch_size = ops.len();
        let result = self.commit_inner(ops, mode);
        let elapsed = start.elapsed();

        metrics::record_commit(result.is_ok(), batch_size, elapsed.as_secs_f64());
        if let Ok(header) = &result {
            metrics::set_latest_tx(header.id);
            if elapsed > self.config.slow_commit_threshold {
                metrics::record_slow_commit();
                warn!(
                    tx_id = header.id,
                    batch_size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Slow commit"
                );
            }
        }
        result
    }

    fn commit_inner(&self, ops: Vec<Operation>, mode: UnpinnedResolution) -> Result<TxHeader> {
        let batch = executor::validate_batch(ops, &self.config)?;

        let mut state = self.state.write();
        if self.is_failed() {
            return StorageSnafu {
                message: "store is read-only after a failed rollback; reopen it",
            }
            .fail();
        }
        let entries = executor::resolve(&batch, &state.keys, state.latest(), mode)?;
        let header = self.append(&mut state, entries)?;
        debug!(
            tx_id = header.id,
            entries = header.nentries,
            root = %to_hex(&header.root_hash),
            "Committed transaction"
        );
        Ok(header)
    }

    /// Appends one transaction to the log and the tree, then updates indexes.
    fn append(&self, state: &mut StoreState<B>, entries: Vec<TxEntry>) -> Result<TxHeader> {
        let sync = self.config.sync_on_commit;
        let previous = state.latest();
        let mut tx = Transaction {
            header: TxHeader {
                version: TX_VERSION,
                id: previous + 1,
                timestamp: Utc::now(),
                nentries: entries.len() as u32,
                entry_hash: EMPTY_HASH,
                root_hash: EMPTY_HASH,
            },
            entries,
        };
        tx.header.entry_hash = tx.compute_entry_hash();
        let leaf = tx.header.leaf();
        tx.header.root_hash = state.tree.root_with(leaf);

        let log_bytes = state.log.size_bytes();
        if let Err(err) = state.log.append(&tx, sync) {
            self.rollback(state, previous);
            return Err(err.into());
        }
        if let Err(err) = state.tree.append(leaf, sync) {
            self.rollback(state, previous);
            return Err(err.into());
        }

        metrics::record_bytes_written("log", state.log.size_bytes() - log_bytes);
        metrics::record_bytes_written(
            "nodes",
            u64::from(1 + previous.trailing_ones()) * NODE_SIZE as u64,
        );
        state.keys.apply(&tx);
        state.zindex.apply(&tx);
        Ok(tx.header)
    }

    /// Restores both segments to transaction `keep`, or fails the store.
    fn rollback(&self, state: &mut StoreState<B>, keep: TxId) {
        let result = state
            .log
            .truncate_after(keep)
            .and_then(|()| state.log.discard_tail())
            .and_then(|()| state.tree.truncate_leaves(keep))
            .and_then(|()| state.tree.discard_tail());
        if let Err(err) = result {
            self.failed.store(true, Ordering::Release);
            metrics::set_store_failed(true);
            error!(error = %err, tx_id = keep + 1, "Rollback failed, store is now read-only");
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Latest committed transaction id; 0 for an empty store.
    pub fn latest(&self) -> TxId {
        self.state.read().latest()
    }

    /// Latest transaction id and its root.
    pub fn state(&self) -> ImmutableState {
        self.state.read().immutable_state()
    }

    /// Authenticated root after `tx_id` transactions.
    ///
    /// # Errors
    ///
    /// `TxNotFound` if `tx_id` is beyond the latest transaction.
    pub fn root_at(&self, tx_id: TxId) -> Result<Hash> {
        let state = self.state.read();
        if tx_id > state.latest() {
            return TxNotFoundSnafu { tx_id }.fail();
        }
        Ok(state.tree.root_at(tx_id)?)
    }

    /// Reads a committed transaction.
    ///
    /// # Errors
    ///
    /// `TxNotFound` if it does not exist.
    pub fn tx_by_id(&self, tx_id: TxId) -> Result<Transaction> {
        self.state.read().read_tx(tx_id)
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// `TxNotFound` if `since_tx` or `at_tx` is beyond latest; `KeyNotFound`
    /// if the key has no value there; `ReferenceUnresolved` for a dangling
    /// reference.
    #[instrument(skip(self, req), fields(since_tx = req.since_tx, at_tx = req.at_tx))]
    pub fn get(&self, req: &KeyRequest) -> Result<Entry> {
        let start = Instant::now();
        let result = self.state.read().get(req);
        metrics::record_read("get", result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    /// Versions of a key across all transactions.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key was never written; `IllegalArgument` if
    /// `limit` exceeds the configured maximum.
    #[instrument(skip(self, req), fields(offset = req.offset, limit = req.limit, desc = req.desc))]
    pub fn history(&self, req: &HistoryRequest) -> Result<Vec<Entry>> {
        let start = Instant::now();
        let limit = self.effective_limit(req.limit)?;
        let state = self.state.read();
        let latest = state.latest();
        let versions = state.keys.versions(&req.key);
        if versions.is_empty() {
            return KeyNotFoundSnafu { key: req.key.clone() }.fail();
        }

        let offset = usize::try_from(req.offset).unwrap_or(usize::MAX);
        let page: Vec<&KeyVersion> = if req.desc {
            versions.iter().rev().skip(offset).take(limit).collect()
        } else {
            versions.iter().skip(offset).take(limit).collect()
        };
        let result = page
            .into_iter()
            .map(|version| state.entry_for_version(&req.key, version, latest))
            .collect::<Result<Vec<_>>>();
        metrics::record_read("history", result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    /// Resolves a requested page size against `max_scan_limit`.
    pub(crate) fn effective_limit(&self, limit: u64) -> Result<usize> {
        let max = self.config.max_scan_limit;
        if limit > max {
            return IllegalArgumentSnafu { message: format!("limit {limit} exceeds {max}") }.fail();
        }
        let limit = if limit == 0 { max } else { limit };
        Ok(usize::try_from(limit).unwrap_or(usize::MAX))
    }

    /// Lazy scan of a sorted set as of the latest transaction.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for a malformed request; `TxNotFound` if `since_tx`
    /// is beyond latest.
    pub fn zscan(&self, req: ZScanRequest) -> Result<ZScan<'_, B>> {
        let snapshot = self.latest();
        ZScan::new(self, req, snapshot)
    }

    /// Lazy scan of a sorted set as of `snapshot`.
    ///
    /// # Errors
    ///
    /// As [`Store::zscan`], plus `TxNotFound` if `snapshot` is beyond latest.
    pub fn zscan_at(&self, req: ZScanRequest, snapshot: TxId) -> Result<ZScan<'_, B>> {
        ZScan::new(self, req, snapshot)
    }

    // ------------------------------------------------------------------
    // Proofs
    // ------------------------------------------------------------------

    /// Proof that transaction `tx_id` is included in `root(root_tx_id)`.
    ///
    /// # Errors
    ///
    /// `TxNotFound` unless `1 <= tx_id <= root_tx_id <= latest`.
    #[instrument(skip(self))]
    pub fn inclusion_proof(&self, tx_id: TxId, root_tx_id: TxId) -> Result<TxInclusionProof> {
        proof::tx_inclusion(&self.state.read().tree, tx_id, root_tx_id)
    }

    /// Proof that the tree at `old_tx_id` is a prefix of the tree at `new_tx_id`.
    ///
    /// # Errors
    ///
    /// `TxNotFound` if `old_tx_id > new_tx_id` or `new_tx_id` is beyond latest.
    #[instrument(skip(self))]
    pub fn consistency_proof(&self, old_tx_id: TxId, new_tx_id: TxId) -> Result<ConsistencyProof> {
        proof::consistency(&self.state.read().tree, old_tx_id, new_tx_id)
    }

    /// Point lookup with an inclusion proof against the latest root, plus a
    /// consistency proof from `prove_since` when given.
    ///
    /// # Errors
    ///
    /// As [`Store::get`], plus `TxNotFound` if `prove_since` is beyond latest.
    #[instrument(skip(self, req))]
    pub fn verifiable_get(
        &self,
        req: &KeyRequest,
        prove_since: Option<TxId>,
    ) -> Result<VerifiableEntry> {
        let result = self.verifiable_get_inner(req, prove_since);
        metrics::record_verified_read(result.is_ok());
        result
    }

    fn verifiable_get_inner(
        &self,
        req: &KeyRequest,
        prove_since: Option<TxId>,
    ) -> Result<VerifiableEntry> {
        let state = self.state.read();
        let current = state.immutable_state();
        if let Some(since) = prove_since.filter(|since| *since > current.tx_id) {
            return TxNotFoundSnafu { tx_id: since }.fail();
        }

        let entry = state.get(req)?;
        let tx = state.read_tx(entry.proof_tx())?;
        let stored_key = entry.referenced_by.as_ref().map_or(&entry.key, |r| &r.key);
        let (index, _) = tx.find_plain(stored_key).context(InternalSnafu {
            message: format!("transaction {} lost its entry", tx.header.id),
        })?;

        let inclusion = proof::entry_inclusion(&state.tree, &tx, index, current.tx_id)?;
        let consistency = prove_since
            .map(|since| proof::consistency(&state.tree, since, current.tx_id))
            .transpose()?;
        Ok(VerifiableEntry { entry, tx: tx.header, inclusion, consistency, state: current })
    }

    /// A whole transaction with an inclusion proof against the latest root.
    ///
    /// # Errors
    ///
    /// `TxNotFound` if `tx_id` or `prove_since` is out of range.
    #[instrument(skip(self))]
    pub fn verifiable_tx_by_id(
        &self,
        tx_id: TxId,
        prove_since: Option<TxId>,
    ) -> Result<VerifiableTx> {
        let result = self.verifiable_tx_by_id_inner(tx_id, prove_since);
        metrics::record_verified_read(result.is_ok());
        result
    }

    fn verifiable_tx_by_id_inner(
        &self,
        tx_id: TxId,
        prove_since: Option<TxId>,
    ) -> Result<VerifiableTx> {
        let state = self.state.read();
        let current = state.immutable_state();
        if let Some(since) = prove_since.filter(|since| *since > current.tx_id) {
            return TxNotFoundSnafu { tx_id: since }.fail();
        }
        let tx = state.read_tx(tx_id)?;
        let inclusion = proof::tx_inclusion(&state.tree, tx_id, current.tx_id)?;
        let consistency = prove_since
            .map(|since| proof::consistency(&state.tree, since, current.tx_id))
            .transpose()?;
        Ok(VerifiableTx { tx, inclusion, consistency, state: current })
    }

    /// Flushes both segments; only useful with `sync_on_commit` disabled.
    ///
    /// # Errors
    ///
    /// `Storage` if a sync fails.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read();
        state.log.sync()?;
        state.tree.sync()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use ::metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use parking_lot::Mutex;
    use proofkv_types::{StoreError, verify_verifiable_entry, verify_verifiable_tx};

    use super::*;

    fn store() -> Store<InMemoryBackend> {
        Store::open_in_memory(StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_store_state() {
        let store = store();
        assert_eq!(store.latest(), 0);
        assert_eq!(store.state(), ImmutableState::EMPTY);
        assert_eq!(store.root_at(0).unwrap(), EMPTY_HASH);
        assert!(matches!(store.root_at(1), Err(StoreError::TxNotFound { tx_id: 1 })));
        assert!(matches!(store.tx_by_id(1), Err(StoreError::TxNotFound { .. })));
    }

    #[test]
    fn test_set_then_get() {
        let store = store();
        let header = store.set(vec![KeyValue::new("a", "1"), KeyValue::new("b", "2")]).unwrap();
        assert_eq!(header.id, 1);
        assert_eq!(header.nentries, 2);

        let entry = store.get(&KeyRequest::new("b")).unwrap();
        assert_eq!(entry.value, b"2");
        assert_eq!(entry.tx, 1);
        assert!(matches!(
            store.get(&KeyRequest::new("missing")),
            Err(StoreError::KeyNotFound { .. })
        ));
        assert!(matches!(
            store.get(&KeyRequest::new("a").since(2)),
            Err(StoreError::TxNotFound { tx_id: 2 })
        ));
    }

    #[test]
    fn test_get_at_tx() {
        let store = store();
        store.set(vec![KeyValue::new("k", "v1")]).unwrap();
        store.set(vec![KeyValue::new("other", "x")]).unwrap();
        store.set(vec![KeyValue::new("k", "v3")]).unwrap();

        assert_eq!(store.get(&KeyRequest::new("k").at(1)).unwrap().value, b"v1");
        assert_eq!(store.get(&KeyRequest::new("k")).unwrap().value, b"v3");
        assert!(matches!(
            store.get(&KeyRequest::new("k").at(2)),
            Err(StoreError::KeyNotFound { .. })
        ));
        assert!(matches!(
            store.get(&KeyRequest::new("k").at(9)),
            Err(StoreError::TxNotFound { tx_id: 9 })
        ));
    }

    #[test]
    fn test_reference_follows_latest_or_pinned_value() {
        let store = store();
        store.set(vec![KeyValue::new("target", "one")]).unwrap();
        store.set_reference("latest", "target", None).unwrap();
        store.set_reference("pinned", "target", Some(1)).unwrap();
        store.set(vec![KeyValue::new("target", "two")]).unwrap();

        let latest = store.get(&KeyRequest::new("latest")).unwrap();
        assert_eq!(latest.key, b"target");
        assert_eq!(latest.value, b"two");
        assert_eq!(latest.referenced_by.as_ref().unwrap().tx, 2);

        let pinned = store.get(&KeyRequest::new("pinned")).unwrap();
        assert_eq!(pinned.value, b"one");
        assert_eq!(pinned.tx, 1);
    }

    #[test]
    fn test_history_paging() {
        let store = store();
        for i in 0..5 {
            store.set(vec![KeyValue::new("k", format!("v{i}"))]).unwrap();
        }
        let all = store.history(&HistoryRequest::new("k")).unwrap();
        assert_eq!(all.iter().map(|e| e.tx).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        let req = HistoryRequest { key: b"k".to_vec(), offset: 1, limit: 2, desc: true };
        let page = store.history(&req).unwrap();
        assert_eq!(page.iter().map(|e| e.tx).collect::<Vec<_>>(), vec![4, 3]);

        let too_many = HistoryRequest { limit: 1_000_000, ..HistoryRequest::new("k") };
        assert!(matches!(store.history(&too_many), Err(StoreError::IllegalArgument { .. })));
        assert!(matches!(
            store.history(&HistoryRequest::new("nope")),
            Err(StoreError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_verifiable_get_through_reference() {
        let store = store();
        store.set(vec![KeyValue::new("target", "value")]).unwrap();
        store.set_reference("alias", "target", None).unwrap();
        store.set(vec![KeyValue::new("noise", "x")]).unwrap();

        let v = store.verifiable_get(&KeyRequest::new("alias"), Some(1)).unwrap();
        assert_eq!(v.tx.id, 2);
        assert_eq!(v.state, store.state());
        let trusted = ImmutableState { tx_id: 1, root: store.root_at(1).unwrap() };
        assert_eq!(verify_verifiable_entry(&v, Some(&trusted)), Some(store.state()));
    }

    #[test]
    fn test_verifiable_tx() {
        let store = store();
        for i in 0..4 {
            store.set(vec![KeyValue::new(format!("k{i}"), "v")]).unwrap();
        }
        let v = store.verifiable_tx_by_id(2, Some(3)).unwrap();
        let trusted = ImmutableState { tx_id: 3, root: store.root_at(3).unwrap() };
        assert_eq!(verify_verifiable_tx(&v, Some(&trusted)), Some(store.state()));
        assert!(matches!(
            store.verifiable_tx_by_id(2, Some(5)),
            Err(StoreError::TxNotFound { tx_id: 5 })
        ));
    }

    /// Counts `proofkv_verified_reads_total` increments by status label.
    #[derive(Default)]
    struct VerifiedReads(Arc<Mutex<HashMap<String, u64>>>);

    struct StatusCounter {
        status: String,
        counts: Arc<Mutex<HashMap<String, u64>>>,
    }

    impl CounterFn for StatusCounter {
        fn increment(&self, value: u64) {
            *self.counts.lock().entry(self.status.clone()).or_default() += value;
        }

        fn absolute(&self, _value: u64) {}
    }

    impl Recorder for VerifiedReads {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name() != "proofkv_verified_reads_total" {
                return Counter::noop();
            }
            let status = key
                .labels()
                .find(|label| label.key() == "status")
                .map(|label| label.value().to_string())
                .unwrap_or_default();
            Counter::from_arc(Arc::new(StatusCounter { status, counts: Arc::clone(&self.0) }))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_verified_reads_record_their_outcome() {
        let store = store();
        store.set(vec![KeyValue::new("k", "v")]).unwrap();

        let recorder = VerifiedReads::default();
        ::metrics::with_local_recorder(&recorder, || {
            store.verifiable_tx_by_id(1, None).unwrap();
            store.verifiable_tx_by_id(7, None).unwrap_err();
            store.verifiable_tx_by_id(1, Some(3)).unwrap_err();
            store.verifiable_get(&KeyRequest::new("missing"), None).unwrap_err();
        });

        let counts = recorder.0.lock();
        assert_eq!(counts.get("success"), Some(&1));
        assert_eq!(counts.get("error"), Some(&3));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig { max_scan_limit: 0, ..StoreConfig::default() };
        assert!(matches!(
            Store::open_in_memory(config),
            Err(StoreError::IllegalArgument { .. })
        ));
    }
}
