//! Proof engine: inclusion and consistency proofs from the authenticated index.
//!
//! Range checks happen here so every proof the store hands out is
//! well-formed; the folding itself is the shared generic code in
//! [`proofkv_types::merkle`].

use proofkv_types::{
    ConsistencyProof, InclusionProof, Result, Transaction, TxId, TxInclusionProof,
    error::{InternalSnafu, TxNotFoundSnafu},
};

use crate::{backend::StorageBackend, metrics, tree::MerkleIndex};

fn check_root_tx<B: StorageBackend>(tree: &MerkleIndex<B>, root_tx_id: TxId) -> Result<()> {
    if root_tx_id > tree.leaf_count() {
        return TxNotFoundSnafu { tx_id: root_tx_id }.fail();
    }
    Ok(())
}

/// Proof that transaction `tx_id` is included in `root(root_tx_id)`.
///
/// # Errors
///
/// `TxNotFound` unless `1 <= tx_id <= root_tx_id <= latest`.
pub fn tx_inclusion<B: StorageBackend>(
    tree: &MerkleIndex<B>,
    tx_id: TxId,
    root_tx_id: TxId,
) -> Result<TxInclusionProof> {
    check_root_tx(tree, root_tx_id)?;
    if tx_id == 0 || tx_id > root_tx_id {
        return TxNotFoundSnafu { tx_id }.fail();
    }
    let _timer = metrics::proof_timer("inclusion");
    let path = tree.inclusion_path(tx_id, root_tx_id)?;
    Ok(TxInclusionProof { tx_id, root_tx_id, path })
}

/// Proof that entry `entry_index` of `tx` is included in `root(root_tx_id)`.
///
/// # Errors
///
/// `TxNotFound` for an out-of-range tx; `Internal` if `entry_index` is not an
/// entry of `tx`.
pub fn entry_inclusion<B: StorageBackend>(
    tree: &MerkleIndex<B>,
    tx: &Transaction,
    entry_index: usize,
    root_tx_id: TxId,
) -> Result<InclusionProof> {
    let Some(entry) = tx.entry_proof(entry_index) else {
        return InternalSnafu {
            message: format!("transaction {} has no entry {entry_index}", tx.header.id),
        }
        .fail();
    };
    let tx_proof = tx_inclusion(tree, tx.header.id, root_tx_id)?;
    Ok(InclusionProof { tx_id: tx.header.id, root_tx_id, entry, tx: tx_proof.path })
}

/// Proof that the tree at `old_tx_id` is a prefix of the tree at `new_tx_id`.
///
/// # Errors
///
/// `TxNotFound` when `old_tx_id > new_tx_id` or `new_tx_id` is beyond latest.
pub fn consistency<B: StorageBackend>(
    tree: &MerkleIndex<B>,
    old_tx_id: TxId,
    new_tx_id: TxId,
) -> Result<ConsistencyProof> {
    check_root_tx(tree, new_tx_id)?;
    if old_tx_id > new_tx_id {
        return TxNotFoundSnafu { tx_id: old_tx_id }.fail();
    }
    let _timer = metrics::proof_timer("consistency");
    Ok(ConsistencyProof {
        old_tx_id,
        old_root: tree.root_at(old_tx_id)?,
        new_tx_id,
        new_root: tree.root_at(new_tx_id)?,
        hashes: tree.consistency_path(old_tx_id, new_tx_id)?,
    })
}
