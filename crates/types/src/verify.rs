//! Client-side proof verification.
//!
//! Every function here is pure: no I/O, no store access, no panics on hostile
//! input. A proof that fails to fold returns `false` (or `None`), never an
//! error. The folds are the ones in [`crate::merkle`], shared with the store.

use crate::{
    hash::{Hash, hash_eq, leaf_hash},
    merkle::{MerklePath, verify_consistency_path},
    types::{
        ConsistencyProof, ImmutableState, InclusionProof, TxId, TxInclusionProof, VerifiableEntry,
        VerifiableTx,
    },
};

/// Whether `path` places transaction `tx_id` in the tree of `root_tx_id` leaves.
fn tx_path_matches(path: &MerklePath, tx_id: TxId, root_tx_id: TxId) -> bool {
    tx_id >= 1
        && tx_id <= root_tx_id
        && path.leaf_index == tx_id - 1
        && path.tree_size == root_tx_id
}

/// Recomputes the transaction entry-hash implied by an entry and its path.
pub fn entry_hash_from_proof(proof: &InclusionProof, entry_encoding: &[u8]) -> Option<Hash> {
    proof.entry.root_for(&leaf_hash(entry_encoding))
}

/// Verifies that `entry_encoding` is included in `claimed_root`.
///
/// Folds the entry up to its transaction's entry-hash, then folds
/// `leaf_hash(entry-hash)` up to the root of `proof.root_tx_id`.
pub fn verify_inclusion(proof: &InclusionProof, entry_encoding: &[u8], claimed_root: &Hash) -> bool {
    if !tx_path_matches(&proof.tx, proof.tx_id, proof.root_tx_id) {
        return false;
    }
    let Some(entry_hash) = entry_hash_from_proof(proof, entry_encoding) else {
        return false;
    };
    proof.tx.verify(&leaf_hash(&entry_hash), claimed_root)
}

/// Verifies that a transaction with `entry_hash` is included in `claimed_root`.
pub fn verify_tx_inclusion(proof: &TxInclusionProof, entry_hash: &Hash, claimed_root: &Hash) -> bool {
    tx_path_matches(&proof.path, proof.tx_id, proof.root_tx_id)
        && proof.path.verify(&leaf_hash(entry_hash), claimed_root)
}

/// Verifies that the tree with `old_root` is a prefix of the tree with `new_root`.
pub fn verify_consistency(proof: &ConsistencyProof, old_root: &Hash, new_root: &Hash) -> bool {
    verify_consistency_path(proof.old_tx_id, proof.new_tx_id, old_root, new_root, &proof.hashes)
}

/// Checks that moving trust from `trusted` to `state` is justified.
fn state_follows(
    trusted: Option<&ImmutableState>,
    consistency: Option<&ConsistencyProof>,
    state: &ImmutableState,
) -> bool {
    let Some(trusted) = trusted else {
        return true;
    };
    if trusted.tx_id > state.tx_id {
        return false;
    }
    match consistency {
        Some(proof) => {
            proof.old_tx_id == trusted.tx_id
                && proof.new_tx_id == state.tx_id
                && verify_consistency(proof, &trusted.root, &state.root)
        },
        None => trusted.tx_id == state.tx_id && hash_eq(&trusted.root, &state.root),
    }
}

/// Verifies a verifiable read end to end.
///
/// Checks the entry against its transaction header, the header against the
/// returned state, and, when a previously trusted state is given, that the
/// returned state extends it. Returns the state to trust from now on.
pub fn verify_verifiable_entry(
    v: &VerifiableEntry,
    trusted: Option<&ImmutableState>,
) -> Option<ImmutableState> {
    let proof_tx = v.entry.proof_tx();
    if v.tx.id != proof_tx
        || v.inclusion.tx_id != proof_tx
        || v.inclusion.root_tx_id != v.state.tx_id
        || !tx_path_matches(&v.inclusion.tx, v.inclusion.tx_id, v.inclusion.root_tx_id)
    {
        return None;
    }

    let entry_hash = entry_hash_from_proof(&v.inclusion, &v.entry.proof_encoding())?;
    if !hash_eq(&entry_hash, &v.tx.entry_hash) {
        return None;
    }
    if v.tx.id == v.state.tx_id && !hash_eq(&v.tx.root_hash, &v.state.root) {
        return None;
    }
    if !v.inclusion.tx.verify(&leaf_hash(&entry_hash), &v.state.root) {
        return None;
    }
    if !state_follows(trusted, v.consistency.as_ref(), &v.state) {
        return None;
    }
    Some(v.state)
}

/// Verifies a whole transaction against the returned state.
///
/// Recomputes the entry-hash from every entry, so the caller may trust all of
/// them at once.
pub fn verify_verifiable_tx(
    v: &VerifiableTx,
    trusted: Option<&ImmutableState>,
) -> Option<ImmutableState> {
    let header = &v.tx.header;
    if v.inclusion.tx_id != header.id
        || v.inclusion.root_tx_id != v.state.tx_id
        || header.nentries as usize != v.tx.entries.len()
    {
        return None;
    }
    if !hash_eq(&v.tx.compute_entry_hash(), &header.entry_hash) {
        return None;
    }
    if header.id == v.state.tx_id && !hash_eq(&header.root_hash, &v.state.root) {
        return None;
    }
    if !verify_tx_inclusion(&v.inclusion, &header.entry_hash, &v.state.root) {
        return None;
    }
    if !state_follows(trusted, v.consistency.as_ref(), &v.state) {
        return None;
    }
    Some(v.state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        encoding::{encode_kv, plain_key, plain_value},
        hash::EMPTY_HASH,
        merkle::{MerkleTree, consistency_path},
        types::{Entry, Transaction, TxEntry, TxHeader},
    };

    /// Builds `n` single-entry transactions and the tree over their leaves.
    fn history(n: u64) -> (Vec<Transaction>, MerkleTree) {
        let mut txs = Vec::new();
        let mut leaves = Vec::new();
        for id in 1..=n {
            let entries = vec![
                TxEntry { key: plain_key(b"k"), value: plain_value(&id.to_be_bytes()) },
                TxEntry { key: plain_key(&id.to_be_bytes()), value: plain_value(b"x") },
            ];
            let mut tx = Transaction {
                header: TxHeader {
                    version: 1,
                    id,
                    timestamp: chrono::Utc::now(),
                    nentries: 2,
                    entry_hash: EMPTY_HASH,
                    root_hash: EMPTY_HASH,
                },
                entries,
            };
            tx.header.entry_hash = tx.compute_entry_hash();
            leaves.push(tx.header.leaf());
            tx.header.root_hash = MerkleTree::from_leaf_hashes(leaves.clone()).root();
            txs.push(tx);
        }
        (txs, MerkleTree::from_leaf_hashes(leaves))
    }

    fn verifiable(txs: &[Transaction], tree: &MerkleTree, tx_id: TxId) -> VerifiableEntry {
        let tx = &txs[tx_id as usize - 1];
        let state = ImmutableState { tx_id: tree.len() as u64, root: tree.root() };
        VerifiableEntry {
            entry: Entry { key: b"k".to_vec(), value: tx_id.to_be_bytes().to_vec(), tx: tx_id, referenced_by: None },
            tx: tx.header.clone(),
            inclusion: InclusionProof {
                tx_id,
                root_tx_id: state.tx_id,
                entry: tx.entry_proof(0).unwrap(),
                tx: tree.proof(tx_id - 1).unwrap(),
            },
            consistency: None,
            state,
        }
    }

    #[test]
    fn test_verify_inclusion_accepts_valid_entry() {
        let (txs, tree) = history(6);
        let v = verifiable(&txs, &tree, 4);
        assert!(verify_inclusion(&v.inclusion, &encode_kv(b"k", &4u64.to_be_bytes()), &tree.root()));
        assert!(!verify_inclusion(&v.inclusion, &encode_kv(b"k", &5u64.to_be_bytes()), &tree.root()));
    }

    #[test]
    fn test_verify_inclusion_rejects_misplaced_tx_path() {
        let (txs, tree) = history(6);
        let mut v = verifiable(&txs, &tree, 4);
        v.inclusion.tx_id = 3;
        assert!(!verify_inclusion(&v.inclusion, &v.entry.proof_encoding(), &tree.root()));
    }

    #[test]
    fn test_verify_tx_inclusion() {
        let (txs, tree) = history(5);
        let proof = TxInclusionProof { tx_id: 2, root_tx_id: 5, path: tree.proof(1).unwrap() };
        assert!(verify_tx_inclusion(&proof, &txs[1].header.entry_hash, &tree.root()));
        assert!(!verify_tx_inclusion(&proof, &txs[2].header.entry_hash, &tree.root()));
    }

    #[test]
    fn test_verifiable_entry_without_trusted_state() {
        let (txs, tree) = history(7);
        let v = verifiable(&txs, &tree, 3);
        let state = verify_verifiable_entry(&v, None).expect("valid proof");
        assert_eq!(state.tx_id, 7);
        assert_eq!(state.root, tree.root());
    }

    #[test]
    fn test_verifiable_entry_rejects_forged_value() {
        let (txs, tree) = history(7);
        let mut v = verifiable(&txs, &tree, 3);
        v.entry.value = b"forged".to_vec();
        assert!(verify_verifiable_entry(&v, None).is_none());
    }

    #[test]
    fn test_verifiable_entry_chains_trust_with_consistency() {
        let (txs, tree) = history(9);
        let old = ImmutableState { tx_id: 4, root: txs[3].header.root_hash };
        let mut v = verifiable(&txs, &tree, 8);

        // Missing consistency proof is not enough to move trust forward
        assert!(verify_verifiable_entry(&v, Some(&old)).is_none());

        v.consistency = Some(ConsistencyProof {
            old_tx_id: 4,
            old_root: old.root,
            new_tx_id: 9,
            new_root: tree.root(),
            hashes: consistency_path(&tree, 4, 9).unwrap(),
        });
        assert_eq!(verify_verifiable_entry(&v, Some(&old)).unwrap().tx_id, 9);

        let forged = ImmutableState { tx_id: 4, root: txs[2].header.root_hash };
        assert!(verify_verifiable_entry(&v, Some(&forged)).is_none());
    }

    #[test]
    fn test_trusted_state_newer_than_answer_is_rejected() {
        let (txs, tree) = history(3);
        let v = verifiable(&txs, &tree, 2);
        let future = ImmutableState { tx_id: 5, root: tree.root() };
        assert!(verify_verifiable_entry(&v, Some(&future)).is_none());
    }

    #[test]
    fn test_verifiable_tx_recomputes_entry_hash() {
        let (txs, tree) = history(4);
        let state = ImmutableState { tx_id: 4, root: tree.root() };
        let mut v = VerifiableTx {
            tx: txs[1].clone(),
            inclusion: TxInclusionProof { tx_id: 2, root_tx_id: 4, path: tree.proof(1).unwrap() },
            consistency: None,
            state,
        };
        assert_eq!(verify_verifiable_tx(&v, None), Some(state));

        v.tx.entries[1].value = plain_value(b"tampered");
        assert!(verify_verifiable_tx(&v, None).is_none());
    }
}
