//! Merkle tree algorithms for proofkv.
//!
//! Implements the RFC 6962 Merkle Tree Hash (MTH), audit paths and
//! consistency proofs, plus the RFC 9162 verification procedures.
//!
//! Proof *generation* is written once, generically over [`SubtreeSource`]:
//! anything that can return the hash of a perfect, aligned subtree can produce
//! proofs. The in-memory [`MerkleTree`] (used for the entries of a single
//! transaction) and the store's persisted authenticated index both implement
//! it, so server-side construction and client-side verification always share
//! the exact same fold.
//!
//! A perfect subtree `(level, index)` covers leaves
//! `[index * 2^level, (index + 1) * 2^level)`.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::hash::{EMPTY_HASH, Hash, hash_eq, leaf_hash, node_hash};

/// Source of perfect subtree hashes.
pub trait SubtreeSource {
    /// Error raised when a subtree cannot be read.
    type Error;

    /// Number of leaves currently available.
    fn leaf_count(&self) -> u64;

    /// Returns the hash of the perfect subtree at `(level, index)`.
    ///
    /// Callers only request subtrees that lie entirely within `leaf_count()`.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the node cannot be loaded.
    fn subtree(&self, level: u32, index: u64) -> Result<Hash, Self::Error>;
}

/// Largest power of two strictly smaller than `n` (`n >= 2`).
#[inline]
fn split_point(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1 << (63 - (n - 1).leading_zeros())
}

/// Merkle Tree Hash of leaves `[lo, hi)`.
///
/// # Errors
///
/// Propagates errors from the subtree source.
pub fn range_hash<S: SubtreeSource + ?Sized>(src: &S, lo: u64, hi: u64) -> Result<Hash, S::Error> {
    debug_assert!(lo < hi);
    let size = hi - lo;
    if size.is_power_of_two() && lo % size == 0 {
        let level = size.trailing_zeros();
        return src.subtree(level, lo >> level);
    }
    let k = if size.is_power_of_two() { size / 2 } else { split_point(size) };
    let left = range_hash(src, lo, lo + k)?;
    let right = range_hash(src, lo + k, hi)?;
    Ok(node_hash(&left, &right))
}

/// Root of the first `size` leaves. The empty tree hashes to [`EMPTY_HASH`].
///
/// # Errors
///
/// Propagates errors from the subtree source.
pub fn root_of<S: SubtreeSource + ?Sized>(src: &S, size: u64) -> Result<Hash, S::Error> {
    if size == 0 {
        return Ok(EMPTY_HASH);
    }
    range_hash(src, 0, size)
}

/// Audit path for leaf `index` in the tree made of the first `size` leaves.
///
/// Hashes are ordered leaf-to-root. Callers guarantee `index < size`.
///
/// # Errors
///
/// Propagates errors from the subtree source.
pub fn inclusion_path<S: SubtreeSource + ?Sized>(
    src: &S,
    index: u64,
    size: u64,
) -> Result<Vec<Hash>, S::Error> {
    let mut out = Vec::with_capacity(64 - size.leading_zeros() as usize);
    path_into(src, index, 0, size, &mut out)?;
    Ok(out)
}

fn path_into<S: SubtreeSource + ?Sized>(
    src: &S,
    m: u64,
    lo: u64,
    hi: u64,
    out: &mut Vec<Hash>,
) -> Result<(), S::Error> {
    let size = hi - lo;
    if size <= 1 {
        return Ok(());
    }
    let k = split_point(size);
    if m < k {
        path_into(src, m, lo, lo + k, out)?;
        out.push(range_hash(src, lo + k, hi)?);
    } else {
        path_into(src, m - k, lo + k, hi, out)?;
        out.push(range_hash(src, lo, lo + k)?);
    }
    Ok(())
}

/// Consistency proof between the tree of `old_size` leaves and the tree of
/// `new_size` leaves. Empty when `old_size == 0` or `old_size == new_size`.
///
/// Callers guarantee `old_size <= new_size`.
///
/// # Errors
///
/// Propagates errors from the subtree source.
pub fn consistency_path<S: SubtreeSource + ?Sized>(
    src: &S,
    old_size: u64,
    new_size: u64,
) -> Result<Vec<Hash>, S::Error> {
    let mut out = Vec::new();
    if old_size == 0 || old_size >= new_size {
        return Ok(out);
    }
    subproof_into(src, old_size, 0, new_size, true, &mut out)?;
    Ok(out)
}

fn subproof_into<S: SubtreeSource + ?Sized>(
    src: &S,
    m: u64,
    lo: u64,
    hi: u64,
    complete: bool,
    out: &mut Vec<Hash>,
) -> Result<(), S::Error> {
    let size = hi - lo;
    if m == size {
        if !complete {
            out.push(range_hash(src, lo, hi)?);
        }
        return Ok(());
    }
    let k = split_point(size);
    if m <= k {
        subproof_into(src, m, lo, lo + k, complete, out)?;
        out.push(range_hash(src, lo + k, hi)?);
    } else {
        subproof_into(src, m - k, lo + k, hi, false, out)?;
        out.push(range_hash(src, lo, lo + k)?);
    }
    Ok(())
}

/// Recomputes the root implied by an audit path (RFC 9162 §2.1.3.2).
///
/// Returns `None` when the path is structurally invalid for the given
/// `index`/`size` (wrong length, index out of range).
pub fn root_from_inclusion_path(
    index: u64,
    size: u64,
    leaf: &Hash,
    path: &[Hash],
) -> Option<Hash> {
    if index >= size {
        return None;
    }

    let mut fn_ = index;
    let mut sn = size - 1;
    let mut r = *leaf;

    for p in path {
        if sn == 0 {
            return None;
        }
        if fn_ & 1 == 1 || fn_ == sn {
            r = node_hash(p, &r);
            if fn_ & 1 == 0 {
                while fn_ & 1 == 0 && fn_ != 0 {
                    fn_ >>= 1;
                    sn >>= 1;
                }
            }
        } else {
            r = node_hash(&r, p);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return None;
    }
    Some(r)
}

/// Verifies a consistency proof (RFC 9162 §2.1.4.2).
///
/// The empty tree is consistent with every tree, but only when the claimed
/// old root is [`EMPTY_HASH`] and no proof hashes are supplied.
pub fn verify_consistency_path(
    old_size: u64,
    new_size: u64,
    old_root: &Hash,
    new_root: &Hash,
    path: &[Hash],
) -> bool {
    if old_size > new_size {
        return false;
    }
    if old_size == 0 {
        return path.is_empty() && hash_eq(old_root, &EMPTY_HASH);
    }
    if old_size == new_size {
        return path.is_empty() && hash_eq(old_root, new_root);
    }
    if path.is_empty() {
        return false;
    }

    let mut proof = Vec::with_capacity(path.len() + 1);
    if old_size.is_power_of_two() {
        proof.push(*old_root);
    }
    proof.extend_from_slice(path);

    let mut fn_ = old_size - 1;
    let mut sn = new_size - 1;
    while fn_ & 1 == 1 {
        fn_ >>= 1;
        sn >>= 1;
    }

    let mut fr = proof[0];
    let mut sr = proof[0];

    for c in &proof[1..] {
        if sn == 0 {
            return false;
        }
        if fn_ & 1 == 1 || fn_ == sn {
            fr = node_hash(c, &fr);
            sr = node_hash(c, &sr);
            if fn_ & 1 == 0 {
                while fn_ & 1 == 0 && fn_ != 0 {
                    fn_ >>= 1;
                    sn >>= 1;
                }
            }
        } else {
            sr = node_hash(&sr, c);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    sn == 0 && hash_eq(&fr, old_root) && hash_eq(&sr, new_root)
}

/// Audit path for one leaf, self-describing enough to be verified alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Zero-based index of the leaf.
    pub leaf_index: u64,
    /// Number of leaves in the tree the path proves against.
    pub tree_size: u64,
    /// Sibling hashes from leaf to root.
    pub hashes: Vec<Hash>,
}

impl MerklePath {
    /// Folds `leaf` (already leaf-hashed) up to the root this path implies.
    pub fn root_for(&self, leaf: &Hash) -> Option<Hash> {
        root_from_inclusion_path(self.leaf_index, self.tree_size, leaf, &self.hashes)
    }

    /// Whether `leaf` folds to `expected_root` through this path.
    pub fn verify(&self, leaf: &Hash, expected_root: &Hash) -> bool {
        self.root_for(leaf).is_some_and(|root| hash_eq(&root, expected_root))
    }
}

/// In-memory Merkle tree that keeps every perfect subtree.
///
/// Used for the entries of one transaction, where the whole leaf set is known
/// up front.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[l][i]` is the perfect subtree `(l, i)`; `levels[0]` are the leaves.
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Builds a tree from leaf hashes (already passed through [`leaf_hash`]).
    pub fn from_leaf_hashes(leaves: Vec<Hash>) -> Self {
        let mut levels = vec![leaves];
        loop {
            let below = &levels[levels.len() - 1];
            if below.len() < 2 {
                break;
            }
            let above: Vec<Hash> =
                below.chunks_exact(2).map(|pair| node_hash(&pair[0], &pair[1])).collect();
            levels.push(above);
        }
        Self { levels }
    }

    /// Builds a tree by leaf-hashing each payload.
    pub fn from_payloads<'a, I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        Self::from_leaf_hashes(payloads.into_iter().map(leaf_hash).collect())
    }

    /// Returns the Merkle root. [`EMPTY_HASH`] for empty trees.
    pub fn root(&self) -> Hash {
        let Ok(root) = root_of(self, self.leaf_count());
        root
    }

    /// Generates the audit path for the leaf at `index`.
    pub fn proof(&self, index: u64) -> Option<MerklePath> {
        let size = self.leaf_count();
        if index >= size {
            return None;
        }
        let Ok(hashes) = inclusion_path(self, index, size);
        Some(MerklePath { leaf_index: index, tree_size: size, hashes })
    }

    /// Returns the number of leaves in the tree.
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }
}

impl SubtreeSource for MerkleTree {
    type Error = Infallible;

    fn leaf_count(&self) -> u64 {
        self.levels[0].len() as u64
    }

    fn subtree(&self, level: u32, index: u64) -> Result<Hash, Infallible> {
        Ok(self.levels[level as usize][index as usize])
    }
}

/// Computes the Merkle root of leaf hashes.
///
/// Convenience function when you don't need the full tree or proofs.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return EMPTY_HASH;
    }
    MerkleTree::from_leaf_hashes(leaves.to_vec()).root()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    fn leaves(n: u64) -> Vec<Hash> {
        (0..n).map(|i| leaf_hash(&i.to_be_bytes())).collect()
    }

    /// Straightforward recursive MTH used as a reference.
    fn reference_mth(leaves: &[Hash]) -> Hash {
        match leaves.len() {
            0 => EMPTY_HASH,
            1 => leaves[0],
            n => {
                let k = split_point(n as u64) as usize;
                node_hash(&reference_mth(&leaves[..k]), &reference_mth(&leaves[k..]))
            },
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_leaf_hashes(vec![]);
        assert_eq!(tree.root(), EMPTY_HASH);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn test_single_leaf() {
        let leaf = leaf_hash(b"hello");
        let tree = MerkleTree::from_leaf_hashes(vec![leaf]);

        // Single leaf: root equals the leaf hash
        assert_eq!(tree.root(), leaf);

        let proof = tree.proof(0).expect("proof should exist");
        assert!(proof.hashes.is_empty());
        assert!(proof.verify(&leaf, &tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let l1 = leaf_hash(b"a");
        let l2 = leaf_hash(b"b");
        let tree = MerkleTree::from_leaf_hashes(vec![l1, l2]);

        assert_eq!(tree.root(), node_hash(&l1, &l2));

        let proof0 = tree.proof(0).expect("proof 0 should exist");
        let proof1 = tree.proof(1).expect("proof 1 should exist");
        assert_eq!(proof0.hashes, vec![l2]);
        assert_eq!(proof1.hashes, vec![l1]);
        assert!(proof0.verify(&l1, &tree.root()));
        assert!(proof1.verify(&l2, &tree.root()));
    }

    #[test]
    fn test_root_matches_reference_for_all_small_sizes() {
        for n in 0..70 {
            let l = leaves(n);
            assert_eq!(merkle_root(&l), reference_mth(&l), "size {n}");
        }
    }

    #[test]
    fn test_every_inclusion_path_verifies() {
        for n in 1..40 {
            let tree = MerkleTree::from_leaf_hashes(leaves(n));
            let root = tree.root();
            for i in 0..n {
                let proof = tree.proof(i).expect("proof should exist");
                assert!(proof.verify(&leaves(n)[i as usize], &root), "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn test_inclusion_path_rejects_wrong_leaf_index() {
        let l = leaves(7);
        let tree = MerkleTree::from_leaf_hashes(l.clone());
        let mut proof = tree.proof(2).unwrap();
        proof.leaf_index = 3;
        assert!(!proof.verify(&l[2], &tree.root()));
    }

    #[test]
    fn test_inclusion_path_rejects_bad_length() {
        let l = leaves(9);
        let tree = MerkleTree::from_leaf_hashes(l.clone());
        let mut proof = tree.proof(4).unwrap();
        proof.hashes.push(l[0]);
        assert!(proof.root_for(&l[4]).is_none());

        proof.hashes.truncate(1);
        assert!(proof.root_for(&l[4]).is_none());
    }

    #[test]
    fn test_index_out_of_range() {
        assert!(root_from_inclusion_path(5, 5, &sha256(b"x"), &[]).is_none());
    }

    #[test]
    fn test_every_consistency_proof_verifies() {
        let all = leaves(33);
        let full = MerkleTree::from_leaf_hashes(all.clone());
        for n in 0..=33u64 {
            let new_root = merkle_root(&all[..n as usize]);
            for m in 0..=n {
                let old_root = merkle_root(&all[..m as usize]);
                // Generate against the prefix tree of size n
                let path = consistency_path(&full, m, n).unwrap();
                assert!(
                    verify_consistency_path(m, n, &old_root, &new_root, &path),
                    "consistency {m} -> {n}"
                );
            }
        }
    }

    #[test]
    fn test_consistency_rejects_tampering() {
        let all = leaves(13);
        let tree = MerkleTree::from_leaf_hashes(all.clone());
        let old_root = merkle_root(&all[..5]);
        let new_root = tree.root();
        let path = consistency_path(&tree, 5, 13).unwrap();
        assert!(verify_consistency_path(5, 13, &old_root, &new_root, &path));

        for i in 0..path.len() {
            let mut bad = path.clone();
            bad[i][0] ^= 0xFF;
            assert!(!verify_consistency_path(5, 13, &old_root, &new_root, &bad));
        }

        let mut forged_old = old_root;
        forged_old[0] ^= 1;
        assert!(!verify_consistency_path(5, 13, &forged_old, &new_root, &path));
        assert!(!verify_consistency_path(6, 13, &old_root, &new_root, &path));
        assert!(!verify_consistency_path(13, 5, &old_root, &new_root, &path));
    }

    #[test]
    fn test_consistency_with_empty_tree() {
        let root = merkle_root(&leaves(4));
        assert!(verify_consistency_path(0, 4, &EMPTY_HASH, &root, &[]));
        assert!(!verify_consistency_path(0, 4, &root, &root, &[]));
        assert!(!verify_consistency_path(0, 4, &EMPTY_HASH, &root, &[root]));
    }

    #[test]
    fn test_consistency_same_size() {
        let root = merkle_root(&leaves(6));
        assert!(verify_consistency_path(6, 6, &root, &root, &[]));
        let mut other = root;
        other[3] ^= 0x10;
        assert!(!verify_consistency_path(6, 6, &root, &other, &[]));
    }

    #[test]
    fn test_prefix_subtrees_are_shared() {
        // Appending leaves never changes the perfect subtrees of the prefix.
        let small = MerkleTree::from_leaf_hashes(leaves(6));
        let large = MerkleTree::from_leaf_hashes(leaves(11));
        for level in 0..=2u32 {
            let count = 6u64 >> level;
            for index in 0..count {
                assert_eq!(small.subtree(level, index), large.subtree(level, index));
            }
        }
    }

    mod proptest_merkle {
        use proptest::prelude::*;

        use super::*;

        fn arb_leaf_data(max_leaves: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..max_leaves)
        }

        proptest! {
            /// Valid proofs always verify, for any leaf count.
            #[test]
            fn prop_valid_proof_always_verifies(leaf_data in arb_leaf_data(64)) {
                let tree = MerkleTree::from_payloads(leaf_data.iter().map(Vec::as_slice));
                let root = tree.root();

                for (i, data) in leaf_data.iter().enumerate() {
                    let proof = tree.proof(i as u64).expect("proof should exist");
                    prop_assert!(proof.verify(&leaf_hash(data), &root));
                }
            }

            /// Tampered proofs never verify (single-byte flip in a sibling hash).
            #[test]
            fn prop_tampered_proof_never_verifies(
                leaf_data in arb_leaf_data(64),
                target_leaf in any::<prop::sample::Index>(),
                tamper_hash in any::<prop::sample::Index>(),
            ) {
                let tree = MerkleTree::from_payloads(leaf_data.iter().map(Vec::as_slice));
                let root = tree.root();
                let target = target_leaf.index(leaf_data.len());
                let mut proof = tree.proof(target as u64).expect("proof should exist");

                if !proof.hashes.is_empty() {
                    let idx = tamper_hash.index(proof.hashes.len());
                    proof.hashes[idx][0] ^= 0xFF;
                    prop_assert!(!proof.verify(&leaf_hash(&leaf_data[target]), &root));
                }
            }

            /// Any prefix is provably consistent with the full tree.
            #[test]
            fn prop_prefix_is_consistent(
                leaf_data in arb_leaf_data(64),
                cut in any::<prop::sample::Index>(),
            ) {
                let tree = MerkleTree::from_payloads(leaf_data.iter().map(Vec::as_slice));
                let n = leaf_data.len() as u64;
                let m = cut.index(leaf_data.len() + 1) as u64;
                let prefix = MerkleTree::from_payloads(
                    leaf_data[..m as usize].iter().map(Vec::as_slice),
                );

                let path = consistency_path(&tree, m, n).unwrap();
                prop_assert!(verify_consistency_path(m, n, &prefix.root(), &tree.root(), &path));
            }

            /// Merkle root is deterministic: same leaves always produce the same root.
            #[test]
            fn prop_merkle_root_deterministic(leaf_data in arb_leaf_data(33)) {
                let leaves: Vec<Hash> = leaf_data.iter().map(|d| leaf_hash(d)).collect();

                let root1 = MerkleTree::from_leaf_hashes(leaves.clone()).root();
                let root2 = MerkleTree::from_leaf_hashes(leaves.clone()).root();
                let root3 = merkle_root(&leaves);

                prop_assert_eq!(root1, root2);
                prop_assert_eq!(root1, root3);
            }
        }
    }
}
