//! Proptest strategies for proofkv domain types.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed domain values while exploring edge cases through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use proofkv_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(batch in strategies::arb_valid_batch()) {
//!         // commit the batch and check an invariant
//!     }
//! }
//! ```

use proofkv_types::{KeyValue, Operation, ReferenceRequest, ZAddRequest};
use proptest::prelude::*;

/// Generates an arbitrary user key of 1-16 bytes matching `[a-z][a-z0-9]{0,15}`.
pub fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    "[a-z][a-z0-9]{0,15}".prop_map(String::into_bytes)
}

/// Generates an arbitrary value of 0-255 random bytes.
pub fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256)
}

/// Generates a small value of 0-31 random bytes for compact tests.
pub fn arb_small_value() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..32)
}

/// Generates a finite score, including negative values, zeros and subnormals.
pub fn arb_score() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(-0.0),
        Just(f64::MIN_POSITIVE / 2.0),
        -1.0e6f64..1.0e6,
        any::<f64>().prop_filter("finite", |s| s.is_finite()),
    ]
}

/// Generates an arbitrary 32-byte hash (uniform random bytes).
pub fn arb_hash() -> impl Strategy<Value = [u8; 32]> {
    proptest::array::uniform32(any::<u8>())
}

/// Generates a batch of 1-15 key/values with distinct keys.
pub fn arb_kv_batch() -> impl Strategy<Value = Vec<KeyValue>> {
    proptest::collection::btree_map(arb_key(), arb_small_value(), 1..16)
        .prop_map(|kvs| kvs.into_iter().map(|(key, value)| KeyValue::new(key, value)).collect())
}

/// Generates an arbitrary [`Operation`] of any variant.
///
/// Targets and pins are random, so the operation may well be rejected by the
/// store. Use [`arb_valid_batch`] for batches that always commit.
pub fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (arb_key(), arb_small_value())
            .prop_map(|(key, value)| Operation::Kv(KeyValue::new(key, value))),
        (arb_key(), arb_score(), arb_key(), 0u64..4).prop_map(|(set, score, key, at_tx)| {
            Operation::ZAdd(ZAddRequest::new(set, score, key, at_tx))
        }),
        (arb_key(), arb_key(), 0u64..4).prop_map(|(name, target, at_tx)| {
            Operation::Reference(ReferenceRequest::new(name, target, at_tx))
        }),
    ]
}

/// Generates a batch that always commits on any store.
///
/// Key/values come first, followed by unpinned ZAdds and references whose
/// targets are the batch's own keys. Reference names carry a `ref:` prefix,
/// which [`arb_key`] never produces, so they cannot collide with keys.
pub fn arb_valid_batch() -> impl Strategy<Value = Vec<Operation>> {
    arb_kv_batch()
        .prop_flat_map(|kvs| {
            let n = kvs.len();
            let zadds = proptest::collection::btree_map(
                (prop::sample::select(vec!["s1", "s2"]), 0..n),
                arb_score(),
                0..4,
            );
            let refs = proptest::collection::btree_set(0..n, 0..3);
            (Just(kvs), zadds, refs)
        })
        .prop_map(|(kvs, zadds, refs)| {
            let mut ops: Vec<Operation> = Vec::with_capacity(kvs.len() + zadds.len() + refs.len());
            for ((set, i), score) in zadds {
                ops.push(ZAddRequest::new(set, score, kvs[i].key.clone(), 0).into());
            }
            for i in refs {
                let mut name = b"ref:".to_vec();
                name.extend_from_slice(&kvs[i].key);
                ops.push(ReferenceRequest::new(name, kvs[i].key.clone(), 0).into());
            }
            let mut batch: Vec<Operation> = kvs.into_iter().map(Operation::Kv).collect();
            batch.append(&mut ops);
            batch
        })
}

/// Generates 1-8 valid batches to commit in sequence.
pub fn arb_batch_sequence() -> impl Strategy<Value = Vec<Vec<Operation>>> {
    proptest::collection::vec(arb_valid_batch(), 1..8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    proptest! {
        #[test]
        fn strategy_produces_unique_batch_keys(batch in arb_kv_batch()) {
            let keys: HashSet<_> = batch.iter().map(|kv| kv.key.clone()).collect();
            prop_assert_eq!(keys.len(), batch.len());
            prop_assert!(batch.iter().all(|kv| !kv.key.is_empty()));
        }

        #[test]
        fn strategy_produces_finite_scores(score in arb_score()) {
            prop_assert!(score.is_finite());
        }

        #[test]
        fn strategy_valid_batches_target_own_keys(batch in arb_valid_batch()) {
            let keys: HashSet<Vec<u8>> = batch
                .iter()
                .filter_map(|op| match op {
                    Operation::Kv(kv) => Some(kv.key.clone()),
                    _ => None,
                })
                .collect();
            for op in &batch {
                match op {
                    Operation::Kv(_) => {},
                    Operation::ZAdd(z) => {
                        prop_assert!(keys.contains(&z.key));
                        prop_assert_eq!(z.at_tx, 0);
                    },
                    Operation::Reference(r) => {
                        prop_assert!(keys.contains(&r.referenced_key));
                        prop_assert!(!keys.contains(&r.key));
                    },
                }
            }
        }
    }
}
