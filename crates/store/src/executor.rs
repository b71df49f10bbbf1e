//! Atomic batch executor.
//!
//! A batch goes through two phases:
//!
//! 1. [`validate_batch`] runs without any lock and rejects everything that can
//!    be decided from the batch alone: emptiness, size limits, duplicate keys
//!    and duplicate set members, malformed operations.
//! 2. [`resolve`] runs inside the append section against the latest committed
//!    state and turns the batch into the stored entries of one transaction.
//!    Pinned targets must exist in their transaction; unpinned ones resolve
//!    against the batch's own writes.
//!
//! Nothing is written until both phases pass, so a failing batch has no
//! observable effect.

use std::collections::HashSet;

use proofkv_types::{
    KeyValue, Operation, ReferenceRequest, Result, StoreError, TxEntry, TxId, ZAddRequest,
    config::StoreConfig,
    encoding::{plain_key, plain_value, reference_value, zset_key},
    error::{
        DuplicateKeySnafu, DuplicateZAddSnafu, EmptyBatchSnafu, IllegalArgumentSnafu,
        KeyNotFoundSnafu, ReferenceUnresolvedSnafu, TxNotFoundSnafu,
    },
};

use crate::index::KeyIndex;

/// How an unpinned (`at_tx = 0`) ZAdd or reference target is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpinnedResolution {
    /// The target must be written by a `Kv` of the same batch.
    BatchOnly,
    /// The target may also be a key already committed as a plain value.
    BatchThenCommitted,
}

/// A batch that passed stateless validation.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    ops: Vec<Operation>,
}

impl ValidatedBatch {
    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Always false; empty batches never validate.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in submission order.
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }
}

fn check_key_len(what: &str, key: &[u8], config: &StoreConfig) -> Result<()> {
    if key.len() > config.max_key_len {
        return IllegalArgumentSnafu {
            message: format!("{what} of {} bytes exceeds {}", key.len(), config.max_key_len),
        }
        .fail();
    }
    Ok(())
}

fn check_kv(kv: &KeyValue, config: &StoreConfig) -> Result<()> {
    if kv.key.is_empty() {
        return IllegalArgumentSnafu { message: "key must not be empty" }.fail();
    }
    check_key_len("key", &kv.key, config)?;
    if kv.value.len() > config.max_value_len {
        return IllegalArgumentSnafu {
            message: format!(
                "value of {} bytes exceeds {}",
                kv.value.len(),
                config.max_value_len
            ),
        }
        .fail();
    }
    Ok(())
}

fn check_zadd(zadd: &ZAddRequest, config: &StoreConfig) -> Result<()> {
    if zadd.set.is_empty() {
        return IllegalArgumentSnafu { message: "sorted set name must not be empty" }.fail();
    }
    if zadd.key.is_empty() {
        return IllegalArgumentSnafu { message: "sorted set member key must not be empty" }.fail();
    }
    if !zadd.score.is_finite() {
        return IllegalArgumentSnafu { message: format!("score {} is not finite", zadd.score) }
            .fail();
    }
    check_key_len("set name", &zadd.set, config)?;
    check_key_len("member key", &zadd.key, config)
}

fn check_reference(reference: &ReferenceRequest, config: &StoreConfig) -> Result<()> {
    if reference.key.is_empty() {
        return IllegalArgumentSnafu { message: "reference name must not be empty" }.fail();
    }
    if reference.referenced_key.is_empty() {
        return IllegalArgumentSnafu { message: "reference target must not be empty" }.fail();
    }
    if reference.key == reference.referenced_key {
        return IllegalArgumentSnafu { message: "reference must not target itself" }.fail();
    }
    check_key_len("reference name", &reference.key, config)?;
    check_key_len("reference target", &reference.referenced_key, config)
}

/// Validates everything that does not depend on committed state.
///
/// Key writes and reference names share one namespace: a name used twice,
/// by either kind, is a `DuplicateKey`.
///
/// # Errors
///
/// `EmptyBatch`, `IllegalArgument`, `DuplicateKey` or `DuplicateZAdd`, for
/// the first offending operation.
pub fn validate_batch(ops: Vec<Operation>, config: &StoreConfig) -> Result<ValidatedBatch> {
    if ops.is_empty() {
        return EmptyBatchSnafu.fail();
    }
    if ops.len() > config.max_batch_operations {
        return IllegalArgumentSnafu {
            message: format!(
                "batch of {} operations exceeds {}",
                ops.len(),
                config.max_batch_operations
            ),
        }
        .fail();
    }

    let mut names: HashSet<&[u8]> = HashSet::new();
    let mut members: HashSet<(&[u8], &[u8])> = HashSet::new();
    for op in &ops {
        match op {
            Operation::Kv(kv) => {
                check_kv(kv, config)?;
                if !names.insert(kv.key.as_slice()) {
                    return DuplicateKeySnafu { key: kv.key.clone() }.fail();
                }
            },
            Operation::ZAdd(zadd) => {
                if !members.insert((zadd.set.as_slice(), zadd.key.as_slice())) {
                    return DuplicateZAddSnafu { set: zadd.set.clone(), key: zadd.key.clone() }
                        .fail();
                }
            },
            Operation::Reference(reference) => {
                if !reference.key.is_empty() && !names.insert(reference.key.as_slice()) {
                    return DuplicateKeySnafu { key: reference.key.clone() }.fail();
                }
            },
        }
    }

    for op in &ops {
        match op {
            Operation::Kv(_) => {},
            Operation::ZAdd(zadd) => check_zadd(zadd, config)?,
            Operation::Reference(reference) => check_reference(reference, config)?,
        }
    }

    Ok(ValidatedBatch { ops })
}

/// What a target key must be for a ZAdd or a reference to accept it.
enum Target {
    Member,
    Reference,
}

impl Target {
    fn unresolved(&self, key: &[u8], at_tx: TxId) -> StoreError {
        match self {
            Self::Member => KeyNotFoundSnafu { key: key.to_vec() }.build(),
            Self::Reference => ReferenceUnresolvedSnafu { key: key.to_vec(), at_tx }.build(),
        }
    }
}

struct Resolver<'a> {
    keys: &'a KeyIndex,
    latest: TxId,
    mode: UnpinnedResolution,
    batch_keys: HashSet<&'a [u8]>,
    batch_references: HashSet<&'a [u8]>,
}

impl Resolver<'_> {
    /// Returns the transaction holding the value `key` resolves to; a target
    /// written by the batch resolves to the committing transaction.
    fn check(&self, target: Target, key: &[u8], at_tx: TxId) -> Result<TxId> {
        if at_tx != 0 {
            if at_tx > self.latest {
                return TxNotFoundSnafu { tx_id: at_tx }.fail();
            }
            return match self.keys.in_tx(key, at_tx) {
                Some(version) if !version.is_reference => Ok(at_tx),
                Some(_) => reference_target(key),
                None => Err(target.unresolved(key, at_tx)),
            };
        }

        if self.batch_keys.contains(key) {
            return Ok(self.latest + 1);
        }
        if self.batch_references.contains(key) {
            return reference_target(key);
        }
        if self.mode == UnpinnedResolution::BatchThenCommitted {
            match self.keys.latest_at(key, self.latest) {
                Some(version) if !version.is_reference => return Ok(version.tx),
                Some(_) => return reference_target(key),
                None => {},
            }
        }
        Err(target.unresolved(key, at_tx))
    }
}

fn reference_target<T>(key: &[u8]) -> Result<T> {
    IllegalArgumentSnafu {
        message: format!("{} is a reference, not a value", String::from_utf8_lossy(key)),
    }
    .fail()
}

/// Resolves every target against `keys` as of `latest` and returns the
/// stored entries of the transaction, in operation order.
///
/// Sorted-set members are pinned on the way: an unpinned member written by
/// the batch gets `latest + 1`, one resolved against a committed key gets the
/// transaction of that key's latest version. References keep the pin they
/// were given.
///
/// Must run inside the append section so `latest` cannot move underneath.
///
/// # Errors
///
/// `TxNotFound` for a pinned tx beyond `latest`; `KeyNotFound` (ZAdd) or
/// `ReferenceUnresolved` (reference) when the target is absent;
/// `IllegalArgument` when the target is itself a reference.
pub fn resolve(
    batch: &ValidatedBatch,
    keys: &KeyIndex,
    latest: TxId,
    mode: UnpinnedResolution,
) -> Result<Vec<TxEntry>> {
    let mut resolver = Resolver {
        keys,
        latest,
        mode,
        batch_keys: HashSet::new(),
        batch_references: HashSet::new(),
    };
    for op in &batch.ops {
        match op {
            Operation::Kv(kv) => {
                resolver.batch_keys.insert(kv.key.as_slice());
            },
            Operation::Reference(reference) => {
                resolver.batch_references.insert(reference.key.as_slice());
            },
            Operation::ZAdd(_) => {},
        }
    }

    let mut entries = Vec::with_capacity(batch.ops.len());
    for op in &batch.ops {
        let entry = match op {
            Operation::Kv(kv) => TxEntry { key: plain_key(&kv.key), value: plain_value(&kv.value) },
            Operation::ZAdd(zadd) => {
                // Members are always stored pinned to the value they resolved to.
                let value_tx = resolver.check(Target::Member, &zadd.key, zadd.at_tx)?;
                TxEntry {
                    key: zset_key(&zadd.set, zadd.score, &zadd.key, value_tx),
                    value: plain_value(&[]),
                }
            },
            Operation::Reference(reference) => {
                resolver.check(Target::Reference, &reference.referenced_key, reference.at_tx)?;
                TxEntry {
                    key: plain_key(&reference.key),
                    value: reference_value(reference.at_tx, &reference.referenced_key),
                }
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}
