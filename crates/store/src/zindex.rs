//! Sorted secondary index over sorted-set members.
//!
//! Each set is a `BTreeMap` ordered by `(score, key length, key, at_tx)`, the
//! same order the persisted member key encodes. The mapped value is the
//! transaction that first committed the member, so snapshots only see members
//! committed at or before them and re-adding an identical pinned member is
//! idempotent. Members are stored pinned, so the same key added by several
//! transactions yields one member per value, in transaction order.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};

use proofkv_types::{
    Transaction, TxId, ZCursor,
    encoding::{StoredKey, score_to_sortable, sortable_to_score},
};

/// Ordering key of one member inside a set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZIndexKey {
    /// Sortable score.
    pub score: u64,
    /// Member key length, ordered before the bytes.
    pub key_len: u64,
    /// Member key.
    pub key: Vec<u8>,
    /// Transaction holding the member's value.
    pub at_tx: TxId,
}

impl ZIndexKey {
    /// Builds the ordering key of a member.
    pub fn new(score: f64, key: &[u8], at_tx: TxId) -> Self {
        Self { score: score_to_sortable(score), key_len: key.len() as u64, key: key.to_vec(), at_tx }
    }

    /// Score as a float.
    pub fn score_f64(&self) -> f64 {
        sortable_to_score(self.score)
    }

    fn lowest(score: u64) -> Self {
        Self { score, key_len: 0, key: Vec::new(), at_tx: 0 }
    }

    /// Greater than every member with `score`; member keys are never this long.
    fn highest(score: u64) -> Self {
        Self { score, key_len: u64::MAX, key: Vec::new(), at_tx: 0 }
    }
}

impl From<&ZCursor> for ZIndexKey {
    fn from(cursor: &ZCursor) -> Self {
        Self::new(cursor.score, &cursor.key, cursor.at_tx)
    }
}

/// Range of one page request.
#[derive(Debug, Clone, PartialEq)]
pub struct ZRange {
    /// Inclusive lower score bound.
    pub min_score: Option<f64>,
    /// Inclusive upper score bound.
    pub max_score: Option<f64>,
    /// Resume strictly after this member, in scan direction.
    pub after: Option<ZIndexKey>,
    /// Highest score first.
    pub desc: bool,
}

impl ZRange {
    fn bounds(&self) -> Option<(Bound<ZIndexKey>, Bound<ZIndexKey>)> {
        let mut lower = Bound::Included(ZIndexKey::lowest(
            self.min_score.map_or(0, score_to_sortable),
        ));
        let mut upper = Bound::Included(ZIndexKey::highest(
            self.max_score.map_or(u64::MAX, score_to_sortable),
        ));

        if let Some(after) = &self.after {
            let side = if self.desc { &mut upper } else { &mut lower };
            let tighter = match &*side {
                Bound::Included(key) | Bound::Excluded(key) => {
                    if self.desc { after <= key } else { after >= key }
                },
                Bound::Unbounded => true,
            };
            if tighter {
                *side = Bound::Excluded(after.clone());
            }
        }

        // BTreeMap::range panics on inverted or empty-exclusive ranges.
        let (lo, hi) = match (&lower, &upper) {
            (
                Bound::Included(lo) | Bound::Excluded(lo),
                Bound::Included(hi) | Bound::Excluded(hi),
            ) => (lo, hi),
            _ => return Some((lower, upper)),
        };
        let exclusive =
            matches!(lower, Bound::Excluded(_)) || matches!(upper, Bound::Excluded(_));
        if lo > hi || (lo == hi && exclusive) {
            return None;
        }
        Some((lower, upper))
    }
}

/// Members of every sorted set.
#[derive(Debug, Default)]
pub struct ZIndex {
    sets: HashMap<Vec<u8>, BTreeMap<ZIndexKey, TxId>>,
}

impl ZIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes the member entries of a committed transaction.
    pub fn apply(&mut self, tx: &Transaction) {
        for entry in &tx.entries {
            if let Some(StoredKey::ZMember { set, score, key, at_tx }) = entry.stored_key() {
                self.sets
                    .entry(set.to_vec())
                    .or_default()
                    .entry(ZIndexKey::new(score, key, at_tx))
                    .or_insert(tx.header.id);
            }
        }
    }

    /// Transaction that first committed a member.
    #[cfg(test)]
    fn member_tx(&self, set: &[u8], member: &ZIndexKey) -> Option<TxId> {
        self.sets.get(set)?.get(member).copied()
    }

    /// Up to `limit` members of `set` in `range`, visible at `snapshot`.
    pub fn page(
        &self,
        set: &[u8],
        range: &ZRange,
        snapshot: TxId,
        limit: usize,
    ) -> Vec<(ZIndexKey, TxId)> {
        let Some(members) = self.sets.get(set) else {
            return Vec::new();
        };
        let Some(bounds) = range.bounds() else {
            return Vec::new();
        };
        let visible = |(key, tx): (&ZIndexKey, &TxId)| {
            (*tx <= snapshot).then(|| (key.clone(), *tx))
        };
        let iter = members.range(bounds);
        if range.desc {
            iter.rev().filter_map(visible).take(limit).collect()
        } else {
            iter.filter_map(visible).take(limit).collect()
        }
    }

    /// Number of members in `set`, at any snapshot.
    #[cfg(test)]
    fn set_len(&self, set: &[u8]) -> usize {
        self.sets.get(set).map_or(0, BTreeMap::len)
    }
}
