//! In-memory key index: user key to its committed versions.
//!
//! Rebuilt from the transaction log on open and extended after every durable
//! commit. Values are never held here, only `(tx, entry index)` back-references
//! into the log.

use std::collections::HashMap;

use proofkv_types::{Transaction, TxId, encoding::StoredKey, encoding::StoredValue};

/// One committed version of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyVersion {
    /// Transaction that wrote the version.
    pub tx: TxId,
    /// Entry position inside that transaction.
    pub index: u32,
    /// The version is a reference rather than a plain value.
    pub is_reference: bool,
}

/// Versions of every plain-namespace key, ascending by tx.
#[derive(Debug, Default)]
pub struct KeyIndex {
    keys: HashMap<Vec<u8>, Vec<KeyVersion>>,
}

impl KeyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes the plain and reference entries of a committed transaction.
    ///
    /// Transactions must be applied in id order.
    pub fn apply(&mut self, tx: &Transaction) {
        for (index, entry) in tx.entries.iter().enumerate() {
            let Some(StoredKey::Plain(key)) = entry.stored_key() else {
                continue;
            };
            let is_reference = matches!(entry.stored_value(), Some(StoredValue::Reference { .. }));
            self.keys.entry(key.to_vec()).or_default().push(KeyVersion {
                tx: tx.header.id,
                index: index as u32,
                is_reference,
            });
        }
    }

    /// Most recent version committed at or before `snapshot`.
    pub fn latest_at(&self, key: &[u8], snapshot: TxId) -> Option<&KeyVersion> {
        let versions = self.keys.get(key)?;
        let end = versions.partition_point(|v| v.tx <= snapshot);
        end.checked_sub(1).map(|i| &versions[i])
    }

    /// Version written exactly in `tx`.
    pub fn in_tx(&self, key: &[u8], tx: TxId) -> Option<&KeyVersion> {
        let versions = self.keys.get(key)?;
        versions.binary_search_by_key(&tx, |v| v.tx).ok().map(|i| &versions[i])
    }

    /// All versions of `key`, oldest first.
    pub fn versions(&self, key: &[u8]) -> &[KeyVersion] {
        self.keys.get(key).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key has been written.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
