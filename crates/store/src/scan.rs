//! Lazy sorted-set scans.
//!
//! A [`ZScan`] pulls members from the Z-index one page at a time, taking the
//! store's read lock only while a page is filled. Every page is cut at the
//! snapshot the scan was planned against, so commits that land mid-scan are
//! never observed.

use std::collections::VecDeque;

use proofkv_types::{
    Result, TxId, ZEntry, ZScanRequest,
    error::{IllegalArgumentSnafu, TxNotFoundSnafu},
};

use crate::{
    backend::StorageBackend,
    metrics,
    store::Store,
    zindex::{ZIndexKey, ZRange},
};

fn check_score(what: &str, score: Option<f64>) -> Result<()> {
    match score {
        Some(score) if !score.is_finite() => {
            IllegalArgumentSnafu { message: format!("{what} {score} is not finite") }.fail()
        },
        _ => Ok(()),
    }
}

/// Iterator over the members of one sorted set.
///
/// Yields at most `limit` entries. An error ends the scan.
pub struct ZScan<'a, B: StorageBackend> {
    store: &'a Store<B>,
    set: Vec<u8>,
    range: ZRange,
    snapshot: TxId,
    remaining: usize,
    page_size: usize,
    buffer: VecDeque<ZEntry>,
    exhausted: bool,
}

impl<'a, B: StorageBackend> ZScan<'a, B> {
    pub(crate) fn new(store: &'a Store<B>, req: ZScanRequest, snapshot: TxId) -> Result<Self> {
        if req.set.is_empty() {
            return IllegalArgumentSnafu { message: "sorted set name must not be empty" }.fail();
        }
        let remaining = store.effective_limit(req.limit)?;
        check_score("min_score", req.min_score)?;
        check_score("max_score", req.max_score)?;
        check_score("cursor score", req.after.as_ref().map(|c| c.score))?;

        let latest = store.latest();
        if req.since_tx > latest {
            return TxNotFoundSnafu { tx_id: req.since_tx }.fail();
        }
        if snapshot > latest {
            return TxNotFoundSnafu { tx_id: snapshot }.fail();
        }

        Ok(Self {
            store,
            range: ZRange {
                min_score: req.min_score,
                max_score: req.max_score,
                after: req.after.as_ref().map(ZIndexKey::from),
                desc: req.desc,
            },
            set: req.set,
            snapshot,
            remaining,
            page_size: store.config().scan_page_size,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Snapshot the scan reads at.
    pub fn snapshot(&self) -> TxId {
        self.snapshot
    }

    fn fill(&mut self) -> Result<()> {
        let want = self.page_size.min(self.remaining);
        let store = self.store;
        let state = store.read_state();
        let page = state.zindex.page(&self.set, &self.range, self.snapshot, want);
        if page.len() < want {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.range.after = Some(last.clone());
        }
        for (member, first_tx) in &page {
            let entry = state.zentry(&self.set, member, *first_tx, self.snapshot)?;
            self.buffer.push_back(entry);
        }
        self.remaining -= page.len();
        metrics::record_scan_entries(page.len());
        Ok(())
    }
}

impl<B: StorageBackend> Iterator for ZScan<'_, B> {
    type Item = Result<ZEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted && self.remaining > 0 {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proofkv_types::{KeyValue, StoreError, ZCursor, config::StoreConfig};

    use super::*;
    use crate::backend::InMemoryBackend;

    fn store(page_size: usize) -> Store<InMemoryBackend> {
        let config = StoreConfig { scan_page_size: page_size, ..StoreConfig::default() };
        let store = Store::open_in_memory(config).unwrap();
        let kvs = (0..10).map(|i| KeyValue::new(format!("k{i}"), format!("v{i}"))).collect();
        store.set(kvs).unwrap();
        for i in 0..10 {
            store.zadd("set", f64::from(i % 5), format!("k{i}"), None).unwrap();
        }
        store
    }

    fn collect(scan: ZScan<'_, InMemoryBackend>) -> Vec<(f64, Vec<u8>)> {
        scan.map(|e| e.unwrap()).map(|e| (e.score, e.key)).collect()
    }

    #[test]
    fn test_scan_crosses_pages_in_order() {
        let store = store(3);
        let entries = collect(store.zscan(ZScanRequest::new("set")).unwrap());
        assert_eq!(entries.len(), 10);
        assert!(entries.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(entries[0], (0.0, b"k0".to_vec()));
        assert_eq!(entries[1], (0.0, b"k5".to_vec()));
    }

    #[test]
    fn test_limit_and_desc() {
        let store = store(2);
        let req = ZScanRequest { limit: 3, desc: true, ..ZScanRequest::new("set") };
        let entries = collect(store.zscan(req).unwrap());
        assert_eq!(entries.iter().map(|e| e.0).collect::<Vec<_>>(), vec![4.0, 4.0, 3.0]);
    }

    #[test]
    fn test_snapshot_excludes_later_members() {
        let store = store(4);
        // tx 1 wrote the keys, txs 2..=11 added members one at a time
        let entries = collect(store.zscan_at(ZScanRequest::new("set"), 4).unwrap());
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_cursor_resumes() {
        let store = store(3);
        let first = store
            .zscan(ZScanRequest { limit: 4, ..ZScanRequest::new("set") })
            .unwrap()
            .map(Result::unwrap)
            .collect::<Vec<_>>();
        let after = first.last().unwrap().cursor();
        let rest = collect(
            store.zscan(ZScanRequest { after: Some(after), ..ZScanRequest::new("set") }).unwrap(),
        );
        assert_eq!(rest.len(), 6);
    }

    #[test]
    fn test_request_validation() {
        let store = store(3);
        let bad = |req: ZScanRequest| store.zscan(req).err().unwrap();
        assert!(matches!(bad(ZScanRequest::new("")), StoreError::IllegalArgument { .. }));
        assert!(matches!(
            bad(ZScanRequest { limit: 5000, ..ZScanRequest::new("set") }),
            StoreError::IllegalArgument { .. }
        ));
        assert!(matches!(
            bad(ZScanRequest { min_score: Some(f64::NAN), ..ZScanRequest::new("set") }),
            StoreError::IllegalArgument { .. }
        ));
        assert!(matches!(
            bad(ZScanRequest {
                after: Some(ZCursor { score: f64::INFINITY, key: b"k".to_vec(), at_tx: 0 }),
                ..ZScanRequest::new("set")
            }),
            StoreError::IllegalArgument { .. }
        ));
        assert!(matches!(
            bad(ZScanRequest { since_tx: 12, ..ZScanRequest::new("set") }),
            StoreError::TxNotFound { tx_id: 12 }
        ));
        assert!(matches!(
            store.zscan_at(ZScanRequest::new("set"), 12).err().unwrap(),
            StoreError::TxNotFound { tx_id: 12 }
        ));
    }

    #[test]
    fn test_unknown_set_is_empty() {
        let store = store(3);
        assert_eq!(store.zscan(ZScanRequest::new("nope")).unwrap().count(), 0);
    }
}
