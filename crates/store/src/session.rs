//! Per-client session bookkeeping.
//!
//! A session owns buffered transactions and named scan cursors. Nothing here
//! touches the store's lock discipline: a buffered transaction is submitted
//! as one ordinary batch on commit, and a cursor pages with `zscan_at` at the
//! snapshot it was opened with.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use proofkv_types::{Operation, StoreError, TxHeader, TxId, ZEntry, ZScanRequest};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;
use uuid::Uuid;

use crate::{backend::StorageBackend, executor::UnpinnedResolution, metrics, store::Store};

/// Errors from session operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SessionError {
    /// No open session with this id.
    #[snafu(display("Session not found: {id}"))]
    SessionNotFound {
        /// Session id.
        id: Uuid,
    },

    /// The session owns no open transaction with this id.
    #[snafu(display("Transaction not found: {id}"))]
    TransactionNotFound {
        /// Transaction id.
        id: Uuid,
    },

    /// The session owns no cursor with this name.
    #[snafu(display("Cursor not found: {name}"))]
    CursorNotFound {
        /// Cursor name.
        name: String,
    },

    /// The store rejected the operation.
    #[snafu(display("{source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
    },
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

struct SessionTx {
    ops: Vec<Operation>,
    snapshot: TxId,
}

struct NamedCursor {
    req: ZScanRequest,
    snapshot: TxId,
}

struct Session {
    opened_at: DateTime<Utc>,
    txs: HashMap<Uuid, SessionTx>,
    cursors: HashMap<String, NamedCursor>,
}

/// Owns every open session of one store.
pub struct SessionManager<B: StorageBackend> {
    store: Arc<Store<B>>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl<B: StorageBackend> SessionManager<B> {
    /// Creates a manager with no sessions.
    pub fn new(store: Arc<Store<B>>) -> Self {
        Self { store, sessions: Mutex::new(HashMap::new()) }
    }

    /// The managed store.
    pub fn store(&self) -> &Arc<Store<B>> {
        &self.store
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Opens a new session.
    pub fn open_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.lock();
        sessions.insert(id, Session {
            opened_at: Utc::now(),
            txs: HashMap::new(),
            cursors: HashMap::new(),
        });
        metrics::set_active_sessions(sessions.len());
        debug!(session = %id, "Opened session");
        id
    }

    /// Closes a session, discarding its open transactions and cursors.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the session is not open.
    pub fn close_session(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions.remove(&id).context(SessionNotFoundSnafu { id })?;
        metrics::set_active_sessions(sessions.len());
        debug!(
            session = %id,
            discarded_txs = session.txs.len(),
            discarded_cursors = session.cursors.len(),
            age_ms = (Utc::now() - session.opened_at).num_milliseconds(),
            "Closed session"
        );
        Ok(())
    }

    fn with_session<T>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id).context(SessionNotFoundSnafu { id })?;
        f(session)
    }

    /// Opens a buffered transaction in `session`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the session is not open.
    pub fn begin(&self, session: Uuid) -> Result<Uuid> {
        let snapshot = self.store.latest();
        self.with_session(session, |s| {
            let id = Uuid::new_v4();
            s.txs.insert(id, SessionTx { ops: Vec::new(), snapshot });
            Ok(id)
        })
    }

    /// Buffers an operation in an open transaction.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `TransactionNotFound`.
    pub fn push(&self, session: Uuid, tx: Uuid, op: impl Into<Operation>) -> Result<()> {
        self.with_session(session, |s| {
            let buffered = s.txs.get_mut(&tx).context(TransactionNotFoundSnafu { id: tx })?;
            buffered.ops.push(op.into());
            Ok(())
        })
    }

    /// Latest committed tx when the transaction was opened.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `TransactionNotFound`.
    pub fn tx_snapshot(&self, session: Uuid, tx: Uuid) -> Result<TxId> {
        self.with_session(session, |s| {
            s.txs.get(&tx).map(|t| t.snapshot).context(TransactionNotFoundSnafu { id: tx })
        })
    }

    /// Submits the buffered operations as one batch.
    ///
    /// Unpinned targets may name keys the store has already committed. The
    /// transaction is closed whether or not the batch commits.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `TransactionNotFound`, or `Store` when the batch is
    /// rejected.
    pub fn commit(&self, session: Uuid, tx: Uuid) -> Result<TxHeader> {
        let buffered = self.with_session(session, |s| {
            s.txs.remove(&tx).context(TransactionNotFoundSnafu { id: tx })
        })?;
        let header = self
            .store
            .commit(buffered.ops, UnpinnedResolution::BatchThenCommitted)
            .context(StoreSnafu)?;
        debug!(
            session = %session,
            tx_id = header.id,
            opened_at_tx = buffered.snapshot,
            interleaved = header.id.saturating_sub(buffered.snapshot + 1),
            "Committed session transaction"
        );
        Ok(header)
    }

    /// Discards an open transaction.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `TransactionNotFound`.
    pub fn rollback(&self, session: Uuid, tx: Uuid) -> Result<()> {
        self.with_session(session, |s| {
            s.txs.remove(&tx).map(|_| ()).context(TransactionNotFoundSnafu { id: tx })
        })
    }

    /// Opens (or replaces) a named cursor pinned at the current latest tx.
    ///
    /// `req.limit` is the page size of [`SessionManager::next_page`].
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, or `Store` for a malformed request.
    pub fn open_cursor(
        &self,
        session: Uuid,
        name: impl Into<String>,
        req: ZScanRequest,
    ) -> Result<TxId> {
        let snapshot = self.store.latest();
        // Validate eagerly; the scan itself is lazy and reads nothing yet.
        self.store.zscan_at(req.clone(), snapshot).context(StoreSnafu)?;
        let name = name.into();
        self.with_session(session, |s| {
            s.cursors.insert(name, NamedCursor { req, snapshot });
            Ok(snapshot)
        })
    }

    /// Next page of a named cursor. An empty page means the scan is done.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `CursorNotFound`, or `Store` if the scan fails.
    pub fn next_page(&self, session: Uuid, name: &str) -> Result<Vec<ZEntry>> {
        let (req, snapshot) = self.with_session(session, |s| {
            let cursor =
                s.cursors.get(name).context(CursorNotFoundSnafu { name: name.to_string() })?;
            Ok((cursor.req.clone(), cursor.snapshot))
        })?;

        let page = self
            .store
            .zscan_at(req, snapshot)
            .context(StoreSnafu)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(StoreSnafu)?;

        if let Some(last) = page.last() {
            self.with_session(session, |s| {
                let cursor = s
                    .cursors
                    .get_mut(name)
                    .context(CursorNotFoundSnafu { name: name.to_string() })?;
                cursor.req.after = Some(last.cursor());
                Ok(())
            })?;
        }
        Ok(page)
    }

    /// Closes a named cursor.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `CursorNotFound`.
    pub fn close_cursor(&self, session: Uuid, name: &str) -> Result<()> {
        self.with_session(session, |s| {
            s.cursors
                .remove(name)
                .map(|_| ())
                .context(CursorNotFoundSnafu { name: name.to_string() })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proofkv_types::{KeyRequest, KeyValue, ReferenceRequest, ZAddRequest, config::StoreConfig};

    use super::*;
    use crate::backend::InMemoryBackend;

    fn manager() -> SessionManager<InMemoryBackend> {
        let store = Store::open_in_memory(StoreConfig::default()).unwrap();
        SessionManager::new(Arc::new(store))
    }

    #[test]
    fn test_commit_submits_buffered_batch() {
        let manager = manager();
        manager.store().set(vec![KeyValue::new("base", "0")]).unwrap();

        let session = manager.open_session();
        let tx = manager.begin(session).unwrap();
        assert_eq!(manager.tx_snapshot(session, tx).unwrap(), 1);
        manager.push(session, tx, KeyValue::new("a", "1")).unwrap();
        manager.push(session, tx, ZAddRequest::new("set", 1.0, "base", 0)).unwrap();
        manager.push(session, tx, ReferenceRequest::new("alias", "a", 0)).unwrap();

        let header = manager.commit(session, tx).unwrap();
        assert_eq!(header.id, 2);
        assert_eq!(header.nentries, 3);
        assert_eq!(manager.store().get(&KeyRequest::new("alias")).unwrap().value, b"1");

        // Committed transactions are gone from the session.
        assert!(matches!(
            manager.commit(session, tx),
            Err(SessionError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn test_rejected_commit_closes_transaction() {
        let manager = manager();
        let session = manager.open_session();
        let tx = manager.begin(session).unwrap();
        assert!(matches!(
            manager.commit(session, tx),
            Err(SessionError::Store { source: StoreError::EmptyBatch { .. } })
        ));
        assert!(matches!(
            manager.rollback(session, tx),
            Err(SessionError::TransactionNotFound { .. })
        ));
        assert_eq!(manager.store().latest(), 0);
    }

    #[test]
    fn test_rollback_discards() {
        let manager = manager();
        let session = manager.open_session();
        let tx = manager.begin(session).unwrap();
        manager.push(session, tx, KeyValue::new("a", "1")).unwrap();
        manager.rollback(session, tx).unwrap();
        assert_eq!(manager.store().latest(), 0);
    }

    #[test]
    fn test_transactions_belong_to_their_session() {
        let manager = manager();
        let owner = manager.open_session();
        let other = manager.open_session();
        let tx = manager.begin(owner).unwrap();

        assert!(matches!(
            manager.push(other, tx, KeyValue::new("a", "1")),
            Err(SessionError::TransactionNotFound { .. })
        ));
        assert!(matches!(
            manager.rollback(other, tx),
            Err(SessionError::TransactionNotFound { .. })
        ));
        manager.push(owner, tx, KeyValue::new("a", "1")).unwrap();
    }

    #[test]
    fn test_close_session_discards_everything() {
        let manager = manager();
        let session = manager.open_session();
        let tx = manager.begin(session).unwrap();
        manager.open_cursor(session, "c", ZScanRequest::new("set")).unwrap();
        assert_eq!(manager.session_count(), 1);

        manager.close_session(session).unwrap();
        assert_eq!(manager.session_count(), 0);
        assert!(matches!(manager.begin(session), Err(SessionError::SessionNotFound { .. })));
        assert!(matches!(
            manager.commit(session, tx),
            Err(SessionError::SessionNotFound { .. })
        ));
        assert!(matches!(
            manager.close_session(session),
            Err(SessionError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_cursor_pages_at_fixed_snapshot() {
        let manager = manager();
        let store = manager.store().clone();
        let kvs = (0..5).map(|i| KeyValue::new(format!("k{i}"), "v")).collect();
        store.set(kvs).unwrap();
        for i in 0..5 {
            store.zadd("set", f64::from(i), format!("k{i}"), None).unwrap();
        }

        let session = manager.open_session();
        let req = ZScanRequest { limit: 2, ..ZScanRequest::new("set") };
        assert_eq!(manager.open_cursor(session, "c", req).unwrap(), 6);

        // Added after the cursor opened; never visible to it.
        store.zadd("set", 2.5, "k0", None).unwrap();

        let mut seen = Vec::new();
        loop {
            let page = manager.next_page(session, "c").unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 2);
            seen.extend(page.into_iter().map(|e| e.score));
        }
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

        manager.close_cursor(session, "c").unwrap();
        assert!(matches!(
            manager.next_page(session, "c"),
            Err(SessionError::CursorNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        let manager = manager();
        let session = manager.open_session();
        assert!(matches!(
            manager.open_cursor(session, "c", ZScanRequest::new("")),
            Err(SessionError::Store { source: StoreError::IllegalArgument { .. } })
        ));
    }
}
