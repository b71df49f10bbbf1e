//! Shared helpers for store integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{io, sync::Arc};

use proofkv_store::{InMemoryBackend, StorageBackend, Store};
use proofkv_test_utils::{CrashInjector, CrashMode, CrashPoint, Segment};
use proofkv_types::{KeyValue, config::StoreConfig};

/// Backend that consults a [`CrashInjector`] before every write.
///
/// An append that crashes writes the first half of its bytes, then fails.
pub struct CrashingBackend {
    inner: Arc<InMemoryBackend>,
    segment: Segment,
    injector: Arc<CrashInjector>,
}

impl CrashingBackend {
    pub fn new(inner: Arc<InMemoryBackend>, segment: Segment, injector: Arc<CrashInjector>) -> Self {
        Self { inner, segment, injector }
    }
}

fn injected() -> proofkv_store::Error {
    io::Error::other("injected crash").into()
}

impl StorageBackend for CrashingBackend {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> proofkv_store::Result<()> {
        self.inner.read_exact_at(offset, buf)
    }

    fn append(&self, data: &[u8]) -> proofkv_store::Result<u64> {
        let already_crashed = self.injector.has_crashed();
        if self.injector.on_append(self.segment) {
            // Torn write; a dead disk takes nothing.
            if !already_crashed {
                self.inner.append(&data[..data.len() / 2])?;
            }
            return Err(injected());
        }
        self.inner.append(data)
    }

    fn truncate(&self, len: u64) -> proofkv_store::Result<()> {
        if self.injector.on_truncate() {
            return Err(injected());
        }
        self.inner.truncate(len)
    }

    fn sync(&self) -> proofkv_store::Result<()> {
        if self.injector.on_sync(self.segment) {
            return Err(injected());
        }
        self.inner.sync()
    }

    fn len(&self) -> proofkv_store::Result<u64> {
        self.inner.len()
    }
}

/// A store over crash-injecting segments, with handles to the raw bytes.
pub struct CrashHarness {
    pub store: Store<CrashingBackend>,
    pub log: Arc<InMemoryBackend>,
    pub nodes: Arc<InMemoryBackend>,
    pub injector: Arc<CrashInjector>,
}

impl CrashHarness {
    pub fn new(point: CrashPoint, mode: CrashMode) -> Self {
        let log = Arc::new(InMemoryBackend::new());
        let nodes = Arc::new(InMemoryBackend::new());
        let injector = CrashInjector::new(point, mode);
        let store = Store::from_backends(
            CrashingBackend::new(log.clone(), Segment::Log, injector.clone()),
            CrashingBackend::new(nodes.clone(), Segment::Nodes, injector.clone()),
            StoreConfig::default(),
        )
        .unwrap();
        Self { store, log, nodes, injector }
    }

    /// Reopens a fresh store over a copy of the bytes on "disk".
    pub fn reopen(&self) -> proofkv_types::Result<Store<InMemoryBackend>> {
        reopen_bytes(&self.log, &self.nodes)
    }
}

/// Opens a store over copies of two segments' current bytes.
pub fn reopen_bytes(
    log: &InMemoryBackend,
    nodes: &InMemoryBackend,
) -> proofkv_types::Result<Store<InMemoryBackend>> {
    Store::from_backends(
        InMemoryBackend::from_bytes(log.contents()),
        InMemoryBackend::from_bytes(nodes.contents()),
        StoreConfig::default(),
    )
}

/// In-memory store over shared segments, so tests can reach the raw bytes.
pub fn shared_store() -> (Store<Arc<InMemoryBackend>>, Arc<InMemoryBackend>, Arc<InMemoryBackend>) {
    let log = Arc::new(InMemoryBackend::new());
    let nodes = Arc::new(InMemoryBackend::new());
    let store = Store::from_backends(log.clone(), nodes.clone(), StoreConfig::default()).unwrap();
    (store, log, nodes)
}

/// Commits `n` single-key transactions `k{i} = v{i}` for `i` in `0..n`.
pub fn fill<B: StorageBackend>(store: &Store<B>, n: usize) {
    for i in 0..n {
        store.set(vec![KeyValue::new(format!("k{i}"), format!("v{i}"))]).unwrap();
    }
}
