//! Shared helpers for the log integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use calog_core::{
    BlockStore, Ed25519Identity, Entry, Hash, Identity, ManualWallClock, MemoryBlockStore, Result,
    StringEncoding,
};
use calog_log::{JoinItem, Log, LogBuilder, LogOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Block store that counts reads.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryBlockStore,
    gets: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockStore for CountingStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Hash> {
        self.inner.put(bytes).await
    }

    async fn get(&self, cid: &Hash, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(cid, timeout).await
    }

    async fn has(&self, cid: &Hash) -> Result<bool> {
        self.inner.has(cid).await
    }

    async fn rm(&self, cid: &Hash) -> Result<()> {
        self.inner.rm(cid).await
    }
}

/// `n` deterministic identities, sorted by public key so that clock ties
/// between them break in index order.
pub fn identities(n: usize) -> Vec<Arc<Ed25519Identity>> {
    let mut ids: Vec<_> = (0..n)
        .map(|i| Arc::new(Ed25519Identity::from_seed([i as u8 + 1; 32])))
        .collect();
    ids.sort_by_key(|id| id.public_key());
    ids
}

pub struct Harness {
    pub wall: Arc<ManualWallClock>,
    pub ids: Vec<Arc<Ed25519Identity>>,
}

impl Harness {
    pub fn new(identities_count: usize) -> Self {
        Self {
            wall: Arc::new(ManualWallClock::default()),
            ids: identities(identities_count),
        }
    }

    /// Log `i` on its own in-memory store.
    pub async fn log(&self, i: usize) -> Log<StringEncoding> {
        self.log_on(i, Arc::new(MemoryBlockStore::new()), LogOptions::default())
            .await
    }

    pub async fn log_on(
        &self,
        i: usize,
        storage: Arc<dyn BlockStore>,
        options: LogOptions,
    ) -> Log<StringEncoding> {
        self.builder(i, storage)
            .options(options)
            .open()
            .await
            .unwrap()
    }

    pub fn builder(&self, i: usize, storage: Arc<dyn BlockStore>) -> LogBuilder<StringEncoding> {
        LogBuilder::new(storage, self.ids[i].clone(), StringEncoding).wall_clock(self.wall.clone())
    }
}

/// Join `from`'s heads into `to`, shipping `from`'s entries as references.
pub async fn sync(to: &Log<StringEncoding>, from: &Log<StringEncoding>) {
    let references = from.values();
    let items: Vec<JoinItem> = from
        .heads()
        .into_iter()
        .map(|entry| JoinItem::WithReferences {
            entry,
            references: references.clone(),
        })
        .collect();
    let report = to.join(items).await.unwrap();
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
}

pub fn payloads(log: &Log<StringEncoding>) -> Vec<String> {
    log.values()
        .iter()
        .map(|e| log.payload_value(e).unwrap())
        .collect()
}

pub fn hashes(entries: &[Arc<Entry>]) -> Vec<Hash> {
    entries.iter().map(|e| *e.hash()).collect()
}
