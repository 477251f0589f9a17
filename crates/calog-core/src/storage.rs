//! Content-addressed block storage.
//!
//! The log persists every entry as one blob keyed by the SHA-256 of its
//! bytes. Storage is shared between tasks, so implementations take `&self`
//! and synchronise internally.

use crate::error::Result;
use crate::hash::{Hash, Hasher};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Trait for content-addressed block storage.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block, returning its content id.
    ///
    /// Identical bytes always map to the same id.
    async fn put(&self, bytes: Vec<u8>) -> Result<Hash>;

    /// Fetch a block.
    ///
    /// With a `timeout`, implementations may wait for the block to become
    /// available (e.g. arrive from a peer) before giving up with `Ok(None)`.
    async fn get(&self, cid: &Hash, timeout: Option<Duration>) -> Result<Option<Vec<u8>>>;

    /// Check whether a block is available locally.
    async fn has(&self, cid: &Hash) -> Result<bool>;

    /// Remove a block. Removing an absent block is not an error.
    async fn rm(&self, cid: &Hash) -> Result<()>;
}

/// In-memory implementation of BlockStore.
///
/// `get` with a timeout parks on a [`Notify`] until a matching `put`
/// arrives or the deadline passes.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Hash, Arc<[u8]>>>,
    arrivals: Notify,
}

impl MemoryBlockStore {
    /// Create a new empty block store.
    pub fn new() -> Self {
        MemoryBlockStore {
            blocks: RwLock::new(HashMap::new()),
            arrivals: Notify::new(),
        }
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held.
    pub fn byte_len(&self) -> usize {
        self.blocks.read().values().map(|b| b.len()).sum()
    }

    fn lookup(&self, cid: &Hash) -> Option<Vec<u8>> {
        self.blocks.read().get(cid).map(|b| b.to_vec())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<Hash> {
        let cid = Hasher::hash(&bytes);
        self.blocks.write().entry(cid).or_insert_with(|| bytes.into());
        self.arrivals.notify_waiters();
        Ok(cid)
    }

    async fn get(&self, cid: &Hash, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let Some(timeout) = timeout else {
            return Ok(self.lookup(cid));
        };

        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a put racing with the
            // lookup still wakes us.
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(bytes) = self.lookup(cid) {
                return Ok(Some(bytes));
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn has(&self, cid: &Hash) -> Result<bool> {
        Ok(self.blocks.read().contains_key(cid))
    }

    async fn rm(&self, cid: &Hash) -> Result<()> {
        self.blocks.write().remove(cid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_is_content_addressed() {
        let store = MemoryBlockStore::new();
        let a = store.put(b"block".to_vec()).await.unwrap();
        let b = store.put(b"block".to_vec()).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a, Hasher::hash(b"block"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_has_rm() {
        let store = MemoryBlockStore::new();
        let cid = store.put(b"data".to_vec()).await.unwrap();

        assert!(store.has(&cid).await.unwrap());
        assert_eq!(store.get(&cid, None).await.unwrap(), Some(b"data".to_vec()));

        store.rm(&cid).await.unwrap();
        assert!(!store.has(&cid).await.unwrap());
        assert_eq!(store.get(&cid, None).await.unwrap(), None);
        store.rm(&cid).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let store = MemoryBlockStore::new();
        let missing = Hasher::hash(b"never stored");

        let started = std::time::Instant::now();
        let result = store
            .get(&missing, Some(Duration::from_millis(30)))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_get_waits_for_late_put() {
        let store = Arc::new(MemoryBlockStore::new());
        let cid = Hasher::hash(b"late block");

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.put(b"late block".to_vec()).await.unwrap();
            })
        };

        let fetched = store.get(&cid, Some(Duration::from_secs(5))).await.unwrap();
        writer.await.unwrap();
        assert_eq!(fetched, Some(b"late block".to_vec()));
    }
}
