//! Frontier tracking.
//!
//! [`HeadsIndex`] maintains the set of entries with no locally known child,
//! incrementally, from a parent -> children reverse index. [`HeadsCache`]
//! persists the head hashes so a log can be reopened without a full scan.

use calog_core::{Entry, Error, Hash, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Current heads plus the reverse index needed to maintain them.
#[derive(Clone, Debug, Default)]
pub struct HeadsIndex {
    /// Entries with no known children.
    heads: HashSet<Hash>,

    /// Reverse index: parent -> children present in the log. Parents need
    /// not be present themselves (pruned or never fetched).
    children: HashMap<Hash, HashSet<Hash>>,
}

impl HeadsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a newly inserted entry.
    ///
    /// Handles out-of-order insertion: an entry whose children were indexed
    /// first does not become a head.
    pub fn add(&mut self, entry: &Entry) {
        let hash = *entry.hash();
        for parent in entry.next() {
            self.children.entry(*parent).or_default().insert(hash);
            self.heads.remove(parent);
        }
        if self.children.get(&hash).map_or(true, |c| c.is_empty()) {
            self.heads.insert(hash);
        }
    }

    /// Unindex a removed entry.
    ///
    /// Parents left without children become heads again if `is_present`
    /// reports them as still in the log.
    pub fn remove<F>(&mut self, entry: &Entry, is_present: F)
    where
        F: Fn(&Hash) -> bool,
    {
        let hash = entry.hash();
        self.heads.remove(hash);
        for parent in entry.next() {
            let orphaned = match self.children.get_mut(parent) {
                Some(children) => {
                    children.remove(hash);
                    children.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.children.remove(parent);
                if is_present(parent) {
                    self.heads.insert(*parent);
                }
            }
        }
    }

    pub fn is_head(&self, hash: &Hash) -> bool {
        self.heads.contains(hash)
    }

    /// Head hashes, sorted.
    pub fn hashes(&self) -> Vec<Hash> {
        let mut heads: Vec<_> = self.heads.iter().copied().collect();
        heads.sort();
        heads
    }

    /// Known children of `hash`.
    pub fn children(&self, hash: &Hash) -> Option<&HashSet<Hash>> {
        self.children.get(hash)
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

/// On-disk JSON list of head hashes.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// never leaves a truncated cache behind.
#[derive(Debug)]
pub struct HeadsCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HeadsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read cached head hashes. A missing cache file is an empty cache.
    pub async fn load(&self) -> Result<Vec<Hash>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(&self.path, e)),
        };
        let hex: Vec<String> = serde_json::from_slice(&bytes)?;
        hex.iter().map(|h| h.parse::<Hash>()).collect()
    }

    /// Persist the heads returned by `snapshot`.
    ///
    /// The snapshot is taken while holding the write lock so concurrent
    /// saves can not reorder an older frontier over a newer one.
    pub async fn save_with<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> Vec<Hash>,
    {
        let _guard = self.write_lock.lock().await;
        let hex: Vec<String> = snapshot().iter().map(Hash::to_string).collect();
        let bytes = serde_json::to_vec(&hex)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| storage_error(dir, e))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error(&self.path, e))
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calog_core::{CreateOptions, Ed25519Identity, Payload};
    use std::sync::Arc;

    fn entry(id: &Ed25519Identity, data: u8, next: Vec<Arc<Entry>>) -> Arc<Entry> {
        Arc::new(
            Entry::build(
                id,
                Payload::plain(vec![data]),
                CreateOptions::new().with_next(next),
                data as u64,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_linear_chain_has_single_head() {
        let id = Ed25519Identity::from_seed([1; 32]);
        let a = entry(&id, 1, vec![]);
        let b = entry(&id, 2, vec![a.clone()]);

        let mut index = HeadsIndex::new();
        index.add(&a);
        assert_eq!(index.hashes(), vec![*a.hash()]);
        index.add(&b);
        assert_eq!(index.hashes(), vec![*b.hash()]);
    }

    #[test]
    fn test_concurrent_branches_and_merge() {
        let id = Ed25519Identity::from_seed([1; 32]);
        let root = entry(&id, 1, vec![]);
        let left = entry(&id, 2, vec![root.clone()]);
        let right = entry(&id, 3, vec![root.clone()]);

        let mut index = HeadsIndex::new();
        for e in [&root, &left, &right] {
            index.add(e);
        }
        assert_eq!(index.len(), 2);
        assert!(index.is_head(left.hash()));
        assert!(index.is_head(right.hash()));

        let merge = entry(&id, 4, vec![left.clone(), right.clone()]);
        index.add(&merge);
        assert_eq!(index.hashes(), vec![*merge.hash()]);
    }

    #[test]
    fn test_out_of_order_insertion() {
        let id = Ed25519Identity::from_seed([1; 32]);
        let a = entry(&id, 1, vec![]);
        let b = entry(&id, 2, vec![a.clone()]);

        let mut index = HeadsIndex::new();
        index.add(&b);
        index.add(&a);
        assert_eq!(index.hashes(), vec![*b.hash()]);
    }

    #[test]
    fn test_remove_restores_present_parent() {
        let id = Ed25519Identity::from_seed([1; 32]);
        let a = entry(&id, 1, vec![]);
        let b = entry(&id, 2, vec![a.clone()]);

        let mut index = HeadsIndex::new();
        index.add(&a);
        index.add(&b);

        index.remove(&b, |h| h == a.hash());
        assert_eq!(index.hashes(), vec![*a.hash()]);

        index.remove(&a, |_| false);
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_keeps_absent_parent_out() {
        let id = Ed25519Identity::from_seed([1; 32]);
        let a = entry(&id, 1, vec![]);
        let b = entry(&id, 2, vec![a.clone()]);

        let mut index = HeadsIndex::new();
        index.add(&b);
        index.remove(&b, |_| false);
        assert!(index.is_empty());
        assert!(index.children(a.hash()).is_none());
    }

    #[tokio::test]
    async fn test_heads_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HeadsCache::new(dir.path().join("log").join("heads.json"));

        assert!(cache.load().await.unwrap().is_empty());

        let heads = vec![calog_core::Hasher::hash(b"a"), calog_core::Hasher::hash(b"b")];
        cache.save_with(|| heads.clone()).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), heads);
    }

    #[tokio::test]
    async fn test_heads_cache_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heads.json");
        tokio::fs::write(&path, br#"["nothex"]"#).await.unwrap();

        let err = HeadsCache::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }
}
