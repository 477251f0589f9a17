//! Merging foreign entries into the log.
//!
//! A join runs in waves. Each wave dedups against what is already known,
//! admits the remaining entries in parallel (hash, signature, access gate)
//! and collects the parents it still has to resolve: from caller-supplied
//! references first, then from storage under the join deadline. Cut
//! entries never pull in their parents. Once the closure is resolved,
//! entries are accepted in canonical order so every parent is decided
//! before its children, persisted, and committed in one critical section.

use crate::events::Change;
use crate::log::{Log, OrderKey};
use calog_core::{Encoding, Entry, Error, Hash, Result};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// One unit of a join batch.
#[derive(Clone, Debug)]
pub enum JoinItem {
    Entry(Arc<Entry>),

    /// An entry plus ancestors the caller already holds, so they need not
    /// be fetched.
    WithReferences {
        entry: Arc<Entry>,
        references: Vec<Arc<Entry>>,
    },
}

impl From<Arc<Entry>> for JoinItem {
    fn from(entry: Arc<Entry>) -> Self {
        JoinItem::Entry(entry)
    }
}

impl From<Entry> for JoinItem {
    fn from(entry: Entry) -> Self {
        JoinItem::Entry(Arc::new(entry))
    }
}

impl From<(Arc<Entry>, Vec<Arc<Entry>>)> for JoinItem {
    fn from((entry, references): (Arc<Entry>, Vec<Arc<Entry>>)) -> Self {
        JoinItem::WithReferences { entry, references }
    }
}

/// Outcome of a join.
#[derive(Clone, Debug, Default)]
pub struct JoinReport {
    /// Entries newly indexed, in canonical order.
    pub added: Vec<Arc<Entry>>,
    /// Entries hidden by cut entries or dropped by automatic trim.
    pub removed: Vec<Arc<Entry>>,
    /// Entries (and unresolvable ancestors) left out of this join, with why.
    pub rejected: Vec<(Hash, Error)>,
}

impl JoinReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<E: Encoding> Log<E> {
    /// Merge `items` into the log.
    ///
    /// Per-entry failures (bad hash or signature, access rejection,
    /// unresolvable ancestors) drop the affected entry and its descendants
    /// from this batch and are listed in [`JoinReport::rejected`]; the rest
    /// of the batch still applies. Joining entries that are already known
    /// is a no-op.
    pub async fn join<I>(&self, items: I) -> Result<JoinReport>
    where
        I: IntoIterator,
        I::Item: Into<JoinItem>,
    {
        self.state.read().ensure_open()?;
        let deadline = Instant::now() + self.options.join_timeout();

        let mut references: HashMap<Hash, Arc<Entry>> = HashMap::new();
        let mut wave: Vec<Arc<Entry>> = Vec::new();
        for item in items {
            match item.into() {
                JoinItem::Entry(entry) => wave.push(entry),
                JoinItem::WithReferences {
                    entry,
                    references: refs,
                } => {
                    references.extend(refs.into_iter().map(|r| (*r.hash(), r)));
                    wave.push(entry);
                }
            }
        }
        for entry in &wave {
            references
                .entry(*entry.hash())
                .or_insert_with(|| Arc::clone(entry));
        }

        let mut candidates: HashMap<Hash, Arc<Entry>> = HashMap::new();
        let mut rejected: HashMap<Hash, Error> = HashMap::new();
        // Tombstoned ancestors that could not be recovered.
        let mut missing: HashSet<Hash> = HashSet::new();

        while !wave.is_empty() {
            let fresh: Vec<Arc<Entry>> = {
                let state = self.state.read();
                let mut queued = HashSet::new();
                std::mem::take(&mut wave)
                    .into_iter()
                    .filter(|e| {
                        let hash = e.hash();
                        !state.knows(hash)
                            && !candidates.contains_key(hash)
                            && !rejected.contains_key(hash)
                            && queued.insert(*hash)
                    })
                    .collect()
            };

            let verdicts = join_all(fresh.iter().map(|e| self.admit(e))).await;

            let mut unresolved: Vec<Hash> = Vec::new();
            let mut requested: HashSet<Hash> = HashSet::new();
            for (entry, verdict) in fresh.into_iter().zip(verdicts) {
                if let Err(e) = verdict {
                    warn!(hash = %entry.hash().short(), error = %e, "rejected joined entry");
                    rejected.insert(*entry.hash(), e);
                    continue;
                }
                candidates.insert(*entry.hash(), Arc::clone(&entry));
                if entry.is_cut() {
                    continue;
                }
                for parent in entry.next() {
                    if !requested.insert(*parent)
                        || self.state.read().knows(parent)
                        || candidates.contains_key(parent)
                        || rejected.contains_key(parent)
                        || missing.contains(parent)
                    {
                        continue;
                    }
                    match references.get(parent) {
                        Some(reference) => wave.push(Arc::clone(reference)),
                        None => unresolved.push(*parent),
                    }
                }
            }

            if unresolved.is_empty() {
                continue;
            }
            let tombstoned: HashSet<Hash> = {
                let state = self.state.read();
                unresolved
                    .iter()
                    .filter(|h| state.tombstones.contains(*h))
                    .copied()
                    .collect()
            };
            let fetched = join_all(
                unresolved
                    .iter()
                    .map(|h| self.fetch_ancestor(*h, deadline, tombstoned.contains(h))),
            )
            .await;
            for (hash, result) in unresolved.into_iter().zip(fetched) {
                match result {
                    Ok(Some(entry)) => wave.push(entry),
                    Ok(None) => {
                        debug!(hash = %hash.short(), "pruned ancestor unavailable, trusting local state");
                        missing.insert(hash);
                    }
                    Err(e) => {
                        warn!(hash = %hash.short(), error = %e, "dropping branch with unresolved ancestor");
                        rejected.insert(hash, e);
                    }
                }
            }
        }

        let mut ordered: Vec<Arc<Entry>> = candidates.values().cloned().collect();
        ordered.sort_by_key(|e| OrderKey::of(e));

        let mut accepted: HashMap<Hash, Arc<Entry>> = HashMap::new();
        let mut accepted_order: Vec<Arc<Entry>> = Vec::new();
        for entry in ordered {
            match self.check_parents(&entry, &accepted, &candidates, &rejected, &missing) {
                Ok(()) => {
                    accepted.insert(*entry.hash(), Arc::clone(&entry));
                    accepted_order.push(entry);
                }
                Err(e) => {
                    warn!(hash = %entry.hash().short(), error = %e, "rejected joined entry");
                    rejected.insert(*entry.hash(), e);
                }
            }
        }

        join_all(
            accepted_order
                .iter()
                .map(|e| e.persist(self.storage.as_ref())),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()?;

        let missing: Vec<Hash> = missing.into_iter().collect();
        let (change, reclaim) = self.commit(accepted_order, &missing)?;
        let Change { added, removed } = self.finish(change, reclaim).await?;

        let mut rejected: Vec<(Hash, Error)> = rejected.into_iter().collect();
        rejected.sort_by(|a, b| a.0.cmp(&b.0));

        debug!(
            added = added.len(),
            removed = removed.len(),
            rejected = rejected.len(),
            "joined entries"
        );
        Ok(JoinReport {
            added,
            removed,
            rejected,
        })
    }

    /// Join a single item, surfacing its rejection as an error.
    pub async fn join_one(&self, item: impl Into<JoinItem>) -> Result<JoinReport> {
        let item = item.into();
        let hash = match &item {
            JoinItem::Entry(entry) | JoinItem::WithReferences { entry, .. } => *entry.hash(),
        };
        let report = self.join([item]).await?;
        match report.rejected.iter().find(|(h, _)| *h == hash) {
            Some((_, e)) => Err(e.clone()),
            None => Ok(report),
        }
    }

    /// Verify an incoming entry without touching the structural lock.
    async fn admit(&self, entry: &Entry) -> Result<()> {
        if !entry.verify_hash() {
            return Err(Error::InvalidEntry(
                *entry.hash(),
                "hash does not match content".into(),
            ));
        }
        if entry.clock().logical() == u64::MAX {
            // Nothing could ever be appended on top of it.
            return Err(Error::InvalidEntry(
                *entry.hash(),
                "logical clock exhausted".into(),
            ));
        }
        if self.options.verify_signatures && !entry.verify_signature() {
            return Err(Error::Access(format!(
                "invalid signature on {}",
                entry.hash().short()
            )));
        }
        if !self.access.can_append(entry).await {
            return Err(Error::Access(format!(
                "{} rejected by access gate",
                entry.hash().short()
            )));
        }
        Ok(())
    }

    /// Resolve an ancestor from storage.
    ///
    /// Returns `Ok(None)` for a tombstoned ancestor that is gone; a live
    /// ancestor that does not turn up before `deadline` is a `JoinTimeout`.
    async fn fetch_ancestor(
        &self,
        hash: Hash,
        deadline: Instant,
        tombstoned: bool,
    ) -> Result<Option<Arc<Entry>>> {
        trace!(hash = %hash.short(), tombstoned, "fetching ancestor");
        let storage = self.storage.as_ref();

        if tombstoned {
            return match Entry::from_hash(storage, &hash, None).await {
                Ok(entry) => Ok(Some(Arc::new(entry))),
                Err(Error::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, Entry::from_hash(storage, &hash, Some(remaining)))
            .await
        {
            Ok(Ok(entry)) => Ok(Some(Arc::new(entry))),
            Ok(Err(Error::NotFound(_))) | Err(_) => Err(Error::JoinTimeout(hash)),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Decide an entry once all of its parents have been decided.
    fn check_parents(
        &self,
        entry: &Entry,
        accepted: &HashMap<Hash, Arc<Entry>>,
        candidates: &HashMap<Hash, Arc<Entry>>,
        rejected: &HashMap<Hash, Error>,
        missing: &HashSet<Hash>,
    ) -> Result<()> {
        for parent in entry.next() {
            let known = accepted
                .get(parent)
                .cloned()
                .or_else(|| self.state.read().lookup(parent).cloned());
            if let Some(parent_entry) = known {
                if entry.clock().logical() <= parent_entry.clock().logical() {
                    return Err(Error::InvalidEntry(
                        *entry.hash(),
                        format!("clock does not advance past parent {}", parent.short()),
                    ));
                }
                continue;
            }
            if entry.is_cut() || missing.contains(parent) {
                continue;
            }
            if let Some(e) = rejected.get(parent) {
                return Err(e.clone());
            }
            if candidates.contains_key(parent) {
                // The parent sorts after its child.
                return Err(Error::InvalidEntry(
                    *entry.hash(),
                    format!("clock does not advance past parent {}", parent.short()),
                ));
            }
            if self.is_tombstoned(parent) {
                continue;
            }
            return Err(Error::NotFound(*parent));
        }
        Ok(())
    }
}
