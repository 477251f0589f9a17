//! The log: an arena of immutable entries keyed by hash, its frontier and
//! the materialized total order.
//!
//! Structural state lives behind a single [`RwLock`]. Every path that
//! mutates it (append, join, trim, load) does its async work first
//! (encoding, signing, admission, fetching, persisting) and then takes the
//! write lock once for a short, synchronous commit. The lock is never held
//! across an `.await`.

use crate::access::{AccessGate, AllowAll};
use crate::events::Change;
use crate::heads::{HeadsCache, HeadsIndex};
use crate::options::LogOptions;
use crate::trim::TrimOptions;
use calog_core::{
    BlockStore, Clock, CreateOptions, Encoding, Entry, EntryType, Error, Hash, Identity, Keychain,
    Payload, Result, SystemWallClock, WallClock,
};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Sort key of the canonical total order.
///
/// Clock order first; the entry hash breaks the (practically impossible)
/// tie between distinct entries with identical clocks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct OrderKey {
    pub(crate) clock: Clock,
    pub(crate) hash: Hash,
}

impl OrderKey {
    pub(crate) fn of(entry: &Entry) -> Self {
        OrderKey {
            clock: entry.clock().clone(),
            hash: *entry.hash(),
        }
    }
}

/// Everything guarded by the structural lock.
#[derive(Debug)]
pub(crate) struct LogState {
    pub(crate) entries: HashMap<Hash, Arc<Entry>>,
    pub(crate) heads: HeadsIndex,
    pub(crate) values: BTreeSet<OrderKey>,
    /// Hashes dropped from the log that a known entry still names in
    /// `next`. Joins tolerate their absence.
    pub(crate) tombstones: HashSet<Hash>,
    /// Entries hidden by cut entries. Their blocks stay in storage until
    /// evicted, so an append sibling arriving later can bring them back.
    pub(crate) shadowed: HashMap<Hash, Arc<Entry>>,
    /// Shadowed entries in canonical order; eviction takes the oldest.
    shadow_order: BTreeSet<OrderKey>,
    /// Reverse index over shadowed entries: parent -> shadowed children.
    shadow_children: HashMap<Hash, HashSet<Hash>>,
    shadow_capacity: usize,
    pub(crate) byte_len: usize,
    pub(crate) closed: bool,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new(LogOptions::default().cut_retention)
    }
}

impl LogState {
    pub(crate) fn new(shadow_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            heads: HeadsIndex::new(),
            values: BTreeSet::new(),
            tombstones: HashSet::new(),
            shadowed: HashMap::new(),
            shadow_order: BTreeSet::new(),
            shadow_children: HashMap::new(),
            shadow_capacity,
            byte_len: 0,
            closed: false,
        }
    }

    /// Indexed or shadowed.
    pub(crate) fn knows(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash) || self.shadowed.contains_key(hash)
    }

    pub(crate) fn lookup(&self, hash: &Hash) -> Option<&Arc<Entry>> {
        self.entries.get(hash).or_else(|| self.shadowed.get(hash))
    }

    /// Whether any known entry lists `hash` as a parent.
    fn is_referenced(&self, hash: &Hash) -> bool {
        self.heads.children(hash).map_or(false, |c| !c.is_empty())
            || self.shadow_children.get(hash).map_or(false, |c| !c.is_empty())
    }

    /// Drop tombstones of `entry`'s parents that nothing names any more.
    fn sweep_tombstones(&mut self, entry: &Entry) {
        for parent in entry.next() {
            if !self.is_referenced(parent) {
                self.tombstones.remove(parent);
            }
        }
    }

    /// Index an entry. Returns false if it was already present.
    pub(crate) fn insert(&mut self, entry: Arc<Entry>) -> bool {
        let hash = *entry.hash();
        if self.entries.contains_key(&hash) {
            return false;
        }
        self.tombstones.remove(&hash);
        self.heads.add(&entry);
        self.values.insert(OrderKey::of(&entry));
        self.byte_len += entry.byte_len();
        self.entries.insert(hash, entry);
        true
    }

    fn unindex(&mut self, hash: &Hash) -> Option<Arc<Entry>> {
        let entry = self.entries.remove(hash)?;
        self.values.remove(&OrderKey::of(&entry));
        self.byte_len -= entry.byte_len();
        let entries = &self.entries;
        self.heads.remove(&entry, |h| entries.contains_key(h));
        Some(entry)
    }

    /// Drop an indexed entry for good.
    pub(crate) fn remove(&mut self, hash: &Hash) -> Option<Arc<Entry>> {
        let entry = self.unindex(hash)?;
        if self.is_referenced(hash) {
            self.tombstones.insert(*hash);
        }
        self.sweep_tombstones(&entry);
        Some(entry)
    }

    fn shadow(&mut self, hash: &Hash) {
        let Some(entry) = self.unindex(hash) else {
            return;
        };
        for parent in entry.next() {
            self.shadow_children.entry(*parent).or_default().insert(*hash);
        }
        self.shadow_order.insert(OrderKey::of(&entry));
        self.shadowed.insert(*hash, entry);
    }

    fn unshadow(&mut self, hash: &Hash) {
        let Some(entry) = self.shadowed.remove(hash) else {
            return;
        };
        self.forget_shadow_links(&entry);
        self.shadow_order.remove(&OrderKey::of(&entry));
        self.insert(entry);
    }

    fn forget_shadow_links(&mut self, entry: &Entry) {
        for parent in entry.next() {
            if let Some(children) = self.shadow_children.get_mut(parent) {
                children.remove(entry.hash());
                if children.is_empty() {
                    self.shadow_children.remove(parent);
                }
            }
        }
    }

    /// What the children of `hash` say about it: shadowed when it has
    /// children and none of them is an indexed append entry. `None` when
    /// there are no children to go by.
    fn shadowed_by_children(&self, hash: &Hash) -> Option<bool> {
        let indexed = self.heads.children(hash);
        let kept_alive = indexed.map_or(false, |children| {
            children
                .iter()
                .any(|c| self.entries.get(c).map_or(false, |e| !e.is_cut()))
        });
        if kept_alive {
            return Some(false);
        }
        self.is_referenced(hash).then_some(true)
    }

    /// Recompute which entries cut entries hide, starting at `dirty`.
    ///
    /// Children always order after their parents, so walking the queue
    /// from the newest key down decides every entry after its children.
    /// The outcome depends only on the set of known entries, not on the
    /// order they arrived in.
    pub(crate) fn settle<I>(&mut self, dirty: I, ledger: &mut Ledger)
    where
        I: IntoIterator<Item = Hash>,
    {
        let mut queue: BTreeSet<OrderKey> = dirty
            .into_iter()
            .filter_map(|h| self.lookup(&h).map(|e| OrderKey::of(e)))
            .collect();

        while let Some(key) = queue.pop_last() {
            let indexed = self.entries.contains_key(&key.hash);
            let Some(shadow) = self.shadowed_by_children(&key.hash) else {
                continue;
            };
            if shadow != indexed {
                continue;
            }
            let Some(entry) = self.lookup(&key.hash).cloned() else {
                continue;
            };
            ledger.touch(&entry, indexed);
            if shadow {
                self.shadow(&key.hash);
            } else {
                self.unshadow(&key.hash);
            }
            queue.extend(
                entry
                    .next()
                    .iter()
                    .filter_map(|p| self.lookup(p).map(|e| OrderKey::of(e))),
            );
        }
    }

    /// Release the oldest shadowed entries beyond capacity. Returns the
    /// hashes whose blocks can go.
    pub(crate) fn evict_shadowed(&mut self) -> Vec<Hash> {
        let mut evicted = Vec::new();
        while self.shadowed.len() > self.shadow_capacity {
            let Some(key) = self.shadow_order.pop_first() else {
                break;
            };
            let hash = key.hash;
            let Some(entry) = self.shadowed.remove(&hash) else {
                continue;
            };
            self.forget_shadow_links(&entry);
            if self.is_referenced(&hash) {
                self.tombstones.insert(hash);
            }
            self.sweep_tombstones(&entry);
            evicted.push(hash);
        }
        evicted
    }

    /// Entries in canonical order.
    pub(crate) fn ordered(&self) -> impl DoubleEndedIterator<Item = &Arc<Entry>> + '_ {
        self.values.iter().filter_map(|k| self.entries.get(&k.hash))
    }

    pub(crate) fn heads(&self) -> Vec<Arc<Entry>> {
        let mut heads: Vec<_> = self
            .heads
            .hashes()
            .iter()
            .filter_map(|h| self.entries.get(h).cloned())
            .collect();
        heads.sort_by(|a, b| OrderKey::of(a).cmp(&OrderKey::of(b)));
        heads
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_invariants(&self) -> Result<()> {
        if self.heads.is_empty() && !self.entries.is_empty() {
            return Err(Error::Concurrency(format!(
                "{} entries indexed but no heads",
                self.entries.len()
            )));
        }
        if self.values.len() != self.entries.len() {
            return Err(Error::Concurrency(format!(
                "order index holds {} keys for {} entries",
                self.values.len(),
                self.entries.len()
            )));
        }
        if let Some(hash) = self.shadowed.keys().find(|h| self.entries.contains_key(*h)) {
            return Err(Error::Concurrency(format!(
                "{} is both indexed and shadowed",
                hash.short()
            )));
        }
        Ok(())
    }
}

/// Entries a commit moved in or out of the index, with where each started.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    touched: HashMap<Hash, (Arc<Entry>, bool)>,
}

impl Ledger {
    pub(crate) fn touch(&mut self, entry: &Arc<Entry>, was_indexed: bool) {
        self.touched
            .entry(*entry.hash())
            .or_insert_with(|| (Arc::clone(entry), was_indexed));
    }

    /// Net effect against `state`, in canonical order.
    pub(crate) fn into_change(self, state: &LogState) -> Change {
        let mut change = Change::default();
        for (entry, was_indexed) in self.touched.into_values() {
            match (was_indexed, state.entries.contains_key(entry.hash())) {
                (false, true) => change.added.push(entry),
                (true, false) => change.removed.push(entry),
                _ => {}
            }
        }
        change.added.sort_by_key(|e| OrderKey::of(e));
        change.removed.sort_by_key(|e| OrderKey::of(e));
        change
    }
}

/// Options for a single append.
#[derive(Clone, Debug, Default)]
pub struct AppendOptions {
    /// Parents of the new entry. Defaults to the current heads.
    pub next: Option<Vec<Arc<Entry>>>,
    pub entry_type: EntryType,
    /// Group id seed, used only when the entry has no parents.
    pub gid_seed: Option<Vec<u8>>,
    /// Seal the payload with the log's keychain.
    pub seal: bool,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Vec<Arc<Entry>>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn cut(mut self) -> Self {
        self.entry_type = EntryType::Cut;
        self
    }

    pub fn with_gid_seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.gid_seed = Some(seed.into());
        self
    }

    pub fn sealed(mut self) -> Self {
        self.seal = true;
        self
    }
}

/// Outcome of an append.
#[derive(Clone, Debug)]
pub struct AppendResult {
    pub entry: Arc<Entry>,
    /// Entries dropped as a consequence (cut pruning, automatic trim).
    pub removed: Vec<Arc<Entry>>,
}

/// Builder wiring a log to its collaborators.
pub struct LogBuilder<E: Encoding> {
    storage: Arc<dyn BlockStore>,
    identity: Arc<dyn Identity>,
    encoding: E,
    access: Arc<dyn AccessGate>,
    keychain: Option<Arc<dyn Keychain>>,
    wall_clock: Arc<dyn WallClock>,
    options: LogOptions,
}

impl<E: Encoding> LogBuilder<E> {
    pub fn new(storage: Arc<dyn BlockStore>, identity: Arc<dyn Identity>, encoding: E) -> Self {
        Self {
            storage,
            identity,
            encoding,
            access: Arc::new(AllowAll),
            keychain: None,
            wall_clock: Arc::new(SystemWallClock),
            options: LogOptions::default(),
        }
    }

    pub fn access(mut self, access: Arc<dyn AccessGate>) -> Self {
        self.access = access;
        self
    }

    pub fn keychain(mut self, keychain: Arc<dyn Keychain>) -> Self {
        self.keychain = Some(keychain);
        self
    }

    pub fn wall_clock(mut self, wall_clock: Arc<dyn WallClock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn options(mut self, options: LogOptions) -> Self {
        self.options = options;
        self
    }

    fn into_log(self) -> Log<E> {
        let (events, _) = broadcast::channel(self.options.event_capacity.max(1));
        let heads_cache = self.options.heads_cache_path.clone().map(HeadsCache::new);
        let cut_retention = self.options.cut_retention;
        Log {
            storage: self.storage,
            identity: self.identity,
            encoding: self.encoding,
            access: self.access,
            keychain: self.keychain,
            wall_clock: self.wall_clock,
            options: self.options,
            heads_cache,
            state: RwLock::new(LogState::new(cut_retention)),
            events,
        }
    }

    /// Open the log, reloading from the heads cache when one is configured.
    pub async fn open(self) -> Result<Log<E>> {
        let log = self.into_log();
        if let Some(cache) = &log.heads_cache {
            let heads = cache.load().await?;
            if !heads.is_empty() {
                log.load_from_heads(&heads).await?;
            }
        }
        Ok(log)
    }

    /// Open the log and load every entry reachable from `heads`.
    pub async fn open_from(self, heads: &[Hash]) -> Result<Log<E>> {
        let log = self.into_log();
        log.load_from_heads(heads).await?;
        Ok(log)
    }
}

/// A content-addressed, append-only DAG of entries with a deterministic
/// total order.
pub struct Log<E: Encoding> {
    pub(crate) storage: Arc<dyn BlockStore>,
    identity: Arc<dyn Identity>,
    encoding: E,
    pub(crate) access: Arc<dyn AccessGate>,
    keychain: Option<Arc<dyn Keychain>>,
    wall_clock: Arc<dyn WallClock>,
    pub(crate) options: LogOptions,
    heads_cache: Option<HeadsCache>,
    pub(crate) state: RwLock<LogState>,
    events: broadcast::Sender<Change>,
}

impl<E: Encoding> Log<E> {
    /// Append a value on top of the current heads (or `options.next`).
    ///
    /// Fails with `Access` if the access gate rejects the entry; nothing is
    /// persisted or indexed in that case.
    pub async fn append(&self, value: &E::Value, options: AppendOptions) -> Result<AppendResult> {
        self.state.read().ensure_open()?;

        let bytes = self.encoding.encode(value)?;
        let payload = if options.seal {
            let keychain = self
                .keychain
                .as_ref()
                .ok_or_else(|| Error::Access("sealed append without a keychain".into()))?;
            Payload::Sealed(keychain.seal(&bytes)?)
        } else {
            Payload::plain(bytes)
        };

        let next = match options.next {
            Some(next) => next,
            None => self.heads(),
        };
        let create = CreateOptions {
            next,
            gid_seed: options.gid_seed,
            entry_type: options.entry_type,
            timestamp: None,
        };
        let entry = Arc::new(Entry::build(
            self.identity.as_ref(),
            payload,
            create,
            self.wall_clock.now_ms(),
        )?);

        if !self.access.can_append(&entry).await {
            return Err(Error::Access(format!(
                "append of {} rejected",
                entry.hash().short()
            )));
        }
        entry.persist(self.storage.as_ref()).await?;

        let (change, reclaim) = self.commit(vec![Arc::clone(&entry)], &[])?;
        debug!(
            hash = %entry.hash().short(),
            logical = entry.clock().logical(),
            cut = entry.is_cut(),
            "appended entry"
        );
        let change = self.finish(change, reclaim).await?;

        Ok(AppendResult {
            entry,
            removed: change.removed,
        })
    }

    /// Index entries that are already persisted and admitted.
    ///
    /// `missing` names ancestors known to be gone from storage; the ones
    /// still referenced are tombstoned. Cut shadowing, the automatic trim
    /// and shadow eviction all run inside the same critical section, so
    /// observers never see a half-applied batch. Returns the net change
    /// and the hashes whose blocks can be deleted.
    pub(crate) fn commit(
        &self,
        entries: Vec<Arc<Entry>>,
        missing: &[Hash],
    ) -> Result<(Change, Vec<Hash>)> {
        let mut state = self.state.write();
        state.ensure_open()?;

        let mut ledger = Ledger::default();
        let mut dirty = Vec::new();
        for entry in entries {
            if state.knows(entry.hash()) {
                continue;
            }
            ledger.touch(&entry, false);
            dirty.push(*entry.hash());
            dirty.extend(entry.next().iter().copied());
            state.insert(entry);
        }
        for hash in missing {
            if !state.knows(hash) && state.is_referenced(hash) {
                state.tombstones.insert(*hash);
            }
        }
        state.settle(dirty, &mut ledger);

        let mut reclaim = Vec::new();
        if let Some(trim) = &self.options.trim {
            for entry in crate::trim::select_and_remove(&mut state, trim) {
                ledger.touch(&entry, true);
                reclaim.push(*entry.hash());
            }
        }
        reclaim.extend(state.evict_shadowed());
        state.check_invariants()?;

        let change = ledger.into_change(&state);
        Ok((change, reclaim))
    }

    /// Post-commit work: reclaim storage, save the heads cache, notify.
    pub(crate) async fn finish(&self, change: Change, reclaim: Vec<Hash>) -> Result<Change> {
        for hash in &reclaim {
            if let Err(e) = self.storage.rm(hash).await {
                warn!(hash = %hash.short(), error = %e, "failed to delete block");
            }
        }
        self.save_heads().await?;
        if !change.is_empty() {
            // No subscribers is fine.
            let _ = self.events.send(change.clone());
        }
        Ok(change)
    }

    async fn save_heads(&self) -> Result<()> {
        match &self.heads_cache {
            Some(cache) => cache.save_with(|| self.state.read().heads.hashes()).await,
            None => Ok(()),
        }
    }

    /// Rebuild state from storage by walking `next` links from `heads`.
    ///
    /// Below cut entries the walk only picks up as many entries as
    /// `cut_retention` allows, so the shadowed set survives a reopen.
    /// Missing ancestors are tolerated and tombstoned (they were trimmed
    /// or evicted); a missing head is `NotFound`.
    pub async fn load_from_heads(&self, heads: &[Hash]) -> Result<Change> {
        self.state.read().ensure_open()?;

        let roots: HashSet<Hash> = heads.iter().copied().collect();
        let mut stack: Vec<(Hash, bool)> = heads.iter().map(|h| (*h, false)).collect();
        let mut seen: HashSet<Hash> = HashSet::new();
        let mut loaded = Vec::new();
        let mut missing = Vec::new();
        let mut below_cut = 0usize;

        while let Some((hash, under_cut)) = stack.pop() {
            if !seen.insert(hash) || self.state.read().knows(&hash) {
                continue;
            }
            if under_cut {
                if below_cut >= self.options.cut_retention {
                    continue;
                }
                below_cut += 1;
            }
            let entry = match Entry::from_hash(self.storage.as_ref(), &hash, None).await {
                Ok(entry) => entry,
                Err(Error::NotFound(_)) if !roots.contains(&hash) => {
                    debug!(hash = %hash.short(), "ancestor missing from storage");
                    if under_cut {
                        below_cut -= 1;
                    }
                    missing.push(hash);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let parents_under_cut = under_cut || entry.is_cut();
            stack.extend(entry.next().iter().map(|p| (*p, parents_under_cut)));
            loaded.push(Arc::new(entry));
        }

        let (change, reclaim) = self.commit(loaded, &missing)?;
        debug!(
            heads = heads.len(),
            loaded = change.added.len(),
            missing = missing.len(),
            "loaded log"
        );
        self.finish(change, reclaim).await
    }

    /// Flush the heads cache and reject further mutations.
    pub async fn close(&self) -> Result<()> {
        self.state.write().closed = true;
        self.save_heads().await
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<Entry>> {
        self.state.read().entries.get(hash).cloned()
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.state.read().entries.contains_key(hash)
    }

    /// Current heads in canonical order.
    pub fn heads(&self) -> Vec<Arc<Entry>> {
        self.state.read().heads()
    }

    /// Current head hashes, sorted by hash.
    pub fn head_hashes(&self) -> Vec<Hash> {
        self.state.read().heads.hashes()
    }

    /// All entries in canonical order.
    pub fn values(&self) -> Vec<Arc<Entry>> {
        self.state.read().ordered().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total stored bytes of indexed entries.
    pub fn byte_len(&self) -> usize {
        self.state.read().byte_len
    }

    /// Whether `hash` was dropped from the log while a known entry still
    /// names it as a parent.
    pub fn is_tombstoned(&self, hash: &Hash) -> bool {
        self.state.read().tombstones.contains(hash)
    }

    /// Whether `hash` is hidden by a cut entry but still retained.
    pub fn is_shadowed(&self, hash: &Hash) -> bool {
        self.state.read().shadowed.contains_key(hash)
    }

    /// Decode an entry's payload with this log's encoding and keychain.
    pub fn payload_value(&self, entry: &Entry) -> Result<E::Value> {
        entry.payload_value(&self.encoding, self.keychain.as_deref())
    }

    pub fn encoding(&self) -> &E {
        &self.encoding
    }

    pub fn identity(&self) -> &Arc<dyn Identity> {
        &self.identity
    }

    pub fn storage(&self) -> &Arc<dyn BlockStore> {
        &self.storage
    }

    pub fn options(&self) -> &LogOptions {
        &self.options
    }

    /// Receive every change committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.events.subscribe()
    }

    /// Trim to `options`, reclaiming storage for dropped entries.
    pub async fn trim(&self, options: &TrimOptions) -> Result<Vec<Arc<Entry>>> {
        let removed = {
            let mut state = self.state.write();
            state.ensure_open()?;
            let removed = crate::trim::select_and_remove(&mut state, options);
            state.check_invariants()?;
            removed
        };
        if !removed.is_empty() {
            debug!(removed = removed.len(), kind = ?options.kind, to = options.to, "trimmed log");
        }
        let reclaim = removed.iter().map(|e| *e.hash()).collect();
        let change = self
            .finish(
                Change {
                    added: Vec::new(),
                    removed,
                },
                reclaim,
            )
            .await?;
        Ok(change.removed)
    }
}

impl<E: Encoding> std::fmt::Debug for Log<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Log")
            .field("identity", &self.identity.public_key())
            .field("entries", &state.entries.len())
            .field("heads", &state.heads.len())
            .field("closed", &state.closed)
            .finish()
    }
}
