//! Range iteration over the canonical order.
//!
//! An iteration is a snapshot: the matching entries are collected under the
//! read lock when [`Log::iterate`] is called, and later appends or joins
//! are not observed by an existing [`LogIterator`].

use crate::log::{Log, LogState, OrderKey};
use calog_core::{Encoding, Entry, Error, Hash, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// One side of a range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bound {
    Exclusive(Vec<Hash>),
    Inclusive(Vec<Hash>),
}

impl Bound {
    fn hashes(&self) -> &[Hash] {
        match self {
            Bound::Exclusive(h) | Bound::Inclusive(h) => h,
        }
    }

    fn is_inclusive(&self) -> bool {
        matches!(self, Bound::Inclusive(_))
    }
}

/// Range query over a log.
///
/// - `lt`/`lte` name the entries to walk back from; only their ancestors
///   (and, for `lte`, the entries themselves) are visited.
/// - `gt`/`gte` cut the result to entries ordered after (or at) the
///   earliest of the named entries.
/// - `amount` caps the result. With only a lower bound it keeps the entries
///   right after the bound, otherwise the newest ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterateOptions {
    pub upper: Option<Bound>,
    pub lower: Option<Bound>,
    pub amount: Option<usize>,
}

impl IterateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lt(mut self, hashes: impl IntoIterator<Item = Hash>) -> Self {
        self.upper = Some(Bound::Exclusive(hashes.into_iter().collect()));
        self
    }

    pub fn lte(mut self, hashes: impl IntoIterator<Item = Hash>) -> Self {
        self.upper = Some(Bound::Inclusive(hashes.into_iter().collect()));
        self
    }

    pub fn gt(mut self, hashes: impl IntoIterator<Item = Hash>) -> Self {
        self.lower = Some(Bound::Exclusive(hashes.into_iter().collect()));
        self
    }

    pub fn gte(mut self, hashes: impl IntoIterator<Item = Hash>) -> Self {
        self.lower = Some(Bound::Inclusive(hashes.into_iter().collect()));
        self
    }

    pub fn amount(mut self, amount: usize) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Finite, ascending sequence of entries from one log snapshot.
#[derive(Debug)]
pub struct LogIterator {
    inner: std::vec::IntoIter<Arc<Entry>>,
}

impl Iterator for LogIterator {
    type Item = Arc<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for LogIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for LogIterator {}

fn lookup<'a>(state: &'a LogState, hash: &Hash) -> Result<&'a Arc<Entry>> {
    state.entries.get(hash).ok_or(Error::NotFound(*hash))
}

/// Walk `next` links back from the bound's entries.
fn ancestors(state: &LogState, bound: &Bound) -> Result<Vec<OrderKey>> {
    let mut visited: HashSet<Hash> = HashSet::new();
    let mut stack: Vec<Hash> = Vec::new();
    let mut keys = Vec::new();

    for root in bound.hashes() {
        let entry = lookup(state, root)?;
        if bound.is_inclusive() {
            stack.push(*root);
        } else {
            stack.extend(entry.next().iter().copied());
        }
    }

    while let Some(hash) = stack.pop() {
        if !visited.insert(hash) {
            continue;
        }
        // Parents may be pruned.
        let Some(entry) = state.entries.get(&hash) else {
            continue;
        };
        keys.push(OrderKey::of(entry));
        stack.extend(entry.next().iter().copied());
    }

    keys.sort();
    Ok(keys)
}

pub(crate) fn collect(state: &LogState, options: &IterateOptions) -> Result<Vec<Arc<Entry>>> {
    let mut keys: Vec<OrderKey> = match &options.upper {
        Some(bound) => ancestors(state, bound)?,
        None => state.values.iter().cloned().collect(),
    };

    if let Some(bound) = &options.lower {
        let mut floor: Option<OrderKey> = None;
        for hash in bound.hashes() {
            let key = OrderKey::of(lookup(state, hash)?);
            if floor.as_ref().map_or(true, |f| key < *f) {
                floor = Some(key);
            }
        }
        if let Some(floor) = floor {
            let inclusive = bound.is_inclusive();
            keys.retain(|k| if inclusive { *k >= floor } else { *k > floor });
        }
    }

    if let Some(amount) = options.amount {
        if amount < keys.len() {
            if options.lower.is_some() && options.upper.is_none() {
                keys.truncate(amount);
            } else {
                keys = keys.split_off(keys.len() - amount);
            }
        }
    }

    Ok(keys
        .iter()
        .filter_map(|k| state.entries.get(&k.hash).cloned())
        .collect())
}

impl<E: Encoding> Log<E> {
    /// Snapshot iterator over a range of the canonical order.
    ///
    /// Fails with `NotFound` if a bound names an entry not in the log.
    pub fn iterate(&self, options: &IterateOptions) -> Result<LogIterator> {
        let entries = collect(&self.state.read(), options)?;
        Ok(LogIterator {
            inner: entries.into_iter(),
        })
    }
}
