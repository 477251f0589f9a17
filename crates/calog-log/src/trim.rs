//! Bounded history.
//!
//! Trimming keeps the newest suffix of the canonical order and drops the
//! rest. Entries at the new boundary keep their `next` hashes pointing at
//! dropped entries; those hashes are remembered as tombstones so later
//! joins tolerate their absence. A tombstone lives only as long as some
//! known entry still names it, so the set stays as small as the boundary.

use crate::log::LogState;
use calog_core::{Entry, Hash};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the trim budget counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimKind {
    /// Number of entries.
    Length,
    /// Total stored bytes.
    ByteLength,
}

/// Trim budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimOptions {
    pub kind: TrimKind,
    pub to: usize,
}

impl TrimOptions {
    /// Keep at most `to` entries.
    pub fn length(to: usize) -> Self {
        Self {
            kind: TrimKind::Length,
            to,
        }
    }

    /// Keep at most `to` bytes of entries.
    pub fn byte_length(to: usize) -> Self {
        Self {
            kind: TrimKind::ByteLength,
            to,
        }
    }
}

/// Hashes outside the retained suffix, oldest first.
fn select(state: &LogState, options: &TrimOptions) -> Vec<Hash> {
    match options.kind {
        TrimKind::Length => {
            let len = state.values.len();
            if options.to >= len {
                return Vec::new();
            }
            state
                .values
                .iter()
                .take(len - options.to)
                .map(|k| k.hash)
                .collect()
        }
        TrimKind::ByteLength => {
            if state.byte_len <= options.to {
                return Vec::new();
            }
            let mut kept = 0usize;
            let mut boundary = None;
            for (i, entry) in state.ordered().rev().enumerate() {
                if kept + entry.byte_len() > options.to {
                    boundary = Some(state.values.len() - i);
                    break;
                }
                kept += entry.byte_len();
            }
            let Some(boundary) = boundary else {
                return Vec::new();
            };
            state
                .values
                .iter()
                .take(boundary)
                .map(|k| k.hash)
                .collect()
        }
    }
}

/// Remove everything outside the budget from `state`.
pub(crate) fn select_and_remove(state: &mut LogState, options: &TrimOptions) -> Vec<Arc<Entry>> {
    select(state, options)
        .iter()
        .filter_map(|hash| state.remove(hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use calog_core::{CreateOptions, Ed25519Identity, Payload};

    fn chain(n: usize) -> LogState {
        let id = Ed25519Identity::from_seed([7; 32]);
        let mut state = LogState::default();
        let mut prev: Vec<Arc<Entry>> = Vec::new();
        for i in 0..n {
            let entry = Arc::new(
                Entry::build(
                    &id,
                    Payload::plain(vec![i as u8; 10]),
                    CreateOptions::new().with_next(prev),
                    i as u64,
                )
                .unwrap(),
            );
            state.insert(Arc::clone(&entry));
            prev = vec![entry];
        }
        state
    }

    #[test]
    fn test_length_trim_keeps_newest() {
        let mut state = chain(5);
        let newest: Vec<Hash> = state.values.iter().skip(3).map(|k| k.hash).collect();

        let removed = select_and_remove(&mut state, &TrimOptions::length(2));
        assert_eq!(removed.len(), 3);
        assert_eq!(state.values.iter().map(|k| k.hash).collect::<Vec<_>>(), newest);
        assert_eq!(state.heads.hashes(), vec![newest[1]]);
        let boundary = *state.entries[&newest[0]].next().first().unwrap();
        assert_eq!(state.tombstones.iter().collect::<Vec<_>>(), vec![&boundary]);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_trim_beyond_length_is_noop() {
        let mut state = chain(3);
        assert!(select_and_remove(&mut state, &TrimOptions::length(3)).is_empty());
        assert!(select_and_remove(&mut state, &TrimOptions::length(10)).is_empty());
        assert_eq!(state.values.len(), 3);
    }

    #[test]
    fn test_byte_length_trim() {
        let mut state = chain(4);
        let total = state.byte_len;
        assert!(select_and_remove(&mut state, &TrimOptions::byte_length(total)).is_empty());

        let newest_two: usize = state.ordered().rev().take(2).map(|e| e.byte_len()).sum();
        let removed = select_and_remove(&mut state, &TrimOptions::byte_length(newest_two + 1));
        assert_eq!(removed.len(), 2);
        assert_eq!(state.values.len(), 2);
        assert_eq!(state.byte_len, newest_two);
    }

    #[test]
    fn test_trim_to_zero_empties() {
        let mut state = chain(3);
        let removed = select_and_remove(&mut state, &TrimOptions::length(0));
        assert_eq!(removed.len(), 3);
        assert!(state.entries.is_empty());
        assert!(state.heads.is_empty());
        assert!(state.tombstones.is_empty());
    }

    #[test]
    fn test_trim_kind_serde_names() {
        let json = serde_json::to_string(&TrimOptions::byte_length(5)).unwrap();
        assert_eq!(json, r#"{"kind":"bytelength","to":5}"#);
    }
}
