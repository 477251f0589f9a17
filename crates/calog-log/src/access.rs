//! Append admission.
//!
//! The log asks an [`AccessGate`] about every entry before it is indexed,
//! both for local appends and for entries arriving through a join.

use async_trait::async_trait;
use calog_core::{Entry, PublicKey};
use std::collections::HashSet;

/// Application-supplied admission predicate.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Whether `entry` may become part of the log.
    async fn can_append(&self, entry: &Entry) -> bool;
}

/// Admits every entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn can_append(&self, _entry: &Entry) -> bool {
        true
    }
}

/// Admits entries authored by a fixed set of keys.
#[derive(Clone, Debug, Default)]
pub struct TrustedKeys {
    keys: HashSet<PublicKey>,
}

impl TrustedKeys {
    pub fn new(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn trust(&mut self, key: PublicKey) {
        self.keys.insert(key);
    }

    pub fn is_trusted(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }
}

#[async_trait]
impl AccessGate for TrustedKeys {
    async fn can_append(&self, entry: &Entry) -> bool {
        self.is_trusted(entry.author())
    }
}
