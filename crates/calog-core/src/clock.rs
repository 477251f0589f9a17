//! Logical clocks for causal ordering of entries.
//!
//! A [`Clock`] pairs the author's public key with a [`Timestamp`]. The
//! logical counter of a new entry is always one more than the largest
//! counter among its parents, so causal order is preserved by the
//! comparator below. Concurrent entries fall back to wall time and finally
//! to the author id, giving every replica the same total order.

use crate::identity::PublicKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall time in milliseconds plus a logical counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub wall_time: u64,
    pub logical: u64,
}

/// Logical timestamp attributed to an author.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    pub id: PublicKey,
    pub timestamp: Timestamp,
}

impl Clock {
    pub fn new(id: PublicKey, timestamp: Timestamp) -> Self {
        Clock { id, timestamp }
    }

    /// Advance past every parent clock.
    ///
    /// With no parents the logical counter starts at zero. Returns `None`
    /// when a parent's counter is already at `u64::MAX`.
    pub fn tick<'a, I>(id: PublicKey, wall_time: u64, parents: I) -> Option<Clock>
    where
        I: IntoIterator<Item = &'a Clock>,
    {
        let mut logical = 0;
        for parent in parents {
            logical = logical.max(parent.timestamp.logical.checked_add(1)?);
        }
        Some(Clock {
            id,
            timestamp: Timestamp { wall_time, logical },
        })
    }

    pub fn logical(&self) -> u64 {
        self.timestamp.logical
    }

    pub fn wall_time(&self) -> u64 {
        self.timestamp.wall_time
    }

    /// Total order: logical counter, then wall time, then author id bytes.
    pub fn compare(a: &Clock, b: &Clock) -> Ordering {
        a.timestamp
            .logical
            .cmp(&b.timestamp.logical)
            .then(a.timestamp.wall_time.cmp(&b.timestamp.wall_time))
            .then(a.id.cmp(&b.id))
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        Clock::compare(self, other)
    }
}

/// Source of wall time for new clocks.
pub trait WallClock: Send + Sync {
    /// Milliseconds since the Unix epoch (or any monotone origin).
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic wall clock that advances by a fixed step on every read.
#[derive(Debug)]
pub struct ManualWallClock {
    now: AtomicU64,
    step: u64,
}

impl ManualWallClock {
    pub fn new(start: u64, step: u64) -> Self {
        ManualWallClock {
            now: AtomicU64::new(start),
            step,
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: u64) {
        self.now.store(now, AtomicOrdering::SeqCst);
    }
}

impl Default for ManualWallClock {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl WallClock for ManualWallClock {
    fn now_ms(&self) -> u64 {
        self.now.fetch_add(self.step, AtomicOrdering::SeqCst)
    }
}
