//! # calog-log
//!
//! Append-only, content-addressed event log with leaderless writers.
//!
//! This crate provides:
//! - [`Log`]: the DAG of entries, its frontier and canonical total order
//! - Join: deterministic, idempotent merging of foreign entries
//! - Trim: bounded local history by length or bytes
//! - Cut entries: history boundaries joiners do not fetch past
//! - Range iteration over the canonical order
//!
//! ## Convergence
//!
//! The canonical order is a pure function of the set of entries a log
//! holds (clock order, then hash). Two replicas that have observed the same
//! entries materialize the same sequence, whatever order the appends and
//! joins happened in. Which entries cut entries hide is decided the same
//! way, as long as each replica still retains the hidden entries (see
//! `LogOptions::cut_retention`).
//!
//! ## Example
//!
//! ```rust,ignore
//! use calog_core::{Ed25519Identity, MemoryBlockStore, StringEncoding};
//! use calog_log::{AppendOptions, LogBuilder};
//! use std::sync::Arc;
//!
//! let alice = LogBuilder::new(
//!     Arc::new(MemoryBlockStore::new()),
//!     Arc::new(Ed25519Identity::generate()),
//!     StringEncoding,
//! )
//! .open()
//! .await?;
//! let bob = LogBuilder::new(
//!     Arc::new(MemoryBlockStore::new()),
//!     Arc::new(Ed25519Identity::generate()),
//!     StringEncoding,
//! )
//! .open()
//! .await?;
//!
//! alice.append(&"hello".to_string(), AppendOptions::new()).await?;
//! bob.append(&"world".to_string(), AppendOptions::new()).await?;
//!
//! alice.join(bob.heads()).await?;
//! bob.join(alice.heads()).await?;
//! assert_eq!(alice.values(), bob.values());
//! ```

mod access;
mod events;
mod heads;
mod iterator;
mod join;
mod log;
mod options;
mod trim;

pub use access::{AccessGate, AllowAll, TrustedKeys};
pub use events::Change;
pub use heads::{HeadsCache, HeadsIndex};
pub use iterator::{Bound, IterateOptions, LogIterator};
pub use join::{JoinItem, JoinReport};
pub use log::{AppendOptions, AppendResult, Log, LogBuilder};
pub use options::{LogOptions, LogOptionsBuilder};
pub use trim::{TrimKind, TrimOptions};

pub use calog_core::{Error, Result};
