//! # calog-core
//!
//! Entry data model for the calog content-addressed event log.
//!
//! This crate provides:
//! - SHA-256 content identifiers
//! - Logical clocks with a deterministic total order
//! - Signed, immutable entries linked to their parents by hash
//! - Payload codecs and sealed payloads
//! - The content-addressed block store the log persists entries into
//!
//! ## Architecture
//!
//! An entry's identity is the hash of its canonical bytes. Parents are
//! referenced by hash only, so the log never owns a pointer graph; entries
//! are resolved through a [`BlockStore`] when needed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use calog_core::{CreateOptions, Ed25519Identity, Entry, MemoryBlockStore, Payload};
//! use std::sync::Arc;
//!
//! let store = MemoryBlockStore::new();
//! let identity = Ed25519Identity::generate();
//!
//! let root = Entry::create(&store, &identity, Payload::plain(b"a".to_vec()), CreateOptions::new(), 1).await?;
//! let child = Entry::create(
//!     &store,
//!     &identity,
//!     Payload::plain(b"b".to_vec()),
//!     CreateOptions::new().with_next(vec![Arc::clone(&root)]),
//!     2,
//! )
//! .await?;
//!
//! assert_eq!(child.next(), &[*root.hash()]);
//! assert!(child.clock().logical() > root.clock().logical());
//! ```

mod clock;
mod encoding;
mod entry;
mod error;
mod hash;
mod identity;
mod payload;
mod storage;

pub use clock::{Clock, ManualWallClock, SystemWallClock, Timestamp, WallClock};
pub use encoding::{BytesEncoding, Encoding, JsonEncoding, StringEncoding};
pub use entry::{CreateOptions, Entry, EntryType, Meta, SignatureEnvelope};
pub use error::{Error, Result};
pub use hash::{Hash, Hasher};
pub use identity::{verify, Ed25519Identity, Identity, PublicKey};
pub use payload::{Keychain, Payload, SealedPayload};
pub use storage::{BlockStore, MemoryBlockStore};
