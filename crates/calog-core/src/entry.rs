//! Log entries.
//!
//! Each entry contains:
//! - A payload (plain or sealed application bytes)
//! - Metadata: clock, group id and entry type
//! - The hashes of its parents (`next`)
//! - The author's signature over payload, metadata and parents
//!
//! The entry's hash is the SHA-256 of its canonical serialization, and the
//! same bytes are what gets written to the block store, so the storage
//! content id and the entry hash always coincide.

use crate::clock::{Clock, Timestamp};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::hash::{Hash, Hasher};
use crate::identity::{self, Identity, PublicKey};
use crate::payload::{Keychain, Payload};
use crate::storage::BlockStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Whether an entry extends history or cuts it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Regular entry; joiners resolve its full ancestry.
    #[default]
    Append,

    /// History boundary; joiners neither fetch nor validate its ancestors,
    /// and ancestors only it depends on are discarded.
    Cut,
}

/// Entry metadata covered by the signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub clock: Clock,
    /// Group id of the causal branch this entry belongs to.
    pub gid: Hash,
    pub entry_type: EntryType,
}

/// Author key plus detached signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub public_key: PublicKey,
    pub signature: Vec<u8>,
}

/// The bytes that get signed.
#[derive(Serialize)]
struct SignableContent<'a> {
    payload: &'a Payload,
    meta: &'a Meta,
    next: &'a [Hash],
}

/// The bytes that get stored and hashed.
#[derive(Serialize)]
struct StoredEntryRef<'a> {
    payload: &'a Payload,
    meta: &'a Meta,
    next: &'a [Hash],
    signature: &'a SignatureEnvelope,
}

#[derive(Deserialize)]
struct StoredEntry {
    payload: Payload,
    meta: Meta,
    next: Vec<Hash>,
    signature: SignatureEnvelope,
}

/// Options for creating an entry.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Parent entries. Their clocks and group ids feed the new entry.
    pub next: Vec<Arc<Entry>>,

    /// Seed for the group id of a parentless entry.
    pub gid_seed: Option<Vec<u8>>,

    pub entry_type: EntryType,

    /// Explicit timestamp instead of ticking past the parents. Must still
    /// advance past every parent.
    pub timestamp: Option<Timestamp>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Vec<Arc<Entry>>) -> Self {
        self.next = next;
        self
    }

    pub fn with_gid_seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.gid_seed = Some(seed.into());
        self
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// An immutable, signed, hash-identified log entry.
#[derive(Clone)]
pub struct Entry {
    hash: Hash,
    payload: Payload,
    meta: Meta,
    next: Vec<Hash>,
    signature: SignatureEnvelope,
    byte_len: usize,
    plaintext: OnceLock<Vec<u8>>,
}

impl Entry {
    /// Build and sign an entry without persisting it.
    ///
    /// The clock is ticked past every parent; the group id is the smallest
    /// parent group id, or derived from the seed (random without one) for
    /// parentless entries.
    pub fn build(
        identity: &dyn Identity,
        payload: Payload,
        options: CreateOptions,
        wall_time: u64,
    ) -> Result<Entry> {
        let public_key = identity.public_key();
        let clock = match options.timestamp {
            Some(timestamp) => {
                if let Some(parent) = options
                    .next
                    .iter()
                    .find(|e| e.clock().logical() >= timestamp.logical)
                {
                    return Err(Error::Clock(format!(
                        "logical time {} does not advance past parent {}",
                        timestamp.logical,
                        parent.hash.short()
                    )));
                }
                Clock::new(public_key, timestamp)
            }
            None => Clock::tick(public_key, wall_time, options.next.iter().map(|e| e.clock()))
                .ok_or_else(|| Error::Clock("parent logical clock exhausted".into()))?,
        };

        let gid = match options.next.iter().map(|e| e.meta.gid).min() {
            Some(gid) => gid,
            None => match &options.gid_seed {
                Some(seed) => Hasher::hash(seed),
                None => Hash::random(),
            },
        };

        let mut next: Vec<Hash> = options.next.iter().map(|e| e.hash).collect();
        next.sort();
        next.dedup();

        let meta = Meta {
            clock,
            gid,
            entry_type: options.entry_type,
        };

        let signable = postcard::to_allocvec(&SignableContent {
            payload: &payload,
            meta: &meta,
            next: &next,
        })?;
        let signature = SignatureEnvelope {
            public_key,
            signature: identity.sign(&signable)?,
        };

        let bytes = postcard::to_allocvec(&StoredEntryRef {
            payload: &payload,
            meta: &meta,
            next: &next,
            signature: &signature,
        })?;

        Ok(Entry {
            hash: Hasher::hash(&bytes),
            payload,
            meta,
            next,
            signature,
            byte_len: bytes.len(),
            plaintext: OnceLock::new(),
        })
    }

    /// Build, sign and persist an entry.
    pub async fn create(
        store: &dyn BlockStore,
        identity: &dyn Identity,
        payload: Payload,
        options: CreateOptions,
        wall_time: u64,
    ) -> Result<Arc<Entry>> {
        let entry = Entry::build(identity, payload, options, wall_time)?;
        entry.persist(store).await?;
        Ok(Arc::new(entry))
    }

    /// Decode an entry from its stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Entry> {
        let stored: StoredEntry = postcard::from_bytes(bytes)?;
        Ok(Entry {
            hash: Hasher::hash(bytes),
            payload: stored.payload,
            meta: stored.meta,
            next: stored.next,
            signature: stored.signature,
            byte_len: bytes.len(),
            plaintext: OnceLock::new(),
        })
    }

    /// Fetch and decode an entry from storage.
    ///
    /// Fails with `NotFound` when the block is unavailable once `timeout`
    /// has elapsed, and with `InvalidEntry` when the stored bytes do not
    /// hash to `hash`.
    pub async fn from_hash(
        store: &dyn BlockStore,
        hash: &Hash,
        timeout: Option<Duration>,
    ) -> Result<Entry> {
        let bytes = store
            .get(hash, timeout)
            .await?
            .ok_or(Error::NotFound(*hash))?;
        let entry = Entry::from_bytes(&bytes)
            .map_err(|e| Error::InvalidEntry(*hash, e.to_string()))?;
        if entry.hash != *hash {
            return Err(Error::InvalidEntry(
                *hash,
                format!("content hashes to {}", entry.hash.short()),
            ));
        }
        Ok(entry)
    }

    /// Canonical serialization, as stored.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(&StoredEntryRef {
            payload: &self.payload,
            meta: &self.meta,
            next: &self.next,
            signature: &self.signature,
        })?)
    }

    /// Write the canonical bytes to `store`.
    pub async fn persist(&self, store: &dyn BlockStore) -> Result<()> {
        let cid = store.put(self.to_bytes()?).await?;
        if cid != self.hash {
            return Err(Error::Storage(format!(
                "store returned {} for entry {}",
                cid.short(),
                self.hash.short()
            )));
        }
        Ok(())
    }

    /// Check that the hash matches the entry's contents.
    pub fn verify_hash(&self) -> bool {
        self.to_bytes()
            .map(|bytes| Hasher::hash(&bytes) == self.hash)
            .unwrap_or(false)
    }

    /// Check the author signature, and that the signer is the clock id.
    pub fn verify_signature(&self) -> bool {
        if self.signature.public_key != self.meta.clock.id {
            return false;
        }
        let Ok(signable) = postcard::to_allocvec(&SignableContent {
            payload: &self.payload,
            meta: &self.meta,
            next: &self.next,
        }) else {
            return false;
        };
        identity::verify(
            &self.signature.signature,
            &self.signature.public_key,
            &signable,
        )
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn clock(&self) -> &Clock {
        &self.meta.clock
    }

    pub fn gid(&self) -> &Hash {
        &self.meta.gid
    }

    pub fn entry_type(&self) -> EntryType {
        self.meta.entry_type
    }

    pub fn is_cut(&self) -> bool {
        self.meta.entry_type == EntryType::Cut
    }

    /// Parent hashes, sorted.
    pub fn next(&self) -> &[Hash] {
        &self.next
    }

    pub fn author(&self) -> &PublicKey {
        &self.signature.public_key
    }

    pub fn signature(&self) -> &SignatureEnvelope {
        &self.signature
    }

    /// Size of the stored blob.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Plain payload bytes, decrypting sealed payloads on first access.
    ///
    /// Fails with `Access` when the payload is sealed and no keychain (or
    /// a keychain without a matching key) is supplied. Callers must treat
    /// that as "unreadable here", not as corruption.
    pub fn payload_bytes(&self, keychain: Option<&dyn Keychain>) -> Result<&[u8]> {
        match &self.payload {
            Payload::Plain(data) => Ok(data.as_slice()),
            Payload::Sealed(sealed) => {
                if let Some(plain) = self.plaintext.get() {
                    return Ok(plain.as_slice());
                }
                let keychain = keychain.ok_or_else(|| {
                    Error::Access(format!("no keychain to open entry {}", self.hash.short()))
                })?;
                let plain = keychain.open(sealed)?;
                Ok(self.plaintext.get_or_init(|| plain).as_slice())
            }
        }
    }

    /// Decode the payload with `encoding`.
    pub fn payload_value<E: Encoding>(
        &self,
        encoding: &E,
        keychain: Option<&dyn Keychain>,
    ) -> Result<E::Value> {
        encoding.decode(self.payload_bytes(keychain)?)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Entry {}

impl std::hash::Hash for Entry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("hash", &self.hash)
            .field("type", &self.meta.entry_type)
            .field("clock", &self.meta.clock.timestamp)
            .field("next", &self.next)
            .finish()
    }
}
