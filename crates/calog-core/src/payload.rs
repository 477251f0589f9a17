//! Entry payloads, plain or sealed for a set of recipients.
//!
//! Sealing is delegated to a [`Keychain`]; the log never sees key material.
//! Signatures cover the sealed bytes, so an entry can be verified and
//! admitted by replicas that are unable to read it.

use crate::error::Result;
use crate::identity::PublicKey;
use serde::{Deserialize, Serialize};

/// Opaque payload bytes carried by an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Encoded application value, readable by anyone.
    Plain(Vec<u8>),

    /// Encoded application value encrypted by a keychain.
    Sealed(SealedPayload),
}

impl Payload {
    pub fn plain(data: Vec<u8>) -> Self {
        Payload::Plain(data)
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Payload::Sealed(_))
    }

    /// Number of payload bytes as carried on the wire.
    pub fn len(&self) -> usize {
        match self {
            Payload::Plain(data) => data.len(),
            Payload::Sealed(sealed) => sealed.ciphertext.len() + sealed.nonce.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ciphertext plus the metadata a keychain needs to open it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub recipients: Vec<PublicKey>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Encryption collaborator for sealed payloads.
pub trait Keychain: Send + Sync {
    /// Encrypt `plaintext` for this keychain's configured recipients.
    fn seal(&self, plaintext: &[u8]) -> Result<SealedPayload>;

    /// Decrypt a sealed payload.
    ///
    /// Fails with [`Error::Access`](crate::Error::Access) when this keychain
    /// holds no key for any recipient.
    fn open(&self, sealed: &SealedPayload) -> Result<Vec<u8>>;
}
