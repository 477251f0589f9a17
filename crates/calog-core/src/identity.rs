//! Authorship: public keys, signing identities and signature verification.
//!
//! The log only depends on the [`Identity`] contract. [`Ed25519Identity`]
//! is the stock implementation.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw public key bytes identifying an author.
///
/// Also used as the clock id, so its ordering (lexicographic over the
/// bytes) is the last tiebreak of the canonical entry order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Truncated hex display (first 8 chars).
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", self.short())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A signing identity used for local appends.
pub trait Identity: Send + Sync {
    /// The public key entries created by this identity are attributed to.
    fn public_key(&self) -> PublicKey;

    /// Sign `data`, returning the detached signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Check a detached signature over `data` against `public_key`.
///
/// Returns `false` for malformed keys or signatures.
pub fn verify(signature: &[u8], public_key: &PublicKey, data: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(data, &signature).is_ok()
}

/// Ed25519 keypair identity.
#[derive(Clone)]
pub struct Ed25519Identity {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Ed25519Identity {
    /// Derive an identity from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Ed25519Identity {
            signing_key,
            public_key,
        }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }
}

impl fmt::Debug for Ed25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl Identity for Ed25519Identity {
    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .signing_key
            .try_sign(data)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}
