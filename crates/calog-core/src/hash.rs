//! Content identifiers.
//!
//! Every stored block is named by the SHA-256 digest of its bytes. Group ids
//! reuse the same type: seeded ones are the digest of the seed, unseeded
//! ones are drawn at random.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// A 32-byte content identifier.
///
/// Ordering is lexicographic over the raw bytes, which is what group ids
/// rely on when branches collapse to the smallest id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A uniformly random id, used for group ids of unseeded roots.
    pub fn random() -> Self {
        Hash(rand::random())
    }

    /// Lowercase hex form of the first four bytes, for logs.
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(8);
        for byte in &self.0[..4] {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}…)", self.short())
    }
}

impl FromStr for Hash {
    type Err = Error;

    /// Parse the 64-character hex form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Encoding(format!("not a content id: {:?}", s));
        if s.len() != 64 || !s.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        for (byte, pair) in bytes.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Hash(bytes))
    }
}

/// SHA-256 over block bytes.
pub struct Hasher;

impl Hasher {
    pub fn hash(data: &[u8]) -> Hash {
        Hash(Sha256::digest(data).into())
    }
}
