//! Error types shared by the entry, storage and log layers.

use crate::hash::Hash;
use thiserror::Error;

/// Errors that can occur while creating, fetching or merging entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Access denied: {0}")]
    Access(String),

    #[error("Entry not found: {}", .0.short())]
    NotFound(Hash),

    #[error("Timed out resolving ancestor {} during join", .0.short())]
    JoinTimeout(Hash),

    #[error("Invalid entry {}: {}", .0.short(), .1)]
    InvalidEntry(Hash, String),

    #[error("Clock error: {0}")]
    Clock(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Log invariant violated: {0}")]
    Concurrency(String),

    #[error("Log is closed")]
    Closed,
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
