//! Log configuration.

use crate::trim::TrimOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Log`](crate::Log).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Overall bound on ancestor resolution during a join (in milliseconds).
    pub join_timeout_ms: u64,
    /// Check entry signatures before admitting joined entries.
    pub verify_signatures: bool,
    /// Trim automatically after every append and join.
    pub trim: Option<TrimOptions>,
    /// Where to persist head hashes between restarts.
    pub heads_cache_path: Option<PathBuf>,
    /// Capacity of the change notification channel.
    pub event_capacity: usize,
    /// How many entries shadowed by cut entries keep their blocks, so an
    /// append sibling that arrives later can bring them back.
    pub cut_retention: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            join_timeout_ms: 10_000,
            verify_signatures: true,
            trim: None,
            heads_cache_path: None,
            event_capacity: 256,
            cut_retention: 1024,
        }
    }
}

impl LogOptions {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Builder for log configuration.
pub struct LogOptionsBuilder {
    options: LogOptions,
}

impl LogOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: LogOptions::default(),
        }
    }

    pub fn join_timeout(mut self, ms: u64) -> Self {
        self.options.join_timeout_ms = ms;
        self
    }

    pub fn verify_signatures(mut self, enabled: bool) -> Self {
        self.options.verify_signatures = enabled;
        self
    }

    pub fn trim(mut self, trim: TrimOptions) -> Self {
        self.options.trim = Some(trim);
        self
    }

    pub fn heads_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.heads_cache_path = Some(path.into());
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    pub fn cut_retention(mut self, entries: usize) -> Self {
        self.options.cut_retention = entries;
        self
    }

    pub fn build(self) -> LogOptions {
        self.options
    }
}

impl Default for LogOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
