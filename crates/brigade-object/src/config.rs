use std::path::PathBuf;

use brigade_bucket::BrigadeConfig;
use serde::{Deserialize, Serialize};

/// Records per chunk file unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Extension given to chunk files unless configured otherwise.
pub const CHUNK_EXTENSION: &str = ".jsonl";

/// Configuration for an [`ObjectBrigade`](crate::ObjectBrigade).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// The underlying brigade.
    pub brigade: BrigadeConfig,
    /// Maximum records per chunk file.
    pub chunk_size: u64,
}

impl ObjectConfig {
    /// Default configuration rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            brigade: BrigadeConfig::new(dir).with_extension(CHUNK_EXTENSION),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the number of records per chunk.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Adjust the underlying brigade configuration.
    pub fn with_brigade(mut self, f: impl FnOnce(BrigadeConfig) -> BrigadeConfig) -> Self {
        self.brigade = f(self.brigade);
        self
    }
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            brigade: BrigadeConfig::default().with_extension(CHUNK_EXTENSION),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
