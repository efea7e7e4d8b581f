use std::path::{Path, PathBuf};

use brigade_state::{LockConfig, PollConfig};
use serde::{Deserialize, Serialize};

use crate::error::{BrigadeError, BrigadeResult};

/// Default name of the ledger file inside a brigade directory.
pub const DEFAULT_STATE_FILE: &str = "bb-state.json";

/// Sharding options recorded in the ledger under `opt`.
///
/// Every process attaching to the same directory must agree on these, since
/// they determine where each offset's file lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShardOptions {
    /// Entries per directory level.
    pub shard_width: u64,
    /// Number of path segments per slot.
    pub path_depth: u32,
    /// Suffix appended to the final segment.
    pub extension: String,
}

impl ShardOptions {
    /// Total number of addressable slots, `shard_width ^ path_depth`.
    pub fn capacity(&self) -> BrigadeResult<u64> {
        if self.shard_width < 2 {
            return Err(BrigadeError::InvalidConfig(format!(
                "shard width must be at least 2, got {}",
                self.shard_width
            )));
        }
        if self.path_depth == 0 {
            return Err(BrigadeError::InvalidConfig("path depth must be at least 1".into()));
        }
        self.shard_width.checked_pow(self.path_depth).ok_or_else(|| {
            BrigadeError::InvalidConfig(format!(
                "{}^{} overflows the offset space",
                self.shard_width, self.path_depth
            ))
        })
    }
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            shard_width: 1000,
            path_depth: 3,
            extension: String::new(),
        }
    }
}

/// Configuration for one brigade instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrigadeConfig {
    /// Directory holding the ledger.
    pub dir: PathBuf,
    /// Root of the sharded data tree; defaults to `dir`.
    pub data_dir: Option<PathBuf>,
    /// Ledger file name inside `dir`.
    pub state_file: String,
    /// Sharding options.
    pub shard: ShardOptions,
    /// Reject a ledger whose `opt` differs from `shard` instead of adopting it.
    pub strict_state: bool,
    /// Change-notification backoff.
    pub poll: PollConfig,
    /// Ledger lock retry policy.
    pub lock: LockConfig,
}

impl BrigadeConfig {
    /// Default configuration rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Root of the sharded data tree.
    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or(&self.dir)
    }

    /// Full path of the ledger file.
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(&self.state_file)
    }

    /// Set the file extension of data files.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.shard.extension = extension.into();
        self
    }

    /// Set shard width and path depth.
    pub fn with_shape(mut self, shard_width: u64, path_depth: u32) -> Self {
        self.shard.shard_width = shard_width;
        self.shard.path_depth = path_depth;
        self
    }

    /// Place data files under `data_dir` instead of the ledger directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Choose strict or permissive `opt` validation.
    pub fn with_strict_state(mut self, strict: bool) -> Self {
        self.strict_state = strict;
        self
    }

    /// Set the change-notification backoff.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

impl Default for BrigadeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            data_dir: None,
            state_file: DEFAULT_STATE_FILE.into(),
            shard: ShardOptions::default(),
            strict_state: true,
            poll: PollConfig::default(),
            lock: LockConfig::default(),
        }
    }
}
