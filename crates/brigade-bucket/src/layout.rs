//! Offset to path sharding.
//!
//! An offset is split into `path_depth` base-`shard_width` digits, most
//! significant first. Each digit becomes one zero-padded path segment and
//! the last segment carries the configured extension, so with the defaults
//! offset `1234567` lives at `001/234/567`. No directory ever holds more
//! than `shard_width` entries.

use std::path::{Path, PathBuf};

use crate::config::ShardOptions;
use crate::error::{BrigadeError, BrigadeResult};

/// Maps offsets to file paths under a data root.
#[derive(Clone, Debug)]
pub struct ShardLayout {
    root: PathBuf,
    options: ShardOptions,
    capacity: u64,
    digits: usize,
}

impl ShardLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, options: ShardOptions) -> BrigadeResult<Self> {
        let capacity = options.capacity()?;
        let digits = (options.shard_width - 1).to_string().len();
        Ok(Self {
            root: root.into(),
            options,
            capacity,
            digits,
        })
    }

    /// Root of the data tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sharding options in effect.
    pub fn options(&self) -> &ShardOptions {
        &self.options
    }

    /// Number of addressable slots.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Width of each zero-padded segment.
    pub fn digits(&self) -> usize {
        self.digits
    }

    /// Path of `offset` relative to the data root.
    pub fn relative_name(&self, offset: u64) -> BrigadeResult<PathBuf> {
        let width = self.options.shard_width;
        let mut parts = Vec::with_capacity(self.options.path_depth as usize);
        let mut seq = offset;
        for _ in 0..self.options.path_depth {
            parts.push(seq % width);
            seq /= width;
        }
        if seq != 0 {
            return Err(BrigadeError::OffsetOutOfRange {
                offset,
                capacity: self.capacity,
            });
        }

        let mut name = PathBuf::new();
        let last = parts.len() - 1;
        for (i, part) in parts.iter().rev().enumerate() {
            let mut segment = format!("{:0width$}", part, width = self.digits);
            if i == last {
                segment.push_str(&self.options.extension);
            }
            name.push(segment);
        }
        Ok(name)
    }

    /// Absolute path of `offset` under the data root.
    pub fn make_name(&self, offset: u64) -> BrigadeResult<PathBuf> {
        Ok(self.root.join(self.relative_name(offset)?))
    }

    /// Recover the offset encoded in the trailing segments of `path`.
    ///
    /// Returns `None` if the path was not produced by this layout.
    pub fn parse_name(&self, path: &Path) -> Option<u64> {
        let depth = self.options.path_depth as usize;
        let segments: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.len() < depth {
            return None;
        }

        let tail = &segments[segments.len() - depth..];
        let mut offset: u64 = 0;
        for (i, segment) in tail.iter().enumerate() {
            let digits = if i == depth - 1 {
                segment.strip_suffix(self.options.extension.as_str())?
            } else {
                segment.as_str()
            };
            if digits.len() != self.digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digit: u64 = digits.parse().ok()?;
            if digit >= self.options.shard_width {
                return None;
            }
            offset = offset * self.options.shard_width + digit;
        }
        Some(offset)
    }
}
