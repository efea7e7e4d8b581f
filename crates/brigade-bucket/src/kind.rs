//! Addressing policy of the two brigade variants.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ShardOptions;
use crate::error::{BrigadeError, BrigadeResult};

/// Ledger key of the writer's section.
pub const OUTPUT_KEY: &str = "out";
/// Ledger key of the recorded sharding options.
pub const OPTIONS_KEY: &str = "opt";
/// Key of the default reader.
pub const DEFAULT_READER: &str = "in";
/// Reader field marking the end of the slots whose files have been removed.
///
/// A Queue reader commits `pos` first and deletes consumed files afterwards,
/// so the writer is bounded by `freed` rather than `pos`.
pub const FREED_FIELD: &str = "freed";

/// Which addressing mode a brigade uses.
///
/// A `Queue` is a bounded ring: offsets wrap modulo capacity, the producer
/// is throttled by the slowest reader and consumed files are deleted. A
/// `Store` is an append-only log: offsets never wrap, nothing is deleted
/// and readers may seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrigadeKind {
    Queue,
    Store,
}

impl BrigadeKind {
    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            BrigadeKind::Queue => "queue",
            BrigadeKind::Store => "store",
        }
    }

    /// The offset following `offset`.
    pub fn increment_offset(self, offset: u64, capacity: u64) -> u64 {
        match self {
            BrigadeKind::Queue => (offset + 1) % capacity,
            BrigadeKind::Store => offset + 1,
        }
    }

    /// Reduce `offset` to a slot within the address space.
    ///
    /// Queue offsets alias modulo capacity; a Store offset beyond capacity
    /// has no slot.
    pub fn normalize(self, offset: u64, capacity: u64) -> BrigadeResult<u64> {
        match self {
            BrigadeKind::Queue => Ok(offset % capacity),
            BrigadeKind::Store if offset < capacity => Ok(offset),
            BrigadeKind::Store => Err(BrigadeError::OffsetOutOfRange { offset, capacity }),
        }
    }

    /// Slots written but not yet read by a reader at `read`.
    pub fn available(self, write: u64, read: u64, capacity: u64) -> u64 {
        match self {
            BrigadeKind::Queue => ring_distance(read, write, capacity),
            BrigadeKind::Store => write.saturating_sub(read),
        }
    }

    /// Slots the writer at `write` may still fill.
    ///
    /// For a Queue this is the minimum over `readers` of the gap up to each
    /// reader, keeping one slot free to tell a full ring from an empty one.
    pub fn space(self, write: u64, readers: &[u64], capacity: u64) -> u64 {
        match self {
            BrigadeKind::Queue => readers
                .iter()
                .map(|&read| ring_distance(write, read, capacity).checked_sub(1).unwrap_or(capacity - 1))
                .min()
                .unwrap_or(capacity - 1),
            BrigadeKind::Store => capacity.saturating_sub(write),
        }
    }

    /// Whether readers may seek.
    pub fn is_seekable(self) -> bool {
        matches!(self, BrigadeKind::Store)
    }

    /// Whether a consumed slot's file is deleted once its token resolves.
    pub fn deletes_consumed(self) -> bool {
        matches!(self, BrigadeKind::Queue)
    }

    /// Whether `key` may name a reader.
    pub fn accepts_reader(self, key: &str) -> bool {
        match self {
            BrigadeKind::Queue => key == DEFAULT_READER,
            BrigadeKind::Store => !is_reserved_key(key),
        }
    }

    /// Ledger contents for a directory that has never been opened.
    pub fn default_document(self, options: &ShardOptions) -> BrigadeResult<Value> {
        let opt = serde_json::to_value(options)
            .map_err(|e| BrigadeError::InvalidConfig(e.to_string()))?;
        let mut doc = json!({
            OUTPUT_KEY: {"pos": 0, "closed": false},
            OPTIONS_KEY: opt,
        });
        if self == BrigadeKind::Queue {
            doc[DEFAULT_READER] = json!({"pos": 0, FREED_FIELD: 0});
        }
        Ok(doc)
    }
}

impl std::fmt::Display for BrigadeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger keys that never name a reader.
pub fn is_reserved_key(key: &str) -> bool {
    key == OUTPUT_KEY || key == OPTIONS_KEY || key == brigade_state::ONCE_KEY
}

/// Positions of every reader section recorded in `doc`.
///
/// A reader that records [`FREED_FIELD`] is reported at that boundary, so
/// slots awaiting deletion still count as occupied.
pub fn reader_positions(doc: &Value) -> Vec<u64> {
    doc.as_object()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| !is_reserved_key(key))
                .filter(|(_, slot)| slot.get("pos").is_some())
                .filter_map(|(_, slot)| {
                    slot.get(FREED_FIELD)
                        .or_else(|| slot.get("pos"))
                        .and_then(Value::as_u64)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Forward distance from `from` to `to` around a ring of `capacity` slots.
fn ring_distance(from: u64, to: u64, capacity: u64) -> u64 {
    let (from, to, capacity) = (from as u128, to as u128, capacity as u128);
    ((to + capacity - from % capacity) % capacity) as u64
}
