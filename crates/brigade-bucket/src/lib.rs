//! Sharded file queues and append-only stores.
//!
//! A bucket brigade maps integer offsets to files in a digit-sharded
//! directory tree and tracks writer and reader positions in a ledger
//! (see `brigade-state`). Two addressing modes share one implementation:
//!
//! - [`BrigadeKind::Queue`] -- a bounded ring. Offsets wrap modulo
//!   capacity, the writer blocks while the slowest reader is a full ring
//!   behind, and consumed files are deleted once their token resolves.
//! - [`BrigadeKind::Store`] -- an append-only log. Offsets never wrap,
//!   files are never deleted, readers may seek, and running out of
//!   offsets is a hard error.
//!
//! # Design Rules
//!
//! 1. A slot is handed out together with a completion token; positions move only when tokens complete.
//! 2. Deleting a consumed file happens after the reader's position commit, never before.
//!    The writer is bounded by the reader's `freed` boundary, which moves only once the file is gone.
//! 3. The ledger's `opt` record is the authority on layout once a directory exists.
//! 4. Data files are written by callers; the brigade only reserves paths.

pub mod brigade;
pub mod config;
pub mod error;
pub mod kind;
pub mod layout;
pub mod reader;

// Re-export primary types at crate root for ergonomic imports.
pub use brigade::{BucketBrigade, Slot};
pub use config::{BrigadeConfig, ShardOptions, DEFAULT_STATE_FILE};
pub use error::{BrigadeError, BrigadeResult};
pub use kind::{BrigadeKind, DEFAULT_READER, FREED_FIELD, OPTIONS_KEY, OUTPUT_KEY};
pub use layout::ShardLayout;
pub use reader::BucketReader;
