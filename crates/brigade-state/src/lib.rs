//! Versioned state ledger for the bucket brigade.
//!
//! A directory's positions, flags and memoized values live in one JSON
//! document, the *ledger*. This crate owns that document:
//!
//! - [`StateBackend`] abstracts where the document lives;
//!   [`FileStateBackend`] persists it with write-to-temp + atomic rename under
//!   an advisory lock, [`InMemoryStateBackend`] keeps it in memory.
//! - [`StateStore`] publishes immutable snapshots of the document, hands out
//!   per-key [`StateSection`]s and polls for changes made by other processes.
//! - [`CompletionToken`] is the one-shot, forkable handle returned for every
//!   reserved slot; completing it advances the owning section.
//!
//! # Design Rules
//!
//! 1. The document is never mutated in place; every change produces a new value.
//! 2. A section commits only the longest fully-completed prefix of its queue.
//! 3. Cleanups run strictly after the commit that governs them is persisted.
//! 4. Lock contention, corruption and protocol violations are surfaced, never retried silently.

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod section;
pub mod store;
pub mod token;

// Re-export primary types at crate root for ergonomic imports.
pub use backend::{DocumentFn, StateBackend};
pub use error::{StateError, StateResult};
pub use file::{FileStateBackend, LockConfig};
pub use memory::InMemoryStateBackend;
pub use section::StateSection;
pub use store::{PollConfig, StateStore, ONCE_KEY};
pub use token::{
    cleanup, mutator, set_pos, Cleanup, CleanupFuture, CompletionToken, Mutator, TokenEffect,
};
