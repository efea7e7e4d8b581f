//! Comparison of two id-sorted record streams.
//!
//! Typically used to compare two snapshots of a record store, each read
//! through its own [`ObjectReader`](brigade_object::ObjectReader):
//!
//! - [`RecordSource`] -- an ordered stream of JSON records
//! - [`ReaderSource`] -- adapts an object reader, completing each record once the merge moves past it
//! - [`diff_sources`] -- the merge itself, reporting [`Change`]s and a [`DiffSummary`]

pub mod error;
pub mod merge;
pub mod source;

pub use error::{DiffError, DiffResult};
pub use merge::{diff_sources, record_id, Change, ChangeKind, DiffSummary, ETAG_FIELD, ID_FIELD};
pub use source::{ReaderSource, RecordSource};
