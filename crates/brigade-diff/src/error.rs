//! Error types for the diff crate.

use brigade_object::ObjectError;

/// Errors that can occur while comparing record streams.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// A record has no `id` field.
    #[error("record without id in {side} stream: {record}")]
    MissingId { side: &'static str, record: String },

    /// A stream yielded ids that are not strictly increasing.
    #[error("{side} stream out of order: {current:?} follows {previous:?}")]
    OutOfOrder {
        side: &'static str,
        previous: String,
        current: String,
    },

    /// Reading a record stream failed.
    #[error("record stream error: {0}")]
    Object(#[from] ObjectError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
