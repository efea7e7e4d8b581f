use std::io;

use brigade_state::StateError;

/// Errors from bucket brigade operations.
#[derive(Debug, thiserror::Error)]
pub enum BrigadeError {
    /// The ledger's recorded options disagree with the configuration.
    #[error("ledger options mismatch: configured {expected}, found {found}")]
    ConfigMismatch { expected: String, found: String },

    /// A store has used every offset in its address space.
    #[error("database full ({capacity})")]
    CapacityExceeded { capacity: u64 },

    /// Seek attempted on a reader that cannot seek.
    #[error("reader {0:?} is not seekable")]
    NotSeekable(String),

    /// Seek target lies beyond the committed end of the stream.
    #[error("can't seek beyond end of stream ({offset} > {end})")]
    SeekOutOfRange { offset: u64, end: u64 },

    /// Output requested after the stream was closed.
    #[error("can't append to a closed stream")]
    StreamClosed,

    /// An offset does not fit in the configured address space.
    #[error("offset {offset} outside address space of {capacity}")]
    OffsetOutOfRange { offset: u64, capacity: u64 },

    /// The configuration cannot describe a valid layout.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The reader key is reserved or not allowed for this kind of brigade.
    #[error("unknown reader {0:?}")]
    UnknownReader(String),

    /// Ledger failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// I/O error on a data file or directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for brigade operations.
pub type BrigadeResult<T> = Result<T, BrigadeError>;
