use std::io;
use std::path::PathBuf;

use brigade_bucket::BrigadeError;
use brigade_state::StateError;

/// Errors from the chunked record layer.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// A line of a chunk file is not valid JSON.
    #[error("corrupt chunk {path}: line {line}: {reason}")]
    CorruptChunk {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure in the underlying brigade.
    #[error(transparent)]
    Brigade(#[from] BrigadeError),

    /// I/O error on a chunk file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<StateError> for ObjectError {
    fn from(e: StateError) -> Self {
        ObjectError::Brigade(BrigadeError::State(e))
    }
}

impl From<serde_json::Error> for ObjectError {
    fn from(e: serde_json::Error) -> Self {
        ObjectError::Serialization(e.to_string())
    }
}

/// Result alias for record operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
