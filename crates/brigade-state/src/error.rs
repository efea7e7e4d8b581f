use std::path::PathBuf;

/// Errors from state ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A completion token was invoked more than once.
    #[error("protocol violation: completion token called more than once")]
    AlreadyCompleted,

    /// Any other misuse of the token or section protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The ledger lock could not be acquired within the retry budget.
    #[error("could not lock {path} after {attempts} attempts")]
    LockContention { path: PathBuf, attempts: u32 },

    /// The ledger file exists but does not hold a valid document.
    #[error("corrupt ledger {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// The ledger is absent and no fallback document was supplied.
    #[error("ledger not found: {0}")]
    Missing(PathBuf),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Returns `true` for errors that indicate a caller programming error.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::AlreadyCompleted | Self::ProtocolViolation(_))
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for state operations.
pub type StateResult<T> = Result<T, StateError>;
