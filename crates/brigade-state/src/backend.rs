use async_trait::async_trait;
use serde_json::Value;

use crate::error::StateResult;

/// Function mapping the freshest persisted document to its successor.
pub type DocumentFn<'a> = &'a (dyn Fn(&Value) -> Value + Send + Sync);

/// Persistent home of a ledger document.
///
/// All implementations must satisfy these invariants:
/// - `mutate` runs under mutual exclusion with every other `mutate` and
///   `load` against the same document, including those of other processes.
/// - The document passed to the mutation function is the freshest one
///   persisted, never a cached copy.
/// - The successor is persisted only if it differs from its predecessor.
/// - Persistence is atomic: readers observe either the old document or the
///   new one, never a partial write.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the persisted document.
    ///
    /// If nothing has been persisted yet and `fallback` is supplied, the
    /// fallback is persisted and returned. Without a fallback a missing
    /// document is an error.
    async fn load(&self, fallback: Option<&Value>) -> StateResult<Value>;

    /// Apply `f` to the freshest document and persist the result if it changed.
    ///
    /// Returns the document as it stands after the mutation. `f` may be
    /// invoked more than once by backends that retry, so it must be
    /// idempotent.
    async fn mutate(&self, f: DocumentFn<'_>) -> StateResult<Value>;
}
