use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{DocumentFn, StateBackend};
use crate::error::{StateError, StateResult};

/// In-memory ledger backend.
///
/// Intended for tests and embedding. Sharing one instance behind an `Arc`
/// between several [`StateStore`](crate::StateStore)s models several
/// processes attached to the same ledger file.
pub struct InMemoryStateBackend {
    document: Mutex<Option<Value>>,
    saves: AtomicUsize,
    read_only: AtomicBool,
}

impl InMemoryStateBackend {
    /// Create a backend with nothing persisted.
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
            saves: AtomicUsize::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    /// Create a backend that already holds `document`.
    pub fn with_document(document: Value) -> Self {
        let backend = Self::new();
        *backend.document.lock().expect("lock poisoned") = Some(document);
        backend
    }

    /// The persisted document, if any.
    pub fn snapshot(&self) -> Option<Value> {
        self.document.lock().expect("lock poisoned").clone()
    }

    /// Number of times a document has been persisted.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent save fail until cleared.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn save(&self, slot: &mut Option<Value>, document: Value) -> StateResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StateError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "ledger is read-only",
            )));
        }
        *slot = Some(document);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for InMemoryStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn load(&self, fallback: Option<&Value>) -> StateResult<Value> {
        let mut slot = self.document.lock().expect("lock poisoned");
        if let Some(document) = slot.as_ref() {
            return Ok(document.clone());
        }
        let fallback = fallback.ok_or_else(|| StateError::Missing("<memory>".into()))?;
        self.save(&mut slot, fallback.clone())?;
        Ok(fallback.clone())
    }

    async fn mutate(&self, f: DocumentFn<'_>) -> StateResult<Value> {
        let mut slot = self.document.lock().expect("lock poisoned");
        let current = slot
            .clone()
            .ok_or_else(|| StateError::Missing("<memory>".into()))?;
        let next = f(&current);
        if next != current {
            self.save(&mut slot, next.clone())?;
        }
        Ok(next)
    }
}

impl std::fmt::Debug for InMemoryStateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateBackend")
            .field("saves", &self.save_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn load_seeds_fallback() {
        let backend = InMemoryStateBackend::new();
        let doc = backend.load(Some(&json!({"a": 1}))).await.unwrap();
        assert_eq!(doc, json!({"a": 1}));
        assert_eq!(backend.snapshot(), Some(json!({"a": 1})));
        assert_eq!(backend.save_count(), 1);
    }

    #[tokio::test]
    async fn load_without_fallback_fails() {
        let backend = InMemoryStateBackend::new();
        let err = backend.load(None).await.unwrap_err();
        assert!(matches!(err, StateError::Missing(_)));
    }

    #[tokio::test]
    async fn load_prefers_persisted_document() {
        let backend = InMemoryStateBackend::with_document(json!({"a": 2}));
        let doc = backend.load(Some(&json!({"a": 1}))).await.unwrap();
        assert_eq!(doc, json!({"a": 2}));
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn identity_mutation_does_not_save() {
        let backend = InMemoryStateBackend::with_document(json!({"a": 1}));
        backend.mutate(&|doc| doc.clone()).await.unwrap();
        assert_eq!(backend.save_count(), 0);

        let next = backend
            .mutate(&|doc| {
                let mut doc = doc.clone();
                doc["a"] = json!(2);
                doc
            })
            .await
            .unwrap();
        assert_eq!(next, json!({"a": 2}));
        assert_eq!(backend.save_count(), 1);
    }

    #[tokio::test]
    async fn read_only_rejects_changes() {
        let backend = InMemoryStateBackend::with_document(json!({"a": 1}));
        backend.set_read_only(true);
        let result = backend
            .mutate(&|_| json!({"a": 5}))
            .await;
        assert!(matches!(result, Err(StateError::Io(_))));
        assert_eq!(backend.snapshot(), Some(json!({"a": 1})));
    }
}
