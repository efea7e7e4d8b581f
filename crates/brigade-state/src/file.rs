use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{DocumentFn, StateBackend};
use crate::error::{StateError, StateResult};

/// Retry policy for acquiring the ledger lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Attempts made after the first failed one before giving up.
    pub retries: u32,
    /// Delay before the first retry, in milliseconds. Doubles per attempt.
    pub min_delay_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            min_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

/// Exclusive advisory lock, released on drop.
struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release ledger lock");
        }
    }
}

/// Ledger persisted as a single JSON file.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the ledger, so the ledger path only ever holds a complete
/// document. A crash before the rename leaves a stray temporary file that is
/// never read. Mutations are serialized across processes with an advisory
/// lock on `<ledger>.lock` and within this process by an async mutex.
pub struct FileStateBackend {
    path: PathBuf,
    lock_path: PathBuf,
    config: LockConfig,
    local: tokio::sync::Mutex<()>,
}

impl FileStateBackend {
    /// Create a backend for the ledger at `path`.
    pub fn new(path: impl Into<PathBuf>, config: LockConfig) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            config,
            local: tokio::sync::Mutex::new(()),
        }
    }

    /// Path to the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn lock(&self) -> StateResult<LedgerLock> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;

        let mut delay = Duration::from_millis(self.config.min_delay_ms);
        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LedgerLock { file }),
                Err(e) if attempts > self.config.retries => {
                    warn!(path = %self.lock_path.display(), attempts, error = %e, "giving up on ledger lock");
                    return Err(StateError::LockContention {
                        path: self.lock_path.clone(),
                        attempts,
                    });
                }
                Err(e) => {
                    debug!(path = %self.lock_path.display(), attempts, error = %e, "ledger locked; retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
    }

    fn read(&self) -> StateResult<Option<Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document: Value =
            serde_json::from_str(&text).map_err(|e| StateError::Corruption {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if !document.is_object() {
            return Err(StateError::Corruption {
                path: self.path.clone(),
                reason: "ledger document is not an object".into(),
            });
        }
        Ok(Some(document))
    }

    fn save(&self, document: &Value) -> StateResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(parent)?;
        tmp.write_all(&serde_json::to_vec(document)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;

        debug!(path = %self.path.display(), "ledger saved");
        Ok(())
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn load(&self, fallback: Option<&Value>) -> StateResult<Value> {
        let _local = self.local.lock().await;
        let _lock = self.lock().await?;
        match (self.read()?, fallback) {
            (Some(document), _) => Ok(document),
            (None, Some(fallback)) => {
                debug!(path = %self.path.display(), "seeding new ledger");
                self.save(fallback)?;
                Ok(fallback.clone())
            }
            (None, None) => Err(StateError::Missing(self.path.clone())),
        }
    }

    async fn mutate(&self, f: DocumentFn<'_>) -> StateResult<Value> {
        let _local = self.local.lock().await;
        let _lock = self.lock().await?;
        let current = self
            .read()?
            .ok_or_else(|| StateError::Missing(self.path.clone()))?;
        let next = f(&current);
        if next != current {
            self.save(&next)?;
        }
        Ok(next)
    }
}

impl std::fmt::Debug for FileStateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateBackend")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(dir: &Path) -> FileStateBackend {
        FileStateBackend::new(dir.join("state.json"), LockConfig::default())
    }

    fn set(key: &'static str, value: i64) -> impl Fn(&Value) -> Value + Send + Sync {
        move |doc| {
            let mut doc = doc.clone();
            doc[key] = json!(value);
            doc
        }
    }

    #[tokio::test]
    async fn load_seeds_and_persists_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        let doc = store.load(Some(&json!({"out": {"pos": 0}}))).await.unwrap();
        assert_eq!(doc, json!({"out": {"pos": 0}}));

        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk, doc);
    }

    #[tokio::test]
    async fn missing_ledger_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let err = backend(dir.path()).load(None).await.unwrap_err();
        assert!(matches!(err, StateError::Missing(_)));
    }

    #[tokio::test]
    async fn mutate_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        store.load(Some(&json!({"a": 1}))).await.unwrap();
        let next = store.mutate(&set("a", 2)).await.unwrap();
        assert_eq!(next, json!({"a": 2}));

        // A second backend on the same file sees the change.
        let other = backend(dir.path());
        assert_eq!(other.load(None).await.unwrap(), json!({"a": 2}));
    }

    #[tokio::test]
    async fn unparsable_ledger_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        fs::write(store.path(), b"{\"out\": {\"pos\":").unwrap();
        let err = store.load(Some(&json!({}))).await.unwrap_err();
        assert!(matches!(err, StateError::Corruption { .. }));
    }

    #[tokio::test]
    async fn non_object_ledger_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        fs::write(store.path(), b"[1, 2, 3]").unwrap();
        let err = store.mutate(&|d| d.clone()).await.unwrap_err();
        assert!(matches!(err, StateError::Corruption { .. }));
    }

    #[tokio::test]
    async fn stray_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        store.load(Some(&json!({"a": 1}))).await.unwrap();

        // Simulate a crash after writing the temp file but before the rename.
        fs::write(dir.path().join(".state.json.crash.tmp"), b"{\"a\": 99").unwrap();

        let reopened = backend(dir.path());
        assert_eq!(reopened.load(None).await.unwrap(), json!({"a": 1}));
        let next = reopened.mutate(&set("a", 3)).await.unwrap();
        assert_eq!(next, json!({"a": 3}));
    }

    #[tokio::test]
    async fn unchanged_document_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path());
        store.load(Some(&json!({"a": 1}))).await.unwrap();
        let before = fs::metadata(store.path()).unwrap().modified().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        store.mutate(&|d| d.clone()).await.unwrap();
        let after = fs::metadata(store.path()).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn held_lock_surfaces_contention() {
        let dir = tempfile::tempdir().unwrap();
        let config = LockConfig {
            retries: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
        };
        let store = FileStateBackend::new(dir.path().join("state.json"), config);
        store.load(Some(&json!({}))).await.unwrap();

        // Another "process" holds the lock through its own file handle.
        let holder = File::create(dir.path().join("state.json.lock")).unwrap();
        holder.lock_exclusive().unwrap();

        let err = store.mutate(&|d| d.clone()).await.unwrap_err();
        assert!(matches!(err, StateError::LockContention { attempts: 3, .. }));

        FileExt::unlock(&holder).unwrap();
        store.mutate(&|d| d.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_mutations_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(backend(dir.path()));
        store.load(Some(&json!({"n": 0}))).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .mutate(&|doc| {
                        let mut doc = doc.clone();
                        let n = doc["n"].as_i64().unwrap_or(0);
                        doc["n"] = json!(n + 1);
                        doc
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.load(None).await.unwrap(), json!({"n": 16}));
    }
}
