use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use brigade_state::{cleanup, set_pos, Cleanup, Mutator, StateSection, StateStore};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

use crate::brigade::{BrigadeCore, Slot};
use crate::error::{BrigadeError, BrigadeResult};
use crate::kind::{BrigadeKind, FREED_FIELD};

struct ReaderInner {
    core: Arc<BrigadeCore>,
    key: String,
    section: StateSection,
    next: AtomicU64,
    cursor: tokio::sync::Mutex<()>,
    recovered: OnceCell<()>,
}

/// A named cursor over a brigade's slots.
///
/// The committed position lives in the ledger section named after the
/// reader; the in-memory cursor runs ahead of it by the number of slots
/// handed out but not yet completed. Cloning yields another handle on the
/// same cursor.
#[derive(Clone)]
pub struct BucketReader {
    inner: Arc<ReaderInner>,
}

impl BucketReader {
    pub(crate) fn new(core: Arc<BrigadeCore>, key: &str) -> Self {
        let section = core.state.section(key);
        let next = section.position();
        debug!(reader = key, next, "attached reader");
        Self {
            inner: Arc::new(ReaderInner {
                core,
                key: key.to_string(),
                section,
                next: AtomicU64::new(next),
                cursor: tokio::sync::Mutex::new(()),
                recovered: OnceCell::new(),
            }),
        }
    }

    /// Ledger key of this reader.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Addressing mode of the brigade this reader belongs to.
    pub fn kind(&self) -> BrigadeKind {
        self.inner.core.kind
    }

    /// Path of the file for `offset`.
    pub fn slot_path(&self, offset: u64) -> BrigadeResult<PathBuf> {
        self.inner.core.slot_path(offset)
    }

    /// Reload the ledger and return the writer's committed position.
    pub async fn write_end(&self) -> BrigadeResult<u64> {
        let doc = self.inner.core.state.refresh().await?;
        Ok(BrigadeCore::output_state(&doc).0)
    }

    /// Committed position.
    pub fn position(&self) -> u64 {
        self.inner.section.position()
    }

    /// Offset the next [`next_input`](Self::next_input) will return.
    pub fn next_offset(&self) -> u64 {
        self.inner.next.load(Ordering::Acquire)
    }

    /// Slots committed by the writer and not yet handed out by this reader.
    pub fn available(&self) -> u64 {
        let doc = self.inner.core.state.current();
        self.available_in(&doc)
    }

    fn available_in(&self, doc: &serde_json::Value) -> u64 {
        let core = &self.inner.core;
        let (write, _) = BrigadeCore::output_state(doc);
        core.kind.available(write, self.next_offset(), core.capacity())
    }

    /// Wait until a slot is available.
    ///
    /// Returns `false` at end of stream: for a Queue once it is closed and
    /// drained, for a Store once the reader has caught up with the writer.
    pub async fn wait_for_input(&self) -> BrigadeResult<bool> {
        let core = &self.inner.core;
        loop {
            let doc = core.state.current();
            if self.available_in(&doc) > 0 {
                return Ok(true);
            }
            match core.kind {
                BrigadeKind::Store => {
                    let fresh = core.state.refresh().await?;
                    return Ok(self.available_in(&fresh) > 0);
                }
                BrigadeKind::Queue => {
                    if core.is_closed(&doc) {
                        return Ok(false);
                    }
                    trace!(reader = %self.inner.key, "waiting for input");
                    core.state.wait_for_change_from(&doc).await?;
                }
            }
        }
    }

    /// Take the next slot, or `None` at end of stream.
    pub async fn next_input(&self) -> BrigadeResult<Option<Slot>> {
        self.next_input_with(None).await
    }

    /// Take the next slot, merging `extra` into its commit.
    pub async fn next_input_with(&self, extra: Option<Mutator>) -> BrigadeResult<Option<Slot>> {
        let _cursor = self.inner.cursor.lock().await;
        let core = &self.inner.core;
        if core.kind.deletes_consumed() {
            self.inner.recovered.get_or_try_init(|| self.remove_leftovers()).await?;
        }
        if !self.wait_for_input().await? {
            return Ok(None);
        }

        let offset = self.next_offset();
        let path = core.slot_path(offset)?;
        let next = core.kind.increment_offset(offset, core.capacity());
        self.inner.next.store(next, Ordering::Release);

        let mut mutators = vec![set_pos(next)];
        mutators.extend(extra);
        let hook = core.kind.deletes_consumed().then(|| {
            release(Arc::clone(&core.state), self.inner.key.clone(), path.clone(), next)
        });
        let token = self.inner.section.make_token(mutators, hook);
        debug!(reader = %self.inner.key, offset, path = %path.display(), "reserved input slot");
        Ok(Some(Slot {
            path,
            offset,
            token,
        }))
    }

    /// Delete files left behind by a process that committed its position
    /// but stopped before removing what it had consumed.
    ///
    /// The writer never passes the freed boundary, so every slot between it
    /// and the committed position still holds a consumed file.
    async fn remove_leftovers(&self) -> BrigadeResult<()> {
        let core = &self.inner.core;
        let key = self.inner.key.as_str();
        let doc = core.state.refresh().await?;
        let section = doc.get(key);
        let pos = section
            .and_then(|s| s.get("pos"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let recorded = section
            .and_then(|s| s.get(FREED_FIELD))
            .and_then(Value::as_u64);
        if recorded == Some(pos) {
            return Ok(());
        }
        let freed = recorded.unwrap_or(pos);

        let mut offset = freed;
        let mut removed = 0;
        while offset != pos && removed < core.capacity() {
            remove_consumed(&core.slot_path(offset)?).await?;
            offset = core.kind.increment_offset(offset, core.capacity());
            removed += 1;
        }
        mark_freed(&core.state, key, pos).await?;
        if removed > 0 {
            info!(reader = key, removed, "removed consumed files left by an earlier run");
        }
        Ok(())
    }

    /// Move the cursor to `offset` and commit it as the reader's position.
    ///
    /// Only Store readers can seek, and only within the written range.
    pub async fn seek(&self, offset: u64) -> BrigadeResult<()> {
        let core = &self.inner.core;
        if !core.kind.is_seekable() {
            return Err(BrigadeError::NotSeekable(self.inner.key.clone()));
        }

        let _cursor = self.inner.cursor.lock().await;
        let doc = core.state.refresh().await?;
        let (end, _) = BrigadeCore::output_state(&doc);
        if offset > end {
            return Err(BrigadeError::SeekOutOfRange { offset, end });
        }

        self.inner.next.store(offset, Ordering::Release);
        self.inner
            .section
            .make_token(vec![set_pos(offset)], None)
            .complete()
            .await?;
        debug!(reader = %self.inner.key, offset, "seeked");
        Ok(())
    }
}

impl std::fmt::Debug for BucketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketReader")
            .field("key", &self.inner.key)
            .field("next", &self.next_offset())
            .field("position", &self.position())
            .finish()
    }
}

/// Delete a consumed file, then move the reader's freed boundary past it.
fn release(state: Arc<StateStore>, key: String, path: PathBuf, next: u64) -> Cleanup {
    cleanup(move || async move {
        remove_consumed(&path).await?;
        mark_freed(&state, &key, next).await
    })
}

/// Delete a consumed file, tolerating its prior removal.
async fn remove_consumed(path: &Path) -> brigade_state::StateResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            trace!(path = %path.display(), "removed consumed file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "consumed file already removed");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn mark_freed(state: &StateStore, key: &str, freed: u64) -> brigade_state::StateResult<()> {
    state
        .mutate(&|doc: &Value| {
            let mut next = doc.clone();
            next[key][FREED_FIELD] = Value::from(freed);
            next
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{BrigadeConfig, BrigadeError, BrigadeKind, BucketBrigade};

    async fn store(dir: &std::path::Path) -> BucketBrigade {
        BucketBrigade::open(BrigadeKind::Store, BrigadeConfig::new(dir).with_shape(10, 2))
            .await
            .unwrap()
    }

    async fn write(bb: &BucketBrigade, n: usize) {
        for i in 0..n {
            let slot = bb.next_output().await.unwrap();
            tokio::fs::write(&slot.path, i.to_string()).await.unwrap();
            slot.token.complete().await.unwrap();
        }
    }

    #[tokio::test]
    async fn store_reader_ends_at_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let bb = store(tmp.path()).await;
        write(&bb, 3).await;

        let reader = bb.reader("r").unwrap();
        assert_eq!(reader.available(), 3);
        let mut seen = Vec::new();
        while let Some(slot) = reader.next_input().await.unwrap() {
            seen.push(tokio::fs::read_to_string(&slot.path).await.unwrap());
            slot.token.complete().await.unwrap();
        }
        assert_eq!(seen, vec!["0", "1", "2"]);
        assert_eq!(reader.position(), 3);
        // Store readers never delete.
        assert!(bb.make_name(0).unwrap().exists());
    }

    #[tokio::test]
    async fn independent_store_readers() {
        let tmp = tempfile::tempdir().unwrap();
        let bb = store(tmp.path()).await;
        write(&bb, 2).await;

        let a = bb.reader("a").unwrap();
        let b = bb.reader("b").unwrap();
        a.next_input().await.unwrap().unwrap().token.complete().await.unwrap();
        assert_eq!((a.position(), b.position()), (1, 0));
        assert_eq!(b.available(), 2);
    }

    #[tokio::test]
    async fn seek_commits_position() {
        let tmp = tempfile::tempdir().unwrap();
        let bb = store(tmp.path()).await;
        write(&bb, 5).await;

        let reader = bb.reader("in").unwrap();
        reader.seek(3).await.unwrap();
        assert_eq!(reader.position(), 3);
        let slot = reader.next_input().await.unwrap().unwrap();
        assert_eq!(slot.offset, 3);
        slot.token.complete().await.unwrap();

        reader.seek(0).await.unwrap();
        assert_eq!(reader.next_offset(), 0);
        reader.seek(5).await.unwrap();
        assert!(reader.next_input().await.unwrap().is_none());

        let err = reader.seek(6).await.unwrap_err();
        assert!(matches!(err, BrigadeError::SeekOutOfRange { offset: 6, end: 5 }));
    }

    #[tokio::test]
    async fn queue_reader_cannot_seek() {
        let tmp = tempfile::tempdir().unwrap();
        let bb = BucketBrigade::open(BrigadeKind::Queue, BrigadeConfig::new(tmp.path()))
            .await
            .unwrap();
        let err = bb.reader("in").unwrap().seek(0).await.unwrap_err();
        assert!(matches!(err, BrigadeError::NotSeekable(_)));
    }

    #[tokio::test]
    async fn reader_resumes_from_committed_position() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let bb = store(tmp.path()).await;
            write(&bb, 4).await;
            let reader = bb.reader("in").unwrap();
            let first = reader.next_input().await.unwrap().unwrap();
            let second = reader.next_input().await.unwrap().unwrap();
            first.token.complete().await.unwrap();
            // The second slot is abandoned and must be redelivered.
            drop(second);
        }

        let bb = store(tmp.path()).await;
        let reader = bb.reader("in").unwrap();
        assert_eq!(reader.next_offset(), 1);
        let slot = reader.next_input().await.unwrap().unwrap();
        assert_eq!(slot.offset, 1);
        slot.token.complete().await.unwrap();
    }
}
