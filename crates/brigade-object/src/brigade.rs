use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use brigade_bucket::{BrigadeError, BrigadeKind, BucketBrigade, Slot, DEFAULT_READER};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::chunk;
use crate::config::ObjectConfig;
use crate::error::ObjectResult;
use crate::reader::{ObjectReader, Record};

/// Ledger tag under which the chunk size is recorded.
pub const CHUNK_SIZE_TAG: &str = "chunkSize";

/// A record stream packed into chunk files.
///
/// Writes are buffered until `chunk_size` records have accumulated and then
/// land in a single slot of the underlying [`BucketBrigade`] as
/// newline-delimited JSON. Readers see a flat record offset space,
/// `chunk * chunk_size + index`.
pub struct ObjectBrigade {
    bucket: Arc<BucketBrigade>,
    chunk_size: u64,
    output: tokio::sync::Mutex<Output>,
    readers: Mutex<HashMap<String, ObjectReader>>,
}

/// Records waiting to be written, and a slot whose chunk write failed.
#[derive(Default)]
struct Output {
    pending: Vec<Value>,
    reserved: Option<Slot>,
}

impl ObjectBrigade {
    /// Open (or create) a record stream.
    pub async fn open(kind: BrigadeKind, config: ObjectConfig) -> ObjectResult<Self> {
        if config.chunk_size == 0 {
            return Err(BrigadeError::InvalidConfig("chunk size must be at least 1".into()).into());
        }
        let bucket = BucketBrigade::open(kind, config.brigade.clone()).await?;
        let chunk_size = resolve_chunk_size(&bucket, &config).await?;
        info!(kind = %kind, dir = %config.brigade.dir.display(), chunk_size, "opened object brigade");
        Ok(Self {
            bucket: Arc::new(bucket),
            chunk_size,
            output: tokio::sync::Mutex::new(Output::default()),
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// The chunk-level brigade underneath.
    pub fn bucket(&self) -> &Arc<BucketBrigade> {
        &self.bucket
    }

    /// Records per chunk, as recorded in the ledger.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Append a record.
    pub async fn write<T: Serialize>(&self, record: &T) -> ObjectResult<()> {
        self.write_value(serde_json::to_value(record)?).await
    }

    /// Append a JSON record, flushing a chunk once the buffer is full.
    ///
    /// If an earlier flush failed, its chunk is retried first and the record
    /// is only accepted once that succeeds. An error from the flush that
    /// follows the append leaves the record buffered.
    pub async fn write_value(&self, record: Value) -> ObjectResult<()> {
        let mut output = self.output.lock().await;
        if output.pending.len() as u64 >= self.chunk_size {
            self.flush_locked(&mut output).await?;
        }
        output.pending.push(record);
        if output.pending.len() as u64 >= self.chunk_size {
            self.flush_locked(&mut output).await?;
        }
        Ok(())
    }

    /// Write out any buffered records as a (possibly short) chunk.
    pub async fn flush(&self) -> ObjectResult<()> {
        let mut output = self.output.lock().await;
        while !output.pending.is_empty() {
            self.flush_locked(&mut output).await?;
        }
        Ok(())
    }

    /// Write up to one chunk of buffered records.
    ///
    /// A slot whose write fails is kept and reused by the next attempt, so
    /// the writer's committed position never stalls behind an abandoned slot.
    async fn flush_locked(&self, output: &mut Output) -> ObjectResult<()> {
        if output.pending.is_empty() {
            return Ok(());
        }
        let count = output.pending.len().min(self.chunk_size as usize);
        let body = chunk::encode(&output.pending[..count])?;
        let slot = match output.reserved.take() {
            Some(slot) => slot,
            None => self.bucket.next_output().await?,
        };
        if let Err(e) = tokio::fs::write(&slot.path, body).await {
            warn!(chunk = slot.offset, path = %slot.path.display(), error = %e, "chunk write failed");
            output.reserved = Some(slot);
            return Err(e.into());
        }
        output.pending.drain(..count);
        slot.token.complete().await?;
        debug!(chunk = slot.offset, records = count, "flushed chunk");
        Ok(())
    }

    /// Flush buffered records and close the output side.
    pub async fn close(&self) -> ObjectResult<()> {
        self.flush().await?;
        self.bucket.close().await?;
        Ok(())
    }

    /// The reader for `key`, created on first use.
    pub fn reader(&self, key: &str) -> ObjectResult<ObjectReader> {
        let bucket_reader = self.bucket.reader(key)?;
        let mut readers = self.readers.lock().expect("lock poisoned");
        let reader = readers
            .entry(key.to_string())
            .or_insert_with(|| ObjectReader::new(bucket_reader, self.chunk_size));
        Ok(reader.clone())
    }

    /// Read the next record through the default `"in"` reader.
    pub async fn read(&self) -> ObjectResult<Option<Record>> {
        self.reader(DEFAULT_READER)?.read().await
    }

    /// Seek the default `"in"` reader to record `offset`.
    pub async fn seek(&self, offset: u64) -> ObjectResult<()> {
        self.reader(DEFAULT_READER)?.seek(offset).await
    }

    /// Number of committed records in a Store.
    ///
    /// Every chunk but the last is assumed full; the last is counted.
    pub async fn size(&self) -> ObjectResult<u64> {
        if !self.bucket.kind().is_seekable() {
            return Err(BrigadeError::NotSeekable("size of a queue".into()).into());
        }
        let chunks = self.bucket.write_position();
        chunk::stored_records(chunks, self.chunk_size, |c| self.bucket.make_name(c)).await
    }
}

impl std::fmt::Debug for ObjectBrigade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBrigade")
            .field("bucket", &self.bucket)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Record the chunk size on first open and check it on later ones.
async fn resolve_chunk_size(bucket: &BucketBrigade, config: &ObjectConfig) -> ObjectResult<u64> {
    let configured = config.chunk_size;
    let recorded = bucket
        .state()
        .do_once(CHUNK_SIZE_TAG, || async move { Ok(json!(configured)) })
        .await?;
    let recorded = recorded.as_u64().filter(|&n| n > 0).ok_or_else(|| {
        BrigadeError::InvalidConfig(format!("recorded chunk size {recorded} is not a positive integer"))
    })?;

    if recorded == configured {
        return Ok(configured);
    }
    if config.brigade.strict_state {
        return Err(BrigadeError::ConfigMismatch {
            expected: format!("chunk size {configured}"),
            found: format!("chunk size {recorded}"),
        }
        .into());
    }
    warn!(configured, recorded, "chunk size differs from configuration, using recorded size");
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObjectError;

    fn config(dir: &std::path::Path, chunk_size: u64) -> ObjectConfig {
        ObjectConfig::new(dir).with_chunk_size(chunk_size)
    }

    #[tokio::test]
    async fn chunk_size_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 7)).await.unwrap();
        assert_eq!(ob.chunk_size(), 7);
        assert_eq!(ob.bucket().state().current()["_once"]["chunkSize"], json!([7]));
    }

    #[tokio::test]
    async fn chunk_size_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        drop(ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 7)).await.unwrap());

        let err = ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 8))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::Brigade(BrigadeError::ConfigMismatch { .. })));

        let permissive = config(tmp.path(), 8).with_brigade(|b| b.with_strict_state(false));
        let ob = ObjectBrigade::open(BrigadeKind::Store, permissive).await.unwrap();
        assert_eq!(ob.chunk_size(), 7);
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::Brigade(BrigadeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn full_buffer_flushes_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 2)).await.unwrap();
        ob.write(&json!({"n": 1})).await.unwrap();
        assert_eq!(ob.bucket().write_position(), 0);
        ob.write(&json!({"n": 2})).await.unwrap();
        assert_eq!(ob.bucket().write_position(), 1);
        assert_eq!(ob.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn size_counts_short_last_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = ObjectBrigade::open(BrigadeKind::Store, config(tmp.path(), 3)).await.unwrap();
        assert_eq!(ob.size().await.unwrap(), 0);
        for n in 0..7 {
            ob.write(&json!({"n": n})).await.unwrap();
        }
        ob.close().await.unwrap();
        assert_eq!(ob.bucket().write_position(), 3);
        assert_eq!(ob.size().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn queue_has_no_size() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = ObjectBrigade::open(BrigadeKind::Queue, config(tmp.path(), 3)).await.unwrap();
        assert!(ob.size().await.is_err());
    }
}
