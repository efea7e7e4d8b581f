use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use brigade_bucket::{BrigadeError, BucketReader};
use brigade_state::CompletionToken;
use serde_json::Value;
use tracing::debug;

use crate::chunk;
use crate::error::ObjectResult;

/// One record handed out by an [`ObjectReader`].
#[derive(Debug)]
pub struct Record {
    /// The decoded record.
    pub value: Value,
    /// Position in the flat record offset space.
    pub offset: u64,
    /// Completing this retires the record's share of its chunk.
    pub token: CompletionToken,
}

#[derive(Default)]
struct ReadState {
    buffer: VecDeque<Record>,
    skip: u64,
}

struct ReaderInner {
    bucket: BucketReader,
    chunk_size: u64,
    state: tokio::sync::Mutex<ReadState>,
}

/// Per-record cursor over a chunked brigade.
///
/// Each chunk read from the underlying [`BucketReader`] is split into its
/// records and the chunk's token is forked once per record, so the chunk
/// only counts as consumed once every record in it has been completed.
#[derive(Clone)]
pub struct ObjectReader {
    inner: Arc<ReaderInner>,
}

impl ObjectReader {
    pub(crate) fn new(bucket: BucketReader, chunk_size: u64) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                bucket,
                chunk_size,
                state: tokio::sync::Mutex::new(ReadState::default()),
            }),
        }
    }

    /// Ledger key of this reader.
    pub fn key(&self) -> &str {
        self.inner.bucket.key()
    }

    /// The chunk-level reader underneath.
    pub fn bucket(&self) -> &BucketReader {
        &self.inner.bucket
    }

    /// Next record, or `None` at end of stream.
    pub async fn read(&self) -> ObjectResult<Option<Record>> {
        let mut state = self.inner.state.lock().await;
        loop {
            if let Some(record) = state.buffer.pop_front() {
                return Ok(Some(record));
            }
            if !self.fill(&mut state).await? {
                return Ok(None);
            }
        }
    }

    /// Pull one chunk into the buffer. Returns `false` at end of stream.
    async fn fill(&self, state: &mut ReadState) -> ObjectResult<bool> {
        let Some(slot) = self.inner.bucket.next_input().await? else {
            return Ok(false);
        };
        let records = chunk::read(&slot.path).await?;
        let skip = std::mem::take(&mut state.skip);
        let base = slot.offset * self.inner.chunk_size;

        for (index, value) in records.into_iter().enumerate().skip(skip as usize) {
            state.buffer.push_back(Record {
                value,
                offset: base + index as u64,
                token: slot.token.fork()?,
            });
        }
        debug!(
            reader = %self.key(),
            chunk = slot.offset,
            records = state.buffer.len(),
            "buffered chunk"
        );
        slot.token.complete().await?;
        Ok(true)
    }

    /// Position the reader at record `offset`, at most the number of
    /// records committed.
    ///
    /// Buffered records are discarded by completing their tokens, so the
    /// chunk they came from still resolves. A rejected seek leaves them
    /// buffered.
    pub async fn seek(&self, offset: u64) -> ObjectResult<()> {
        let bucket = &self.inner.bucket;
        if !bucket.kind().is_seekable() {
            return Err(BrigadeError::NotSeekable(self.key().to_string()).into());
        }
        let chunk_size = self.inner.chunk_size;
        let mut state = self.inner.state.lock().await;
        let chunks = bucket.write_end().await?;
        let end = chunk::stored_records(chunks, chunk_size, |c| bucket.slot_path(c)).await?;
        if offset > end {
            return Err(BrigadeError::SeekOutOfRange { offset, end }.into());
        }

        for record in std::mem::take(&mut state.buffer) {
            record.token.complete().await?;
        }
        bucket.seek(offset / chunk_size).await?;
        state.skip = offset % chunk_size;
        debug!(reader = %self.key(), offset, "seeked record stream");
        Ok(())
    }

    /// Feed every remaining record to `consumer`.
    ///
    /// Buffered records are completed one by one; after that whole chunks
    /// are processed and only the chunk's token is completed, once every
    /// record in it has been consumed.
    pub async fn consume<F, Fut>(&self, mut consumer: F) -> ObjectResult<()>
    where
        F: FnMut(Value) -> Fut,
        Fut: Future<Output = ObjectResult<()>>,
    {
        let mut state = self.inner.state.lock().await;
        while let Some(record) = state.buffer.pop_front() {
            consumer(record.value).await?;
            record.token.complete().await?;
        }

        loop {
            let Some(slot) = self.inner.bucket.next_input().await? else {
                return Ok(());
            };
            let skip = std::mem::take(&mut state.skip) as usize;
            for value in chunk::read(&slot.path).await?.into_iter().skip(skip) {
                consumer(value).await?;
            }
            slot.token.complete().await?;
        }
    }
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("key", &self.key())
            .field("chunk_size", &self.inner.chunk_size)
            .finish()
    }
}
