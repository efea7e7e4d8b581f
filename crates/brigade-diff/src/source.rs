//! Record sources consumed by the merge.

use std::collections::VecDeque;

use async_trait::async_trait;
use brigade_object::{ObjectReader, Record};
use serde_json::Value;

use crate::error::DiffResult;

/// An ordered stream of JSON records.
#[async_trait]
pub trait RecordSource: Send {
    /// The next record, or `None` once the stream is exhausted.
    async fn next_record(&mut self) -> DiffResult<Option<Value>>;

    /// Release whatever the source still holds. Called once after the merge.
    async fn finish(&mut self) -> DiffResult<()> {
        Ok(())
    }
}

#[async_trait]
impl RecordSource for VecDeque<Value> {
    async fn next_record(&mut self) -> DiffResult<Option<Value>> {
        Ok(self.pop_front())
    }
}

/// Adapts an [`ObjectReader`] to [`RecordSource`].
///
/// The token of each record is completed when the following record is
/// requested (or on [`finish`](RecordSource::finish)), so the reader's
/// position only covers records the merge has finished with.
#[derive(Debug)]
pub struct ReaderSource {
    reader: ObjectReader,
    current: Option<Record>,
}

impl ReaderSource {
    /// Wrap `reader`.
    pub fn new(reader: ObjectReader) -> Self {
        Self {
            reader,
            current: None,
        }
    }

    /// The wrapped reader.
    pub fn reader(&self) -> &ObjectReader {
        &self.reader
    }

    async fn release(&mut self) -> DiffResult<()> {
        if let Some(record) = self.current.take() {
            record.token.complete().await.map_err(brigade_object::ObjectError::from)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for ReaderSource {
    async fn next_record(&mut self) -> DiffResult<Option<Value>> {
        self.release().await?;
        let record = self.reader.read().await?;
        let value = record.as_ref().map(|r| r.value.clone());
        self.current = record;
        Ok(value)
    }

    async fn finish(&mut self) -> DiffResult<()> {
        self.release().await
    }
}
