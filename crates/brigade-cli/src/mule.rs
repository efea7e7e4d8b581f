//! Synthetic throughput exerciser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, ensure};
use brigade_bucket::BrigadeKind;
use brigade_object::ObjectBrigade;
use colored::Colorize;
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;

use crate::cli::MuleMode;

const LOG_EVERY: u64 = 100_000;

/// A representative listing record.
pub fn make_record(index: u64) -> Value {
    json!({
        "index": index,
        "id": format!("availability_p002mq9f{index}"),
        "source": "appw",
        "kind": "availability_clip",
        "generation": 1159,
        "ETag": "b8b87d1258264cb0a3baa5779f10e17d",
        "Key": "programme_availability_cd/live/application/json/availability/clip/pid.p002mq9f",
        "LastModified": "2019-08-23T08:55:30.000Z",
        "Size": 3051,
        "StorageClass": "STANDARD",
    })
}

pub async fn run(ob: &ObjectBrigade, mode: MuleMode, count: u64) -> anyhow::Result<()> {
    match mode {
        MuleMode::Write => write_sequence(ob, count, &AtomicBool::new(false)).await,
        MuleMode::Read => read_sequence(ob, &AtomicBool::new(true)).await.map(|_| ()),
        MuleMode::Seek => seek_test(ob, count).await,
        MuleMode::Both => {
            let done = AtomicBool::new(false);
            let (written, read) =
                tokio::join!(write_sequence(ob, count, &done), read_sequence(ob, &done));
            written?;
            let read = read?;
            ensure!(read == count, "read {read} records, expected {count}");
            Ok(())
        }
    }
}

async fn write_sequence(ob: &ObjectBrigade, count: u64, done: &AtomicBool) -> anyhow::Result<()> {
    println!("Writing");
    for index in 0..count {
        if index % LOG_EVERY == 0 {
            info!(offset = index, "write");
        }
        ob.write_value(make_record(index)).await?;
    }
    ob.close().await?;
    done.store(true, Ordering::Release);
    println!("{} Finished writing {} records", "✓".green().bold(), count);
    Ok(())
}

/// Read to the end of the stream, returning the number of records read.
///
/// A Store has no closed state, so a reader that catches up with a writer
/// still running waits on the ledger for more input until `writer_done` is
/// set.
async fn read_sequence(ob: &ObjectBrigade, writer_done: &AtomicBool) -> anyhow::Result<u64> {
    println!("Reading");
    let reader = ob.reader(brigade_bucket::DEFAULT_READER)?;
    if ob.bucket().kind() == BrigadeKind::Store {
        reader.seek(0).await?;
    }

    let state = ob.bucket().state();
    let patience = Duration::from_millis(ob.bucket().config().poll.max_delay_ms.max(1));
    let mut read = 0;
    loop {
        let finished = writer_done.load(Ordering::Acquire);
        let seen = state.current();
        match reader.read().await? {
            Some(record) => {
                if record.offset % LOG_EVERY == 0 {
                    info!(offset = record.offset, "read");
                }
                record.token.complete().await?;
                read += 1;
            }
            None if finished || ob.bucket().kind() == BrigadeKind::Queue => break,
            // The writer's last commit may already be behind `seen`, so the
            // wait is bounded and `writer_done` is checked again.
            None => {
                if let Ok(waited) = tokio::time::timeout(patience, state.wait_for_change_from(&seen)).await {
                    waited?;
                }
            }
        }
    }
    println!("{} Finished reading {} records", "✓".green().bold(), read);
    Ok(read)
}

/// Seek to random record offsets and check each lands on the right record.
async fn seek_test(ob: &ObjectBrigade, count: u64) -> anyhow::Result<()> {
    let size = ob.size().await?;
    ensure!(size > 0, "nothing to seek in");
    let reader = ob.reader("seek")?;

    for _ in 0..count {
        let pos = rand::thread_rng().gen_range(0..size);
        reader.seek(pos).await?;
        let Some(record) = reader.read().await? else {
            bail!("unexpected end of stream at {pos} of {size}");
        };
        let index = record.value.get("index").and_then(Value::as_u64);
        println!("Seek to {pos} of {size}, got {index:?} at {}", record.offset);
        if index != Some(pos) || record.offset != pos {
            bail!("bad seek: wanted {pos}, got record {index:?} at offset {}", record.offset);
        }
        record.token.complete().await?;
    }
    println!("{} {} seeks verified", "✓".green().bold(), count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use brigade_object::ObjectConfig;

    async fn open(dir: &std::path::Path, kind: BrigadeKind, chunk_size: u64) -> ObjectBrigade {
        let mut config = ObjectConfig::new(dir).with_chunk_size(chunk_size);
        config.brigade.poll.min_delay_ms = 5;
        config.brigade.poll.max_delay_ms = 20;
        ObjectBrigade::open(kind, config).await.unwrap()
    }

    #[tokio::test]
    async fn store_write_then_seek() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = open(tmp.path(), BrigadeKind::Store, 7).await;
        run(&ob, MuleMode::Write, 50).await.unwrap();
        assert_eq!(ob.size().await.unwrap(), 50);
        run(&ob, MuleMode::Seek, 20).await.unwrap();
        run(&ob, MuleMode::Read, 0).await.unwrap();
    }

    #[tokio::test]
    async fn queue_both_directions() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = open(tmp.path(), BrigadeKind::Queue, 7).await;
        run(&ob, MuleMode::Both, 40).await.unwrap();
    }

    #[tokio::test]
    async fn store_reader_waits_for_a_late_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = open(tmp.path(), BrigadeKind::Store, 3).await;
        let done = AtomicBool::new(false);
        let (read, written) = tokio::join!(read_sequence(&ob, &done), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            write_sequence(&ob, 10, &done).await
        });
        written.unwrap();
        assert_eq!(read.unwrap(), 10);
    }

    #[tokio::test]
    async fn store_both_directions() {
        let tmp = tempfile::tempdir().unwrap();
        let ob = open(tmp.path(), BrigadeKind::Store, 5).await;
        run(&ob, MuleMode::Both, 40).await.unwrap();
    }
}
