use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brigade_bucket::{BrigadeConfig, BrigadeKind, BucketBrigade};
use brigade_state::{cleanup, PollConfig};
use walkdir::WalkDir;

fn fast_poll() -> PollConfig {
    PollConfig {
        min_delay_ms: 5,
        max_delay_ms: 20,
    }
}

fn ring(dir: &Path, width: u64) -> BrigadeConfig {
    BrigadeConfig::new(dir)
        .with_shape(width, 1)
        .with_data_dir(dir.join("data"))
        .with_poll(fast_poll())
}

async fn put(bb: &BucketBrigade, body: &str) -> u64 {
    let slot = bb.next_output().await.unwrap();
    tokio::fs::write(&slot.path, body).await.unwrap();
    slot.token.complete().await.unwrap();
    slot.offset
}

fn data_files(dir: &Path) -> usize {
    WalkDir::new(dir.join("data"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

#[tokio::test]
async fn producer_blocks_until_reader_frees_a_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let bb = Arc::new(
        BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 4))
            .await
            .unwrap(),
    );
    for i in 0..3 {
        put(&bb, &i.to_string()).await;
    }
    assert_eq!(bb.space(), 0);

    let producer = tokio::spawn({
        let bb = bb.clone();
        async move { put(&bb, "3").await }
    });
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!producer.is_finished());

    let slot = bb.next_input().await.unwrap().unwrap();
    assert_eq!(slot.offset, 0);
    assert_eq!(tokio::fs::read_to_string(&slot.path).await.unwrap(), "0");
    slot.token.complete().await.unwrap();
    assert!(!slot.path.exists());

    let offset = tokio::time::timeout(Duration::from_secs(5), producer)
        .await
        .expect("producer should unblock")
        .unwrap();
    assert_eq!(offset, 3);
}

#[tokio::test]
async fn ring_wraps_and_deletes_consumed_files() {
    let tmp = tempfile::tempdir().unwrap();
    let bb = Arc::new(
        BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 3))
            .await
            .unwrap(),
    );

    let producer = tokio::spawn({
        let bb = bb.clone();
        async move {
            for i in 0..10 {
                put(&bb, &format!("item-{i}")).await;
            }
            bb.close().await.unwrap();
        }
    });

    let reader = bb.reader("in").unwrap();
    let mut seen = Vec::new();
    let mut offsets = Vec::new();
    while let Some(slot) = reader.next_input().await.unwrap() {
        seen.push(tokio::fs::read_to_string(&slot.path).await.unwrap());
        offsets.push(slot.offset);
        slot.token.complete().await.unwrap();
    }
    producer.await.unwrap();

    let expected: Vec<String> = (0..10).map(|i| format!("item-{i}")).collect();
    assert_eq!(seen, expected);
    assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(reader.position(), 1);
    assert_eq!(bb.write_position(), 1);
    assert_eq!(data_files(tmp.path()), 0);
}

#[tokio::test]
async fn closed_queue_drains_then_ends() {
    let tmp = tempfile::tempdir().unwrap();
    let bb = BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 10))
        .await
        .unwrap();
    put(&bb, "a").await;
    put(&bb, "b").await;
    bb.close().await.unwrap();

    let mut bodies = Vec::new();
    while let Some(slot) = bb.next_input().await.unwrap() {
        bodies.push(tokio::fs::read_to_string(&slot.path).await.unwrap());
        slot.token.complete().await.unwrap();
    }
    assert_eq!(bodies, vec!["a", "b"]);
    assert!(bb.next_input().await.unwrap().is_none());
}

#[tokio::test]
async fn out_of_order_completion_defers_deletion() {
    let tmp = tempfile::tempdir().unwrap();
    let bb = BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 10))
        .await
        .unwrap();
    for body in ["a", "b", "c"] {
        put(&bb, body).await;
    }

    let first = bb.next_input().await.unwrap().unwrap();
    let second = bb.next_input().await.unwrap().unwrap();
    second.token.complete().await.unwrap();
    // The reader position cannot pass the unfinished first slot.
    assert_eq!(bb.reader("in").unwrap().position(), 0);
    assert!(second.path.exists());

    first.token.complete().await.unwrap();
    assert_eq!(bb.reader("in").unwrap().position(), 2);
    assert!(!first.path.exists());
    assert!(!second.path.exists());
    assert_eq!(data_files(tmp.path()), 1);
}

#[tokio::test]
async fn writer_and_reader_in_separate_instances() {
    let tmp = tempfile::tempdir().unwrap();
    let writer = Arc::new(
        BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 3))
            .await
            .unwrap(),
    );
    let reader = BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 3))
        .await
        .unwrap();

    let producer = tokio::spawn({
        let writer = writer.clone();
        async move {
            for i in 0..6 {
                put(&writer, &i.to_string()).await;
            }
            writer.close().await.unwrap();
        }
    });

    let mut seen = Vec::new();
    while let Some(slot) = tokio::time::timeout(Duration::from_secs(10), reader.next_input())
        .await
        .expect("reader should make progress")
        .unwrap()
    {
        seen.push(tokio::fs::read_to_string(&slot.path).await.unwrap());
        slot.token.complete().await.unwrap();
    }
    producer.await.unwrap();
    assert_eq!(seen, vec!["0", "1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn consumed_slots_stay_reserved_until_their_files_are_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let bb = Arc::new(
        BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 4))
            .await
            .unwrap(),
    );
    for body in ["old-0", "old-1", "old-2"] {
        put(&bb, body).await;
    }
    let reader = bb.reader("in").unwrap();

    // Queued ahead of both slots, so its hook runs right after the commit
    // that covers them and before their files are deleted.
    let space_after_commit = Arc::new(std::sync::Mutex::new(None));
    let gate = bb.state().section("in").make_token(
        Vec::new(),
        Some(cleanup({
            let bb = bb.clone();
            let seen = space_after_commit.clone();
            move || async move {
                *seen.lock().unwrap() = Some((bb.reader("in").unwrap().position(), bb.space()));
                Ok(())
            }
        })),
    );
    let first = reader.next_input().await.unwrap().unwrap();
    let second = reader.next_input().await.unwrap().unwrap();
    assert_eq!((first.offset, second.offset), (0, 1));

    second.token.complete().await.unwrap();
    first.token.complete().await.unwrap();
    assert_eq!(reader.position(), 0);
    gate.complete().await.unwrap();

    // The position moved, but the writer could not reuse either slot yet.
    assert_eq!(*space_after_commit.lock().unwrap(), Some((2, 0)));
    assert!(!first.path.exists());
    assert!(!second.path.exists());
    assert_eq!(bb.space(), 2);

    assert_eq!(put(&bb, "new-3").await, 3);
    assert_eq!(put(&bb, "new-0").await, 0);
    assert_eq!(tokio::fs::read_to_string(&first.path).await.unwrap(), "new-0");

    let mut bodies = Vec::new();
    bb.close().await.unwrap();
    while let Some(slot) = reader.next_input().await.unwrap() {
        bodies.push(tokio::fs::read_to_string(&slot.path).await.unwrap());
        slot.token.complete().await.unwrap();
    }
    assert_eq!(bodies, vec!["old-2", "new-3", "new-0"]);
}

#[tokio::test]
async fn reader_removes_files_left_by_an_interrupted_run() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let bb = BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 4))
            .await
            .unwrap();
        for body in ["a", "b", "c"] {
            put(&bb, body).await;
        }
        // Position committed for two slots, stopped before deleting them.
        bb.state()
            .mutate(&|doc: &serde_json::Value| {
                let mut next = doc.clone();
                next["in"]["pos"] = 2.into();
                next
            })
            .await
            .unwrap();
    }

    let bb = BucketBrigade::open(BrigadeKind::Queue, ring(tmp.path(), 4))
        .await
        .unwrap();
    assert_eq!(data_files(tmp.path()), 3);
    assert_eq!(bb.space(), 0);

    let slot = bb.next_input().await.unwrap().unwrap();
    assert_eq!(slot.offset, 2);
    assert_eq!(data_files(tmp.path()), 1);
    assert_eq!(bb.state().current()["in"]["freed"], 2);
    assert_eq!(bb.space(), 2);
    slot.token.complete().await.unwrap();
    assert_eq!(data_files(tmp.path()), 0);
}
